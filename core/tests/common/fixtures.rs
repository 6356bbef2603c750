//! Reusable fixtures for integration tests.

// Allow unused code in test fixtures - they are utilities shared across
// several test binaries which each use a subset.
#![allow(dead_code)]

use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nodepool::database::{NewSubscription, Node, NodeFilter, PreparedNode, Subscription, TestMeasurements};
use nodepool::identity::identity_hash;
use nodepool::Database;

/// In-memory database wrapper shared by the integration tests.
pub struct TestDatabase {
    database: Arc<Database>,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        let database = Database::connect("sqlite::memory:").await?;
        Ok(Self {
            database: Arc::new(database),
        })
    }

    pub fn database(&self) -> Arc<Database> {
        self.database.clone()
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        self.database.pool()
    }

    pub async fn seed_subscription(&self, name: &str, url: &str) -> Result<Subscription> {
        let subscription = self
            .database
            .create_subscription(&NewSubscription {
                name: name.to_string(),
                url: url.to_string(),
                user_agent: None,
                auto_update: true,
                update_interval_seconds: None,
            })
            .await?;
        Ok(subscription)
    }

    /// Insert `count` distinct nodes under a subscription and return them in
    /// insertion order.
    pub async fn seed_nodes(&self, subscription_id: i64, count: usize) -> Result<Vec<Node>> {
        let entries: Vec<PreparedNode> = (0..count)
            .map(|i| prepared_node(&format!("server-{i}.example.com"), 443))
            .collect();
        self.database
            .reconcile_subscription_nodes(subscription_id, &entries)
            .await?;

        let (mut nodes, _) = self
            .database
            .list_nodes(&NodeFilter {
                subscription_id: Some(subscription_id),
                page: 1,
                size: count as i64,
                ..Default::default()
            })
            .await?;
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    /// Mark a node online with the given measurements.
    pub async fn mark_online(
        &self,
        node_id: i64,
        delay_ms: i64,
        upload_mbps: i64,
        download_mbps: i64,
    ) -> Result<()> {
        let measurements = TestMeasurements {
            delay_ms: Some(delay_ms),
            upload_bps: Some(upload_mbps * 1_048_576),
            download_bps: Some(download_mbps * 1_048_576),
            loss_rate: Some(0.0),
            streaming_unlock: None,
        };
        self.database
            .apply_test_result(node_id, true, &measurements)
            .await?;
        Ok(())
    }

    /// Force a failure count on an online node, which is not reachable
    /// through the normal API (failures flip nodes offline).
    pub async fn set_continuous_failures(&self, node_id: i64, failures: i64) -> Result<()> {
        sqlx::query("UPDATE nodes SET continuous_failures = ? WHERE id = ?")
            .bind(failures)
            .bind(node_id)
            .execute(self.database.pool())
            .await?;
        Ok(())
    }
}

pub fn prepared_node(server: &str, port: u16) -> PreparedNode {
    PreparedNode {
        hash: identity_hash(server, port, "trojan"),
        name: format!("node {server}"),
        server: server.to_string(),
        port: port as i64,
        protocol: "trojan".to_string(),
        config: format!(r#"{{"server":"{server}","port":{port},"type":"trojan"}}"#),
        country: None,
    }
}

/// Mock subscription server serving canned documents at `/sub`.
pub struct MockSubscriptionServer {
    pub server: MockServer,
}

impl MockSubscriptionServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn url(&self) -> String {
        format!("{}/sub", self.server.uri())
    }

    pub async fn mock_document(&self, body: &str) {
        Mock::given(method("GET"))
            .and(path("/sub"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path("/sub"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }
}

/// Base64-encoded line-format document with one trojan URI per server.
pub fn line_document(servers: &[&str]) -> String {
    let lines: Vec<String> = servers
        .iter()
        .map(|server| format!("trojan://secret@{server}:443#node%20{server}"))
        .collect();
    STANDARD.encode(lines.join("\n"))
}

/// Structured YAML document with two valid proxies and one entry missing
/// its server field.
pub fn yaml_document_with_malformed_entry() -> String {
    r#"proxies:
  - name: good-a
    type: ss
    server: a.example.com
    port: 8388
    cipher: aes-256-gcm
    password: pw
  - name: broken
    type: ss
    port: 8388
  - name: good-b
    type: trojan
    server: b.example.com
    port: 443
    password: pw
"#
    .to_string()
}
