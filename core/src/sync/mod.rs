//! Subscription synchronization pipeline.
//!
//! `update` fetches a subscription document, decodes and parses it into raw
//! node configurations, and reconciles them against the stored node set in
//! one transaction. Every attempt appends exactly one subscription log row;
//! fetch and parse failures feed the subscription's consecutive-error
//! counter, which flips it to `error` at the threshold.

pub mod parser;

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::http;
use crate::database::{
    Database, NewSubscription, NewSubscriptionLog, PreparedNode, Subscription,
    SubscriptionFilter, SubscriptionLog,
};
use crate::errors::CoreError;

/// How an update attempt was triggered; recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateTrigger {
    Manual,
    Scheduled,
}

impl UpdateTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateTrigger::Manual => "manual",
            UpdateTrigger::Scheduled => "scheduled",
        }
    }
}

/// Outcome of one subscription update.
///
/// Invariants: `valid_nodes = new_nodes + updated_nodes` and
/// `new_nodes >= global_new_nodes >= 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResult {
    pub subscription_id: i64,
    pub total_fetched: i64,
    pub valid_nodes: i64,
    pub new_nodes: i64,
    pub global_new_nodes: i64,
    pub updated_nodes: i64,
    pub removed_nodes: i64,
    pub duration_ms: i64,
}

struct FetchSuccess {
    body: String,
    http_status: i64,
    response_time_ms: i64,
}

struct FetchFailure {
    error: CoreError,
    http_status: Option<i64>,
    response_time_ms: i64,
}

pub struct SubscriptionSync {
    database: Arc<Database>,
    client: Client,
    default_user_agent: String,
}

impl SubscriptionSync {
    pub fn new(database: Arc<Database>, config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_seconds))
            .connect_timeout(http::CONNECT_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            database,
            client,
            default_user_agent: config.default_user_agent.clone(),
        }
    }

    /// Create a subscription after checking the URL is plain http/https.
    pub async fn create(&self, new: NewSubscription) -> Result<Subscription, CoreError> {
        validate_subscription_url(&new.url)?;
        let subscription = self.database.create_subscription(&new).await?;
        Ok(subscription)
    }

    pub async fn get(&self, id: i64) -> Result<Subscription, CoreError> {
        self.database
            .get_subscription(id)
            .await?
            .ok_or(CoreError::SubscriptionNotFound { id })
    }

    pub async fn list(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<(Vec<Subscription>, i64), CoreError> {
        Ok(self.database.list_subscriptions(filter).await?)
    }

    /// Delete a subscription; its nodes and logs cascade with it.
    pub async fn delete(&self, id: i64) -> Result<(), CoreError> {
        if !self.database.delete_subscription(id).await? {
            return Err(CoreError::SubscriptionNotFound { id });
        }
        Ok(())
    }

    pub async fn logs(&self, id: i64, limit: i64) -> Result<Vec<SubscriptionLog>, CoreError> {
        Ok(self.database.list_subscription_logs(id, limit).await?)
    }

    /// Run one full fetch/parse/reconcile pass for a subscription.
    pub async fn update(
        &self,
        subscription_id: i64,
        trigger: UpdateTrigger,
    ) -> Result<UpdateResult, CoreError> {
        let subscription = self
            .database
            .get_subscription(subscription_id)
            .await?
            .ok_or(CoreError::SubscriptionNotFound {
                id: subscription_id,
            })?;

        let started = Instant::now();
        let mut log = NewSubscriptionLog {
            subscription_id,
            update_type: trigger.as_str().to_string(),
            ..Default::default()
        };

        let user_agent = if subscription.user_agent.is_empty() {
            self.default_user_agent.clone()
        } else {
            subscription.user_agent.clone()
        };

        let fetched = match self.fetch(&subscription.url, &user_agent).await {
            Ok(fetched) => fetched,
            Err(failure) => {
                log.http_status = failure.http_status;
                log.response_time_ms = Some(failure.response_time_ms);
                log.error_message = Some(failure.error.to_string());
                self.database.insert_subscription_log(&log).await?;
                self.database
                    .record_update_failure(subscription_id, &failure.error.to_string())
                    .await?;
                warn!(
                    "Subscription {} fetch failed: {}",
                    subscription_id, failure.error
                );
                return Err(failure.error);
            }
        };
        log.http_status = Some(fetched.http_status);
        log.response_time_ms = Some(fetched.response_time_ms);

        let content = parser::decode_body(&fetched.body);
        let entries = parser::parse_document(&content);
        if entries.is_empty() {
            let error = CoreError::Parse {
                reason: "no valid proxy configurations found".to_string(),
            };
            log.error_message = Some(error.to_string());
            self.database.insert_subscription_log(&log).await?;
            self.database
                .record_update_failure(subscription_id, &error.to_string())
                .await?;
            warn!("Subscription {} parse failed: {}", subscription_id, error);
            return Err(error);
        }

        // Validate and hash each entry; invalid entries are skipped and
        // counted, repeated hashes within one fetch are kept once.
        let total_fetched = entries.len() as i64;
        let mut seen = HashSet::new();
        let mut prepared = Vec::with_capacity(entries.len());
        for entry in &entries {
            if let Err(e) = entry.validate() {
                debug!("Skipping invalid entry '{}': {}", entry.name, e);
                continue;
            }
            let hash = entry.identity_hash();
            if !seen.insert(hash.clone()) {
                continue;
            }
            prepared.push(PreparedNode {
                hash,
                name: entry.name.clone(),
                server: entry.server.clone(),
                port: i64::from(entry.port),
                protocol: entry.protocol.clone(),
                config: entry.config.to_string(),
                country: parser::country_from_name(&entry.name),
            });
        }

        let outcome = match self
            .database
            .reconcile_subscription_nodes(subscription_id, &prepared)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                log.total_fetched = total_fetched;
                log.error_message = Some(e.to_string());
                self.database.insert_subscription_log(&log).await?;
                return Err(CoreError::Database {
                    reason: e.to_string(),
                });
            }
        };

        log.success = true;
        log.total_fetched = total_fetched;
        log.valid_nodes = outcome.valid_nodes;
        log.new_nodes = outcome.new_nodes;
        log.global_new_nodes = outcome.global_new_nodes;
        log.updated_nodes = outcome.updated_nodes;
        log.removed_nodes = outcome.removed_nodes;
        self.database.insert_subscription_log(&log).await?;
        self.database
            .record_update_success(subscription_id, &outcome)
            .await?;

        let duration_ms = started.elapsed().as_millis() as i64;
        info!(
            "Updated subscription {}: {} fetched, {} valid, {} new ({} globally new), {} updated, {} removed in {}ms",
            subscription_id,
            total_fetched,
            outcome.valid_nodes,
            outcome.new_nodes,
            outcome.global_new_nodes,
            outcome.updated_nodes,
            outcome.removed_nodes,
            duration_ms
        );

        Ok(UpdateResult {
            subscription_id,
            total_fetched,
            valid_nodes: outcome.valid_nodes,
            new_nodes: outcome.new_nodes,
            global_new_nodes: outcome.global_new_nodes,
            updated_nodes: outcome.updated_nodes,
            removed_nodes: outcome.removed_nodes,
            duration_ms,
        })
    }

    async fn fetch(&self, url: &str, user_agent: &str) -> Result<FetchSuccess, FetchFailure> {
        let started = Instant::now();

        let response = self
            .client
            .get(url)
            .header("User-Agent", user_agent)
            .header("Accept", "*/*")
            .send()
            .await
            .map_err(|e| FetchFailure {
                error: CoreError::Fetch {
                    url: url.to_string(),
                    status: None,
                    reason: e.to_string(),
                },
                http_status: None,
                response_time_ms: started.elapsed().as_millis() as i64,
            })?;

        let status = response.status();
        let response_time_ms = started.elapsed().as_millis() as i64;

        if !status.is_success() {
            return Err(FetchFailure {
                error: CoreError::Fetch {
                    url: url.to_string(),
                    status: Some(status.as_u16()),
                    reason: format!("HTTP error: {}", status.as_u16()),
                },
                http_status: Some(i64::from(status.as_u16())),
                response_time_ms,
            });
        }

        let body = response.text().await.map_err(|e| FetchFailure {
            error: CoreError::Fetch {
                url: url.to_string(),
                status: Some(status.as_u16()),
                reason: format!("failed to read response body: {}", e),
            },
            http_status: Some(i64::from(status.as_u16())),
            response_time_ms,
        })?;

        Ok(FetchSuccess {
            body,
            http_status: i64::from(status.as_u16()),
            response_time_ms,
        })
    }
}

/// Subscriptions must live behind plain http/https URLs.
pub fn validate_subscription_url(raw: &str) -> Result<(), CoreError> {
    let parsed = url::Url::parse(raw).map_err(|e| CoreError::InvalidConfig {
        field: "url".to_string(),
        reason: format!("invalid URL format: {}", e),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(CoreError::InvalidConfig {
            field: "url".to_string(),
            reason: format!("unsupported URL scheme: {}", other),
        }),
    }
}
