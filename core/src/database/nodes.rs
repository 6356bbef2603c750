//! Node queries and the subscription reconcile transaction.

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashSet;
use tracing::debug;

use super::records::{Node, NodeFilter, NodeStatus, ReconcileOutcome};
use super::Database;

/// One validated, hashed entry ready for reconciliation.
#[derive(Debug, Clone)]
pub struct PreparedNode {
    pub hash: String,
    pub name: String,
    pub server: String,
    pub port: i64,
    pub protocol: String,
    /// Full configuration blob as JSON text
    pub config: String,
    pub country: Option<String>,
}

pub(crate) fn node_from_row(row: &SqliteRow) -> Result<Node> {
    let status: String = row.try_get("status")?;
    Ok(Node {
        id: row.try_get("id")?,
        subscription_id: row.try_get("subscription_id")?,
        node_pool_id: row.try_get("node_pool_id")?,
        name: row.try_get("name")?,
        hash: row.try_get("hash")?,
        server: row.try_get("server")?,
        port: row.try_get("port")?,
        protocol: row.try_get("protocol")?,
        config: row.try_get("config")?,
        country: row.try_get("country")?,
        delay_ms: row.try_get("delay_ms")?,
        upload_bps: row.try_get("upload_bps")?,
        download_bps: row.try_get("download_bps")?,
        loss_rate: row.try_get("loss_rate")?,
        streaming_unlock: row.try_get("streaming_unlock")?,
        status: NodeStatus::parse(&status),
        last_test: row.try_get("last_test")?,
        last_online: row.try_get("last_online")?,
        continuous_failures: row.try_get("continuous_failures")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Live status fields written back after one node test.
#[derive(Debug, Clone, Default)]
pub struct TestMeasurements {
    pub delay_ms: Option<i64>,
    pub upload_bps: Option<i64>,
    pub download_bps: Option<i64>,
    pub loss_rate: Option<f64>,
    /// Streaming unlock map as JSON text
    pub streaming_unlock: Option<String>,
}

impl Database {
    pub async fn get_node(&self, id: i64) -> Result<Option<Node>> {
        let row = sqlx::query("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(node_from_row).transpose()
    }

    pub async fn list_nodes(&self, filter: &NodeFilter) -> Result<(Vec<Node>, i64)> {
        let mut conditions: Vec<&str> = Vec::new();
        if filter.subscription_id.is_some() {
            conditions.push("subscription_id = ?");
        }
        if filter.node_pool_id.is_some() {
            conditions.push("node_pool_id = ?");
        }
        if filter.country.is_some() {
            conditions.push("country = ?");
        }
        if filter.protocol.is_some() {
            conditions.push("protocol = ?");
        }
        if filter.status.is_some() {
            conditions.push("status = ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        macro_rules! bind_filters {
            ($query:expr) => {{
                let mut q = $query;
                if let Some(id) = filter.subscription_id {
                    q = q.bind(id);
                }
                if let Some(id) = filter.node_pool_id {
                    q = q.bind(id);
                }
                if let Some(ref country) = filter.country {
                    q = q.bind(country);
                }
                if let Some(ref protocol) = filter.protocol {
                    q = q.bind(protocol);
                }
                if let Some(status) = filter.status {
                    q = q.bind(status.as_str());
                }
                q
            }};
        }

        let count_sql = format!("SELECT COUNT(*) FROM nodes{}", where_clause);
        let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql))
            .fetch_one(self.pool())
            .await?;

        let page = filter.page.max(1);
        let size = if filter.size > 0 { filter.size } else { 20 };
        let list_sql = format!(
            "SELECT * FROM nodes{} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let rows = bind_filters!(sqlx::query(&list_sql))
            .bind(size)
            .bind((page - 1) * size)
            .fetch_all(self.pool())
            .await?;

        let nodes = rows.iter().map(node_from_row).collect::<Result<Vec<_>>>()?;
        Ok((nodes, total))
    }

    /// Reconcile one subscription's node set against a fresh fetch, inside
    /// a single transaction so partial dedup updates are never visible.
    ///
    /// Entries matching an existing hash within this subscription update
    /// the row's mutable fields in place; new hashes are inserted (checking
    /// the whole pool for the informational globally-new count); rows whose
    /// hash is absent from the fetch are deleted. Every surviving row is
    /// stamped with this sweep's timestamp, which is what the delete
    /// compares against.
    pub async fn reconcile_subscription_nodes(
        &self,
        subscription_id: i64,
        entries: &[PreparedNode],
    ) -> Result<ReconcileOutcome> {
        let mut tx = self.pool().begin().await?;
        let sweep = Utc::now();

        let existing: HashSet<String> =
            sqlx::query_scalar::<_, String>("SELECT hash FROM nodes WHERE subscription_id = ?")
                .bind(subscription_id)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .collect();

        let mut outcome = ReconcileOutcome {
            valid_nodes: entries.len() as i64,
            ..Default::default()
        };

        for entry in entries {
            if existing.contains(&entry.hash) {
                outcome.updated_nodes += 1;
                sqlx::query(
                    r#"
                    UPDATE nodes
                    SET name = ?, config = ?, country = ?, updated_at = ?
                    WHERE subscription_id = ? AND hash = ?
                    "#,
                )
                .bind(&entry.name)
                .bind(&entry.config)
                .bind(&entry.country)
                .bind(sweep)
                .bind(subscription_id)
                .bind(&entry.hash)
                .execute(&mut *tx)
                .await?;
            } else {
                let global_count: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM nodes WHERE hash = ?")
                        .bind(&entry.hash)
                        .fetch_one(&mut *tx)
                        .await?;
                if global_count == 0 {
                    outcome.global_new_nodes += 1;
                }
                outcome.new_nodes += 1;

                sqlx::query(
                    r#"
                    INSERT INTO nodes (
                        subscription_id, name, hash, server, port, protocol,
                        config, country, status, created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'unknown', ?, ?)
                    "#,
                )
                .bind(subscription_id)
                .bind(&entry.name)
                .bind(&entry.hash)
                .bind(&entry.server)
                .bind(entry.port)
                .bind(&entry.protocol)
                .bind(&entry.config)
                .bind(&entry.country)
                .bind(sweep)
                .bind(sweep)
                .execute(&mut *tx)
                .await?;
            }
        }

        // Rows not touched by this sweep are gone from the feed
        let removed = sqlx::query("DELETE FROM nodes WHERE subscription_id = ? AND updated_at < ?")
            .bind(subscription_id)
            .bind(sweep)
            .execute(&mut *tx)
            .await?;
        outcome.removed_nodes = removed.rows_affected() as i64;

        outcome.total_nodes =
            sqlx::query_scalar("SELECT COUNT(*) FROM nodes WHERE subscription_id = ?")
                .bind(subscription_id)
                .fetch_one(&mut *tx)
                .await?;
        outcome.active_nodes = sqlx::query_scalar(
            "SELECT COUNT(*) FROM nodes WHERE subscription_id = ? AND status = 'online'",
        )
        .bind(subscription_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE subscriptions SET total_nodes = ?, active_nodes = ?, updated_at = ? WHERE id = ?",
        )
        .bind(outcome.total_nodes)
        .bind(outcome.active_nodes)
        .bind(sweep)
        .bind(subscription_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            "Reconciled subscription {}: {} new, {} updated, {} removed",
            subscription_id, outcome.new_nodes, outcome.updated_nodes, outcome.removed_nodes
        );
        Ok(outcome)
    }

    /// Nodes the scheduled test sweep should pick up: not offline, never
    /// tested or tested too long ago, currently-online first, then unknown.
    pub async fn nodes_due_for_testing(&self, max_age_hours: i64, limit: i64) -> Result<Vec<Node>> {
        let cutoff = Utc::now() - Duration::hours(max_age_hours);
        let rows = sqlx::query(
            r#"
            SELECT * FROM nodes
            WHERE status != 'offline' AND (last_test IS NULL OR last_test < ?)
            ORDER BY
                CASE WHEN status = 'online' THEN 1 WHEN status = 'unknown' THEN 2 ELSE 3 END,
                last_test ASC
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(node_from_row).collect()
    }

    /// Online nodes matching the optional pool/country/protocol filters,
    /// the candidate set for best-node selection.
    pub async fn online_candidates(
        &self,
        node_pool_id: Option<i64>,
        country: Option<&str>,
        protocol: Option<&str>,
    ) -> Result<Vec<Node>> {
        let mut sql = String::from("SELECT * FROM nodes WHERE status = 'online'");
        if node_pool_id.is_some() {
            sql.push_str(" AND node_pool_id = ?");
        }
        if country.is_some() {
            sql.push_str(" AND country = ?");
        }
        if protocol.is_some() {
            sql.push_str(" AND protocol = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(id) = node_pool_id {
            query = query.bind(id);
        }
        if let Some(country) = country {
            query = query.bind(country);
        }
        if let Some(protocol) = protocol {
            query = query.bind(protocol);
        }

        let rows = query.fetch_all(self.pool()).await?;
        rows.iter().map(node_from_row).collect()
    }

    /// Write back one test outcome to the node's live snapshot. Success
    /// marks the node online, refreshes measured fields, and resets the
    /// failure streak; failure marks it offline and extends the streak.
    pub async fn apply_test_result(
        &self,
        node_id: i64,
        success: bool,
        measurements: &TestMeasurements,
    ) -> Result<()> {
        let now = Utc::now();
        if success {
            sqlx::query(
                r#"
                UPDATE nodes SET
                    status = 'online',
                    delay_ms = COALESCE(?, delay_ms),
                    upload_bps = COALESCE(?, upload_bps),
                    download_bps = COALESCE(?, download_bps),
                    loss_rate = COALESCE(?, loss_rate),
                    streaming_unlock = COALESCE(?, streaming_unlock),
                    last_test = ?,
                    last_online = ?,
                    continuous_failures = 0,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(measurements.delay_ms)
            .bind(measurements.upload_bps)
            .bind(measurements.download_bps)
            .bind(measurements.loss_rate)
            .bind(&measurements.streaming_unlock)
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(node_id)
            .execute(self.pool())
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE nodes SET
                    status = 'offline',
                    last_test = ?,
                    continuous_failures = continuous_failures + 1,
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(node_id)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }
}
