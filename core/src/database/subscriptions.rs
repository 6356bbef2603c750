//! Subscription CRUD, state transitions, and update logs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};

use crate::constants::testing::SUBSCRIPTION_ERROR_THRESHOLD;

use super::records::{
    NewSubscription, NewSubscriptionLog, ReconcileOutcome, Subscription, SubscriptionFilter,
    SubscriptionLog, SubscriptionStatus,
};
use super::Database;

pub(crate) fn subscription_from_row(row: &SqliteRow) -> Result<Subscription> {
    let status: String = row.try_get("status")?;
    Ok(Subscription {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        user_agent: row.try_get("user_agent")?,
        auto_update: row.try_get("auto_update")?,
        update_interval_seconds: row.try_get("update_interval_seconds")?,
        status: SubscriptionStatus::parse(&status),
        error_count: row.try_get("error_count")?,
        error_message: row.try_get("error_message")?,
        last_update: row.try_get("last_update")?,
        last_success: row.try_get("last_success")?,
        total_nodes: row.try_get("total_nodes")?,
        active_nodes: row.try_get("active_nodes")?,
        unique_new_nodes: row.try_get("unique_new_nodes")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Database {
    pub async fn create_subscription(&self, new: &NewSubscription) -> Result<Subscription> {
        let now = Utc::now();
        let user_agent = new
            .user_agent
            .clone()
            .unwrap_or_else(|| crate::constants::defaults::USER_AGENT.to_string());
        let interval = new
            .update_interval_seconds
            .unwrap_or(crate::constants::defaults::UPDATE_INTERVAL_SECONDS);

        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (
                name, url, user_agent, auto_update, update_interval_seconds,
                status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, 'active', ?, ?)
            "#,
        )
        .bind(&new.name)
        .bind(&new.url)
        .bind(&user_agent)
        .bind(new.auto_update)
        .bind(interval)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        info!("Created subscription {} ({})", id, new.name);

        self.get_subscription(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("subscription {} vanished after insert", id))
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(subscription_from_row).transpose()
    }

    pub async fn list_subscriptions(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<(Vec<Subscription>, i64)> {
        let mut conditions = Vec::new();
        if filter.status.is_some() {
            conditions.push("status = ?");
        }
        if filter.auto_update.is_some() {
            conditions.push("auto_update = ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM subscriptions{}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(status) = filter.status {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(auto_update) = filter.auto_update {
            count_query = count_query.bind(auto_update);
        }
        let total = count_query.fetch_one(self.pool()).await?;

        let page = filter.page.max(1);
        let size = if filter.size > 0 { filter.size } else { 20 };
        let list_sql = format!(
            "SELECT * FROM subscriptions{} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut list_query = sqlx::query(&list_sql);
        if let Some(status) = filter.status {
            list_query = list_query.bind(status.as_str());
        }
        if let Some(auto_update) = filter.auto_update {
            list_query = list_query.bind(auto_update);
        }
        let rows = list_query
            .bind(size)
            .bind((page - 1) * size)
            .fetch_all(self.pool())
            .await?;

        let subscriptions = rows
            .iter()
            .map(subscription_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((subscriptions, total))
    }

    /// Delete a subscription; its nodes and logs cascade.
    pub async fn delete_subscription(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Subscriptions the refresh loop should consider this sweep.
    pub async fn subscriptions_due_for_refresh(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            "SELECT * FROM subscriptions WHERE auto_update = 1 AND status = 'active' ORDER BY id",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(subscription_from_row).collect()
    }

    /// Register a failed update attempt: bump the consecutive error counter
    /// and flip the subscription to `error` once it reaches the threshold.
    pub async fn record_update_failure(&self, id: i64, message: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE subscriptions SET
                error_count = error_count + 1,
                error_message = ?,
                last_update = ?,
                status = CASE WHEN error_count + 1 >= ? THEN 'error' ELSE status END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(message)
        .bind(now)
        .bind(SUBSCRIPTION_ERROR_THRESHOLD)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;

        debug!("Recorded update failure for subscription {}: {}", id, message);
        Ok(())
    }

    /// Register a successful update: reset the error counter, clear the
    /// error message, stamp timestamps, and store the fresh aggregates.
    pub async fn record_update_success(&self, id: i64, outcome: &ReconcileOutcome) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE subscriptions SET
                error_count = 0,
                error_message = NULL,
                last_update = ?,
                last_success = ?,
                total_nodes = ?,
                active_nodes = ?,
                unique_new_nodes = ?,
                status = CASE WHEN status = 'error' THEN 'active' ELSE status END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(outcome.total_nodes)
        .bind(outcome.active_nodes)
        .bind(outcome.global_new_nodes)
        .bind(now)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Append one audit row for an update attempt. Exactly one row is
    /// written per attempt regardless of outcome.
    pub async fn insert_subscription_log(&self, log: &NewSubscriptionLog) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscription_logs (
                subscription_id, update_type, success,
                total_fetched, valid_nodes, new_nodes, global_new_nodes,
                updated_nodes, removed_nodes,
                error_message, http_status, response_time_ms, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.subscription_id)
        .bind(&log.update_type)
        .bind(log.success)
        .bind(log.total_fetched)
        .bind(log.valid_nodes)
        .bind(log.new_nodes)
        .bind(log.global_new_nodes)
        .bind(log.updated_nodes)
        .bind(log.removed_nodes)
        .bind(&log.error_message)
        .bind(log.http_status)
        .bind(log.response_time_ms)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn list_subscription_logs(
        &self,
        subscription_id: i64,
        limit: i64,
    ) -> Result<Vec<SubscriptionLog>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM subscription_logs
            WHERE subscription_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(subscription_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                Ok(SubscriptionLog {
                    id: row.try_get("id")?,
                    subscription_id: row.try_get("subscription_id")?,
                    update_type: row.try_get("update_type")?,
                    success: row.try_get("success")?,
                    total_fetched: row.try_get("total_fetched")?,
                    valid_nodes: row.try_get("valid_nodes")?,
                    new_nodes: row.try_get("new_nodes")?,
                    global_new_nodes: row.try_get("global_new_nodes")?,
                    updated_nodes: row.try_get("updated_nodes")?,
                    removed_nodes: row.try_get("removed_nodes")?,
                    error_message: row.try_get("error_message")?,
                    http_status: row.try_get("http_status")?,
                    response_time_ms: row.try_get("response_time_ms")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    pub async fn delete_subscription_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM subscription_logs WHERE created_at < ?")
            .bind(cutoff)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
