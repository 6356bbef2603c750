//! Node pool CRUD and aggregate statistics.
//!
//! Pool statistics are always recomputed from the nodes table on demand,
//! never maintained incrementally.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

use super::records::NodePool;
use super::Database;

fn pool_from_row(row: &SqliteRow) -> Result<NodePool> {
    Ok(NodePool {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        enabled: row.try_get("enabled")?,
        total_nodes: row.try_get("total_nodes")?,
        active_nodes: row.try_get("active_nodes")?,
        survival_rate: row.try_get("survival_rate")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl Database {
    pub async fn create_node_pool(&self, name: &str, description: Option<&str>) -> Result<NodePool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO node_pools (name, description, enabled, created_at, updated_at)
            VALUES (?, ?, 1, ?, ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        let id = result.last_insert_rowid();
        self.get_node_pool(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("node pool {} vanished after insert", id))
    }

    pub async fn get_node_pool(&self, id: i64) -> Result<Option<NodePool>> {
        let row = sqlx::query("SELECT * FROM node_pools WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(pool_from_row).transpose()
    }

    pub async fn list_node_pools(&self) -> Result<Vec<NodePool>> {
        let rows = sqlx::query("SELECT * FROM node_pools ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(pool_from_row).collect()
    }

    pub async fn assign_node_to_pool(&self, node_id: i64, pool_id: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE nodes SET node_pool_id = ?, updated_at = ? WHERE id = ?")
            .bind(pool_id)
            .bind(Utc::now())
            .bind(node_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Recompute one pool's totals and survival rate from its nodes.
    pub async fn refresh_node_pool_stats(&self, pool_id: i64) -> Result<NodePool> {
        let (total, active): (i64, i64) = {
            let row = sqlx::query(
                r#"
                SELECT COUNT(*) AS total,
                       COUNT(CASE WHEN status = 'online' THEN 1 END) AS active
                FROM nodes WHERE node_pool_id = ?
                "#,
            )
            .bind(pool_id)
            .fetch_one(self.pool())
            .await?;
            (row.try_get("total")?, row.try_get("active")?)
        };

        let survival_rate = if total > 0 {
            active as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        sqlx::query(
            r#"
            UPDATE node_pools
            SET total_nodes = ?, active_nodes = ?, survival_rate = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total)
        .bind(active)
        .bind(survival_rate)
        .bind(Utc::now())
        .bind(pool_id)
        .execute(self.pool())
        .await?;

        self.get_node_pool(pool_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("node pool {} not found", pool_id))
    }

    /// Recompute statistics for every pool; returns how many were updated.
    pub async fn refresh_all_node_pool_stats(&self) -> Result<usize> {
        let pools = self.list_node_pools().await?;
        let mut refreshed = 0;
        for pool in &pools {
            self.refresh_node_pool_stats(pool.id).await?;
            refreshed += 1;
        }
        debug!("Refreshed stats for {} node pools", refreshed);
        Ok(refreshed)
    }
}
