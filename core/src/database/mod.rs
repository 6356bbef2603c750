//! Database layer for the node pool core.
//!
//! This module provides SQLite persistence for:
//! - Subscriptions and their append-only update logs
//! - Nodes (the deduplicated pool of proxy endpoints)
//! - Node test records
//! - Node pools with derived aggregate statistics
//!
//! The module is organized into submodules:
//! - `records` - All record types (entities)
//! - `subscriptions` - Subscription CRUD, state transitions, update logs
//! - `nodes` - Node queries and the reconcile transaction
//! - `node_tests` - Test record operations
//! - `pools` - Node pool CRUD and stats recomputation

mod nodes;
mod pools;
mod records;
mod subscriptions;

pub use node_tests::NewNodeTest;
pub use nodes::{PreparedNode, TestMeasurements};
pub use records::*;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::path::Path;
use tracing::{error, info};

pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Expose pool for integration test queries
    #[allow(dead_code)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Open (creating if needed) the database file at `database_path`.
    pub async fn new(database_path: &str) -> Result<Self> {
        info!("Initializing database at {}", database_path);

        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    error!("Failed to create database directory {:?}: {}", parent, e);
                    return Err(e.into());
                }
            }
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path);
        Self::connect(&database_url).await
    }

    /// Connect with an explicit SQLite URL. Tests use `sqlite::memory:`.
    ///
    /// The pool is capped at a single connection: SQLite serializes writers
    /// anyway, and in-memory databases are per-connection.
    pub async fn connect(database_url: &str) -> Result<Self> {
        // Cascading deletes rely on the foreign_keys pragma
        let options = SqliteConnectOptions::from_str(database_url)?.foreign_keys(true);
        let pool = match SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
        {
            Ok(pool) => pool,
            Err(e) => {
                error!("Failed to connect to database '{}': {}", database_url, e);
                return Err(e.into());
            }
        };

        let database = Self { pool };
        database.initialize_tables().await?;
        info!("Database initialized");
        Ok(database)
    }

    async fn initialize_tables(&self) -> Result<()> {
        let statements: &[(&str, &str)] = &[
            (
                "subscriptions",
                r#"
                CREATE TABLE IF NOT EXISTS subscriptions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    url TEXT NOT NULL,
                    user_agent TEXT NOT NULL DEFAULT 'clash',
                    auto_update BOOLEAN NOT NULL DEFAULT 1,
                    update_interval_seconds INTEGER NOT NULL DEFAULT 3600,
                    status TEXT NOT NULL DEFAULT 'active',
                    error_count INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT,
                    last_update DATETIME,
                    last_success DATETIME,
                    total_nodes INTEGER NOT NULL DEFAULT 0,
                    active_nodes INTEGER NOT NULL DEFAULT 0,
                    unique_new_nodes INTEGER NOT NULL DEFAULT 0,
                    created_at DATETIME NOT NULL,
                    updated_at DATETIME NOT NULL
                )
                "#,
            ),
            (
                "node_pools",
                r#"
                CREATE TABLE IF NOT EXISTS node_pools (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT,
                    enabled BOOLEAN NOT NULL DEFAULT 1,
                    total_nodes INTEGER NOT NULL DEFAULT 0,
                    active_nodes INTEGER NOT NULL DEFAULT 0,
                    survival_rate REAL NOT NULL DEFAULT 0.0,
                    created_at DATETIME NOT NULL,
                    updated_at DATETIME NOT NULL
                )
                "#,
            ),
            (
                "nodes",
                r#"
                CREATE TABLE IF NOT EXISTS nodes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    subscription_id INTEGER NOT NULL
                        REFERENCES subscriptions(id) ON DELETE CASCADE,
                    node_pool_id INTEGER
                        REFERENCES node_pools(id) ON DELETE SET NULL,
                    name TEXT NOT NULL,
                    hash TEXT NOT NULL,
                    server TEXT NOT NULL,
                    port INTEGER NOT NULL,
                    protocol TEXT NOT NULL,
                    config TEXT NOT NULL,
                    country TEXT,
                    delay_ms INTEGER,
                    upload_bps INTEGER,
                    download_bps INTEGER,
                    loss_rate REAL,
                    streaming_unlock TEXT,
                    status TEXT NOT NULL DEFAULT 'unknown',
                    last_test DATETIME,
                    last_online DATETIME,
                    continuous_failures INTEGER NOT NULL DEFAULT 0,
                    created_at DATETIME NOT NULL,
                    updated_at DATETIME NOT NULL,
                    UNIQUE(subscription_id, hash)
                )
                "#,
            ),
            (
                "node_tests",
                r#"
                CREATE TABLE IF NOT EXISTS node_tests (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    node_id INTEGER NOT NULL
                        REFERENCES nodes(id) ON DELETE CASCADE,
                    test_types TEXT NOT NULL,
                    test_config TEXT,
                    delay_ms INTEGER,
                    upload_bps INTEGER,
                    download_bps INTEGER,
                    loss_rate REAL,
                    streaming_results TEXT,
                    success BOOLEAN NOT NULL DEFAULT 0,
                    error_message TEXT,
                    tested_at DATETIME NOT NULL
                )
                "#,
            ),
            (
                "subscription_logs",
                r#"
                CREATE TABLE IF NOT EXISTS subscription_logs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    subscription_id INTEGER NOT NULL
                        REFERENCES subscriptions(id) ON DELETE CASCADE,
                    update_type TEXT NOT NULL,
                    success BOOLEAN NOT NULL DEFAULT 0,
                    total_fetched INTEGER NOT NULL DEFAULT 0,
                    valid_nodes INTEGER NOT NULL DEFAULT 0,
                    new_nodes INTEGER NOT NULL DEFAULT 0,
                    global_new_nodes INTEGER NOT NULL DEFAULT 0,
                    updated_nodes INTEGER NOT NULL DEFAULT 0,
                    removed_nodes INTEGER NOT NULL DEFAULT 0,
                    error_message TEXT,
                    http_status INTEGER,
                    response_time_ms INTEGER,
                    created_at DATETIME NOT NULL
                )
                "#,
            ),
        ];

        for (table, sql) in statements {
            if let Err(e) = sqlx::query(sql).execute(&self.pool).await {
                error!("Failed to create {} table: {}", table, e);
                return Err(e.into());
            }
        }

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_nodes_subscription ON nodes(subscription_id)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_hash ON nodes(hash)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status, last_test)",
            "CREATE INDEX IF NOT EXISTS idx_nodes_country ON nodes(country)",
            "CREATE INDEX IF NOT EXISTS idx_node_tests_node ON node_tests(node_id, tested_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_node_tests_tested_at ON node_tests(tested_at)",
            "CREATE INDEX IF NOT EXISTS idx_sub_logs_subscription ON subscription_logs(subscription_id, created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_sub_logs_created_at ON subscription_logs(created_at)",
        ];

        for sql in indexes {
            if let Err(e) = sqlx::query(sql).execute(&self.pool).await {
                error!("Failed to create index: {}", e);
                return Err(e.into());
            }
        }

        Ok(())
    }

    /// Storage-engine optimization pass, requested by the retention loop
    /// after bulk deletes.
    pub async fn optimize(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        info!("Database optimization completed");
        Ok(())
    }
}
