//! Custom error types for the node pool core
//!
//! Per-node and per-subscription failures are recorded and isolated by the
//! callers; only lookup misses and scheduler state-machine misuse surface
//! as hard errors to the API layer.

use std::fmt;

/// Main error type for the node pool core
#[derive(Debug)]
pub enum CoreError {
    /// Network or HTTP failure while fetching a subscription document
    Fetch {
        url: String,
        status: Option<u16>,
        reason: String,
    },

    /// No valid proxy entries recoverable from a fetched document
    Parse { reason: String },

    /// A single malformed node entry (missing/invalid server, port, protocol)
    InvalidConfig { field: String, reason: String },

    /// Unknown batch test task ID
    TaskNotFound { task_id: String },

    /// Unknown node ID
    NodeNotFound { id: i64 },

    /// Unknown subscription ID
    SubscriptionNotFound { id: i64 },

    /// Scheduler started while already running
    AlreadyRunning,

    /// Scheduler stopped while not running
    NotRunning,

    /// Database operation failure
    Database { reason: String },

    /// Other errors with context
    Other(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Fetch {
                url,
                status,
                reason,
            } => match status {
                Some(code) => write!(f, "Failed to fetch '{}' (HTTP {}): {}", url, code, reason),
                None => write!(f, "Failed to fetch '{}': {}", url, reason),
            },
            CoreError::Parse { reason } => {
                write!(f, "Failed to parse subscription content: {}", reason)
            }
            CoreError::InvalidConfig { field, reason } => {
                write!(f, "Invalid node config field '{}': {}", field, reason)
            }
            CoreError::TaskNotFound { task_id } => {
                write!(f, "Test task '{}' not found", task_id)
            }
            CoreError::NodeNotFound { id } => write!(f, "Node {} not found", id),
            CoreError::SubscriptionNotFound { id } => {
                write!(f, "Subscription {} not found", id)
            }
            CoreError::AlreadyRunning => write!(f, "Scheduler already running"),
            CoreError::NotRunning => write!(f, "Scheduler not running"),
            CoreError::Database { reason } => write!(f, "Database error: {}", reason),
            CoreError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            reason: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Other(err.to_string())
    }
}
