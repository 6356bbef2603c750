//! Database record types (entities).
//!
//! This module contains all the record structs used by the database layer,
//! plus the small status enums stored as TEXT columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Status enums (TEXT columns)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Error,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "inactive" => SubscriptionStatus::Inactive,
            "error" => SubscriptionStatus::Error,
            _ => SubscriptionStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Unknown,
    Online,
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "online" => NodeStatus::Online,
            "offline" => NodeStatus::Offline,
            _ => NodeStatus::Unknown,
        }
    }
}

// ============================================================================
// Persistent entities
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_agent: String,
    pub auto_update: bool,
    pub update_interval_seconds: i64,
    pub status: SubscriptionStatus,
    pub error_count: i64,
    pub error_message: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub total_nodes: i64,
    pub active_nodes: i64,
    /// Nodes this subscription contributed that existed nowhere else at
    /// the time of its last successful update
    pub unique_new_nodes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a subscription; everything else defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscription {
    pub name: String,
    pub url: String,
    pub user_agent: Option<String>,
    pub auto_update: bool,
    pub update_interval_seconds: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub subscription_id: i64,
    pub node_pool_id: Option<i64>,
    pub name: String,
    /// Identity hash, immutable once the row is created
    pub hash: String,
    pub server: String,
    pub port: i64,
    pub protocol: String,
    /// Full configuration blob as JSON text
    pub config: String,
    pub country: Option<String>,
    pub delay_ms: Option<i64>,
    pub upload_bps: Option<i64>,
    pub download_bps: Option<i64>,
    pub loss_rate: Option<f64>,
    /// Streaming unlock map as JSON text
    pub streaming_unlock: Option<String>,
    pub status: NodeStatus,
    pub last_test: Option<DateTime<Utc>>,
    pub last_online: Option<DateTime<Utc>>,
    pub continuous_failures: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTest {
    pub id: i64,
    pub node_id: i64,
    /// Comma-joined test kinds that were requested
    pub test_types: String,
    pub test_config: Option<String>,
    pub delay_ms: Option<i64>,
    pub upload_bps: Option<i64>,
    pub download_bps: Option<i64>,
    pub loss_rate: Option<f64>,
    pub streaming_results: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub tested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionLog {
    pub id: i64,
    pub subscription_id: i64,
    /// `manual` or `scheduled`
    pub update_type: String,
    pub success: bool,
    pub total_fetched: i64,
    pub valid_nodes: i64,
    pub new_nodes: i64,
    pub global_new_nodes: i64,
    pub updated_nodes: i64,
    pub removed_nodes: i64,
    pub error_message: Option<String>,
    pub http_status: Option<i64>,
    pub response_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Log row under construction during one update attempt.
#[derive(Debug, Clone, Default)]
pub struct NewSubscriptionLog {
    pub subscription_id: i64,
    pub update_type: String,
    pub success: bool,
    pub total_fetched: i64,
    pub valid_nodes: i64,
    pub new_nodes: i64,
    pub global_new_nodes: i64,
    pub updated_nodes: i64,
    pub removed_nodes: i64,
    pub error_message: Option<String>,
    pub http_status: Option<i64>,
    pub response_time_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePool {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub total_nodes: i64,
    pub active_nodes: i64,
    /// Percentage of nodes currently online within the pool
    pub survival_rate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Query helper types
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub status: Option<SubscriptionStatus>,
    pub auto_update: Option<bool>,
    pub page: i64,
    pub size: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub subscription_id: Option<i64>,
    pub node_pool_id: Option<i64>,
    pub country: Option<String>,
    pub protocol: Option<String>,
    pub status: Option<NodeStatus>,
    pub page: i64,
    pub size: i64,
}

/// Counts produced by one reconcile pass over a subscription's fetch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub total_fetched: i64,
    pub valid_nodes: i64,
    pub new_nodes: i64,
    pub global_new_nodes: i64,
    pub updated_nodes: i64,
    pub removed_nodes: i64,
    pub total_nodes: i64,
    pub active_nodes: i64,
}
