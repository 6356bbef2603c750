//! Application-wide constants for timeouts, intervals, and limits
//!
//! This module organizes constants by category to provide a single source
//! of truth for the values the scheduler, sync pipeline, and test engine
//! agree on.

#![allow(dead_code)] // Some constants are defined for future use

use std::time::Duration;

/// HTTP client constants for subscription fetching
pub mod http {
    use super::Duration;

    /// Timeout for one subscription document fetch
    pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

    /// Timeout for establishing HTTP connections
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Scheduler loop intervals and pacing
pub mod scheduler {
    use super::Duration;

    /// Interval between subscription refresh sweeps
    pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

    /// Interval between node test sweeps
    pub const TEST_INTERVAL: Duration = Duration::from_secs(30 * 60);

    /// Interval between retention cleanup passes
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

    /// Pacing delay between consecutive subscription updates in one sweep,
    /// bounds the outbound request rate
    pub const SUBSCRIPTION_PACING: Duration = Duration::from_secs(2);

    /// Maximum nodes picked up by one scheduled test sweep
    pub const TEST_BATCH_LIMIT: i64 = 50;

    /// A node is due for re-testing once its last test is older than this
    pub const NODE_RETEST_AGE_HOURS: i64 = 2;

    /// Poll interval for the batch-test completion watcher
    pub const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(10);

    /// Hard ceiling for the completion watcher, independent of task progress
    pub const WATCH_TIMEOUT: Duration = Duration::from_secs(30 * 60);
}

/// Node testing constants
pub mod testing {
    /// A measured delay above this is treated as a test failure
    pub const DELAY_FAILURE_THRESHOLD_MS: i64 = 1000;

    /// Consecutive fetch failures before a subscription is marked `error`
    pub const SUBSCRIPTION_ERROR_THRESHOLD: i64 = 5;

    /// Upper bound on tracked in-memory test tasks; oldest finished tasks
    /// are evicted once the registry is full
    pub const MAX_TRACKED_TASKS: usize = 64;

    /// Randomized pause between nodes in a batch run (milliseconds)
    pub const INTER_NODE_PAUSE_MIN_MS: u64 = 100;
    pub const INTER_NODE_PAUSE_MAX_MS: u64 = 1000;
}

/// Data retention windows
pub mod retention {
    /// Node test rows older than this are deleted
    pub const NODE_TEST_RETENTION_DAYS: i64 = 7;

    /// Subscription log rows older than this are deleted
    pub const SUBSCRIPTION_LOG_RETENTION_DAYS: i64 = 30;
}

/// Scoring weights and breakpoints (fixed, not configurable)
pub mod scoring {
    pub const DELAY_WEIGHT: f64 = 0.4;
    pub const SPEED_WEIGHT: f64 = 0.3;
    pub const STABILITY_WEIGHT: f64 = 0.2;
    pub const STREAMING_WEIGHT: f64 = 0.1;

    /// Delay breakpoints in milliseconds
    pub const DELAY_EXCELLENT_MS: i64 = 100;
    pub const DELAY_GOOD_MS: i64 = 200;
    pub const DELAY_FAIR_MS: i64 = 500;

    /// Speed breakpoints in Mbps
    pub const UPLOAD_EXCELLENT_MBPS: i64 = 50;
    pub const DOWNLOAD_EXCELLENT_MBPS: i64 = 100;
    pub const UPLOAD_GOOD_MBPS: i64 = 20;
    pub const DOWNLOAD_GOOD_MBPS: i64 = 50;
}

/// Default configuration values
pub mod defaults {
    /// Default subscription update interval in seconds
    pub const UPDATE_INTERVAL_SECONDS: i64 = 3600;

    /// Default User-Agent sent with subscription fetches
    pub const USER_AGENT: &str = "clash";

    /// Default SQLite database path
    pub const DATABASE_PATH: &str = "data/nodepool.db";
}
