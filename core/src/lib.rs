//! Proxy subscription and node pool manager core.
//!
//! Ingests remote subscription documents, deduplicates them into a pool of
//! addressable nodes, re-tests node health on a schedule, and scores nodes
//! for best-selection queries.

pub mod config;
pub mod constants;
pub mod database;
pub mod errors;
pub mod identity;
pub mod scheduler;
pub mod scoring;
pub mod sync;
pub mod testing;

// Re-export commonly used types
pub use config::Config;
pub use database::Database;
pub use errors::CoreError;
pub use identity::RawNodeConfig;
pub use scheduler::{Scheduler, SchedulerStatus};
pub use scoring::{ScoringEngine, SelectionFilter};
pub use sync::{SubscriptionSync, UpdateResult, UpdateTrigger};
pub use testing::{Prober, SimulatedProber, TestEngine, TestKind};
