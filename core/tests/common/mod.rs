//! Shared test utilities:
//! - In-memory test databases with seed helpers
//! - A mock subscription HTTP server
//! - Canned subscription documents

pub mod fixtures;
