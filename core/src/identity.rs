//! Node identity hashing and validation.
//!
//! The identity hash is a function of exactly `(server, port, protocol)`.
//! Display names, credentials, and transport options are excluded so that
//! renaming or re-keying a node never creates a duplicate.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::CoreError;

/// One parsed, not-yet-validated proxy entry from a subscription document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNodeConfig {
    pub name: String,
    pub server: String,
    pub port: u16,
    pub protocol: String,
    /// Full protocol-specific configuration blob, stored verbatim
    pub config: Value,
}

impl RawNodeConfig {
    /// Reject entries with a missing or malformed identity triple.
    /// Such entries are skipped and counted, never defaulted.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.server.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                field: "server".to_string(),
                reason: "empty server address".to_string(),
            });
        }
        if self.port == 0 {
            return Err(CoreError::InvalidConfig {
                field: "port".to_string(),
                reason: "port must be within 1-65535".to_string(),
            });
        }
        if self.protocol.trim().is_empty() {
            return Err(CoreError::InvalidConfig {
                field: "protocol".to_string(),
                reason: "empty protocol".to_string(),
            });
        }
        Ok(())
    }

    /// Deterministic deduplication key: SHA-256 of `server:port:protocol`
    /// as lowercase hex. 64 characters, stable across field ordering and
    /// any non-identity field changes.
    pub fn identity_hash(&self) -> String {
        identity_hash(&self.server, self.port, &self.protocol)
    }
}

pub fn identity_hash(server: &str, port: u16, protocol: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}:{}", server, port, protocol).as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
