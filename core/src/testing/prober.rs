//! Probe seam for node measurements.
//!
//! Real network probing lives behind the `Prober` trait; the default
//! implementation simulates measurements with randomized values so the rest
//! of the pipeline (persistence, status transitions, scoring) is exercised
//! end to end without a forwarding engine.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};

use crate::database::Node;
use crate::errors::CoreError;

#[async_trait]
pub trait Prober: Send + Sync {
    /// Round-trip delay in milliseconds.
    async fn measure_delay(&self, node: &Node) -> Result<i64, CoreError>;

    /// Upload and download throughput in bits per second.
    async fn measure_speed(&self, node: &Node) -> Result<(i64, i64), CoreError>;

    /// Packet loss rate as a percentage.
    async fn measure_loss(&self, node: &Node) -> Result<f64, CoreError>;

    /// Per-service streaming unlock map.
    async fn check_streaming(&self, node: &Node) -> Result<Value, CoreError>;
}

const STREAMING_SERVICES: &[&str] = &[
    "netflix",
    "youtube",
    "disney_plus",
    "hulu",
    "amazon_prime",
    "chatgpt",
];

/// Randomized stand-in measurements, biased by node geography.
#[derive(Debug, Clone, Default)]
pub struct SimulatedProber;

impl SimulatedProber {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for SimulatedProber {
    async fn measure_delay(&self, node: &Node) -> Result<i64, CoreError> {
        let mut rng = rand::thread_rng();
        let base = 50 + rng.gen_range(0..200);
        let regional = match node.country.as_deref() {
            Some("HK") => rng.gen_range(0..50),
            Some("US") => 100 + rng.gen_range(0..100),
            Some("JP") => 30 + rng.gen_range(0..70),
            _ => rng.gen_range(0..150),
        };
        Ok(base + regional)
    }

    async fn measure_speed(&self, _node: &Node) -> Result<(i64, i64), CoreError> {
        let mut rng = rand::thread_rng();
        let upload = 1_048_576 * (10 + rng.gen_range(0..90));
        let download = 1_048_576 * (20 + rng.gen_range(0..180));
        Ok((upload, download))
    }

    async fn measure_loss(&self, _node: &Node) -> Result<f64, CoreError> {
        let mut rng = rand::thread_rng();
        Ok(rng.gen_range(0.0..5.0))
    }

    async fn check_streaming(&self, node: &Node) -> Result<Value, CoreError> {
        let mut rng = rand::thread_rng();
        let mut results = serde_json::Map::new();

        for service in STREAMING_SERVICES {
            let available = rng.gen::<f32>() > 0.3;
            let mut entry = json!({
                "available": available,
                "tested_at": Utc::now(),
            });
            if available && *service != "chatgpt" {
                if let Some(country) = &node.country {
                    entry["region"] = Value::String(country.clone());
                }
            }
            results.insert((*service).to_string(), entry);
        }

        Ok(Value::Object(results))
    }
}
