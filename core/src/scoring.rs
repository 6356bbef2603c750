//! Weighted node scoring and best-node selection.
//!
//! The composite score is a fixed-weight sum of four sub-scores, each on a
//! 0-100 scale. Candidates are fetched already filtered to online nodes;
//! scoring then ranks them and returns the requested top slice with the
//! per-factor breakdown attached.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::constants::scoring::{
    DELAY_EXCELLENT_MS, DELAY_FAIR_MS, DELAY_GOOD_MS, DELAY_WEIGHT, DOWNLOAD_EXCELLENT_MBPS,
    DOWNLOAD_GOOD_MBPS, SPEED_WEIGHT, STABILITY_WEIGHT, STREAMING_WEIGHT, UPLOAD_EXCELLENT_MBPS,
    UPLOAD_GOOD_MBPS,
};
use crate::database::{Database, Node};
use crate::errors::CoreError;

const BPS_PER_MBPS: i64 = 1_048_576;

/// Filters applied to the candidate set before scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionFilter {
    pub node_pool_id: Option<i64>,
    pub country: Option<String>,
    pub protocol: Option<String>,
    /// Streaming services the caller cares about; drives the streaming
    /// sub-score.
    pub streaming_services: Vec<String>,
}

/// A ranked node together with its per-factor score breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredNode {
    pub node: Node,
    pub score: f64,
    pub delay_score: f64,
    pub speed_score: f64,
    pub stability_score: f64,
    pub streaming_score: f64,
}

#[derive(Clone)]
pub struct ScoringEngine {
    database: Arc<Database>,
}

impl ScoringEngine {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Select the top `count` online nodes matching the filter, ranked by
    /// composite score.
    pub async fn select_best(
        &self,
        filter: &SelectionFilter,
        count: usize,
    ) -> Result<Vec<ScoredNode>, CoreError> {
        let candidates = self
            .database
            .online_candidates(
                filter.node_pool_id,
                filter.country.as_deref(),
                filter.protocol.as_deref(),
            )
            .await?;

        debug!(
            "Scoring {} candidate nodes (requested {})",
            candidates.len(),
            count
        );

        let mut scored: Vec<ScoredNode> = candidates
            .into_iter()
            .map(|node| score_node(node, &filter.streaming_services))
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(count);

        Ok(scored)
    }
}

fn score_node(node: Node, streaming_services: &[String]) -> ScoredNode {
    let delay_score = delay_score(node.delay_ms);
    let speed_score = speed_score(node.upload_bps, node.download_bps);
    let stability_score = stability_score(node.continuous_failures);
    let streaming_score = streaming_score(node.streaming_unlock.as_deref(), streaming_services);

    let score = DELAY_WEIGHT * delay_score
        + SPEED_WEIGHT * speed_score
        + STABILITY_WEIGHT * stability_score
        + STREAMING_WEIGHT * streaming_score;

    ScoredNode {
        node,
        score,
        delay_score,
        speed_score,
        stability_score,
        streaming_score,
    }
}

/// Untested nodes score optimistically so fresh nodes get a chance to be
/// selected.
fn delay_score(delay_ms: Option<i64>) -> f64 {
    match delay_ms {
        None => 100.0,
        Some(d) if d <= DELAY_EXCELLENT_MS => 100.0,
        Some(d) if d <= DELAY_GOOD_MS => 80.0,
        Some(d) if d <= DELAY_FAIR_MS => 60.0,
        Some(_) => 20.0,
    }
}

fn speed_score(upload_bps: Option<i64>, download_bps: Option<i64>) -> f64 {
    match (upload_bps, download_bps) {
        (Some(up), Some(down))
            if up > UPLOAD_EXCELLENT_MBPS * BPS_PER_MBPS
                && down > DOWNLOAD_EXCELLENT_MBPS * BPS_PER_MBPS =>
        {
            100.0
        }
        (Some(up), Some(down))
            if up > UPLOAD_GOOD_MBPS * BPS_PER_MBPS && down > DOWNLOAD_GOOD_MBPS * BPS_PER_MBPS =>
        {
            90.0
        }
        _ => 80.0,
    }
}

fn stability_score(continuous_failures: i64) -> f64 {
    (100 - 10 * continuous_failures).max(0) as f64
}

/// Fraction of the requested services that are unlocked, on a 0-100 scale.
/// Neutral 50 when nothing was requested or the node has no unlock data.
fn streaming_score(streaming_unlock: Option<&str>, services: &[String]) -> f64 {
    if services.is_empty() {
        return 50.0;
    }
    let unlock: Value = match streaming_unlock.and_then(|raw| serde_json::from_str(raw).ok()) {
        Some(value) => value,
        None => return 50.0,
    };

    let available = services
        .iter()
        .filter(|service| {
            unlock
                .get(service.as_str())
                .and_then(|entry| entry.get("available"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        })
        .count();

    available as f64 / services.len() as f64 * 100.0
}
