//! Node test engine: synchronous single-node tests, asynchronous batch
//! runs, and the in-memory task registry.
//!
//! Batch runs iterate their node list sequentially to bound outbound
//! connection pressure; one read/write lock guards the whole registry,
//! written by exactly one worker per task and read by any number of
//! status callers.

mod prober;

pub use prober::{Prober, SimulatedProber};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants::testing::{
    DELAY_FAILURE_THRESHOLD_MS, INTER_NODE_PAUSE_MAX_MS, INTER_NODE_PAUSE_MIN_MS,
    MAX_TRACKED_TASKS,
};
use crate::database::{Database, NewNodeTest, TestMeasurements};
use crate::errors::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Delay,
    Speed,
    Streaming,
}

impl TestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestKind::Delay => "delay",
            TestKind::Speed => "speed",
            TestKind::Streaming => "streaming",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delay" => Some(TestKind::Delay),
            "speed" => Some(TestKind::Speed),
            "streaming" => Some(TestKind::Streaming),
            _ => None,
        }
    }
}

pub fn join_kinds(kinds: &[TestKind]) -> String {
    kinds
        .iter()
        .map(TestKind::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// Result of testing one node, either standalone or within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub node_id: i64,
    pub success: bool,
    pub error: Option<String>,
    pub delay_ms: Option<i64>,
    pub upload_bps: Option<i64>,
    pub download_bps: Option<i64>,
    pub loss_rate: Option<f64>,
}

/// One in-flight or finished batch test run. In-memory only; retention is
/// bounded by evicting the oldest finished tasks once the registry is full.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestTask {
    pub id: String,
    pub node_ids: Vec<i64>,
    pub test_kinds: Vec<TestKind>,
    pub status: TaskStatus,
    pub progress: usize,
    pub total: usize,
    pub results: Vec<TestOutcome>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct TestEngine {
    database: Arc<Database>,
    prober: Arc<dyn Prober>,
    tasks: Arc<RwLock<HashMap<String, TestTask>>>,
}

impl TestEngine {
    pub fn new(database: Arc<Database>, prober: Arc<dyn Prober>) -> Self {
        Self {
            database,
            prober,
            tasks: Arc::new(RwLock::new(HashMap::with_capacity(MAX_TRACKED_TASKS))),
        }
    }

    /// Test one node synchronously: run the requested probes, persist a
    /// test record, and update the node's live status.
    pub async fn test_one(
        &self,
        node_id: i64,
        kinds: &[TestKind],
        config: Option<&Value>,
    ) -> Result<TestOutcome, CoreError> {
        let node = self
            .database
            .get_node(node_id)
            .await?
            .ok_or(CoreError::NodeNotFound { id: node_id })?;

        let (measurements, success, error) = self.run_probes(&node, kinds).await;

        let record = NewNodeTest {
            node_id,
            test_types: join_kinds(kinds),
            test_config: config.map(Value::to_string),
            delay_ms: measurements.delay_ms,
            upload_bps: measurements.upload_bps,
            download_bps: measurements.download_bps,
            loss_rate: measurements.loss_rate,
            streaming_results: measurements.streaming_unlock.clone(),
            success,
            error_message: error.clone(),
        };
        self.database.insert_node_test(&record).await?;
        self.database
            .apply_test_result(node_id, success, &measurements)
            .await?;

        debug!(
            "Tested node {} ({}): success={} delay={:?}",
            node_id, node.name, success, measurements.delay_ms
        );

        Ok(TestOutcome {
            node_id,
            success,
            error,
            delay_ms: measurements.delay_ms,
            upload_bps: measurements.upload_bps,
            download_bps: measurements.download_bps,
            loss_rate: measurements.loss_rate,
        })
    }

    /// Start an asynchronous batch run over the given nodes and return the
    /// new task's identifier immediately. The worker processes nodes
    /// sequentially with a randomized inter-node pause.
    pub async fn batch_test(
        &self,
        node_ids: Vec<i64>,
        kinds: Vec<TestKind>,
        config: Option<Value>,
    ) -> Result<String, CoreError> {
        let task_id = Uuid::new_v4().to_string();
        let task = TestTask {
            id: task_id.clone(),
            total: node_ids.len(),
            node_ids,
            test_kinds: kinds,
            status: TaskStatus::Running,
            progress: 0,
            results: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        };

        {
            let mut tasks = self.tasks.write().await;
            if tasks.len() >= MAX_TRACKED_TASKS {
                evict_finished(&mut tasks);
            }
            tasks.insert(task_id.clone(), task);
        }

        info!("Started batch test task {}", task_id);

        let engine = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            // The worker body runs in its own task so a panic is observed
            // through the JoinHandle and marks the task failed instead of
            // leaving it stuck at running.
            let worker = tokio::spawn({
                let engine = engine.clone();
                let id = id.clone();
                async move { engine.run_batch(&id, config.as_ref()).await }
            });

            match worker.await {
                Ok(Ok(())) => engine.finalize_task(&id, None).await,
                Ok(Err(e)) => {
                    error!("Batch test task {} failed: {}", id, e);
                    engine.finalize_task(&id, Some(e.to_string())).await;
                }
                Err(join_err) => {
                    let reason = if join_err.is_panic() {
                        "batch worker panicked".to_string()
                    } else {
                        join_err.to_string()
                    };
                    error!("Batch test task {} aborted: {}", id, reason);
                    engine.finalize_task(&id, Some(reason)).await;
                }
            }
        });

        Ok(task_id)
    }

    /// Snapshot of a tracked task.
    pub async fn status(&self, task_id: &str) -> Result<TestTask, CoreError> {
        let tasks = self.tasks.read().await;
        tasks.get(task_id).cloned().ok_or(CoreError::TaskNotFound {
            task_id: task_id.to_string(),
        })
    }

    async fn run_batch(&self, task_id: &str, config: Option<&Value>) -> Result<(), CoreError> {
        let (node_ids, kinds) = {
            let tasks = self.tasks.read().await;
            let task = tasks.get(task_id).ok_or(CoreError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
            (task.node_ids.clone(), task.test_kinds.clone())
        };

        for (index, node_id) in node_ids.iter().enumerate() {
            let outcome = match self.test_one(*node_id, &kinds, config).await {
                Ok(outcome) => outcome,
                // Per-node failures never abort the batch
                Err(e) => TestOutcome {
                    node_id: *node_id,
                    success: false,
                    error: Some(e.to_string()),
                    delay_ms: None,
                    upload_bps: None,
                    download_bps: None,
                    loss_rate: None,
                },
            };

            {
                let mut tasks = self.tasks.write().await;
                if let Some(task) = tasks.get_mut(task_id) {
                    task.results.push(outcome);
                    task.progress = index + 1;
                }
            }

            if index + 1 < node_ids.len() {
                let pause_ms = {
                    let mut rng = rand::thread_rng();
                    rng.gen_range(INTER_NODE_PAUSE_MIN_MS..INTER_NODE_PAUSE_MAX_MS)
                };
                tokio::time::sleep(Duration::from_millis(pause_ms)).await;
            }
        }

        Ok(())
    }

    async fn finalize_task(&self, task_id: &str, error: Option<String>) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(task_id) {
            task.completed_at = Some(Utc::now());
            match error {
                Some(reason) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(reason);
                }
                None => {
                    if task.status == TaskStatus::Running {
                        task.status = TaskStatus::Completed;
                    }
                    info!(
                        "Batch test task {} completed: {}/{} successful",
                        task_id,
                        task.results.iter().filter(|r| r.success).count(),
                        task.results.len()
                    );
                }
            }
        }
    }

    async fn run_probes(
        &self,
        node: &crate::database::Node,
        kinds: &[TestKind],
    ) -> (TestMeasurements, bool, Option<String>) {
        let mut measurements = TestMeasurements::default();
        let mut success = true;
        let mut error = None;

        for kind in kinds {
            match kind {
                TestKind::Delay => match self.prober.measure_delay(node).await {
                    Ok(delay) => {
                        measurements.delay_ms = Some(delay);
                        // Data was obtained, but a slow node is still a failure
                        if delay > DELAY_FAILURE_THRESHOLD_MS {
                            success = false;
                            error = Some("High delay".to_string());
                        }
                    }
                    Err(e) => {
                        success = false;
                        error = Some(e.to_string());
                    }
                },
                TestKind::Speed => match self.prober.measure_speed(node).await {
                    Ok((upload, download)) => {
                        measurements.upload_bps = Some(upload);
                        measurements.download_bps = Some(download);
                        if upload == 0 || download == 0 {
                            success = false;
                            error = Some("Speed test failed".to_string());
                        }
                        if let Ok(loss) = self.prober.measure_loss(node).await {
                            measurements.loss_rate = Some(loss);
                        }
                    }
                    Err(e) => {
                        success = false;
                        error = Some(e.to_string());
                    }
                },
                TestKind::Streaming => match self.prober.check_streaming(node).await {
                    Ok(results) => {
                        measurements.streaming_unlock = Some(results.to_string());
                    }
                    Err(e) => {
                        warn!("Streaming check failed for node {}: {}", node.id, e);
                    }
                },
            }
        }

        (measurements, success, error)
    }
}

/// Drop the oldest finished tasks to make room; running tasks are never
/// evicted.
fn evict_finished(tasks: &mut HashMap<String, TestTask>) {
    let mut finished: Vec<(String, DateTime<Utc>)> = tasks
        .iter()
        .filter(|(_, task)| task.status.is_terminal())
        .map(|(id, task)| (id.clone(), task.started_at))
        .collect();
    finished.sort_by_key(|(_, started_at)| *started_at);

    let excess = (tasks.len() + 1).saturating_sub(MAX_TRACKED_TASKS);
    for (id, _) in finished.into_iter().take(excess) {
        debug!("Evicting finished test task {}", id);
        tasks.remove(&id);
    }
}
