//! Background scheduler: three periodic loops (subscription refresh, node
//! testing, retention cleanup) sharing one shutdown signal.
//!
//! `start` spawns the loops and returns; `stop` flips the signal and joins
//! every loop before returning, so no work is left running after it
//! resolves. Batch-test completion watchers are detached short-lived tasks
//! with their own hard timeout and are not joined on stop.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::constants::retention::{NODE_TEST_RETENTION_DAYS, SUBSCRIPTION_LOG_RETENTION_DAYS};
use crate::constants::scheduler::{
    CLEANUP_INTERVAL, NODE_RETEST_AGE_HOURS, REFRESH_INTERVAL, SUBSCRIPTION_PACING,
    TEST_BATCH_LIMIT, TEST_INTERVAL, WATCH_POLL_INTERVAL, WATCH_TIMEOUT,
};
use crate::database::Database;
use crate::errors::CoreError;
use crate::sync::{SubscriptionSync, UpdateTrigger};
use crate::testing::{TestEngine, TestKind};

struct LoopSet {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

/// Snapshot of the scheduler's state with estimated next-run times.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub next_refresh: Option<DateTime<Utc>>,
    pub next_test: Option<DateTime<Utc>>,
    pub next_cleanup: Option<DateTime<Utc>>,
}

pub struct Scheduler {
    database: Arc<Database>,
    sync: Arc<SubscriptionSync>,
    test_engine: TestEngine,
    loops: Mutex<Option<LoopSet>>,
}

impl Scheduler {
    pub fn new(
        database: Arc<Database>,
        sync: Arc<SubscriptionSync>,
        test_engine: TestEngine,
    ) -> Self {
        Self {
            database,
            sync,
            test_engine,
            loops: Mutex::new(None),
        }
    }

    /// Spawn the three periodic loops. Fails if the scheduler is already
    /// running.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut loops = self.loops.lock().await;
        if loops.is_some() {
            return Err(CoreError::AlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handles = vec![
            self.spawn_refresh_loop(shutdown_rx.clone()),
            self.spawn_test_loop(shutdown_rx.clone()),
            self.spawn_cleanup_loop(shutdown_rx),
        ];

        *loops = Some(LoopSet {
            shutdown: shutdown_tx,
            handles,
            started_at: Utc::now(),
        });

        info!("Scheduler started");
        Ok(())
    }

    /// Signal shutdown and wait for every loop to exit. Fails if the
    /// scheduler is not running.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let set = {
            let mut loops = self.loops.lock().await;
            loops.take().ok_or(CoreError::NotRunning)?
        };

        let _ = set.shutdown.send(true);
        for result in join_all(set.handles).await {
            if let Err(e) = result {
                warn!("Scheduler loop exited abnormally: {}", e);
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.loops.lock().await.is_some()
    }

    pub async fn status(&self) -> SchedulerStatus {
        let loops = self.loops.lock().await;
        match loops.as_ref() {
            Some(set) => SchedulerStatus {
                running: true,
                started_at: Some(set.started_at),
                next_refresh: Some(next_tick(set.started_at, REFRESH_INTERVAL)),
                next_test: Some(next_tick(set.started_at, TEST_INTERVAL)),
                next_cleanup: Some(next_tick(set.started_at, CLEANUP_INTERVAL)),
            },
            None => SchedulerStatus {
                running: false,
                started_at: None,
                next_refresh: None,
                next_test: None,
                next_cleanup: None,
            },
        }
    }

    fn spawn_refresh_loop(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let database = self.database.clone();
        let sync = self.sync.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        refresh_due_subscriptions(&database, &sync, &mut shutdown).await;
                    }
                    _ = shutdown.changed() => {
                        info!("Subscription refresh loop exiting");
                        return;
                    }
                }
            }
        })
    }

    fn spawn_test_loop(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let database = self.database.clone();
        let engine = self.test_engine.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TEST_INTERVAL);
            // The first tick fires immediately; skip it so scheduled testing
            // only begins after one full interval.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        test_stale_nodes(&database, &engine).await;
                    }
                    _ = shutdown.changed() => {
                        info!("Node test loop exiting");
                        return;
                    }
                }
            }
        })
    }

    fn spawn_cleanup_loop(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let database = self.database.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_retention_pass(&database).await;
                    }
                    _ = shutdown.changed() => {
                        info!("Retention cleanup loop exiting");
                        return;
                    }
                }
            }
        })
    }
}

/// Estimate of the interval's next tick after `started_at`.
fn next_tick(started_at: DateTime<Utc>, interval: std::time::Duration) -> DateTime<Utc> {
    let interval = ChronoDuration::from_std(interval).unwrap_or(ChronoDuration::zero());
    if interval.is_zero() {
        return Utc::now();
    }
    let elapsed = Utc::now() - started_at;
    let completed = (elapsed.num_milliseconds() / interval.num_milliseconds()).max(0) + 1;
    started_at + interval * completed as i32
}

/// One refresh sweep: update every due subscription, pacing outbound
/// requests, and bail out early if shutdown is signalled mid-sweep.
async fn refresh_due_subscriptions(
    database: &Database,
    sync: &SubscriptionSync,
    shutdown: &mut watch::Receiver<bool>,
) {
    let subscriptions = match database.subscriptions_due_for_refresh().await {
        Ok(subscriptions) => subscriptions,
        Err(e) => {
            error!("Failed to list subscriptions for refresh: {}", e);
            return;
        }
    };

    let now = Utc::now();
    let due: Vec<_> = subscriptions
        .into_iter()
        .filter(|sub| match sub.last_update {
            None => true,
            Some(last) => now - last >= ChronoDuration::seconds(sub.update_interval_seconds),
        })
        .collect();

    if due.is_empty() {
        return;
    }
    info!("Refreshing {} due subscriptions", due.len());

    for (index, subscription) in due.iter().enumerate() {
        match sync.update(subscription.id, UpdateTrigger::Scheduled).await {
            Ok(result) => {
                info!(
                    "Refreshed subscription {} ({}): {} valid, {} new, {} removed in {}ms",
                    subscription.id,
                    subscription.name,
                    result.valid_nodes,
                    result.new_nodes,
                    result.removed_nodes,
                    result.duration_ms
                );
            }
            Err(e) => {
                error!(
                    "Scheduled update of subscription {} failed: {}",
                    subscription.id, e
                );
            }
        }

        if index + 1 < due.len() {
            tokio::select! {
                _ = tokio::time::sleep(SUBSCRIPTION_PACING) => {}
                _ = shutdown.changed() => return,
            }
        }
    }
}

/// One test sweep: pick up stale nodes, launch a batch run, and watch it
/// to completion from a detached task.
async fn test_stale_nodes(database: &Arc<Database>, engine: &TestEngine) {
    let nodes = match database
        .nodes_due_for_testing(NODE_RETEST_AGE_HOURS, TEST_BATCH_LIMIT)
        .await
    {
        Ok(nodes) => nodes,
        Err(e) => {
            error!("Failed to list nodes for testing: {}", e);
            return;
        }
    };

    if nodes.is_empty() {
        return;
    }

    let node_ids: Vec<i64> = nodes.iter().map(|n| n.id).collect();
    info!("Launching scheduled test batch over {} nodes", node_ids.len());

    let task_id = match engine
        .batch_test(node_ids, vec![TestKind::Delay, TestKind::Speed], None)
        .await
    {
        Ok(task_id) => task_id,
        Err(e) => {
            error!("Failed to launch scheduled test batch: {}", e);
            return;
        }
    };

    let engine = engine.clone();
    let database = database.clone();
    tokio::spawn(async move {
        watch_batch_completion(&database, &engine, &task_id).await;
    });
}

/// Poll the task until it reaches a terminal state or the watch timeout
/// elapses, then refresh pool aggregates.
async fn watch_batch_completion(database: &Database, engine: &TestEngine, task_id: &str) {
    let deadline = tokio::time::Instant::now() + WATCH_TIMEOUT;

    loop {
        tokio::time::sleep(WATCH_POLL_INTERVAL).await;

        match engine.status(task_id).await {
            Ok(task) if task.status.is_terminal() => {
                info!(
                    "Scheduled test batch {} finished ({}/{} nodes)",
                    task_id, task.progress, task.total
                );
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Lost track of scheduled test batch {}: {}", task_id, e);
                return;
            }
        }

        if tokio::time::Instant::now() >= deadline {
            warn!("Scheduled test batch {} did not finish in time", task_id);
            return;
        }
    }

    match database.refresh_all_node_pool_stats().await {
        Ok(refreshed) => info!("Refreshed statistics for {} node pools", refreshed),
        Err(e) => error!("Failed to refresh node pool statistics: {}", e),
    }
}

/// Delete expired test and log rows, then compact the database.
async fn run_retention_pass(database: &Database) {
    let now = Utc::now();

    match database
        .delete_node_tests_before(now - ChronoDuration::days(NODE_TEST_RETENTION_DAYS))
        .await
    {
        Ok(deleted) if deleted > 0 => info!("Deleted {} expired node test records", deleted),
        Ok(_) => {}
        Err(e) => error!("Failed to delete expired node tests: {}", e),
    }

    match database
        .delete_subscription_logs_before(now - ChronoDuration::days(SUBSCRIPTION_LOG_RETENTION_DAYS))
        .await
    {
        Ok(deleted) if deleted > 0 => info!("Deleted {} expired subscription logs", deleted),
        Ok(_) => {}
        Err(e) => error!("Failed to delete expired subscription logs: {}", e),
    }

    if let Err(e) = database.optimize().await {
        error!("Database optimization failed: {}", e);
    }
}
