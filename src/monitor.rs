//! Task Monitor (C6): two independent sweep loops over the task store,
//! spawned with `tokio::spawn` and driven by a `broadcast::Receiver<()>`
//! shutdown signal, the same shape as the host's background workers
//! (`services/init.rs::spawn_background_workers`) rather than cron —
//! the sweeps are fixed-interval, not calendar-scheduled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::broker::{BrokerAdapter, PublishOptions};
use crate::config::TaskMonitorConfig;
use crate::db::models::TaskStatus;
use crate::db::repository::TaskRepository;
use crate::error::AppResult;
use crate::messages::{JobType, TaskMessage, TaskMetadata};
use crate::producers::Component;

const RETRY_COOLDOWN: chrono::Duration = chrono::Duration::minutes(30);
const TASK_TIMEOUT_HOURS: i64 = 4;

pub struct TaskMonitor {
    pool: SqlitePool,
    broker: Arc<BrokerAdapter>,
    config: TaskMonitorConfig,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    healthy: Arc<AtomicBool>,
}

impl TaskMonitor {
    pub fn new(pool: SqlitePool, broker: Arc<BrokerAdapter>, config: TaskMonitorConfig) -> Self {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(4);
        Self {
            pool,
            broker,
            config,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Timeout sweep: `FindTimedOut(4h)`, transitioned `running->failed` in
    /// one `BatchUpdateStatus` call with a well-known error message (spec
    /// §4.1 C1, §4.6, §7) instead of one round-trip per task.
    async fn sweep_timeouts(pool: &SqlitePool, healthy: &AtomicBool) {
        let tasks = match TaskRepository::find_timed_out(pool, TASK_TIMEOUT_HOURS).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!("timeout sweep: find_timed_out failed: {:?}", e);
                healthy.store(false, Ordering::Relaxed);
                return;
            }
        };

        if tasks.is_empty() {
            return;
        }

        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        match TaskRepository::batch_update_status(
            pool,
            &ids,
            TaskStatus::Failed,
            Some("Task execution timeout"),
        )
        .await
        {
            Ok(updated) => tracing::warn!(
                "timeout sweep: failed {} task(s) after {}h: {:?}",
                updated,
                TASK_TIMEOUT_HOURS,
                ids
            ),
            Err(e) => {
                tracing::error!("timeout sweep: batch_update_status failed: {:?}", e);
                healthy.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Retry sweep: `FindRetryable(3)`, filtered to tasks whose cooldown
    /// (30 min from `completedAt`) has elapsed, reset and republished with
    /// `retryCount` incremented (spec §4.6, §9 item 5).
    async fn sweep_retries(
        pool: &SqlitePool,
        broker: &BrokerAdapter,
        max_retries: i64,
        healthy: &AtomicBool,
    ) {
        let tasks = match TaskRepository::find_retryable(pool, max_retries).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!("retry sweep: find_retryable failed: {:?}", e);
                healthy.store(false, Ordering::Relaxed);
                return;
            }
        };

        let now = Utc::now().naive_utc();
        for task in tasks {
            let Some(completed_at) = task.completed_at else {
                continue;
            };
            if now - completed_at < RETRY_COOLDOWN {
                continue;
            }

            let Some(job_type) = JobType::from_str(&task.job_type) else {
                tracing::error!("retry sweep: unknown job_type {} on task {}", task.job_type, task.id);
                continue;
            };

            let previous_error = task.error_message.clone();
            let reset = match TaskRepository::reset_for_retry(pool, task.id).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!("retry sweep: failed to reset task {}: {:?}", task.id, e);
                    healthy.store(false, Ordering::Relaxed);
                    continue;
                }
            };

            let message = TaskMessage {
                task_id: reset.id,
                job_type: reset.job_type.clone(),
                source_table: reset.source_table.clone(),
                archive_table: reset.archive_table.clone(),
                batch_id: reset.batch_id.clone(),
                date_range_start: chrono::DateTime::from_naive_utc_and_offset(
                    reset.date_range_start,
                    Utc,
                ),
                date_range_end: chrono::DateTime::from_naive_utc_and_offset(reset.date_range_end, Utc),
                priority: job_type.default_priority(),
                batch_size: 1000,
                retry_count: reset.retry_count as u32,
                max_retries: max_retries as u32,
                metadata: TaskMetadata {
                    estimated_records: None,
                    is_retry: true,
                    original_failure_reason: previous_error,
                },
            };

            match broker
                .publish(
                    job_type.routing_key(),
                    &message,
                    PublishOptions {
                        priority: job_type.default_priority(),
                        persistent: true,
                        message_id: reset.id.to_string(),
                        message_type: "archive_task".to_string(),
                        retry_count: reset.retry_count as u32,
                        max_retries: max_retries as u32,
                        ..Default::default()
                    },
                )
                .await
            {
                Ok(true) => tracing::info!(
                    "retry sweep: republished task {} (retryCount={})",
                    reset.id,
                    reset.retry_count
                ),
                Ok(false) => tracing::warn!(
                    "retry sweep: publish returned false (back-pressure) for task {}",
                    reset.id
                ),
                Err(e) => {
                    tracing::error!("retry sweep: publish failed for task {}: {:?}", reset.id, e);
                    healthy.store(false, Ordering::Relaxed);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Component for TaskMonitor {
    async fn start(&self) -> AppResult<()> {
        let mut handles = self.handles.lock().await;

        {
            let pool = self.pool.clone();
            let healthy = self.healthy.clone();
            let interval = self.config.timeout_sweep_interval_seconds;
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tracing::debug!("running timeout sweep");
                    TaskMonitor::sweep_timeouts(&pool, &healthy).await;
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            tracing::info!("timeout sweep loop shutting down");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
                    }
                }
            }));
        }

        {
            let pool = self.pool.clone();
            let broker = self.broker.clone();
            let healthy = self.healthy.clone();
            let interval = self.config.retry_sweep_interval_seconds;
            let max_retries = self.config.max_retries as i64;
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tracing::debug!("running retry sweep");
                    TaskMonitor::sweep_retries(&pool, &broker, max_retries, &healthy).await;
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            tracing::info!("retry sweep loop shutting down");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
                    }
                }
            }));
        }

        tracing::info!("Task monitor started");
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        let _ = self.shutdown_tx.send(());
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        tracing::info!("Task monitor stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "task_monitor"
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}
