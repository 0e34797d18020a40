//! Result Handler (C7): consumes the three result queues and reconciles
//! task records. Started first by the coordinator so it's ready before any
//! producer-created task can complete (spec §4.8).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::broker::{BrokerAdapter, QUEUE_RESULT_FAILED, QUEUE_RESULT_PARTIAL, QUEUE_RESULT_SUCCESS};
use crate::db::models::TaskStatus;
use crate::db::repository::TaskRepository;
use crate::error::AppResult;
use crate::messages::{ResultStatus, TaskResultMessage};
use crate::producers::Component;

pub struct ResultHandler {
    pool: SqlitePool,
    broker: Arc<BrokerAdapter>,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    healthy: Arc<AtomicBool>,
}

impl ResultHandler {
    pub fn new(pool: SqlitePool, broker: Arc<BrokerAdapter>) -> Self {
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(4);
        Self {
            pool,
            broker,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    async fn consume_loop(
        pool: SqlitePool,
        broker: Arc<BrokerAdapter>,
        queue: &'static str,
        healthy: Arc<AtomicBool>,
        mut shutdown_rx: tokio::sync::broadcast::Receiver<()>,
    ) {
        loop {
            if !broker.is_connected() {
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
                }
                continue;
            }

            let consumer = match broker.consume(queue, &format!("result-handler-{queue}")).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("result handler: failed to consume {}: {:?}", queue, e);
                    healthy.store(false, Ordering::Relaxed);
                    tokio::select! {
                        _ = shutdown_rx.recv() => return,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => {}
                    }
                    continue;
                }
            };

            let mut consumer = consumer;
            loop {
                let delivery = tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("result handler consumer on {} shutting down", queue);
                        return;
                    }
                    next = consumer.next() => match next {
                        Some(d) => d,
                        None => break,
                    },
                };

                let delivery = match delivery {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("result handler: delivery error on {}: {:?}", queue, e);
                        continue;
                    }
                };

                match serde_json::from_slice::<TaskResultMessage>(&delivery.data) {
                    Ok(msg) => {
                        let outcome = Self::apply_result(&pool, &msg).await;
                        match outcome {
                            Ok(()) => {
                                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                    tracing::warn!("result handler: ack failed: {:?}", e);
                                }
                            }
                            Err(e) => {
                                tracing::error!(
                                    "result handler: store update failed for task {}: {:?}",
                                    msg.task_id,
                                    e
                                );
                                healthy.store(false, Ordering::Relaxed);
                                if let Err(e) = delivery
                                    .nack(BasicNackOptions {
                                        requeue: true,
                                        ..Default::default()
                                    })
                                    .await
                                {
                                    tracing::warn!("result handler: nack failed: {:?}", e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("result handler: malformed message on {}: {}", queue, e);
                        if let Err(e) = delivery
                            .nack(BasicNackOptions {
                                requeue: false,
                                ..Default::default()
                            })
                            .await
                        {
                            tracing::warn!("result handler: nack failed: {:?}", e);
                        }
                    }
                }
            }

            tracing::warn!("result handler: consumer stream on {} ended, reconnecting", queue);
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    }

    /// Apply an inbound result to the matching task record (spec §4.7).
    /// `partial` is treated as `completed` with a non-empty `errorMessage`
    /// (spec §9 open question 2). Late results for already-terminal tasks
    /// are applied only when they represent a legitimate `failed->completed`
    /// recovery; any other late write is logged and treated as a no-op
    /// (spec §5, §9 open question 3 — the conservative policy chosen here).
    async fn apply_result(pool: &SqlitePool, msg: &TaskResultMessage) -> AppResult<()> {
        let Some(task) = TaskRepository::find_by_id(pool, msg.task_id).await? else {
            tracing::warn!(
                "result handler: no task record for task_id {}, acking with no-op",
                msg.task_id
            );
            return Ok(());
        };

        let already_terminal = task.status == TaskStatus::Completed.as_str()
            || task.status == TaskStatus::Failed.as_str();
        let is_late_success =
            task.status == TaskStatus::Failed.as_str() && msg.status == ResultStatus::Completed;

        if already_terminal && !is_late_success {
            tracing::info!(
                "result handler: ignoring late result for already-terminal task {} (status={})",
                msg.task_id,
                task.status
            );
            return Ok(());
        }

        match msg.status {
            ResultStatus::Completed => {
                TaskRepository::mark_completed(
                    pool,
                    msg.task_id,
                    msg.processed_records.unwrap_or(0),
                    None,
                )
                .await?;
            }
            ResultStatus::Failed => {
                TaskRepository::mark_failed(
                    pool,
                    msg.task_id,
                    msg.error_message.as_deref().unwrap_or("unspecified failure"),
                )
                .await?;
            }
            ResultStatus::Partial => {
                let error_message = msg
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "partial completion".to_string());
                TaskRepository::mark_completed(
                    pool,
                    msg.task_id,
                    msg.processed_records.unwrap_or(0),
                    Some(error_message),
                )
                .await?;
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl Component for ResultHandler {
    async fn start(&self) -> AppResult<()> {
        let mut handles = self.handles.lock().await;
        for queue in [QUEUE_RESULT_SUCCESS, QUEUE_RESULT_FAILED, QUEUE_RESULT_PARTIAL] {
            let pool = self.pool.clone();
            let broker = self.broker.clone();
            let healthy = self.healthy.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                ResultHandler::consume_loop(pool, broker, queue, healthy, shutdown_rx).await;
            }));
        }
        tracing::info!("Result handler started");
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        let _ = self.shutdown_tx.send(());
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(30), handle).await;
        }
        tracing::info!("Result handler stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "result_handler"
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}
