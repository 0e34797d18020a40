use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use rand::Rng;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::broker::{BrokerAdapter, PublishOptions, QUEUE_CLEANUP_EXPIRED};
use crate::config::CleanupProducerConfig;
use crate::error::{AppError, AppResult};
use crate::messages::{CleanupPriority, CleanupTaskMessage};
use crate::producers::Component;

const SOURCE_TABLES: &[&str] = &[
    "drone_positions",
    "drone_commands",
    "drone_real_time_status",
];

struct Inner {
    broker: Arc<BrokerAdapter>,
    config: CleanupProducerConfig,
    in_tick: AtomicBool,
    last_tick_ok: AtomicBool,
}

/// Cleanup Producer (C5): broker-only, no task-store record (spec §4.5, §9
/// open question 1 — preserved as a documented asymmetry, not fixed here).
pub struct CleanupProducer {
    inner: Arc<Inner>,
    scheduler: Mutex<Option<JobScheduler>>,
}

impl CleanupProducer {
    pub fn new(broker: Arc<BrokerAdapter>, config: CleanupProducerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker,
                config,
                in_tick: AtomicBool::new(false),
                last_tick_ok: AtomicBool::new(true),
            }),
            scheduler: Mutex::new(None),
        }
    }

    /// Manual trigger: defaults to every source table at `days_threshold`
    /// with priority MEDIUM (spec §4.5).
    pub async fn trigger(&self, table_name: Option<&str>, days_threshold: i64) -> AppResult<()> {
        let tables: Vec<&str> = match table_name {
            Some(t) => vec![t],
            None => SOURCE_TABLES.to_vec(),
        };
        run_tick(&self.inner, tables, days_threshold, CleanupPriority::Medium).await
    }
}

async fn run_tick(
    inner: &Inner,
    tables: Vec<&str>,
    days_threshold: i64,
    priority: CleanupPriority,
) -> AppResult<()> {
    if inner
        .in_tick
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        tracing::warn!("cleanup producer tick already in progress, skipping this fire");
        return Ok(());
    }

    let mut first_err = None;
    for table in tables {
        if let Err(e) = publish_cleanup(inner, table, days_threshold, priority).await {
            tracing::error!("cleanup producer: {} failed: {:?}", table, e);
            first_err.get_or_insert(e);
        }
    }

    inner.in_tick.store(false, Ordering::SeqCst);
    inner
        .last_tick_ok
        .store(first_err.is_none(), Ordering::Relaxed);
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn publish_cleanup(
    inner: &Inner,
    table: &str,
    days_threshold: i64,
    priority: CleanupPriority,
) -> AppResult<()> {
    let date_threshold = Utc::now() - chrono::Duration::days(days_threshold);
    let rand_suffix: u32 = rand::thread_rng().gen_range(1000..10000);
    let task_id = format!("cleanup_{table}_{}_{rand_suffix}", Utc::now().timestamp_millis());

    let message = CleanupTaskMessage {
        task_id: task_id.clone(),
        cleanup_type: "physical_delete".to_string(),
        table_name: table.to_string(),
        date_threshold,
        batch_size: 1000,
        priority,
        retry_count: 0,
        max_retries: 2,
    };

    let published = inner
        .broker
        .publish(
            QUEUE_CLEANUP_EXPIRED,
            &message,
            PublishOptions {
                priority: priority.as_broker_priority(),
                persistent: true,
                message_id: task_id.clone(),
                message_type: "cleanup_task".to_string(),
                retry_count: 0,
                max_retries: 2,
                ..Default::default()
            },
        )
        .await?;

    if !published {
        tracing::warn!(
            "cleanup producer: publish returned false (back-pressure) for {}",
            task_id
        );
    }
    Ok(())
}

#[async_trait::async_trait]
impl Component for CleanupProducer {
    async fn start(&self) -> AppResult<()> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cleanup scheduler init: {e}")))?;

        let tz = Tz::from_str(&self.inner.config.timezone).unwrap_or(chrono_tz::UTC);
        let schedule = self.inner.config.cron_schedule.clone();
        let inner = self.inner.clone();

        let job = Job::new_async_tz(schedule.as_str(), tz, move |_uuid, _l| {
            let inner = inner.clone();
            Box::pin(async move {
                if let Err(e) = run_tick(&inner, SOURCE_TABLES.to_vec(), 7, CleanupPriority::Low).await
                {
                    tracing::error!("cleanup producer tick failed: {:?}", e);
                }
            })
        })
        .map_err(|e| AppError::Internal(anyhow::anyhow!("cleanup job create: {e}")))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cleanup job add: {e}")))?;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cleanup scheduler start: {e}")))?;

        *self.scheduler.lock().await = Some(scheduler);
        tracing::info!(
            "Cleanup producer started (cron: {})",
            self.inner.config.cron_schedule
        );
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!("cleanup scheduler shutdown: {e}")))?;
        }
        tracing::info!("Cleanup producer stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cleanup_producer"
    }

    fn is_healthy(&self) -> bool {
        self.inner.last_tick_ok.load(Ordering::Relaxed)
    }
}
