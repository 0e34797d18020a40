use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::broker::{BrokerAdapter, PublishOptions};
use crate::config::ArchiveProducerConfig;
use crate::db::models::CreateArchiveTask;
use crate::db::repository::TaskRepository;
use crate::error::{AppError, AppResult};
use crate::messages::{JobType, TaskMessage, TaskMetadata};
use crate::producers::{estimate_pending_records, generate_batch_id, retention_day_range, Component};

struct Inner {
    pool: SqlitePool,
    broker: Arc<BrokerAdapter>,
    config: ArchiveProducerConfig,
    in_tick: AtomicBool,
    last_tick_ok: AtomicBool,
}

/// Archive Producer (C4): one cron tick per configured schedule, one task
/// record + one broker message per job type per tick. Overlapping ticks are
/// skipped via `in_tick`, the single-flight guard spec §5 requires (the host
/// instead relies on one long-lived loop per worker; here a flag is needed
/// because `tokio_cron_scheduler` may fire again while a slow tick runs).
pub struct ArchiveProducer {
    inner: Arc<Inner>,
    scheduler: Mutex<Option<JobScheduler>>,
}

impl ArchiveProducer {
    pub fn new(pool: SqlitePool, broker: Arc<BrokerAdapter>, config: ArchiveProducerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                pool,
                broker,
                config,
                in_tick: AtomicBool::new(false),
                last_tick_ok: AtomicBool::new(true),
            }),
            scheduler: Mutex::new(None),
        }
    }

    /// Manual trigger (`POST /schedule/trigger`), restricted to a single job
    /// type when provided (spec §4.4).
    pub async fn trigger(&self, job_type: Option<JobType>) -> AppResult<()> {
        let types: Vec<JobType> = match job_type {
            Some(jt) => vec![jt],
            None => JobType::all().to_vec(),
        };
        run_tick(&self.inner, types).await
    }
}

async fn run_tick(inner: &Inner, job_types: Vec<JobType>) -> AppResult<()> {
    if inner
        .in_tick
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        tracing::warn!("archive producer tick already in progress, skipping this fire");
        return Ok(());
    }

    let results = futures::future::join_all(job_types.into_iter().map(|jt| run_job_type(inner, jt)))
        .await;

    inner.in_tick.store(false, Ordering::SeqCst);

    let mut first_err = None;
    for r in results {
        if let Err(e) = r {
            tracing::error!("archive producer: job type failed: {:?}", e);
            first_err.get_or_insert(e);
        }
    }
    inner
        .last_tick_ok
        .store(first_err.is_none(), Ordering::Relaxed);
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn run_job_type(inner: &Inner, job_type: JobType) -> AppResult<()> {
    let tz = Tz::from_str(&inner.config.timezone).unwrap_or(chrono_tz::UTC);
    let (start, end) = retention_day_range(&tz, inner.config.retention_days);

    let estimated = estimate_pending_records(&inner.pool, job_type.source_table(), start, end).await;
    if estimated == 0 {
        tracing::info!(
            "archive producer: no pending rows for {} in [{}, {}], skipping",
            job_type.as_str(),
            start,
            end
        );
        return Ok(());
    }

    let now = Utc::now();
    let batch_id = generate_batch_id("DRONE", &job_type.as_str().to_uppercase(), now);

    let task = TaskRepository::create(
        &inner.pool,
        CreateArchiveTask {
            job_type: job_type.as_str().to_string(),
            source_table: job_type.source_table().to_string(),
            archive_table: job_type.archive_table().to_string(),
            date_range_start: start,
            date_range_end: end,
            batch_id: batch_id.clone(),
            total_records: estimated,
            created_by: "archive_producer".to_string(),
        },
    )
    .await?;

    let priority = job_type.default_priority();
    let message = TaskMessage {
        task_id: task.id,
        job_type: job_type.as_str().to_string(),
        source_table: job_type.source_table().to_string(),
        archive_table: job_type.archive_table().to_string(),
        batch_id: batch_id.clone(),
        date_range_start: chrono::DateTime::from_naive_utc_and_offset(start, Utc),
        date_range_end: chrono::DateTime::from_naive_utc_and_offset(end, Utc),
        priority,
        batch_size: inner.config.batch_size,
        retry_count: 0,
        max_retries: 3,
        metadata: TaskMetadata {
            estimated_records: Some(estimated),
            is_retry: false,
            original_failure_reason: None,
        },
    };

    let published = inner
        .broker
        .publish(
            job_type.routing_key(),
            &message,
            PublishOptions {
                priority,
                persistent: true,
                message_id: task.id.to_string(),
                message_type: "archive_task".to_string(),
                retry_count: 0,
                max_retries: 3,
                ..Default::default()
            },
        )
        .await?;

    if !published {
        tracing::warn!(
            "archive producer: publish returned false (back-pressure) for batch {}",
            batch_id
        );
    }

    Ok(())
}

#[async_trait::async_trait]
impl Component for ArchiveProducer {
    async fn start(&self) -> AppResult<()> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("archive scheduler init: {e}")))?;

        let tz = Tz::from_str(&self.inner.config.timezone).unwrap_or(chrono_tz::UTC);
        let schedule = self.inner.config.cron_schedule.clone();
        let inner = self.inner.clone();

        let job = Job::new_async_tz(schedule.as_str(), tz, move |_uuid, _l| {
            let inner = inner.clone();
            Box::pin(async move {
                if let Err(e) = run_tick(&inner, JobType::all().to_vec()).await {
                    tracing::error!("archive producer tick failed: {:?}", e);
                }
            })
        })
        .map_err(|e| AppError::Internal(anyhow::anyhow!("archive job create: {e}")))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("archive job add: {e}")))?;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("archive scheduler start: {e}")))?;

        *self.scheduler.lock().await = Some(scheduler);
        tracing::info!(
            "Archive producer started (cron: {})",
            self.inner.config.cron_schedule
        );
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            scheduler
                .shutdown()
                .await
                .map_err(|e| AppError::Internal(anyhow::anyhow!("archive scheduler shutdown: {e}")))?;
        }
        tracing::info!("Archive producer stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "archive_producer"
    }

    fn is_healthy(&self) -> bool {
        self.inner.last_tick_ok.load(Ordering::Relaxed)
    }
}
