//! Cron-driven producers (C4, C5): compute date ranges, create task records
//! where applicable, and publish broker messages. Each producer owns its own
//! `tokio_cron_scheduler::JobScheduler`, following the same
//! schedule-then-await-completion shape used for job scheduling elsewhere in
//! the pack, started/stopped explicitly by the coordinator.

pub mod archive;
pub mod cleanup;

pub use archive::ArchiveProducer;
pub use cleanup::CleanupProducer;

use chrono::{NaiveDateTime, TimeZone, Utc};
use sqlx::SqlitePool;

use crate::error::AppResult;

/// `DRONE_<TYPE>_<YYYYMMDD>_<epoch_ms>`, the unique, human-readable token
/// every archive task batch is keyed by (spec §3, §4.4).
pub fn generate_batch_id(prefix: &str, job_type_upper: &str, now: chrono::DateTime<Utc>) -> String {
    format!(
        "{prefix}_{job_type_upper}_{date}_{ts}",
        date = now.format("%Y%m%d"),
        ts = now.timestamp_millis()
    )
}

/// Half-open day range `[startDate, endDate]` covering the calendar day
/// `retention_days` before today, in the producer's configured timezone
/// (spec §4.4 step 1).
pub fn retention_day_range<Tz: TimeZone>(
    tz: &Tz,
    retention_days: i64,
) -> (NaiveDateTime, NaiveDateTime)
where
    Tz::Offset: std::fmt::Display,
{
    let now_local = Utc::now().with_timezone(tz);
    let target_day = (now_local - chrono::Duration::days(retention_days)).date_naive();
    let start = target_day.and_hms_opt(0, 0, 0).expect("valid midnight");
    let end = target_day
        .and_hms_milli_opt(23, 59, 59, 999)
        .expect("valid end-of-day");
    (start, end)
}

/// Estimate how many not-yet-archived rows fall within `[start, end]` for
/// `source_table`. The source tables themselves are an external collaborator
/// (spec §1 Non-goals: "executing archival SQL itself" is out of scope); a
/// failed or missing-table estimate is treated as zero per spec §4.4.
pub async fn estimate_pending_records(
    pool: &SqlitePool,
    source_table: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> i64 {
    let sql = format!(
        "SELECT COUNT(*) FROM {source_table} WHERE created_at >= ? AND created_at <= ? AND archived_at IS NULL"
    );
    match sqlx::query_scalar::<_, i64>(&sql)
        .bind(start)
        .bind(end)
        .fetch_one(pool)
        .await
    {
        Ok(count) => count,
        Err(e) => {
            tracing::warn!(
                "estimate_pending_records: failed to count {} ({}), treating as zero",
                source_table,
                e
            );
            0
        }
    }
}

/// Component lifecycle contract the coordinator drives in a fixed order
/// (spec §4.8). Implemented by every long-lived scheduler subsystem.
#[async_trait::async_trait]
pub trait Component: Send + Sync {
    async fn start(&self) -> AppResult<()>;
    async fn stop(&self) -> AppResult<()>;
    fn name(&self) -> &'static str;
    fn is_healthy(&self) -> bool;
}
