use chrono::{NaiveDateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{
    ArchiveTask, CreateArchiveTask, Pagination, TaskFilter, TaskStatistics, TaskStatus,
};
use crate::error::{AppError, AppResult};

const TASK_COLUMNS: &str = r#"
    id, job_type, source_table, archive_table, date_range_start, date_range_end,
    batch_id, status, total_records, archived_records, retry_count,
    started_at, completed_at, error_message, created_by, created_at, updated_at
"#;

/// Unit struct over associated functions, following `UserRepository`'s shape:
/// no internal state, every call takes `&SqlitePool` explicitly.
pub struct TaskRepository;

impl TaskRepository {
    /// Insert a new task record with `status=pending`, `retry_count=0`.
    /// A duplicate `batch_id` is surfaced as `AppError::Conflict`, not a raw
    /// database error, per spec §4.1 / §8 ("Create with a duplicate batchId
    /// yields Conflict without side effects on the existing record").
    pub async fn create(pool: &SqlitePool, attrs: CreateArchiveTask) -> AppResult<ArchiveTask> {
        let now = Utc::now().naive_utc();

        let result = sqlx::query_as::<_, ArchiveTask>(&format!(
            r#"
            INSERT INTO archive_tasks (
                job_type, source_table, archive_table, date_range_start, date_range_end,
                batch_id, status, total_records, archived_records, retry_count,
                created_by, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, 0, 0, ?, ?, ?)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(attrs.job_type)
        .bind(attrs.source_table)
        .bind(attrs.archive_table)
        .bind(attrs.date_range_start)
        .bind(attrs.date_range_end)
        .bind(&attrs.batch_id)
        .bind(attrs.total_records)
        .bind(attrs.created_by)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await;

        match result {
            Ok(task) => Ok(task),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                AppError::Conflict(format!("batch_id already exists: {}", attrs.batch_id)),
            ),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<ArchiveTask>> {
        sqlx::query_as::<_, ArchiveTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM archive_tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_batch_id(
        pool: &SqlitePool,
        batch_id: &str,
    ) -> AppResult<Option<ArchiveTask>> {
        sqlx::query_as::<_, ArchiveTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM archive_tasks WHERE batch_id = ?"
        ))
        .bind(batch_id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Filtered, paginated listing. Default order is `created_at DESC`.
    pub async fn find_by_filter(
        pool: &SqlitePool,
        filter: &TaskFilter,
        pagination: &Pagination,
    ) -> AppResult<(Vec<ArchiveTask>, i64)> {
        let mut where_clauses: Vec<String> = Vec::new();
        if filter.job_type.is_some() {
            where_clauses.push("job_type = ?".to_string());
        }
        if filter.status.is_some() {
            where_clauses.push("status = ?".to_string());
        }
        if filter.batch_id.is_some() {
            where_clauses.push("batch_id = ?".to_string());
        }
        if filter.created_by.is_some() {
            where_clauses.push("created_by = ?".to_string());
        }
        if filter.date_range_start_after.is_some() {
            where_clauses.push("date_range_start >= ?".to_string());
        }
        if filter.date_range_start_before.is_some() {
            where_clauses.push("date_range_start <= ?".to_string());
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        macro_rules! bind_filters {
            ($query:expr) => {{
                let mut q = $query;
                if let Some(ref v) = filter.job_type {
                    q = q.bind(v);
                }
                if let Some(ref v) = filter.status {
                    q = q.bind(v);
                }
                if let Some(ref v) = filter.batch_id {
                    q = q.bind(v);
                }
                if let Some(ref v) = filter.created_by {
                    q = q.bind(v);
                }
                if let Some(v) = filter.date_range_start_after {
                    q = q.bind(v);
                }
                if let Some(v) = filter.date_range_start_before {
                    q = q.bind(v);
                }
                q
            }};
        }

        let count_sql = format!("SELECT COUNT(*) FROM archive_tasks {where_sql}");
        let total: i64 = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql))
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        let list_sql = format!(
            "SELECT {TASK_COLUMNS} FROM archive_tasks {where_sql} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let rows = bind_filters!(sqlx::query_as::<_, ArchiveTask>(&list_sql))
            .bind(pagination.limit)
            .bind(pagination.offset)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)?;

        Ok((rows, total))
    }

    pub async fn find_pending(pool: &SqlitePool, limit: i64) -> AppResult<Vec<ArchiveTask>> {
        if limit <= 0 {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, ArchiveTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM archive_tasks WHERE status = 'pending' ORDER BY created_at ASC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_running(pool: &SqlitePool) -> AppResult<Vec<ArchiveTask>> {
        sqlx::query_as::<_, ArchiveTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM archive_tasks WHERE status = 'running'"
        ))
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// `status=running AND started_at < now - hours`.
    pub async fn find_timed_out(pool: &SqlitePool, hours: i64) -> AppResult<Vec<ArchiveTask>> {
        let cutoff = Utc::now().naive_utc() - chrono::Duration::hours(hours);
        sqlx::query_as::<_, ArchiveTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM archive_tasks WHERE status = 'running' AND started_at < ?"
        ))
        .bind(cutoff)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// `status=failed AND retry_count < max_retries`.
    pub async fn find_retryable(
        pool: &SqlitePool,
        max_retries: i64,
    ) -> AppResult<Vec<ArchiveTask>> {
        sqlx::query_as::<_, ArchiveTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM archive_tasks WHERE status = 'failed' AND retry_count < ?"
        ))
        .bind(max_retries)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Transition the task into `running`, setting `started_at = now`.
    pub async fn mark_running(pool: &SqlitePool, id: i64) -> AppResult<ArchiveTask> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, ArchiveTask>(&format!(
            r#"
            UPDATE archive_tasks
            SET status = 'running', started_at = ?, updated_at = ?
            WHERE id = ?
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Transition into `completed`, recording `archived_records` and an
    /// optional non-empty `error_message` (the `partial` interpretation).
    pub async fn mark_completed(
        pool: &SqlitePool,
        id: i64,
        archived_records: i64,
        error_message: Option<String>,
    ) -> AppResult<ArchiveTask> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, ArchiveTask>(&format!(
            r#"
            UPDATE archive_tasks
            SET status = 'completed', archived_records = ?, error_message = ?,
                completed_at = ?, updated_at = ?
            WHERE id = ?
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(archived_records)
        .bind(error_message)
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Transition into `failed`, recording `error_message`.
    pub async fn mark_failed(
        pool: &SqlitePool,
        id: i64,
        error_message: &str,
    ) -> AppResult<ArchiveTask> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, ArchiveTask>(&format!(
            r#"
            UPDATE archive_tasks
            SET status = 'failed', error_message = ?, completed_at = ?, updated_at = ?
            WHERE id = ?
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(error_message)
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Reset a failed task back to `pending` ahead of a retry, incrementing
    /// `retry_count` and clearing the transition timestamps/counters (spec
    /// §4.6 retry sweep step 1, §9 item 5: increment, don't reset to 0).
    pub async fn reset_for_retry(pool: &SqlitePool, id: i64) -> AppResult<ArchiveTask> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, ArchiveTask>(&format!(
            r#"
            UPDATE archive_tasks
            SET status = 'pending',
                retry_count = retry_count + 1,
                archived_records = 0,
                started_at = NULL,
                completed_at = NULL,
                error_message = NULL,
                updated_at = ?
            WHERE id = ?
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Fails with `AppError::Protocol` if the record is currently `running`
    /// (spec §4.1: `Delete` "Fails with ProtocolError if record is running").
    pub async fn delete(pool: &SqlitePool, id: i64) -> AppResult<bool> {
        let task = Self::find_by_id(pool, id).await?;
        match task {
            None => Ok(false),
            Some(t) if t.status == TaskStatus::Running.as_str() => Err(AppError::Protocol(
                format!("cannot delete task {id} while status=running"),
            )),
            Some(_) => {
                let result = sqlx::query("DELETE FROM archive_tasks WHERE id = ?")
                    .bind(id)
                    .execute(pool)
                    .await
                    .map_err(AppError::Database)?;
                Ok(result.rows_affected() > 0)
            }
        }
    }

    /// Bulk status transition for a set of task ids (spec §4.1 C1
    /// `BatchUpdateStatus`), used by the monitor's sweeps to move many tasks
    /// at once instead of one round-trip per id. `error_message` is applied
    /// to every row in the batch (`None` leaves the existing value alone);
    /// `completed_at` is stamped with the current time whenever `status` is
    /// a terminal one (`completed`/`failed`), matching `mark_completed`/
    /// `mark_failed`. Returns the number of rows actually updated.
    pub async fn batch_update_status(
        pool: &SqlitePool,
        ids: &[i64],
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> AppResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();
        let placeholders = std::iter::repeat("?").take(ids.len()).collect::<Vec<_>>().join(", ");
        let sql = format!(
            r#"
            UPDATE archive_tasks
            SET status = ?,
                error_message = COALESCE(?, error_message),
                completed_at = CASE WHEN ? IN ('completed', 'failed') THEN ? ELSE completed_at END,
                updated_at = ?
            WHERE id IN ({placeholders})
            "#
        );

        let mut query = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(error_message)
            .bind(status.as_str())
            .bind(now)
            .bind(now);
        for id in ids {
            query = query.bind(id);
        }

        let result = query.execute(pool).await.map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    /// Physically delete terminal records older than `days`.
    pub async fn cleanup_older_than(pool: &SqlitePool, days: i64) -> AppResult<u64> {
        let cutoff = Utc::now().naive_utc() - chrono::Duration::days(days);
        let result = sqlx::query(
            r#"
            DELETE FROM archive_tasks
            WHERE status IN ('completed', 'failed') AND created_at < ?
            "#,
        )
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    /// `average_execution_seconds` is computed only over `completed` tasks
    /// with both `started_at` and `completed_at` set, per spec §4.1.
    pub async fn statistics(
        pool: &SqlitePool,
        date_range: Option<(NaiveDateTime, NaiveDateTime)>,
    ) -> AppResult<TaskStatistics> {
        let (where_sql, start, end) = match date_range {
            Some((s, e)) => ("WHERE created_at BETWEEN ? AND ?", Some(s), Some(e)),
            None => ("", None, None),
        };

        macro_rules! bind_range {
            ($query:expr) => {{
                let mut q = $query;
                if let Some(s) = start {
                    q = q.bind(s);
                }
                if let Some(e) = end {
                    q = q.bind(e);
                }
                q
            }};
        }

        let counts_sql = format!(
            r#"
            SELECT
                COUNT(*) AS total,
                SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END) AS pending,
                SUM(CASE WHEN status = 'running' THEN 1 ELSE 0 END) AS running,
                SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed,
                SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
                COALESCE(SUM(archived_records), 0) AS total_records_processed
            FROM archive_tasks {where_sql}
            "#
        );

        let row: (i64, Option<i64>, Option<i64>, Option<i64>, Option<i64>, i64) =
            bind_range!(sqlx::query_as(&counts_sql))
                .fetch_one(pool)
                .await
                .map_err(AppError::Database)?;

        let avg_sql = format!(
            r#"
            SELECT AVG(
                (julianday(completed_at) - julianday(started_at)) * 86400.0
            )
            FROM archive_tasks
            {joiner} status = 'completed' AND started_at IS NOT NULL AND completed_at IS NOT NULL
            "#,
            joiner = if where_sql.is_empty() { "WHERE" } else { "WHERE created_at BETWEEN ? AND ? AND" }
        );

        let avg_query = if date_range.is_some() {
            bind_range!(sqlx::query_scalar::<_, Option<f64>>(&avg_sql))
        } else {
            sqlx::query_scalar::<_, Option<f64>>(&avg_sql)
        };
        let average_execution_seconds = avg_query
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(TaskStatistics {
            total: row.0,
            pending: row.1.unwrap_or(0),
            running: row.2.unwrap_or(0),
            completed: row.3.unwrap_or(0),
            failed: row.4.unwrap_or(0),
            total_records_processed: row.5,
            average_execution_seconds,
        })
    }
}
