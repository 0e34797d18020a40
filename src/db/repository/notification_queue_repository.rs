use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::{CreateNotificationQueueRow, NotificationQueueRow};
use crate::error::{AppError, AppResult};

const QUEUE_COLUMNS: &str = r#"
    id, alert_id, rule_id, channel, recipients_json, title, content, severity,
    metadata_json, attempts, max_attempts, next_attempt_at, expires_at,
    last_error, status, created_at, updated_at
"#;

/// Repository for the persistent notification retry queue.
///
/// Claiming uses an atomic single-statement UPDATE with a subselect:
/// `UPDATE ... WHERE id = (SELECT id FROM ... LIMIT 1) RETURNING ...`, the
/// same pattern the host notification queue repository uses, which avoids a
/// long-lived transaction and keeps contention low on SQLite.
pub struct NotificationQueueRepository;

impl NotificationQueueRepository {
    pub async fn create(
        pool: &SqlitePool,
        row: CreateNotificationQueueRow,
    ) -> AppResult<NotificationQueueRow> {
        let now = Utc::now().naive_utc();

        sqlx::query_as::<_, NotificationQueueRow>(&format!(
            r#"
            INSERT INTO notification_queue (
                id, alert_id, rule_id, channel, recipients_json, title, content,
                severity, metadata_json, attempts, max_attempts, next_attempt_at,
                expires_at, last_error, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, NULL, 'pending', ?, ?)
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(row.id)
        .bind(row.alert_id)
        .bind(row.rule_id)
        .bind(row.channel)
        .bind(row.recipients_json)
        .bind(row.title)
        .bind(row.content)
        .bind(row.severity)
        .bind(row.metadata_json)
        .bind(row.max_attempts)
        .bind(now)
        .bind(row.expires_at)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Claim up to `limit` due, non-expired tasks. One `UPDATE ... RETURNING`
    /// per claimed row, looped rather than batched, so other writers are
    /// never blocked behind a long transaction.
    pub async fn fetch_and_claim_due(
        pool: &SqlitePool,
        limit: i64,
    ) -> AppResult<Vec<NotificationQueueRow>> {
        let mut claimed = Vec::new();
        if limit <= 0 {
            return Ok(claimed);
        }

        for _ in 0..(limit as usize) {
            let now = Utc::now().naive_utc();
            let opt = sqlx::query_as::<_, NotificationQueueRow>(&format!(
                r#"
                UPDATE notification_queue
                SET status = 'processing', updated_at = ?
                WHERE id = (
                    SELECT id FROM notification_queue
                    WHERE status = 'pending'
                      AND next_attempt_at <= CURRENT_TIMESTAMP
                      AND (expires_at IS NULL OR expires_at > CURRENT_TIMESTAMP)
                    ORDER BY next_attempt_at ASC
                    LIMIT 1
                )
                RETURNING {QUEUE_COLUMNS}
                "#
            ))
            .bind(now)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

            match opt {
                Some(row) => claimed.push(row),
                None => break,
            }
        }

        Ok(claimed)
    }

    pub async fn mark_sent(pool: &SqlitePool, id: &str) -> AppResult<NotificationQueueRow> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, NotificationQueueRow>(&format!(
            r#"
            UPDATE notification_queue SET status = 'sent', updated_at = ? WHERE id = ?
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Increment `attempts`, record `last_error`, and schedule the next
    /// attempt. If `attempts` reaches `max_attempts`, the row moves to
    /// `dead` (the DLQ) instead of back to `pending`.
    pub async fn register_attempt_and_schedule(
        pool: &SqlitePool,
        id: &str,
        next_attempt_at: chrono::NaiveDateTime,
        last_error: Option<String>,
    ) -> AppResult<NotificationQueueRow> {
        let now = Utc::now().naive_utc();
        sqlx::query_as::<_, NotificationQueueRow>(&format!(
            r#"
            UPDATE notification_queue
            SET attempts = attempts + 1,
                next_attempt_at = ?,
                last_error = ?,
                status = CASE WHEN attempts + 1 >= max_attempts THEN 'dead' ELSE 'pending' END,
                updated_at = ?
            WHERE id = ?
            RETURNING {QUEUE_COLUMNS}
            "#
        ))
        .bind(next_attempt_at)
        .bind(last_error)
        .bind(now)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<NotificationQueueRow>> {
        sqlx::query_as::<_, NotificationQueueRow>(&format!(
            "SELECT {QUEUE_COLUMNS} FROM notification_queue WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }
}
