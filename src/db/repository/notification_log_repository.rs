use sqlx::SqlitePool;

use crate::db::models::{CreateNotificationLogRow, NotificationLogRow};
use crate::error::{AppError, AppResult};

const LOG_COLUMNS: &str = r#"
    id, alert_id, rule_id, channel, recipients_json, title, content, severity,
    status, error_message, attempts, created_at, sent_at
"#;

/// Durable history of finalized notification attempts (sent or exhausted).
/// Backs the `/notifications` and `/notifications/stats` control-plane
/// routes, generalized from the host's Twitch-specific notification log.
pub struct NotificationLogRepository;

impl NotificationLogRepository {
    pub async fn create(
        pool: &SqlitePool,
        row: CreateNotificationLogRow,
    ) -> AppResult<NotificationLogRow> {
        let now = chrono::Utc::now().naive_utc();
        sqlx::query_as::<_, NotificationLogRow>(&format!(
            r#"
            INSERT INTO notification_log (
                id, alert_id, rule_id, channel, recipients_json, title, content,
                severity, status, error_message, attempts, created_at, sent_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {LOG_COLUMNS}
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
        .bind(row.status)
        .bind(row.error_message)
        .bind(row.attempts)
        .bind(now)
        .bind(row.sent_at)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn list(
        pool: &SqlitePool,
        limit: i64,
        offset: i64,
        channel: Option<&str>,
        status: Option<&str>,
    ) -> AppResult<Vec<NotificationLogRow>> {
        let mut where_clauses = Vec::new();
        if channel.is_some() {
            where_clauses.push("channel = ?");
        }
        if status.is_some() {
            where_clauses.push("status = ?");
        }
        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM notification_log {where_sql} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let mut q = sqlx::query_as::<_, NotificationLogRow>(&sql);
        if let Some(c) = channel {
            q = q.bind(c);
        }
        if let Some(s) = status {
            q = q.bind(s);
        }
        q.bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn count_by_status(pool: &SqlitePool, status: &str) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM notification_log WHERE status = ?")
            .bind(status)
            .fetch_one(pool)
            .await
            .map_err(AppError::Database)
    }

    pub async fn counts_by_channel(
        pool: &SqlitePool,
    ) -> AppResult<std::collections::HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT channel, COUNT(*) FROM notification_log GROUP BY channel",
        )
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows.into_iter().collect())
    }
}
