use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Persistent row backing the notification retry queue. Mirrors the
/// in-memory `NotificationMessage` (`crate::messages`) plus the
/// scheduling fields a durable retry worker needs. Claiming is done with
/// an atomic `UPDATE ... WHERE id = (SELECT ...) RETURNING` statement in
/// `NotificationQueueRepository::fetch_and_claim_due`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationQueueRow {
    pub id: String,
    pub alert_id: Option<String>,
    pub rule_id: Option<String>,
    pub channel: String,
    pub recipients_json: String,
    pub title: String,
    pub content: String,
    pub severity: String,
    pub metadata_json: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub next_attempt_at: NaiveDateTime,
    pub expires_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct CreateNotificationQueueRow {
    pub id: String,
    pub alert_id: Option<String>,
    pub rule_id: Option<String>,
    pub channel: String,
    pub recipients_json: String,
    pub title: String,
    pub content: String,
    pub severity: String,
    pub metadata_json: String,
    pub max_attempts: i64,
    pub expires_at: Option<NaiveDateTime>,
}

/// Archived notification outcome, used by the `/notifications` control-plane
/// routes (spec §6: "reused directly from the host's routes/notifications.rs
/// shape, repointed at the alert-driven notification log").
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationLogRow {
    pub id: String,
    pub alert_id: Option<String>,
    pub rule_id: Option<String>,
    pub channel: String,
    pub recipients_json: String,
    pub title: String,
    pub content: String,
    pub severity: String,
    pub status: String,
    pub error_message: Option<String>,
    pub attempts: i64,
    pub created_at: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct CreateNotificationLogRow {
    pub id: String,
    pub alert_id: Option<String>,
    pub rule_id: Option<String>,
    pub channel: String,
    pub recipients_json: String,
    pub title: String,
    pub content: String,
    pub severity: String,
    pub status: String,
    pub error_message: Option<String>,
    pub attempts: i64,
    pub sent_at: Option<NaiveDateTime>,
}
