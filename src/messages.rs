//! Wire types exchanged with the broker and the in-process alerting/notification
//! pipeline. None of these are persisted relationally except where a repository
//! explicitly serializes them into a `_json` column.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Archival job types understood by the archive producer and its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Positions,
    Commands,
    Status,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Positions => "positions",
            JobType::Commands => "commands",
            JobType::Status => "status",
        }
    }

    pub fn source_table(&self) -> &'static str {
        match self {
            JobType::Positions => "drone_positions",
            JobType::Commands => "drone_commands",
            JobType::Status => "drone_real_time_status",
        }
    }

    pub fn archive_table(&self) -> &'static str {
        match self {
            JobType::Positions => "drone_positions_archive",
            JobType::Commands => "drone_commands_archive",
            JobType::Status => "drone_real_time_status_archive",
        }
    }

    /// Default broker priority per spec: positions=10, commands=8, status=6.
    pub fn default_priority(&self) -> u8 {
        match self {
            JobType::Positions => 10,
            JobType::Commands => 8,
            JobType::Status => 6,
        }
    }

    pub fn routing_key(&self) -> &'static str {
        match self {
            JobType::Positions => "archive.positions",
            JobType::Commands => "archive.commands",
            JobType::Status => "archive.status",
        }
    }

    pub fn all() -> [JobType; 3] {
        [JobType::Positions, JobType::Commands, JobType::Status]
    }

    pub fn from_str(s: &str) -> Option<JobType> {
        match s {
            "positions" => Some(JobType::Positions),
            "commands" => Some(JobType::Commands),
            "status" => Some(JobType::Status),
            _ => None,
        }
    }
}

/// Extra metadata carried on a task message alongside the core fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_records: Option<i64>,
    #[serde(default)]
    pub is_retry: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_failure_reason: Option<String>,
}

/// Message published to `archive.<jobType>` on the `MAIN` exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: i64,
    pub job_type: String,
    pub source_table: String,
    pub archive_table: String,
    pub batch_id: String,
    pub date_range_start: DateTime<Utc>,
    pub date_range_end: DateTime<Utc>,
    pub priority: u8,
    pub batch_size: u32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub metadata: TaskMetadata,
}

/// Message published to `cleanup.expired`. Deliberately has no corresponding
/// task-store record (see the "cleanup is broker-only" open question).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupTaskMessage {
    pub task_id: String,
    pub cleanup_type: String,
    pub table_name: String,
    pub date_threshold: DateTime<Utc>,
    pub batch_size: u32,
    pub priority: CleanupPriority,
    pub retry_count: u32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CleanupPriority {
    Low,
    Medium,
}

impl CleanupPriority {
    /// Numeric broker priority (queue priorities are 0-10; LOW/MEDIUM map onto
    /// the low end of that range so archival work always wins contention).
    pub fn as_broker_priority(&self) -> u8 {
        match self {
            CleanupPriority::Low => 2,
            CleanupPriority::Medium => 4,
        }
    }
}

/// Result status reported by a worker on the result queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    Failed,
    Partial,
}

/// Inbound payload on `result.success` / `result.failed` / `result.partial`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResultMessage {
    pub task_id: i64,
    pub status: ResultStatus,
    #[serde(default)]
    pub processed_records: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub execution_time_ms: i64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Cpu,
    Memory,
    Disk,
    TaskFailure,
    QueueSize,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Cpu => "cpu",
            AlertType::Memory => "memory",
            AlertType::Disk => "disk",
            AlertType::TaskFailure => "task_failure",
            AlertType::QueueSize => "queue_size",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// Ephemeral, in-memory + KV entity raised by the monitoring collector's
/// threshold engine. `resolved` only ever flips `false -> true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Webhook,
    Sms,
    Slack,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Webhook => "webhook",
            NotificationChannel::Sms => "sms",
            NotificationChannel::Slack => "slack",
        }
    }

    pub fn from_str(s: &str) -> Option<NotificationChannel> {
        match s {
            "email" => Some(NotificationChannel::Email),
            "webhook" => Some(NotificationChannel::Webhook),
            "sms" => Some(NotificationChannel::Sms),
            "slack" => Some(NotificationChannel::Slack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A fully rendered, queued notification. Mirrors what's persisted into
/// `notification_queue`/`notification_log`, kept separately as an in-memory
/// queue entry for the drain loop (spec §4.10: "push to an in-memory queue").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub id: String,
    pub title: String,
    pub content: String,
    pub severity: NotificationSeverity,
    pub channel: NotificationChannel,
    pub recipients: Vec<String>,
    pub status: NotificationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sending,
    Sent,
    Failed,
}

/// Config-time rule mapping alerts to notification fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: String,
    pub enabled: bool,
    pub conditions: RuleConditions,
    pub notifications: Vec<NotificationTarget>,
    /// Seconds. Within `(rule.id, alertType)`, a notification is suppressed
    /// if a cooldown key exists in the KV cache.
    pub cooldown_period_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default)]
    pub alert_types: Vec<AlertType>,
    #[serde(default)]
    pub severities: Vec<AlertSeverity>,
    /// Inclusive `HH:MM-HH:MM` local-time window, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTarget {
    pub channel: NotificationChannel,
    pub recipients: Vec<String>,
    pub template_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<u64>,
}

/// Outcome of a `ChannelProvider::send` call (spec §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}
