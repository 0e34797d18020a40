use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Persistent record of one archival task, the only entity this scheduler
/// writes to the relational store. Status transitions are restricted to
/// `pending->running`, `running->{completed,failed}`, `failed->pending`;
/// enforcement lives in `TaskRepository`, not on this struct.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ArchiveTask {
    pub id: i64,
    pub job_type: String,
    pub source_table: String,
    pub archive_table: String,
    pub date_range_start: NaiveDateTime,
    pub date_range_end: NaiveDateTime,
    pub batch_id: String,
    pub status: String,
    pub total_records: i64,
    pub archived_records: i64,
    pub retry_count: i64,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub error_message: Option<String>,
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Attributes required to create a new task record. `status` is always
/// `pending` and `retry_count` always `0` on insert, per spec §4.1.
#[derive(Debug, Clone)]
pub struct CreateArchiveTask {
    pub job_type: String,
    pub source_table: String,
    pub archive_table: String,
    pub date_range_start: NaiveDateTime,
    pub date_range_end: NaiveDateTime,
    pub batch_id: String,
    pub total_records: i64,
    pub created_by: String,
}

/// Filter fields for `FindByFilter` (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub job_type: Option<String>,
    pub status: Option<String>,
    pub batch_id: Option<String>,
    pub created_by: Option<String>,
    pub date_range_start_after: Option<NaiveDateTime>,
    pub date_range_start_before: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatistics {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub total_records_processed: i64,
    pub average_execution_seconds: Option<f64>,
}
