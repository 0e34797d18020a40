//! `/archive-tasks`: read/delete access to persisted archival task records
//! (spec §4.1, §6).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::models::task::{ArchiveTask, Pagination, TaskFilter, TaskStatistics};
use crate::db::repository::TaskRepository;
use crate::error::{AppError, AppResult};
use crate::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "jobType")]
    pub job_type: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "batchId")]
    pub batch_id: Option<String>,
    #[serde(rename = "createdBy")]
    pub created_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub tasks: Vec<ArchiveTask>,
    pub total: i64,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ListResponse>> {
    let filter = TaskFilter {
        job_type: query.job_type,
        status: query.status,
        batch_id: query.batch_id,
        created_by: query.created_by,
        date_range_start_after: None,
        date_range_start_before: None,
    };
    let pagination = Pagination {
        limit: query.limit.unwrap_or(50).clamp(1, 500),
        offset: query.offset.unwrap_or(0).max(0),
    };

    let (tasks, total) = TaskRepository::find_by_filter(&state.db, &filter, &pagination).await?;
    Ok(Json(ListResponse { tasks, total }))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<ArchiveTask>> {
    let task = TaskRepository::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no archive task with id {id}")))?;
    Ok(Json(task))
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<DeleteResponse>> {
    let deleted = TaskRepository::delete(&state.db, id).await?;
    Ok(Json(DeleteResponse { deleted }))
}

pub async fn statistics(State(state): State<Arc<AppState>>) -> AppResult<Json<TaskStatistics>> {
    let stats = TaskRepository::statistics(&state.db, None).await?;
    Ok(Json(stats))
}
