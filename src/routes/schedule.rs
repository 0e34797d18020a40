//! `/schedule/status`, `/schedule/trigger` (spec §6, §4.4/§4.5).

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::messages::JobType;
use crate::AppState;

#[derive(Serialize)]
struct ScheduleStatusResponse {
    coordinator: crate::coordinator::CoordinatorStatus,
}

pub async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ScheduleStatusResponse {
        coordinator: state.coordinator.status(),
    })
}

#[derive(Deserialize)]
pub struct TriggerRequest {
    #[serde(rename = "jobType")]
    pub job_type: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(rename = "tableName")]
    pub table_name: Option<String>,
    #[serde(rename = "daysThreshold")]
    pub days_threshold: Option<i64>,
}

#[derive(Serialize)]
pub struct TriggerResponse {
    pub success: bool,
    pub message: String,
}

/// Manual producer kick (spec §6). `target:"cleanup"` routes to the cleanup
/// producer; anything else (the default) routes to the archive producer.
pub async fn trigger(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TriggerRequest>,
) -> AppResult<Json<TriggerResponse>> {
    if req.target.as_deref() == Some("cleanup") {
        state
            .coordinator
            .cleanup_producer
            .trigger(req.table_name.as_deref(), req.days_threshold.unwrap_or(7))
            .await?;
        return Ok(Json(TriggerResponse {
            success: true,
            message: "cleanup producer triggered".to_string(),
        }));
    }

    let job_type = match req.job_type.as_deref() {
        Some(s) => Some(
            JobType::from_str(s)
                .ok_or_else(|| AppError::Validation(format!("unknown jobType: {s}")))?,
        ),
        None => None,
    };

    state.coordinator.archive_producer.trigger(job_type).await?;

    Ok(Json(TriggerResponse {
        success: true,
        message: "archive producer triggered".to_string(),
    }))
}
