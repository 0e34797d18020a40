//! `/notifications`, `/notifications/stats`: read access to the finalized
//! notification log plus live engine counters (spec §4.10, §6).

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::models::notification::NotificationLogRow;
use crate::db::repository::NotificationLogRepository;
use crate::error::AppResult;
use crate::notify::engine::NotificationStats;
use crate::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub channel: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub notifications: Vec<NotificationLogRow>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<ListResponse>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let notifications = NotificationLogRepository::list(
        &state.db,
        limit,
        offset,
        query.channel.as_deref(),
        query.status.as_deref(),
    )
    .await?;

    Ok(Json(ListResponse { notifications }))
}

#[derive(Serialize)]
pub struct NotificationStatsResponse {
    pub engine: NotificationStats,
    pub sent: i64,
    pub failed: i64,
    pub by_channel: HashMap<String, i64>,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> AppResult<Json<NotificationStatsResponse>> {
    let sent = NotificationLogRepository::count_by_status(&state.db, "sent").await?;
    let failed = NotificationLogRepository::count_by_status(&state.db, "failed").await?;
    let by_channel = NotificationLogRepository::counts_by_channel(&state.db).await?;

    Ok(Json(NotificationStatsResponse {
        engine: state.notify_engine.stats(),
        sent,
        failed,
        by_channel,
    }))
}
