//! `/metrics`: latest cached system snapshot plus current notification
//! counters (spec §6: "latest snapshots").

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;

use crate::monitoring::collector::SystemMetrics;
use crate::notify::engine::NotificationStats;
use crate::AppState;

#[derive(Serialize)]
struct MetricsResponse {
    system: Option<SystemMetrics>,
    notifications: NotificationStats,
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(MetricsResponse {
        system: state.monitoring.latest_metrics().await,
        notifications: state.notify_engine.stats(),
    })
}
