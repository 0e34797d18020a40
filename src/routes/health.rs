//! `/health`: aggregate status, the one route not gated by the API key
//! (spec §6, §7 — "200 healthy, 206 degraded, 503 unhealthy").

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::coordinator::HealthLevel;
use crate::monitoring::collector::DependencyStatus;
use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    coordinator: crate::coordinator::CoordinatorStatus,
    dependencies: Option<crate::monitoring::collector::HealthSnapshot>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let coordinator_status = state.coordinator.status();
    let dependencies = state.monitoring.latest_health().await;

    let dependency_unhealthy = dependencies
        .as_ref()
        .map(|d| d.overall == DependencyStatus::Unhealthy)
        .unwrap_or(false);
    let dependency_degraded = dependencies
        .as_ref()
        .map(|d| d.overall == DependencyStatus::Degraded)
        .unwrap_or(false);

    let (code, label) = if coordinator_status.overall == HealthLevel::Unhealthy || dependency_unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    } else if coordinator_status.overall == HealthLevel::Degraded || dependency_degraded {
        (StatusCode::from_u16(206).unwrap(), "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };

    (
        code,
        Json(HealthResponse {
            status: label,
            coordinator: coordinator_status,
            dependencies,
        }),
    )
}
