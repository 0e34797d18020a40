//! Control-plane HTTP surface (spec §6). Every route is gated by
//! `X-Api-Key` except `/health`.

pub mod alerts;
pub mod archive_tasks;
pub mod health;
pub mod metrics;
pub mod notifications;
pub mod schedule;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::middleware::api_key::require_api_key;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let guarded = Router::new()
        .route("/metrics", get(metrics::metrics))
        .route("/schedule/status", get(schedule::status))
        .route("/schedule/trigger", post(schedule::trigger))
        .route("/alerts", get(alerts::list))
        .route("/alerts/:id/resolve", post(alerts::resolve))
        .route(
            "/archive-tasks",
            get(archive_tasks::list),
        )
        .route("/archive-tasks/stats", get(archive_tasks::statistics))
        .route(
            "/archive-tasks/:id",
            get(archive_tasks::get).delete(archive_tasks::delete),
        )
        .route("/notifications", get(notifications::list))
        .route("/notifications/stats", get(notifications::stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health::health))
        .merge(guarded)
        .with_state(state)
}
