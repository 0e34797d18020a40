//! `/alerts`: active/all threshold alerts and manual resolution (spec §4.9,
//! §6).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::messages::Alert;
use crate::AppState;

#[derive(Deserialize)]
pub struct ListAlertsQuery {
    #[serde(default)]
    pub all: bool,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListAlertsQuery>,
) -> impl IntoResponse {
    let alerts: Vec<Alert> = if query.all {
        state.alerts.list_all().await
    } else {
        state.alerts.list_active().await
    };
    Json(alerts)
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub resolved: bool,
}

pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ResolveResponse>> {
    let resolved = state.alerts.resolve(&id).await;
    if !resolved {
        return Err(AppError::NotFound(format!("no active alert with id {id}")));
    }
    Ok(Json(ResolveResponse { resolved }))
}
