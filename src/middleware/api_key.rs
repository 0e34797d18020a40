//! Control-plane guard: every route except `/health` requires `X-Api-Key`
//! to match `Config::control_plane.api_key` (spec §6).

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::AppState;

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get("X-Api-Key")
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if key == state.config.control_plane.api_key => next.run(request).await,
        _ => AppError::Unauthorized.into_response(),
    }
}
