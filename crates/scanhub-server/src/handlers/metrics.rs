use crate::error::ApiError;
use crate::AppState;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

/// `GET /metrics` — unauthenticated Prometheus text exposition (spec §6).
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let body = state
        .metrics
        .render()
        .map_err(|err| ApiError::bad_request(format!("failed to render metrics: {err}")))?;
    Ok(([("content-type", "text/plain; version=0.0.4")], body).into_response())
}
