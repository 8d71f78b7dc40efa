use crate::auth::AuthenticatedActor;
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::State;
use axum::Json;
use scanhub_core::name;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct IntakeRequest {
    name: String,
    version: String,
    distributions: Vec<String>,
}

/// `POST /package` — idempotent enqueue (spec §4.3).
pub async fn intake(
    State(state): State<Arc<AppState>>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<IntakeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.distributions.is_empty() {
        return Err(ApiError::bad_request("at least one distribution url is required"));
    }

    let normalized_name = name::normalize(&req.name);

    let result = state
        .store
        .insert_scan(&normalized_name, &req.version, &req.distributions, &actor)
        .await;

    match result {
        Ok(scan_id) => {
            state.metrics.scans_intake_total.inc();
            state.metrics.scans_in_flight.inc();
            tracing::info!(
                event = "scan.queued",
                scan_id = %scan_id,
                name = %normalized_name,
                version = %req.version,
                actor = %actor,
                "scan queued"
            );
            Ok(Json(serde_json::json!({})))
        }
        Err(err) => {
            if matches!(err, scanhub_core::CoordinatorError::DuplicateScan) {
                state.metrics.scans_duplicate_total.inc();
            }
            Err(err.into())
        }
    }
}
