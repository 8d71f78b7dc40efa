use crate::auth::AuthenticatedActor;
use crate::error::ApiResult;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    name: String,
    version: String,
    distributions: Vec<String>,
    hash: String,
    rules: Vec<String>,
}

/// `POST /job` — dispatch one scan (spec §4.2, §6).
///
/// Selection, lease stamping, and ruleset binding happen atomically in the store;
/// this handler only supplies `now`/the lease cutoff and shapes the response.
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    AuthenticatedActor(actor): AuthenticatedActor,
) -> ApiResult<Response> {
    let now = Utc::now();
    let lease_expiry_cutoff = now - chrono::Duration::seconds(state.cfg.job_timeout_secs);
    let snapshot = state.ruleset.current();

    let claimed = state
        .store
        .claim_next(
            &actor,
            now,
            lease_expiry_cutoff,
            &snapshot.commit_hash,
            &snapshot.rule_names,
        )
        .await?;

    let Some(claimed) = claimed else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    state.metrics.scans_dispatched_total.inc();
    if claimed.was_reclaimed {
        state.metrics.scans_reclaimed_total.inc();
    }
    tracing::info!(
        event = "scan.dispatched",
        scan_id = %claimed.scan_id,
        name = %claimed.name,
        version = %claimed.version,
        actor = %actor,
        "scan dispatched"
    );

    Ok(Json(DispatchResponse {
        name: claimed.name,
        version: claimed.version,
        distributions: claimed.download_urls,
        hash: claimed.commit_hash,
        rules: claimed.rule_names,
    })
    .into_response())
}
