use crate::auth::AuthenticatedActor;
use crate::error::ApiResult;
use crate::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use scanhub_core::reporter::ReportPayload;
use scanhub_core::CoordinatorError;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ReportRequest {
    version: String,
    #[allow(dead_code)]
    recipient: Option<String>,
    inspector_url: Option<String>,
    #[allow(dead_code)]
    additional_information: Option<String>,
    #[allow(dead_code)]
    use_email: Option<bool>,
}

/// `POST /report/{name}` — operator-triggered one-shot forward (spec §4.5).
///
/// Order is fixed: CAS `reported_at` first, then call the reporter, then roll back
/// the CAS on failure. A concurrent second call sees the CAS already taken and
/// returns `AlreadyReported` regardless of whether the first call's outbound send has
/// completed yet — this is what makes the report effective at most once.
pub async fn report(
    State(state): State<Arc<AppState>>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Path(name): Path<String>,
    Json(req): Json<ReportRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let existing = state
        .store
        .get_by_name_version(&name, &req.version)
        .await?
        .ok_or(CoordinatorError::NotFound)?;

    let reported = state
        .store
        .mark_reported(existing.scan_id, &actor, Utc::now())
        .await?;

    let inspector_url = req
        .inspector_url
        .unwrap_or_else(|| reported.inspector_url.clone().unwrap_or_default());

    let payload = ReportPayload {
        scan_id: reported.scan_id,
        name: reported.name.clone(),
        version: reported.version.clone(),
        score: reported.score.unwrap_or_default(),
        inspector_url,
        matched_rule_names: reported.matched_rules.clone(),
    };

    match state.reporter.send(&payload).await {
        Ok(()) => {
            state.metrics.reports_sent_total.inc();
            tracing::info!(
                event = "scan.reported",
                scan_id = %reported.scan_id,
                name = %reported.name,
                version = %reported.version,
                actor = %actor,
                "scan reported"
            );
            Ok(Json(serde_json::json!({})))
        }
        Err(err) => {
            state.metrics.reports_failed_total.inc();
            state.store.clear_reported(reported.scan_id).await?;
            Err(err.into())
        }
    }
}
