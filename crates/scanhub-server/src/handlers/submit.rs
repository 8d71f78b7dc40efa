use crate::auth::AuthenticatedActor;
use crate::error::ApiResult;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use chrono::Utc;
use scanhub_core::reporter::ReportPayload;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    name: String,
    version: String,
    score: i64,
    inspector_url: String,
    rules: Vec<String>,
    #[allow(dead_code)]
    commit: Option<String>,
    files: serde_json::Value,
}

/// `PUT /package` — submit a worker's result (spec §4.4).
///
/// When the submitted score crosses `REPORT_SCORE_THRESHOLD`, the scan is reported in
/// the same request using the actor `"auto-threshold"` (spec §9, "Score-threshold
/// auto-report"). A reporter failure here is logged, not surfaced: the submit itself
/// already succeeded and the scan remains eligible for a later manual report.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let existing = state
        .store
        .get_by_name_version(&req.name, &req.version)
        .await?
        .ok_or(scanhub_core::CoordinatorError::NotFound)?;

    let scan = state
        .store
        .submit(
            existing.scan_id,
            &actor,
            req.score,
            &req.inspector_url,
            &req.rules,
            req.files,
        )
        .await?;

    state.metrics.scans_submitted_total.inc();
    state.metrics.scans_in_flight.dec();
    observe_dispatch_to_finish(&state, &scan);
    tracing::info!(
        event = "scan.finished",
        scan_id = %scan.scan_id,
        name = %scan.name,
        version = %scan.version,
        actor = %actor,
        score = scan.score.unwrap_or_default(),
        "scan finished"
    );

    if let Some(threshold) = state.cfg.report_score_threshold {
        if scan.score.unwrap_or(0) >= threshold {
            auto_report(&state, &scan).await;
        }
    }

    Ok(Json(serde_json::json!({})))
}

/// Records dispatch-to-finish latency; a no-op if the scan never went through
/// `pending` (shouldn't happen, since both terminal transitions require it).
fn observe_dispatch_to_finish(state: &Arc<AppState>, scan: &scanhub_core::Scan) {
    let (Some(pending_at), Some(finished_at)) = (scan.pending_at, scan.finished_at) else {
        return;
    };
    let seconds = (finished_at - pending_at).num_milliseconds() as f64 / 1000.0;
    state
        .metrics
        .scans_dispatch_to_finish_seconds
        .observe(seconds.max(0.0));
}

async fn auto_report(state: &Arc<AppState>, scan: &scanhub_core::Scan) {
    const AUTO_REPORT_ACTOR: &str = "auto-threshold";

    let reported = state
        .store
        .mark_reported(scan.scan_id, AUTO_REPORT_ACTOR, Utc::now())
        .await;

    let reported = match reported {
        Ok(reported) => reported,
        Err(err) => {
            tracing::warn!(error = %err, scan_id = %scan.scan_id, "auto-report CAS failed");
            return;
        }
    };

    let payload = ReportPayload {
        scan_id: reported.scan_id,
        name: reported.name.clone(),
        version: reported.version.clone(),
        score: reported.score.unwrap_or_default(),
        inspector_url: reported.inspector_url.clone().unwrap_or_default(),
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
                actor = AUTO_REPORT_ACTOR,
                "scan reported"
            );
        }
        Err(err) => {
            tracing::warn!(error = %err, scan_id = %scan.scan_id, "auto-report send failed, rolling back");
            state.metrics.reports_failed_total.inc();
            if let Err(rollback_err) = state.store.clear_reported(scan.scan_id).await {
                tracing::error!(error = %rollback_err, scan_id = %scan.scan_id, "auto-report rollback failed");
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    name: String,
    version: String,
    reason: String,
}

/// `POST /package/fail` — worker reports a failure (spec §4.4).
pub async fn fail(
    State(state): State<Arc<AppState>>,
    AuthenticatedActor(actor): AuthenticatedActor,
    Json(req): Json<FailRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let existing = state
        .store
        .get_by_name_version(&req.name, &req.version)
        .await?
        .ok_or(scanhub_core::CoordinatorError::NotFound)?;

    let scan = state
        .store
        .fail(existing.scan_id, &actor, &req.reason)
        .await?;

    state.metrics.scans_failed_total.inc();
    state.metrics.scans_in_flight.dec();
    observe_dispatch_to_finish(&state, &scan);
    tracing::info!(
        event = "scan.failed",
        scan_id = %scan.scan_id,
        name = %scan.name,
        version = %scan.version,
        actor = %actor,
        reason = %req.reason,
        "scan failed"
    );
    Ok(Json(serde_json::json!({})))
}
