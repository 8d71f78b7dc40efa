use crate::auth::AuthenticatedActor;
use crate::error::ApiResult;
use crate::AppState;
use axum::extract::State;
use axum::Json;
use scanhub_core::CoordinatorError;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct RulesUpdateResponse {
    commit: String,
    rules: Vec<String>,
}

/// `POST /rules/update` — admin-triggered ruleset refresh (spec §4.6).
///
/// A failed refresh keeps serving the currently cached snapshot: logged, never
/// surfaced to the caller as an error (spec §7).
pub async fn update(
    State(state): State<Arc<AppState>>,
    AuthenticatedActor(_actor): AuthenticatedActor,
) -> ApiResult<Json<RulesUpdateResponse>> {
    let snapshot = match state.ruleset.refresh().await {
        Ok(snapshot) => {
            state.store.reconcile_rules(&snapshot.rule_names).await?;
            snapshot
        }
        Err(CoordinatorError::RulesetStale(source)) => {
            tracing::warn!(error = %source, "ruleset refresh failed, serving stale snapshot");
            state.ruleset.current()
        }
        Err(err) => return Err(err.into()),
    };

    Ok(Json(RulesUpdateResponse {
        commit: snapshot.commit_hash.clone(),
        rules: snapshot.rule_names.clone(),
    }))
}
