use crate::error::ApiError;
use crate::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use scanhub_core::Actor;
use std::sync::Arc;

/// Extracts and verifies the caller's bearer token, yielding the actor identity
/// derived from its subject claim (spec §6, "Authentication").
///
/// `GET /metrics` does not use this extractor; every other route does.
pub struct AuthenticatedActor(pub Actor);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("expected bearer token"))?;

        let actor = state.token_verifier.verify(token).map_err(|err| {
            tracing::warn!(error = %err, "bearer token rejected");
            ApiError::unauthorized("invalid bearer token")
        })?;

        Ok(AuthenticatedActor(actor))
    }
}
