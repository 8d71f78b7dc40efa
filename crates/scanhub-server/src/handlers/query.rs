use crate::auth::AuthenticatedActor;
use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use scanhub_core::pagination::Cursor;
use scanhub_core::scan::ScanStatus;
use scanhub_core::store::{ListFilters, Pagination};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<String>,
    name: Option<String>,
    version: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    cursor: Option<String>,
    limit: Option<u32>,
}

#[derive(Debug, serde::Serialize)]
pub struct ListResponse {
    scans: Vec<scanhub_core::Scan>,
    next_cursor: Option<String>,
}

/// `GET /package` — filtered, cursor-paginated listing (spec §4.7).
pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthenticatedActor(_actor): AuthenticatedActor,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    let status = match q.status.as_deref() {
        None => None,
        Some("queued") => Some(ScanStatus::Queued),
        Some("pending") => Some(ScanStatus::Pending),
        Some("finished") => Some(ScanStatus::Finished),
        Some("failed") => Some(ScanStatus::Failed),
        Some(other) => return Err(ApiError::bad_request(format!("unknown status `{other}`"))),
    };

    let cursor = match q.cursor.as_deref() {
        None => None,
        Some(raw) => Some(Cursor::decode(raw).ok_or_else(|| ApiError::bad_request("invalid cursor"))?),
    };

    let limit = q
        .limit
        .unwrap_or(state.cfg.default_page_size)
        .min(state.cfg.max_page_size);

    let page = state
        .store
        .list(
            ListFilters {
                status,
                name: q.name,
                version: q.version,
                since: q.since,
                until: q.until,
            },
            Pagination { cursor, limit },
        )
        .await?;

    Ok(Json(ListResponse {
        scans: page.items,
        next_cursor: page.next_cursor.map(Cursor::encode),
    }))
}
