use crate::error::Result;
use crate::scan::{Scan, ScanStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// What dispatch hands back to the caller (spec §4.2 step 6).
#[derive(Debug, Clone)]
pub struct DispatchedScan {
    pub scan_id: Uuid,
    pub name: String,
    pub version: String,
    pub download_urls: Vec<String>,
    pub commit_hash: String,
    pub rule_names: Vec<String>,
    /// `true` when this scan was already PENDING and reclaimed after its lease
    /// expired, rather than a fresh QUEUED scan (spec §4.2).
    pub was_reclaimed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListFilters {
    pub status: Option<ScanStatus>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Pagination {
    pub cursor: Option<crate::pagination::Cursor>,
    pub limit: u32,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<crate::pagination::Cursor>,
}

/// Persistence boundary for the scan lifecycle (spec §4.1).
///
/// Implementations must run each operation's side effects inside a single
/// transaction; callers never see a partially-applied state transition.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn insert_scan(
        &self,
        name: &str,
        version: &str,
        urls: &[String],
        actor: &str,
    ) -> Result<Uuid>;

    /// Atomically claim the next eligible scan (spec §4.2). `now` and
    /// `lease_expiry_cutoff` are passed in rather than computed in the store so the
    /// selection is deterministic under test.
    async fn claim_next(
        &self,
        actor: &str,
        now: DateTime<Utc>,
        lease_expiry_cutoff: DateTime<Utc>,
        ruleset_commit_hash: &str,
        ruleset_rule_names: &[String],
    ) -> Result<Option<DispatchedScan>>;

    async fn submit(
        &self,
        scan_id: Uuid,
        actor: &str,
        score: i64,
        inspector_url: &str,
        matched_rule_names: &[String],
        files: Value,
    ) -> Result<Scan>;

    async fn fail(&self, scan_id: Uuid, actor: &str, reason: &str) -> Result<Scan>;

    async fn mark_reported(&self, scan_id: Uuid, actor: &str, now: DateTime<Utc>) -> Result<Scan>;

    /// Clears `reported_at`/`reported_by` after a failed outbound reporter call
    /// (spec §4.5 step 4). Only valid on a scan the caller just CAS'd.
    async fn clear_reported(&self, scan_id: Uuid) -> Result<()>;

    async fn get_by_name_version(&self, name: &str, version: &str) -> Result<Option<Scan>>;

    async fn get(&self, scan_id: Uuid) -> Result<Option<Scan>>;

    async fn list(&self, filters: ListFilters, pagination: Pagination) -> Result<Page<Scan>>;

    /// Reconciles the `rules` table to match a fresh ruleset snapshot (spec §4.6):
    /// inserts names not yet known, deletes names no longer present that have no
    /// scan referencing them, and leaves referenced-but-removed names as historical.
    async fn reconcile_rules(&self, rule_names: &[String]) -> Result<()>;
}
