use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of a scan (spec §3, §4.2).
///
/// Renders on the wire and in Postgres (`scan_status` enum type) as the lowercase
/// variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "scan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Queued,
    Pending,
    Finished,
    Failed,
}

impl ScanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Pending => "pending",
            ScanStatus::Finished => "finished",
            ScanStatus::Failed => "failed",
        }
    }
}

/// The central entity: one inspection task for a `(name, version)` pair (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub scan_id: Uuid,
    pub name: String,
    pub version: String,
    pub status: ScanStatus,
    pub score: Option<i64>,
    pub inspector_url: Option<String>,
    pub commit_hash: Option<String>,

    pub queued_at: DateTime<Utc>,
    pub pending_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub reported_at: Option<DateTime<Utc>>,

    pub queued_by: String,
    pub pending_by: Option<String>,
    pub finished_by: Option<String>,
    pub reported_by: Option<String>,

    pub fail_reason: Option<String>,

    /// Opaque, worker-reported per-file detail blob (spec §9, "Files blob"). Never
    /// interpreted by the coordinator beyond "well-formed JSON".
    pub files: Option<Value>,

    pub download_urls: Vec<String>,

    /// Rule names that matched (only populated for FINISHED scans, spec §3).
    pub matched_rules: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_serde() {
        let json = serde_json::to_string(&ScanStatus::Pending).unwrap();
        assert_eq!(json, "\"pending\"");
        let back: ScanStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ScanStatus::Pending);
    }
}
