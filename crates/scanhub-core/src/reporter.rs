use crate::error::{CoordinatorError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Outbound payload for a scan that crossed the reporting threshold (spec §4.5).
#[derive(Debug, Clone, Serialize)]
pub struct ReportPayload {
    pub scan_id: uuid::Uuid,
    pub name: String,
    pub version: String,
    pub score: i64,
    pub inspector_url: String,
    pub matched_rule_names: Vec<String>,
}

/// The downstream system that receives reports of malicious packages (spec §4.5).
///
/// A failed `send` must not be treated as fatal to the submit request that triggered
/// it: the coordinator logs the failure and leaves the scan `reported_at` cleared so a
/// later retry (manual or automatic) can pick it up, per spec §9 "auto-threshold"
/// design note.
#[async_trait]
pub trait ReporterClient: Send + Sync {
    async fn send(&self, payload: &ReportPayload) -> Result<()>;
}

/// reqwest-backed client for the configured reporter endpoint.
pub struct HttpReporterClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpReporterClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| CoordinatorError::Other(anyhow::anyhow!(err)))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl ReporterClient for HttpReporterClient {
    async fn send(&self, payload: &ReportPayload) -> Result<()> {
        let url = format!("{}/report", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(payload)
            .send()
            .await
            .map_err(|err| CoordinatorError::ReporterFailure(anyhow::anyhow!(err)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CoordinatorError::ReporterFailure(anyhow::anyhow!(
                "reporter responded {status}: {body}"
            )));
        }
        Ok(())
    }
}
