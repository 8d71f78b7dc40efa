use crate::error::{CoordinatorError, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// Rule names bound to a given rules-repo commit (spec §4.6).
///
/// A scan is dispatched with the snapshot active at claim time and carries that
/// `commit_hash`/`rule_names` pair through to submission (spec §3, §4.2 step 6);
/// later snapshot refreshes never retroactively change a scan already in flight.
#[derive(Debug, Clone, Default)]
pub struct RulesetSnapshot {
    pub commit_hash: String,
    pub rule_names: Vec<String>,
}

/// Read path for the currently active ruleset (spec §4.6).
///
/// Backed by `ArcSwap` in production so dispatch reads never block on a refresh in
/// progress; a refresh swaps in a wholly new snapshot rather than mutating in place.
#[async_trait]
pub trait RulesetProvider: Send + Sync {
    fn current(&self) -> Arc<RulesetSnapshot>;

    async fn refresh(&self) -> Result<Arc<RulesetSnapshot>>;
}

#[derive(Debug, Deserialize)]
struct RulesRepoResponse {
    commit_hash: String,
    rules: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    name: String,
}

/// Polls an external rules repository over HTTP and caches the latest snapshot.
pub struct HttpRulesetProvider {
    http: reqwest::Client,
    repo_url: String,
    token: String,
    snapshot: ArcSwap<RulesetSnapshot>,
}

impl HttpRulesetProvider {
    pub fn new(repo_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| CoordinatorError::Other(anyhow::anyhow!(err)))?;
        Ok(Self {
            http,
            repo_url: repo_url.into(),
            token: token.into(),
            snapshot: ArcSwap::from_pointee(RulesetSnapshot::default()),
        })
    }
}

#[async_trait]
impl RulesetProvider for HttpRulesetProvider {
    fn current(&self) -> Arc<RulesetSnapshot> {
        self.snapshot.load_full()
    }

    async fn refresh(&self) -> Result<Arc<RulesetSnapshot>> {
        let resp = self
            .http
            .get(&self.repo_url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| CoordinatorError::RulesetStale(anyhow::anyhow!(err)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(CoordinatorError::RulesetStale(anyhow::anyhow!(
                "rules repo responded {status}"
            )));
        }

        let body: RulesRepoResponse = resp
            .json()
            .await
            .map_err(|err| CoordinatorError::RulesetStale(anyhow::anyhow!(err)))?;

        let snapshot = Arc::new(RulesetSnapshot {
            commit_hash: body.commit_hash,
            rule_names: body.rules.into_iter().map(|r| r.name).collect(),
        });
        tracing::info!(
            commit_hash = %snapshot.commit_hash,
            rule_count = snapshot.rule_names.len(),
            "ruleset snapshot refreshed"
        );
        self.snapshot.store(snapshot.clone());
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_empty() {
        let snap = RulesetSnapshot::default();
        assert!(snap.commit_hash.is_empty());
        assert!(snap.rule_names.is_empty());
    }

    struct FakeProvider {
        snapshot: ArcSwap<RulesetSnapshot>,
    }

    #[async_trait]
    impl RulesetProvider for FakeProvider {
        fn current(&self) -> Arc<RulesetSnapshot> {
            self.snapshot.load_full()
        }

        async fn refresh(&self) -> Result<Arc<RulesetSnapshot>> {
            Ok(self.snapshot.load_full())
        }
    }

    #[tokio::test]
    async fn current_reflects_latest_stored_snapshot() {
        let provider = FakeProvider {
            snapshot: ArcSwap::from_pointee(RulesetSnapshot {
                commit_hash: "abc123".into(),
                rule_names: vec!["eval-base64".into()],
            }),
        };
        assert_eq!(provider.current().commit_hash, "abc123");
        let refreshed = provider.refresh().await.unwrap();
        assert_eq!(refreshed.rule_names, vec!["eval-base64".to_string()]);
    }
}
