use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use scanhub_core::auth::Hs256TokenVerifier;
use scanhub_core::error::Result as CoreResult;
use scanhub_core::reporter::{ReportPayload, ReporterClient};
use scanhub_core::ruleset::RulesetSnapshot;
use scanhub_core::RulesetProvider;
use scanhub_server::config::CoordinatorConfig;
use scanhub_server::store::pg::PgScanStore;
use scanhub_server::{AppState, CoordinatorServer};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once, OnceLock};

const AUTH_SECRET: &[u8] = b"test-secret";
const AUTH_ISSUER: &str = "scanhub-tests";
const AUTH_AUDIENCE: &str = "scanhub-api";

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

async fn integration_lock() -> tokio::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<tokio::sync::Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| tokio::sync::Mutex::new(()))
        .lock()
        .await
}

struct FakeRulesetProvider {
    snapshot: RulesetSnapshot,
}

#[async_trait]
impl RulesetProvider for FakeRulesetProvider {
    fn current(&self) -> Arc<RulesetSnapshot> {
        Arc::new(self.snapshot.clone())
    }

    async fn refresh(&self) -> CoreResult<Arc<RulesetSnapshot>> {
        Ok(Arc::new(self.snapshot.clone()))
    }
}

struct FakeReporterClient {
    should_fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeReporterClient {
    fn new(should_fail: bool) -> Self {
        Self {
            should_fail: AtomicBool::new(should_fail),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReporterClient for FakeReporterClient {
    async fn send(&self, _payload: &ReportPayload) -> CoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(scanhub_core::CoordinatorError::ReporterFailure(anyhow::anyhow!(
                "simulated reporter outage"
            )));
        }
        Ok(())
    }
}

/// Mints a bearer token accepted by the test deployment's `Hs256TokenVerifier`.
fn mint_token(sub: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Claims {
        sub: String,
        iss: String,
        aud: String,
        exp: usize,
    }

    let claims = Claims {
        sub: sub.to_string(),
        iss: AUTH_ISSUER.to_string(),
        aud: AUTH_AUDIENCE.to_string(),
        exp: (Utc::now().timestamp() + 300) as usize,
    };
    encode(
        &Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(AUTH_SECRET),
    )
    .unwrap()
}

async fn test_config() -> anyhow::Result<CoordinatorConfig> {
    init_tracing();
    let mut cfg = CoordinatorConfig::from_env().context("load coordinator config")?;
    cfg.auth_domain = AUTH_ISSUER.to_string();
    cfg.auth_audience = AUTH_AUDIENCE.to_string();
    cfg.job_timeout_secs = 1;
    cfg.report_score_threshold = None; // tests opt in explicitly where needed
    Ok(cfg)
}

async fn truncate_all(database_url: &str) -> anyhow::Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await
        .context("connect for cleanup")?;
    sqlx::migrate!("./migrations").run(&pool).await.context("run migrations")?;
    sqlx::query("TRUNCATE scans, rules, package_rules, download_urls RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .context("truncate tables")?;
    Ok(())
}

async fn spawn_server(
    cfg: CoordinatorConfig,
    ruleset: RulesetSnapshot,
    reporter: Arc<FakeReporterClient>,
) -> anyhow::Result<CoordinatorServer> {
    truncate_all(&cfg.database_url).await?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await
        .context("connect scan state db")?;

    let store = Arc::new(PgScanStore::new(pool));
    let ruleset_provider = Arc::new(FakeRulesetProvider { snapshot: ruleset });
    let token_verifier = Arc::new(Hs256TokenVerifier::new(
        cfg.auth_domain.clone(),
        cfg.auth_audience.clone(),
        AUTH_SECRET,
    ));
    let metrics = Arc::new(scanhub_server::metrics::Metrics::new()?);

    let state = Arc::new(AppState {
        cfg,
        store,
        ruleset: ruleset_provider,
        reporter,
        token_verifier,
        metrics,
    });

    scanhub_server::init_ruleset(&state).await?;

    CoordinatorServer::start(state, "127.0.0.1:0".parse::<SocketAddr>().unwrap()).await
}

fn default_snapshot() -> RulesetSnapshot {
    RulesetSnapshot {
        commit_hash: "abc123".to_string(),
        rule_names: vec!["r1".to_string(), "r2".to_string()],
    }
}

#[tokio::test]
async fn s1_intake_dispatch_submit_query_round_trip() -> anyhow::Result<()> {
    let _lock = integration_lock().await;
    let cfg = test_config().await?;
    let reporter = Arc::new(FakeReporterClient::new(false));
    let server = spawn_server(cfg, default_snapshot(), reporter).await?;
    let base = format!("http://{}", server.addr);
    let client = reqwest::Client::new();
    let worker_token = mint_token("w1");

    let resp = client
        .post(format!("{base}/package"))
        .bearer_auth(&worker_token)
        .json(&serde_json::json!({
            "name": "left-pad",
            "version": "1.0.0",
            "distributions": ["https://example.com/left-pad-1.0.0.tar.gz"],
        }))
        .send()
        .await?;
    anyhow::ensure!(resp.status().is_success(), "intake failed: {}", resp.status());

    let dispatched: serde_json::Value = client
        .post(format!("{base}/job"))
        .bearer_auth(&worker_token)
        .json(&serde_json::json!({}))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    anyhow::ensure!(dispatched["name"] == "left-pad");
    anyhow::ensure!(dispatched["hash"] == "abc123");

    let resp = client
        .put(format!("{base}/package"))
        .bearer_auth(&worker_token)
        .json(&serde_json::json!({
            "name": "left-pad",
            "version": "1.0.0",
            "score": 10,
            "inspector_url": "https://inspector.example/1",
            "rules": ["r1"],
            "commit": "abc123",
            "files": {},
        }))
        .send()
        .await?;
    anyhow::ensure!(resp.status().is_success(), "submit failed: {}", resp.status());

    let listed: serde_json::Value = client
        .get(format!("{base}/package"))
        .bearer_auth(&worker_token)
        .query(&[("name", "left-pad"), ("version", "1.0.0")])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let scans = listed["scans"].as_array().context("scans array")?;
    anyhow::ensure!(scans.len() == 1, "expected one scan, got {}", scans.len());
    anyhow::ensure!(scans[0]["status"] == "finished");
    anyhow::ensure!(scans[0]["score"] == 10);
    anyhow::ensure!(scans[0]["matched_rules"] == serde_json::json!(["r1"]));

    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn s2_duplicate_intake_is_rejected() -> anyhow::Result<()> {
    let _lock = integration_lock().await;
    let cfg = test_config().await?;
    let reporter = Arc::new(FakeReporterClient::new(false));
    let server = spawn_server(cfg, default_snapshot(), reporter).await?;
    let base = format!("http://{}", server.addr);
    let client = reqwest::Client::new();
    let token = mint_token("discovery");

    let body = serde_json::json!({
        "name": "left-pad",
        "version": "1.0.0",
        "distributions": ["https://example.com/left-pad-1.0.0.tar.gz"],
    });

    let first = client
        .post(format!("{base}/package"))
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await?;
    anyhow::ensure!(first.status().is_success());

    let second = client
        .post(format!("{base}/package"))
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await?;
    anyhow::ensure!(
        second.status() == reqwest::StatusCode::CONFLICT,
        "expected 409, got {}",
        second.status()
    );

    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn s3_lease_expiry_allows_reclaim_and_rejects_stale_submit() -> anyhow::Result<()> {
    let _lock = integration_lock().await;
    let cfg = test_config().await?; // job_timeout_secs = 1
    let reporter = Arc::new(FakeReporterClient::new(false));
    let server = spawn_server(cfg, default_snapshot(), reporter).await?;
    let base = format!("http://{}", server.addr);
    let client = reqwest::Client::new();
    let w1 = mint_token("w1");
    let w2 = mint_token("w2");

    client
        .post(format!("{base}/package"))
        .bearer_auth(&w1)
        .json(&serde_json::json!({
            "name": "reclaim-me",
            "version": "2.0.0",
            "distributions": ["https://example.com/reclaim-me-2.0.0.tar.gz"],
        }))
        .send()
        .await?
        .error_for_status()?;

    let first_dispatch: serde_json::Value = client
        .post(format!("{base}/job"))
        .bearer_auth(&w1)
        .json(&serde_json::json!({}))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    anyhow::ensure!(first_dispatch["name"] == "reclaim-me");

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let second_dispatch: serde_json::Value = client
        .post(format!("{base}/job"))
        .bearer_auth(&w2)
        .json(&serde_json::json!({}))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    anyhow::ensure!(second_dispatch["name"] == "reclaim-me");

    let stale_submit = client
        .put(format!("{base}/package"))
        .bearer_auth(&w1)
        .json(&serde_json::json!({
            "name": "reclaim-me",
            "version": "2.0.0",
            "score": 5,
            "inspector_url": "https://inspector.example/stale",
            "rules": [],
            "commit": "abc123",
            "files": {},
        }))
        .send()
        .await?;
    anyhow::ensure!(
        stale_submit.status() == reqwest::StatusCode::CONFLICT,
        "expected w1's stale submit to be rejected, got {}",
        stale_submit.status()
    );

    let fresh_submit = client
        .put(format!("{base}/package"))
        .bearer_auth(&w2)
        .json(&serde_json::json!({
            "name": "reclaim-me",
            "version": "2.0.0",
            "score": 5,
            "inspector_url": "https://inspector.example/fresh",
            "rules": [],
            "commit": "abc123",
            "files": {},
        }))
        .send()
        .await?;
    anyhow::ensure!(fresh_submit.status().is_success());

    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn s4_concurrent_dispatch_on_single_scan_yields_one_winner() -> anyhow::Result<()> {
    let _lock = integration_lock().await;
    let cfg = test_config().await?;
    let reporter = Arc::new(FakeReporterClient::new(false));
    let server = spawn_server(cfg, default_snapshot(), reporter).await?;
    let base = format!("http://{}", server.addr);
    let client = reqwest::Client::new();
    let token = mint_token("w1");

    client
        .post(format!("{base}/package"))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "name": "solo",
            "version": "1.0.0",
            "distributions": ["https://example.com/solo-1.0.0.tar.gz"],
        }))
        .send()
        .await?
        .error_for_status()?;

    let (r1, r2) = tokio::join!(
        client
            .post(format!("{base}/job"))
            .bearer_auth(&token)
            .json(&serde_json::json!({}))
            .send(),
        client
            .post(format!("{base}/job"))
            .bearer_auth(&token)
            .json(&serde_json::json!({}))
            .send()
    );

    let s1 = r1?.status();
    let s2 = r2?.status();
    let won = [s1, s2].iter().filter(|s| **s == reqwest::StatusCode::OK).count();
    let empty = [s1, s2]
        .iter()
        .filter(|s| **s == reqwest::StatusCode::NO_CONTENT)
        .count();

    anyhow::ensure!(
        won == 1 && empty == 1,
        "expected exactly one 200 and one 204, got {s1} and {s2}"
    );

    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn s5_unknown_rule_is_rejected_and_scan_remains_claimable() -> anyhow::Result<()> {
    let _lock = integration_lock().await;
    let cfg = test_config().await?;
    let reporter = Arc::new(FakeReporterClient::new(false));
    let server = spawn_server(cfg, default_snapshot(), reporter).await?;
    let base = format!("http://{}", server.addr);
    let client = reqwest::Client::new();
    let token = mint_token("w1");

    client
        .post(format!("{base}/package"))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "name": "bad-rule",
            "version": "1.0.0",
            "distributions": ["https://example.com/bad-rule-1.0.0.tar.gz"],
        }))
        .send()
        .await?
        .error_for_status()?;

    client
        .post(format!("{base}/job"))
        .bearer_auth(&token)
        .json(&serde_json::json!({}))
        .send()
        .await?
        .error_for_status()?;

    let resp = client
        .put(format!("{base}/package"))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "name": "bad-rule",
            "version": "1.0.0",
            "score": 1,
            "inspector_url": "https://inspector.example/1",
            "rules": ["ruleZ"],
            "commit": "abc123",
            "files": {},
        }))
        .send()
        .await?;
    anyhow::ensure!(
        resp.status() == reqwest::StatusCode::BAD_REQUEST,
        "expected 400 for unknown rule, got {}",
        resp.status()
    );

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;

    let redispatched: serde_json::Value = client
        .post(format!("{base}/job"))
        .bearer_auth(&token)
        .json(&serde_json::json!({}))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    anyhow::ensure!(redispatched["name"] == "bad-rule");

    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn s6_report_is_effective_at_most_once_and_rolls_back_on_failure() -> anyhow::Result<()> {
    let _lock = integration_lock().await;
    let cfg = test_config().await?;
    let reporter = Arc::new(FakeReporterClient::new(true));
    let server = spawn_server(cfg, default_snapshot(), reporter.clone()).await?;
    let base = format!("http://{}", server.addr);
    let client = reqwest::Client::new();
    let token = mint_token("w1");

    client
        .post(format!("{base}/package"))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "name": "reported-pkg",
            "version": "1.0.0",
            "distributions": ["https://example.com/reported-pkg-1.0.0.tar.gz"],
        }))
        .send()
        .await?
        .error_for_status()?;

    client
        .post(format!("{base}/job"))
        .bearer_auth(&token)
        .json(&serde_json::json!({}))
        .send()
        .await?
        .error_for_status()?;

    client
        .put(format!("{base}/package"))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "name": "reported-pkg",
            "version": "1.0.0",
            "score": 99,
            "inspector_url": "https://inspector.example/1",
            "rules": [],
            "commit": "abc123",
            "files": {},
        }))
        .send()
        .await?
        .error_for_status()?;

    let failing_report = client
        .post(format!("{base}/report/reported-pkg"))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "version": "1.0.0" }))
        .send()
        .await?;
    anyhow::ensure!(
        failing_report.status() == reqwest::StatusCode::BAD_GATEWAY,
        "expected the simulated reporter outage to surface as 502, got {}",
        failing_report.status()
    );

    reporter.should_fail.store(false, Ordering::SeqCst);

    let first_report = client
        .post(format!("{base}/report/reported-pkg"))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "version": "1.0.0" }))
        .send()
        .await?;
    anyhow::ensure!(first_report.status().is_success());

    let second_report = client
        .post(format!("{base}/report/reported-pkg"))
        .bearer_auth(&token)
        .json(&serde_json::json!({ "version": "1.0.0" }))
        .send()
        .await?;
    anyhow::ensure!(
        second_report.status() == reqwest::StatusCode::CONFLICT,
        "expected the second report to be AlreadyReported (409), got {}",
        second_report.status()
    );

    // failing_report calls the reporter once (rejected), first_report once more
    // (accepted); second_report is rejected by the CAS before ever reaching the
    // reporter client.
    anyhow::ensure!(reporter.calls() == 2, "expected 2 reporter calls, got {}", reporter.calls());

    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn missing_bearer_token_is_rejected() -> anyhow::Result<()> {
    let _lock = integration_lock().await;
    let cfg = test_config().await?;
    let reporter = Arc::new(FakeReporterClient::new(false));
    let server = spawn_server(cfg, default_snapshot(), reporter).await?;
    let base = format!("http://{}", server.addr);
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/job"))
        .json(&serde_json::json!({}))
        .send()
        .await?;
    anyhow::ensure!(resp.status() == reqwest::StatusCode::UNAUTHORIZED);

    server.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn metrics_endpoint_requires_no_auth() -> anyhow::Result<()> {
    let _lock = integration_lock().await;
    let cfg = test_config().await?;
    let reporter = Arc::new(FakeReporterClient::new(false));
    let server = spawn_server(cfg, default_snapshot(), reporter).await?;
    let base = format!("http://{}", server.addr);
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/metrics")).send().await?;
    anyhow::ensure!(resp.status().is_success());
    let body = resp.text().await?;
    anyhow::ensure!(body.contains("scanhub_scans_intake_total"));

    server.shutdown().await?;
    Ok(())
}

