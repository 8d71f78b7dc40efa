//! The scanhub coordinator: dispatch engine, intake, submit/fail, query, reporter
//! and ruleset glue, and the HTTP surface over all of it.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod store;

use crate::config::CoordinatorConfig;
use crate::metrics::Metrics;
use anyhow::Context;
use axum::routing::{get, post, put};
use axum::Router;
use scanhub_core::auth::Hs256TokenVerifier;
use scanhub_core::reporter::HttpReporterClient;
use scanhub_core::ruleset::HttpRulesetProvider;
use scanhub_core::{ReporterClient, RulesetProvider, ScanStore, TokenVerifier};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct AppState {
    pub cfg: CoordinatorConfig,
    pub store: Arc<dyn ScanStore>,
    pub ruleset: Arc<dyn RulesetProvider>,
    pub reporter: Arc<dyn ReporterClient>,
    pub token_verifier: Arc<dyn TokenVerifier>,
    pub metrics: Arc<Metrics>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("cfg", &self.cfg)
            .field("store", &"<ScanStore>")
            .field("ruleset", &"<RulesetProvider>")
            .field("reporter", &"<ReporterClient>")
            .field("token_verifier", &"<TokenVerifier>")
            .finish()
    }
}

/// Builds production dependencies (real Postgres pool, real HTTP reporter and rules-repo
/// clients) from config. Tests construct `AppState` directly instead, swapping in fakes
/// for the reporter/ruleset/token-verifier seams while keeping a real Postgres-backed
/// store (spec §9, "Dynamic dispatch in the source → explicit interfaces").
pub async fn build_state(cfg: CoordinatorConfig) -> anyhow::Result<Arc<AppState>> {
    let pool = PgPoolOptions::new()
        .min_connections(cfg.db_pool_min_size)
        .max_connections(cfg.db_pool_max_size)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .connect(&cfg.database_url)
        .await
        .context("connect scan state db")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("run migrations")?;

    let store: Arc<dyn ScanStore> = Arc::new(crate::store::pg::PgScanStore::new(pool));

    let ruleset: Arc<dyn RulesetProvider> = Arc::new(
        HttpRulesetProvider::new(cfg.rules_repo_url.clone(), cfg.rules_repo_token.clone())
            .context("init ruleset provider")?,
    );

    let reporter: Arc<dyn ReporterClient> = Arc::new(
        HttpReporterClient::new(cfg.reporter_url.clone(), cfg.reporter_token.clone())
            .context("init reporter client")?,
    );

    let token_verifier: Arc<dyn TokenVerifier> = Arc::new(Hs256TokenVerifier::new(
        cfg.auth_domain.clone(),
        cfg.auth_audience.clone(),
        cfg.auth_hs256_secret.as_bytes(),
    ));

    let metrics = Arc::new(Metrics::new().context("init metrics registry")?);

    let state = Arc::new(AppState {
        cfg,
        store,
        ruleset,
        reporter,
        token_verifier,
        metrics,
    });

    init_ruleset(&state).await?;
    Ok(state)
}

/// Refreshes the ruleset snapshot and reconciles the rules table. Called once at
/// startup and again whenever `POST /rules/update` fires.
pub async fn init_ruleset(state: &Arc<AppState>) -> anyhow::Result<()> {
    state
        .ruleset
        .refresh()
        .await
        .context("initial ruleset refresh")?;
    let snapshot = state.ruleset.current();
    state
        .store
        .reconcile_rules(&snapshot.rule_names)
        .await
        .context("reconcile rules on startup")?;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/job", post(handlers::dispatch::dispatch))
        .route("/package", post(handlers::intake::intake))
        .route("/package", put(handlers::submit::submit))
        .route("/package/fail", post(handlers::submit::fail))
        .route("/package", get(handlers::query::list))
        .route("/report/:name", post(handlers::report::report))
        .route("/rules/update", post(handlers::rules::update))
        .route("/metrics", get(handlers::metrics::metrics))
        .with_state(state)
}

/// A running coordinator bound to a concrete address, with graceful shutdown.
///
/// Grounded in the teacher's dispatcher server lifecycle: a `watch` channel signals
/// shutdown to the serve future, and `shutdown` joins the background task so callers
/// (including tests) know the listener is actually closed before returning.
pub struct CoordinatorServer {
    pub addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<anyhow::Result<()>>,
}

impl CoordinatorServer {
    pub async fn start(state: Arc<AppState>, bind: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("bind coordinator to {bind}"))?;
        let addr = listener.local_addr().context("coordinator local_addr")?;

        let app = router(state);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(serve(listener, app, shutdown_rx));

        Ok(Self {
            addr,
            shutdown_tx,
            join,
        })
    }

    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.join.await.context("join coordinator task")??;
        Ok(())
    }
}

async fn serve(
    listener: TcpListener,
    app: Router,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .context("coordinator serve")?;
    Ok(())
}
