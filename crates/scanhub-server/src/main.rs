use anyhow::Context;
use scanhub_server::config::CoordinatorConfig;
use scanhub_server::{build_state, CoordinatorServer};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,scanhub_server=debug")),
        )
        .init();

    let cfg = CoordinatorConfig::from_env()?;
    let addr: SocketAddr = cfg.bind_addr.parse().context("parse BIND_ADDR")?;

    let state = build_state(cfg).await.context("build coordinator state")?;
    let server = CoordinatorServer::start(state, addr).await?;
    tracing::info!(addr = %server.addr, event = "coordinator_listening", "scanhub coordinator listening");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    tracing::info!(event = "coordinator_shutdown", "scanhub coordinator shutting down");
    server.shutdown().await?;
    Ok(())
}
