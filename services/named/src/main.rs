//! named server
//!
//! Serves `POST /configure` for the zone derived from the cluster name.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use named::config::{http_client, Config};
use named::server::{self, AppState};
use named::transfer::{HostKeyPolicy, SshTransfer};
use named::{Metrics, Provisioner};

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .json()
        .init();

    let config = Config::parse();
    let provisioner_config = config.provisioner_config()?;

    info!(
        fasit_url = %config.fasit_url,
        cluster = %config.cluster_name,
        zone = %provisioner_config.zone,
        version = server::VERSION,
        revision = server::revision(),
        "Starting named"
    );

    let host_key_policy = config.host_key_policy();
    if host_key_policy == HostKeyPolicy::AcceptAny {
        warn!("SSH host key verification is disabled");
    }

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);
    let provisioner = Provisioner::new(
        http_client()?,
        provisioner_config,
        metrics,
        Arc::new(SshTransfer::new(host_key_policy)),
    );

    let app = server::router(AppState::new(provisioner));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("named listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
