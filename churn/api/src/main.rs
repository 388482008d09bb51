//! Churn prediction server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use churn_api::{build_app, config::CONFIG_ENV, AppContext, ServiceConfig};
use clap::Parser;

/// Churn prediction server. Serves the trained pipeline over HTTP.
#[derive(Parser, Debug)]
#[command(name = "churn-server", version, about)]
struct Cli {
    /// Optional TOML config file.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Bind address (overrides config and environment).
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config and environment).
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let log_dir = config
        .environment
        .is_production()
        .then_some(config.log_dir.as_path());
    shared_logging::init_tracing(config.environment, log_dir)?;

    let addr = config.bind_addr()?;
    let environment = config.environment;
    let state = Arc::new(AppContext::bootstrap(config)?);
    let ready = state.readiness().is_ok();
    let app = build_app(state);

    tracing::info!(%addr, %environment, ready, "churn-server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
