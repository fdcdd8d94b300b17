mod bootstrap;
mod health;
mod service;
mod webhook;

use std::time::Duration;

use anyhow::Result;
use pedido_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use pedido_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let routes = health::router(app.db_pool.clone()).merge(webhook::router(app.webhook));

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "pedido-server listening"
    );

    let http = tokio::spawn(async move {
        axum::serve(listener, routes).with_graceful_shutdown(wait_for_shutdown()).await
    });
    let runner = app.channel_runner;
    let channel = tokio::spawn(async move { runner.start().await });

    // The webhook state owns the only inbox sender: once the HTTP server
    // stops, the runner sees the stream end and drains its queues.
    http.await??;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "pedido-server stopping"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, channel).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            grace_secs = grace.as_secs(),
            "channel runner did not drain in time"
        ),
    }

    drop(app.runtime);
    let _ = tokio::time::timeout(grace, app.audit_writer).await;
    app.db_pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "failed to listen for ctrl-c");
    }
}
