mod bootstrap;
mod health;
mod routes;
mod service;
mod slack_client;
mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cabbot_core::config::{AppConfig, LoadOptions};
use cabbot_slack::signature::SignatureVerifier;
use tokio::sync::watch;

use crate::routes::AppState;
use crate::service::TurnService;

fn init_logging(config: &AppConfig) {
    use cabbot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging comes up before anything else can fail noisily.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let sessions = app.runtime.sessions().clone();

    let turns = Arc::new(TurnService::new(app.runtime.clone(), app.config.session.turn_timeout()));
    let verifier = app.config.slack.signing_secret.clone().map(SignatureVerifier::new);
    let router = routes::router(
        AppState::new(turns, verifier, app.reply_sink.clone()),
        app.db_pool.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper =
        sweeper::spawn_idle_sweeper(sessions, app.config.session.sweep_interval(), shutdown_rx);

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "cabbot-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "cabbot-server stopping"
    );
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, sweeper).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            "idle sweeper did not stop in time"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
