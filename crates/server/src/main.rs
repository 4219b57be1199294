mod api;
mod bootstrap;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use docwright_core::config::{AppConfig, LoadOptions};
use docwright_core::schemas::SchemaSource;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use docwright_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).with_target(false).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_env_filter(filter).with_target(true).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging must be up before bootstrap emits anything.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;
    let sweeper = app
        .runtime
        .registry()
        .spawn_sweeper(Duration::from_secs(app.config.session.sweep_interval_secs.max(1)));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    let router =
        api::router(Arc::clone(&app.runtime)).merge(health::router(Arc::clone(&app.runtime)));

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        doc_types = app.schemas.list().len(),
        "docwright-server started"
    );

    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.changed().await;
            })
            .await
    });

    tokio::select! {
        joined = &mut server => {
            joined
                .context("http server task panicked")?
                .context("http server terminated unexpectedly")?;
        }
        () = wait_for_shutdown() => {
            let _ = stop_tx.send(true);
            match tokio::time::timeout(grace, &mut server).await {
                Ok(joined) => {
                    joined
                        .context("http server task panicked")?
                        .context("http server terminated unexpectedly")?;
                }
                Err(_) => {
                    tracing::warn!(
                        event_name = "system.server.shutdown_timeout",
                        correlation_id = "shutdown",
                        grace_secs = grace.as_secs(),
                        "in-flight requests did not drain before the grace period ended"
                    );
                    server.abort();
                }
            }
        }
    }

    sweeper.abort();
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        active_sessions = app.runtime.registry().len(),
        "docwright-server stopping"
    );

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
    }
    tracing::info!(
        event_name = "system.server.shutdown_requested",
        correlation_id = "shutdown",
        "shutdown signal received"
    );
}
