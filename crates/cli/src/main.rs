//! pricewatch - live price table from oracle and exchange feeds
//!
//! Main entry point

use std::env;
use std::time::Duration;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pricewatch::{build_listeners, load_config, render_loop};
use pricewatch_feed::Aggregator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging; stdout belongs to the table
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting pricewatch v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let path = pricewatch::settings::config_path(env::args().nth(1));
    let config = load_config(&path)?;

    let listeners = build_listeners(&config).await;
    if listeners.is_empty() {
        anyhow::bail!("no listener could be opened");
    }

    let mut aggregator = Aggregator::new(listeners);
    let report = aggregator.listen().await;
    if report.started.is_empty() {
        aggregator.close().await;
        anyhow::bail!("all {} listeners failed to start", report.failed.len());
    }
    for (source, e) in &report.failed {
        warn!("Running without {}: {}", source, e);
    }
    info!("Listening on {} sources", report.started.len());

    let (render_shutdown_tx, render_shutdown_rx) = watch::channel(false);
    let render = if config.render.enabled {
        Some(tokio::spawn(render_loop(
            aggregator.table(),
            aggregator.subscribe_updates(),
            Duration::from_millis(config.render.min_interval_ms),
            render_shutdown_rx,
        )))
    } else {
        None
    };

    info!("Press Ctrl+C to shutdown");
    wait_for_shutdown().await;

    let _ = render_shutdown_tx.send(true);
    aggregator.close().await;
    if let Some(render) = render {
        if let Err(e) = render.await {
            error!("Render task failed: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}
