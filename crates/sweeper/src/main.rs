use std::path::PathBuf;

use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticketstore_core::{
    load_config, metrics, validate_config, RequestContext, StateStore, TicketStateStore,
};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticketstore_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("ticketstore-sweeper v{}", VERSION);

    // Determine config path
    let config_path = std::env::var("TICKETSTORE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("ticketstore.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Backend: {:?} at {}", config.backend.kind, config.backend.address);
    info!("Declared indexes: {}", config.indexes.len());

    let registry = Registry::new();
    for metric in metrics::all_metrics() {
        registry
            .register(metric)
            .context("Failed to register metrics")?;
    }

    let store = TicketStateStore::open(config.clone()).context("Failed to open state store")?;
    let reconciler = store.reconciler();

    if config.reconciler.enabled {
        reconciler.start().await;
        info!(
            "Reconciler running every {}ms, press Ctrl+C to stop",
            config.reconciler.interval_ms
        );
        shutdown_signal().await;

        info!("Stopping reconciler...");
        reconciler.stop().await;
    } else {
        info!("Reconciler disabled in config, running a single sweep");
        let token = CancellationToken::new();
        let interrupt = tokio::spawn({
            let token = token.clone();
            async move {
                shutdown_signal().await;
                info!("Interrupting sweep...");
                token.cancel();
            }
        });

        let result = reconciler
            .sweep_once(&RequestContext::with_token(token))
            .await;
        interrupt.abort();
        let report = result.context("Reconciliation sweep failed")?;
        info!(
            "Sweep scanned {} tickets, removed {}",
            report.scanned, report.removed
        );
    }

    store.close().await.context("Failed to close state store")?;

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    info!("Final metrics:\n{}", String::from_utf8_lossy(&buffer));

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
