//! # Tessera Server
//!
//! Runs the cache and invalidation pipeline for one service: builds the
//! cache over the configured backend, consumes invalidation events into it
//! and exposes metrics until a shutdown signal arrives.

use tessera_config::ConfigLoader;
use tessera_core::telemetry::init_tracing;
use tessera_core::TesseraResult;
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod metrics;

use app::App;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("tessera-server: {e}");
        error!("Application error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> TesseraResult<()> {
    let config_loader = ConfigLoader::from_default_location()?;
    let config = config_loader.get().await;

    init_tracing(&config.observability.telemetry())?;

    info!("Starting Tessera server...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    if config.observability.metrics_enabled {
        metrics::install_exporter(&config.observability.metrics_addr)?;
    }
    metrics::register_all();

    let app = App::start(&config).await?;
    info!(
        backend = app.cache().store.backend_name(),
        publishing = app.publisher().is_enabled(),
        "Ready"
    );

    shutdown_signal().await;
    app.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
