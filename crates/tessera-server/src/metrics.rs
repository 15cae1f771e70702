//! Prometheus exporter bootstrap.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tessera_core::{TesseraError, TesseraResult};
use tracing::info;

/// Installs the global Prometheus recorder with a scrape endpoint on `addr`.
pub fn install_exporter(addr: &str) -> TesseraResult<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| TesseraError::Configuration(format!("Invalid metrics address '{addr}': {e}")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| TesseraError::internal(format!("Failed to install metrics exporter: {e}")))?;

    info!("Metrics available on http://{}/metrics", addr);
    Ok(())
}

/// Registers descriptions for every metric the server emits.
///
/// Must run after the recorder is installed.
pub fn register_all() {
    tessera_cache::metrics::register_metrics();
    tessera_events::metrics::register_metrics();
}
