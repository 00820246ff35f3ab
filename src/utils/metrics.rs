//! Prometheus metrics exporter setup

use crate::{ArbitrageError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Install the Prometheus exporter on the given port.
///
/// Must be called from within a tokio runtime. The engine records scan and
/// order counters plus an open-position gauge; everything else is up to the
/// scraper.
pub fn init(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .map_err(|e| {
            ArbitrageError::Config(format!("Failed to install metrics exporter: {}", e))
        })?;

    info!(port = port, "Metrics exporter listening");
    Ok(())
}
