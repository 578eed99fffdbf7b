//! Prometheus exporter for the metrics recorded by `freshet_core::metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics exporter.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if metrics were not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use freshet_core::metrics::names;

    #[test]
    fn renders_recorded_core_metrics() {
        init_metrics();
        freshet_core::metrics::record_bulk_fetch(3, 2);
        freshet_core::metrics::record_poller_update("model");

        let text = render_metrics().expect("metrics initialized");
        assert!(text.contains(names::BULK_HITS_TOTAL));
        assert!(text.contains(names::POLLER_UPDATES_TOTAL));
        assert!(!init_metrics(), "second init is a no-op");
    }
}
