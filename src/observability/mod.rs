// src/observability/mod.rs
//! Host-facing observability bootstrap
//!
//! The library itself only emits through the `tracing` and `metrics`
//! facades; which subscriber and recorder consume them is the host's
//! choice. These helpers install sensible defaults for hosts that do not
//! bring their own.

use crate::utils::errors::{EngineError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install an env-filtered fmt subscriber (`RUST_LOG` controls verbosity).
/// Fails if a global subscriber is already set.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| EngineError::Config(format!("failed to install tracing subscriber: {e}")))
}

/// Install a Prometheus metrics recorder with an exporter on the default
/// scrape endpoint. Fails if a global recorder is already set.
pub fn init_metrics() -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .map_err(|e| EngineError::Config(format!("failed to install metrics recorder: {e}")))
}
