// src/observability/mod.rs
//! Logging and metrics setup
//!
//! Logs go to stderr: a runner's stdout carries the `RUNNER_READY` line its
//! parent waits for. `RUST_LOG` controls filtering (default `info`) and
//! `FLAME_LOG_FORMAT=json` switches to structured output.

use crate::utils::errors::{FlameError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FLAME_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };

    installed.map_err(|e| FlameError::config(format!("Failed to install tracing subscriber: {}", e)))
}

/// Install the Prometheus recorder with an HTTP scrape endpoint on `addr`
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: &str) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| FlameError::config(format!("Invalid metrics address '{}': {}", addr, e)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| FlameError::config(format!("Failed to install metrics exporter: {}", e)))?;

    tracing::info!("Metrics exporter listening on {}", addr);
    Ok(())
}
