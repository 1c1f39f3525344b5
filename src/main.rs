// src/main.rs
//! Flame runner
//!
//! Serves registered methods over HTTP for a parent process. Prints
//! `RUNNER_READY <url>` on stdout once the server accepts invocations.

use anyhow::{Context, Result};
use flame_rpc::observability::{init_metrics, init_tracing};
use flame_rpc::{define_method, BuildInfo, Flame, FlameConfig, Mode};
use std::io::Write;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    info!("Starting {}", BuildInfo::current());

    let config = FlameConfig::load()?.with_mode(Mode::Runner);
    if let Some(addr) = &config.metrics_addr {
        init_metrics(addr)?;
    }

    let flame = Flame::new(config);
    flame.register_service(
        "math",
        vec![define_method("add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) })],
        None,
    )?;

    let server = flame.runner_server(None).await?;

    let mut stdout = std::io::stdout();
    writeln!(stdout, "RUNNER_READY {}", server.url()).context("Failed to announce readiness")?;
    stdout.flush().context("Failed to flush stdout")?;

    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }

    info!("Received shutdown signal, cleaning up...");
    server.stop().await;
    flame.shutdown().await?;
    Ok(())
}
