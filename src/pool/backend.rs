// src/pool/backend.rs
//! Pluggable capability to create and destroy runners
//!
//! Pools without a backend are static-only: they serve the runners listed in
//! their configuration and never grow.

use crate::pool::types::{RunnerHandle, SpawnOptions};
use crate::utils::errors::Result;
use async_trait::async_trait;
use std::fmt::Debug;

#[async_trait]
pub trait Backend: Debug + Send + Sync {
    /// Start a runner for `options.pool_name` and return its handle once it
    /// accepts invocations
    async fn spawn(&self, options: SpawnOptions) -> Result<RunnerHandle>;

    /// Stop a runner previously returned by `spawn`
    async fn terminate(&self, runner: &RunnerHandle) -> Result<()>;

    /// Whether the runner is still usable
    async fn health_check(&self, _runner: &RunnerHandle) -> Result<bool> {
        Ok(true)
    }
}
