// src/pool/types.rs
//! Runner identity and pool sizing policy

use serde::{Deserialize, Serialize};

/// A statically configured runner address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerTarget {
    /// Stable id; derived from the pool name and position when absent
    #[serde(default)]
    pub id: Option<String>,

    /// Base URL of the runner (e.g., "http://10.0.0.4:8080")
    pub url: String,
}

impl RunnerTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Identity and network address of one runner
///
/// Two handles refer to the same runner when their ids match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerHandle {
    pub id: String,
    pub url: String,
}

impl RunnerHandle {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

impl PartialEq for RunnerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RunnerHandle {}

/// Sizing policy for one named pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Runners kept alive from construction on (default: 0)
    pub min: usize,

    /// Upper bound on runners, static and spawned (default: 1)
    pub max: usize,

    /// Concurrent invocations allowed per runner (default: 1)
    pub max_concurrency: usize,

    /// Statically configured runners
    pub runners: Vec<RunnerTarget>,

    /// Upper bound on a single backend spawn
    pub spawn_timeout_ms: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: 1,
            max_concurrency: 1,
            runners: vec![],
            spawn_timeout_ms: None,
        }
    }
}

impl PoolConfig {
    /// Single static runner, the shape synthesized for a bare runner URL
    pub fn single(url: impl Into<String>) -> Self {
        Self {
            runners: vec![RunnerTarget::new(url)],
            ..Default::default()
        }
    }

    pub fn with_runner(mut self, target: RunnerTarget) -> Self {
        self.runners.push(target);
        self
    }

    pub fn with_max(mut self, max: usize) -> Self {
        self.max = max;
        self
    }

    pub fn with_min(mut self, min: usize) -> Self {
        self.min = min;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Validate sizing
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency cannot be 0".to_string());
        }
        if self.min > self.max {
            return Err(format!(
                "min ({}) cannot exceed max ({})",
                self.min, self.max
            ));
        }
        Ok(())
    }
}

/// Options passed to a backend spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnOptions {
    pub pool_name: String,
}
