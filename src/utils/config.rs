// src/utils/config.rs
//! Configuration surface
//!
//! Layered from defaults, an optional TOML file and `FLAME_*` environment
//! variables (nested keys separated by `__`, e.g. `FLAME_SECURITY__SECRET`).

use crate::pool::backend::Backend;
use crate::pool::types::PoolConfig;
use crate::utils::errors::{FlameError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_INVOKE_PATH: &str = "/invoke";
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MAX_SKEW_MS: i64 = 60_000;
pub const DEFAULT_POOL: &str = "default";
pub const SIGNATURE_HEADER: &str = "x-flame-signature";

/// Role of this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Dispatch calls to remote runners
    Parent,
    /// Execute calls in-process, serving remote parents
    Runner,
    /// Execute calls in-process without any network
    Local,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Parent => "parent",
            Mode::Runner => "runner",
            Mode::Local => "local",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "parent" => Some(Mode::Parent),
            "runner" => Some(Mode::Runner),
            "local" => Some(Mode::Local),
            _ => None,
        }
    }

    /// Explicit mode, else `FLAME_MODE`, else `FLAME_RUNNER=true`, else parent
    pub fn resolve(explicit: Option<Mode>) -> Mode {
        if let Some(mode) = explicit {
            return mode;
        }
        if let Some(mode) = std::env::var("FLAME_MODE").ok().and_then(|v| Mode::parse(&v)) {
            return mode;
        }
        if std::env::var("FLAME_RUNNER").map(|v| v == "true").unwrap_or(false) {
            return Mode::Runner;
        }
        Mode::Parent
    }
}

/// Shared-secret request signing
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HmacConfig {
    pub secret: String,

    /// Accepted clock skew in milliseconds (default: 60s)
    #[serde(default)]
    pub max_skew_ms: Option<i64>,
}

impl HmacConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            max_skew_ms: None,
        }
    }

    pub fn max_skew_ms(&self) -> i64 {
        self.max_skew_ms.unwrap_or(DEFAULT_MAX_SKEW_MS)
    }
}

/// Runner server bind address
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FlameConfig {
    /// Role; resolved from the environment when absent
    pub mode: Option<Mode>,

    /// Pool used when a call does not name one
    pub default_pool: Option<String>,

    /// Named pool configurations
    pub pools: HashMap<String, PoolConfig>,

    /// Bare runner URL, synthesizing a single-runner "default" pool
    pub runner_url: Option<String>,

    /// HTTP path of the invoke endpoint
    pub invoke_path: Option<String>,

    /// Request signing
    pub security: Option<HmacConfig>,

    /// Default per-call timeout
    pub request_timeout_ms: Option<u64>,

    /// Runner server request body limit
    pub max_body_bytes: Option<usize>,

    /// Include internal error details in runner responses
    pub expose_errors: Option<bool>,

    /// Runner server bind address
    pub server: Option<ServerConfig>,

    /// Prometheus listener address (e.g., "0.0.0.0:9100")
    pub metrics_addr: Option<String>,

    /// Spawns and terminates runners for dynamic pools
    #[serde(skip)]
    pub backend: Option<Arc<dyn Backend>>,
}

impl FlameConfig {
    /// Load from `FLAME_CONFIG` (default `flame.toml`, optional) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("FLAME_CONFIG").unwrap_or_else(|_| "flame.toml".to_string());
        Self::load_from(path)
    }

    /// Load from a specific file (optional) and the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("FLAME")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| FlameError::config(format!("Failed to load configuration: {}", e)))?;

        let config: FlameConfig = settings
            .try_deserialize()
            .map_err(|e| FlameError::config(format!("Invalid configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate pool sizing and paths
    pub fn validate(&self) -> Result<()> {
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| FlameError::config(format!("Pool '{}': {}", name, e)))?;
        }
        if let Some(path) = &self.invoke_path {
            if !path.starts_with('/') {
                return Err(FlameError::config(format!(
                    "invoke_path must start with '/': {}",
                    path
                )));
            }
        }
        Ok(())
    }

    /// Overlay `next` on top of `self`; pools merge by name
    pub fn merge(&self, next: FlameConfig) -> FlameConfig {
        let mut pools = self.pools.clone();
        pools.extend(next.pools);

        FlameConfig {
            mode: next.mode.or(self.mode),
            default_pool: next.default_pool.or_else(|| self.default_pool.clone()),
            pools,
            runner_url: next.runner_url.or_else(|| self.runner_url.clone()),
            invoke_path: next.invoke_path.or_else(|| self.invoke_path.clone()),
            security: next.security.or_else(|| self.security.clone()),
            request_timeout_ms: next.request_timeout_ms.or(self.request_timeout_ms),
            max_body_bytes: next.max_body_bytes.or(self.max_body_bytes),
            expose_errors: next.expose_errors.or(self.expose_errors),
            server: next.server.or_else(|| self.server.clone()),
            metrics_addr: next.metrics_addr.or_else(|| self.metrics_addr.clone()),
            backend: next.backend.or_else(|| self.backend.clone()),
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_runner_url(mut self, url: impl Into<String>) -> Self {
        self.runner_url = Some(url.into());
        self
    }

    pub fn with_pool(mut self, name: impl Into<String>, pool: PoolConfig) -> Self {
        self.pools.insert(name.into(), pool);
        self
    }

    pub fn with_invoke_path(mut self, path: impl Into<String>) -> Self {
        self.invoke_path = Some(path.into());
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.security = Some(HmacConfig::new(secret));
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn invoke_path(&self) -> &str {
        self.invoke_path.as_deref().unwrap_or(DEFAULT_INVOKE_PATH)
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES)
    }

    pub fn expose_errors(&self) -> bool {
        self.expose_errors.unwrap_or(false)
    }

    pub fn default_pool(&self) -> &str {
        self.default_pool.as_deref().unwrap_or(DEFAULT_POOL)
    }

    pub fn secret(&self) -> Option<&str> {
        self.security
            .as_ref()
            .map(|s| s.secret.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }
}
