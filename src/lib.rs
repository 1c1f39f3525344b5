// src/lib.rs
//! Flame RPC
//!
//! Lightweight dispatch of registered methods to pools of runner processes,
//! or in-process execution when running locally.
//!
//! # Architecture
//!
//! - **flame**: application context (registry + runtime), method handles
//! - **registry**: services and type-erased method handlers
//! - **runtime**: mode-aware dispatch with retry and backoff
//! - **pool**: runner pools, pool manager, spawn backends
//! - **invocation**: wire protocol, remote client, local execution
//! - **server**: runner-side HTTP endpoint
//! - **security**: HMAC request signing and replay windows
//! - **serialization**: argument/result codec
//! - **observability**: tracing and Prometheus metrics
//! - **utils**: configuration and errors
//!
//! # Example
//!
//! ```ignore
//! let flame = Flame::new(FlameConfig::load()?);
//! let add = flame.function("add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) }, None)?;
//! assert_eq!(add.call((2, 3)).await?, 5);
//! flame.shutdown().await?;
//! ```

pub mod flame;
pub mod invocation;
pub mod observability;
pub mod pool;
pub mod registry;
pub mod runtime;
pub mod security;
pub mod serialization;
pub mod server;
pub mod utils;

// Re-export commonly used types
pub use flame::{Flame, MethodHandle, ServiceHandle};
pub use invocation::{FlameOptions, InvocationContext, RetryOptions};
pub use pool::{Backend, PoolConfig, PoolManager, RunnerHandle, RunnerLease, RunnerPool};
pub use registry::{define_method, MethodDefinition, Registry, ServiceDefinition};
pub use runtime::Runtime;
pub use server::{RunnerServerHandle, RunnerServerOptions};
pub use utils::config::{FlameConfig, Mode};
pub use utils::errors::{ErrorKind, FlameError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Build information
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flame-rpc {} ({}, built {} with {})",
            self.version, self.git_hash, self.build_timestamp, self.rustc_version
        )
    }
}
