// src/runtime/dispatcher.rs
//! Mode-aware invocation dispatcher

use crate::invocation::local::invoke_local;
use crate::invocation::options::{FlameOptions, DEFAULT_RETRY_BASE_DELAY_MS};
use crate::invocation::remote::InvocationClient;
use crate::pool::manager::PoolManager;
use crate::registry::Registry;
use crate::serialization::to_args;
use crate::utils::config::{FlameConfig, Mode};
use crate::utils::errors::{FlameError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Routes invocations to the local registry or to remote runner pools
///
/// In parent mode every attempt acquires a runner, sends the call and
/// releases the runner again, whatever the outcome. Retries (when requested)
/// back off exponentially from the base delay; each attempt gets its own
/// full timeout.
#[derive(Debug)]
pub struct Runtime {
    mode: Mode,
    config: Arc<FlameConfig>,
    registry: Arc<Registry>,
    pools: PoolManager,
    client: InvocationClient,
}

impl Runtime {
    pub fn new(config: FlameConfig, registry: Arc<Registry>) -> Self {
        let mode = Mode::resolve(config.mode);
        let config = Arc::new(config);
        debug!("Runtime starting in {} mode", mode.as_str());

        Self {
            mode,
            pools: PoolManager::new(Arc::clone(&config)),
            config,
            registry,
            client: InvocationClient::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &FlameConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn pools(&self) -> &PoolManager {
        &self.pools
    }

    /// Invoke with a JSON argument array, returning the JSON result
    #[instrument(skip(self, args, options), fields(mode = self.mode.as_str()))]
    pub async fn invoke_result(
        &self,
        service_id: &str,
        method_id: &str,
        args: Value,
        options: Option<&FlameOptions>,
    ) -> Result<Value> {
        let result = match self.mode {
            Mode::Local | Mode::Runner => {
                invoke_local(&self.registry, service_id, method_id, args, options).await
            }
            Mode::Parent => self.invoke_remote(service_id, method_id, args, options).await,
        };

        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            "flame_invocations_total",
            "mode" => self.mode.as_str(),
            "outcome" => outcome
        )
        .increment(1);

        result
    }

    /// Typed invocation: `args` is encoded as the argument array and the
    /// result decoded into `R`
    pub async fn invoke<A, R>(
        &self,
        service_id: &str,
        method_id: &str,
        args: &A,
        options: Option<&FlameOptions>,
    ) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let args = to_args(args)?;
        let value = self.invoke_result(service_id, method_id, args, options).await?;
        serde_json::from_value(value).map_err(|e| {
            FlameError::serialization("Failed to decode result").with_details(e.to_string())
        })
    }

    async fn invoke_remote(
        &self,
        service_id: &str,
        method_id: &str,
        args: Value,
        options: Option<&FlameOptions>,
    ) -> Result<Value> {
        let pool_name = options
            .and_then(|o| o.pool.as_deref())
            .unwrap_or_else(|| self.config.default_pool());

        let retry = options.and_then(|o| o.retry.as_ref());
        let max_attempts = retry.and_then(|r| r.max_attempts).unwrap_or(1).max(1);
        let base_delay_ms = retry
            .and_then(|r| r.base_delay_ms)
            .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS);

        let mut attempt = 1;
        loop {
            match self
                .attempt(pool_name, service_id, method_id, &args, options)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = backoff(base_delay_ms, attempt);
                    warn!(
                        "Attempt {}/{} of {}.{} failed ({}), retrying in {:?}",
                        attempt, max_attempts, service_id, method_id, e, delay
                    );
                    metrics::counter!("flame_invocation_retries_total").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One acquire, send, release cycle
    ///
    /// The lease releases the runner on every exit path, including
    /// cancellation of the caller's future.
    async fn attempt(
        &self,
        pool_name: &str,
        service_id: &str,
        method_id: &str,
        args: &Value,
        options: Option<&FlameOptions>,
    ) -> Result<Value> {
        let pool = self.pools.get(pool_name).await?;
        let lease = pool.lease().await?;

        self.client
            .invoke_remote(lease.handle(), service_id, method_id, args, options, &self.config)
            .await
    }

    /// Shut down every pool created by this runtime
    pub async fn shutdown(&self) -> Result<()> {
        self.pools.shutdown_all().await
    }
}

/// `base * 2^(attempt-1)`
fn backoff(base_delay_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(20);
    Duration::from_millis(base_delay_ms.saturating_mul(factor))
}
