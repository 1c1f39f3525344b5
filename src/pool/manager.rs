// src/pool/manager.rs
//! Lazily created, cached pools keyed by name
//!
//! Concurrent first requests for the same name share one construction: each
//! name maps to a `OnceCell` and only the first caller runs the initializer.
//! A failed construction leaves the cell empty so a later call can retry.

use crate::pool::runner_pool::RunnerPool;
use crate::pool::types::PoolConfig;
use crate::utils::config::{FlameConfig, DEFAULT_POOL};
use crate::utils::errors::{FlameError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Pool cache
pub struct PoolManager {
    config: Arc<FlameConfig>,
    pools: DashMap<String, Arc<OnceCell<Arc<RunnerPool>>>>,
}

impl PoolManager {
    pub fn new(config: Arc<FlameConfig>) -> Self {
        Self {
            config,
            pools: DashMap::new(),
        }
    }

    /// Explicit config by name, or a single-runner pool for "default" when
    /// only a bare runner URL is configured
    fn resolve_config(&self, name: &str) -> Option<PoolConfig> {
        if let Some(config) = self.config.pools.get(name) {
            return Some(config.clone());
        }
        if name == DEFAULT_POOL {
            if let Some(url) = &self.config.runner_url {
                return Some(PoolConfig::single(url.clone()));
            }
        }
        None
    }

    /// Get (creating on first use) the pool called `name`
    pub async fn get(&self, name: &str) -> Result<Arc<RunnerPool>> {
        // Clone the cell out so no map guard is held across the await
        let cell = self
            .pools
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let pool = cell
            .get_or_try_init(|| async {
                let config = self.resolve_config(name).ok_or_else(|| {
                    FlameError::config(format!("Pool not configured: {}", name))
                })?;
                debug!("Creating pool '{}'", name);
                let pool = RunnerPool::new(name, config, self.config.backend.clone()).await?;
                Ok::<_, FlameError>(Arc::new(pool))
            })
            .await?;

        Ok(Arc::clone(pool))
    }

    /// Names of pools created so far
    pub fn pool_names(&self) -> Vec<String> {
        self.pools
            .iter()
            .filter(|entry| entry.value().initialized())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Shut down every cached pool and clear the cache
    ///
    /// Constructions still in flight are awaited so their runners are shut
    /// down too. All pools are shut down even if one fails; the first failure
    /// is returned afterwards.
    pub async fn shutdown_all(&self) -> Result<()> {
        let names: Vec<String> = self.pools.iter().map(|entry| entry.key().clone()).collect();
        let cells: Vec<_> = names
            .into_iter()
            .filter_map(|name| self.pools.remove(&name))
            .collect();

        let mut pools = Vec::with_capacity(cells.len());
        for (name, cell) in cells {
            // Waits for an initializer already running; an empty cell stays empty
            let pending = cell
                .get_or_try_init(|| async {
                    Err::<Arc<RunnerPool>, _>(FlameError::no_runner(format!(
                        "Pool '{}' was never created",
                        name
                    )))
                })
                .await;
            match pending {
                Ok(pool) => pools.push(Arc::clone(pool)),
                Err(e) => debug!("{}", e),
            }
        }

        let mut first_error = None;
        for pool in pools {
            if let Err(e) = pool.shutdown().await {
                warn!("Failed to shut down pool '{}': {}", pool.name(), e);
                first_error.get_or_insert(e);
            }
        }

        info!("All pools shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.pool_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::backend::Backend;
    use crate::pool::test_support::MockBackend;
    use crate::utils::errors::ErrorKind;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runner_url_pool_is_cached() {
        let config = FlameConfig::default().with_runner_url("http://runner");
        let manager = PoolManager::new(Arc::new(config));

        let first = manager.get("default").await.unwrap();
        let second = manager.get("default").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let runner = first.acquire().await.unwrap();
        assert_eq!(runner.url, "http://runner");
        first.release(&runner).unwrap();

        manager.shutdown_all().await.unwrap();
        assert!(manager.pool_names().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_pool_config() {
        let config =
            FlameConfig::default().with_pool("custom", PoolConfig::single("http://custom"));
        let manager = PoolManager::new(Arc::new(config));

        let pool = manager.get("custom").await.unwrap();
        let runner = pool.acquire().await.unwrap();
        assert_eq!(runner.url, "http://custom");
    }

    #[tokio::test]
    async fn test_missing_pool_is_config_error() {
        let manager = PoolManager::new(Arc::new(FlameConfig::default()));
        let err = manager.get("missing").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn test_concurrent_get_constructs_once() {
        let backend = MockBackend::delayed(Duration::from_millis(20));
        let config = FlameConfig::default()
            .with_pool("warm", PoolConfig::default().with_min(1).with_max(4))
            .with_backend(backend.clone() as Arc<dyn Backend>);
        let manager = Arc::new(PoolManager::new(Arc::new(config)));

        let mut tasks = vec![];
        for _ in 0..10 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move { manager.get("warm").await.unwrap() }));
        }

        let mut pools = vec![];
        for task in tasks {
            pools.push(task.await.unwrap());
        }

        assert_eq!(backend.spawn_count(), 1);
        assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
    }

    #[tokio::test]
    async fn test_shutdown_all_waits_for_pool_under_construction() {
        let backend = MockBackend::delayed(Duration::from_millis(100));
        let config = FlameConfig::default()
            .with_pool("slow", PoolConfig::default().with_min(1))
            .with_backend(backend.clone() as Arc<dyn Backend>);
        let manager = Arc::new(PoolManager::new(Arc::new(config)));

        let creating = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get("slow").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.spawn_count(), 0, "spawn still in flight");

        manager.shutdown_all().await.unwrap();
        assert_eq!(backend.spawn_count(), 1);
        assert_eq!(backend.terminate_attempts(), 1);

        // The caller still gets its pool, already shut down
        let pool = creating.await.unwrap().unwrap();
        assert_eq!(pool.stats().runners, 0);
        assert_eq!(pool.acquire().await.unwrap_err().kind, ErrorKind::NoRunner);
        assert!(manager.pool_names().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_all_terminates_spawned_runners() {
        let backend = MockBackend::new();
        let config = FlameConfig::default()
            .with_pool("a", PoolConfig::default().with_min(1))
            .with_pool("b", PoolConfig::default().with_min(1))
            .with_backend(backend.clone() as Arc<dyn Backend>);
        let manager = PoolManager::new(Arc::new(config));

        manager.get("a").await.unwrap();
        manager.get("b").await.unwrap();
        backend.fail_terminate("mock-0");

        assert!(manager.shutdown_all().await.is_err());
        assert_eq!(backend.terminate_attempts(), 2);
        assert!(manager.pool_names().is_empty());
    }
}
