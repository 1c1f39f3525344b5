// src/pool/runner_pool.rs
//! Runner pool for one named group of workers
//!
//! Each runner contributes `max_concurrency` slots to a shared ready-queue.
//! Acquiring takes a slot, releasing puts it back. When the queue is empty
//! and there is headroom under `max`, the pool asks its backend for another
//! runner; otherwise callers wait for a release (backpressure).
//!
//! # Architecture
//!
//! ```text
//! RunnerPool
//! ├─ State (mutex): runners {id -> in_use, last_used}, spawning, closed
//! ├─ Ready-queue:   [slot(r1), slot(r1), slot(r2), ...]
//! └─ Waiters:       parked on Notify until a slot is offered
//! ```
//!
//! The state lock is only held for snapshots and mutations; queue operations
//! and backend calls happen outside it.
//!
//! Backend-spawned runners are health-checked as their slots are taken. An
//! unhealthy runner is evicted and terminated; its remaining slots go stale
//! and are skipped, and the freed capacity can be spawned again.

use crate::pool::backend::Backend;
use crate::pool::types::{PoolConfig, RunnerHandle, SpawnOptions};
use crate::utils::errors::{FlameError, Result};
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

/// Pool-internal view of one runner
#[derive(Debug, Clone)]
struct RunnerState {
    handle: RunnerHandle,
    in_use: usize,
    last_used: DateTime<Utc>,
    /// Spawned through the backend (and therefore terminated at shutdown)
    owned: bool,
}

#[derive(Debug, Default)]
struct PoolState {
    runners: HashMap<String, RunnerState>,
    /// Reserved spawn attempts still in flight
    spawning: usize,
    closed: bool,
}

/// Next step for an acquirer that found the ready-queue empty
enum Plan<'a> {
    Wait,
    Spawn(SpawnReservation<'a>),
    Exhausted,
    Closed,
}

/// Capacity held for one spawn attempt
///
/// Dropping an uncommitted reservation (failure, timeout, or a cancelled
/// acquire) gives the capacity back and wakes waiters so they can re-plan.
struct SpawnReservation<'a> {
    pool: &'a RunnerPool,
    armed: bool,
}

impl Drop for SpawnReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            {
                let mut state = self.pool.state.lock();
                state.spawning = state.spawning.saturating_sub(1);
            }
            self.pool.notify.notify_waiters();
        }
    }
}

/// A slot marked in use that returns to the pool unless handed out
struct SlotClaim<'a> {
    pool: &'a RunnerPool,
    handle: RunnerHandle,
    armed: bool,
}

impl SlotClaim<'_> {
    fn into_handle(mut self) -> RunnerHandle {
        self.armed = false;
        self.handle.clone()
    }
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.pool.release(&self.handle) {
                debug!("Returning claimed slot of {} failed: {}", self.handle.id, e);
            }
        }
    }
}

/// A runner slot held until the lease is dropped
///
/// The slot goes back to the pool whenever the lease is dropped, including
/// when the future holding it is cancelled mid-call.
#[derive(Debug)]
pub struct RunnerLease {
    pool: Arc<RunnerPool>,
    handle: RunnerHandle,
}

impl RunnerLease {
    pub fn handle(&self) -> &RunnerHandle {
        &self.handle
    }
}

impl Drop for RunnerLease {
    fn drop(&mut self) {
        if let Err(e) = self.pool.release(&self.handle) {
            debug!("Release of runner {} failed: {}", self.handle.id, e);
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub runners: usize,
    pub spawning: usize,
    pub in_use: usize,
    pub capacity: usize,
}

/// A named set of runners
pub struct RunnerPool {
    name: String,
    config: PoolConfig,
    backend: Option<Arc<dyn Backend>>,
    state: Mutex<PoolState>,
    ready: SegQueue<RunnerHandle>,
    notify: Notify,
}

impl RunnerPool {
    /// Create a pool: seed static runners, then spawn up to `min`
    pub async fn new(
        name: impl Into<String>,
        config: PoolConfig,
        backend: Option<Arc<dyn Backend>>,
    ) -> Result<Self> {
        let name = name.into();
        config
            .validate()
            .map_err(|e| FlameError::config(format!("Pool '{}': {}", name, e)))?;

        let pool = Self {
            name,
            config,
            backend,
            state: Mutex::new(PoolState::default()),
            ready: SegQueue::new(),
            notify: Notify::new(),
        };

        pool.seed_static();
        pool.spawn_to_min().await?;

        info!(
            "Pool '{}' ready with {} runners (max {}, concurrency {})",
            pool.name,
            pool.state.lock().runners.len(),
            pool.config.max,
            pool.config.max_concurrency
        );
        Ok(pool)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn seed_static(&self) {
        for (index, target) in self.config.runners.iter().enumerate() {
            let id = target
                .id
                .clone()
                .unwrap_or_else(|| format!("static-{}-{}", self.name, index));
            let handle = RunnerHandle::new(id, target.url.clone());

            let added = {
                let mut state = self.state.lock();
                Self::insert_runner(&mut state, handle.clone(), false)
            };
            if added {
                self.offer_slots(&handle);
            } else {
                warn!("Pool '{}': ignoring duplicate runner id {}", self.name, handle.id);
            }
        }
    }

    async fn spawn_to_min(&self) -> Result<()> {
        let seeded = self.state.lock().runners.len();
        if self.config.min <= seeded {
            return Ok(());
        }
        if self.backend.is_none() {
            return Err(FlameError::config(format!(
                "Pool '{}' requires a backend to reach min runners ({})",
                self.name, self.config.min
            )));
        }

        for _ in seeded..self.config.min {
            let reservation = self.try_reserve().ok_or_else(|| {
                FlameError::config(format!(
                    "Pool '{}' cannot reach min runners within max ({})",
                    self.name, self.config.max
                ))
            })?;
            self.spawn_runner(reservation).await?;
        }
        Ok(())
    }

    /// Insert a runner; false if the id is already tracked
    fn insert_runner(state: &mut PoolState, handle: RunnerHandle, owned: bool) -> bool {
        if state.runners.contains_key(&handle.id) {
            return false;
        }
        state.runners.insert(
            handle.id.clone(),
            RunnerState {
                handle,
                in_use: 0,
                last_used: Utc::now(),
                owned,
            },
        );
        true
    }

    fn offer_slots(&self, handle: &RunnerHandle) {
        for _ in 0..self.config.max_concurrency {
            self.offer(handle.clone());
        }
    }

    fn offer(&self, handle: RunnerHandle) {
        self.ready.push(handle);
        self.notify.notify_one();
    }

    /// Reserve capacity for one spawn if a backend exists and `max` allows
    fn try_reserve(&self) -> Option<SpawnReservation<'_>> {
        let mut state = self.state.lock();
        if state.closed || self.backend.is_none() {
            return None;
        }
        if state.runners.len() + state.spawning >= self.config.max {
            return None;
        }
        state.spawning += 1;
        Some(SpawnReservation {
            pool: self,
            armed: true,
        })
    }

    fn plan(&self) -> Plan<'_> {
        let mut state = self.state.lock();
        if state.closed {
            return Plan::Closed;
        }

        let can_spawn =
            self.backend.is_some() && state.runners.len() + state.spawning < self.config.max;

        if can_spawn {
            state.spawning += 1;
            return Plan::Spawn(SpawnReservation {
                pool: self,
                armed: true,
            });
        }
        if state.runners.is_empty() && state.spawning == 0 {
            return Plan::Exhausted;
        }
        Plan::Wait
    }

    /// Run a reserved spawn and publish the new runner's slots
    async fn spawn_runner(&self, mut reservation: SpawnReservation<'_>) -> Result<RunnerHandle> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            FlameError::config("No backend configured to spawn runners")
        })?;

        debug!("Pool '{}': spawning runner", self.name);
        let options = SpawnOptions {
            pool_name: self.name.clone(),
        };

        let spawned = match self.config.spawn_timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), backend.spawn(options))
                .await
                .map_err(|_| {
                    FlameError::timeout(format!(
                        "Pool '{}': runner spawn exceeded {}ms",
                        self.name, ms
                    ))
                })?,
            None => backend.spawn(options).await,
        };

        let handle = spawned.map_err(|e| {
            warn!("Pool '{}': failed to spawn runner: {}", self.name, e);
            FlameError::invoke("Failed to spawn runner").with_details(e.to_string())
        })?;

        // Swap the reservation for the runner in one step so
        // runners + spawning never exceeds max
        let (inserted, closed) = {
            let mut state = self.state.lock();
            state.spawning = state.spawning.saturating_sub(1);
            reservation.armed = false;
            if state.closed {
                (false, true)
            } else {
                (Self::insert_runner(&mut state, handle.clone(), true), false)
            }
        };

        if closed {
            warn!("Pool '{}' shut down during spawn; terminating {}", self.name, handle.id);
            if let Err(e) = backend.terminate(&handle).await {
                warn!("Failed to terminate runner {}: {}", handle.id, e);
            }
            self.notify.notify_waiters();
            return Err(FlameError::no_runner(format!("Pool '{}' is shut down", self.name)));
        }
        if !inserted {
            self.notify.notify_waiters();
            return Err(FlameError::invoke(format!(
                "Backend returned duplicate runner id {}",
                handle.id
            )));
        }

        metrics::counter!("flame_runner_spawns_total", "pool" => self.name.clone()).increment(1);
        info!("Pool '{}': spawned runner {} at {}", self.name, handle.id, handle.url);
        self.offer_slots(&handle);
        Ok(handle)
    }

    /// Mark a dequeued slot in use; `None` for stale slots, otherwise
    /// whether the runner is backend-owned
    fn mark_in_use(&self, handle: &RunnerHandle) -> Option<bool> {
        let mut state = self.state.lock();
        match state.runners.get_mut(&handle.id) {
            Some(runner) if runner.in_use < self.config.max_concurrency => {
                runner.in_use += 1;
                runner.last_used = Utc::now();
                Some(runner.owned)
            }
            _ => None,
        }
    }

    async fn is_healthy(&self, handle: &RunnerHandle) -> bool {
        let Some(backend) = &self.backend else {
            return true;
        };
        match backend.health_check(handle).await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!("Pool '{}': health check of {} failed: {}", self.name, handle.id, e);
                false
            }
        }
    }

    /// Drop a runner from the pool and terminate it
    async fn evict(&self, handle: &RunnerHandle) {
        let removed = self.state.lock().runners.remove(&handle.id).is_some();
        // Waiters re-plan: the freed capacity may allow a spawn
        self.notify.notify_waiters();
        if !removed {
            return;
        }

        warn!("Pool '{}': evicting unhealthy runner {}", self.name, handle.id);
        metrics::counter!("flame_runner_evictions_total", "pool" => self.name.clone()).increment(1);
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.terminate(handle).await {
                warn!("Failed to terminate runner {}: {}", handle.id, e);
            }
        }
    }

    /// Acquire a runner slot, spawning or waiting as needed
    #[instrument(skip(self), fields(pool = %self.name))]
    pub async fn acquire(&self) -> Result<RunnerHandle> {
        let started = Instant::now();

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(handle) = self.ready.pop() {
                let Some(owned) = self.mark_in_use(&handle) else {
                    debug!("Pool '{}': skipping stale slot for {}", self.name, handle.id);
                    continue;
                };

                let claim = SlotClaim {
                    pool: self,
                    handle,
                    armed: true,
                };
                if owned && !self.is_healthy(&claim.handle).await {
                    let handle = claim.into_handle();
                    self.evict(&handle).await;
                    continue;
                }

                let handle = claim.into_handle();
                debug!("Pool '{}': acquired runner {}", self.name, handle.id);
                metrics::histogram!("flame_pool_acquire_seconds", "pool" => self.name.clone())
                    .record(started.elapsed().as_secs_f64());
                return Ok(handle);
            }

            match self.plan() {
                Plan::Closed => {
                    return Err(FlameError::no_runner(format!(
                        "Pool '{}' is shut down",
                        self.name
                    )))
                }
                Plan::Exhausted => {
                    return Err(FlameError::no_runner(format!(
                        "Pool '{}' has no runners configured",
                        self.name
                    )))
                }
                Plan::Spawn(reservation) => {
                    self.spawn_runner(reservation).await?;
                }
                Plan::Wait => {
                    debug!("Pool '{}': all runners busy, waiting", self.name);
                    notified.await;
                }
            }
        }
    }

    /// Acquire a slot that is released when the returned lease drops
    pub async fn lease(self: &Arc<Self>) -> Result<RunnerLease> {
        let handle = self.acquire().await?;
        Ok(RunnerLease {
            pool: Arc::clone(self),
            handle,
        })
    }

    /// Return a slot to circulation
    ///
    /// Handles the pool does not track, or runners with no slot in use, are
    /// rejected without offering a slot.
    pub fn release(&self, runner: &RunnerHandle) -> Result<()> {
        let handle = {
            let mut state = self.state.lock();
            match state.runners.get_mut(&runner.id) {
                Some(existing) if existing.in_use > 0 => {
                    existing.in_use -= 1;
                    existing.last_used = Utc::now();
                    Some(existing.handle.clone())
                }
                _ => None,
            }
        };

        match handle {
            Some(handle) => {
                debug!("Pool '{}': released runner {}", self.name, handle.id);
                self.offer(handle);
                Ok(())
            }
            None => {
                warn!("Pool '{}': rejected release of {}", self.name, runner.id);
                Err(FlameError::invoke(format!(
                    "Runner {} holds no slot in pool '{}'",
                    runner.id, self.name
                )))
            }
        }
    }

    /// Terminate every backend-spawned runner and discard state
    ///
    /// Every runner gets a terminate attempt; the first failure is returned
    /// once all attempts are done.
    pub async fn shutdown(&self) -> Result<()> {
        let owned: Vec<RunnerHandle> = {
            let mut state = self.state.lock();
            state.closed = true;
            state
                .runners
                .drain()
                .filter(|(_, runner)| runner.owned)
                .map(|(_, runner)| runner.handle)
                .collect()
        };
        while self.ready.pop().is_some() {}
        self.notify.notify_waiters();

        let Some(backend) = &self.backend else {
            info!("Pool '{}' shut down", self.name);
            return Ok(());
        };

        let mut first_error = None;
        for handle in owned {
            match backend.terminate(&handle).await {
                Ok(()) => {
                    metrics::counter!("flame_runner_terminations_total", "pool" => self.name.clone())
                        .increment(1);
                    debug!("Pool '{}': terminated runner {}", self.name, handle.id);
                }
                Err(e) => {
                    warn!("Pool '{}': failed to terminate {}: {}", self.name, handle.id, e);
                    if first_error.is_none() {
                        first_error = Some(
                            FlameError::invoke("Failed to terminate runner")
                                .with_details(e.to_string()),
                        );
                    }
                }
            }
        }

        info!("Pool '{}' shut down", self.name);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            runners: state.runners.len(),
            spawning: state.spawning,
            in_use: state.runners.values().map(|r| r.in_use).sum(),
            capacity: state.runners.len() * self.config.max_concurrency,
        }
    }
}

impl std::fmt::Debug for RunnerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerPool")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::test_support::MockBackend;
    use crate::pool::types::RunnerTarget;
    use crate::utils::errors::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn static_pool_config(concurrency: usize) -> PoolConfig {
        PoolConfig::single("http://runner").with_max_concurrency(concurrency)
    }

    #[tokio::test]
    async fn test_acquire_from_static_runner() {
        let pool = RunnerPool::new("default", static_pool_config(1), None).await.unwrap();

        let runner = pool.acquire().await.unwrap();
        assert_eq!(runner.url, "http://runner");
        assert_eq!(runner.id, "static-default-0");
        assert_eq!(pool.stats().in_use, 1);

        pool.release(&runner).unwrap();
        assert_eq!(pool.stats().in_use, 0);
    }

    #[tokio::test]
    async fn test_empty_pool_without_backend_fails() {
        let pool = RunnerPool::new("empty", PoolConfig::default().with_max(0), None)
            .await
            .unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoRunner);

        let pool = RunnerPool::new("empty", PoolConfig::default(), None).await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoRunner);
    }

    #[tokio::test]
    async fn test_concurrency_limit_blocks_until_release() {
        let pool = Arc::new(RunnerPool::new("k", static_pool_config(3), None).await.unwrap());

        let mut held = vec![];
        for _ in 0..3 {
            held.push(pool.acquire().await.unwrap());
        }

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(blocked.is_err(), "fourth acquire should block");

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        pool.release(&held.pop().unwrap()).unwrap();
        let runner = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(runner.url, "http://runner");
        assert_eq!(pool.stats().in_use, 3);
    }

    #[tokio::test]
    async fn test_unknown_release_does_not_add_capacity() {
        let pool = RunnerPool::new("strict", static_pool_config(1), None).await.unwrap();

        let foreign = RunnerHandle::new("forged", "http://evil");
        assert!(pool.release(&foreign).is_err());

        // Releasing an idle runner is rejected too
        let idle = RunnerHandle::new("static-strict-0", "http://runner");
        assert!(pool.release(&idle).is_err());

        let first = pool.acquire().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(second.is_err(), "only one legitimate slot exists");

        pool.release(&first).unwrap();
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_static_ids_ignored() {
        let config = PoolConfig::default()
            .with_runner(RunnerTarget::new("http://a").with_id("same"))
            .with_runner(RunnerTarget::new("http://b").with_id("same"));
        let pool = RunnerPool::new("dup", config, None).await.unwrap();
        assert_eq!(pool.stats().runners, 1);
        assert_eq!(pool.stats().capacity, 1);
    }

    #[tokio::test]
    async fn test_spawns_on_demand_up_to_max() {
        let backend = MockBackend::new();
        let config = PoolConfig::default().with_max(2);
        let pool = Arc::new(
            RunnerPool::new("dyn", config, Some(backend.clone() as Arc<dyn Backend>))
                .await
                .unwrap(),
        );
        assert_eq!(pool.stats().runners, 0);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(backend.spawn_count(), 2);

        let third = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(third.is_err(), "max reached, third acquire waits");
        assert_eq!(backend.spawn_count(), 2);
        assert_eq!(pool.stats().spawning, 0);

        pool.release(&a).unwrap();
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_spawns_respect_max() {
        let backend = MockBackend::delayed(Duration::from_millis(20));
        let config = PoolConfig::default().with_max(3);
        let pool = Arc::new(
            RunnerPool::new("race", config, Some(backend.clone() as Arc<dyn Backend>))
                .await
                .unwrap(),
        );

        let mut tasks = vec![];
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                let runner = pool.acquire().await.unwrap();
                tokio::time::sleep(Duration::from_millis(10)).await;
                pool.release(&runner).unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(backend.spawn_count() <= 3);
        let stats = pool.stats();
        assert!(stats.runners <= 3);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.spawning, 0);
    }

    #[tokio::test]
    async fn test_min_runners_spawned_at_construction() {
        let backend = MockBackend::new();
        let config = PoolConfig::default().with_min(2).with_max(4);
        let pool = RunnerPool::new("warm", config, Some(backend.clone() as Arc<dyn Backend>))
            .await
            .unwrap();
        assert_eq!(backend.spawn_count(), 2);
        assert_eq!(pool.stats().runners, 2);
    }

    #[tokio::test]
    async fn test_min_without_backend_is_config_error() {
        let config = PoolConfig::default().with_min(1);
        let err = RunnerPool::new("cold", config, None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn test_spawn_failure_releases_reservation() {
        let backend = MockBackend::new();
        backend.fail_spawns(true);
        let pool = RunnerPool::new("flaky", PoolConfig::default(), Some(backend.clone() as Arc<dyn Backend>))
            .await
            .unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvokeError);
        assert_eq!(pool.stats().spawning, 0);

        backend.fail_spawns(false);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_spawn_timeout() {
        let backend = MockBackend::delayed(Duration::from_millis(200));
        let config = PoolConfig {
            spawn_timeout_ms: Some(10),
            ..Default::default()
        };
        let pool = RunnerPool::new("slow", config, Some(backend as Arc<dyn Backend>))
            .await
            .unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(pool.stats().spawning, 0);
    }

    #[tokio::test]
    async fn test_shutdown_is_best_effort() {
        let backend = MockBackend::new();
        let config = PoolConfig::default()
            .with_runner(RunnerTarget::new("http://static"))
            .with_min(3)
            .with_max(3);
        let pool = RunnerPool::new("down", config, Some(backend.clone() as Arc<dyn Backend>))
            .await
            .unwrap();
        assert_eq!(backend.spawn_count(), 2);

        backend.fail_terminate("mock-1");
        let err = pool.shutdown().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvokeError);

        // Both spawned runners were attempted; the static one is not owned
        assert_eq!(backend.terminate_attempts(), 2);
        assert_eq!(pool.stats().runners, 0);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let pool = Arc::new(RunnerPool::new("wake", static_pool_config(1), None).await.unwrap());
        let _held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.shutdown().await.unwrap();
        let err = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoRunner);
    }

    #[tokio::test]
    async fn test_dropped_lease_releases_slot() {
        let pool = Arc::new(RunnerPool::new("lease", static_pool_config(1), None).await.unwrap());

        let lease = pool.lease().await.unwrap();
        assert_eq!(lease.handle().id, "static-lease-0");
        assert_eq!(pool.stats().in_use, 1);
        drop(lease);
        assert_eq!(pool.stats().in_use, 0);

        // A holder cancelled mid-call gives its slot back too
        let holder = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let _lease = pool.lease().await.unwrap();
                tokio::time::sleep(Duration::from_secs(60)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.stats().in_use, 1);
        holder.abort();
        let _ = holder.await;

        let runner = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .expect("slot should be free after cancellation")
            .unwrap();
        pool.release(&runner).unwrap();
    }

    #[tokio::test]
    async fn test_unhealthy_runner_is_evicted_and_replaced() {
        let backend = MockBackend::new();
        let config = PoolConfig::default()
            .with_min(1)
            .with_max(1)
            .with_max_concurrency(2);
        let pool = RunnerPool::new("sick", config, Some(backend.clone() as Arc<dyn Backend>))
            .await
            .unwrap();
        assert_eq!(backend.spawn_count(), 1);

        backend.mark_unhealthy("mock-0");
        let runner = pool.acquire().await.unwrap();
        assert_eq!(runner.id, "mock-1");
        assert_eq!(backend.terminate_attempts(), 1);

        // The evicted runner's leftover slot is skipped as stale
        let stats = pool.stats();
        assert_eq!(stats.runners, 1);
        assert_eq!(stats.in_use, 1);
        let second = pool.acquire().await.unwrap();
        assert_eq!(second.id, "mock-1");
        assert_eq!(backend.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_static_runners_skip_health_checks() {
        let backend = MockBackend::new();
        backend.mark_unhealthy("static-fixed-0");
        let pool = RunnerPool::new(
            "fixed",
            static_pool_config(1),
            Some(backend.clone() as Arc<dyn Backend>),
        )
        .await
        .unwrap();

        let runner = pool.acquire().await.unwrap();
        assert_eq!(runner.id, "static-fixed-0");
        assert_eq!(backend.health_check_count(), 0);
    }

    #[tokio::test]
    async fn test_in_use_never_exceeds_concurrency() {
        let pool = Arc::new(RunnerPool::new("load", static_pool_config(2), None).await.unwrap());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = vec![];
        for _ in 0..20 {
            let pool = Arc::clone(&pool);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                let runner = pool.acquire().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                pool.release(&runner).unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.stats().in_use, 0);
    }
}
