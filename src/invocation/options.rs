// src/invocation/options.rs
//! Per-call overrides

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 250;

/// Retry policy requested by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Total attempts including the first (values <= 1 disable retry)
    pub max_attempts: Option<u32>,

    /// Delay before the second attempt; doubles on every further attempt
    pub base_delay_ms: Option<u64>,
}

impl RetryOptions {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            base_delay_ms: Some(base_delay_ms),
        }
    }
}

/// Options attached to a service, a method, or a single call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlameOptions {
    /// Target pool name
    pub pool: Option<String>,

    /// Per-attempt deadline
    pub timeout_ms: Option<u64>,

    /// Forwarded to the runner untouched
    pub idempotency_key: Option<String>,

    /// Retry policy for remote dispatch
    pub retry: Option<RetryOptions>,
}

impl FlameOptions {
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.retry = Some(RetryOptions::new(max_attempts, base_delay_ms));
        self
    }

    /// Effective per-call timeout; zero means none
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Field-wise overlay: values set in `overrides` win
    pub fn merge(base: Option<&FlameOptions>, overrides: Option<&FlameOptions>) -> Option<FlameOptions> {
        match (base, overrides) {
            (None, None) => None,
            (Some(base), None) => Some(base.clone()),
            (None, Some(overrides)) => Some(overrides.clone()),
            (Some(base), Some(overrides)) => Some(FlameOptions {
                pool: overrides.pool.clone().or_else(|| base.pool.clone()),
                timeout_ms: overrides.timeout_ms.or(base.timeout_ms),
                idempotency_key: overrides
                    .idempotency_key
                    .clone()
                    .or_else(|| base.idempotency_key.clone()),
                retry: overrides.retry.clone().or_else(|| base.retry.clone()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_overrides() {
        let service = FlameOptions::default()
            .with_pool("gpu")
            .with_timeout(Duration::from_secs(5));
        let method = FlameOptions::default().with_timeout(Duration::from_millis(100));

        let merged = FlameOptions::merge(Some(&service), Some(&method)).unwrap();
        assert_eq!(merged.pool.as_deref(), Some("gpu"));
        assert_eq!(merged.timeout_ms, Some(100));
        assert!(FlameOptions::merge(None, None).is_none());
    }

    #[test]
    fn test_zero_timeout_is_none() {
        let options = FlameOptions {
            timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(options.timeout().is_none());
    }
}
