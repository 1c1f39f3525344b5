// src/invocation/context.rs
//! Per-invocation context handed to handlers

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a handler knows about the call it is serving
///
/// Handlers are expected to watch `cancellation`: it fires when the
/// invocation's deadline passes.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub invocation_id: String,
    pub deadline: Option<DateTime<Utc>>,
    pub cancellation: CancellationToken,
    pub trace: Option<HashMap<String, String>>,
}

impl InvocationContext {
    /// Fresh context with a generated id
    pub fn new(timeout: Option<Duration>) -> Self {
        Self::with_id(ulid::Ulid::new().to_string(), timeout)
    }

    pub fn with_id(invocation_id: impl Into<String>, timeout: Option<Duration>) -> Self {
        let deadline = timeout
            .and_then(|t| ChronoDuration::from_std(t).ok())
            .map(|t| Utc::now() + t);

        Self {
            invocation_id: invocation_id.into(),
            deadline,
            cancellation: CancellationToken::new(),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: Option<HashMap<String, String>>) -> Self {
        self.trace = trace;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the invocation is cancelled
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }
}
