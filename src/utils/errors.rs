// src/utils/errors.rs
//! Error taxonomy shared by the parent, the pool and the runner server
//!
//! Every failure is a [`FlameError`] carrying an [`ErrorKind`]. The kind is
//! what crosses the wire (as its snake_case code) and what the retry loop
//! inspects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, FlameError>;

/// Failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid static configuration
    ConfigError,
    /// Pool has no usable runner and cannot grow
    NoRunner,
    /// Generic invocation failure
    InvokeError,
    /// Network/HTTP-level failure reaching a runner
    TransportError,
    /// Deadline exceeded
    Timeout,
    /// The runner executed the call and reported a failure
    RemoteError,
    /// Unknown service or method
    RegistryError,
    /// Value could not be encoded or decoded
    SerializationError,
    /// Signature-specific failure
    SignatureError,
    /// Untyped failure raised by a handler
    HandlerError,
}

impl ErrorKind {
    /// Wire code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ConfigError => "config_error",
            ErrorKind::NoRunner => "no_runner",
            ErrorKind::InvokeError => "invoke_error",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RemoteError => "remote_error",
            ErrorKind::RegistryError => "registry_error",
            ErrorKind::SerializationError => "serialization_error",
            ErrorKind::SignatureError => "signature_error",
            ErrorKind::HandlerError => "handler_error",
        }
    }

    /// Parse a wire code
    pub fn from_code(code: &str) -> Option<Self> {
        let kind = match code {
            "config_error" => ErrorKind::ConfigError,
            "no_runner" => ErrorKind::NoRunner,
            "invoke_error" => ErrorKind::InvokeError,
            "transport_error" => ErrorKind::TransportError,
            "timeout" => ErrorKind::Timeout,
            "remote_error" => ErrorKind::RemoteError,
            "registry_error" => ErrorKind::RegistryError,
            "serialization_error" => ErrorKind::SerializationError,
            "signature_error" => ErrorKind::SignatureError,
            "handler_error" => ErrorKind::HandlerError,
            _ => return None,
        };
        Some(kind)
    }

    /// Whether failures of this kind are worth another attempt when the
    /// error itself does not say
    fn retryable_by_default(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransportError
                | ErrorKind::Timeout
                | ErrorKind::RemoteError
                | ErrorKind::InvokeError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Crate-wide error
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct FlameError {
    /// Failure class
    pub kind: ErrorKind,

    /// Human readable message
    pub message: String,

    /// Structured details (stripped before crossing the wire unless exposed)
    pub details: Option<Value>,

    /// Explicit retry hint, overriding the kind's default
    pub retryable: Option<bool>,

    /// Code reported by a remote runner, for `remote_error`
    pub remote_code: Option<String>,
}

impl FlameError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            retryable: None,
            remote_code: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigError, message)
    }

    pub fn no_runner(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoRunner, message)
    }

    pub fn invoke(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvokeError, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message).with_retryable(true)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message).with_retryable(true)
    }

    pub fn registry(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RegistryError, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SerializationError, message)
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandlerError, message)
    }

    /// Remote application failure as reported by a runner
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error = Self::new(ErrorKind::RemoteError, message);
        error.remote_code = Some(code.into());
        error
    }

    pub fn with_details(mut self, details: impl Into<Value>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Wire code: the remote runner's code for `remote_error`, else the kind's
    pub fn code(&self) -> &str {
        self.remote_code.as_deref().unwrap_or(self.kind.code())
    }

    /// Whether the retry loop may attempt the call again
    pub fn is_retryable(&self) -> bool {
        self.retryable
            .unwrap_or_else(|| self.kind.retryable_by_default())
    }

    /// Convert a handler failure, keeping typed errors intact
    pub fn from_handler(error: anyhow::Error) -> Self {
        match error.downcast::<FlameError>() {
            Ok(flame) => flame,
            Err(other) => FlameError::handler(other.to_string())
                .with_details(serde_json::json!({ "message": format!("{:#}", other) })),
        }
    }
}

impl From<serde_json::Error> for FlameError {
    fn from(e: serde_json::Error) -> Self {
        FlameError::serialization(e.to_string())
    }
}
