// src/invocation/protocol.rs
//! Wire envelope exchanged between a parent and a runner
//!
//! Request: `POST <invoke_path>` with a JSON [`InvocationRequest`] body and an
//! optional `x-flame-signature` header. Response: JSON [`InvocationResponse`],
//! status 200 for both success and application failure.

use crate::invocation::options::FlameOptions;
use crate::serialization;
use crate::utils::config::{FlameConfig, DEFAULT_REQUEST_TIMEOUT_MS, SIGNATURE_HEADER};
use crate::utils::errors::{ErrorKind, FlameError, Result};
use crate::security;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Signed call envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub invocation_id: String,
    pub service_id: String,
    pub method_id: String,

    /// Serialized argument array
    pub args: String,

    /// Issued-at, unix millis
    pub iat: i64,

    /// Expiry, unix millis
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<HashMap<String, String>>,
}

fn default_error_code() -> String {
    ErrorKind::HandlerError.code().to_string()
}

/// Error as it crosses the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    #[serde(default = "default_error_code")]
    pub code: String,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

/// Call outcome: `{ok: true, result}` or `{ok: false, error}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub ok: bool,

    /// Serialized result, present when `ok`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl InvocationResponse {
    pub fn success(result: String) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failure envelope; internal details only travel when `expose_details`
    pub fn failure(error: &FlameError, expose_details: bool) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(WireError {
                code: error.code().to_string(),
                message: error.message.clone(),
                details: if expose_details {
                    error.details.clone()
                } else {
                    None
                },
                retryable: error.retryable,
            }),
        }
    }

    /// Decode the result, or turn a reported failure into `remote_error`
    pub fn into_result(self) -> Result<Value> {
        if self.ok {
            return match self.result {
                Some(result) => serialization::deserialize(&result),
                None => Ok(Value::Null),
            };
        }

        let wire = self.error.unwrap_or_else(|| WireError {
            code: default_error_code(),
            message: "Runner reported a failure without details".to_string(),
            details: None,
            retryable: None,
        });

        let mut error = FlameError::remote(wire.code, wire.message);
        error.details = wire.details;
        error.retryable = wire.retryable;
        Err(error)
    }
}

/// A request ready to send
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    pub invocation_id: String,
    pub body: Bytes,
    pub headers: Vec<(&'static str, String)>,

    /// Hard deadline for the HTTP exchange, when one is configured
    pub timeout: Option<Duration>,
}

/// Build and sign the envelope for one attempt
///
/// The per-call timeout (`options`, then config) is forwarded to the runner
/// and bounds the exchange; the expiry window falls back to the default
/// request timeout when neither is set.
pub fn build_request(
    service_id: &str,
    method_id: &str,
    args: &Value,
    options: Option<&FlameOptions>,
    config: &FlameConfig,
) -> Result<BuiltRequest> {
    let timeout_ms = options
        .and_then(|o| o.timeout_ms)
        .filter(|ms| *ms > 0)
        .or(config.request_timeout_ms.filter(|ms| *ms > 0));

    let now = Utc::now().timestamp_millis();
    let window = timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
    let invocation_id = ulid::Ulid::new().to_string();

    let request = InvocationRequest {
        invocation_id: invocation_id.clone(),
        service_id: service_id.to_string(),
        method_id: method_id.to_string(),
        args: serialization::serialize(args)?,
        iat: now,
        exp: now.saturating_add(window as i64),
        timeout_ms,
        idempotency_key: options.and_then(|o| o.idempotency_key.clone()),
        trace: None,
    };

    let body = serde_json::to_vec(&request).map_err(|e| {
        FlameError::serialization("Failed to encode request").with_details(e.to_string())
    })?;

    let mut headers = vec![("content-type", "application/json".to_string())];
    if let Some(secret) = config.secret() {
        headers.push((SIGNATURE_HEADER, security::sign(&body, secret)));
    }

    Ok(BuiltRequest {
        invocation_id,
        body: Bytes::from(body),
        headers,
        timeout: timeout_ms.map(Duration::from_millis),
    })
}
