// src/server/runner_server.rs
//! HTTP endpoint executing invocations against a local registry
//!
//! Each request runs through a short-circuiting pipeline:
//!
//! 1. method/path mismatch → 404
//! 2. oversized body → 413
//! 3. missing or bad signature (when a secret is configured) → 401
//! 4. malformed JSON → 400
//! 5. `iat`/`exp` outside the skew window → 401
//! 6. undecodable envelope or arguments → 200 `serialization_error`
//! 7. unknown service or method → 404
//! 8. execute with the request's timeout → 200 `{ok, result | error}`

use crate::invocation::context::InvocationContext;
use crate::invocation::local::execute_handler;
use crate::invocation::protocol::{InvocationRequest, InvocationResponse};
use crate::registry::Registry;
use crate::security;
use crate::serialization;
use crate::utils::config::{FlameConfig, HmacConfig, DEFAULT_MAX_SKEW_MS, SIGNATURE_HEADER};
use crate::utils::errors::{FlameError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runner server settings
#[derive(Debug, Clone)]
pub struct RunnerServerOptions {
    /// Bind host (default: 0.0.0.0)
    pub host: String,

    /// Bind port; 0 picks an ephemeral port
    pub port: u16,

    pub invoke_path: String,

    pub max_body_bytes: usize,

    /// Shared secret; requests must be signed when set
    pub security: Option<HmacConfig>,

    /// Include internal error details in failure responses
    pub expose_errors: bool,
}

impl Default for RunnerServerOptions {
    fn default() -> Self {
        Self::from_config(&FlameConfig::default()).with_port(0)
    }
}

impl RunnerServerOptions {
    /// Defaults derived from the shared configuration
    pub fn from_config(config: &FlameConfig) -> Self {
        let server = config.server();
        Self {
            host: server.host,
            port: server.port,
            invoke_path: config.invoke_path().to_string(),
            max_body_bytes: config.max_body_bytes(),
            security: config.security.clone().filter(|s| !s.secret.is_empty()),
            expose_errors: config.expose_errors(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_invoke_path(mut self, path: impl Into<String>) -> Self {
        self.invoke_path = path.into();
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.security = Some(HmacConfig::new(secret));
        self
    }

    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    pub fn with_expose_errors(mut self, expose: bool) -> Self {
        self.expose_errors = expose;
        self
    }
}

/// Request handling state shared by all connections
#[derive(Debug)]
struct RunnerService {
    registry: Arc<Registry>,
    options: RunnerServerOptions,
}

/// A running server
#[derive(Debug)]
pub struct RunnerServerHandle {
    addr: SocketAddr,
    url: String,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl RunnerServerHandle {
    /// Bound socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Base URL parents should use; unspecified binds map to loopback
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stop accepting, let in-flight requests finish, and wait for the loop
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            warn!("Runner server task ended abnormally: {}", e);
        }
        info!("Runner server on {} stopped", self.addr);
    }
}

/// Bind and start serving `registry`
pub async fn start_runner_server(
    registry: Arc<Registry>,
    options: RunnerServerOptions,
) -> Result<RunnerServerHandle> {
    let listener = TcpListener::bind((options.host.as_str(), options.port))
        .await
        .map_err(|e| {
            FlameError::config(format!(
                "Failed to bind runner server on {}:{}: {}",
                options.host, options.port, e
            ))
        })?;
    let addr = listener
        .local_addr()
        .map_err(|e| FlameError::config(format!("Failed to read bound address: {}", e)))?;

    let url = public_url(addr);
    info!("Runner server listening on {} ({})", addr, options.invoke_path);

    let service = Arc::new(RunnerService { registry, options });
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(accept_loop(listener, service, shutdown.clone()));

    Ok(RunnerServerHandle {
        addr,
        url,
        shutdown,
        task,
    })
}

fn public_url(addr: SocketAddr) -> String {
    let ip = addr.ip();
    if !ip.is_unspecified() {
        return format!("http://{}", addr);
    }
    if ip.is_ipv4() {
        format!("http://127.0.0.1:{}", addr.port())
    } else {
        format!("http://[::1]:{}", addr.port())
    }
}

async fn accept_loop(
    listener: TcpListener,
    service: Arc<RunnerService>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let service = Arc::clone(&service);
                let shutdown = shutdown.clone();

                tokio::spawn(async move {
                    debug!("Accepted connection from {}", peer);

                    let io = TokioIo::new(stream);
                    let handler = service_fn(move |req| {
                        let service = Arc::clone(&service);
                        async move { Ok::<_, Infallible>(service.handle(req).await) }
                    });

                    let conn = http1::Builder::new().serve_connection(io, handler);
                    tokio::pin!(conn);

                    let result = tokio::select! {
                        result = conn.as_mut() => result,
                        _ = shutdown.cancelled() => {
                            conn.as_mut().graceful_shutdown();
                            conn.await
                        }
                    };
                    if let Err(e) = result {
                        debug!("Connection error from {}: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

impl RunnerService {
    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let response = self.process(req).await;
        metrics::counter!(
            "flame_runner_responses_total",
            "status" => response.status().as_u16().to_string()
        )
        .increment(1);
        response
    }

    async fn process(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let options = &self.options;

        if *req.method() != Method::POST || req.uri().path() != options.invoke_path {
            return text(StatusCode::NOT_FOUND, "Not found");
        }

        let declared_len = req
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared_len.is_some_and(|len| len > options.max_body_bytes) {
            return text(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large");
        }

        let signature = req
            .headers()
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match Limited::new(req.into_body(), options.max_body_bytes)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return text(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large");
            }
            Err(e) => {
                debug!("Failed to read request body: {}", e);
                return text(StatusCode::BAD_REQUEST, "Failed to read body");
            }
        };

        if let Some(hmac) = &options.security {
            let valid = signature
                .as_deref()
                .is_some_and(|sig| security::verify(&body, sig, &hmac.secret));
            if !valid {
                warn!("Rejected request with missing or invalid signature");
                return text(StatusCode::UNAUTHORIZED, "Invalid signature");
            }
        }

        let payload: Value = match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(_) => return text(StatusCode::BAD_REQUEST, "Invalid JSON"),
        };

        // Absent or non-integer timestamps fail the window like stale ones
        let max_skew_ms = options
            .security
            .as_ref()
            .map(HmacConfig::max_skew_ms)
            .unwrap_or(DEFAULT_MAX_SKEW_MS);
        let iat = payload.get("iat").and_then(Value::as_i64);
        let exp = payload.get("exp").and_then(Value::as_i64);
        let in_window = match (iat, exp) {
            (Some(iat), Some(exp)) => security::validate_window(iat, exp, max_skew_ms),
            _ => false,
        };
        if !in_window {
            return text(StatusCode::UNAUTHORIZED, "Request expired");
        }

        let request: InvocationRequest = match serde_json::from_value(payload) {
            Ok(request) => request,
            Err(e) => {
                let err = FlameError::serialization("Malformed invocation request")
                    .with_details(e.to_string())
                    .with_retryable(false);
                return json(&InvocationResponse::failure(&err, options.expose_errors));
            }
        };

        let args = match decode_args(&request.args) {
            Ok(args) => args,
            Err(e) => return json(&InvocationResponse::failure(&e, options.expose_errors)),
        };

        let method = match self
            .registry
            .get_method(&request.service_id, &request.method_id)
        {
            Ok(method) => method,
            Err(e) => {
                debug!("{}", e);
                return text(StatusCode::NOT_FOUND, "Not found");
            }
        };

        let timeout = request
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        let ctx = InvocationContext::with_id(request.invocation_id.clone(), timeout)
            .with_trace(request.trace);

        debug!(
            "Executing {}.{} ({})",
            request.service_id, request.method_id, request.invocation_id
        );

        let outcome = execute_handler(&method, ctx, args, timeout)
            .await
            .and_then(|value| serialization::serialize(&value));

        match outcome {
            Ok(result) => json(&InvocationResponse::success(result)),
            Err(e) => {
                debug!("Invocation {} failed: {}", request.invocation_id, e);
                json(&InvocationResponse::failure(&e, options.expose_errors))
            }
        }
    }
}

/// Arguments must decode to a JSON array
fn decode_args(raw: &str) -> Result<Value> {
    let args: Value = serde_json::from_str(raw).map_err(|e| {
        FlameError::serialization("Failed to deserialize arguments")
            .with_details(e.to_string())
            .with_retryable(false)
    })?;

    if !args.is_array() {
        return Err(FlameError::serialization("Arguments must be an array").with_retryable(false));
    }
    Ok(args)
}

fn text(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn json(payload: &InvocationResponse) -> Response<Full<Bytes>> {
    match serde_json::to_vec(payload) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!("Failed to encode response: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode response")
        }
    }
}
