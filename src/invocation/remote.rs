// src/invocation/remote.rs
//! HTTP dispatch to a runner

use crate::invocation::options::FlameOptions;
use crate::invocation::protocol::{build_request, InvocationResponse};
use crate::pool::types::RunnerHandle;
use crate::utils::config::FlameConfig;
use crate::utils::errors::{FlameError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use tracing::{debug, instrument};

/// Pooled HTTP client shared by every remote call of a runtime
#[derive(Clone)]
pub struct InvocationClient {
    http: Client<HttpConnector, Full<Bytes>>,
}

impl Default for InvocationClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InvocationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationClient").finish_non_exhaustive()
    }
}

impl InvocationClient {
    pub fn new() -> Self {
        let http = Client::builder(TokioExecutor::new()).build_http();
        Self { http }
    }

    /// Send one signed attempt to `runner`
    ///
    /// The whole exchange (connect, send, read body) is bounded by the
    /// effective timeout; on expiry the request is dropped and a retryable
    /// `timeout` is returned.
    #[instrument(skip(self, args, options, config), fields(runner = %runner.id))]
    pub async fn invoke_remote(
        &self,
        runner: &RunnerHandle,
        service_id: &str,
        method_id: &str,
        args: &Value,
        options: Option<&FlameOptions>,
        config: &FlameConfig,
    ) -> Result<Value> {
        let built = build_request(service_id, method_id, args, options, config)?;
        let uri = format!("{}{}", runner.url.trim_end_matches('/'), config.invoke_path());
        debug!("Invoking {}.{} at {} ({})", service_id, method_id, uri, built.invocation_id);

        let mut request = Request::builder().method(Method::POST).uri(&uri);
        for (name, value) in &built.headers {
            request = request.header(*name, value);
        }
        let request = request
            .body(Full::new(built.body))
            .map_err(|e| FlameError::invoke(format!("Invalid runner URL '{}': {}", uri, e)))?;

        let exchange = self.exchange(request);
        let body = match built.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| FlameError::timeout("Invocation timed out"))??,
            None => exchange.await?,
        };

        let response: InvocationResponse = serde_json::from_slice(&body).map_err(|e| {
            FlameError::invoke("Failed to parse runner response").with_details(e.to_string())
        })?;

        response.into_result()
    }

    async fn exchange(&self, request: Request<Full<Bytes>>) -> Result<Bytes> {
        let response = self.http.request(request).await.map_err(|e| {
            FlameError::transport("Failed to invoke runner").with_details(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlameError::transport(format!(
                "Runner responded with {}",
                status.as_u16()
            ))
            .with_details(serde_json::json!({ "status": status.as_u16() })));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| {
                FlameError::transport("Failed to read runner response").with_details(e.to_string())
            })?
            .to_bytes();
        Ok(body)
    }
}
