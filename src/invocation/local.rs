// src/invocation/local.rs
//! In-process execution

use crate::invocation::context::InvocationContext;
use crate::invocation::options::FlameOptions;
use crate::registry::{MethodDefinition, Registry};
use crate::utils::errors::{FlameError, Result};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, warn};

/// Run a handler, racing it against `timeout`
///
/// On expiry the context's cancellation token fires and the handler future
/// is dropped. A panicking handler is reported as `handler_error`.
pub async fn execute_handler(
    method: &MethodDefinition,
    ctx: InvocationContext,
    args: Value,
    timeout: Option<Duration>,
) -> Result<Value> {
    let cancellation = ctx.cancellation.clone();
    let invocation_id = ctx.invocation_id.clone();
    let run = AssertUnwindSafe((method.handler)(ctx, args)).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancellation.cancel();
                debug!("Invocation {} timed out after {:?}", invocation_id, limit);
                return Err(FlameError::timeout("Invocation timed out"));
            }
        },
        None => run.await,
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(FlameError::from_handler(e)),
        Err(_) => {
            warn!("Handler for {} panicked", method.id);
            Err(FlameError::handler("Handler panicked"))
        }
    }
}

/// Look up and execute a method in this process
pub async fn invoke_local(
    registry: &Registry,
    service_id: &str,
    method_id: &str,
    args: Value,
    options: Option<&FlameOptions>,
) -> Result<Value> {
    let method = registry.get_method(service_id, method_id)?;
    let timeout = options.and_then(FlameOptions::timeout);
    let ctx = InvocationContext::new(timeout);
    execute_handler(&method, ctx, args, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{define_method, ServiceDefinition};
    use crate::utils::errors::ErrorKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn registry() -> Registry {
        let registry = Registry::new();
        registry
            .register_service(
                ServiceDefinition::new("math")
                    .with_method(define_method("add", |_ctx, (a, b): (i64, i64)| async move {
                        Ok(a + b)
                    }))
                    .with_method(define_method("slow", |_ctx, (): ()| async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(1)
                    }))
                    .with_method(define_method("fail", |_ctx, (): ()| async move {
                        Err::<(), _>(anyhow::anyhow!("broken"))
                    })),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_invoke_local() {
        let result = invoke_local(&registry(), "math", "add", json!([2, 3]), None)
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn test_unknown_method_is_registry_error() {
        let err = invoke_local(&registry(), "math", "sub", json!([]), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RegistryError);
    }

    #[tokio::test]
    async fn test_timeout() {
        let options = FlameOptions::default().with_timeout(Duration::from_millis(10));
        let err = invoke_local(&registry(), "math", "slow", json!([]), Some(&options))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_handler_error() {
        let err = invoke_local(&registry(), "math", "fail", json!([]), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::HandlerError);
        assert_eq!(err.message, "broken");
    }

    #[tokio::test]
    async fn test_timeout_fires_cancellation() {
        let observed = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&observed);
        let method = define_method("watch", move |ctx: InvocationContext, (): ()| {
            let seen = Arc::clone(&seen);
            async move {
                let token = ctx.cancellation.clone();
                tokio::spawn(async move {
                    token.cancelled().await;
                    seen.store(true, Ordering::SeqCst);
                });
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        });

        let ctx = InvocationContext::new(Some(Duration::from_millis(10)));
        let err = execute_handler(&method, ctx, json!([]), Some(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panic_becomes_handler_error() {
        let method = define_method("panic", |_ctx, (): ()| async move {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });
        let err = execute_handler(&method, InvocationContext::new(None), json!([]), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::HandlerError);
    }
}
