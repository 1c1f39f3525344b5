// src/registry/define.rs
//! Typed method definitions
//!
//! Turns an async closure over concrete argument and result types into a
//! registrable [`MethodDefinition`]. Arguments arrive as a JSON array and are
//! decoded into the closure's argument type (usually a tuple).

use crate::invocation::context::InvocationContext;
use crate::registry::{Handler, MethodDefinition};
use crate::serialization::from_args;
use crate::utils::errors::FlameError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Define a method from a typed async handler
///
/// ```ignore
/// let add = define_method("add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) });
/// ```
pub fn define_method<A, R, F, Fut>(id: impl Into<String>, handler: F) -> MethodDefinition
where
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(InvocationContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    let handler = Arc::new(handler);

    let erased: Handler = Arc::new(move |ctx: InvocationContext, args: Value| {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let args: A = from_args(args)?;
            let result = handler(ctx, args).await?;
            let value = serde_json::to_value(result).map_err(|e| {
                FlameError::serialization("Failed to serialize result").with_details(e.to_string())
            })?;
            Ok(value)
        })
    });

    MethodDefinition::new(id, erased)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_typed_handler() {
        let add = define_method("add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) });
        let result = (add.handler)(InvocationContext::new(None), json!([2, 3]))
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn test_bad_arguments_are_serialization_errors() {
        let add = define_method("add", |_ctx, (a, b): (i64, i64)| async move { Ok(a + b) });
        let err = (add.handler)(InvocationContext::new(None), json!(["two", 3]))
            .await
            .unwrap_err();
        let flame = FlameError::from_handler(err);
        assert_eq!(flame.kind, ErrorKind::SerializationError);
    }

    #[tokio::test]
    async fn test_zero_argument_handler() {
        let ping = define_method("ping", |_ctx, (): ()| async move { Ok("pong") });
        let result = (ping.handler)(InvocationContext::new(None), json!([]))
            .await
            .unwrap();
        assert_eq!(result, json!("pong"));
    }
}
