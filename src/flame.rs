// src/flame.rs
//! Application context
//!
//! A [`Flame`] owns the service registry and the current [`Runtime`]. Build
//! one at process start and hand clones to whatever needs to register or
//! call methods:
//!
//! 1. `Flame::new(config)`
//! 2. register services (`register_service`, `function`)
//! 3. runner: `runner_server(..)`; parent: call through method handles
//! 4. `shutdown()` before exit
//!
//! Parent and runner processes register the same services so that a method
//! handle resolves to the same `(service, method)` pair on both sides.

use crate::invocation::context::InvocationContext;
use crate::invocation::options::FlameOptions;
use crate::registry::{define_method, MethodDefinition, Registry, ServiceDefinition};
use crate::runtime::Runtime;
use crate::server::{start_runner_server, RunnerServerHandle, RunnerServerOptions};
use crate::serialization::to_args;
use crate::utils::config::{FlameConfig, Mode};
use crate::utils::errors::{FlameError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{info, warn};

/// Method id used by single-function services
pub const DEFAULT_METHOD: &str = "default";

struct FlameInner {
    registry: Arc<Registry>,
    config: RwLock<FlameConfig>,
    runtime: RwLock<Arc<Runtime>>,
}

/// Shared handle to the registry and runtime
#[derive(Clone)]
pub struct Flame {
    inner: Arc<FlameInner>,
}

impl Flame {
    pub fn new(config: FlameConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let runtime = Arc::new(Runtime::new(config.clone(), Arc::clone(&registry)));

        Self {
            inner: Arc::new(FlameInner {
                registry,
                config: RwLock::new(config),
                runtime: RwLock::new(runtime),
            }),
        }
    }

    /// Merge `config` into the current configuration and swap in a fresh
    /// runtime; the previous runtime's pools are shut down
    ///
    /// Existing method handles dispatch through the new runtime.
    pub async fn configure(&self, config: FlameConfig) -> Result<()> {
        let merged = self.inner.config.read().merge(config);
        merged.validate()?;

        let runtime = Arc::new(Runtime::new(merged.clone(), Arc::clone(&self.inner.registry)));
        *self.inner.config.write() = merged;
        let previous = std::mem::replace(&mut *self.inner.runtime.write(), runtime);

        info!("Reconfigured ({} mode)", self.mode().as_str());
        if let Err(e) = previous.shutdown().await {
            warn!("Previous runtime did not shut down cleanly: {}", e);
        }
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        self.runtime().mode()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// Current runtime
    pub fn runtime(&self) -> Arc<Runtime> {
        Arc::clone(&self.inner.runtime.read())
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> FlameConfig {
        self.inner.config.read().clone()
    }

    /// Register (or extend) a service and return a handle to it
    pub fn register_service(
        &self,
        id: impl Into<String>,
        methods: Vec<MethodDefinition>,
        options: Option<FlameOptions>,
    ) -> Result<ServiceHandle> {
        let id = id.into();
        let service = methods
            .into_iter()
            .fold(ServiceDefinition::new(id.clone()), ServiceDefinition::with_method)
            .with_options(options);
        self.inner.registry.register_service(service)?;

        Ok(ServiceHandle {
            flame: self.clone(),
            service_id: id,
        })
    }

    /// Register a single-method service called `id` and return its handle
    pub fn function<A, R, F, Fut>(
        &self,
        id: impl Into<String>,
        handler: F,
        options: Option<FlameOptions>,
    ) -> Result<MethodHandle<A, R>>
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(InvocationContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let service = self.register_service(id, vec![define_method(DEFAULT_METHOD, handler)], options)?;
        service.method(DEFAULT_METHOD)
    }

    /// Start a runner server for this registry
    ///
    /// Unset options come from the current configuration.
    pub async fn runner_server(
        &self,
        options: Option<RunnerServerOptions>,
    ) -> Result<RunnerServerHandle> {
        let options = options.unwrap_or_else(|| RunnerServerOptions::from_config(&self.config()));
        start_runner_server(Arc::clone(&self.inner.registry), options).await
    }

    /// Shut down the current runtime's pools
    pub async fn shutdown(&self) -> Result<()> {
        self.runtime().shutdown().await
    }
}

impl std::fmt::Debug for Flame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flame")
            .field("mode", &self.mode())
            .field("registry", &self.inner.registry)
            .finish()
    }
}

/// Handle to a registered service
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    flame: Flame,
    service_id: String,
}

impl ServiceHandle {
    pub fn id(&self) -> &str {
        &self.service_id
    }

    /// Registered method ids, sorted
    pub fn method_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .flame
            .registry()
            .get_service(&self.service_id)
            .map(|service| service.methods.into_keys().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Typed handle to one method; service options are overlaid by the
    /// method's own options
    pub fn method<A, R>(&self, method_id: &str) -> Result<MethodHandle<A, R>> {
        let service = self
            .flame
            .registry()
            .get_service(&self.service_id)
            .ok_or_else(|| FlameError::registry(format!("Service not found: {}", self.service_id)))?;
        let method = service.methods.get(method_id).ok_or_else(|| {
            FlameError::registry(format!("Method not found: {}.{}", self.service_id, method_id))
        })?;

        Ok(MethodHandle {
            flame: self.flame.clone(),
            service_id: self.service_id.clone(),
            method_id: method_id.to_string(),
            options: FlameOptions::merge(service.options.as_ref(), method.options.as_ref()),
            _marker: PhantomData,
        })
    }
}

/// Callable handle to one method with argument type `A` and result `R`
pub struct MethodHandle<A, R> {
    flame: Flame,
    service_id: String,
    method_id: String,
    options: Option<FlameOptions>,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> Clone for MethodHandle<A, R> {
    fn clone(&self) -> Self {
        Self {
            flame: self.flame.clone(),
            service_id: self.service_id.clone(),
            method_id: self.method_id.clone(),
            options: self.options.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, R> std::fmt::Debug for MethodHandle<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodHandle")
            .field("service_id", &self.service_id)
            .field("method_id", &self.method_id)
            .field("options", &self.options)
            .finish()
    }
}

impl<A, R> MethodHandle<A, R>
where
    A: Serialize,
    R: DeserializeOwned,
{
    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn method_id(&self) -> &str {
        &self.method_id
    }

    /// Registered options for this method
    pub fn options(&self) -> Option<&FlameOptions> {
        self.options.as_ref()
    }

    pub async fn call(&self, args: A) -> Result<R> {
        self.call_with(args, None).await
    }

    /// Call with per-call overrides on top of the registered options
    pub async fn call_with(&self, args: A, overrides: Option<&FlameOptions>) -> Result<R> {
        let args = to_args(&args)?;
        let value = self.call_value(args, overrides).await?;
        serde_json::from_value(value).map_err(|e| {
            FlameError::serialization("Failed to decode result").with_details(e.to_string())
        })
    }

    /// Untyped call with a JSON argument array
    pub async fn call_value(&self, args: Value, overrides: Option<&FlameOptions>) -> Result<Value> {
        let options = FlameOptions::merge(self.options.as_ref(), overrides);
        self.flame
            .runtime()
            .invoke_result(&self.service_id, &self.method_id, args, options.as_ref())
            .await
    }
}
