// src/registry/mod.rs
//! Service and method registry
//!
//! Maps `(service_id, method_id)` to a type-erased async handler. Both the
//! parent and the runner register the same services: the runner executes
//! them, the parent only uses the registration to build method handles.

pub mod define;

pub use define::define_method;

use crate::invocation::context::InvocationContext;
use crate::invocation::options::FlameOptions;
use crate::utils::errors::{FlameError, Result};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Future returned by an erased handler
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Erased handler: context plus JSON argument array in, JSON result out
pub type Handler = Arc<dyn Fn(InvocationContext, Value) -> HandlerFuture + Send + Sync>;

/// One registered method
#[derive(Clone)]
pub struct MethodDefinition {
    pub id: String,
    pub handler: Handler,
    pub options: Option<FlameOptions>,
}

impl MethodDefinition {
    pub fn new(id: impl Into<String>, handler: Handler) -> Self {
        Self {
            id: id.into(),
            handler,
            options: None,
        }
    }

    pub fn with_options(mut self, options: FlameOptions) -> Self {
        self.options = Some(options);
        self
    }
}

impl fmt::Debug for MethodDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDefinition")
            .field("id", &self.id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// A named group of methods
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub id: String,
    pub methods: HashMap<String, MethodDefinition>,
    pub options: Option<FlameOptions>,
}

impl ServiceDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            methods: HashMap::new(),
            options: None,
        }
    }

    pub fn with_method(mut self, method: MethodDefinition) -> Self {
        self.methods.insert(method.id.clone(), method);
        self
    }

    pub fn with_options(mut self, options: Option<FlameOptions>) -> Self {
        self.options = options;
        self
    }
}

/// Registry of services
#[derive(Default)]
pub struct Registry {
    services: RwLock<HashMap<String, ServiceDefinition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, merging into an existing one with the same id
    ///
    /// Fails if a method id is already bound to a different handler or if
    /// both registrations carry different service options.
    pub fn register_service(&self, service: ServiceDefinition) -> Result<()> {
        let mut services = self.services.write();

        let Some(existing) = services.get_mut(&service.id) else {
            debug!("Registering service {} ({} methods)", service.id, service.methods.len());
            services.insert(service.id.clone(), service);
            return Ok(());
        };

        if let (Some(current), Some(next)) = (&existing.options, &service.options) {
            if current != next {
                return Err(FlameError::registry(format!(
                    "Service already registered with different options: {}",
                    service.id
                )));
            }
        }

        for (method_id, method) in &service.methods {
            if let Some(current) = existing.methods.get(method_id) {
                if !Arc::ptr_eq(&current.handler, &method.handler) {
                    return Err(FlameError::registry(format!(
                        "Method already registered: {}.{}",
                        service.id, method_id
                    )));
                }
            }
        }

        if existing.options.is_none() {
            existing.options = service.options;
        }
        for (method_id, method) in service.methods {
            existing.methods.entry(method_id).or_insert(method);
        }
        debug!("Merged registration into service {}", existing.id);
        Ok(())
    }

    pub fn get_service(&self, service_id: &str) -> Option<ServiceDefinition> {
        self.services.read().get(service_id).cloned()
    }

    pub fn list_services(&self) -> Vec<ServiceDefinition> {
        self.services.read().values().cloned().collect()
    }

    /// Look up a method, failing with `registry_error`
    pub fn get_method(&self, service_id: &str, method_id: &str) -> Result<MethodDefinition> {
        let services = self.services.read();
        let service = services
            .get(service_id)
            .ok_or_else(|| FlameError::registry(format!("Service not found: {}", service_id)))?;
        service.methods.get(method_id).cloned().ok_or_else(|| {
            FlameError::registry(format!("Method not found: {}.{}", service_id, method_id))
        })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let services = self.services.read();
        let mut ids: Vec<&String> = services.keys().collect();
        ids.sort();
        f.debug_struct("Registry").field("services", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::ErrorKind;

    fn echo() -> MethodDefinition {
        define_method("echo", |_ctx, (value,): (String,)| async move { Ok(value) })
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = Registry::new();
        registry
            .register_service(ServiceDefinition::new("svc").with_method(echo()))
            .unwrap();

        assert!(registry.get_method("svc", "echo").is_ok());
        assert_eq!(registry.list_services().len(), 1);

        let err = registry.get_method("svc", "missing").unwrap_err();
        assert_eq!(err.kind, ErrorKind::RegistryError);
        let err = registry.get_method("missing", "echo").unwrap_err();
        assert_eq!(err.kind, ErrorKind::RegistryError);
    }

    #[test]
    fn test_merge_adds_methods() {
        let registry = Registry::new();
        let shared = echo();
        registry
            .register_service(ServiceDefinition::new("svc").with_method(shared.clone()))
            .unwrap();

        let upper = define_method("upper", |_ctx, (value,): (String,)| async move {
            Ok(value.to_uppercase())
        });
        registry
            .register_service(
                ServiceDefinition::new("svc")
                    .with_method(shared)
                    .with_method(upper),
            )
            .unwrap();

        assert_eq!(registry.get_service("svc").unwrap().methods.len(), 2);
    }

    #[test]
    fn test_conflicting_handler_rejected() {
        let registry = Registry::new();
        registry
            .register_service(ServiceDefinition::new("svc").with_method(echo()))
            .unwrap();

        let err = registry
            .register_service(ServiceDefinition::new("svc").with_method(echo()))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RegistryError);
    }

    #[test]
    fn test_conflicting_options_rejected() {
        let registry = Registry::new();
        let first = FlameOptions::default().with_pool("a");
        let second = FlameOptions::default().with_pool("b");

        registry
            .register_service(ServiceDefinition::new("svc").with_options(Some(first)))
            .unwrap();
        let err = registry
            .register_service(ServiceDefinition::new("svc").with_options(Some(second)))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RegistryError);
    }
}
