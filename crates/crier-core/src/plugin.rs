//! Plugin system for modular service registration and route configuration
//!
//! Every HTTP-facing crate in the workspace exposes a plugin that wires its
//! services into a shared type-keyed registry, mounts its axum routes under
//! `/api`, and contributes a utoipa document to one merged OpenAPI schema.
//! Plugins initialize in registration order, so a plugin may require any
//! service registered by an earlier one and fail fast when it is missing.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use axum::Router;
use thiserror::Error;
use tracing::debug;
use utoipa::openapi::security::SecurityScheme;
use utoipa::openapi::{ComponentsBuilder, OpenApi};

use crate::openapi::merge_openapi_schemas;

// Re-export for plugin implementations
pub use axum;
pub use utoipa;

/// Errors that can occur during plugin operations
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin registration failed for '{plugin_name}': {error}")]
    PluginRegistrationFailed { plugin_name: String, error: String },

    #[error("Service '{service_type}' is required but not registered")]
    ServiceNotFound { service_type: String },

    #[error("Failed to initialize plugin system: {0}")]
    InitializationFailed(String),
}

/// Core plugin trait that defines the plugin interface
pub trait CrierPlugin: Send + Sync {
    /// Unique identifier for this plugin
    fn name(&self) -> &'static str;

    /// Register services that this plugin provides
    ///
    /// Use `context.require_service::<T>()` to get dependencies.
    /// Use `context.register_service(service)` to provide services for other plugins.
    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>>;

    /// Configure HTTP routes for this plugin
    ///
    /// Return None if this plugin doesn't provide HTTP endpoints.
    fn configure_routes(&self, _context: &PluginContext) -> Option<PluginRoutes> {
        None
    }

    /// Provide OpenAPI schema for this plugin's endpoints
    ///
    /// Return None if this plugin doesn't have API documentation.
    fn openapi_schema(&self) -> Option<OpenApi> {
        None
    }
}

/// Route configuration returned by plugins
pub struct PluginRoutes {
    /// The actual router with handlers
    pub router: Router,
}

impl PluginRoutes {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

/// Type-safe service registry for dependency injection
pub struct ServiceRegistry {
    services: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Register a service for other plugins to use
    pub fn register<T: Send + Sync + 'static + ?Sized>(&self, service: Arc<T>) {
        debug!("Registering service: {}", std::any::type_name::<T>());
        self.services
            .lock()
            .unwrap()
            .insert(TypeId::of::<T>(), Box::new(service));
    }

    /// Get a service if it's registered
    pub fn get<T: Send + Sync + 'static + ?Sized>(&self) -> Option<Arc<T>> {
        self.services
            .lock()
            .unwrap()
            .get(&TypeId::of::<T>())
            .and_then(|any| any.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Require a service - panics with helpful error if not available
    pub fn require<T: Send + Sync + 'static + ?Sized>(&self) -> Arc<T> {
        self.get::<T>().unwrap_or_else(|| {
            panic!(
                "Service '{}' is required but not registered. \
                 Make sure the plugin providing this service is registered before plugins that depend on it.",
                std::any::type_name::<T>()
            )
        })
    }
}

/// Read-only context provided to plugins during route configuration
pub struct PluginContext {
    service_registry: Arc<ServiceRegistry>,
}

impl PluginContext {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            service_registry: registry,
        }
    }

    /// Get a service if it's available (for optional dependencies)
    pub fn get_service<T: Send + Sync + 'static + ?Sized>(&self) -> Option<Arc<T>> {
        self.service_registry.get::<T>()
    }

    /// Require a service - panics with clear error if not available
    pub fn require_service<T: Send + Sync + 'static + ?Sized>(&self) -> Arc<T> {
        self.service_registry.require::<T>()
    }
}

/// Context for service registration during plugin initialization
pub struct ServiceRegistrationContext {
    service_registry: Arc<ServiceRegistry>,
}

impl Default for ServiceRegistrationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRegistrationContext {
    pub fn new() -> Self {
        Self {
            service_registry: Arc::new(ServiceRegistry::new()),
        }
    }

    /// Register a service for other plugins to use
    pub fn register_service<T: Send + Sync + 'static + ?Sized>(&self, service: Arc<T>) {
        self.service_registry.register(service);
    }

    /// Get a service if it's available (for dependencies)
    pub fn get_service<T: Send + Sync + 'static + ?Sized>(&self) -> Option<Arc<T>> {
        self.service_registry.get::<T>()
    }

    /// Require a service - panics with clear error if not available
    pub fn require_service<T: Send + Sync + 'static + ?Sized>(&self) -> Arc<T> {
        self.service_registry.require::<T>()
    }

    /// Create a read-only context for plugin operations
    pub fn create_plugin_context(&self) -> PluginContext {
        PluginContext::new(self.service_registry.clone())
    }
}

/// Main plugin manager that handles plugin registration, initialization, and application building
pub struct PluginManager {
    plugins: Vec<Box<dyn CrierPlugin>>,
    context: ServiceRegistrationContext,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginManager {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
            context: ServiceRegistrationContext::new(),
        }
    }

    /// Register a plugin (order matters for dependencies)
    pub fn register_plugin(&mut self, plugin: Box<dyn CrierPlugin>) {
        debug!("Registering plugin: {}", plugin.name());
        self.plugins.push(plugin);
    }

    /// Initialize all plugins in registration order
    pub async fn initialize_plugins(&mut self) -> Result<(), PluginError> {
        debug!("Initializing {} plugins", self.plugins.len());

        for plugin in &self.plugins {
            debug!("Initializing plugin: {}", plugin.name());

            plugin.register_services(&self.context).await.map_err(|e| {
                PluginError::PluginRegistrationFailed {
                    plugin_name: plugin.name().to_string(),
                    error: e.to_string(),
                }
            })?;

            debug!("Successfully initialized plugin: {}", plugin.name());
        }

        Ok(())
    }

    /// Build the complete application router from all plugin routes
    pub fn build_application(&self) -> Router {
        debug!("Building application with {} plugins", self.plugins.len());

        let plugin_context = self.context.create_plugin_context();
        let mut api_router = Router::new();

        for plugin in &self.plugins {
            if let Some(plugin_routes) = plugin.configure_routes(&plugin_context) {
                debug!("Adding routes for plugin: {}", plugin.name());
                api_router = api_router.merge(plugin_routes.router);
            }
        }

        Router::new().nest("/api", api_router)
    }

    /// Get the unified OpenAPI schema from all plugins
    pub fn get_unified_openapi(&self) -> OpenApi {
        use utoipa::openapi::*;

        let base = OpenApiBuilder::new()
            .info(
                InfoBuilder::new()
                    .title("Crier")
                    .description(Some(
                        "School communications API: announcements, bulk messaging, \
                         notifications, preferences, and delivery analytics",
                    ))
                    .version("1.0.0")
                    .contact(Some(
                        ContactBuilder::new()
                            .name(Some("Crier Support"))
                            .url(Some("https://crier.sh"))
                            .build(),
                    ))
                    .build(),
            )
            .servers(Some(vec![ServerBuilder::new()
                .url("/api")
                .description(Some("Base path for all API endpoints"))
                .build()]))
            .components(Some(
                ComponentsBuilder::new()
                    .security_scheme("gateway_headers", self.create_gateway_header_scheme())
                    .build(),
            ))
            .build();

        let plugin_schemas: Vec<OpenApi> = self
            .plugins
            .iter()
            .filter_map(|plugin| {
                let schema = plugin.openapi_schema();
                if schema.is_some() {
                    debug!("Merging OpenAPI schema for plugin: {}", plugin.name());
                }
                schema
            })
            .collect();

        merge_openapi_schemas(base, plugin_schemas)
    }

    /// Describe the identity headers injected by the upstream gateway
    fn create_gateway_header_scheme(&self) -> SecurityScheme {
        use utoipa::openapi::security::*;

        SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
            "x-user-id",
            "Caller identity injected by the trusted gateway. `x-user-id` carries the \
             numeric user id and `x-user-role` one of admin, staff, teacher, parent, student.",
        )))
    }

    /// Get access to the service registration context for manual service registration
    /// This is typically used before plugin initialization to register core services
    pub fn service_context(&self) -> &ServiceRegistrationContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Clock: Send + Sync {
        fn now_label(&self) -> &'static str;
    }

    struct FixedClock;

    impl Clock for FixedClock {
        fn now_label(&self) -> &'static str {
            "fixed"
        }
    }

    #[test]
    fn registry_roundtrips_concrete_and_trait_services() {
        let registry = ServiceRegistry::new();

        registry.register(Arc::new("hello".to_string()));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock);
        registry.register(clock);

        assert_eq!(*registry.require::<String>(), "hello");
        assert_eq!(registry.require::<dyn Clock>().now_label(), "fixed");
        assert!(registry.get::<u64>().is_none());
    }

    #[test]
    #[should_panic(expected = "is required but not registered")]
    fn require_panics_on_missing_service() {
        let registry = ServiceRegistry::new();
        registry.require::<String>();
    }

    struct ProviderPlugin;

    impl CrierPlugin for ProviderPlugin {
        fn name(&self) -> &'static str {
            "provider"
        }

        fn register_services<'a>(
            &'a self,
            context: &'a ServiceRegistrationContext,
        ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
            Box::pin(async move {
                context.register_service(Arc::new(41_i32));
                Ok(())
            })
        }
    }

    struct ConsumerPlugin;

    impl CrierPlugin for ConsumerPlugin {
        fn name(&self) -> &'static str {
            "consumer"
        }

        fn register_services<'a>(
            &'a self,
            context: &'a ServiceRegistrationContext,
        ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
            Box::pin(async move {
                let base = context.require_service::<i32>();
                context.register_service(Arc::new(format!("answer={}", *base + 1)));
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn plugins_initialize_in_registration_order() {
        let mut manager = PluginManager::new();
        manager.register_plugin(Box::new(ProviderPlugin));
        manager.register_plugin(Box::new(ConsumerPlugin));

        manager.initialize_plugins().await.unwrap();

        let wired = manager.service_context().require_service::<String>();
        assert_eq!(*wired, "answer=42");
    }

    #[test]
    fn unified_openapi_carries_gateway_scheme() {
        let manager = PluginManager::new();
        let doc = manager.get_unified_openapi();

        assert_eq!(doc.info.title, "Crier");
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("gateway_headers"));
    }
}
