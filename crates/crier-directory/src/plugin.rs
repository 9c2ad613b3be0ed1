//! Directory plugin for the Crier plugin system
//!
//! Exposes the user directory services and the audience resolver, plus the
//! audience preview endpoint.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crier_core::plugin::{
    CrierPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use crier_database::DbConnection;
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::handlers::{configure_routes, DirectoryApiDoc, DirectoryState};
use crate::services::{AudienceResolver, DeviceTokenService, UserService};

pub struct DirectoryPlugin;

impl DirectoryPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DirectoryPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CrierPlugin for DirectoryPlugin {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DbConnection>();

            context.register_service(Arc::new(UserService::new(db.clone())));
            context.register_service(Arc::new(DeviceTokenService::new(db.clone())));
            context.register_service(Arc::new(AudienceResolver::new(db)));

            tracing::debug!("Directory plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let resolver = context.require_service::<AudienceResolver>();

        let state = Arc::new(DirectoryState { resolver });
        let routes = configure_routes().with_state(state);

        Some(PluginRoutes { router: routes })
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(DirectoryApiDoc::openapi())
    }
}
