//! Messaging plugin for the Crier plugin system
//!
//! Registers the thread CRUD service and its routes. Messaging stays outside
//! the dispatch pipeline; posting a message never queues channel deliveries.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crier_core::plugin::{
    CrierPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use crier_database::DbConnection;
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::handlers::{configure_routes, MessagingApiDoc, MessagingState};
use crate::service::MessagingService;

pub struct MessagingPlugin;

impl MessagingPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MessagingPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CrierPlugin for MessagingPlugin {
    fn name(&self) -> &'static str {
        "messaging"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DbConnection>();
            context.register_service(Arc::new(MessagingService::new(db)));

            tracing::debug!("Messaging plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let messaging = context.require_service::<MessagingService>();

        let state = Arc::new(MessagingState { messaging });
        let routes = configure_routes().with_state(state);

        Some(PluginRoutes { router: routes })
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(MessagingApiDoc::openapi())
    }
}
