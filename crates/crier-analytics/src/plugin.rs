//! Analytics plugin for the Crier plugin system
//!
//! Registers the rollup service and exposes the dashboard and recompute
//! endpoints. The nightly recompute loop is spawned by the server alongside
//! the other background jobs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crier_core::plugin::{
    CrierPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use crier_database::DbConnection;
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::handlers::{configure_routes, AnalyticsApiDoc, AnalyticsState};
use crate::service::AnalyticsService;

pub struct AnalyticsPlugin;

impl AnalyticsPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AnalyticsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CrierPlugin for AnalyticsPlugin {
    fn name(&self) -> &'static str {
        "analytics"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DbConnection>();
            context.register_service(Arc::new(AnalyticsService::new(db)));

            tracing::debug!("Analytics plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let analytics = context.require_service::<AnalyticsService>();

        let state = Arc::new(AnalyticsState { analytics });
        let routes = configure_routes().with_state(state);

        Some(PluginRoutes { router: routes })
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(AnalyticsApiDoc::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crier_database::test_utils::TestDatabase;

    #[tokio::test]
    async fn test_analytics_plugin_name() {
        assert_eq!(AnalyticsPlugin::new().name(), "analytics");
    }

    #[tokio::test]
    async fn test_analytics_plugin_registers_services() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let context = ServiceRegistrationContext::new();
        context.register_service(test_db.connection_arc());

        let plugin = AnalyticsPlugin::new();
        plugin.register_services(&context).await.unwrap();

        assert!(context.get_service::<AnalyticsService>().is_some());

        let plugin_context = context.create_plugin_context();
        assert!(plugin.configure_routes(&plugin_context).is_some());
    }
}
