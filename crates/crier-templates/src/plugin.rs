//! Templates plugin for the Crier plugin system
//!
//! Exposes the rendering engine as a shared service and the template CRUD
//! plus preview endpoints.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crier_config::DispatchSettings;
use crier_core::plugin::{
    CrierPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use crier_database::DbConnection;
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::engine::TemplateEngine;
use crate::handlers::{configure_routes, TemplatesApiDoc, TemplatesState};
use crate::service::TemplateService;

pub struct TemplatePlugin;

impl TemplatePlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TemplatePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CrierPlugin for TemplatePlugin {
    fn name(&self) -> &'static str {
        "templates"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DbConnection>();
            let settings = context.require_service::<DispatchSettings>();

            let engine = Arc::new(TemplateEngine::new(
                settings.school_name.clone(),
                settings.in_app_body_limit,
            ));
            context.register_service(engine.clone());
            context.register_service(Arc::new(TemplateService::new(db, engine)));

            tracing::debug!("Template plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let templates = context.require_service::<TemplateService>();

        let state = Arc::new(TemplatesState { templates });
        let routes = configure_routes().with_state(state);

        Some(PluginRoutes { router: routes })
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(TemplatesApiDoc::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crier_database::test_utils::TestDatabase;

    #[tokio::test]
    async fn test_template_plugin_name() {
        assert_eq!(TemplatePlugin::new().name(), "templates");
    }

    #[tokio::test]
    async fn test_template_plugin_registers_services() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let context = ServiceRegistrationContext::new();
        context.register_service(test_db.connection_arc());
        context.register_service(Arc::new(
            DispatchSettings::from_lookup(|_| None).unwrap(),
        ));

        let plugin = TemplatePlugin::new();
        plugin.register_services(&context).await.unwrap();

        assert!(context.get_service::<TemplateEngine>().is_some());
        assert!(context.get_service::<TemplateService>().is_some());

        let plugin_context = context.create_plugin_context();
        assert!(plugin.configure_routes(&plugin_context).is_some());
    }
}
