//! Config plugin for the Crier plugin system
//!
//! Registers the server configuration and the environment-driven dispatch
//! settings so downstream plugins (channels, dispatch, notifications) can
//! require them from the service registry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crier_core::plugin::{
    CrierPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::handler::SettingsState;
use crate::{configure_routes, ConfigService, DispatchSettings, ServerConfig, SettingsApiDoc};

/// Config plugin exposing runtime configuration to services and the API
pub struct ConfigPlugin {
    server_config: Arc<ServerConfig>,
    dispatch_settings: Arc<DispatchSettings>,
}

impl ConfigPlugin {
    pub fn new(server_config: Arc<ServerConfig>, dispatch_settings: Arc<DispatchSettings>) -> Self {
        Self {
            server_config,
            dispatch_settings,
        }
    }
}

impl CrierPlugin for ConfigPlugin {
    fn name(&self) -> &'static str {
        "config"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            // Both are required as-is by other plugins, so register them
            // alongside the service facade.
            context.register_service(self.server_config.clone());
            context.register_service(self.dispatch_settings.clone());

            let config_service = Arc::new(ConfigService::new(
                self.server_config.clone(),
                self.dispatch_settings.clone(),
            ));
            context.register_service(config_service);

            tracing::debug!("Config plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let config_service = context.require_service::<ConfigService>();

        let settings_state = Arc::new(SettingsState { config_service });

        let routes = configure_routes().with_state(settings_state);

        Some(PluginRoutes { router: routes })
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(SettingsApiDoc::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_plugin() -> ConfigPlugin {
        let dir = tempfile::tempdir().unwrap();
        let server_config = Arc::new(
            ServerConfig::with_data_dir(
                "127.0.0.1:8000".to_string(),
                None,
                "info".to_string(),
                dir.path().to_path_buf(),
            )
            .unwrap(),
        );
        let dispatch_settings = Arc::new(DispatchSettings::from_lookup(|_| None).unwrap());
        ConfigPlugin::new(server_config, dispatch_settings)
    }

    #[tokio::test]
    async fn test_config_plugin_name() {
        assert_eq!(test_plugin().name(), "config");
    }

    #[tokio::test]
    async fn test_config_plugin_registers_services() {
        let plugin = test_plugin();
        let context = ServiceRegistrationContext::new();

        plugin.register_services(&context).await.unwrap();

        let settings = context.require_service::<DispatchSettings>();
        assert_eq!(settings.batch_size_default, 100);
        let service = context.require_service::<ConfigService>();
        assert_eq!(
            service.get_database_backend(),
            sea_orm::DatabaseBackend::Sqlite
        );

        let plugin_context = context.create_plugin_context();
        assert!(plugin.configure_routes(&plugin_context).is_some());
    }
}
