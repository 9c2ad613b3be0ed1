//! Notifications plugin for the Crier plugin system
//!
//! Owns the in-app notification store, per-user delivery preferences, and the
//! digest sender. Also completes the channel registry: the in-app adapter
//! lives here because it writes notification rows instead of calling a
//! provider.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crier_channels::{ChannelRegistry, EmailAdapter};
use crier_config::DispatchSettings;
use crier_core::plugin::{
    CrierPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use crier_database::DbConnection;
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::digest::DigestService;
use crate::handlers::{configure_routes, NotificationState, NotificationsApiDoc};
use crate::in_app::InAppAdapter;
use crate::preferences::PreferenceService;
use crate::store::NotificationStore;

pub struct NotificationsPlugin;

impl NotificationsPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NotificationsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CrierPlugin for NotificationsPlugin {
    fn name(&self) -> &'static str {
        "notifications"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DbConnection>();
            let settings = context.require_service::<DispatchSettings>();
            let registry = context.require_service::<ChannelRegistry>();
            let email = context.require_service::<EmailAdapter>();

            let store = Arc::new(NotificationStore::new(db.clone()));
            let preferences = Arc::new(PreferenceService::new(db.clone(), &settings));
            let digest = Arc::new(DigestService::new(
                db.clone(),
                store.clone(),
                email,
                &settings,
            ));

            registry.register(Arc::new(InAppAdapter::new(store.clone(), db)));

            context.register_service(store);
            context.register_service(preferences);
            context.register_service(digest);

            tracing::debug!("Notifications plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let store = context.require_service::<NotificationStore>();
        let preferences = context.require_service::<PreferenceService>();

        let state = Arc::new(NotificationState { store, preferences });
        let routes = configure_routes().with_state(state);

        Some(PluginRoutes { router: routes })
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(NotificationsApiDoc::openapi())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crier_channels::ChannelAdapter;
    use crier_database::test_utils::TestDatabase;
    use crier_entities::CommsChannel;

    #[tokio::test]
    async fn test_notifications_plugin_name() {
        assert_eq!(NotificationsPlugin::new().name(), "notifications");
    }

    #[tokio::test]
    async fn test_notifications_plugin_registers_services() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let settings = Arc::new(DispatchSettings::from_lookup(|_| None).unwrap());
        let context = ServiceRegistrationContext::new();
        context.register_service(test_db.connection_arc());
        context.register_service(settings.clone());
        context.register_service(Arc::new(ChannelRegistry::new()));
        context.register_service(Arc::new(
            EmailAdapter::new(&settings.smtp, settings.email_batch_size as usize).unwrap(),
        ));

        let plugin = NotificationsPlugin::new();
        plugin.register_services(&context).await.unwrap();

        assert!(context.get_service::<NotificationStore>().is_some());
        assert!(context.get_service::<PreferenceService>().is_some());
        assert!(context.get_service::<DigestService>().is_some());

        // The in-app adapter joins the shared registry here.
        let registry = context.get_service::<ChannelRegistry>().unwrap();
        let in_app = registry.get(CommsChannel::InApp).unwrap();
        assert!(in_app.is_configured());

        let plugin_context = context.create_plugin_context();
        assert!(plugin.configure_routes(&plugin_context).is_some());
        assert!(plugin.openapi_schema().is_some());
    }
}
