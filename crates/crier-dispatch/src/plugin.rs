//! Dispatch plugin for the Crier plugin system
//!
//! Owns campaign persistence (announcements and bulk messages), per-recipient
//! delivery tracking, the communication log, the delivery scheduler, and the
//! dispatcher facade that the HTTP layer and the background workers drive.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crier_channels::ChannelRegistry;
use crier_config::DispatchSettings;
use crier_core::plugin::{
    CrierPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};
use crier_core::JobQueue;
use crier_database::DbConnection;
use crier_directory::{AudienceResolver, UserService};
use crier_notifications::{NotificationStore, PreferenceService};
use crier_templates::{TemplateEngine, TemplateService};
use utoipa::{openapi::OpenApi, OpenApi as OpenApiTrait};

use crate::handlers::{self, DispatchState};
use crate::services::{
    AnnouncementService, BulkMessageService, CommunicationLogService, DeliveryScheduler,
    Dispatcher, RecipientTracker,
};

pub struct DispatchPlugin;

impl DispatchPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DispatchPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl CrierPlugin for DispatchPlugin {
    fn name(&self) -> &'static str {
        "dispatch"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let db = context.require_service::<DbConnection>();
            let settings = context.require_service::<DispatchSettings>();
            let registry = context.require_service::<ChannelRegistry>();
            let engine = context.require_service::<TemplateEngine>();
            let templates = context.require_service::<TemplateService>();
            let resolver = context.require_service::<AudienceResolver>();
            let users = context.require_service::<UserService>();
            let preferences = context.require_service::<PreferenceService>();
            let store = context.require_service::<NotificationStore>();
            let queue = context.require_service::<dyn JobQueue>();

            let log = Arc::new(CommunicationLogService::new(db.clone()));
            let tracker = Arc::new(RecipientTracker::new(db.clone(), log.clone()));
            let announcements = Arc::new(AnnouncementService::new(db.clone(), settings.clone()));
            let bulk = Arc::new(BulkMessageService::new(db, settings.clone()));
            let scheduler = Arc::new(DeliveryScheduler::new(
                resolver.clone(),
                preferences.clone(),
                registry.clone(),
                engine.clone(),
                templates,
                tracker.clone(),
                log.clone(),
                announcements.clone(),
                bulk.clone(),
                store.clone(),
                settings.clone(),
            ));
            let dispatcher = Arc::new(Dispatcher::new(
                announcements.clone(),
                bulk.clone(),
                scheduler.clone(),
                resolver,
                users,
                preferences,
                registry,
                engine,
                store,
                tracker.clone(),
                log.clone(),
                queue,
                settings,
            ));

            context.register_service(log);
            context.register_service(tracker);
            context.register_service(announcements);
            context.register_service(bulk);
            context.register_service(scheduler);
            context.register_service(dispatcher);

            tracing::debug!("Dispatch plugin services registered successfully");
            Ok(())
        })
    }

    fn configure_routes(&self, context: &PluginContext) -> Option<PluginRoutes> {
        let state = Arc::new(DispatchState {
            dispatcher: context.require_service::<Dispatcher>(),
            announcements: context.require_service::<AnnouncementService>(),
            bulk: context.require_service::<BulkMessageService>(),
            scheduler: context.require_service::<DeliveryScheduler>(),
            tracker: context.require_service::<RecipientTracker>(),
            log: context.require_service::<CommunicationLogService>(),
            registry: context.require_service::<ChannelRegistry>(),
            settings: context.require_service::<DispatchSettings>(),
        });
        let routes = handlers::announcements::configure_routes()
            .merge(handlers::bulk::configure_routes())
            .merge(handlers::system::configure_routes())
            .with_state(state);

        Some(PluginRoutes { router: routes })
    }

    fn openapi_schema(&self) -> Option<OpenApi> {
        Some(crier_core::openapi::merge_openapi_schemas(
            handlers::announcements::AnnouncementsApiDoc::openapi(),
            vec![
                handlers::bulk::BulkMessagesApiDoc::openapi(),
                handlers::system::SystemApiDoc::openapi(),
            ],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crier_database::test_utils::TestDatabase;
    use crier_queue::BroadcastQueueService;

    #[tokio::test]
    async fn test_dispatch_plugin_name() {
        assert_eq!(DispatchPlugin::new().name(), "dispatch");
    }

    #[tokio::test]
    async fn test_dispatch_plugin_registers_services() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let db = test_db.connection_arc();
        let settings = Arc::new(DispatchSettings::from_lookup(|_| None).unwrap());
        let engine = Arc::new(TemplateEngine::new(
            settings.school_name.clone(),
            settings.in_app_body_limit,
        ));
        let (queue, _receiver) = BroadcastQueueService::create_job_queue_arc_with_receiver(16);

        let context = ServiceRegistrationContext::new();
        context.register_service(db.clone());
        context.register_service(settings.clone());
        context.register_service(Arc::new(ChannelRegistry::new()));
        context.register_service(engine.clone());
        context.register_service(Arc::new(TemplateService::new(db.clone(), engine)));
        context.register_service(Arc::new(AudienceResolver::new(db.clone())));
        context.register_service(Arc::new(UserService::new(db.clone())));
        context.register_service(Arc::new(PreferenceService::new(db.clone(), &settings)));
        context.register_service(Arc::new(NotificationStore::new(db)));
        context.register_service(queue);

        let plugin = DispatchPlugin::new();
        plugin.register_services(&context).await.unwrap();

        assert!(context.get_service::<CommunicationLogService>().is_some());
        assert!(context.get_service::<RecipientTracker>().is_some());
        assert!(context.get_service::<AnnouncementService>().is_some());
        assert!(context.get_service::<BulkMessageService>().is_some());
        assert!(context.get_service::<DeliveryScheduler>().is_some());
        assert!(context.get_service::<Dispatcher>().is_some());

        let plugin_context = context.create_plugin_context();
        assert!(plugin.configure_routes(&plugin_context).is_some());

        let schema = plugin.openapi_schema().unwrap();
        assert!(schema.paths.paths.contains_key("/announcements"));
        assert!(schema.paths.paths.contains_key("/bulk-messages"));
        assert!(schema.paths.paths.contains_key("/callbacks/delivery"));
    }
}
