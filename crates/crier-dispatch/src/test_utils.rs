//! Shared fixture for handler tests: the full dispatch service graph over an
//! in-memory database, with a mock email transport and a live job receiver.

use std::sync::Arc;

use axum::Router;
use crier_channels::mock::MockEmailTransport;
use crier_channels::{ChannelRegistry, EmailAdapter};
use crier_config::DispatchSettings;
use crier_core::jobs::Job;
use crier_database::test_utils::TestDatabase;
use crier_directory::{AudienceResolver, UserService};
use crier_entities::users;
use crier_notifications::{InAppAdapter, NotificationStore, PreferenceService};
use crier_queue::BroadcastQueueService;
use crier_templates::{TemplateEngine, TemplateService};
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::broadcast;

use crate::handlers::{self, DispatchState};
use crate::services::{
    AnnouncementService, BulkMessageService, CommunicationLogService, DeliveryScheduler,
    Dispatcher, RecipientTracker,
};

pub(crate) struct TestContext {
    pub test_db: TestDatabase,
    pub state: Arc<DispatchState>,
    pub store: Arc<NotificationStore>,
    pub preferences: Arc<PreferenceService>,
    pub transport: MockEmailTransport,
    /// Keeps the broadcast queue open so handler-side enqueues succeed.
    pub receiver: broadcast::Receiver<Job>,
}

impl TestContext {
    /// Router serving every dispatch route, as the plugin mounts them.
    pub fn app(&self) -> Router {
        handlers::announcements::configure_routes()
            .merge(handlers::bulk::configure_routes())
            .merge(handlers::system::configure_routes())
            .with_state(self.state.clone())
    }

    pub async fn seed_user(&self, first: &str, email: Option<&str>) -> users::Model {
        users::ActiveModel {
            first_name: Set(first.to_string()),
            last_name: Set("Tester".to_string()),
            email: Set(email.map(|e| e.to_string())),
            phone: Set(None),
            locale: Set("en".to_string()),
            is_active: Set(true),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(self.test_db.connection())
        .await
        .unwrap()
    }
}

/// Request carrying the gateway identity headers.
pub(crate) fn request(
    method: &str,
    uri: &str,
    user_id: i32,
    role: &str,
    body: Option<serde_json::Value>,
) -> axum::http::Request<axum::body::Body> {
    let builder = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user_id.to_string())
        .header("x-user-role", role);
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(axum::body::Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(axum::body::Body::empty()).unwrap(),
    }
}

pub(crate) async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub(crate) async fn dispatch_context() -> TestContext {
    dispatch_context_with(DispatchSettings::from_lookup(|_| None).unwrap()).await
}

pub(crate) async fn dispatch_context_with(settings: DispatchSettings) -> TestContext {
    let test_db = TestDatabase::with_migrations().await.unwrap();
    let db = test_db.connection_arc();
    let settings = Arc::new(settings);

    let engine = Arc::new(TemplateEngine::new(
        settings.school_name.clone(),
        settings.in_app_body_limit,
    ));
    let templates = Arc::new(TemplateService::new(db.clone(), engine.clone()));
    let resolver = Arc::new(AudienceResolver::new(db.clone()));
    let users_service = Arc::new(UserService::new(db.clone()));
    let preferences = Arc::new(PreferenceService::new(db.clone(), &settings));
    let store = Arc::new(NotificationStore::new(db.clone()));
    let log = Arc::new(CommunicationLogService::new(db.clone()));
    let tracker = Arc::new(RecipientTracker::new(db.clone(), log.clone()));
    let announcements = Arc::new(AnnouncementService::new(db.clone(), settings.clone()));
    let bulk = Arc::new(BulkMessageService::new(db.clone(), settings.clone()));

    let registry = Arc::new(ChannelRegistry::new());
    let transport = MockEmailTransport::new();
    registry.register(Arc::new(
        EmailAdapter::with_transport(
            Arc::new(transport.clone()),
            &settings.smtp,
            settings.email_batch_size as usize,
        )
        .unwrap(),
    ));
    registry.register(Arc::new(InAppAdapter::new(store.clone(), db.clone())));

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

    let (queue, receiver) = BroadcastQueueService::create_job_queue_arc_with_receiver(16);
    let dispatcher = Arc::new(Dispatcher::new(
        announcements.clone(),
        bulk.clone(),
        scheduler.clone(),
        resolver,
        users_service,
        preferences.clone(),
        registry.clone(),
        engine,
        store.clone(),
        tracker.clone(),
        log.clone(),
        queue,
        settings.clone(),
    ));

    let state = Arc::new(DispatchState {
        dispatcher,
        announcements,
        bulk,
        scheduler,
        tracker,
        log,
        registry,
        settings,
    });

    TestContext {
        test_db,
        state,
        store,
        preferences,
        transport,
        receiver,
    }
}
