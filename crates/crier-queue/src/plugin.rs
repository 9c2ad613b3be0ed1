//! Queue plugin for the Crier plugin system
//!
//! Registers the broadcast-backed JobQueue that carries campaign dispatch and
//! digest jobs between the HTTP handlers and the background workers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crier_core::plugin::{
    CrierPlugin, PluginContext, PluginError, PluginRoutes, ServiceRegistrationContext,
};

use crate::BroadcastQueueService;

// Global storage to keep the receiver alive and prevent channel closure
static KEEP_ALIVE_RECEIVER: Mutex<Option<tokio::sync::broadcast::Receiver<crier_core::Job>>> =
    Mutex::new(None);

/// Queue plugin for managing job queues and background processing
pub struct QueuePlugin {
    queue_capacity: usize,
}

impl QueuePlugin {
    pub fn new(queue_capacity: usize) -> Self {
        Self { queue_capacity }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }
}

impl CrierPlugin for QueuePlugin {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::debug!(
                "QueuePlugin: starting service registration with capacity: {}",
                self.queue_capacity
            );

            // Create BroadcastQueueService with receiver to keep channel alive
            let (queue_service, keep_alive_receiver) =
                BroadcastQueueService::create_job_queue_arc_with_receiver(self.queue_capacity);

            // Store the receiver globally to prevent it from being dropped
            {
                let mut receiver_guard = KEEP_ALIVE_RECEIVER.lock().unwrap();
                *receiver_guard = Some(keep_alive_receiver);
            }

            context.register_service(queue_service);
            tracing::debug!("QueuePlugin: JobQueue service registered");

            Ok(())
        })
    }

    fn configure_routes(&self, _context: &PluginContext) -> Option<PluginRoutes> {
        // Queue plugin doesn't expose HTTP routes
        None
    }

    fn openapi_schema(&self) -> Option<utoipa::openapi::OpenApi> {
        // Queue plugin doesn't have public API endpoints
        None
    }
}
