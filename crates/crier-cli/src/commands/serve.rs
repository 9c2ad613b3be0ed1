use std::sync::Arc;

use axum::Router;
use clap::Args;
use crier_analytics::{AnalyticsPlugin, AnalyticsService, RecomputeScheduler};
use crier_channels::ChannelsPlugin;
use crier_config::{ConfigPlugin, DispatchSettings, ServerConfig};
use crier_core::plugin::PluginManager;
use crier_core::JobQueue;
use crier_directory::DirectoryPlugin;
use crier_dispatch::{
    BulkMessageService, CommunicationLogService, DeliveryScheduler, DispatchPlugin,
    DispatchWorker, Dispatcher, RetentionSweeper, ScheduledPublisher,
};
use crier_messaging::MessagingPlugin;
use crier_notifications::{
    DigestScheduler, DigestService, NotificationStore, NotificationsPlugin, PreferenceService,
};
use crier_queue::QueuePlugin;
use crier_templates::TemplatePlugin;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use utoipa_swagger_ui::SwaggerUi;

#[derive(Args)]
pub struct ServeCommand {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1:8080", env = "CRIER_ADDRESS")]
    pub address: String,

    /// Database connection URL; defaults to a SQLite file in the data dir
    #[arg(long, env = "CRIER_DATABASE_URL")]
    pub database_url: Option<String>,
}

impl ServeCommand {
    pub fn execute(self, log_level: String) -> anyhow::Result<()> {
        let config = Arc::new(ServerConfig::new(
            self.address.clone(),
            self.database_url.clone(),
            log_level,
        )?);
        let settings = Arc::new(DispatchSettings::from_env()?);

        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(run_server(config, settings))
    }
}

/// Register every plugin in dependency order, spawn the background jobs, and
/// serve until interrupted.
async fn run_server(
    config: Arc<ServerConfig>,
    settings: Arc<DispatchSettings>,
) -> anyhow::Result<()> {
    debug!("Initializing database connection...");
    let db = crier_database::establish_connection(&config.database_url).await?;

    let mut plugin_manager = PluginManager::new();
    plugin_manager.service_context().register_service(db);

    // Registration order matters: every plugin may require services from the
    // plugins registered before it.
    debug!("Registering ConfigPlugin");
    plugin_manager.register_plugin(Box::new(ConfigPlugin::new(config.clone(), settings)));
    debug!("Registering QueuePlugin");
    plugin_manager.register_plugin(Box::new(QueuePlugin::with_default_capacity()));
    debug!("Registering DirectoryPlugin");
    plugin_manager.register_plugin(Box::new(DirectoryPlugin::new()));
    debug!("Registering TemplatePlugin");
    plugin_manager.register_plugin(Box::new(TemplatePlugin::new()));
    debug!("Registering ChannelsPlugin");
    plugin_manager.register_plugin(Box::new(ChannelsPlugin::new()));
    debug!("Registering NotificationsPlugin");
    plugin_manager.register_plugin(Box::new(NotificationsPlugin::new()));
    debug!("Registering DispatchPlugin");
    plugin_manager.register_plugin(Box::new(DispatchPlugin::new()));
    debug!("Registering AnalyticsPlugin");
    plugin_manager.register_plugin(Box::new(AnalyticsPlugin::new()));
    debug!("Registering MessagingPlugin");
    plugin_manager.register_plugin(Box::new(MessagingPlugin::new()));

    debug!("Initializing plugins");
    plugin_manager
        .initialize_plugins()
        .await
        .map_err(|e| anyhow::anyhow!("Plugin initialization failed: {}", e))?;
    debug!("All plugins initialized successfully");

    let cancel = CancellationToken::new();
    spawn_background_jobs(&plugin_manager, &cancel)?;

    let app = plugin_manager
        .build_application()
        .merge(create_swagger_router(&plugin_manager))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(&config.address).await?;
    info!("Crier server listening on {}", config.address);

    let shutdown_cancel = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, stopping background jobs");
            shutdown_cancel.cancel();
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// The long-running loops: queue worker, digest scheduler, scheduled
/// publisher, retention sweeper, and the analytics recompute job. All stop
/// through the shared cancellation token.
fn spawn_background_jobs(
    plugin_manager: &PluginManager,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let context = plugin_manager.service_context();
    let settings = context.require_service::<DispatchSettings>();
    let queue = context.require_service::<dyn JobQueue>();

    DispatchWorker::new(
        context.require_service::<DeliveryScheduler>(),
        context.require_service::<BulkMessageService>(),
        context.require_service::<DigestService>(),
        queue.as_ref(),
    )
    .spawn(cancel.clone());

    DigestScheduler::new(
        context.require_service::<PreferenceService>(),
        queue,
        &settings,
    )
    .spawn(cancel.clone());

    ScheduledPublisher::new(context.require_service::<Dispatcher>(), &settings)?
        .spawn(cancel.clone());

    RetentionSweeper::new(
        context.require_service::<CommunicationLogService>(),
        context.require_service::<NotificationStore>(),
        &settings,
    )?
    .spawn(cancel.clone());

    RecomputeScheduler::new(context.require_service::<AnalyticsService>(), &settings)?
        .spawn(cancel.clone());

    debug!("Background jobs spawned");
    Ok(())
}

fn create_swagger_router(plugin_manager: &PluginManager) -> Router {
    let api_doc = plugin_manager.get_unified_openapi();
    Router::new().merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api_doc))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl-c signal");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
