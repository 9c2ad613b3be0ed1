use crate::ConfigService;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::Weekday;
use crier_core::capability_guard;
use crier_core::problemdetails::Problem;
use crier_core::CallerContext;
use crier_entities::{ChannelList, Priority};
use sea_orm::DatabaseBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};

pub struct SettingsState {
    pub config_service: Arc<ConfigService>,
}

/// Safe view of the runtime settings that masks credentials.
///
/// Settings are environment-driven and immutable at runtime, so the API is
/// read-only; there is no update endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RuntimeSettingsResponse {
    pub server: ServerSettingsView,
    pub dispatch: DispatchSettingsView,
    pub email: EmailSettingsView,
    pub sms: SmsSettingsView,
    pub push: PushSettingsView,
    pub jobs: JobScheduleView,
    /// Masked as "******" when a callback token is configured.
    pub callback_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServerSettingsView {
    pub address: String,
    /// Backend name only; the url may embed credentials.
    pub database_backend: String,
    pub data_dir: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DispatchSettingsView {
    pub school_name: String,
    pub default_channels: ChannelList,
    pub default_priority: Priority,
    pub batch_size_default: u32,
    pub rate_limit_per_hour: u32,
    pub email_batch_size: u32,
    pub channel_concurrency: usize,
    pub analytics_retention_days: i64,
    pub notification_cleanup_days: i64,
    pub in_app_body_limit: usize,
    pub quiet_hours_start: String,
    pub quiet_hours_end: String,
    pub digest_daily_time: String,
    pub digest_weekly_day: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EmailSettingsView {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    /// Masked as "******" when set.
    pub password: Option<String>,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SmsSettingsView {
    pub provider_url: Option<String>,
    /// Masked as "******" when set.
    pub api_key: Option<String>,
    pub sender_id: Option<String>,
    pub configured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PushSettingsView {
    pub provider_url: Option<String>,
    /// Masked as "******" when set.
    pub api_key: Option<String>,
    pub configured: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobScheduleView {
    pub publish_cron: String,
    pub analytics_cron: String,
    pub cleanup_cron: String,
}

fn mask_secret(value: &Option<String>) -> Option<String> {
    value.as_ref().map(|_| "******".to_string())
}

fn backend_name(backend: DatabaseBackend) -> &'static str {
    match backend {
        DatabaseBackend::Sqlite => "sqlite",
        DatabaseBackend::Postgres => "postgres",
        DatabaseBackend::MySql => "mysql",
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

impl RuntimeSettingsResponse {
    pub fn from_service(service: &ConfigService) -> Self {
        let config = service.get_server_config();
        let settings = service.dispatch_settings();

        RuntimeSettingsResponse {
            server: ServerSettingsView {
                address: config.address.clone(),
                database_backend: backend_name(service.get_database_backend()).to_string(),
                data_dir: config.data_dir.display().to_string(),
                log_level: config.log_level.clone(),
            },
            dispatch: DispatchSettingsView {
                school_name: settings.school_name.clone(),
                default_channels: settings.default_channels.clone(),
                default_priority: settings.default_priority,
                batch_size_default: settings.batch_size_default,
                rate_limit_per_hour: settings.rate_limit_per_hour,
                email_batch_size: settings.email_batch_size,
                channel_concurrency: settings.channel_concurrency,
                analytics_retention_days: settings.analytics_retention_days,
                notification_cleanup_days: settings.notification_cleanup_days,
                in_app_body_limit: settings.in_app_body_limit,
                quiet_hours_start: settings.quiet_hours_start.format("%H:%M").to_string(),
                quiet_hours_end: settings.quiet_hours_end.format("%H:%M").to_string(),
                digest_daily_time: settings.digest_daily_time.format("%H:%M").to_string(),
                digest_weekly_day: weekday_name(settings.digest_weekly_day).to_string(),
            },
            email: EmailSettingsView {
                host: settings.smtp.host.clone(),
                port: settings.smtp.port,
                username: settings.smtp.username.clone(),
                password: mask_secret(&settings.smtp.password),
                from_email: settings.smtp.from_email.clone(),
                from_name: settings.smtp.from_name.clone(),
            },
            sms: SmsSettingsView {
                provider_url: settings.sms.provider_url.clone(),
                api_key: mask_secret(&settings.sms.api_key),
                sender_id: settings.sms.sender_id.clone(),
                configured: settings.sms.is_configured(),
            },
            push: PushSettingsView {
                provider_url: settings.push.provider_url.clone(),
                api_key: mask_secret(&settings.push.api_key),
                configured: settings.push.is_configured(),
            },
            jobs: JobScheduleView {
                publish_cron: settings.publish_cron.clone(),
                analytics_cron: settings.analytics_cron.clone(),
                cleanup_cron: settings.cleanup_cron.clone(),
            },
            callback_token: mask_secret(&settings.callback_token),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(get_settings),
    components(schemas(
        RuntimeSettingsResponse,
        ServerSettingsView,
        DispatchSettingsView,
        EmailSettingsView,
        SmsSettingsView,
        PushSettingsView,
        JobScheduleView
    )),
    info(
        title = "Settings API",
        description = "Read-only view of the runtime configuration. \
        Credentials are masked; settings come from the environment at startup.",
        version = "1.0.0"
    )
)]
pub struct SettingsApiDoc;

pub fn configure_routes() -> Router<Arc<SettingsState>> {
    Router::new().route("/settings", get(get_settings))
}

/// Get runtime settings
#[utoipa::path(
    tag = "Settings",
    get,
    path = "/settings",
    responses(
        (status = 200, description = "Runtime settings with masked credentials", body = RuntimeSettingsResponse),
        (status = 401, description = "Missing caller identity"),
        (status = 403, description = "Caller lacks the settings:read capability")
    ),
    security(
        ("gateway_headers" = [])
    )
)]
async fn get_settings(
    caller: CallerContext,
    State(state): State<Arc<SettingsState>>,
) -> Result<impl IntoResponse, Problem> {
    capability_guard!(caller, SettingsRead);

    let response = RuntimeSettingsResponse::from_service(&state.config_service);
    Ok(Json(response))
}
