mod handler;
pub mod plugin;
mod service;

pub use handler::{configure_routes, RuntimeSettingsResponse, SettingsApiDoc, SettingsState};
pub use plugin::ConfigPlugin;
pub use service::{
    ConfigService, ConfigServiceError, DispatchSettings, PushSettings, ServerConfig, SmsSettings,
    SmtpSettings, SQLITE_DB_NAME,
};
