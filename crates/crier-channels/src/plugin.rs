//! Channels plugin for the Crier plugin system
//!
//! Builds the email/SMS/push adapters from dispatch settings and shares them
//! through a channel registry. No HTTP surface; adapters are consumed by the
//! dispatch pipeline and the digest sender.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crier_config::DispatchSettings;
use crier_core::plugin::{CrierPlugin, PluginError, ServiceRegistrationContext};
use crier_directory::DeviceTokenService;

use crate::adapter::ChannelRegistry;
use crate::email::EmailAdapter;
use crate::push::PushAdapter;
use crate::sms::SmsAdapter;

pub struct ChannelsPlugin;

impl ChannelsPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChannelsPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn registration_error(e: impl std::fmt::Display) -> PluginError {
    PluginError::PluginRegistrationFailed {
        plugin_name: "channels".to_string(),
        error: e.to_string(),
    }
}

impl CrierPlugin for ChannelsPlugin {
    fn name(&self) -> &'static str {
        "channels"
    }

    fn register_services<'a>(
        &'a self,
        context: &'a ServiceRegistrationContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), PluginError>> + Send + 'a>> {
        Box::pin(async move {
            let settings = context.require_service::<DispatchSettings>();
            let device_tokens = context.require_service::<DeviceTokenService>();

            let email = Arc::new(
                EmailAdapter::new(&settings.smtp, settings.email_batch_size as usize)
                    .map_err(registration_error)?,
            );
            let sms = SmsAdapter::from_settings(&settings.sms).map_err(registration_error)?;
            let push = PushAdapter::from_settings(&settings.push, device_tokens)
                .map_err(registration_error)?;

            let registry = Arc::new(ChannelRegistry::new());
            registry.register(email.clone());
            registry.register(Arc::new(sms));
            registry.register(Arc::new(push));

            // The digest sender talks to the email adapter directly.
            context.register_service(email);
            context.register_service(registry);

            tracing::debug!("Channels plugin services registered successfully");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crier_database::test_utils::TestDatabase;
    use crier_entities::CommsChannel;

    #[tokio::test]
    async fn test_channels_plugin_name() {
        assert_eq!(ChannelsPlugin::new().name(), "channels");
    }

    #[tokio::test]
    async fn test_channels_plugin_registers_adapters() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let context = ServiceRegistrationContext::new();
        context.register_service(Arc::new(
            DispatchSettings::from_lookup(|_| None).unwrap(),
        ));
        context.register_service(Arc::new(DeviceTokenService::new(
            test_db.connection_arc(),
        )));

        ChannelsPlugin::new().register_services(&context).await.unwrap();

        let registry = context.get_service::<ChannelRegistry>().unwrap();
        assert!(registry.get(CommsChannel::Email).is_some());
        assert!(registry.get(CommsChannel::Sms).is_some());
        assert!(registry.get(CommsChannel::Push).is_some());
        // In-app joins the registry from the notification store's plugin
        assert!(registry.get(CommsChannel::InApp).is_none());

        // Without provider urls only email is configured
        let states = registry.channel_states();
        assert!(states.contains(&(CommsChannel::Email, true)));
        assert!(states.contains(&(CommsChannel::Sms, false)));
        assert!(states.contains(&(CommsChannel::Push, false)));

        assert!(context.get_service::<EmailAdapter>().is_some());
    }
}
