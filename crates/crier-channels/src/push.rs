//! Push delivery through an HTTP provider, fanned out per device token.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use crier_config::PushSettings;
use crier_directory::DeviceTokenService;
use crier_entities::CommsChannel;
use serde_json::json;
use url::Url;

use crate::adapter::ChannelAdapter;
use crate::types::{failure_reasons, ChannelError, DeliveryItem, DeliveryResult, SendOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn submit(&self, message: &PushMessage) -> Result<(), ChannelError>;
}

/// FCM-style JSON gateway: `POST {provider_url}` with
/// `{to, notification: {title, body}}` and an optional bearer key.
pub struct HttpPushProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl HttpPushProvider {
    pub fn from_settings(settings: &PushSettings) -> Result<Option<Self>, ChannelError> {
        let Some(raw_url) = settings.provider_url.as_deref() else {
            return Ok(None);
        };
        let endpoint = Url::parse(raw_url).map_err(|e| ChannelError::InvalidConfig {
            details: format!("invalid push provider url '{}': {}", raw_url, e),
        })?;
        Ok(Some(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: settings.api_key.clone(),
        }))
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn submit(&self, message: &PushMessage) -> Result<(), ChannelError> {
        let payload = json!({
            "to": message.token,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
        });

        let mut request = self.client.post(self.endpoint.clone()).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(ChannelError::Transport(format!(
                "push provider returned {}: {}",
                status, text
            )))
        } else {
            Err(ChannelError::Rejected(format!(
                "push provider returned {}: {}",
                status, text
            )))
        }
    }
}

/// Fire-and-forget at the transport: a recipient counts as sent once at
/// least one of their device tokens is accepted by the provider.
pub struct PushAdapter {
    provider: Option<Arc<dyn PushProvider>>,
    device_tokens: Arc<DeviceTokenService>,
}

impl PushAdapter {
    pub fn from_settings(
        settings: &PushSettings,
        device_tokens: Arc<DeviceTokenService>,
    ) -> Result<Self, ChannelError> {
        let provider = HttpPushProvider::from_settings(settings)?
            .map(|p| Arc::new(p) as Arc<dyn PushProvider>);
        Ok(Self {
            provider,
            device_tokens,
        })
    }

    pub fn with_provider(
        provider: Arc<dyn PushProvider>,
        device_tokens: Arc<DeviceTokenService>,
    ) -> Self {
        Self {
            provider: Some(provider),
            device_tokens,
        }
    }
}

#[async_trait]
impl ChannelAdapter for PushAdapter {
    fn channel(&self) -> CommsChannel {
        CommsChannel::Push
    }

    fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    async fn send_batch(&self, items: &[DeliveryItem]) -> Vec<DeliveryResult> {
        let Some(provider) = &self.provider else {
            return items
                .iter()
                .map(|item| {
                    DeliveryResult::new(
                        item.user_id,
                        SendOutcome::failed(failure_reasons::CHANNEL_NOT_CONFIGURED),
                    )
                })
                .collect();
        };

        let user_ids: Vec<i32> = items.iter().map(|i| i.user_id).collect();
        let tokens = match self.device_tokens.active_tokens_for_users(&user_ids).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::error!("Device token lookup failed: {}", e);
                let reason = format!("device token lookup failed: {}", e);
                return items
                    .iter()
                    .map(|item| {
                        DeliveryResult::new(item.user_id, SendOutcome::deferred(reason.clone()))
                    })
                    .collect();
            }
        };

        let mut tokens_by_user: HashMap<i32, Vec<String>> = HashMap::new();
        for token in tokens {
            tokens_by_user
                .entry(token.user_id)
                .or_default()
                .push(token.token);
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let Some(user_tokens) = tokens_by_user.get(&item.user_id) else {
                results.push(DeliveryResult::new(
                    item.user_id,
                    SendOutcome::failed(failure_reasons::NO_DEVICE),
                ));
                continue;
            };

            let mut accepted = 0usize;
            let mut last_error: Option<ChannelError> = None;
            for token in user_tokens {
                let message = PushMessage {
                    token: token.clone(),
                    title: item.message.subject.clone(),
                    body: item.message.body.clone(),
                };
                match provider.submit(&message).await {
                    Ok(()) => accepted += 1,
                    Err(e) => {
                        tracing::warn!(user_id = item.user_id, "Push submit failed: {}", e);
                        last_error = Some(e);
                    }
                }
            }

            let outcome = if accepted > 0 {
                SendOutcome::Sent
            } else {
                match last_error {
                    Some(e) if e.is_transient() => SendOutcome::deferred(e.to_string()),
                    Some(e) => SendOutcome::failed(e.to_string()),
                    None => SendOutcome::failed(failure_reasons::NO_DEVICE),
                }
            };
            let devices = user_tokens.len();
            results.push(
                DeliveryResult::new(item.user_id, outcome)
                    .with_detail(json!({ "devices": devices, "accepted": accepted })),
            );
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPushProvider;
    use crier_database::test_utils::TestDatabase;
    use crier_entities::{users, DevicePlatform};
    use crier_templates::RenderedMessage;
    use sea_orm::{ActiveModelTrait, Set};

    async fn seed_user(db: &crier_database::DbConnection, first: &str) -> users::Model {
        users::ActiveModel {
            first_name: Set(first.to_string()),
            last_name: Set("Tester".to_string()),
            email: Set(None),
            phone: Set(None),
            locale: Set("en".to_string()),
            is_active: Set(true),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    fn item(user_id: i32) -> DeliveryItem {
        DeliveryItem::new(
            user_id,
            RenderedMessage {
                subject: "Closure".to_string(),
                body: "School closes early today".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn recipients_without_devices_fail_and_others_fan_out() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let device_tokens = Arc::new(DeviceTokenService::new(test_db.connection_arc()));

        let with_devices = seed_user(test_db.connection(), "Asha").await;
        let without = seed_user(test_db.connection(), "Noah").await;
        device_tokens
            .register(with_devices.id, "tok-ios", DevicePlatform::Ios)
            .await
            .unwrap();
        device_tokens
            .register(with_devices.id, "tok-android", DevicePlatform::Android)
            .await
            .unwrap();

        let provider = MockPushProvider::new();
        let adapter = PushAdapter::with_provider(Arc::new(provider.clone()), device_tokens);

        let results = adapter
            .send_batch(&[item(with_devices.id), item(without.id)])
            .await;

        assert!(results[0].outcome.is_sent());
        assert_eq!(
            results[0].detail,
            Some(json!({ "devices": 2, "accepted": 2 }))
        );
        assert_eq!(
            results[1].outcome,
            SendOutcome::failed(failure_reasons::NO_DEVICE)
        );
        assert_eq!(provider.submitted().len(), 2);
    }

    #[tokio::test]
    async fn transient_provider_trouble_defers_the_recipient() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let device_tokens = Arc::new(DeviceTokenService::new(test_db.connection_arc()));
        let user = seed_user(test_db.connection(), "Asha").await;
        device_tokens
            .register(user.id, "tok-1", DevicePlatform::Web)
            .await
            .unwrap();

        let adapter = PushAdapter::with_provider(
            Arc::new(MockPushProvider::new().with_transient_failure()),
            device_tokens,
        );

        let results = adapter.send_batch(&[item(user.id)]).await;
        assert!(matches!(results[0].outcome, SendOutcome::Deferred { .. }));
    }
}
