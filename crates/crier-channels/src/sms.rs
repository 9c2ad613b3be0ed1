//! SMS delivery through an HTTP provider.

use std::sync::Arc;

use async_trait::async_trait;
use crier_config::SmsSettings;
use crier_entities::CommsChannel;
use crier_templates::sms_estimated_parts;
use serde_json::json;
use url::Url;

use crate::adapter::ChannelAdapter;
use crate::types::{failure_reasons, ChannelError, DeliveryItem, DeliveryResult, SendOutcome};

/// One message as submitted to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsMessage {
    /// E.164 destination.
    pub to: String,
    pub body: String,
    /// 160-char segments this body occupies.
    pub estimated_parts: u32,
}

#[async_trait]
pub trait SmsProvider: Send + Sync {
    async fn submit(&self, message: &SmsMessage) -> Result<(), ChannelError>;
}

/// Generic JSON-over-HTTP SMS gateway: `POST {provider_url}` with
/// `{to, body, parts, sender_id?}` and an optional bearer key.
pub struct HttpSmsProvider {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    sender_id: Option<String>,
}

impl HttpSmsProvider {
    pub fn from_settings(settings: &SmsSettings) -> Result<Option<Self>, ChannelError> {
        let Some(raw_url) = settings.provider_url.as_deref() else {
            return Ok(None);
        };
        let endpoint = Url::parse(raw_url).map_err(|e| ChannelError::InvalidConfig {
            details: format!("invalid sms provider url '{}': {}", raw_url, e),
        })?;
        Ok(Some(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: settings.api_key.clone(),
            sender_id: settings.sender_id.clone(),
        }))
    }
}

#[async_trait]
impl SmsProvider for HttpSmsProvider {
    async fn submit(&self, message: &SmsMessage) -> Result<(), ChannelError> {
        let mut payload = json!({
            "to": message.to,
            "body": message.body,
            "parts": message.estimated_parts,
        });
        if let Some(sender_id) = &self.sender_id {
            payload["sender_id"] = json!(sender_id);
        }

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
                "sms provider returned {}: {}",
                status, text
            )))
        } else {
            Err(ChannelError::Rejected(format!(
                "sms provider returned {}: {}",
                status, text
            )))
        }
    }
}

/// Normalize a stored phone number to E.164. Formatting characters are
/// dropped, `00` becomes `+`, and a bare international number gets its `+`
/// back. Numbers too short to carry a country code are not guessed at.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    let digits = if let Some(rest) = cleaned.strip_prefix('+') {
        rest.to_string()
    } else if let Some(rest) = cleaned.strip_prefix("00") {
        rest.to_string()
    } else {
        cleaned.clone()
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let with_country_code = cleaned.starts_with('+') || cleaned.starts_with("00");
    match digits.len() {
        8..=15 if with_country_code => Some(format!("+{}", digits)),
        11..=15 => Some(format!("+{}", digits)),
        _ => None,
    }
}

pub struct SmsAdapter {
    provider: Option<Arc<dyn SmsProvider>>,
}

impl SmsAdapter {
    pub fn from_settings(settings: &SmsSettings) -> Result<Self, ChannelError> {
        let provider = HttpSmsProvider::from_settings(settings)?
            .map(|p| Arc::new(p) as Arc<dyn SmsProvider>);
        Ok(Self { provider })
    }

    pub fn with_provider(provider: Arc<dyn SmsProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    pub fn unconfigured() -> Self {
        Self { provider: None }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn channel(&self) -> CommsChannel {
        CommsChannel::Sms
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

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let Some(raw_phone) = item.phone.as_deref().filter(|p| !p.is_empty()) else {
                results.push(DeliveryResult::new(
                    item.user_id,
                    SendOutcome::failed(failure_reasons::NO_PHONE),
                ));
                continue;
            };
            let Some(to) = normalize_phone(raw_phone) else {
                tracing::warn!(user_id = item.user_id, "Phone number not normalizable");
                results.push(DeliveryResult::new(
                    item.user_id,
                    SendOutcome::failed(failure_reasons::INVALID_PHONE),
                ));
                continue;
            };

            let message = SmsMessage {
                to,
                estimated_parts: sms_estimated_parts(&item.message.body),
                body: item.message.body.clone(),
            };
            let result = match provider.submit(&message).await {
                Ok(()) => DeliveryResult::new(item.user_id, SendOutcome::Sent)
                    .with_detail(json!({ "estimated_parts": message.estimated_parts })),
                Err(e) if e.is_transient() => {
                    DeliveryResult::new(item.user_id, SendOutcome::deferred(e.to_string()))
                }
                Err(e) => DeliveryResult::new(item.user_id, SendOutcome::failed(e.to_string())),
            };
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSmsProvider;
    use crier_templates::RenderedMessage;

    fn item(user_id: i32, phone: Option<&str>) -> DeliveryItem {
        let item = DeliveryItem::new(
            user_id,
            RenderedMessage {
                subject: String::new(),
                body: "Fees due Friday".to_string(),
            },
        );
        match phone {
            Some(p) => item.with_phone(p),
            None => item,
        }
    }

    #[test]
    fn phone_normalization_covers_the_common_shapes() {
        assert_eq!(
            normalize_phone("+1 (555) 010-0123").as_deref(),
            Some("+15550100123")
        );
        assert_eq!(
            normalize_phone("0044 20 7946 0958").as_deref(),
            Some("+442079460958")
        );
        // Bare international number without the plus
        assert_eq!(
            normalize_phone("15550100123").as_deref(),
            Some("+15550100123")
        );
        // Too short to carry a country code
        assert_eq!(normalize_phone("555-0100"), None);
        assert_eq!(normalize_phone("ext. 42"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[tokio::test]
    async fn batch_reports_no_phone_and_invalid_phone_individually() {
        let provider = MockSmsProvider::new();
        let adapter = SmsAdapter::with_provider(Arc::new(provider.clone()));

        let results = adapter
            .send_batch(&[
                item(1, None),
                item(2, Some("12")),
                item(3, Some("+15550100123")),
            ])
            .await;

        assert_eq!(
            results[0].outcome,
            SendOutcome::failed(failure_reasons::NO_PHONE)
        );
        assert_eq!(
            results[1].outcome,
            SendOutcome::failed(failure_reasons::INVALID_PHONE)
        );
        assert!(results[2].outcome.is_sent());
        assert_eq!(
            results[2].detail,
            Some(json!({ "estimated_parts": 1 }))
        );

        let submitted = provider.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].to, "+15550100123");
    }

    #[tokio::test]
    async fn provider_errors_map_to_deferred_or_failed() {
        let transient = SmsAdapter::with_provider(Arc::new(
            MockSmsProvider::new().with_transient_failure(),
        ));
        let results = transient.send_batch(&[item(1, Some("+15550100123"))]).await;
        assert!(matches!(results[0].outcome, SendOutcome::Deferred { .. }));

        let permanent = SmsAdapter::with_provider(Arc::new(
            MockSmsProvider::new().with_permanent_failure(),
        ));
        let results = permanent.send_batch(&[item(1, Some("+15550100123"))]).await;
        assert!(matches!(results[0].outcome, SendOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn unconfigured_channel_fails_fast() {
        let adapter = SmsAdapter::unconfigured();
        assert!(!adapter.is_configured());

        let results = adapter.send_batch(&[item(1, Some("+15550100123"))]).await;
        assert_eq!(
            results[0].outcome,
            SendOutcome::failed(failure_reasons::CHANNEL_NOT_CONFIGURED)
        );
    }
}
