//! Email delivery over SMTP.

use std::sync::Arc;

use async_trait::async_trait;
use crier_config::SmtpSettings;
use crier_entities::CommsChannel;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, client::TlsParametersBuilder},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::adapter::ChannelAdapter;
use crate::types::{failure_reasons, ChannelError, DeliveryItem, DeliveryResult, SendOutcome};

/// The wire side of the email adapter, separated so tests and the digest
/// sender can swap in a recording transport.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn deliver(&self, message: Message) -> Result<(), ChannelError>;
}

pub struct SmtpEmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailTransport {
    pub fn from_settings(settings: &SmtpSettings) -> Result<Self, ChannelError> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .port(settings.port);

        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            if !username.is_empty() {
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
            }
        }

        // Local relays (dev, test fixtures) speak plain SMTP; anything else
        // upgrades with STARTTLS.
        let local = settings.host == "localhost" || settings.host == "127.0.0.1";
        let mailer = if local {
            builder.build()
        } else {
            let tls = TlsParametersBuilder::new(settings.host.clone())
                .build()
                .map_err(|e| ChannelError::InvalidConfig {
                    details: format!("smtp tls setup failed: {}", e),
                })?;
            builder
                .tls(lettre::transport::smtp::client::Tls::Required(tls))
                .build()
        };

        Ok(Self { mailer })
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn deliver(&self, message: Message) -> Result<(), ChannelError> {
        match self.mailer.send(message).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_permanent() => Err(ChannelError::Rejected(e.to_string())),
            Err(e) => Err(ChannelError::Transport(e.to_string())),
        }
    }
}

pub struct EmailAdapter {
    transport: Arc<dyn EmailTransport>,
    from: Mailbox,
    batch_size: usize,
}

impl EmailAdapter {
    pub fn new(settings: &SmtpSettings, batch_size: usize) -> Result<Self, ChannelError> {
        let transport = Arc::new(SmtpEmailTransport::from_settings(settings)?);
        Self::with_transport(transport, settings, batch_size)
    }

    pub fn with_transport(
        transport: Arc<dyn EmailTransport>,
        settings: &SmtpSettings,
        batch_size: usize,
    ) -> Result<Self, ChannelError> {
        let address = settings
            .from_email
            .parse()
            .map_err(|e| ChannelError::InvalidConfig {
                details: format!("invalid from address '{}': {}", settings.from_email, e),
            })?;
        Ok(Self {
            transport,
            from: Mailbox::new(Some(settings.from_name.clone()), address),
            batch_size: batch_size.max(1),
        })
    }

    /// One-off send outside a campaign (digest emails use this).
    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), ChannelError> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| ChannelError::Rejected(format!("invalid address '{}': {}", to, e)))?;
        let message = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| ChannelError::Rejected(format!("could not build message: {}", e)))?;
        self.transport.deliver(message).await
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn channel(&self) -> CommsChannel {
        CommsChannel::Email
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn send_batch(&self, items: &[DeliveryItem]) -> Vec<DeliveryResult> {
        let mut results = Vec::with_capacity(items.len());
        // Once the transport itself fails, the rest of the batch is deferred
        // wholesale; only per-recipient rejections keep the batch moving.
        let mut transport_down: Option<String> = None;

        for chunk in items.chunks(self.batch_size) {
            for item in chunk {
                if let Some(reason) = &transport_down {
                    results.push(DeliveryResult::new(
                        item.user_id,
                        SendOutcome::deferred(reason.clone()),
                    ));
                    continue;
                }

                let Some(address) = item.email.as_deref().filter(|a| !a.is_empty()) else {
                    results.push(DeliveryResult::new(
                        item.user_id,
                        SendOutcome::failed(failure_reasons::NO_EMAIL),
                    ));
                    continue;
                };

                let outcome = match self.send_email(address, &item.message.subject, &item.message.body).await
                {
                    Ok(()) => SendOutcome::Sent,
                    Err(ChannelError::Rejected(reason)) => {
                        tracing::warn!(user_id = item.user_id, %reason, "Email rejected");
                        SendOutcome::failed(failure_reasons::INVALID_ADDRESS)
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        tracing::warn!(%reason, "Email transport failed, deferring batch");
                        transport_down = Some(reason.clone());
                        SendOutcome::deferred(reason)
                    }
                };
                results.push(DeliveryResult::new(item.user_id, outcome));
            }
        }

        results
    }
}
