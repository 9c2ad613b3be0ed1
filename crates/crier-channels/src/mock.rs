//! Recording transports and providers for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::Message;

use crate::email::EmailTransport;
use crate::push::{PushMessage, PushProvider};
use crate::sms::{SmsMessage, SmsProvider};
use crate::types::ChannelError;

/// An email captured by [`MockEmailTransport`].
#[derive(Debug, Clone)]
pub struct RecordedEmail {
    /// Envelope recipients.
    pub to: Vec<String>,
    /// The full RFC 5322 rendering, for substring assertions.
    pub raw: String,
}

/// Email transport that records instead of sending.
#[derive(Clone, Default)]
pub struct MockEmailTransport {
    sent: Arc<Mutex<Vec<RecordedEmail>>>,
    /// Transport error once this many deliveries have gone through.
    fail_after: Option<usize>,
    /// Permanent rejection for these envelope recipients.
    rejected: Vec<String>,
}

impl MockEmailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(mut self, deliveries: usize) -> Self {
        self.fail_after = Some(deliveries);
        self
    }

    pub fn rejecting(mut self, address: &str) -> Self {
        self.rejected.push(address.to_string());
        self
    }

    pub fn deliveries(&self) -> Vec<RecordedEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn delivery_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EmailTransport for MockEmailTransport {
    async fn deliver(&self, message: Message) -> Result<(), ChannelError> {
        let to: Vec<String> = message
            .envelope()
            .to()
            .iter()
            .map(|a| a.to_string())
            .collect();

        if to.iter().any(|a| self.rejected.contains(a)) {
            return Err(ChannelError::Rejected(format!(
                "mock rejected {}",
                to.join(", ")
            )));
        }

        let mut sent = self.sent.lock().unwrap();
        if let Some(limit) = self.fail_after {
            if sent.len() >= limit {
                return Err(ChannelError::Transport(
                    "mock transport unavailable".to_string(),
                ));
            }
        }

        sent.push(RecordedEmail {
            to,
            raw: String::from_utf8_lossy(&message.formatted()).into_owned(),
        });
        Ok(())
    }
}

/// SMS provider that records submissions.
#[derive(Clone, Default)]
pub struct MockSmsProvider {
    sent: Arc<Mutex<Vec<SmsMessage>>>,
    transient_failure: bool,
    permanent_failure: bool,
}

impl MockSmsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transient_failure(mut self) -> Self {
        self.transient_failure = true;
        self
    }

    pub fn with_permanent_failure(mut self) -> Self {
        self.permanent_failure = true;
        self
    }

    pub fn submitted(&self) -> Vec<SmsMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmsProvider for MockSmsProvider {
    async fn submit(&self, message: &SmsMessage) -> Result<(), ChannelError> {
        if self.transient_failure {
            return Err(ChannelError::Transport("mock sms outage".to_string()));
        }
        if self.permanent_failure {
            return Err(ChannelError::Rejected("mock sms rejection".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Push provider that records submissions.
#[derive(Clone, Default)]
pub struct MockPushProvider {
    sent: Arc<Mutex<Vec<PushMessage>>>,
    transient_failure: bool,
    permanent_failure: bool,
}

impl MockPushProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transient_failure(mut self) -> Self {
        self.transient_failure = true;
        self
    }

    pub fn with_permanent_failure(mut self) -> Self {
        self.permanent_failure = true;
        self
    }

    pub fn submitted(&self) -> Vec<PushMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushProvider for MockPushProvider {
    async fn submit(&self, message: &PushMessage) -> Result<(), ChannelError> {
        if self.transient_failure {
            return Err(ChannelError::Transport("mock push outage".to_string()));
        }
        if self.permanent_failure {
            return Err(ChannelError::Rejected("mock push rejection".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
