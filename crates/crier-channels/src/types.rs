use crier_entities::{MessageCategory, Priority};
use crier_templates::RenderedMessage;
use thiserror::Error;

/// Failure reason strings recorded on recipient rows and log events.
pub mod failure_reasons {
    pub const NO_EMAIL: &str = "no_email";
    pub const INVALID_ADDRESS: &str = "invalid_address";
    pub const NO_PHONE: &str = "no_phone";
    pub const INVALID_PHONE: &str = "invalid_phone";
    pub const NO_DEVICE: &str = "no_device";
    pub const CHANNEL_NOT_CONFIGURED: &str = "channel_not_configured";
}

#[derive(Error, Debug)]
pub enum ChannelError {
    /// Connection-level or provider-side trouble; the send may succeed later.
    #[error("Transport error: {0}")]
    Transport(String),
    /// The provider refused this recipient; retrying will not help.
    #[error("Recipient rejected: {0}")]
    Rejected(String),
    #[error("Invalid channel configuration: {details}")]
    InvalidConfig { details: String },
}

impl ChannelError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Transport(_))
    }
}

/// One recipient's slice of a batch: contact snapshot plus the message
/// already rendered and formatted for the target channel. Category, priority
/// and the campaign reference ride along for adapters that persist rows
/// (in-app) or tag provider submissions.
#[derive(Debug, Clone)]
pub struct DeliveryItem {
    pub user_id: i32,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub message: RenderedMessage,
    pub category: MessageCategory,
    pub priority: Priority,
    pub reference_type: Option<String>,
    pub reference_id: Option<i32>,
}

impl DeliveryItem {
    pub fn new(user_id: i32, message: RenderedMessage) -> Self {
        Self {
            user_id,
            email: None,
            phone: None,
            message,
            category: MessageCategory::General,
            priority: Priority::Medium,
            reference_type: None,
            reference_id: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_category(mut self, category: MessageCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reference(mut self, kind: impl Into<String>, id: i32) -> Self {
        self.reference_type = Some(kind.into());
        self.reference_id = Some(id);
        self
    }
}

/// What happened to one recipient in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Transient trouble; the scheduler may retry.
    Deferred { reason: String },
    /// Permanent; no retry.
    Failed { reason: String },
}

impl SendOutcome {
    pub fn deferred(reason: impl Into<String>) -> Self {
        SendOutcome::Deferred {
            reason: reason.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        SendOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub user_id: i32,
    pub outcome: SendOutcome,
    /// Adapter-specific extras (e.g. SMS segment count) merged into the
    /// delivery log event.
    pub detail: Option<serde_json::Value>,
}

impl DeliveryResult {
    pub fn new(user_id: i32, outcome: SendOutcome) -> Self {
        Self {
            user_id,
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}
