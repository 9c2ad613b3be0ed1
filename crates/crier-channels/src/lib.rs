//! Outbound channel adapters: a common batch-send contract plus email
//! (SMTP), SMS, and push backends. The in-app channel implements the same
//! contract next to the notification store.

pub mod adapter;
pub mod email;
pub mod mock;
pub mod plugin;
pub mod push;
pub mod sms;
pub mod types;

pub use adapter::{ChannelAdapter, ChannelRegistry};
pub use email::{EmailAdapter, EmailTransport, SmtpEmailTransport};
pub use plugin::ChannelsPlugin;
pub use push::{HttpPushProvider, PushAdapter, PushMessage, PushProvider};
pub use sms::{normalize_phone, HttpSmsProvider, SmsAdapter, SmsMessage, SmsProvider};
pub use types::{failure_reasons, ChannelError, DeliveryItem, DeliveryResult, SendOutcome};
