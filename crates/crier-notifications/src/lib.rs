//! In-app notification center and per-user delivery preferences.
//!
//! The store keeps notification rows and their cached unread counters in
//! step; the preference service answers "may this message reach this user on
//! this channel right now"; the digest side bundles unread rows into a
//! periodic email for users who asked for one.

pub mod digest;
pub mod handlers;
pub mod in_app;
pub mod plugin;
pub mod preferences;
pub mod store;

pub use digest::{DigestError, DigestOutcome, DigestScheduler, DigestService, DIGEST_TITLE_LIMIT};
pub use handlers::{configure_routes, NotificationResponse, NotificationState, NotificationsApiDoc};
pub use in_app::InAppAdapter;
pub use plugin::NotificationsPlugin;
pub use preferences::{
    matches, DeliveryDecision, DenyReason, PreferenceError, PreferenceService,
    UpdatePreferencesRequest,
};
pub use store::{
    CreateNotificationRequest, NotificationError, NotificationPayload, NotificationStore,
};
