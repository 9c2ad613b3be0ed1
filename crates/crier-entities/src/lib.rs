pub mod types;

pub use types::*;

// Directory entities
pub mod users;
pub mod user_roles;
pub mod student_profiles;
pub mod staff_profiles;
pub mod guardian_links;
pub mod device_tokens;

// Notification entities
pub mod preferences;
pub mod notifications;
pub mod notification_counters;

// Campaign and delivery entities
pub mod templates;
pub mod announcements;
pub mod bulk_messages;
pub mod message_recipients;
pub mod communication_logs;
pub mod daily_analytics;

// Direct messaging entities
pub mod message_threads;
pub mod thread_participants;
pub mod direct_messages;
pub mod message_reads;

pub mod prelude;
