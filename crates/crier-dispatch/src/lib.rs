//! Campaign dispatch: announcements, bulk messages, emergency alerts, and
//! per-recipient delivery tracking across the configured channels.

pub mod handlers;
pub mod jobs;
pub mod plugin;
pub mod services;
#[cfg(test)]
pub(crate) mod test_utils;

pub use handlers::*;
pub use jobs::*;
pub use plugin::*;
pub use services::*;
