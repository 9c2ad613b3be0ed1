//! Threaded direct messaging between users: threads, messages, and read
//! receipts. Data model and CRUD surface only; there is no real-time
//! transport, and thread activity does not enter the dispatch pipeline.

pub mod handlers;
pub mod plugin;
pub mod service;

pub use handlers::{MessagingApiDoc, MessagingState};
pub use plugin::MessagingPlugin;
pub use service::{CreateThreadRequest, MessagingError, MessagingService};
