mod periodic;
mod worker;

pub use periodic::{RetentionSweeper, ScheduledPublisher};
pub use worker::DispatchWorker;
