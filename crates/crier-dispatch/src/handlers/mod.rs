pub mod announcements;
pub mod bulk;
pub mod system;
pub mod types;

pub use types::DispatchState;
