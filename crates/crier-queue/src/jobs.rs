// Re-export job types from crier-core so consumers only depend on this crate
pub use crier_core::{DispatchAnnouncementJob, DispatchBulkMessageJob, Job, SendDigestJob};
