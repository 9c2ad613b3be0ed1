use serde::{Deserialize, Serialize};
use std::fmt;

/// Job submitted when an announcement is published and its fan-out should run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchAnnouncementJob {
    pub announcement_id: i32,
}

/// Job submitted when a bulk message leaves draft and its batches should run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchBulkMessageJob {
    pub bulk_message_id: i32,
}

/// Job submitted by the digest scheduler for each user due a digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDigestJob {
    pub user_id: i32,
    pub frequency: String,
}

/// Core job enum containing all possible job types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Job {
    DispatchAnnouncement(DispatchAnnouncementJob),
    DispatchBulkMessage(DispatchBulkMessageJob),
    SendDigest(SendDigestJob),
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::DispatchAnnouncement(job) => write!(
                f,
                "DispatchAnnouncement(announcement_id: {})",
                job.announcement_id
            ),
            Job::DispatchBulkMessage(job) => write!(
                f,
                "DispatchBulkMessage(bulk_message_id: {})",
                job.bulk_message_id
            ),
            Job::SendDigest(job) => write!(
                f,
                "SendDigest(user_id: {}, frequency: {})",
                job.user_id, job.frequency
            ),
        }
    }
}

// Core queue abstraction - crier-queue implements this
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to send job: {0}")]
    SendError(String),
    #[error("Failed to receive job: {0}")]
    ReceiveError(String),
    #[error("Queue channel closed")]
    ChannelClosed,
    #[error("Invalid job data: {0}")]
    InvalidData(String),
}

/// Core trait for job queue operations
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Send a job to the queue
    async fn send(&self, job: Job) -> Result<(), QueueError>;

    /// Create a new receiver for jobs
    fn subscribe(&self) -> Box<dyn JobReceiver>;
}

/// Core trait for receiving jobs
#[async_trait]
pub trait JobReceiver: Send + Sync {
    /// Receive the next job
    async fn recv(&mut self) -> Result<Job, QueueError>;
}
