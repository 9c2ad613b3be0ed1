use std::sync::Arc;

use crier_core::async_trait::async_trait;
use crier_core::{
    DispatchAnnouncementJob, DispatchBulkMessageJob, Job, JobQueue, JobReceiver, QueueError,
    SendDigestJob,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum QueueServiceError {
    #[error("Failed to send job to queue: {details}")]
    QueueSendError { details: String, job_type: String },

    #[error("Queue channel closed")]
    QueueChannelClosed { job_type: String },

    #[error("Invalid job data: {details}")]
    InvalidJobData { details: String, job_type: String },

    #[error("Queue service error: {0}")]
    Internal(String),
}

impl<T> From<mpsc::error::SendError<T>> for QueueServiceError {
    fn from(_err: mpsc::error::SendError<T>) -> Self {
        QueueServiceError::QueueChannelClosed {
            job_type: "unknown".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct QueueService {
    job_sender: mpsc::Sender<Job>,
}

#[derive(Clone)]
pub struct BroadcastQueueService {
    broadcast_sender: broadcast::Sender<Job>,
}

// Wrapper for broadcast::Receiver to implement JobReceiver trait
pub struct BroadcastJobReceiver {
    receiver: broadcast::Receiver<Job>,
}

#[async_trait]
impl JobReceiver for BroadcastJobReceiver {
    async fn recv(&mut self) -> Result<Job, QueueError> {
        debug!("JobReceiver::recv - waiting for job");

        let result = self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => {
                error!("Broadcast channel closed");
                QueueError::ChannelClosed
            }
            broadcast::error::RecvError::Lagged(n) => {
                error!("Receiver lagged by {} messages", n);
                QueueError::ReceiveError(format!("Receiver lagged by {} messages", n))
            }
        });

        if let Ok(job) = &result {
            debug!("Received job: {}", job);
        }

        result
    }
}

#[async_trait]
impl JobQueue for BroadcastQueueService {
    async fn send(&self, job: Job) -> Result<(), QueueError> {
        debug!("JobQueue::send - broadcasting job: {}", job);
        let subscriber_count = self.broadcast_sender.receiver_count();

        // A broadcast with no subscribers drops the job on the floor
        if subscriber_count == 0 {
            error!(
                "No subscribers listening to broadcast channel, job will be lost: {}",
                job
            );
        }

        self.broadcast_sender.send(job.clone()).map_err(|e| {
            error!("Failed to broadcast job {}: {}", job, e);
            QueueError::SendError(format!("Broadcast send failed: {}", e))
        })?;

        debug!("Job sent to {} subscribers", subscriber_count);
        Ok(())
    }

    fn subscribe(&self) -> Box<dyn JobReceiver> {
        debug!(
            "JobQueue::subscribe - subscriber count before: {}",
            self.broadcast_sender.receiver_count()
        );

        Box::new(BroadcastJobReceiver {
            receiver: self.broadcast_sender.subscribe(),
        })
    }
}

impl QueueService {
    pub fn new(job_sender: mpsc::Sender<Job>) -> Self {
        Self { job_sender }
    }

    pub fn create_channel(buffer_size: usize) -> (QueueService, mpsc::Receiver<Job>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (QueueService::new(sender), receiver)
    }
}

impl BroadcastQueueService {
    pub fn new(broadcast_sender: broadcast::Sender<Job>) -> Self {
        Self { broadcast_sender }
    }

    pub fn create_broadcast_channel(
        buffer_size: usize,
    ) -> (BroadcastQueueService, broadcast::Receiver<Job>) {
        debug!("Creating broadcast channel with buffer size: {}", buffer_size);
        let (sender, receiver) = broadcast::channel(buffer_size);
        (BroadcastQueueService::new(sender), receiver)
    }

    /// Create a new broadcast queue that implements the JobQueue trait.
    /// Returns (queue, keep_alive_receiver) - the receiver must be kept alive
    /// or the channel closes before the first real subscriber appears.
    pub fn create_job_queue_with_receiver(
        buffer_size: usize,
    ) -> (Box<dyn JobQueue>, broadcast::Receiver<Job>) {
        let (sender, receiver) = broadcast::channel(buffer_size);
        (Box::new(BroadcastQueueService::new(sender)), receiver)
    }

    /// Arc flavor of [`Self::create_job_queue_with_receiver`] for the service registry.
    pub fn create_job_queue_arc_with_receiver(
        buffer_size: usize,
    ) -> (Arc<dyn JobQueue>, broadcast::Receiver<Job>) {
        let (sender, receiver) = broadcast::channel(buffer_size);
        (Arc::new(BroadcastQueueService::new(sender)), receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        debug!(
            "Creating direct broadcast subscription, count before: {}",
            self.broadcast_sender.receiver_count()
        );
        self.broadcast_sender.subscribe()
    }

    pub async fn launch_announcement_dispatch(
        &self,
        data: DispatchAnnouncementJob,
    ) -> Result<(), QueueServiceError> {
        info!(
            "Broadcasting dispatch job for announcement: {}",
            data.announcement_id
        );
        if data.announcement_id <= 0 {
            return Err(QueueServiceError::InvalidJobData {
                details: "Announcement id must be positive".to_string(),
                job_type: "dispatch_announcement".to_string(),
            });
        }
        self.broadcast_sender
            .send(Job::DispatchAnnouncement(data))
            .map_err(|e| {
                error!("Failed to broadcast announcement dispatch job: {}", e);
                QueueServiceError::QueueSendError {
                    details: e.to_string(),
                    job_type: "dispatch_announcement".to_string(),
                }
            })?;
        Ok(())
    }

    pub async fn launch_bulk_message_dispatch(
        &self,
        data: DispatchBulkMessageJob,
    ) -> Result<(), QueueServiceError> {
        info!(
            "Broadcasting dispatch job for bulk message: {}",
            data.bulk_message_id
        );
        if data.bulk_message_id <= 0 {
            return Err(QueueServiceError::InvalidJobData {
                details: "Bulk message id must be positive".to_string(),
                job_type: "dispatch_bulk_message".to_string(),
            });
        }
        self.broadcast_sender
            .send(Job::DispatchBulkMessage(data))
            .map_err(|e| {
                error!("Failed to broadcast bulk message dispatch job: {}", e);
                QueueServiceError::QueueSendError {
                    details: e.to_string(),
                    job_type: "dispatch_bulk_message".to_string(),
                }
            })?;
        Ok(())
    }

    pub async fn launch_digest_send(&self, data: SendDigestJob) -> Result<(), QueueServiceError> {
        info!(
            "Broadcasting digest job for user: {} ({})",
            data.user_id, data.frequency
        );
        if data.frequency != "daily" && data.frequency != "weekly" {
            return Err(QueueServiceError::InvalidJobData {
                details: format!("Unknown digest frequency: {}", data.frequency),
                job_type: "send_digest".to_string(),
            });
        }
        self.broadcast_sender.send(Job::SendDigest(data)).map_err(|e| {
            error!("Failed to broadcast digest job: {}", e);
            QueueServiceError::QueueSendError {
                details: e.to_string(),
                job_type: "send_digest".to_string(),
            }
        })?;
        Ok(())
    }
}

impl QueueService {
    pub async fn launch_announcement_dispatch(
        &self,
        data: DispatchAnnouncementJob,
    ) -> Result<(), QueueServiceError> {
        info!(
            "Queueing dispatch job for announcement: {}",
            data.announcement_id
        );
        if data.announcement_id <= 0 {
            return Err(QueueServiceError::InvalidJobData {
                details: "Announcement id must be positive".to_string(),
                job_type: "dispatch_announcement".to_string(),
            });
        }
        self.job_sender
            .send(Job::DispatchAnnouncement(data))
            .await
            .map_err(|e| {
                error!("Failed to queue announcement dispatch job: {}", e);
                QueueServiceError::QueueSendError {
                    details: e.to_string(),
                    job_type: "dispatch_announcement".to_string(),
                }
            })?;
        Ok(())
    }

    pub async fn launch_bulk_message_dispatch(
        &self,
        data: DispatchBulkMessageJob,
    ) -> Result<(), QueueServiceError> {
        info!(
            "Queueing dispatch job for bulk message: {}",
            data.bulk_message_id
        );
        if data.bulk_message_id <= 0 {
            return Err(QueueServiceError::InvalidJobData {
                details: "Bulk message id must be positive".to_string(),
                job_type: "dispatch_bulk_message".to_string(),
            });
        }
        self.job_sender
            .send(Job::DispatchBulkMessage(data))
            .await
            .map_err(|e| {
                error!("Failed to queue bulk message dispatch job: {}", e);
                QueueServiceError::QueueSendError {
                    details: e.to_string(),
                    job_type: "dispatch_bulk_message".to_string(),
                }
            })?;
        Ok(())
    }

    pub async fn launch_digest_send(&self, data: SendDigestJob) -> Result<(), QueueServiceError> {
        info!(
            "Queueing digest job for user: {} ({})",
            data.user_id, data.frequency
        );
        if data.frequency != "daily" && data.frequency != "weekly" {
            return Err(QueueServiceError::InvalidJobData {
                details: format!("Unknown digest frequency: {}", data.frequency),
                job_type: "send_digest".to_string(),
            });
        }
        self.job_sender
            .send(Job::SendDigest(data))
            .await
            .map_err(|e| {
                error!("Failed to queue digest job: {}", e);
                QueueServiceError::QueueSendError {
                    details: e.to_string(),
                    job_type: "send_digest".to_string(),
                }
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_publish_subscribe_announcement_dispatch() {
        let (queue_service, mut receiver) = QueueService::create_channel(10);

        let job_data = DispatchAnnouncementJob {
            announcement_id: 123,
        };

        // Publish job
        queue_service
            .job_sender
            .send(Job::DispatchAnnouncement(job_data.clone()))
            .await
            .unwrap();

        // Subscribe/consume job
        let received_job = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("Should receive job within timeout")
            .expect("Should receive a job");

        match received_job {
            Job::DispatchAnnouncement(received_data) => {
                assert_eq!(received_data.announcement_id, 123);
            }
            _ => panic!("Expected DispatchAnnouncement job"),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe_digest_job() {
        let (queue_service, mut receiver) = QueueService::create_channel(10);

        let job_data = SendDigestJob {
            user_id: 7,
            frequency: "daily".to_string(),
        };

        // Publish job
        queue_service.launch_digest_send(job_data.clone()).await.unwrap();

        // Subscribe/consume job
        let received_job = timeout(Duration::from_secs(1), receiver.recv())
            .await
            .expect("Should receive job within timeout")
            .expect("Should receive a job");

        match received_job {
            Job::SendDigest(received_data) => {
                assert_eq!(received_data.user_id, 7);
                assert_eq!(received_data.frequency, "daily");
            }
            _ => panic!("Expected SendDigest job"),
        }
    }

    #[tokio::test]
    async fn test_multiple_jobs_fifo_order() {
        let (queue_service, mut receiver) = QueueService::create_channel(10);

        // Publish multiple different jobs
        queue_service
            .launch_announcement_dispatch(DispatchAnnouncementJob { announcement_id: 1 })
            .await
            .unwrap();
        queue_service
            .launch_bulk_message_dispatch(DispatchBulkMessageJob { bulk_message_id: 2 })
            .await
            .unwrap();
        queue_service
            .launch_digest_send(SendDigestJob {
                user_id: 3,
                frequency: "weekly".to_string(),
            })
            .await
            .unwrap();

        // Consume jobs in FIFO order
        let job1 = receiver.recv().await.expect("Should receive first job");
        let job2 = receiver.recv().await.expect("Should receive second job");
        let job3 = receiver.recv().await.expect("Should receive third job");

        match job1 {
            Job::DispatchAnnouncement(data) => assert_eq!(data.announcement_id, 1),
            _ => panic!("Expected DispatchAnnouncement job first"),
        }

        match job2 {
            Job::DispatchBulkMessage(data) => assert_eq!(data.bulk_message_id, 2),
            _ => panic!("Expected DispatchBulkMessage job second"),
        }

        match job3 {
            Job::SendDigest(data) => assert_eq!(data.user_id, 3),
            _ => panic!("Expected SendDigest job third"),
        }
    }

    #[tokio::test]
    async fn test_queue_service_clone() {
        let (queue_service, mut receiver) = QueueService::create_channel(10);

        // Clone the queue service
        let cloned_service = queue_service.clone();

        // Both services should be able to publish
        queue_service
            .launch_announcement_dispatch(DispatchAnnouncementJob { announcement_id: 10 })
            .await
            .unwrap();
        cloned_service
            .launch_announcement_dispatch(DispatchAnnouncementJob { announcement_id: 20 })
            .await
            .unwrap();

        // Both jobs should be received
        let job1 = receiver.recv().await.expect("Should receive first job");
        let job2 = receiver.recv().await.expect("Should receive second job");

        let ids: Vec<i32> = vec![job1, job2]
            .into_iter()
            .map(|job| match job {
                Job::DispatchAnnouncement(data) => data.announcement_id,
                _ => panic!("Expected DispatchAnnouncement job"),
            })
            .collect();

        assert!(ids.contains(&10));
        assert!(ids.contains(&20));
    }

    #[tokio::test]
    async fn test_invalid_job_data_validation() {
        let (queue_service, _receiver) = QueueService::create_channel(10);

        // Zero announcement id must be rejected
        let result = queue_service
            .launch_announcement_dispatch(DispatchAnnouncementJob { announcement_id: 0 })
            .await;
        assert!(result.is_err());

        match result.unwrap_err() {
            QueueServiceError::InvalidJobData { details, job_type } => {
                assert_eq!(details, "Announcement id must be positive");
                assert_eq!(job_type, "dispatch_announcement");
            }
            _ => panic!("Expected InvalidJobData error"),
        }

        // Digest frequency outside daily/weekly must be rejected
        let result = queue_service
            .launch_digest_send(SendDigestJob {
                user_id: 1,
                frequency: "hourly".to_string(),
            })
            .await;
        assert!(matches!(
            result.unwrap_err(),
            QueueServiceError::InvalidJobData { .. }
        ));
    }

    #[tokio::test]
    async fn test_job_display_formatting() {
        let dispatch_job = Job::DispatchAnnouncement(DispatchAnnouncementJob {
            announcement_id: 42,
        });

        let digest_job = Job::SendDigest(SendDigestJob {
            user_id: 9,
            frequency: "weekly".to_string(),
        });

        assert_eq!(
            format!("{}", dispatch_job),
            "DispatchAnnouncement(announcement_id: 42)"
        );
        assert!(format!("{}", digest_job).contains("SendDigest"));
    }

    #[tokio::test]
    async fn test_broadcast_multiple_subscribers() {
        let (broadcast_service, _initial_receiver) =
            BroadcastQueueService::create_broadcast_channel(10);

        // Create multiple subscribers
        let mut subscriber1 = broadcast_service.subscribe();
        let mut subscriber2 = broadcast_service.subscribe();
        let mut subscriber3 = broadcast_service.subscribe();

        let job_data = DispatchBulkMessageJob { bulk_message_id: 55 };

        // Broadcast job using available method
        broadcast_service
            .launch_bulk_message_dispatch(job_data.clone())
            .await
            .unwrap();

        // All subscribers should receive the same job
        let job1 = timeout(Duration::from_secs(1), subscriber1.recv())
            .await
            .expect("Subscriber 1 should receive job")
            .expect("Should receive a job");

        let job2 = timeout(Duration::from_secs(1), subscriber2.recv())
            .await
            .expect("Subscriber 2 should receive job")
            .expect("Should receive a job");

        let job3 = timeout(Duration::from_secs(1), subscriber3.recv())
            .await
            .expect("Subscriber 3 should receive job")
            .expect("Should receive a job");

        // Verify all received the same job
        for job in [job1, job2, job3] {
            match job {
                Job::DispatchBulkMessage(received_data) => {
                    assert_eq!(received_data.bulk_message_id, 55);
                }
                _ => panic!("Expected DispatchBulkMessage job"),
            }
        }
    }

    #[tokio::test]
    async fn test_broadcast_late_subscriber() {
        let (broadcast_service, _initial_receiver) =
            BroadcastQueueService::create_broadcast_channel(10);

        // Send a job before subscriber exists (should be missed)
        broadcast_service
            .launch_announcement_dispatch(DispatchAnnouncementJob { announcement_id: 1 })
            .await
            .unwrap();

        // Create subscriber after job was sent
        let mut late_subscriber = broadcast_service.subscribe();

        // Send another job after subscriber exists
        broadcast_service
            .launch_announcement_dispatch(DispatchAnnouncementJob { announcement_id: 2 })
            .await
            .unwrap();

        // Late subscriber should only receive the second job
        let received_job = timeout(Duration::from_secs(1), late_subscriber.recv())
            .await
            .expect("Should receive job within timeout")
            .expect("Should receive a job");

        match received_job {
            Job::DispatchAnnouncement(data) => {
                assert_eq!(data.announcement_id, 2);
            }
            _ => panic!("Expected DispatchAnnouncement job"),
        }

        // Verify no more jobs are available
        let result = timeout(Duration::from_millis(100), late_subscriber.recv()).await;
        assert!(result.is_err(), "Should not receive any more jobs");
    }
}
