// Re-export for convenience - consumer modules can just subscribe directly
pub use crier_core::Job;
pub use tokio::sync::broadcast;

#[cfg(test)]
mod tests {
    use crate::BroadcastQueueService;
    use crier_core::{DispatchAnnouncementJob, DispatchBulkMessageJob, Job, SendDigestJob};
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_simple_subscription_pattern() {
        use crier_core::JobQueue;

        let (queue, _) = BroadcastQueueService::create_broadcast_channel(10);
        let mut receiver = queue.subscribe(); // Direct subscription!

        // Send mixed jobs
        queue
            .send(Job::DispatchAnnouncement(DispatchAnnouncementJob {
                announcement_id: 123,
            }))
            .await
            .unwrap();

        queue
            .launch_bulk_message_dispatch(DispatchBulkMessageJob { bulk_message_id: 7 })
            .await
            .unwrap();

        // Simple pattern matching - this is what consumer modules would do
        let job1 = receiver.recv().await.unwrap();
        match job1 {
            Job::DispatchAnnouncement(data) => {
                assert_eq!(data.announcement_id, 123);
                // Handle announcement fan-out
            }
            _ => panic!("Expected announcement dispatch job first"),
        }

        let job2 = receiver.recv().await.unwrap();
        match job2 {
            Job::DispatchBulkMessage(data) => {
                assert_eq!(data.bulk_message_id, 7);
                // Handle bulk message batches
            }
            _ => panic!("Expected bulk message dispatch job second"),
        }
    }

    #[tokio::test]
    async fn test_filtering_pattern() {
        let (queue, _) = BroadcastQueueService::create_broadcast_channel(10);
        let mut receiver = queue.subscribe();

        // Send mixed jobs
        queue
            .launch_digest_send(SendDigestJob {
                user_id: 4,
                frequency: "daily".to_string(),
            })
            .await
            .unwrap();

        queue
            .launch_announcement_dispatch(DispatchAnnouncementJob {
                announcement_id: 999,
            })
            .await
            .unwrap();

        queue
            .launch_digest_send(SendDigestJob {
                user_id: 5,
                frequency: "weekly".to_string(),
            })
            .await
            .unwrap();

        // A dispatch worker only caring about announcement jobs would do this:
        let mut announcement_jobs = Vec::new();
        for _ in 0..3 {
            if let Ok(Ok(job)) = timeout(Duration::from_millis(100), receiver.recv()).await {
                if let Job::DispatchAnnouncement(data) = job {
                    announcement_jobs.push(data);
                }
                // Ignore other job types
            }
        }

        assert_eq!(announcement_jobs.len(), 1);
        assert_eq!(announcement_jobs[0].announcement_id, 999);
    }

    #[tokio::test]
    async fn test_trait_based_usage() {
        use crier_core::JobQueue;

        // Consumer modules get a JobQueue trait object from the registry
        let (queue, _keep_alive) = BroadcastQueueService::create_job_queue_with_receiver(10);
        let mut receiver = queue.subscribe();

        // Send job using the trait
        queue
            .send(Job::DispatchAnnouncement(DispatchAnnouncementJob {
                announcement_id: 42,
            }))
            .await
            .unwrap();

        // Receive using the trait
        let job = receiver.recv().await.unwrap();
        match job {
            Job::DispatchAnnouncement(data) => {
                assert_eq!(data.announcement_id, 42);
            }
            _ => panic!("Expected announcement dispatch job"),
        }
    }
}
