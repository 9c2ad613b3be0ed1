use std::sync::Arc;

use chrono::Utc;
use crier_core::jobs::{Job, JobQueue, JobReceiver, QueueError};
use crier_entities::{BulkMessageStatus, DigestFrequency};
use crier_notifications::{DigestOutcome, DigestService};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::services::{BulkMessageService, DeliveryScheduler};

/// Consumes dispatch jobs off the queue and runs them one at a time. The
/// cancellation token is threaded into each campaign run so an in-flight
/// fan-out stops at its next batch boundary on shutdown.
///
/// The queue subscription is taken in [`DispatchWorker::new`], so jobs
/// enqueued after construction are seen even if the worker task has not
/// been polled yet.
pub struct DispatchWorker {
    scheduler: Arc<DeliveryScheduler>,
    bulk: Arc<BulkMessageService>,
    digest: Arc<DigestService>,
    receiver: Box<dyn JobReceiver>,
}

impl DispatchWorker {
    pub fn new(
        scheduler: Arc<DeliveryScheduler>,
        bulk: Arc<BulkMessageService>,
        digest: Arc<DigestService>,
        queue: &dyn JobQueue,
    ) -> Self {
        Self {
            scheduler,
            bulk,
            digest,
            receiver: queue.subscribe(),
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Dispatch worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Dispatch worker stopping");
                    break;
                }
                job = self.receiver.recv() => match job {
                    Ok(job) => self.handle(job, &cancel).await,
                    Err(QueueError::ChannelClosed) => {
                        info!("Job queue closed; dispatch worker stopping");
                        break;
                    }
                    Err(e) => {
                        // Lagged receivers drop jobs; campaigns left behind
                        // stay claimable through the scheduled publisher.
                        warn!("Job receive error: {}", e);
                    }
                },
            }
        }
    }

    async fn handle(&self, job: Job, shutdown: &CancellationToken) {
        debug!(job = %job, "Handling job");
        match job {
            Job::DispatchAnnouncement(job) => {
                if let Err(e) = self
                    .scheduler
                    .run_announcement(job.announcement_id, shutdown)
                    .await
                {
                    error!(
                        announcement_id = job.announcement_id,
                        "Announcement dispatch failed: {}", e
                    );
                }
            }
            Job::DispatchBulkMessage(job) => {
                if let Err(e) = self
                    .scheduler
                    .run_bulk_message(job.bulk_message_id, shutdown)
                    .await
                {
                    error!(
                        bulk_message_id = job.bulk_message_id,
                        "Bulk message dispatch failed: {}", e
                    );
                    // Surface the failure on the campaign so an operator can
                    // resume it; a lost race with a cancellation is fine.
                    if let Err(e) = self
                        .bulk
                        .mark_completed(job.bulk_message_id, BulkMessageStatus::Failed, Utc::now())
                        .await
                    {
                        error!(
                            bulk_message_id = job.bulk_message_id,
                            "Could not mark bulk message failed: {}", e
                        );
                    }
                }
            }
            Job::SendDigest(job) => {
                let frequency = match job.frequency.as_str() {
                    "daily" => DigestFrequency::Daily,
                    "weekly" => DigestFrequency::Weekly,
                    other => {
                        warn!(
                            user_id = job.user_id,
                            frequency = other,
                            "Unknown digest frequency; dropping job"
                        );
                        return;
                    }
                };
                match self.digest.send_digest(job.user_id, frequency).await {
                    Ok(DigestOutcome::Sent { unread, listed }) => {
                        debug!(user_id = job.user_id, unread, listed, "Digest sent");
                    }
                    Ok(DigestOutcome::Skipped { reason }) => {
                        debug!(user_id = job.user_id, reason, "Digest skipped");
                    }
                    Err(e) => {
                        error!(user_id = job.user_id, "Digest send failed: {}", e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crier_channels::mock::MockEmailTransport;
    use crier_channels::{ChannelRegistry, EmailAdapter};
    use crier_config::DispatchSettings;
    use crier_core::jobs::DispatchBulkMessageJob;
    use crier_database::test_utils::TestDatabase;
    use crier_directory::AudienceResolver;
    use crier_entities::{users, Audience, ChannelList, CommsChannel};
    use crier_notifications::{InAppAdapter, NotificationStore, PreferenceService};
    use crier_queue::BroadcastQueueService;
    use crier_templates::{TemplateEngine, TemplateService};
    use sea_orm::{ActiveModelTrait, Set};

    use crate::services::{
        AnnouncementService, CommunicationLogService, CreateBulkMessageRequest, RecipientTracker,
    };

    async fn seed_user(db: &crier_database::DbConnection, email: &str) -> users::Model {
        users::ActiveModel {
            first_name: Set("Worker".to_string()),
            last_name: Set("Test".to_string()),
            email: Set(Some(email.to_string())),
            phone: Set(None),
            locale: Set("en".to_string()),
            is_active: Set(true),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn worker_runs_a_bulk_dispatch_job_end_to_end() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let db = test_db.connection_arc();
        let settings = Arc::new(DispatchSettings::from_lookup(|_| None).unwrap());

        let engine = Arc::new(TemplateEngine::new(
            settings.school_name.clone(),
            settings.in_app_body_limit,
        ));
        let templates = Arc::new(TemplateService::new(db.clone(), engine.clone()));
        let resolver = Arc::new(AudienceResolver::new(db.clone()));
        let preferences = Arc::new(PreferenceService::new(db.clone(), &settings));
        let store = Arc::new(NotificationStore::new(db.clone()));
        let log = Arc::new(CommunicationLogService::new(db.clone()));
        let tracker = Arc::new(RecipientTracker::new(db.clone(), log.clone()));
        let announcements = Arc::new(AnnouncementService::new(db.clone(), settings.clone()));
        let bulk = Arc::new(BulkMessageService::new(db.clone(), settings.clone()));

        let registry = Arc::new(ChannelRegistry::new());
        let transport = MockEmailTransport::new();
        let email = Arc::new(
            EmailAdapter::with_transport(
                Arc::new(transport.clone()),
                &settings.smtp,
                settings.email_batch_size as usize,
            )
            .unwrap(),
        );
        registry.register(email.clone());
        registry.register(Arc::new(InAppAdapter::new(store.clone(), db.clone())));

        let scheduler = Arc::new(
            crate::services::DeliveryScheduler::new(
                resolver,
                preferences.clone(),
                registry,
                engine,
                templates,
                tracker,
                log,
                announcements,
                bulk.clone(),
                store.clone(),
                settings.clone(),
            )
            .with_retry_base(Duration::from_millis(10)),
        );
        let digest = Arc::new(DigestService::new(
            db.clone(),
            store.clone(),
            email,
            &settings,
        ));

        seed_user(db.as_ref(), "worker@school.test").await;
        let draft = bulk
            .create_draft(
                1,
                CreateBulkMessageRequest {
                    name: "Worker run".to_string(),
                    subject: "Hello".to_string(),
                    content: "From the worker.".to_string(),
                    template_id: None,
                    template_context: None,
                    target_audience: Audience::All,
                    target_filters: None,
                    target_user_ids: None,
                    channels: Some(ChannelList(vec![CommsChannel::Email])),
                    priority: None,
                    category: None,
                    scheduled_at: None,
                },
            )
            .await
            .unwrap();
        assert!(bulk.mark_sending(draft.id, Utc::now()).await.unwrap());

        let (queue, _keep_alive) = BroadcastQueueService::create_job_queue_arc_with_receiver(8);
        let worker = DispatchWorker::new(scheduler, bulk.clone(), digest, queue.as_ref());
        let cancel = CancellationToken::new();
        let handle = worker.spawn(cancel.clone());

        queue
            .send(Job::DispatchBulkMessage(DispatchBulkMessageJob {
                bulk_message_id: draft.id,
            }))
            .await
            .unwrap();

        // One user fits in one batch, so the run finishes without pacing
        // pauses. Poll until the status flips.
        let mut status = draft.status;
        for _ in 0..50 {
            status = bulk.get(draft.id).await.unwrap().status;
            if status == BulkMessageStatus::Sent {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(status, BulkMessageStatus::Sent);
        assert_eq!(transport.deliveries().len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
