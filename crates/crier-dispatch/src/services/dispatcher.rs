use std::sync::Arc;

use chrono::Utc;
use crier_channels::{failure_reasons, ChannelRegistry, DeliveryItem, SendOutcome};
use crier_config::DispatchSettings;
use crier_core::jobs::{DispatchAnnouncementJob, DispatchBulkMessageJob, Job, JobQueue};
use crier_core::UtcDateTime;
use crier_directory::{AudienceDescriptor, AudienceResolver, UserService};
use crier_entities::{
    announcements, bulk_messages, users, Audience, BulkMessageStatus, ChannelList, CommsChannel,
    DeliveryStatus, IdList, MessageCategory, Priority, TargetFilters,
};
use crier_notifications::{
    matches, CreateNotificationRequest, DeliveryDecision, NotificationPayload, NotificationStore,
    PreferenceService,
};
use crier_templates::{RenderContext, TemplateEngine};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use super::announcements::{AnnouncementService, CreateAnnouncementRequest};
use super::bulk::{BulkMessageService, CreateBulkMessageRequest};
use super::log::{CommunicationLogService, LogEvent};
use super::recipients::RecipientTracker;
use super::scheduler::DeliveryScheduler;
use super::types::{CampaignRef, ChannelCounts, DispatchError};

/// Direct single-user send. The notification-center entry is always written;
/// any listed channel beyond in-app fans out through the user's preferences.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SendNotificationRequest {
    pub user_id: i32,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub notification_type: Option<MessageCategory>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub channels: Option<ChannelList>,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EmergencyAlertRequest {
    pub title: String,
    pub message: String,
    pub target_audience: Audience,
    #[serde(default)]
    pub target_filters: Option<TargetFilters>,
    #[serde(default)]
    pub target_user_ids: Option<IdList>,
}

/// Where one extra channel of a direct send ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FanoutStatus {
    Sent,
    Failed,
    /// Blocked by the user's preferences; nothing was attempted.
    Suppressed,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChannelFanout {
    pub channel: CommsChannel,
    pub status: FanoutStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NotificationSendReport {
    pub notification_id: i32,
    pub user_id: i32,
    pub fanout: Vec<ChannelFanout>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChannelAnalytics {
    pub channel: CommsChannel,
    pub counts: ChannelCounts,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InAppAnalytics {
    pub delivered: u64,
    pub read: u64,
}

/// Delivery-side rollup for one campaign: materialized recipient rows folded
/// per channel, plus the notification-center rows written for it.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CampaignAnalytics {
    pub recipient_rows: u64,
    pub channels: Vec<ChannelAnalytics>,
    pub in_app: InAppAnalytics,
}

/// Entry point the handlers and the scheduled publisher drive campaigns
/// through. The facade owns the publish step (claim, notification-center
/// write, job handoff); per-batch delivery belongs to the scheduler running
/// inside the worker.
pub struct Dispatcher {
    announcements: Arc<AnnouncementService>,
    bulk: Arc<BulkMessageService>,
    scheduler: Arc<DeliveryScheduler>,
    resolver: Arc<AudienceResolver>,
    users: Arc<UserService>,
    preferences: Arc<PreferenceService>,
    registry: Arc<ChannelRegistry>,
    engine: Arc<TemplateEngine>,
    store: Arc<NotificationStore>,
    tracker: Arc<RecipientTracker>,
    log: Arc<CommunicationLogService>,
    queue: Arc<dyn JobQueue>,
    settings: Arc<DispatchSettings>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        announcements: Arc<AnnouncementService>,
        bulk: Arc<BulkMessageService>,
        scheduler: Arc<DeliveryScheduler>,
        resolver: Arc<AudienceResolver>,
        users: Arc<UserService>,
        preferences: Arc<PreferenceService>,
        registry: Arc<ChannelRegistry>,
        engine: Arc<TemplateEngine>,
        store: Arc<NotificationStore>,
        tracker: Arc<RecipientTracker>,
        log: Arc<CommunicationLogService>,
        queue: Arc<dyn JobQueue>,
        settings: Arc<DispatchSettings>,
    ) -> Self {
        Self {
            announcements,
            bulk,
            scheduler,
            resolver,
            users,
            preferences,
            registry,
            engine,
            store,
            tracker,
            log,
            queue,
            settings,
        }
    }

    /// Create an announcement and, unless it carries a future start date,
    /// publish it right away.
    pub async fn create_announcement(
        &self,
        created_by: i32,
        request: CreateAnnouncementRequest,
    ) -> Result<announcements::Model, DispatchError> {
        let announcement = self.announcements.create(created_by, request).await?;
        let now = Utc::now();
        let due = announcement
            .start_date
            .map(|start| start <= now)
            .unwrap_or(true);
        if due {
            self.publish_announcement(&announcement, now).await?;
            return self.announcements.get(announcement.id).await;
        }
        info!(
            announcement_id = announcement.id,
            start_date = ?announcement.start_date,
            "Announcement deferred to its start date"
        );
        Ok(announcement)
    }

    /// Publish one announcement: claim its fan-out, write the
    /// notification-center rows, then hand the outbound channels to the
    /// worker. Returns false when another caller already claimed it.
    pub async fn publish_announcement(
        &self,
        announcement: &announcements::Model,
        now: UtcDateTime,
    ) -> Result<bool, DispatchError> {
        if !self
            .announcements
            .mark_dispatched(announcement.id, now)
            .await?
        {
            return Ok(false);
        }
        self.announcements
            .mark_published(announcement.id, now)
            .await?;

        if announcement.channels.contains(CommsChannel::InApp) {
            let created = self.write_in_app(announcement, now).await?;
            info!(
                announcement_id = announcement.id,
                created, "Wrote notification-center rows at publish"
            );
            self.scheduler
                .refresh_announcement_metrics(announcement.id)
                .await?;
        }

        let has_outbound = announcement
            .channels
            .iter()
            .any(|channel| *channel != CommsChannel::InApp);
        if has_outbound {
            self.queue
                .send(Job::DispatchAnnouncement(DispatchAnnouncementJob {
                    announcement_id: announcement.id,
                }))
                .await?;
        }
        info!(
            announcement_id = announcement.id,
            priority = %announcement.priority,
            outbound = has_outbound,
            "Published announcement"
        );
        Ok(true)
    }

    /// Resolve the audience and write a notification-center row for every
    /// user whose preferences admit in-app delivery right now.
    async fn write_in_app(
        &self,
        announcement: &announcements::Model,
        now: UtcDateTime,
    ) -> Result<u64, DispatchError> {
        let descriptor = AudienceDescriptor {
            audience: announcement.target_audience,
            filters: announcement.target_filters.clone(),
            user_ids: announcement.target_user_ids.clone(),
        };
        let audience = self.resolver.resolve_all(&descriptor).await?;
        let ids: Vec<i32> = audience.iter().map(|user| user.id).collect();
        let stored = self.preferences.load_for_users(&ids).await?;

        let campaign = CampaignRef::Announcement(announcement.id);
        let mut recipients = Vec::new();
        for user in &audience {
            let defaults;
            let preference = match stored.get(&user.id) {
                Some(row) => row,
                None => {
                    defaults = self.preferences.defaults_for(user.id);
                    &defaults
                }
            };
            if matches(
                preference,
                CommsChannel::InApp,
                announcement.category,
                announcement.priority,
                now,
            )
            .is_allowed()
            {
                recipients.push(user.id);
            }
        }

        let payload = NotificationPayload {
            title: announcement.title.clone(),
            content: announcement.content.clone(),
            notification_type: announcement.category,
            priority: Some(announcement.priority),
            reference_type: Some(campaign.content_type().to_string()),
            reference_id: Some(campaign.content_id()),
        };
        let created = self.store.create_many(&recipients, &payload).await?;
        let events = recipients
            .iter()
            .map(|user_id| {
                LogEvent::delivery(*user_id, CommsChannel::InApp, DeliveryStatus::Sent)
                    .for_campaign(campaign)
            })
            .collect();
        self.log.record_many(events).await?;
        Ok(created)
    }

    /// Remove an announcement along with the notification-center rows it
    /// produced. Recipient rows cascade with the campaign itself.
    pub async fn delete_announcement(&self, id: i32) -> Result<(), DispatchError> {
        let campaign = CampaignRef::Announcement(id);
        self.announcements.delete(id).await?;
        let removed = self
            .store
            .delete_for_reference(campaign.content_type(), id)
            .await?;
        if removed > 0 {
            info!(announcement_id = id, removed, "Removed derived notifications");
        }
        Ok(())
    }

    /// Short-circuit single-user send. The notification-center row is
    /// written unconditionally; every other requested channel goes through
    /// the user's preferences and, when allowed, straight to its adapter
    /// without the batch machinery.
    pub async fn send_notification(
        &self,
        sender_id: i32,
        request: SendNotificationRequest,
    ) -> Result<NotificationSendReport, DispatchError> {
        let user = self.users.get_user(request.user_id).await?;
        let category = request
            .notification_type
            .unwrap_or(MessageCategory::General);
        let priority = request.priority.unwrap_or(self.settings.default_priority);

        let notification = self
            .store
            .create(CreateNotificationRequest {
                user_id: user.id,
                title: request.title.clone(),
                content: request.content.clone(),
                notification_type: category,
                priority: Some(priority),
                reference_type: None,
                reference_id: None,
                channels_used: request.channels.clone(),
            })
            .await?;
        self.log
            .record(
                LogEvent::notification(user.id, CommsChannel::InApp, DeliveryStatus::Sent)
                    .from_sender(sender_id),
            )
            .await?;

        let now = Utc::now();
        let preference = self.preferences.get_or_create(user.id).await?;
        let context = self.engine.ambient_context(now).with_user(&user);

        let mut fanout = Vec::new();
        let extra: Vec<CommsChannel> = request
            .channels
            .as_ref()
            .map(|list| {
                list.iter()
                    .copied()
                    .filter(|channel| *channel != CommsChannel::InApp)
                    .collect()
            })
            .unwrap_or_default();
        for channel in extra {
            let entry = match matches(&preference, channel, category, priority, now) {
                DeliveryDecision::Deny(reason) => ChannelFanout {
                    channel,
                    status: FanoutStatus::Suppressed,
                    reason: Some(reason.as_str().to_string()),
                },
                DeliveryDecision::Allow => {
                    self.direct_send(&user, channel, &request, category, priority, &context)
                        .await
                }
            };
            let status = match entry.status {
                FanoutStatus::Sent => DeliveryStatus::Sent,
                FanoutStatus::Failed | FanoutStatus::Suppressed => DeliveryStatus::Failed,
            };
            let mut event =
                LogEvent::notification(user.id, channel, status).from_sender(sender_id);
            if let Some(reason) = &entry.reason {
                event = event.with_metadata(serde_json::json!({ "reason": reason }));
            }
            self.log.record(event).await?;
            fanout.push(entry);
        }

        info!(
            notification_id = notification.id,
            user_id = user.id,
            channels = fanout.len(),
            "Sent direct notification"
        );
        Ok(NotificationSendReport {
            notification_id: notification.id,
            user_id: user.id,
            fanout,
        })
    }

    /// One adapter call for one user, no retries. Deferred outcomes count as
    /// failures here; the direct path has no scheduler behind it.
    async fn direct_send(
        &self,
        user: &users::Model,
        channel: CommsChannel,
        request: &SendNotificationRequest,
        category: MessageCategory,
        priority: Priority,
        context: &RenderContext,
    ) -> ChannelFanout {
        let Some(adapter) = self.registry.get(channel) else {
            return ChannelFanout {
                channel,
                status: FanoutStatus::Failed,
                reason: Some(failure_reasons::CHANNEL_NOT_CONFIGURED.to_string()),
            };
        };
        let message = self
            .engine
            .render_parts(&request.title, &request.content, channel, context);
        let mut item = DeliveryItem::new(user.id, message)
            .with_category(category)
            .with_priority(priority);
        if let Some(email) = &user.email {
            item = item.with_email(email);
        }
        if let Some(phone) = &user.phone {
            item = item.with_phone(phone);
        }

        let mut results = adapter.send_batch(&[item]).await;
        match results.pop().map(|result| result.outcome) {
            Some(SendOutcome::Sent) => ChannelFanout {
                channel,
                status: FanoutStatus::Sent,
                reason: None,
            },
            Some(SendOutcome::Deferred { reason }) | Some(SendOutcome::Failed { reason }) => {
                ChannelFanout {
                    channel,
                    status: FanoutStatus::Failed,
                    reason: Some(reason),
                }
            }
            None => ChannelFanout {
                channel,
                status: FanoutStatus::Failed,
                reason: Some("adapter returned no result".to_string()),
            },
        }
    }

    /// Urgent announcement on every channel. Urgent priority engages the
    /// critical override, so quiet hours and the weekend rule do not apply.
    pub async fn send_emergency_alert(
        &self,
        created_by: i32,
        request: EmergencyAlertRequest,
    ) -> Result<announcements::Model, DispatchError> {
        let announcement = self
            .create_announcement(
                created_by,
                CreateAnnouncementRequest {
                    title: request.title,
                    content: request.message,
                    target_audience: request.target_audience,
                    target_filters: request.target_filters,
                    target_user_ids: request.target_user_ids,
                    channels: Some(ChannelList::from(CommsChannel::all())),
                    priority: Some(Priority::Urgent),
                    category: Some(MessageCategory::General),
                    start_date: None,
                    end_date: None,
                    attachment_ref: None,
                },
            )
            .await?;
        warn!(
            announcement_id = announcement.id,
            audience = %announcement.target_audience,
            "Emergency alert dispatched"
        );
        Ok(announcement)
    }

    /// Persist a bulk message draft. Nothing is sent until the draft is
    /// started explicitly or its scheduled time arrives.
    pub async fn queue_bulk_message(
        &self,
        sender_id: i32,
        request: CreateBulkMessageRequest,
    ) -> Result<bulk_messages::Model, DispatchError> {
        self.bulk.create_draft(sender_id, request).await
    }

    /// Move a draft to `sending` and enqueue its dispatch job.
    pub async fn start_bulk_message(&self, id: i32) -> Result<bulk_messages::Model, DispatchError> {
        if !self.start_claimed(id, Utc::now()).await? {
            let current = self.bulk.get(id).await?;
            return Err(DispatchError::conflict(format!(
                "a {} bulk message cannot be started",
                current.status
            )));
        }
        self.bulk.get(id).await
    }

    async fn start_claimed(&self, id: i32, now: UtcDateTime) -> Result<bool, DispatchError> {
        if !self.bulk.mark_sending(id, now).await? {
            return Ok(false);
        }
        self.queue
            .send(Job::DispatchBulkMessage(DispatchBulkMessageJob {
                bulk_message_id: id,
            }))
            .await?;
        Ok(true)
    }

    /// Cancel a draft or an in-flight campaign. For an in-flight one the
    /// still-queued recipient channels are frozen here; the scheduler stops
    /// on its own at the next batch boundary.
    pub async fn cancel_bulk_message(
        &self,
        id: i32,
    ) -> Result<bulk_messages::Model, DispatchError> {
        let previous = self.bulk.cancel(id).await?;
        if previous == BulkMessageStatus::Sending {
            let frozen = self
                .tracker
                .cancel_queued(CampaignRef::BulkMessage(id))
                .await?;
            info!(
                bulk_message_id = id,
                frozen, "Froze queued recipients after cancellation"
            );
        }
        self.bulk.get(id).await
    }

    /// Remove a draft or cancelled campaign along with any
    /// notification-center rows an earlier partial run produced.
    pub async fn delete_bulk_message(&self, id: i32) -> Result<(), DispatchError> {
        let campaign = CampaignRef::BulkMessage(id);
        self.bulk.delete(id).await?;
        let removed = self
            .store
            .delete_for_reference(campaign.content_type(), id)
            .await?;
        if removed > 0 {
            info!(bulk_message_id = id, removed, "Removed derived notifications");
        }
        Ok(())
    }

    /// One pass of the scheduled publisher: publish announcements whose
    /// start date has arrived and start bulk messages whose send time has.
    /// A failing campaign is logged and skipped so one bad row cannot stall
    /// the rest of the pass.
    pub async fn publish_due(&self, now: UtcDateTime) -> Result<(u64, u64), DispatchError> {
        let mut published = 0u64;
        for announcement in self.announcements.due_for_publishing(now).await? {
            match self.publish_announcement(&announcement, now).await {
                Ok(true) => published += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        announcement_id = announcement.id,
                        "Failed to publish due announcement: {}", e
                    );
                }
            }
        }

        let mut started = 0u64;
        for message in self.bulk.due_for_sending(now).await? {
            match self.start_claimed(message.id, now).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(
                        bulk_message_id = message.id,
                        "Failed to start due bulk message: {}", e
                    );
                }
            }
        }

        if published > 0 || started > 0 {
            info!(published, started, "Scheduled publisher pass finished");
        }
        Ok((published, started))
    }

    pub async fn announcement_analytics(
        &self,
        id: i32,
    ) -> Result<CampaignAnalytics, DispatchError> {
        self.announcements.get(id).await?;
        self.campaign_analytics(CampaignRef::Announcement(id)).await
    }

    pub async fn bulk_message_analytics(
        &self,
        id: i32,
    ) -> Result<CampaignAnalytics, DispatchError> {
        self.bulk.get(id).await?;
        self.campaign_analytics(CampaignRef::BulkMessage(id)).await
    }

    async fn campaign_analytics(
        &self,
        campaign: CampaignRef,
    ) -> Result<CampaignAnalytics, DispatchError> {
        let recipient_rows = self.tracker.count_for_campaign(campaign).await?;
        let mut rollup = self.tracker.channel_rollup(campaign).await?;
        let reads = self
            .store
            .reference_read_stats(campaign.content_type(), campaign.content_id())
            .await?;
        let read = reads.iter().filter(|(_, is_read)| *is_read).count() as u64;
        let channels = CommsChannel::all()
            .into_iter()
            .filter_map(|channel| {
                rollup
                    .remove(&channel)
                    .map(|counts| ChannelAnalytics { channel, counts })
            })
            .collect();
        Ok(CampaignAnalytics {
            recipient_rows,
            channels,
            in_app: InAppAnalytics {
                delivered: reads.len() as u64,
                read,
            },
        })
    }
}
