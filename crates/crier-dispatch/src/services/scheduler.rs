use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crier_channels::{failure_reasons, ChannelRegistry, DeliveryItem, SendOutcome};
use crier_config::DispatchSettings;
use crier_directory::{AudienceDescriptor, AudienceResolver};
use crier_entities::{
    announcements, bulk_messages, message_recipients, users, BulkMessageStatus, CommsChannel,
    DeliveryStatus, MessageCategory, Priority,
};
use crier_notifications::{matches, NotificationStore, PreferenceService};
use crier_templates::{RenderContext, TemplateEngine, TemplateError, TemplateService};
use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::announcements::{AnnouncementService, AnnouncementTotals};
use super::bulk::BulkMessageService;
use super::log::{CommunicationLogService, LogEvent};
use super::recipients::{NewRecipient, RecipientTracker};
use super::types::{CampaignRef, DispatchError};

/// Attempts per channel batch before deferred recipients are failed.
pub const MAX_SEND_ATTEMPTS: u32 = 3;

/// How one campaign is paced: recipients per batch and the pause between
/// batch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub batch_size: u64,
    pub batch_delay: Duration,
}

/// Priority decides pacing. Urgent campaigns take the largest batches the
/// hourly rate cap allows on a 30s cadence; low priority trickles out in
/// small batches two minutes apart. Batch sizes never drop below one, so a
/// tiny rate cap slows a campaign down without stalling it.
pub fn plan_for(priority: Priority, default_batch_size: u32, rate_limit_per_hour: u32) -> BatchPlan {
    let default_batch_size = u64::from(default_batch_size);
    let cap = u64::from(rate_limit_per_hour);
    let (batch_size, delay_secs) = match priority {
        Priority::Urgent => ((cap / 30).min(200), 30),
        Priority::High => (default_batch_size, 30),
        Priority::Medium => (default_batch_size.min(100), 60),
        Priority::Low => ((cap / 120).min(50), 120),
    };
    BatchPlan {
        batch_size: batch_size.max(1),
        batch_delay: Duration::from_secs(delay_secs),
    }
}

/// Totals from one campaign run. `sent`/`failed` count recipients, not
/// channel attempts: a recipient who reached any channel counts as sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct CampaignRunStats {
    /// Recipient rows materialized, including rows frozen by cancellation.
    pub recipients: u64,
    /// Resolved users skipped because no requested channel could reach them.
    pub dropped: u64,
    pub sent: u64,
    pub failed: u64,
    pub was_cancelled: bool,
}

/// Everything run_campaign needs, normalized from either campaign type.
struct CampaignSpec {
    campaign: CampaignRef,
    subject: String,
    content: String,
    extra_context: Option<serde_json::Value>,
    /// Channels to fan out here. Announcements handle in-app at publish
    /// time, so their spec never includes it; bulk messages do.
    channels: Vec<CommsChannel>,
    priority: Priority,
    category: MessageCategory,
    descriptor: AudienceDescriptor,
}

struct MaterializedBatch {
    rows: Vec<message_recipients::Model>,
    users: HashMap<i32, users::Model>,
    in_app_user_ids: Vec<i32>,
    dropped: u64,
}

/// Walks a campaign's audience page by page and drives each recipient's
/// channel statuses through the delivery lifecycle.
///
/// One batch at a time: resolve a page, filter it through preferences,
/// materialize recipient rows, then hand every channel its queued slice
/// concurrently. Per-channel semaphores keep the number of in-flight batches
/// per channel bounded across campaigns.
pub struct DeliveryScheduler {
    resolver: Arc<AudienceResolver>,
    preferences: Arc<PreferenceService>,
    registry: Arc<ChannelRegistry>,
    engine: Arc<TemplateEngine>,
    templates: Arc<TemplateService>,
    tracker: Arc<RecipientTracker>,
    log: Arc<CommunicationLogService>,
    announcements: Arc<AnnouncementService>,
    bulk: Arc<BulkMessageService>,
    store: Arc<NotificationStore>,
    settings: Arc<DispatchSettings>,
    limits: HashMap<CommsChannel, Arc<Semaphore>>,
    retry_base: Duration,
}

impl DeliveryScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: Arc<AudienceResolver>,
        preferences: Arc<PreferenceService>,
        registry: Arc<ChannelRegistry>,
        engine: Arc<TemplateEngine>,
        templates: Arc<TemplateService>,
        tracker: Arc<RecipientTracker>,
        log: Arc<CommunicationLogService>,
        announcements: Arc<AnnouncementService>,
        bulk: Arc<BulkMessageService>,
        store: Arc<NotificationStore>,
        settings: Arc<DispatchSettings>,
    ) -> Self {
        let limits = CommsChannel::all()
            .into_iter()
            .map(|channel| {
                (
                    channel,
                    Arc::new(Semaphore::new(settings.channel_concurrency.max(1))),
                )
            })
            .collect();
        Self {
            resolver,
            preferences,
            registry,
            engine,
            templates,
            tracker,
            log,
            announcements,
            bulk,
            store,
            settings,
            limits,
            retry_base: Duration::from_secs(1),
        }
    }

    /// Shrink the back-off between send attempts. Tests use this; the
    /// default is one second, doubling per attempt.
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    /// Fan an announcement out to its audience, then fold the recipient rows
    /// back into the announcement's denormalized totals.
    pub async fn run_announcement(
        &self,
        announcement_id: i32,
        shutdown: &CancellationToken,
    ) -> Result<CampaignRunStats, DispatchError> {
        let announcement = self.announcements.get(announcement_id).await?;
        let spec = CampaignSpec {
            campaign: CampaignRef::Announcement(announcement.id),
            subject: announcement.title.clone(),
            content: announcement.content.clone(),
            extra_context: None,
            // In-app rows were written when the announcement was published.
            channels: announcement
                .channels
                .iter()
                .copied()
                .filter(|channel| *channel != CommsChannel::InApp)
                .collect(),
            priority: announcement.priority,
            category: announcement.category,
            descriptor: AudienceDescriptor {
                audience: announcement.target_audience,
                filters: announcement.target_filters.clone(),
                user_ids: announcement.target_user_ids.clone(),
            },
        };

        let stats = self.run_campaign(&spec, shutdown).await?;
        self.refresh_announcement_metrics(announcement_id).await?;
        info!(
            announcement_id,
            recipients = stats.recipients,
            sent = stats.sent,
            failed = stats.failed,
            dropped = stats.dropped,
            "Announcement dispatch finished"
        );
        Ok(stats)
    }

    /// Run a bulk message campaign that has already been moved to `sending`.
    /// Completion flips the status to `sent`; a cancellation observed at a
    /// batch boundary leaves it `cancelled` and freezes the remaining rows.
    pub async fn run_bulk_message(
        &self,
        bulk_message_id: i32,
        shutdown: &CancellationToken,
    ) -> Result<CampaignRunStats, DispatchError> {
        let message = self.bulk.get(bulk_message_id).await?;
        if message.status != BulkMessageStatus::Sending {
            warn!(
                bulk_message_id,
                status = %message.status,
                "Bulk message is not in sending; refusing to dispatch"
            );
            return Ok(CampaignRunStats::default());
        }

        let (subject, content) = self.bulk_source_text(&message).await?;
        let spec = CampaignSpec {
            campaign: CampaignRef::BulkMessage(message.id),
            subject,
            content,
            extra_context: message.template_context.clone(),
            channels: message.channels.iter().copied().collect(),
            priority: message.priority,
            category: message.category,
            descriptor: AudienceDescriptor {
                audience: message.target_audience,
                filters: message.target_filters.clone(),
                user_ids: message.target_user_ids.clone(),
            },
        };

        let stats = self.run_campaign(&spec, shutdown).await?;
        if stats.was_cancelled {
            info!(
                bulk_message_id,
                recipients = stats.recipients,
                sent = stats.sent,
                "Bulk message cancelled mid-run"
            );
        } else if shutdown.is_cancelled() {
            // Interrupted by shutdown: leave the campaign in `sending` so an
            // operator can cancel or investigate what remains.
            warn!(bulk_message_id, "Bulk dispatch interrupted by shutdown");
        } else {
            self.bulk
                .mark_completed(message.id, BulkMessageStatus::Sent, Utc::now())
                .await?;
            info!(
                bulk_message_id,
                recipients = stats.recipients,
                sent = stats.sent,
                failed = stats.failed,
                dropped = stats.dropped,
                "Bulk message dispatch finished"
            );
        }
        Ok(stats)
    }

    /// Recompute an announcement's totals from its recipient rows and the
    /// in-app notifications written at publish time. A user reached on any
    /// channel counts once.
    pub async fn refresh_announcement_metrics(
        &self,
        announcement_id: i32,
    ) -> Result<announcements::Model, DispatchError> {
        let campaign = CampaignRef::Announcement(announcement_id);
        let flags = self.tracker.progress_flags(campaign).await?;
        let in_app = self
            .store
            .reference_read_stats(campaign.content_type(), announcement_id)
            .await?;

        let mut everyone = HashSet::new();
        let mut sent = HashSet::new();
        let mut delivered = HashSet::new();
        let mut read = HashSet::new();
        for progress in &flags {
            everyone.insert(progress.user_id);
            if progress.sent {
                sent.insert(progress.user_id);
            }
            if progress.delivered {
                delivered.insert(progress.user_id);
            }
            if progress.read {
                read.insert(progress.user_id);
            }
        }
        // An in-app row is delivered the moment it exists; read tracks the
        // notification center.
        for (user_id, is_read) in in_app {
            everyone.insert(user_id);
            sent.insert(user_id);
            delivered.insert(user_id);
            if is_read {
                read.insert(user_id);
            }
        }

        self.announcements
            .apply_totals(
                announcement_id,
                AnnouncementTotals {
                    recipients: everyone.len() as i32,
                    sent: sent.len() as i32,
                    delivered: delivered.len() as i32,
                    read: read.len() as i32,
                },
            )
            .await
    }

    /// The text a bulk campaign renders from: its template when one is
    /// attached and usable, otherwise the literal subject/content.
    async fn bulk_source_text(
        &self,
        message: &bulk_messages::Model,
    ) -> Result<(String, String), DispatchError> {
        if let Some(template_id) = message.template_id {
            match self.templates.get_template(template_id).await {
                Ok(template) if template.is_active => {
                    return Ok((
                        template.subject_template.clone(),
                        template.content_template.clone(),
                    ));
                }
                Ok(_) => {
                    warn!(
                        bulk_message_id = message.id,
                        template_id, "Template is inactive; using the campaign's own text"
                    );
                }
                Err(TemplateError::NotFound { .. }) => {
                    warn!(
                        bulk_message_id = message.id,
                        template_id, "Template is gone; using the campaign's own text"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok((message.subject.clone(), message.content.clone()))
    }

    async fn run_campaign(
        &self,
        spec: &CampaignSpec,
        shutdown: &CancellationToken,
    ) -> Result<CampaignRunStats, DispatchError> {
        let plan = plan_for(
            spec.priority,
            self.settings.batch_size_default,
            self.settings.rate_limit_per_hour,
        );
        info!(
            campaign = %spec.campaign,
            batch_size = plan.batch_size,
            delay_secs = plan.batch_delay.as_secs(),
            "Starting campaign dispatch"
        );

        let mut stats = CampaignRunStats::default();
        let mut after_id: Option<i32> = None;
        let mut first_batch = true;

        loop {
            if !first_batch {
                tokio::time::sleep(plan.batch_delay).await;
            }
            first_batch = false;

            if shutdown.is_cancelled() {
                warn!(campaign = %spec.campaign, "Dispatch stopped by shutdown");
                return Ok(stats);
            }
            if let CampaignRef::BulkMessage(id) = spec.campaign {
                if self.bulk.get(id).await?.status == BulkMessageStatus::Cancelled {
                    stats.was_cancelled = true;
                    let (frozen, dropped) =
                        self.freeze_cancelled_remainder(spec, after_id, plan.batch_size).await?;
                    stats.recipients += frozen;
                    stats.dropped += dropped;
                    return Ok(stats);
                }
            }

            let page = self
                .resolver
                .resolve_page(&spec.descriptor, after_id, plan.batch_size)
                .await?;
            if page.is_empty() {
                break;
            }
            if let Some(last) = page.last() {
                after_id = Some(last.id);
            }
            let page_len = page.len() as u64;

            let batch = self.materialize_batch(spec, &page).await?;
            stats.recipients += batch.rows.len() as u64;
            stats.dropped += batch.dropped;
            if let CampaignRef::BulkMessage(id) = spec.campaign {
                self.bulk.add_recipients(id, batch.rows.len() as i32).await?;
            }

            let (sent, failed) = self.dispatch_batch(spec, &batch).await?;
            stats.sent += sent;
            stats.failed += failed;

            if page_len < plan.batch_size {
                break;
            }
        }
        Ok(stats)
    }

    /// A cancelled campaign still materializes the rest of its audience so
    /// the recipient list is a complete record, then freezes every queued
    /// channel in one pass.
    async fn freeze_cancelled_remainder(
        &self,
        spec: &CampaignSpec,
        mut after_id: Option<i32>,
        page_size: u64,
    ) -> Result<(u64, u64), DispatchError> {
        let mut materialized = 0u64;
        let mut dropped = 0u64;
        loop {
            let page = self
                .resolver
                .resolve_page(&spec.descriptor, after_id, page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            if let Some(last) = page.last() {
                after_id = Some(last.id);
            }
            let page_len = page.len() as u64;

            let batch = self.materialize_batch(spec, &page).await?;
            materialized += batch.rows.len() as u64;
            dropped += batch.dropped;
            if let CampaignRef::BulkMessage(id) = spec.campaign {
                self.bulk.add_recipients(id, batch.rows.len() as i32).await?;
            }

            if page_len < page_size {
                break;
            }
        }

        let frozen = self.tracker.cancel_queued(spec.campaign).await?;
        info!(
            campaign = %spec.campaign,
            materialized,
            frozen_rows = frozen,
            "Campaign cancelled; remaining queued recipients frozen"
        );
        Ok((materialized, dropped))
    }

    /// Turn one resolved page into recipient rows. Preferences narrow the
    /// requested channels per user; users none of the requested contact
    /// channels can reach are dropped with a log event instead of a row.
    async fn materialize_batch(
        &self,
        spec: &CampaignSpec,
        page: &[users::Model],
    ) -> Result<MaterializedBatch, DispatchError> {
        let now = Utc::now();
        let ids: Vec<i32> = page.iter().map(|user| user.id).collect();
        let stored = self.preferences.load_for_users(&ids).await?;

        let mut new_rows = Vec::new();
        let mut in_app_user_ids = Vec::new();
        let mut dropped = 0u64;

        for user in page {
            let defaults;
            let preference = match stored.get(&user.id) {
                Some(row) => row,
                None => {
                    defaults = self.preferences.defaults_for(user.id);
                    &defaults
                }
            };

            let allowed: Vec<CommsChannel> = spec
                .channels
                .iter()
                .copied()
                .filter(|channel| {
                    matches(preference, *channel, spec.category, spec.priority, now).is_allowed()
                })
                .collect();

            if !allowed.is_empty() {
                let reachable = allowed.iter().any(|channel| match channel {
                    // Presence of a device or an account is the adapter's
                    // call; only the contact snapshots gate here.
                    CommsChannel::InApp | CommsChannel::Push => true,
                    CommsChannel::Email => {
                        user.email.as_deref().map(|e| !e.is_empty()).unwrap_or(false)
                    }
                    CommsChannel::Sms => {
                        user.phone.as_deref().map(|p| !p.is_empty()).unwrap_or(false)
                    }
                });
                if !reachable {
                    self.log
                        .record(
                            LogEvent::recipient_dropped(user.id, "no_reachable_contact")
                                .for_campaign(spec.campaign),
                        )
                        .await?;
                    dropped += 1;
                    continue;
                }
            }

            if allowed.contains(&CommsChannel::InApp) {
                in_app_user_ids.push(user.id);
            }

            new_rows.push(NewRecipient {
                user_id: user.id,
                email: user.email.clone(),
                phone: user.phone.clone(),
                queued_channels: allowed
                    .iter()
                    .copied()
                    .filter(|channel| *channel != CommsChannel::InApp)
                    .collect(),
            });
        }

        let rows = self.tracker.materialize(spec.campaign, &new_rows).await?;
        Ok(MaterializedBatch {
            rows,
            users: page.iter().map(|user| (user.id, user.clone())).collect(),
            in_app_user_ids,
            dropped,
        })
    }

    /// Send one materialized batch on every channel concurrently and fold
    /// the outcomes down to per-recipient sent/failed counts.
    async fn dispatch_batch(
        &self,
        spec: &CampaignSpec,
        batch: &MaterializedBatch,
    ) -> Result<(u64, u64), DispatchError> {
        let now = Utc::now();
        let mut contexts: HashMap<i32, RenderContext> = HashMap::new();
        for user in batch.users.values() {
            let mut context = self.engine.ambient_context(now).with_user(user);
            if let Some(extra) = &spec.extra_context {
                context.merge_object(extra);
            }
            contexts.insert(user.id, context);
        }

        let mut tasks: Vec<BoxFuture<'_, Result<Vec<(i32, bool)>, DispatchError>>> = Vec::new();
        for channel in [CommsChannel::Email, CommsChannel::Sms, CommsChannel::Push] {
            let targets: Vec<&message_recipients::Model> = batch
                .rows
                .iter()
                .filter(|row| queued_for(row, channel))
                .collect();
            if targets.is_empty() {
                continue;
            }
            tasks.push(Box::pin(
                self.dispatch_channel(spec, channel, targets, &contexts),
            ));
        }
        if !batch.in_app_user_ids.is_empty() {
            tasks.push(Box::pin(self.dispatch_in_app(
                spec,
                &batch.in_app_user_ids,
                &contexts,
            )));
        }

        let mut per_user: HashMap<i32, bool> = HashMap::new();
        for result in futures::future::join_all(tasks).await {
            for (user_id, was_sent) in result? {
                let reached = per_user.entry(user_id).or_insert(false);
                *reached |= was_sent;
            }
        }

        let sent = per_user.values().filter(|reached| **reached).count() as u64;
        let failed = per_user.len() as u64 - sent;
        if let CampaignRef::BulkMessage(id) = spec.campaign {
            self.bulk.add_progress(id, sent as i32, failed as i32).await?;
        }
        Ok((sent, failed))
    }

    /// Drive one channel's slice of a batch: queued -> sending -> sent or
    /// failed, with deferred recipients retried under exponential back-off.
    async fn dispatch_channel(
        &self,
        spec: &CampaignSpec,
        channel: CommsChannel,
        rows: Vec<&message_recipients::Model>,
        contexts: &HashMap<i32, RenderContext>,
    ) -> Result<Vec<(i32, bool)>, DispatchError> {
        let mut outcomes = Vec::new();

        let Some(adapter) = self.registry.get(channel) else {
            warn!(
                channel = channel.as_str(),
                "No adapter registered; failing queued recipients"
            );
            for row in rows {
                if self
                    .tracker
                    .transition(
                        row,
                        channel,
                        DeliveryStatus::Failed,
                        Some(failure_reasons::CHANNEL_NOT_CONFIGURED.to_string()),
                        None,
                    )
                    .await?
                {
                    outcomes.push((row.user_id, false));
                }
            }
            return Ok(outcomes);
        };

        let limit = self.limit_for(channel);
        let _permit = limit.acquire().await.expect("Semaphore closed");

        // Claim queued rows. Rows that moved elsewhere in the meantime
        // (a cancellation racing this batch) drop out here.
        let mut pending: Vec<(&message_recipients::Model, DeliveryItem)> = Vec::new();
        for row in rows {
            if !self
                .tracker
                .transition(row, channel, DeliveryStatus::Sending, None, None)
                .await?
            {
                continue;
            }
            let rendered = match contexts.get(&row.user_id) {
                Some(context) => self.engine.render_parts(&spec.subject, &spec.content, channel, context),
                None => {
                    let ambient = self.engine.ambient_context(Utc::now());
                    self.engine.render_parts(&spec.subject, &spec.content, channel, &ambient)
                }
            };
            let mut item = DeliveryItem::new(row.user_id, rendered)
                .with_category(spec.category)
                .with_priority(spec.priority)
                .with_reference(spec.campaign.content_type(), spec.campaign.content_id());
            if let Some(email) = &row.email {
                item = item.with_email(email.clone());
            }
            if let Some(phone) = &row.phone {
                item = item.with_phone(phone.clone());
            }
            pending.push((row, item));
        }
        if pending.is_empty() {
            return Ok(outcomes);
        }

        let mut attempt = 1u32;
        loop {
            let items: Vec<DeliveryItem> = pending.iter().map(|(_, item)| item.clone()).collect();
            let results = adapter.send_batch(&items).await;

            let mut deferred = Vec::new();
            for ((row, item), result) in pending.into_iter().zip(results) {
                match result.outcome {
                    SendOutcome::Sent => {
                        self.tracker
                            .transition(row, channel, DeliveryStatus::Sent, None, result.detail)
                            .await?;
                        outcomes.push((row.user_id, true));
                    }
                    SendOutcome::Failed { reason } => {
                        self.tracker
                            .transition(
                                row,
                                channel,
                                DeliveryStatus::Failed,
                                Some(reason),
                                result.detail,
                            )
                            .await?;
                        outcomes.push((row.user_id, false));
                    }
                    SendOutcome::Deferred { reason } => deferred.push((row, item, reason)),
                }
            }

            if deferred.is_empty() {
                break;
            }
            if attempt >= MAX_SEND_ATTEMPTS {
                for (row, _, reason) in deferred {
                    self.tracker
                        .transition(row, channel, DeliveryStatus::Failed, Some(reason), None)
                        .await?;
                    outcomes.push((row.user_id, false));
                }
                break;
            }

            warn!(
                campaign = %spec.campaign,
                channel = channel.as_str(),
                deferred = deferred.len(),
                attempt,
                "Deferred recipients; retrying"
            );
            for (row, _, _) in &deferred {
                self.tracker.record_retry(row.id).await?;
            }
            tokio::time::sleep(self.retry_base * 2u32.pow(attempt - 1)).await;
            pending = deferred.into_iter().map(|(row, item, _)| (row, item)).collect();
            attempt += 1;
        }

        Ok(outcomes)
    }

    /// In-app fan-out for bulk messages. There are no recipient-row statuses
    /// for this channel; the notification row is the delivery, and the log
    /// keeps the audit trail.
    async fn dispatch_in_app(
        &self,
        spec: &CampaignSpec,
        user_ids: &[i32],
        contexts: &HashMap<i32, RenderContext>,
    ) -> Result<Vec<(i32, bool)>, DispatchError> {
        let mut outcomes = Vec::new();
        let Some(adapter) = self.registry.get(CommsChannel::InApp) else {
            warn!("No in-app adapter registered; skipping in-app fan-out");
            return Ok(outcomes);
        };

        let limit = self.limit_for(CommsChannel::InApp);
        let _permit = limit.acquire().await.expect("Semaphore closed");

        let items: Vec<DeliveryItem> = user_ids
            .iter()
            .map(|user_id| {
                let rendered = match contexts.get(user_id) {
                    Some(context) => self.engine.render_parts(
                        &spec.subject,
                        &spec.content,
                        CommsChannel::InApp,
                        context,
                    ),
                    None => {
                        let ambient = self.engine.ambient_context(Utc::now());
                        self.engine.render_parts(
                            &spec.subject,
                            &spec.content,
                            CommsChannel::InApp,
                            &ambient,
                        )
                    }
                };
                DeliveryItem::new(*user_id, rendered)
                    .with_category(spec.category)
                    .with_priority(spec.priority)
                    .with_reference(spec.campaign.content_type(), spec.campaign.content_id())
            })
            .collect();

        for result in adapter.send_batch(&items).await {
            match result.outcome {
                SendOutcome::Sent => {
                    self.log
                        .record(
                            LogEvent::delivery(
                                result.user_id,
                                CommsChannel::InApp,
                                DeliveryStatus::Sent,
                            )
                            .for_campaign(spec.campaign),
                        )
                        .await?;
                    outcomes.push((result.user_id, true));
                }
                SendOutcome::Deferred { reason } | SendOutcome::Failed { reason } => {
                    self.log
                        .record(
                            LogEvent::delivery(
                                result.user_id,
                                CommsChannel::InApp,
                                DeliveryStatus::Failed,
                            )
                            .for_campaign(spec.campaign)
                            .with_metadata(serde_json::json!({ "reason": reason })),
                        )
                        .await?;
                    outcomes.push((result.user_id, false));
                }
            }
        }
        Ok(outcomes)
    }

    fn limit_for(&self, channel: CommsChannel) -> Arc<Semaphore> {
        self.limits
            .get(&channel)
            .cloned()
            .unwrap_or_else(|| Arc::new(Semaphore::new(1)))
    }
}

fn queued_for(row: &message_recipients::Model, channel: CommsChannel) -> bool {
    let status = match channel {
        CommsChannel::Email => row.email_status,
        CommsChannel::Sms => row.sms_status,
        CommsChannel::Push => row.push_status,
        CommsChannel::InApp => None,
    };
    status == Some(DeliveryStatus::Queued)
}
