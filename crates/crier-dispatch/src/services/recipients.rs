use std::collections::HashMap;
use std::sync::Arc;

use crier_core::pagination::PaginationParams;
use crier_database::DbConnection;
use crier_entities::{message_recipients, CommsChannel, DeliveryStatus};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};

use super::log::{CommunicationLogService, LogEvent};
use super::types::{CallbackKind, CampaignRef, ChannelCounts, DispatchError};

/// Statuses a row may hold immediately before moving to `to`. Conditional
/// updates filter on this set, so duplicate and out-of-order callbacks
/// no-op instead of regressing state.
pub fn allowed_predecessors(to: DeliveryStatus) -> &'static [DeliveryStatus] {
    use DeliveryStatus::*;
    match to {
        Queued => &[],
        Sending => &[Queued],
        Sent => &[Sending],
        Delivered => &[Sent],
        Opened => &[Delivered],
        Clicked => &[Opened, Delivered],
        Failed => &[Queued, Sending],
        Bounced => &[Sent],
        Cancelled => &[Queued],
    }
}

fn status_column(channel: CommsChannel) -> Option<message_recipients::Column> {
    match channel {
        CommsChannel::Email => Some(message_recipients::Column::EmailStatus),
        CommsChannel::Sms => Some(message_recipients::Column::SmsStatus),
        CommsChannel::Push => Some(message_recipients::Column::PushStatus),
        // In-app delivery is tracked as Notification rows, not here.
        CommsChannel::InApp => None,
    }
}

fn timestamp_column(to: DeliveryStatus) -> Option<message_recipients::Column> {
    match to {
        DeliveryStatus::Sent => Some(message_recipients::Column::SentAt),
        DeliveryStatus::Delivered => Some(message_recipients::Column::DeliveredAt),
        DeliveryStatus::Opened => Some(message_recipients::Column::OpenedAt),
        DeliveryStatus::Clicked => Some(message_recipients::Column::ClickedAt),
        DeliveryStatus::Bounced => Some(message_recipients::Column::BouncedAt),
        _ => None,
    }
}

fn campaign_condition(campaign: CampaignRef) -> Condition {
    match campaign {
        CampaignRef::Announcement(id) => {
            Condition::all().add(message_recipients::Column::AnnouncementId.eq(id))
        }
        CampaignRef::BulkMessage(id) => {
            Condition::all().add(message_recipients::Column::BulkMessageId.eq(id))
        }
    }
}

/// A recipient about to be materialized: contact snapshot plus the channels
/// that start in `queued` for this row.
#[derive(Debug, Clone)]
pub struct NewRecipient {
    pub user_id: i32,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub queued_channels: Vec<CommsChannel>,
}

/// What a provider callback did to the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Applied,
    /// Duplicate or out-of-order; state unchanged.
    NoOp,
    NotFound,
}

/// Owns MessageRecipient rows: materialization at dispatch time, the
/// per-channel status state machine, and per-campaign rollups. Every applied
/// transition lands in the communication log.
pub struct RecipientTracker {
    db: Arc<DbConnection>,
    log: Arc<CommunicationLogService>,
}

impl RecipientTracker {
    pub fn new(db: Arc<DbConnection>, log: Arc<CommunicationLogService>) -> Self {
        Self { db, log }
    }

    /// Insert one batch of recipient rows. Channel status columns start
    /// `queued` for the requested channels and stay null otherwise.
    pub async fn materialize(
        &self,
        campaign: CampaignRef,
        batch: &[NewRecipient],
    ) -> Result<Vec<message_recipients::Model>, DispatchError> {
        let (announcement_id, bulk_message_id) = match campaign {
            CampaignRef::Announcement(id) => (Some(id), None),
            CampaignRef::BulkMessage(id) => (None, Some(id)),
        };

        let txn = self.db.begin().await?;
        let mut rows = Vec::with_capacity(batch.len());
        for recipient in batch {
            let status_for = |channel: CommsChannel| {
                recipient
                    .queued_channels
                    .contains(&channel)
                    .then_some(DeliveryStatus::Queued)
            };
            let row = message_recipients::ActiveModel {
                announcement_id: Set(announcement_id),
                bulk_message_id: Set(bulk_message_id),
                user_id: Set(recipient.user_id),
                email: Set(recipient.email.clone()),
                phone: Set(recipient.phone.clone()),
                email_status: Set(status_for(CommsChannel::Email)),
                sms_status: Set(status_for(CommsChannel::Sms)),
                push_status: Set(status_for(CommsChannel::Push)),
                retry_count: Set(0),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            rows.push(row);
        }
        txn.commit().await?;
        Ok(rows)
    }

    /// Conditionally move one channel status forward. Returns false when the
    /// current status is not an allowed predecessor (duplicate callback,
    /// already-cancelled row, lost race); the row is untouched in that case.
    pub async fn transition(
        &self,
        row: &message_recipients::Model,
        channel: CommsChannel,
        to: DeliveryStatus,
        error: Option<String>,
        detail: Option<serde_json::Value>,
    ) -> Result<bool, DispatchError> {
        let Some(column) = status_column(channel) else {
            return Ok(false);
        };
        let now = chrono::Utc::now();

        let mut update = message_recipients::Entity::update_many()
            .col_expr(column, Expr::value(to))
            .col_expr(message_recipients::Column::UpdatedAt, Expr::value(now))
            .filter(message_recipients::Column::Id.eq(row.id))
            .filter(column.is_in(allowed_predecessors(to).iter().copied()));
        if let Some(ts) = timestamp_column(to) {
            update = update.col_expr(ts, Expr::value(now));
        }
        if let Some(message) = &error {
            update = update.col_expr(
                message_recipients::Column::ErrorMessage,
                Expr::value(message.clone()),
            );
        }

        let applied = update.exec(self.db.as_ref()).await?.rows_affected == 1;
        if applied {
            let campaign = row_campaign(row);
            let mut event = LogEvent::delivery(row.user_id, channel, to);
            if let Some(campaign) = campaign {
                event = event.for_campaign(campaign);
            }
            if let Some(detail) = detail {
                event = event.with_metadata(detail);
            } else if let Some(message) = error {
                event = event.with_metadata(serde_json::json!({ "reason": message }));
            }
            self.log.record(event).await?;
        }
        Ok(applied)
    }

    /// Bump the retry counter after a deferred send.
    pub async fn record_retry(&self, row_id: i32) -> Result<(), DispatchError> {
        message_recipients::Entity::update_many()
            .col_expr(
                message_recipients::Column::RetryCount,
                Expr::col(message_recipients::Column::RetryCount).add(1),
            )
            .col_expr(
                message_recipients::Column::UpdatedAt,
                Expr::value(chrono::Utc::now()),
            )
            .filter(message_recipients::Column::Id.eq(row_id))
            .exec(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Apply one provider callback. The recipient id in the callback must
    /// match the row's user, otherwise the callback is treated as unknown.
    pub async fn apply_callback(
        &self,
        message_id: i32,
        recipient_user_id: i32,
        channel: CommsChannel,
        kind: CallbackKind,
        provider_reference: Option<String>,
    ) -> Result<CallbackOutcome, DispatchError> {
        let Some(row) = message_recipients::Entity::find_by_id(message_id)
            .one(self.db.as_ref())
            .await?
        else {
            return Ok(CallbackOutcome::NotFound);
        };
        if row.user_id != recipient_user_id {
            return Ok(CallbackOutcome::NotFound);
        }

        let detail = provider_reference
            .map(|reference| serde_json::json!({ "provider_reference": reference }));
        let applied = self
            .transition(&row, channel, kind.target_status(), None, detail)
            .await?;
        Ok(if applied {
            CallbackOutcome::Applied
        } else {
            CallbackOutcome::NoOp
        })
    }

    /// Cancel every still-queued channel on the campaign's rows. Returns the
    /// number of rows that had at least one channel cancelled.
    pub async fn cancel_queued(&self, campaign: CampaignRef) -> Result<u64, DispatchError> {
        let queued = message_recipients::Entity::find()
            .filter(campaign_condition(campaign))
            .filter(
                Condition::any()
                    .add(message_recipients::Column::EmailStatus.eq(DeliveryStatus::Queued))
                    .add(message_recipients::Column::SmsStatus.eq(DeliveryStatus::Queued))
                    .add(message_recipients::Column::PushStatus.eq(DeliveryStatus::Queued)),
            )
            .all(self.db.as_ref())
            .await?;

        let mut cancelled_rows = 0u64;
        for row in queued {
            let mut touched = false;
            for (channel, status) in [
                (CommsChannel::Email, row.email_status),
                (CommsChannel::Sms, row.sms_status),
                (CommsChannel::Push, row.push_status),
            ] {
                if status == Some(DeliveryStatus::Queued) {
                    touched |= self
                        .transition(
                            &row,
                            channel,
                            DeliveryStatus::Cancelled,
                            Some("campaign_cancelled".to_string()),
                            None,
                        )
                        .await?;
                }
            }
            if touched {
                cancelled_rows += 1;
            }
        }
        Ok(cancelled_rows)
    }

    pub async fn find(
        &self,
        id: i32,
    ) -> Result<Option<message_recipients::Model>, DispatchError> {
        Ok(message_recipients::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn list_for_campaign(
        &self,
        campaign: CampaignRef,
        params: &PaginationParams,
    ) -> Result<(Vec<message_recipients::Model>, u64), DispatchError> {
        let (page, page_size) = params.normalize();
        let paginator = message_recipients::Entity::find()
            .filter(campaign_condition(campaign))
            .order_by_asc(message_recipients::Column::UserId)
            .paginate(self.db.as_ref(), page_size);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;
        Ok((items, total))
    }

    pub async fn count_for_campaign(&self, campaign: CampaignRef) -> Result<u64, DispatchError> {
        Ok(message_recipients::Entity::find()
            .filter(campaign_condition(campaign))
            .count(self.db.as_ref())
            .await?)
    }

    /// Fold every row's channel statuses into per-channel counts.
    pub async fn channel_rollup(
        &self,
        campaign: CampaignRef,
    ) -> Result<HashMap<CommsChannel, ChannelCounts>, DispatchError> {
        let mut rollup: HashMap<CommsChannel, ChannelCounts> = HashMap::new();
        let mut pages = message_recipients::Entity::find()
            .filter(campaign_condition(campaign))
            .paginate(self.db.as_ref(), 500);
        while let Some(rows) = pages.fetch_and_next().await? {
            for row in rows {
                for (channel, status) in [
                    (CommsChannel::Email, row.email_status),
                    (CommsChannel::Sms, row.sms_status),
                    (CommsChannel::Push, row.push_status),
                ] {
                    if let Some(status) = status {
                        rollup.entry(channel).or_default().observe(status);
                    }
                }
            }
        }
        Ok(rollup)
    }

    /// Per-user delivery progress used by the campaign metric refreshers:
    /// (reached sent, reached delivered, opened or clicked) per row.
    pub async fn progress_flags(
        &self,
        campaign: CampaignRef,
    ) -> Result<Vec<ProgressFlags>, DispatchError> {
        let mut flags = Vec::new();
        let mut pages = message_recipients::Entity::find()
            .filter(campaign_condition(campaign))
            .paginate(self.db.as_ref(), 500);
        while let Some(rows) = pages.fetch_and_next().await? {
            for row in rows {
                let mut sent = false;
                let mut delivered = false;
                let mut read = false;
                for status in row.channel_statuses() {
                    use DeliveryStatus::*;
                    sent |= matches!(status, Sent | Delivered | Opened | Clicked | Bounced);
                    delivered |= matches!(status, Delivered | Opened | Clicked);
                    read |= matches!(status, Opened | Clicked);
                }
                flags.push(ProgressFlags {
                    user_id: row.user_id,
                    sent,
                    delivered,
                    read,
                });
            }
        }
        Ok(flags)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressFlags {
    pub user_id: i32,
    pub sent: bool,
    pub delivered: bool,
    pub read: bool,
}

fn row_campaign(row: &message_recipients::Model) -> Option<CampaignRef> {
    row.announcement_id
        .map(CampaignRef::Announcement)
        .or(row.bulk_message_id.map(CampaignRef::BulkMessage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crier_database::test_utils::TestDatabase;
    use crier_entities::{announcements, users, Audience, ChannelList, MessageCategory, Priority};
    use sea_orm::ActiveModelTrait;

    async fn seed_user(db: &DbConnection, name: &str) -> i32 {
        users::ActiveModel {
            first_name: Set(name.to_string()),
            last_name: Set("Recipient".to_string()),
            email: Set(Some(format!("{}@school.example", name.to_lowercase()))),
            phone: Set(Some("+15550001111".to_string())),
            locale: Set("en".to_string()),
            is_active: Set(true),
            deleted_at: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
        .id
    }

    async fn seed_announcement(db: &DbConnection, created_by: i32) -> i32 {
        announcements::ActiveModel {
            title: Set("Test".to_string()),
            content: Set("Body".to_string()),
            created_by: Set(created_by),
            target_audience: Set(Audience::All),
            channels: Set(ChannelList(vec![CommsChannel::Email])),
            priority: Set(Priority::Medium),
            category: Set(MessageCategory::General),
            is_published: Set(true),
            total_recipients: Set(0),
            total_sent: Set(0),
            total_delivered: Set(0),
            total_read: Set(0),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
        .id
    }

    struct Fixture {
        test_db: TestDatabase,
        tracker: RecipientTracker,
        log: Arc<CommunicationLogService>,
        campaign: CampaignRef,
        user_id: i32,
    }

    async fn fixture() -> Fixture {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let user_id = seed_user(test_db.connection(), "Asha").await;
        let announcement_id = seed_announcement(test_db.connection(), user_id).await;
        let log = Arc::new(CommunicationLogService::new(test_db.connection_arc()));
        let tracker = RecipientTracker::new(test_db.connection_arc(), log.clone());
        Fixture {
            test_db,
            tracker,
            log,
            campaign: CampaignRef::Announcement(announcement_id),
            user_id,
        }
    }

    fn recipient(user_id: i32, channels: Vec<CommsChannel>) -> NewRecipient {
        NewRecipient {
            user_id,
            email: Some("asha@school.example".to_string()),
            phone: Some("+15550001111".to_string()),
            queued_channels: channels,
        }
    }

    #[test]
    fn predecessor_sets_form_the_lifecycle_dag() {
        use DeliveryStatus::*;
        assert_eq!(allowed_predecessors(Sending), &[Queued]);
        assert_eq!(allowed_predecessors(Sent), &[Sending]);
        assert_eq!(allowed_predecessors(Delivered), &[Sent]);
        assert_eq!(allowed_predecessors(Opened), &[Delivered]);
        assert_eq!(allowed_predecessors(Clicked), &[Opened, Delivered]);
        assert_eq!(allowed_predecessors(Failed), &[Queued, Sending]);
        assert_eq!(allowed_predecessors(Bounced), &[Sent]);
        assert_eq!(allowed_predecessors(Cancelled), &[Queued]);
    }

    #[tokio::test]
    async fn materialize_sets_queued_only_for_requested_channels() {
        let f = fixture().await;
        let rows = f
            .tracker
            .materialize(
                f.campaign,
                &[recipient(f.user_id, vec![CommsChannel::Email, CommsChannel::Sms])],
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].email_status, Some(DeliveryStatus::Queued));
        assert_eq!(rows[0].sms_status, Some(DeliveryStatus::Queued));
        assert_eq!(rows[0].push_status, None);
        assert_eq!(rows[0].email.as_deref(), Some("asha@school.example"));
    }

    #[tokio::test]
    async fn transitions_follow_the_dag_and_log_each_step() {
        let f = fixture().await;
        let rows = f
            .tracker
            .materialize(f.campaign, &[recipient(f.user_id, vec![CommsChannel::Email])])
            .await
            .unwrap();
        let row = &rows[0];

        // queued -> sent is not allowed; queued -> sending -> sent is.
        assert!(!f
            .tracker
            .transition(row, CommsChannel::Email, DeliveryStatus::Sent, None, None)
            .await
            .unwrap());
        assert!(f
            .tracker
            .transition(row, CommsChannel::Email, DeliveryStatus::Sending, None, None)
            .await
            .unwrap());
        assert!(f
            .tracker
            .transition(row, CommsChannel::Email, DeliveryStatus::Sent, None, None)
            .await
            .unwrap());

        let stored = f.tracker.find(row.id).await.unwrap().unwrap();
        assert_eq!(stored.email_status, Some(DeliveryStatus::Sent));
        assert!(stored.sent_at.is_some());

        let events = f.log.events_for_campaign(f.campaign).await.unwrap();
        let statuses: Vec<DeliveryStatus> = events.iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![DeliveryStatus::Sending, DeliveryStatus::Sent]);
    }

    #[tokio::test]
    async fn replayed_and_out_of_order_callbacks_noop() {
        let f = fixture().await;
        let rows = f
            .tracker
            .materialize(f.campaign, &[recipient(f.user_id, vec![CommsChannel::Email])])
            .await
            .unwrap();
        let row = &rows[0];
        for status in [
            DeliveryStatus::Sending,
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
        ] {
            f.tracker
                .transition(row, CommsChannel::Email, status, None, None)
                .await
                .unwrap();
        }

        // opened applies, the late delivered replay no-ops, state stays opened
        let outcome = f
            .tracker
            .apply_callback(row.id, f.user_id, CommsChannel::Email, CallbackKind::Opened, None)
            .await
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::Applied);
        let outcome = f
            .tracker
            .apply_callback(
                row.id,
                f.user_id,
                CommsChannel::Email,
                CallbackKind::Delivered,
                Some("prov-123".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::NoOp);

        let stored = f.tracker.find(row.id).await.unwrap().unwrap();
        assert_eq!(stored.email_status, Some(DeliveryStatus::Opened));
        assert!(stored.opened_at.is_some());

        // clicked is reachable from opened
        let outcome = f
            .tracker
            .apply_callback(row.id, f.user_id, CommsChannel::Email, CallbackKind::Clicked, None)
            .await
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::Applied);
    }

    #[tokio::test]
    async fn callback_with_wrong_user_is_unknown() {
        let f = fixture().await;
        let rows = f
            .tracker
            .materialize(f.campaign, &[recipient(f.user_id, vec![CommsChannel::Email])])
            .await
            .unwrap();

        let outcome = f
            .tracker
            .apply_callback(
                rows[0].id,
                f.user_id + 999,
                CommsChannel::Email,
                CallbackKind::Delivered,
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::NotFound);

        let outcome = f
            .tracker
            .apply_callback(424242, f.user_id, CommsChannel::Email, CallbackKind::Delivered, None)
            .await
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::NotFound);
    }

    #[tokio::test]
    async fn cancel_queued_freezes_remaining_rows() {
        let f = fixture().await;
        let other = seed_user(f.test_db.connection(), "Ravi").await;
        let rows = f
            .tracker
            .materialize(
                f.campaign,
                &[
                    recipient(f.user_id, vec![CommsChannel::Email]),
                    recipient(other, vec![CommsChannel::Email, CommsChannel::Sms]),
                ],
            )
            .await
            .unwrap();

        // First row is already through dispatch.
        for status in [DeliveryStatus::Sending, DeliveryStatus::Sent] {
            f.tracker
                .transition(&rows[0], CommsChannel::Email, status, None, None)
                .await
                .unwrap();
        }

        let cancelled = f.tracker.cancel_queued(f.campaign).await.unwrap();
        assert_eq!(cancelled, 1);

        let first = f.tracker.find(rows[0].id).await.unwrap().unwrap();
        assert_eq!(first.email_status, Some(DeliveryStatus::Sent));
        let second = f.tracker.find(rows[1].id).await.unwrap().unwrap();
        assert_eq!(second.email_status, Some(DeliveryStatus::Cancelled));
        assert_eq!(second.sms_status, Some(DeliveryStatus::Cancelled));
        assert_eq!(second.error_message.as_deref(), Some("campaign_cancelled"));

        // Cancelled rows never start sending.
        assert!(!f
            .tracker
            .transition(&second, CommsChannel::Email, DeliveryStatus::Sending, None, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn rollup_counts_per_channel_stages() {
        let f = fixture().await;
        let other = seed_user(f.test_db.connection(), "Ravi").await;
        let rows = f
            .tracker
            .materialize(
                f.campaign,
                &[
                    recipient(f.user_id, vec![CommsChannel::Email, CommsChannel::Sms]),
                    recipient(other, vec![CommsChannel::Email]),
                ],
            )
            .await
            .unwrap();

        for status in [
            DeliveryStatus::Sending,
            DeliveryStatus::Sent,
            DeliveryStatus::Delivered,
        ] {
            f.tracker
                .transition(&rows[0], CommsChannel::Email, status, None, None)
                .await
                .unwrap();
        }
        f.tracker
            .transition(&rows[1], CommsChannel::Email, DeliveryStatus::Sending, None, None)
            .await
            .unwrap();
        f.tracker
            .transition(
                &rows[1],
                CommsChannel::Email,
                DeliveryStatus::Failed,
                Some("mailbox full".to_string()),
                None,
            )
            .await
            .unwrap();

        let rollup = f.tracker.channel_rollup(f.campaign).await.unwrap();
        let email = &rollup[&CommsChannel::Email];
        assert_eq!(email.delivered, 1);
        assert_eq!(email.failed, 1);
        assert_eq!(email.reached_sent(), 1);
        let sms = &rollup[&CommsChannel::Sms];
        assert_eq!(sms.queued, 1);

        let flags = f.tracker.progress_flags(f.campaign).await.unwrap();
        let first = flags.iter().find(|p| p.user_id == f.user_id).unwrap();
        assert!(first.sent && first.delivered && !first.read);
        let second = flags.iter().find(|p| p.user_id == other).unwrap();
        assert!(!second.sent);
    }
}
