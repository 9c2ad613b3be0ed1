use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use crier_database::DbConnection;
use crier_entities::{
    communication_logs, communication_logs::event_types, daily_analytics, notifications, users,
    CommsChannel, DeliveryStatus,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("{0}")]
    Invalid(String),
}

impl AnalyticsError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AnalyticsError::Invalid(message.into())
    }
}

/// Flat per-submission cost estimate; the provider invoice is authoritative.
fn unit_cost(channel: CommsChannel) -> f64 {
    match channel {
        CommsChannel::Email => 0.0004,
        CommsChannel::Sms => 0.03,
        CommsChannel::Push | CommsChannel::InApp => 0.0,
    }
}

fn rate(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Aggregated totals over a date range, summed across channels.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SummaryTotals {
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_failed: i64,
    pub total_bounced: i64,
    pub total_opened: i64,
    pub total_clicked: i64,
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub click_through_rate: f64,
    pub estimated_cost: f64,
}

/// Per-channel totals over a date range.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChannelPerformance {
    pub channel: CommsChannel,
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_failed: i64,
    pub total_bounced: i64,
    pub total_opened: i64,
    pub total_clicked: i64,
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub click_through_rate: f64,
    pub estimated_cost: f64,
}

/// One user's notification volume and read share inside a date range.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EngagementEntry {
    pub user_id: i32,
    pub name: String,
    pub notifications_received: i64,
    pub notifications_read: i64,
    pub read_rate: f64,
}

/// Computes and serves the daily per-channel rollups.
///
/// The rollup is a pure function of the communication log: recomputing a day
/// replaces all four channel rows for that date, so the job can run any number
/// of times without double counting. Events are bucketed by UTC day.
pub struct AnalyticsService {
    db: Arc<DbConnection>,
}

impl AnalyticsService {
    pub fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    /// Recompute the rollup rows for one UTC day from the communication log.
    /// Upserts one row per channel; counts cover delivery and short-circuit
    /// notification events whose timestamp falls in [00:00, 24:00) of `date`.
    pub async fn recompute_day(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<daily_analytics::Model>, AnalyticsError> {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);

        let mut rows = Vec::with_capacity(4);
        for channel in CommsChannel::all() {
            let count_status = |status: DeliveryStatus| {
                communication_logs::Entity::find()
                    .filter(
                        communication_logs::Column::EventType
                            .is_in([event_types::DELIVERY, event_types::NOTIFICATION]),
                    )
                    .filter(communication_logs::Column::Channel.eq(channel))
                    .filter(communication_logs::Column::Status.eq(status))
                    .filter(communication_logs::Column::CreatedAt.gte(start))
                    .filter(communication_logs::Column::CreatedAt.lt(end))
                    .count(self.db.as_ref())
            };

            let sent = count_status(DeliveryStatus::Sent).await? as i64;
            let delivered = count_status(DeliveryStatus::Delivered).await? as i64;
            let failed = count_status(DeliveryStatus::Failed).await? as i64;
            let bounced = count_status(DeliveryStatus::Bounced).await? as i64;
            let opened = count_status(DeliveryStatus::Opened).await? as i64;
            let clicked = count_status(DeliveryStatus::Clicked).await? as i64;

            let counters = daily_analytics::ActiveModel {
                date: Set(date),
                channel: Set(channel),
                total_sent: Set(sent as i32),
                total_delivered: Set(delivered as i32),
                total_failed: Set(failed as i32),
                total_bounced: Set(bounced as i32),
                total_opened: Set(opened as i32),
                total_clicked: Set(clicked as i32),
                delivery_rate: Set(rate(delivered, sent)),
                open_rate: Set(rate(opened, sent)),
                click_rate: Set(rate(clicked, sent)),
                click_through_rate: Set(rate(clicked, opened)),
                estimated_cost: Set(sent as f64 * unit_cost(channel)),
                ..Default::default()
            };

            let existing = daily_analytics::Entity::find()
                .filter(daily_analytics::Column::Date.eq(date))
                .filter(daily_analytics::Column::Channel.eq(channel))
                .one(self.db.as_ref())
                .await?;

            let saved = match existing {
                Some(current) => {
                    let mut update = counters;
                    update.id = Set(current.id);
                    update.created_at = Set(current.created_at);
                    update.update(self.db.as_ref()).await?
                }
                None => counters.insert(self.db.as_ref()).await?,
            };
            rows.push(saved);
        }
        Ok(rows)
    }

    async fn rollups_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<daily_analytics::Model>, AnalyticsError> {
        Ok(daily_analytics::Entity::find()
            .filter(daily_analytics::Column::Date.gte(from))
            .filter(daily_analytics::Column::Date.lte(to))
            .all(self.db.as_ref())
            .await?)
    }

    /// Totals across all channels for `from..=to`, with rates derived from the
    /// summed counters (not averaged over days).
    pub async fn summary(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<SummaryTotals, AnalyticsError> {
        let rollups = self.rollups_between(from, to).await?;

        let mut sent = 0i64;
        let mut delivered = 0i64;
        let mut failed = 0i64;
        let mut bounced = 0i64;
        let mut opened = 0i64;
        let mut clicked = 0i64;
        let mut cost = 0.0f64;
        for row in &rollups {
            sent += row.total_sent as i64;
            delivered += row.total_delivered as i64;
            failed += row.total_failed as i64;
            bounced += row.total_bounced as i64;
            opened += row.total_opened as i64;
            clicked += row.total_clicked as i64;
            cost += row.estimated_cost;
        }

        Ok(SummaryTotals {
            total_sent: sent,
            total_delivered: delivered,
            total_failed: failed,
            total_bounced: bounced,
            total_opened: opened,
            total_clicked: clicked,
            delivery_rate: rate(delivered, sent),
            open_rate: rate(opened, sent),
            click_rate: rate(clicked, sent),
            click_through_rate: rate(clicked, opened),
            estimated_cost: cost,
        })
    }

    /// Per-channel totals for `from..=to`, one entry per channel in canonical
    /// order, zero-filled for channels with no rollup rows.
    pub async fn channel_performance(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ChannelPerformance>, AnalyticsError> {
        let rollups = self.rollups_between(from, to).await?;

        let mut entries = Vec::with_capacity(4);
        for channel in CommsChannel::all() {
            let mut sent = 0i64;
            let mut delivered = 0i64;
            let mut failed = 0i64;
            let mut bounced = 0i64;
            let mut opened = 0i64;
            let mut clicked = 0i64;
            let mut cost = 0.0f64;
            for row in rollups.iter().filter(|r| r.channel == channel) {
                sent += row.total_sent as i64;
                delivered += row.total_delivered as i64;
                failed += row.total_failed as i64;
                bounced += row.total_bounced as i64;
                opened += row.total_opened as i64;
                clicked += row.total_clicked as i64;
                cost += row.estimated_cost;
            }
            entries.push(ChannelPerformance {
                channel,
                total_sent: sent,
                total_delivered: delivered,
                total_failed: failed,
                total_bounced: bounced,
                total_opened: opened,
                total_clicked: clicked,
                delivery_rate: rate(delivered, sent),
                open_rate: rate(opened, sent),
                click_rate: rate(clicked, sent),
                click_through_rate: rate(clicked, opened),
                estimated_cost: cost,
            });
        }
        Ok(entries)
    }

    /// The `limit` users who received the most notifications in the range,
    /// with how many of those they read. Ties break on lower user id.
    pub async fn user_engagement(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        limit: u64,
    ) -> Result<Vec<EngagementEntry>, AnalyticsError> {
        let start = from.and_time(NaiveTime::MIN).and_utc();
        let end = to.and_time(NaiveTime::MIN).and_utc() + Duration::days(1);

        let received: Vec<(i32, i64)> = notifications::Entity::find()
            .select_only()
            .column(notifications::Column::UserId)
            .column_as(notifications::Column::Id.count(), "received")
            .filter(notifications::Column::CreatedAt.gte(start))
            .filter(notifications::Column::CreatedAt.lt(end))
            .group_by(notifications::Column::UserId)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;
        let read: Vec<(i32, i64)> = notifications::Entity::find()
            .select_only()
            .column(notifications::Column::UserId)
            .column_as(notifications::Column::Id.count(), "read")
            .filter(notifications::Column::CreatedAt.gte(start))
            .filter(notifications::Column::CreatedAt.lt(end))
            .filter(notifications::Column::IsRead.eq(true))
            .group_by(notifications::Column::UserId)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;
        let read_by_user: HashMap<i32, i64> = read.into_iter().collect();

        let mut ranked: Vec<(i32, i64, i64)> = received
            .into_iter()
            .map(|(user_id, total)| {
                let read = read_by_user.get(&user_id).copied().unwrap_or(0);
                (user_id, total, read)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(limit as usize);

        let user_ids: Vec<i32> = ranked.iter().map(|(id, _, _)| *id).collect();
        let names: HashMap<i32, String> = users::Entity::find()
            .filter(users::Column::Id.is_in(user_ids))
            .all(self.db.as_ref())
            .await?
            .into_iter()
            .map(|user| (user.id, user.full_name()))
            .collect();

        Ok(ranked
            .into_iter()
            .map(|(user_id, total, read)| EngagementEntry {
                user_id,
                name: names.get(&user_id).cloned().unwrap_or_default(),
                notifications_received: total,
                notifications_read: read,
                read_rate: rate(read, total),
            })
            .collect())
    }
}
