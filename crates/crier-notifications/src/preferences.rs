use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveTime, Weekday};
use crier_config::DispatchSettings;
use crier_core::UtcDateTime;
use crier_database::DbConnection;
use crier_entities::{preferences, CommsChannel, DigestFrequency, MessageCategory, Priority};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::Deserialize;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Error, Debug)]
pub enum PreferenceError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

/// Why a channel was suppressed for a recipient. The string form is recorded
/// on recipient rows and log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    ChannelOff,
    CategoryOff,
    QuietHours,
    Weekend,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::ChannelOff => "channel_off",
            DenyReason::CategoryOff => "category_off",
            DenyReason::QuietHours => "quiet_hours",
            DenyReason::Weekend => "weekend",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDecision {
    Allow,
    Deny(DenyReason),
}

impl DeliveryDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, DeliveryDecision::Allow)
    }
}

/// Decide whether one channel may carry one message to one user right now.
///
/// Rules apply in order: disabled channel, then category opt-out, then the
/// timing suppressions. Urgent and high priority skip quiet hours and the
/// weekend rule (critical override) but never a disabled channel or an
/// opted-out category.
pub fn matches(
    preference: &preferences::Model,
    channel: CommsChannel,
    category: MessageCategory,
    priority: Priority,
    now: UtcDateTime,
) -> DeliveryDecision {
    let channel_enabled = match channel {
        CommsChannel::Email => preference.email_enabled,
        CommsChannel::Sms => preference.sms_enabled,
        CommsChannel::Push => preference.push_enabled,
        CommsChannel::InApp => preference.in_app_enabled,
    };
    if !channel_enabled {
        return DeliveryDecision::Deny(DenyReason::ChannelOff);
    }

    let category_enabled = match category {
        MessageCategory::Academic => preference.academic_alerts,
        MessageCategory::Financial => preference.financial_alerts,
        MessageCategory::Attendance => preference.attendance_alerts,
        MessageCategory::General => preference.general_announcements,
        MessageCategory::Marketing => preference.marketing_messages,
    };
    if !category_enabled {
        return DeliveryDecision::Deny(DenyReason::CategoryOff);
    }

    if !priority.is_critical() {
        if in_quiet_hours(
            now.time(),
            preference.quiet_hours_start,
            preference.quiet_hours_end,
        ) {
            return DeliveryDecision::Deny(DenyReason::QuietHours);
        }
        if !preference.weekend_notifications
            && matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
        {
            return DeliveryDecision::Deny(DenyReason::Weekend);
        }
    }

    DeliveryDecision::Allow
}

/// Cyclic window test: a window crossing midnight (22:00 to 06:00) covers the
/// late evening and the early morning. Equal bounds mean no quiet window.
fn in_quiet_hours(time: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start == end {
        return false;
    }
    if start < end {
        time >= start && time < end
    } else {
        time >= start || time < end
    }
}

/// Partial update applied to a user's stored preferences. Absent fields keep
/// their current value.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdatePreferencesRequest {
    pub email_enabled: Option<bool>,
    pub sms_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub in_app_enabled: Option<bool>,
    pub whatsapp_enabled: Option<bool>,
    pub academic_alerts: Option<bool>,
    pub financial_alerts: Option<bool>,
    pub attendance_alerts: Option<bool>,
    pub general_announcements: Option<bool>,
    pub marketing_messages: Option<bool>,
    #[schema(value_type = Option<String>, example = "22:00:00")]
    pub quiet_hours_start: Option<NaiveTime>,
    #[schema(value_type = Option<String>, example = "06:00:00")]
    pub quiet_hours_end: Option<NaiveTime>,
    pub weekend_notifications: Option<bool>,
    pub digest_frequency: Option<DigestFrequency>,
    pub preferred_language: Option<String>,
}

/// Per-user preference rows, created lazily with permissive defaults the
/// first time a user's preferences are read or written.
pub struct PreferenceService {
    db: Arc<DbConnection>,
    default_quiet_start: NaiveTime,
    default_quiet_end: NaiveTime,
}

impl PreferenceService {
    pub fn new(db: Arc<DbConnection>, settings: &DispatchSettings) -> Self {
        Self {
            db,
            default_quiet_start: settings.quiet_hours_start,
            default_quiet_end: settings.quiet_hours_end,
        }
    }

    /// The preference set a user without a stored row is treated as having.
    /// All channels and non-marketing categories on, weekends on, digest off.
    pub fn defaults_for(&self, user_id: i32) -> preferences::Model {
        let now = chrono::Utc::now();
        preferences::Model {
            id: 0,
            user_id,
            email_enabled: true,
            sms_enabled: true,
            push_enabled: true,
            in_app_enabled: true,
            whatsapp_enabled: false,
            academic_alerts: true,
            financial_alerts: true,
            attendance_alerts: true,
            general_announcements: true,
            marketing_messages: false,
            quiet_hours_start: self.default_quiet_start,
            quiet_hours_end: self.default_quiet_end,
            weekend_notifications: true,
            digest_frequency: DigestFrequency::None,
            preferred_language: "en".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fetch a user's preferences, persisting the defaults on first access.
    pub async fn get_or_create(&self, user_id: i32) -> Result<preferences::Model, PreferenceError> {
        if let Some(existing) = self.find(user_id).await? {
            return Ok(existing);
        }

        let defaults = self.defaults_for(user_id);
        let inserted = preferences::ActiveModel {
            user_id: Set(user_id),
            email_enabled: Set(defaults.email_enabled),
            sms_enabled: Set(defaults.sms_enabled),
            push_enabled: Set(defaults.push_enabled),
            in_app_enabled: Set(defaults.in_app_enabled),
            whatsapp_enabled: Set(defaults.whatsapp_enabled),
            academic_alerts: Set(defaults.academic_alerts),
            financial_alerts: Set(defaults.financial_alerts),
            attendance_alerts: Set(defaults.attendance_alerts),
            general_announcements: Set(defaults.general_announcements),
            marketing_messages: Set(defaults.marketing_messages),
            quiet_hours_start: Set(defaults.quiet_hours_start),
            quiet_hours_end: Set(defaults.quiet_hours_end),
            weekend_notifications: Set(defaults.weekend_notifications),
            digest_frequency: Set(defaults.digest_frequency),
            preferred_language: Set(defaults.preferred_language.clone()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await;

        match inserted {
            Ok(model) => Ok(model),
            // Lost a creation race on the unique user_id: the winner's row
            // is the authoritative one.
            Err(e) => match self.find(user_id).await? {
                Some(existing) => Ok(existing),
                None => Err(e.into()),
            },
        }
    }

    pub async fn update(
        &self,
        user_id: i32,
        request: UpdatePreferencesRequest,
    ) -> Result<preferences::Model, PreferenceError> {
        let current = self.get_or_create(user_id).await?;
        let mut active: preferences::ActiveModel = current.into();

        if let Some(v) = request.email_enabled {
            active.email_enabled = Set(v);
        }
        if let Some(v) = request.sms_enabled {
            active.sms_enabled = Set(v);
        }
        if let Some(v) = request.push_enabled {
            active.push_enabled = Set(v);
        }
        if let Some(v) = request.in_app_enabled {
            active.in_app_enabled = Set(v);
        }
        if let Some(v) = request.whatsapp_enabled {
            active.whatsapp_enabled = Set(v);
        }
        if let Some(v) = request.academic_alerts {
            active.academic_alerts = Set(v);
        }
        if let Some(v) = request.financial_alerts {
            active.financial_alerts = Set(v);
        }
        if let Some(v) = request.attendance_alerts {
            active.attendance_alerts = Set(v);
        }
        if let Some(v) = request.general_announcements {
            active.general_announcements = Set(v);
        }
        if let Some(v) = request.marketing_messages {
            active.marketing_messages = Set(v);
        }
        if let Some(v) = request.quiet_hours_start {
            active.quiet_hours_start = Set(v);
        }
        if let Some(v) = request.quiet_hours_end {
            active.quiet_hours_end = Set(v);
        }
        if let Some(v) = request.weekend_notifications {
            active.weekend_notifications = Set(v);
        }
        if let Some(v) = request.digest_frequency {
            active.digest_frequency = Set(v);
        }
        if let Some(v) = request.preferred_language {
            active.preferred_language = Set(v);
        }

        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Stored rows for a set of users, keyed by user id. Users without a row
    /// are absent; callers substitute `defaults_for` instead of writing rows
    /// for every recipient of a campaign.
    pub async fn load_for_users(
        &self,
        user_ids: &[i32],
    ) -> Result<HashMap<i32, preferences::Model>, PreferenceError> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = preferences::Entity::find()
            .filter(preferences::Column::UserId.is_in(user_ids.iter().copied()))
            .all(self.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(|row| (row.user_id, row)).collect())
    }

    /// User ids whose stored digest cadence equals `frequency`.
    pub async fn users_with_digest(
        &self,
        frequency: DigestFrequency,
    ) -> Result<Vec<i32>, PreferenceError> {
        let rows = preferences::Entity::find()
            .filter(preferences::Column::DigestFrequency.eq(frequency))
            .all(self.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(|row| row.user_id).collect())
    }

    async fn find(&self, user_id: i32) -> Result<Option<preferences::Model>, PreferenceError> {
        Ok(preferences::Entity::find()
            .filter(preferences::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crier_database::test_utils::TestDatabase;
    use crier_entities::users;
    use sea_orm::ActiveModelTrait;

    fn pref(quiet_start: &str, quiet_end: &str) -> preferences::Model {
        let now = chrono::Utc::now();
        preferences::Model {
            id: 1,
            user_id: 1,
            email_enabled: true,
            sms_enabled: true,
            push_enabled: true,
            in_app_enabled: true,
            whatsapp_enabled: false,
            academic_alerts: true,
            financial_alerts: true,
            attendance_alerts: true,
            general_announcements: true,
            marketing_messages: false,
            quiet_hours_start: quiet_start.parse().unwrap(),
            quiet_hours_end: quiet_end.parse().unwrap(),
            weekend_notifications: true,
            digest_frequency: DigestFrequency::None,
            preferred_language: "en".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    // 2025-09-03 is a Wednesday.
    fn weekday_at(hour: u32, minute: u32) -> UtcDateTime {
        chrono::Utc
            .with_ymd_and_hms(2025, 9, 3, hour, minute, 0)
            .unwrap()
    }

    // 2025-09-06 is a Saturday.
    fn saturday_at(hour: u32) -> UtcDateTime {
        chrono::Utc.with_ymd_and_hms(2025, 9, 6, hour, 0, 0).unwrap()
    }

    #[test]
    fn disabled_channel_denies_before_anything_else() {
        let mut p = pref("22:00:00", "06:00:00");
        p.sms_enabled = false;
        let decision = matches(
            &p,
            CommsChannel::Sms,
            MessageCategory::General,
            Priority::Urgent,
            weekday_at(12, 0),
        );
        assert_eq!(decision, DeliveryDecision::Deny(DenyReason::ChannelOff));
    }

    #[test]
    fn category_opt_out_denies_even_urgent() {
        let mut p = pref("22:00:00", "06:00:00");
        p.marketing_messages = false;
        let decision = matches(
            &p,
            CommsChannel::Email,
            MessageCategory::Marketing,
            Priority::Urgent,
            weekday_at(12, 0),
        );
        assert_eq!(decision, DeliveryDecision::Deny(DenyReason::CategoryOff));
    }

    #[test]
    fn quiet_hours_suppress_medium_but_not_urgent() {
        let p = pref("22:00:00", "06:00:00");

        // 23:30, inside the cyclic window.
        let denied = matches(
            &p,
            CommsChannel::Email,
            MessageCategory::General,
            Priority::Medium,
            weekday_at(23, 30),
        );
        assert_eq!(denied, DeliveryDecision::Deny(DenyReason::QuietHours));

        // 05:59 is still inside; 06:00 is out.
        assert!(!matches(
            &p,
            CommsChannel::Email,
            MessageCategory::General,
            Priority::Low,
            weekday_at(5, 59),
        )
        .is_allowed());
        assert!(matches(
            &p,
            CommsChannel::Email,
            MessageCategory::General,
            Priority::Low,
            weekday_at(6, 0),
        )
        .is_allowed());

        // Critical override.
        for priority in [Priority::High, Priority::Urgent] {
            assert!(matches(
                &p,
                CommsChannel::Email,
                MessageCategory::General,
                priority,
                weekday_at(23, 30),
            )
            .is_allowed());
        }
    }

    #[test]
    fn non_wrapping_window_and_empty_window() {
        let p = pref("12:00:00", "14:00:00");
        assert!(!matches(
            &p,
            CommsChannel::Email,
            MessageCategory::General,
            Priority::Medium,
            weekday_at(13, 0),
        )
        .is_allowed());
        assert!(matches(
            &p,
            CommsChannel::Email,
            MessageCategory::General,
            Priority::Medium,
            weekday_at(15, 0),
        )
        .is_allowed());

        // Equal bounds: quiet hours effectively off.
        let p = pref("08:00:00", "08:00:00");
        assert!(matches(
            &p,
            CommsChannel::Email,
            MessageCategory::General,
            Priority::Medium,
            weekday_at(8, 0),
        )
        .is_allowed());
    }

    #[test]
    fn weekend_opt_out_applies_to_normal_priorities_only() {
        let mut p = pref("22:00:00", "06:00:00");
        p.weekend_notifications = false;

        let denied = matches(
            &p,
            CommsChannel::Push,
            MessageCategory::General,
            Priority::Medium,
            saturday_at(10),
        );
        assert_eq!(denied, DeliveryDecision::Deny(DenyReason::Weekend));

        assert!(matches(
            &p,
            CommsChannel::Push,
            MessageCategory::General,
            Priority::High,
            saturday_at(10),
        )
        .is_allowed());
    }

    #[test]
    fn quiet_user_channel_sets_by_priority() {
        // U1: email on, sms off, quiet 22:00-06:00. At 23:30 no fan-out
        // channel passes for a medium message (the in-app row on the direct
        // path is written before this filter runs); an urgent one may use
        // email and push, never SMS.
        let mut u1 = pref("22:00:00", "06:00:00");
        u1.sms_enabled = false;
        let late = weekday_at(23, 30);

        let medium: Vec<CommsChannel> = [
            CommsChannel::Email,
            CommsChannel::Sms,
            CommsChannel::Push,
            CommsChannel::InApp,
        ]
        .into_iter()
        .filter(|c| {
            matches(&u1, *c, MessageCategory::General, Priority::Medium, late).is_allowed()
        })
        .collect();
        assert!(medium.is_empty());

        let urgent: Vec<CommsChannel> = [
            CommsChannel::Email,
            CommsChannel::Sms,
            CommsChannel::Push,
            CommsChannel::InApp,
        ]
        .into_iter()
        .filter(|c| {
            matches(&u1, *c, MessageCategory::General, Priority::Urgent, late).is_allowed()
        })
        .collect();
        assert_eq!(
            urgent,
            vec![CommsChannel::Email, CommsChannel::Push, CommsChannel::InApp]
        );
    }

    async fn seed_user(db: &sea_orm::DatabaseConnection) -> i32 {
        users::ActiveModel {
            first_name: Set("Mira".to_string()),
            last_name: Set("Patel".to_string()),
            email: Set(Some("mira@school.example".to_string())),
            phone: Set(None),
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

    fn service(test_db: &TestDatabase) -> PreferenceService {
        let settings = DispatchSettings::from_lookup(|_| None).unwrap();
        PreferenceService::new(test_db.connection_arc(), &settings)
    }

    #[tokio::test]
    async fn first_access_persists_defaults() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let user_id = seed_user(test_db.connection()).await;
        let service = service(&test_db);

        let created = service.get_or_create(user_id).await.unwrap();
        assert!(created.id > 0);
        assert!(created.email_enabled);
        assert!(created.in_app_enabled);
        assert!(!created.marketing_messages);
        assert!(created.weekend_notifications);
        assert_eq!(created.digest_frequency, DigestFrequency::None);
        assert_eq!(created.quiet_hours_start, "22:00:00".parse().unwrap());
        assert_eq!(created.quiet_hours_end, "06:00:00".parse().unwrap());

        // Second read returns the same row, not a new one.
        let again = service.get_or_create(user_id).await.unwrap();
        assert_eq!(again.id, created.id);
    }

    #[tokio::test]
    async fn update_touches_only_named_fields() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let user_id = seed_user(test_db.connection()).await;
        let service = service(&test_db);

        let updated = service
            .update(
                user_id,
                UpdatePreferencesRequest {
                    sms_enabled: Some(false),
                    digest_frequency: Some(DigestFrequency::Daily),
                    quiet_hours_start: Some("21:00:00".parse().unwrap()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(!updated.sms_enabled);
        assert!(updated.email_enabled);
        assert_eq!(updated.digest_frequency, DigestFrequency::Daily);
        assert_eq!(updated.quiet_hours_start, "21:00:00".parse().unwrap());
        assert_eq!(updated.quiet_hours_end, "06:00:00".parse().unwrap());

        let digest_users = service
            .users_with_digest(DigestFrequency::Daily)
            .await
            .unwrap();
        assert_eq!(digest_users, vec![user_id]);
    }

    #[tokio::test]
    async fn load_for_users_returns_only_stored_rows() {
        let test_db = TestDatabase::with_migrations().await.unwrap();
        let user_id = seed_user(test_db.connection()).await;
        let service = service(&test_db);
        service.get_or_create(user_id).await.unwrap();

        let map = service.load_for_users(&[user_id, 999]).await.unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&user_id));

        let fallback = service.defaults_for(999);
        assert_eq!(fallback.user_id, 999);
        assert!(fallback.email_enabled);
    }
}
