//! Persisted enums and typed JSON columns shared by the Crier entities.
//!
//! NOTE: enums use db_type = "Text" for SQLite compatibility. Status strings
//! are lower_snake everywhere: in the database, in the API, and in logs.

use sea_orm::{DeriveActiveEnum, EnumIter, FromJsonQueryResult};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use utoipa::ToSchema;

/// Delivery channel for outbound messages.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum CommsChannel {
    #[sea_orm(string_value = "email")]
    Email,
    #[sea_orm(string_value = "sms")]
    Sms,
    #[sea_orm(string_value = "push")]
    Push,
    #[sea_orm(string_value = "in_app")]
    InApp,
}

impl Display for CommsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl CommsChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommsChannel::Email => "email",
            CommsChannel::Sms => "sms",
            CommsChannel::Push => "push",
            CommsChannel::InApp => "in_app",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "email" => Some(CommsChannel::Email),
            "sms" => Some(CommsChannel::Sms),
            "push" => Some(CommsChannel::Push),
            "in_app" => Some(CommsChannel::InApp),
            _ => None,
        }
    }

    pub fn all() -> Vec<CommsChannel> {
        vec![
            CommsChannel::Email,
            CommsChannel::Sms,
            CommsChannel::Push,
            CommsChannel::InApp,
        ]
    }
}

/// Campaign priority. `Urgent` and `High` engage the critical override that
/// bypasses quiet hours and weekend opt-outs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[sea_orm(string_value = "low")]
    Low,
    #[sea_orm(string_value = "medium")]
    Medium,
    #[sea_orm(string_value = "high")]
    High,
    #[sea_orm(string_value = "urgent")]
    Urgent,
}

impl Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }

    /// Urgent and high priority bypass quiet hours and weekend opt-outs.
    pub fn is_critical(&self) -> bool {
        matches!(self, Priority::Urgent | Priority::High)
    }
}

/// Per-(campaign, recipient, channel) delivery lifecycle position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[sea_orm(string_value = "queued")]
    Queued,
    #[sea_orm(string_value = "sending")]
    Sending,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "opened")]
    Opened,
    #[sea_orm(string_value = "clicked")]
    Clicked,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "bounced")]
    Bounced,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Sending => "sending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Opened => "opened",
            DeliveryStatus::Clicked => "clicked",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Bounced => "bounced",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(DeliveryStatus::Queued),
            "sending" => Some(DeliveryStatus::Sending),
            "sent" => Some(DeliveryStatus::Sent),
            "delivered" => Some(DeliveryStatus::Delivered),
            "opened" => Some(DeliveryStatus::Opened),
            "clicked" => Some(DeliveryStatus::Clicked),
            "failed" => Some(DeliveryStatus::Failed),
            "bounced" => Some(DeliveryStatus::Bounced),
            "cancelled" => Some(DeliveryStatus::Cancelled),
            _ => None,
        }
    }
}

/// Declarative "who to send to".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    #[sea_orm(string_value = "all")]
    All,
    #[sea_orm(string_value = "students")]
    Students,
    #[sea_orm(string_value = "teachers")]
    Teachers,
    #[sea_orm(string_value = "parents")]
    Parents,
    #[sea_orm(string_value = "staff")]
    Staff,
    #[sea_orm(string_value = "custom")]
    Custom,
}

impl Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Audience::All => "all",
            Audience::Students => "students",
            Audience::Teachers => "teachers",
            Audience::Parents => "parents",
            Audience::Staff => "staff",
            Audience::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// Message category gated by per-user opt-ins.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    #[sea_orm(string_value = "academic")]
    Academic,
    #[sea_orm(string_value = "financial")]
    Financial,
    #[sea_orm(string_value = "attendance")]
    Attendance,
    #[sea_orm(string_value = "general")]
    General,
    #[sea_orm(string_value = "marketing")]
    Marketing,
}

impl Display for MessageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageCategory::Academic => "academic",
            MessageCategory::Financial => "financial",
            MessageCategory::Attendance => "attendance",
            MessageCategory::General => "general",
            MessageCategory::Marketing => "marketing",
        };
        write!(f, "{}", s)
    }
}

/// Bulk message campaign status. Transitions are strictly forward except
/// draft -> cancelled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum BulkMessageStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "sending")]
    Sending,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl Display for BulkMessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BulkMessageStatus::Draft => "draft",
            BulkMessageStatus::Sending => "sending",
            BulkMessageStatus::Sent => "sent",
            BulkMessageStatus::Failed => "failed",
            BulkMessageStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// How often a user receives an unread-notification digest email.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DigestFrequency {
    #[sea_orm(string_value = "none")]
    None,
    #[sea_orm(string_value = "daily")]
    Daily,
    #[sea_orm(string_value = "weekly")]
    Weekly,
}

impl Display for DigestFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DigestFrequency::None => "none",
            DigestFrequency::Daily => "daily",
            DigestFrequency::Weekly => "weekly",
        };
        write!(f, "{}", s)
    }
}

/// Directory role assignment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[sea_orm(string_value = "admin")]
    Admin,
    #[sea_orm(string_value = "staff")]
    Staff,
    #[sea_orm(string_value = "teacher")]
    Teacher,
    #[sea_orm(string_value = "parent")]
    Parent,
    #[sea_orm(string_value = "student")]
    Student,
}

impl Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UserRole::Admin => "admin",
            UserRole::Staff => "staff",
            UserRole::Teacher => "teacher",
            UserRole::Parent => "parent",
            UserRole::Student => "student",
        };
        write!(f, "{}", s)
    }
}

/// Push token platform.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, DeriveActiveEnum, EnumIter, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DevicePlatform {
    #[sea_orm(string_value = "ios")]
    Ios,
    #[sea_orm(string_value = "android")]
    Android,
    #[sea_orm(string_value = "web")]
    Web,
}

impl Display for DevicePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DevicePlatform::Ios => "ios",
            DevicePlatform::Android => "android",
            DevicePlatform::Web => "web",
        };
        write!(f, "{}", s)
    }
}

/// Channel set stored as a JSON column on campaigns and templates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, FromJsonQueryResult)]
pub struct ChannelList(pub Vec<CommsChannel>);

impl ChannelList {
    pub fn contains(&self, channel: CommsChannel) -> bool {
        self.0.contains(&channel)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommsChannel> {
        self.0.iter()
    }
}

impl From<Vec<CommsChannel>> for ChannelList {
    fn from(channels: Vec<CommsChannel>) -> Self {
        ChannelList(channels)
    }
}

/// Audience filters stored as a JSON column on campaigns.
///
/// Filters AND-compose: grade/section/class narrow through student profiles
/// (for parents, through guardian links), department through staff profiles.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, FromJsonQueryResult)]
pub struct TargetFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grades: Option<Vec<i32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub departments: Option<Vec<String>>,
}

impl TargetFilters {
    pub fn is_empty(&self) -> bool {
        fn blank<T>(v: &Option<Vec<T>>) -> bool {
            v.as_ref().map(|v| v.is_empty()).unwrap_or(true)
        }
        blank(&self.sections) && blank(&self.grades) && blank(&self.classes) && blank(&self.departments)
    }
}

/// Explicit recipient id list stored as a JSON column for custom targeting.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, FromJsonQueryResult)]
pub struct IdList(pub Vec<i32>);

impl IdList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Declared template variable names stored as a JSON column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema, FromJsonQueryResult)]
pub struct StringList(pub Vec<String>);

impl StringList {
    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_roundtrip() {
        for s in [
            "queued",
            "sending",
            "sent",
            "delivered",
            "opened",
            "clicked",
            "failed",
            "bounced",
            "cancelled",
        ] {
            let parsed = DeliveryStatus::from_str(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert_eq!(DeliveryStatus::from_str("unknown"), None);
    }

    #[test]
    fn priority_critical_override() {
        assert!(Priority::Urgent.is_critical());
        assert!(Priority::High.is_critical());
        assert!(!Priority::Medium.is_critical());
        assert!(!Priority::Low.is_critical());
    }

    #[test]
    fn channel_serde_matches_db_strings() {
        assert_eq!(
            serde_json::to_string(&CommsChannel::InApp).unwrap(),
            "\"in_app\""
        );
        let back: CommsChannel = serde_json::from_str("\"in_app\"").unwrap();
        assert_eq!(back, CommsChannel::InApp);
    }

    #[test]
    fn target_filters_empty_detection() {
        assert!(TargetFilters::default().is_empty());
        assert!(TargetFilters {
            grades: Some(vec![]),
            ..Default::default()
        }
        .is_empty());
        assert!(!TargetFilters {
            grades: Some(vec![5]),
            ..Default::default()
        }
        .is_empty());
    }
}
