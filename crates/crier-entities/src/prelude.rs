pub use super::announcements::Entity as Announcements;
pub use super::bulk_messages::Entity as BulkMessages;
pub use super::communication_logs::Entity as CommunicationLogs;
pub use super::daily_analytics::Entity as DailyAnalytics;
pub use super::device_tokens::Entity as DeviceTokens;
pub use super::direct_messages::Entity as DirectMessages;
pub use super::guardian_links::Entity as GuardianLinks;
pub use super::message_reads::Entity as MessageReads;
pub use super::message_recipients::Entity as MessageRecipients;
pub use super::message_threads::Entity as MessageThreads;
pub use super::notification_counters::Entity as NotificationCounters;
pub use super::notifications::Entity as Notifications;
pub use super::preferences::Entity as Preferences;
pub use super::staff_profiles::Entity as StaffProfiles;
pub use super::student_profiles::Entity as StudentProfiles;
pub use super::templates::Entity as Templates;
pub use super::thread_participants::Entity as ThreadParticipants;
pub use super::user_roles::Entity as UserRoles;
pub use super::users::Entity as Users;
