mod announcements;
mod bulk;
mod dispatcher;
mod log;
mod recipients;
mod scheduler;
mod types;

pub use announcements::{
    AnnouncementService, AnnouncementTotals, CreateAnnouncementRequest, UpdateAnnouncementRequest,
};
pub use bulk::{BulkMessageService, CreateBulkMessageRequest, ListBulkMessagesQuery};
pub use dispatcher::{
    CampaignAnalytics, ChannelAnalytics, ChannelFanout, Dispatcher, EmergencyAlertRequest,
    FanoutStatus, InAppAnalytics, NotificationSendReport, SendNotificationRequest,
};
pub use log::{event_types, ChannelFailureRate, CommunicationLogService, LogEvent};
pub use recipients::{CallbackOutcome, NewRecipient, ProgressFlags, RecipientTracker};
pub use scheduler::{plan_for, BatchPlan, CampaignRunStats, DeliveryScheduler, MAX_SEND_ATTEMPTS};
pub use types::{CallbackKind, CampaignRef, ChannelCounts, DispatchError};
