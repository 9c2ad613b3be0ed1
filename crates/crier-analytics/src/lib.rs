//! Delivery analytics: daily per-channel rollups recomputed from the
//! communication log, plus the dashboard queries served from them.

pub mod handlers;
pub mod plugin;
pub mod scheduler;
pub mod service;

pub use handlers::{AnalyticsApiDoc, AnalyticsState};
pub use plugin::AnalyticsPlugin;
pub use scheduler::RecomputeScheduler;
pub use service::{
    AnalyticsError, AnalyticsService, ChannelPerformance, EngagementEntry, SummaryTotals,
};
