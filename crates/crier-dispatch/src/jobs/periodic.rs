use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crier_config::DispatchSettings;
use crier_notifications::NotificationStore;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::services::{CommunicationLogService, Dispatcher, DispatchError};

fn parse_cron(expression: &str, which: &str) -> Result<Schedule, DispatchError> {
    Schedule::from_str(expression).map_err(|e| {
        DispatchError::invalid(format!("invalid {} cron expression {:?}: {}", which, expression, e))
    })
}

/// Sleep until the schedule's next tick or until cancellation. Returns false
/// when the loop should stop.
async fn wait_for_tick(schedule: &Schedule, cancel: &CancellationToken, name: &str) -> bool {
    let Some(next) = schedule.upcoming(Utc).next() else {
        warn!(job = name, "Cron schedule has no upcoming ticks; stopping");
        return false;
    };
    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    tokio::select! {
        _ = cancel.cancelled() => {
            info!(job = name, "Periodic job stopping");
            false
        }
        _ = tokio::time::sleep(wait) => true,
    }
}

/// Wakes on the publish cron and hands due scheduled campaigns to the
/// dispatcher: announcements whose start date arrived, bulk message drafts
/// whose send time arrived.
pub struct ScheduledPublisher {
    dispatcher: Arc<Dispatcher>,
    schedule: Schedule,
}

impl ScheduledPublisher {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        settings: &DispatchSettings,
    ) -> Result<Self, DispatchError> {
        Ok(Self {
            dispatcher,
            schedule: parse_cron(&settings.publish_cron, "publish")?,
        })
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(schedule = %self.schedule, "Scheduled publisher started");
        loop {
            if !wait_for_tick(&self.schedule, &cancel, "publisher").await {
                break;
            }
            if let Err(e) = self.dispatcher.publish_due(Utc::now()).await {
                error!("Scheduled publisher pass failed: {}", e);
            }
        }
    }
}

/// Wakes on the cleanup cron and enforces retention: communication log rows
/// past the analytics window go, and so do notification-center rows the user
/// has already read. Unread notifications are never touched.
pub struct RetentionSweeper {
    log: Arc<CommunicationLogService>,
    store: Arc<NotificationStore>,
    schedule: Schedule,
    log_retention: chrono::Duration,
    notification_retention: chrono::Duration,
}

impl RetentionSweeper {
    pub fn new(
        log: Arc<CommunicationLogService>,
        store: Arc<NotificationStore>,
        settings: &DispatchSettings,
    ) -> Result<Self, DispatchError> {
        Ok(Self {
            log,
            store,
            schedule: parse_cron(&settings.cleanup_cron, "cleanup")?,
            log_retention: chrono::Duration::days(settings.analytics_retention_days),
            notification_retention: chrono::Duration::days(settings.notification_cleanup_days),
        })
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(schedule = %self.schedule, "Retention sweeper started");
        loop {
            if !wait_for_tick(&self.schedule, &cancel, "cleanup").await {
                break;
            }
            self.sweep().await;
        }
    }

    pub async fn sweep(&self) {
        let now = Utc::now();
        match self.log.delete_older_than(now - self.log_retention).await {
            Ok(removed) if removed > 0 => {
                info!(removed, "Pruned communication log");
            }
            Ok(_) => {}
            Err(e) => error!("Communication log cleanup failed: {}", e),
        }
        match self
            .store
            .delete_read_before(now - self.notification_retention)
            .await
        {
            Ok(removed) if removed > 0 => {
                info!(removed, "Pruned read notifications");
            }
            Ok(_) => {}
            Err(e) => error!("Notification cleanup failed: {}", e),
        }
    }
}
