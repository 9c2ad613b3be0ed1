use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crier_config::DispatchSettings;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::service::{AnalyticsError, AnalyticsService};

/// Wakes on the analytics cron and recomputes the rollups for yesterday and
/// today. Yesterday is included because the nightly tick runs just after
/// midnight, when the previous day has only a partial rollup from the
/// intra-day passes.
pub struct RecomputeScheduler {
    analytics: Arc<AnalyticsService>,
    schedule: Schedule,
}

impl RecomputeScheduler {
    pub fn new(
        analytics: Arc<AnalyticsService>,
        settings: &DispatchSettings,
    ) -> Result<Self, AnalyticsError> {
        let schedule = Schedule::from_str(&settings.analytics_cron).map_err(|e| {
            AnalyticsError::invalid(format!(
                "invalid analytics cron expression {:?}: {}",
                settings.analytics_cron, e
            ))
        })?;
        Ok(Self {
            analytics,
            schedule,
        })
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(schedule = %self.schedule, "Analytics recompute scheduler started");
        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                warn!("Analytics cron schedule has no upcoming ticks; stopping");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Analytics recompute scheduler stopping");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }
            self.run_once().await;
        }
    }

    pub async fn run_once(&self) {
        let today = Utc::now().date_naive();
        for date in [today - chrono::Duration::days(1), today] {
            match self.analytics.recompute_day(date).await {
                Ok(rows) => {
                    let sent: i32 = rows.iter().map(|r| r.total_sent).sum();
                    info!(%date, sent, "Recomputed daily analytics");
                }
                Err(e) => error!(%date, "Analytics recompute failed: {}", e),
            }
        }
    }
}
