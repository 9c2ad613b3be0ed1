use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use clap::{Args, Subcommand};
use crier_analytics::AnalyticsService;
use crier_config::{DispatchSettings, ServerConfig};
use crier_database::DbConnection;
use crier_dispatch::{CommunicationLogService, RetentionSweeper};
use crier_notifications::NotificationStore;
use tracing::info;

/// One-shot maintenance passes. The server runs these on their cron
/// schedules; the subcommands exist for backfills and manual runs.
#[derive(Subcommand)]
pub enum MaintenanceCommand {
    /// Recompute the daily analytics rollups for one day
    RecomputeAnalytics(RecomputeAnalyticsArgs),
    /// Run the retention sweep: old log rows and read notifications
    Sweep(SweepArgs),
}

#[derive(Args)]
pub struct RecomputeAnalyticsArgs {
    /// Database connection URL; defaults to a SQLite file in the data dir
    #[arg(long, env = "CRIER_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Day to recompute (YYYY-MM-DD); defaults to yesterday (UTC)
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

#[derive(Args)]
pub struct SweepArgs {
    /// Database connection URL; defaults to a SQLite file in the data dir
    #[arg(long, env = "CRIER_DATABASE_URL")]
    pub database_url: Option<String>,
}

impl MaintenanceCommand {
    pub fn execute(self, log_level: String) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        match self {
            MaintenanceCommand::RecomputeAnalytics(args) => {
                let db = rt.block_on(connect(args.database_url, log_level))?;
                let date = args
                    .date
                    .unwrap_or_else(|| Utc::now().date_naive() - chrono::Duration::days(1));
                rt.block_on(async {
                    let analytics = AnalyticsService::new(db);
                    let rows = analytics.recompute_day(date).await?;
                    let sent: i32 = rows.iter().map(|r| r.total_sent).sum();
                    info!(%date, sent, "Recomputed daily analytics");
                    Ok(())
                })
            }
            MaintenanceCommand::Sweep(args) => {
                let db = rt.block_on(connect(args.database_url, log_level))?;
                let settings = DispatchSettings::from_env()?;
                rt.block_on(async {
                    let log = Arc::new(CommunicationLogService::new(db.clone()));
                    let store = Arc::new(NotificationStore::new(db));
                    let sweeper = RetentionSweeper::new(log, store, &settings)?;
                    sweeper.sweep().await;
                    info!("Retention sweep finished");
                    Ok(())
                })
            }
        }
    }
}

async fn connect(
    database_url: Option<String>,
    log_level: String,
) -> anyhow::Result<Arc<DbConnection>> {
    let config = ServerConfig::new("127.0.0.1:8080".to_string(), database_url, log_level)?;
    Ok(crier_database::establish_connection(&config.database_url).await?)
}
