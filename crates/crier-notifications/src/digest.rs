use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveTime, Weekday};
use crier_channels::{ChannelError, EmailAdapter};
use crier_config::DispatchSettings;
use crier_core::jobs::{Job, JobQueue, SendDigestJob};
use crier_core::UtcDateTime;
use crier_database::DbConnection;
use crier_entities::{notifications, users, DigestFrequency};
use sea_orm::EntityTrait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::preferences::PreferenceService;
use crate::store::{NotificationError, NotificationStore};

/// A digest lists at most this many notification titles; the rest collapse
/// into a trailing "and N more" line.
pub const DIGEST_TITLE_LIMIT: usize = 10;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("Store error: {0}")]
    Store(#[from] NotificationError),
    #[error("Email delivery failed: {0}")]
    Delivery(#[from] ChannelError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestOutcome {
    Sent { unread: u64, listed: usize },
    Skipped { reason: &'static str },
}

/// Builds and emails one user's unread-notification summary. Digests never
/// mark anything read; the rows stay unread until the user opens them.
pub struct DigestService {
    db: Arc<DbConnection>,
    store: Arc<NotificationStore>,
    email: Arc<EmailAdapter>,
    school_name: String,
}

impl DigestService {
    pub fn new(
        db: Arc<DbConnection>,
        store: Arc<NotificationStore>,
        email: Arc<EmailAdapter>,
        settings: &DispatchSettings,
    ) -> Self {
        Self {
            db,
            store,
            email,
            school_name: settings.school_name.clone(),
        }
    }

    pub async fn send_digest(
        &self,
        user_id: i32,
        frequency: DigestFrequency,
    ) -> Result<DigestOutcome, DigestError> {
        let window = match frequency {
            DigestFrequency::Daily => Duration::hours(24),
            DigestFrequency::Weekly => Duration::days(7),
            DigestFrequency::None => {
                return Ok(DigestOutcome::Skipped {
                    reason: "digest_disabled",
                })
            }
        };

        let user = match users::Entity::find_by_id(user_id)
            .one(self.db.as_ref())
            .await?
        {
            Some(user) => user,
            None => {
                tracing::warn!(user_id, "Digest requested for unknown user");
                return Ok(DigestOutcome::Skipped {
                    reason: "unknown_user",
                });
            }
        };
        let address = match user.email.as_deref() {
            Some(address) if !address.trim().is_empty() => address.to_string(),
            _ => {
                return Ok(DigestOutcome::Skipped { reason: "no_email" });
            }
        };

        let since = chrono::Utc::now() - window;
        let unread = self.store.unread_since(user_id, since).await?;
        if unread.is_empty() {
            return Ok(DigestOutcome::Skipped {
                reason: "no_unread",
            });
        }

        let total = unread.len() as u64;
        let (titles, remainder) = digest_lines(&unread);
        let subject = digest_subject(frequency, total);
        let body = self.digest_body(frequency, &titles, remainder, total, &user.full_name());

        self.email.send_email(&address, &subject, &body).await?;
        tracing::info!(
            user_id,
            frequency = %frequency,
            unread = total,
            "Sent notification digest"
        );
        Ok(DigestOutcome::Sent {
            unread: total,
            listed: titles.len(),
        })
    }

    fn digest_body(
        &self,
        frequency: DigestFrequency,
        titles: &[String],
        remainder: u64,
        total: u64,
        recipient_name: &str,
    ) -> String {
        let window_phrase = match frequency {
            DigestFrequency::Daily => "the last 24 hours",
            _ => "the past week",
        };
        let items = titles
            .iter()
            .map(|title| format!("        <li>{}</li>", title))
            .collect::<Vec<_>>()
            .join("\n");
        let more_line = if remainder > 0 {
            format!("    <p>… and {} more</p>\n", remainder)
        } else {
            String::new()
        };

        format!(
            r#"<div style="font-family: Arial, sans-serif;">
    <h2>{school}</h2>
    <p>Hi {name}, you have {total} unread notification{plural} from {window}:</p>
    <ul>
{items}
    </ul>
{more_line}    <p style="color: #666; font-size: 0.9em;">Open the app to read them.</p>
</div>"#,
            school = self.school_name,
            name = recipient_name,
            total = total,
            plural = if total == 1 { "" } else { "s" },
            window = window_phrase,
            items = items,
            more_line = more_line,
        )
    }
}

/// Up to [`DIGEST_TITLE_LIMIT`] titles, newest first, plus the overflow count.
fn digest_lines(unread: &[notifications::Model]) -> (Vec<String>, u64) {
    let titles: Vec<String> = unread
        .iter()
        .take(DIGEST_TITLE_LIMIT)
        .map(|n| n.title.clone())
        .collect();
    let remainder = unread.len().saturating_sub(titles.len()) as u64;
    (titles, remainder)
}

fn digest_subject(frequency: DigestFrequency, total: u64) -> String {
    let cadence = match frequency {
        DigestFrequency::Daily => "Daily",
        _ => "Weekly",
    };
    format!(
        "{} digest: {} unread notification{}",
        cadence,
        total,
        if total == 1 { "" } else { "s" }
    )
}

/// Background loop that wakes at the configured wall-clock times and enqueues
/// one digest job per due user. The jobs are drained by the dispatch worker.
pub struct DigestScheduler {
    preferences: Arc<PreferenceService>,
    queue: Arc<dyn JobQueue>,
    daily_time: NaiveTime,
    weekly_day: Weekday,
}

impl DigestScheduler {
    pub fn new(
        preferences: Arc<PreferenceService>,
        queue: Arc<dyn JobQueue>,
        settings: &DispatchSettings,
    ) -> Self {
        Self {
            preferences,
            queue,
            daily_time: settings.digest_daily_time,
            weekly_day: settings.digest_weekly_day,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(cancel).await;
        })
    }

    async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            daily_time = %self.daily_time,
            weekly_day = ?self.weekly_day,
            "Digest scheduler started"
        );
        loop {
            let now = chrono::Utc::now();
            let (next, cadences) = self.next_run(now);
            let wait = (next - now)
                .to_std()
                .unwrap_or_else(|_| std::time::Duration::from_secs(1));

            tracing::debug!(
                next_run = %next,
                wait_secs = wait.as_secs(),
                "Digest scheduler sleeping"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Digest scheduler stopping");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            for cadence in cadences {
                self.enqueue_due(cadence).await;
            }
        }
    }

    /// The next instant a digest run is due and which cadences fire then.
    /// Weekly digests go out at the daily send time on the configured day,
    /// so both cadences can share an instant.
    fn next_run(&self, now: UtcDateTime) -> (UtcDateTime, Vec<DigestFrequency>) {
        let daily = next_daily_occurrence(now, self.daily_time);
        let weekly = next_weekly_occurrence(now, self.weekly_day, self.daily_time);
        if daily == weekly {
            (daily, vec![DigestFrequency::Daily, DigestFrequency::Weekly])
        } else if daily < weekly {
            (daily, vec![DigestFrequency::Daily])
        } else {
            (weekly, vec![DigestFrequency::Weekly])
        }
    }

    async fn enqueue_due(&self, cadence: DigestFrequency) {
        let users = match self.preferences.users_with_digest(cadence).await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!("Failed to load digest subscribers: {}", e);
                return;
            }
        };
        tracing::info!(
            cadence = %cadence,
            subscribers = users.len(),
            "Enqueueing digest jobs"
        );
        for user_id in users {
            let job = Job::SendDigest(SendDigestJob {
                user_id,
                frequency: cadence.to_string(),
            });
            if let Err(e) = self.queue.send(job).await {
                tracing::error!(user_id, "Failed to enqueue digest job: {}", e);
            }
        }
    }
}

/// Today at `at` if that is still ahead, else tomorrow at `at`.
fn next_daily_occurrence(now: UtcDateTime, at: NaiveTime) -> UtcDateTime {
    let candidate = now.date_naive().and_time(at).and_utc();
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

/// The next `weekday` at `at`, which may be later today.
fn next_weekly_occurrence(now: UtcDateTime, weekday: Weekday, at: NaiveTime) -> UtcDateTime {
    let today = now.weekday().num_days_from_monday() as i64;
    let target = weekday.num_days_from_monday() as i64;
    let mut days_ahead = (target - today).rem_euclid(7);
    if days_ahead == 0 {
        let candidate = now.date_naive().and_time(at).and_utc();
        if candidate <= now {
            days_ahead = 7;
        }
    }
    (now.date_naive() + Duration::days(days_ahead))
        .and_time(at)
        .and_utc()
}
