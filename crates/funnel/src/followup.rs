use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use clearview_core::config::FollowupConfig;
use clearview_core::domain::quote::QuoteRecord;
use clearview_db::repositories::{QuoteRepository, RepositoryError, SettingsRepository};
use clearview_notify::Mailer;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub processed: u32,
    pub sent: u32,
    pub skipped: u32,
    pub errors: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepPolicy {
    pub grace: chrono::Duration,
    pub pacing: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self { grace: chrono::Duration::minutes(10), pacing: Duration::from_millis(1_000) }
    }
}

impl SweepPolicy {
    pub fn from_config(config: &FollowupConfig) -> Self {
        Self {
            grace: chrono::Duration::try_minutes(config.grace_minutes)
                .unwrap_or_else(|| chrono::Duration::minutes(10)),
            pacing: Duration::from_millis(config.pacing_ms),
        }
    }
}

enum Disposition {
    Sent,
    Skipped,
    Failed,
}

/// Emails customers who left a draft behind. Safe to run concurrently: a
/// record is only marked by the first run that gets to it.
pub struct FollowupSweep {
    quotes: Arc<dyn QuoteRepository>,
    settings: Arc<dyn SettingsRepository>,
    mailer: Arc<Mailer>,
    policy: SweepPolicy,
}

impl FollowupSweep {
    pub fn new(
        quotes: Arc<dyn QuoteRepository>,
        settings: Arc<dyn SettingsRepository>,
        mailer: Arc<Mailer>,
        policy: SweepPolicy,
    ) -> Self {
        Self { quotes, settings, mailer, policy }
    }

    /// Fails only when the candidate list or settings cannot be read. Every
    /// per-record problem is counted and the sweep moves on.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepReport, RepositoryError> {
        let cutoff = now - self.policy.grace;
        let candidates = self.quotes.followup_candidates(cutoff).await?;
        let settings = self.settings.get_or_init().await?;
        let mut report = SweepReport::default();

        info!(
            event_name = "funnel.followup.started",
            candidates = candidates.len(),
            cutoff = %cutoff.to_rfc3339(),
            "follow-up sweep started"
        );

        let mut previous_send = false;
        for candidate in &candidates {
            report.processed += 1;
            if previous_send && !self.policy.pacing.is_zero() {
                tokio::time::sleep(self.policy.pacing).await;
            }

            let disposition = self.handle(candidate, &settings, now).await;
            previous_send = matches!(disposition, Disposition::Sent | Disposition::Failed);
            match disposition {
                Disposition::Sent => report.sent += 1,
                Disposition::Skipped => report.skipped += 1,
                Disposition::Failed => report.errors += 1,
            }
        }

        info!(
            event_name = "funnel.followup.completed",
            processed = report.processed,
            sent = report.sent,
            skipped = report.skipped,
            errors = report.errors,
            "follow-up sweep completed"
        );
        Ok(report)
    }

    async fn handle(
        &self,
        candidate: &QuoteRecord,
        settings: &clearview_core::domain::settings::Settings,
        now: DateTime<Utc>,
    ) -> Disposition {
        let quote_id = candidate.id.0.as_str();

        match self.quotes.has_later_submission(candidate).await {
            Ok(true) => {
                if let Err(error) = self.quotes.mark_followup_sent(&candidate.id, now).await {
                    warn!(
                        event_name = "funnel.followup.mark_failed",
                        quote_id,
                        error = %error,
                        "could not mark superseded draft"
                    );
                }
                info!(
                    event_name = "funnel.followup.superseded",
                    quote_id,
                    "customer already submitted a quote; skipping"
                );
                return Disposition::Skipped;
            }
            Ok(false) => {}
            Err(error) => {
                warn!(
                    event_name = "funnel.followup.check_failed",
                    quote_id,
                    error = %error,
                    "could not check for a later submission; skipping"
                );
                return Disposition::Skipped;
            }
        }

        if let Err(error) = self.mailer.send_followup(&candidate.fields, settings, now).await {
            error!(
                event_name = "funnel.followup.send_failed",
                quote_id,
                recipient = candidate.fields.customer_email.as_deref().unwrap_or(""),
                error = %error,
                "follow-up email failed"
            );
            return Disposition::Failed;
        }

        match self.quotes.mark_followup_sent(&candidate.id, now).await {
            Ok(true) => {}
            Ok(false) => warn!(
                event_name = "funnel.followup.already_marked",
                quote_id,
                "another sweep marked this draft first"
            ),
            Err(error) => warn!(
                event_name = "funnel.followup.mark_failed",
                quote_id,
                error = %error,
                "follow-up sent but could not be recorded"
            ),
        }
        Disposition::Sent
    }
}

/// Runs the sweep every `interval`, starting one interval from now.
pub fn spawn_schedule(sweep: Arc<FollowupSweep>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(error) = sweep.run(Utc::now()).await {
                error!(
                    event_name = "funnel.followup.sweep_failed",
                    error = %error,
                    "scheduled follow-up sweep failed"
                );
            }
        }
    })
}
