use std::sync::Arc;

use chrono::Utc;
use clearview_db::repositories::{SqlQuoteRepository, SqlSettingsRepository};
use clearview_funnel::{FollowupSweep, SweepPolicy};
use clearview_notify::{transport_from_config, Mailer};

use crate::commands::{
    open_migrated, prepare, CommandResult, Failure, EXIT_CONFIG, EXIT_VERIFICATION,
};

/// Runs the follow-up sweep once, the same pass the scheduler and the cron
/// endpoint trigger.
pub fn run() -> CommandResult {
    let (config, runtime) = match prepare() {
        Ok(prepared) => prepared,
        Err(failure) => return CommandResult::from_failure("followup", failure),
    };

    let result = runtime.block_on(async {
        let transport = transport_from_config(&config.email)
            .map_err(|error| ("email_transport", error.to_string(), EXIT_CONFIG))?;
        let mailer = Mailer::from_config(transport, &config.email)
            .map_err(|error| ("email_templates", error.to_string(), EXIT_CONFIG))?;

        let pool = open_migrated(&config).await?;
        let sweep = FollowupSweep::new(
            Arc::new(SqlQuoteRepository::new(pool.clone())),
            Arc::new(SqlSettingsRepository::new(pool.clone())),
            Arc::new(mailer),
            SweepPolicy::from_config(&config.followup),
        );

        let report: Result<_, Failure> = sweep
            .run(Utc::now())
            .await
            .map_err(|error| ("followup_sweep", error.to_string(), EXIT_VERIFICATION));
        pool.close().await;
        report
    });

    match result {
        Ok(report) => CommandResult::success_with_data(
            "followup",
            format!(
                "processed {} draft(s): {} sent, {} skipped, {} error(s)",
                report.processed, report.sent, report.skipped, report.errors
            ),
            serde_json::to_value(report).ok(),
        ),
        Err(failure) => CommandResult::from_failure("followup", failure),
    }
}
