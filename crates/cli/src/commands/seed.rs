use clearview_db::{DefaultCatalogSeed, ServiceSeedInfo};

use crate::commands::{
    open_migrated, prepare, CommandResult, Failure, EXIT_MIGRATION, EXIT_VERIFICATION,
};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare() {
        Ok(prepared) => prepared,
        Err(failure) => return CommandResult::from_failure("seed", failure),
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;

        let seed_result = DefaultCatalogSeed::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), EXIT_MIGRATION))?;

        let verification = DefaultCatalogSeed::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), EXIT_VERIFICATION))?;

        let run_result: Result<SeedOutput, Failure> = if verification.all_present {
            Ok(SeedOutput {
                inserted: seed_result.services_inserted,
                services: seed_result.services,
            })
        } else {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            Err(("seed_verification", verification_message(&failed), EXIT_VERIFICATION))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(output) => {
            let lines: Vec<String> = output
                .services
                .iter()
                .map(|s| format!("  - {} [{}]: {} ({})", s.id, s.category, s.name, s.description))
                .collect();
            let message = format!(
                "default catalog ready ({} new service row(s)):\n{}",
                output.inserted,
                lines.join("\n")
            );
            CommandResult::success("seed", message)
        }
        Err(failure) => CommandResult::from_failure("seed", failure),
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

struct SeedOutput {
    inserted: usize,
    services: Vec<ServiceSeedInfo>,
}
