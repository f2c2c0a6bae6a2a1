use std::collections::BTreeMap;

use clearview_core::config::{AppConfig, LoadOptions};
use clearview_core::domain::service::{Service, ServiceCategory};
use clearview_db::repositories::{ServiceRepository, SqlServiceRepository};
use clearview_db::{connect_with_config, migrations, ping};
use clearview_notify::transport_from_config;
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_VERIFICATION};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, reason: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {reason}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DATABASE_CHECKS: [&str; 3] = ["database_connectivity", "schema_migrations", "service_catalog"];

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_VERIFICATION };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_email_transport(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("email_transport", "configuration did not load"));
            for name in DATABASE_CHECKS {
                checks.push(DoctorCheck::skipped(name, "configuration did not load"));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_email_transport(config: &AppConfig) -> DoctorCheck {
    match transport_from_config(&config.email) {
        Ok(transport) => DoctorCheck::pass(
            "email_transport",
            format!("{} transport from {}", transport.name(), config.email.from_address),
        ),
        Err(error) => DoctorCheck::fail("email_transport", error.to_string()),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let mut checks = vec![DoctorCheck::fail(
                "database_connectivity",
                format!("failed to initialize async runtime: {error}"),
            )];
            checks.push(DoctorCheck::skipped("schema_migrations", "the runtime did not start"));
            checks.push(DoctorCheck::skipped("service_catalog", "the runtime did not start"));
            return checks;
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped("schema_migrations", "the database is unreachable"),
                    DoctorCheck::skipped("service_catalog", "the database is unreachable"),
                ];
            }
        };

        let mut checks = Vec::with_capacity(DATABASE_CHECKS.len());
        checks.push(match ping(&pool).await {
            Ok(()) => DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            ),
            Err(error) => DoctorCheck::fail("database_connectivity", error.to_string()),
        });

        let migrated = match migrations::pending_count(&pool).await {
            Ok(0) => {
                checks.push(DoctorCheck::pass("schema_migrations", "schema is up to date"));
                true
            }
            Ok(pending) => {
                checks.push(DoctorCheck::fail(
                    "schema_migrations",
                    format!("{pending} migration(s) pending; run `clearview migrate`"),
                ));
                false
            }
            Err(error) => {
                checks.push(DoctorCheck::fail("schema_migrations", error.to_string()));
                false
            }
        };

        if migrated {
            let services = SqlServiceRepository::new(pool.clone());
            checks.push(match services.list().await {
                Ok(catalog) => catalog_check(&catalog),
                Err(error) => DoctorCheck::fail("service_catalog", error.to_string()),
            });
        } else {
            checks.push(DoctorCheck::skipped("service_catalog", "the schema is not migrated"));
        }

        pool.close().await;
        checks
    })
}

/// The calculator cannot price anything without an active main service, and
/// a duplicated name makes service-type matching ambiguous.
fn catalog_check(catalog: &[Service]) -> DoctorCheck {
    let active_main = catalog
        .iter()
        .filter(|service| service.is_active && service.category == ServiceCategory::Main)
        .count();
    if active_main == 0 {
        return DoctorCheck::fail(
            "service_catalog",
            "no active main service; run `clearview seed` or add one in the admin",
        );
    }

    let mut names: BTreeMap<(&str, String), usize> = BTreeMap::new();
    for service in catalog {
        *names.entry((service.category.as_str(), service.name.to_lowercase())).or_default() += 1;
    }
    let duplicates: Vec<String> = names
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|((category, name), _)| format!("{category}/{name}"))
        .collect();
    if !duplicates.is_empty() {
        return DoctorCheck::fail(
            "service_catalog",
            format!("duplicate service names: {}", duplicates.join(", ")),
        );
    }

    DoctorCheck::pass(
        "service_catalog",
        format!("{} service(s), {active_main} active main", catalog.len()),
    )
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
