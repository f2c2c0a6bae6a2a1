use std::env;
use std::sync::{Mutex, OnceLock};

use clearview_cli::commands::price::PriceArgs;
use clearview_cli::commands::{doctor, followup, migrate, price, seed};
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("CLEARVIEW_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "applied 1 pending migration(s)");
    });
}

#[test]
fn migrate_returns_config_failure_for_unknown_email_provider() {
    with_env(
        &[("CLEARVIEW_DATABASE_URL", "sqlite::memory:"), ("CLEARVIEW_EMAIL_PROVIDER", "fax")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn seed_reports_default_catalog() {
    with_env(&[("CLEARVIEW_DATABASE_URL", "sqlite::memory:")], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("(6 new service row(s))"));
        assert!(message.contains("  - svc-exterior [main]: Exterior Only Cleaning"));
        assert!(message.contains("  - svc-screens [addon]: Screen Cleaning (Flat 40)"));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    let dir = TempDir::new().expect("temp dir");
    let url = database_url(&dir);

    with_env(&[("CLEARVIEW_DATABASE_URL", url.as_str())], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let message = parse_payload(&second.output)["message"].as_str().unwrap_or("").to_string();
        assert!(message.contains("(0 new service row(s))"), "{message}");
    });
}

#[test]
fn doctor_fails_until_schema_and_catalog_are_ready() {
    let dir = TempDir::new().expect("temp dir");
    let url = database_url(&dir);

    with_env(&[("CLEARVIEW_DATABASE_URL", url.as_str())], || {
        let before = doctor::run(true);
        assert_eq!(before.exit_code, 6);
        let report = parse_payload(&before.output);
        assert_eq!(report["overall_status"], "fail");
        assert_eq!(check_status(&report, "schema_migrations"), "fail");
        assert_eq!(check_status(&report, "service_catalog"), "skipped");

        assert_eq!(migrate::run().exit_code, 0);
        let migrated = parse_payload(&doctor::run(true).output);
        assert_eq!(check_status(&migrated, "schema_migrations"), "pass");
        assert_eq!(check_status(&migrated, "service_catalog"), "fail");

        assert_eq!(seed::run().exit_code, 0);
        let ready = doctor::run(true);
        assert_eq!(ready.exit_code, 0, "{}", ready.output);
        let report = parse_payload(&ready.output);
        assert_eq!(report["overall_status"], "pass");
        assert_eq!(check_status(&report, "email_transport"), "pass");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[("CLEARVIEW_SERVER_PORT", "not-a-port")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 6);
        assert!(result.output.starts_with("doctor: one or more readiness checks failed"));
        assert!(result.output.contains("- [fail] config_validation:"));
        assert!(result.output.contains("- [skip] database_connectivity:"));
    });
}

#[test]
fn price_uses_seeded_catalog() {
    let dir = TempDir::new().expect("temp dir");
    let url = database_url(&dir);

    with_env(&[("CLEARVIEW_DATABASE_URL", url.as_str())], || {
        assert_eq!(seed::run().exit_code, 0);

        let result = price::run(PriceArgs {
            square_footage: 2000,
            service: "Exterior Only Cleaning".to_string(),
            stories: 1,
            addons: vec!["Screen Cleaning".to_string()],
            post_construction: false,
        });
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "price");
        assert_eq!(payload["message"], "$240");
        assert_eq!(payload["data"]["breakdown"]["addons"][0]["name"], "Screen Cleaning");
    });
}

#[test]
fn price_rejects_unknown_service() {
    with_env(&[("CLEARVIEW_DATABASE_URL", "sqlite::memory:")], || {
        let result = price::run(PriceArgs {
            square_footage: 2000,
            service: "Pressure Washing".to_string(),
            stories: 1,
            addons: Vec::new(),
            post_construction: false,
        });
        assert_eq!(result.exit_code, 7);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

#[test]
fn followup_on_empty_database_processes_nothing() {
    with_env(&[("CLEARVIEW_DATABASE_URL", "sqlite::memory:")], || {
        let result = followup::run();
        assert_eq!(result.exit_code, 0, "{}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "followup");
        assert_eq!(payload["data"]["processed"], 0);
        assert_eq!(payload["data"]["sent"], 0);
    });
}

fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("clearview.db").display())
}

fn check_status(report: &Value, name: &str) -> String {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .and_then(|check| check["status"].as_str())
        .unwrap_or_default()
        .to_string()
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "CLEARVIEW_DATABASE_URL",
        "CLEARVIEW_DATABASE_MAX_CONNECTIONS",
        "CLEARVIEW_DATABASE_TIMEOUT_SECS",
        "CLEARVIEW_SERVER_BIND_ADDRESS",
        "CLEARVIEW_SERVER_PORT",
        "CLEARVIEW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "CLEARVIEW_ADMIN_TOKEN",
        "CLEARVIEW_CRON_SECRET",
        "CLEARVIEW_EMAIL_PROVIDER",
        "CLEARVIEW_EMAIL_API_URL",
        "CLEARVIEW_EMAIL_API_KEY",
        "CLEARVIEW_EMAIL_BUSINESS_INBOX",
        "CLEARVIEW_FOLLOWUP_ENABLED",
        "CLEARVIEW_FOLLOWUP_PACING_MS",
        "CLEARVIEW_LOGGING_LEVEL",
        "CLEARVIEW_LOGGING_FORMAT",
        "CLEARVIEW_LOG_LEVEL",
        "CLEARVIEW_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
