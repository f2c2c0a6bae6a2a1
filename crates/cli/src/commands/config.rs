use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use clearview_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in effective_values(&config) {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

type Entry = (&'static str, String, &'static [&'static str]);

fn effective_values(config: &AppConfig) -> Vec<Entry> {
    vec![
        entry("database.url", config.database.url.clone(), &["CLEARVIEW_DATABASE_URL"]),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CLEARVIEW_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["CLEARVIEW_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["CLEARVIEW_SERVER_BIND_ADDRESS"],
        ),
        entry("server.port", config.server.port.to_string(), &["CLEARVIEW_SERVER_PORT"]),
        entry(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["CLEARVIEW_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        entry("admin.token", redact(config.admin.token.as_ref()), &["CLEARVIEW_ADMIN_TOKEN"]),
        entry(
            "admin.cron_secret",
            redact(config.admin.cron_secret.as_ref()),
            &["CLEARVIEW_CRON_SECRET"],
        ),
        entry("email.provider", format!("{:?}", config.email.provider), &["CLEARVIEW_EMAIL_PROVIDER"]),
        entry(
            "email.api_url",
            config.email.api_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["CLEARVIEW_EMAIL_API_URL"],
        ),
        entry("email.api_key", redact(config.email.api_key.as_ref()), &["CLEARVIEW_EMAIL_API_KEY"]),
        entry(
            "email.from_address",
            config.email.from_address.clone(),
            &["CLEARVIEW_EMAIL_FROM_ADDRESS"],
        ),
        entry(
            "email.business_inbox",
            config.email.business_inbox.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["CLEARVIEW_EMAIL_BUSINESS_INBOX"],
        ),
        entry(
            "geo.distance_url",
            config.geo.distance_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["CLEARVIEW_GEO_DISTANCE_URL"],
        ),
        entry(
            "geo.estimate_url",
            config.geo.estimate_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["CLEARVIEW_GEO_ESTIMATE_URL"],
        ),
        entry("followup.enabled", config.followup.enabled.to_string(), &["CLEARVIEW_FOLLOWUP_ENABLED"]),
        entry(
            "followup.interval_secs",
            config.followup.interval_secs.to_string(),
            &["CLEARVIEW_FOLLOWUP_INTERVAL_SECS"],
        ),
        entry(
            "followup.grace_minutes",
            config.followup.grace_minutes.to_string(),
            &["CLEARVIEW_FOLLOWUP_GRACE_MINUTES"],
        ),
        entry(
            "session.idle_ttl_secs",
            config.session.idle_ttl_secs.to_string(),
            &["CLEARVIEW_SESSION_IDLE_TTL_SECS"],
        ),
        entry(
            "session.stalled_notice_secs",
            config.session.stalled_notice_secs.to_string(),
            &["CLEARVIEW_SESSION_STALLED_NOTICE_SECS"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["CLEARVIEW_LOGGING_LEVEL", "CLEARVIEW_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["CLEARVIEW_LOGGING_FORMAT", "CLEARVIEW_LOG_FORMAT"],
        ),
    ]
}

fn entry(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Entry {
    (key, value, env_keys)
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("clearview.toml"), PathBuf::from("config/clearview.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact(secret: Option<&SecretString>) -> String {
    match secret {
        None => "<unset>".to_string(),
        Some(secret) if secret.expose_secret().trim().is_empty() => "<empty>".to_string(),
        Some(_) => "<redacted>".to_string(),
    }
}
