use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub email: EmailConfig,
    pub geo: GeoConfig,
    pub followup: FollowupConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Bearer credentials for the admin API and the cron trigger. When unset the
/// corresponding endpoints reject every request.
#[derive(Clone, Debug)]
pub struct AdminConfig {
    pub token: Option<SecretString>,
    pub cron_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub provider: EmailProvider,
    pub api_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub from_address: String,
    pub business_inbox: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct GeoConfig {
    pub distance_url: Option<String>,
    pub estimate_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct FollowupConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub grace_minutes: i64,
    pub pacing_ms: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub idle_ttl_secs: u64,
    pub stalled_notice_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailProvider {
    Http,
    Log,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub email_provider: Option<EmailProvider>,
    pub admin_token: Option<String>,
    pub followup_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://clearview.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            admin: AdminConfig { token: None, cron_secret: None },
            email: EmailConfig {
                provider: EmailProvider::Log,
                api_url: None,
                api_key: None,
                from_address: "quotes@windowcleaning.com".to_string(),
                business_inbox: None,
                timeout_secs: 15,
                max_retries: 2,
            },
            geo: GeoConfig { distance_url: None, estimate_url: None, timeout_secs: 10 },
            followup: FollowupConfig {
                enabled: false,
                interval_secs: 3600,
                grace_minutes: 10,
                pacing_ms: 1000,
            },
            session: SessionConfig { idle_ttl_secs: 3600, stalled_notice_secs: 240 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for EmailProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "log" => Ok(Self::Log),
            other => Err(ConfigError::Validation(format!(
                "unsupported email provider `{other}` (expected http|log)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("clearview.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(admin) = patch.admin {
            if let Some(token) = admin.token {
                self.admin.token = Some(secret_value(token));
            }
            if let Some(cron_secret) = admin.cron_secret {
                self.admin.cron_secret = Some(secret_value(cron_secret));
            }
        }

        if let Some(email) = patch.email {
            if let Some(provider) = email.provider {
                self.email.provider = provider;
            }
            if let Some(api_url) = email.api_url {
                self.email.api_url = Some(api_url);
            }
            if let Some(api_key) = email.api_key {
                self.email.api_key = Some(secret_value(api_key));
            }
            if let Some(from_address) = email.from_address {
                self.email.from_address = from_address;
            }
            if let Some(business_inbox) = email.business_inbox {
                self.email.business_inbox = Some(business_inbox);
            }
            if let Some(timeout_secs) = email.timeout_secs {
                self.email.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = email.max_retries {
                self.email.max_retries = max_retries;
            }
        }

        if let Some(geo) = patch.geo {
            if let Some(distance_url) = geo.distance_url {
                self.geo.distance_url = Some(distance_url);
            }
            if let Some(estimate_url) = geo.estimate_url {
                self.geo.estimate_url = Some(estimate_url);
            }
            if let Some(timeout_secs) = geo.timeout_secs {
                self.geo.timeout_secs = timeout_secs;
            }
        }

        if let Some(followup) = patch.followup {
            if let Some(enabled) = followup.enabled {
                self.followup.enabled = enabled;
            }
            if let Some(interval_secs) = followup.interval_secs {
                self.followup.interval_secs = interval_secs;
            }
            if let Some(grace_minutes) = followup.grace_minutes {
                self.followup.grace_minutes = grace_minutes;
            }
            if let Some(pacing_ms) = followup.pacing_ms {
                self.followup.pacing_ms = pacing_ms;
            }
        }

        if let Some(session) = patch.session {
            if let Some(idle_ttl_secs) = session.idle_ttl_secs {
                self.session.idle_ttl_secs = idle_ttl_secs;
            }
            if let Some(stalled_notice_secs) = session.stalled_notice_secs {
                self.session.stalled_notice_secs = stalled_notice_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CLEARVIEW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CLEARVIEW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CLEARVIEW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CLEARVIEW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CLEARVIEW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CLEARVIEW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CLEARVIEW_SERVER_PORT") {
            self.server.port = parse_u16("CLEARVIEW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CLEARVIEW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CLEARVIEW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CLEARVIEW_ADMIN_TOKEN") {
            self.admin.token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CLEARVIEW_CRON_SECRET") {
            self.admin.cron_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("CLEARVIEW_EMAIL_PROVIDER") {
            self.email.provider = value.parse()?;
        }
        if let Some(value) = read_env("CLEARVIEW_EMAIL_API_URL") {
            self.email.api_url = Some(value);
        }
        if let Some(value) = read_env("CLEARVIEW_EMAIL_API_KEY") {
            self.email.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CLEARVIEW_EMAIL_FROM_ADDRESS") {
            self.email.from_address = value;
        }
        if let Some(value) = read_env("CLEARVIEW_EMAIL_BUSINESS_INBOX") {
            self.email.business_inbox = Some(value);
        }
        if let Some(value) = read_env("CLEARVIEW_EMAIL_TIMEOUT_SECS") {
            self.email.timeout_secs = parse_u64("CLEARVIEW_EMAIL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CLEARVIEW_EMAIL_MAX_RETRIES") {
            self.email.max_retries = parse_u32("CLEARVIEW_EMAIL_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CLEARVIEW_GEO_DISTANCE_URL") {
            self.geo.distance_url = Some(value);
        }
        if let Some(value) = read_env("CLEARVIEW_GEO_ESTIMATE_URL") {
            self.geo.estimate_url = Some(value);
        }
        if let Some(value) = read_env("CLEARVIEW_GEO_TIMEOUT_SECS") {
            self.geo.timeout_secs = parse_u64("CLEARVIEW_GEO_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CLEARVIEW_FOLLOWUP_ENABLED") {
            self.followup.enabled = parse_bool("CLEARVIEW_FOLLOWUP_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CLEARVIEW_FOLLOWUP_INTERVAL_SECS") {
            self.followup.interval_secs = parse_u64("CLEARVIEW_FOLLOWUP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("CLEARVIEW_FOLLOWUP_GRACE_MINUTES") {
            self.followup.grace_minutes = parse_i64("CLEARVIEW_FOLLOWUP_GRACE_MINUTES", &value)?;
        }
        if let Some(value) = read_env("CLEARVIEW_FOLLOWUP_PACING_MS") {
            self.followup.pacing_ms = parse_u64("CLEARVIEW_FOLLOWUP_PACING_MS", &value)?;
        }

        if let Some(value) = read_env("CLEARVIEW_SESSION_IDLE_TTL_SECS") {
            self.session.idle_ttl_secs = parse_u64("CLEARVIEW_SESSION_IDLE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("CLEARVIEW_SESSION_STALLED_NOTICE_SECS") {
            self.session.stalled_notice_secs =
                parse_u64("CLEARVIEW_SESSION_STALLED_NOTICE_SECS", &value)?;
        }

        let log_level =
            read_env("CLEARVIEW_LOGGING_LEVEL").or_else(|| read_env("CLEARVIEW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CLEARVIEW_LOGGING_FORMAT").or_else(|| read_env("CLEARVIEW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(provider) = overrides.email_provider {
            self.email.provider = provider;
        }
        if let Some(admin_token) = overrides.admin_token {
            self.admin.token = Some(secret_value(admin_token));
        }
        if let Some(enabled) = overrides.followup_enabled {
            self.followup.enabled = enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_admin(&self.admin)?;
        validate_email(&self.email)?;
        validate_geo(&self.geo)?;
        validate_followup(&self.followup)?;
        validate_session(&self.session)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("clearview.toml"), PathBuf::from("config/clearview.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_admin(admin: &AdminConfig) -> Result<(), ConfigError> {
    for (key, value) in [("admin.token", &admin.token), ("admin.cron_secret", &admin.cron_secret)]
    {
        if let Some(secret) = value {
            if secret.expose_secret().trim().len() < 16 {
                return Err(ConfigError::Validation(format!(
                    "{key} must be at least 16 characters when set"
                )));
            }
        }
    }
    Ok(())
}

fn validate_email(email: &EmailConfig) -> Result<(), ConfigError> {
    if !email.from_address.contains('@') {
        return Err(ConfigError::Validation(
            "email.from_address must be an email address".to_string(),
        ));
    }

    if email.timeout_secs == 0 || email.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "email.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if email.provider == EmailProvider::Http {
        let url = email.api_url.as_deref().map(str::trim).unwrap_or_default();
        if url.is_empty() {
            return Err(ConfigError::Validation(
                "email.api_url is required for the http email provider".to_string(),
            ));
        }
        validate_http_url("email.api_url", url)?;

        let missing_key = email
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing_key {
            return Err(ConfigError::Validation(
                "email.api_key is required for the http email provider".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_geo(geo: &GeoConfig) -> Result<(), ConfigError> {
    if let Some(url) = &geo.distance_url {
        validate_http_url("geo.distance_url", url)?;
    }
    if let Some(url) = &geo.estimate_url {
        validate_http_url("geo.estimate_url", url)?;
    }
    if geo.timeout_secs == 0 || geo.timeout_secs > 60 {
        return Err(ConfigError::Validation("geo.timeout_secs must be in range 1..=60".to_string()));
    }
    Ok(())
}

fn validate_followup(followup: &FollowupConfig) -> Result<(), ConfigError> {
    if followup.interval_secs < 60 {
        return Err(ConfigError::Validation(
            "followup.interval_secs must be at least 60".to_string(),
        ));
    }
    if followup.grace_minutes < 1 {
        return Err(ConfigError::Validation(
            "followup.grace_minutes must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.idle_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "session.idle_ttl_secs must be greater than zero".to_string(),
        ));
    }
    if session.stalled_notice_secs == 0 {
        return Err(ConfigError::Validation(
            "session.stalled_notice_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_http_url(key: &str, url: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!("{key} must start with http:// or https://")));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    admin: Option<AdminPatch>,
    email: Option<EmailPatch>,
    geo: Option<GeoPatch>,
    followup: Option<FollowupPatch>,
    session: Option<SessionPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AdminPatch {
    token: Option<String>,
    cron_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct EmailPatch {
    provider: Option<EmailProvider>,
    api_url: Option<String>,
    api_key: Option<String>,
    from_address: Option<String>,
    business_inbox: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct GeoPatch {
    distance_url: Option<String>,
    estimate_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FollowupPatch {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    grace_minutes: Option<i64>,
    pacing_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    idle_ttl_secs: Option<u64>,
    stalled_notice_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, EmailProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_load_without_file_or_env() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.email.provider == EmailProvider::Log, "default provider should log")?;
        ensure(config.followup.grace_minutes == 10, "default grace window is ten minutes")?;
        ensure(config.followup.pacing_ms == 1000, "default pacing is one second")?;
        ensure(config.session.stalled_notice_secs == 240, "stalled notice fires at four minutes")?;
        ensure(config.admin.token.is_none(), "admin token has no default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_CLEARVIEW_EMAIL_KEY", "key-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("clearview.toml");
            fs::write(
                &path,
                r#"
[email]
provider = "http"
api_url = "https://mail.example.com/send"
api_key = "${TEST_CLEARVIEW_EMAIL_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let key = config.email.api_key.as_ref().map(|key| key.expose_secret().to_string());
            ensure(
                key.as_deref() == Some("key-from-env"),
                "email api key should be loaded from environment",
            )?;
            ensure(config.email.provider == EmailProvider::Http, "provider should come from file")
        })();

        clear_vars(&["TEST_CLEARVIEW_EMAIL_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CLEARVIEW_LOG_LEVEL", "warn");
        env::set_var("CLEARVIEW_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["CLEARVIEW_LOG_LEVEL", "CLEARVIEW_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CLEARVIEW_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("CLEARVIEW_FOLLOWUP_GRACE_MINUTES", "30");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("clearview.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[followup]
grace_minutes = 20
pacing_ms = 250

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.followup.grace_minutes == 30, "env grace window should win over file")?;
            ensure(config.followup.pacing_ms == 250, "file pacing should win over default")?;
            Ok(())
        })();

        clear_vars(&["CLEARVIEW_DATABASE_URL", "CLEARVIEW_FOLLOWUP_GRACE_MINUTES"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CLEARVIEW_EMAIL_PROVIDER", "http");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("email.api_url")
            );
            ensure(has_message, "validation failure should mention email.api_url")
        })();

        clear_vars(&["CLEARVIEW_EMAIL_PROVIDER"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CLEARVIEW_SERVER_PORT", "eighty");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { ref key, .. })
                if key == "CLEARVIEW_SERVER_PORT" =>
            {
                Ok(())
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid env override".to_string()),
        };

        clear_vars(&["CLEARVIEW_SERVER_PORT"]);
        result
    }

    #[test]
    fn short_admin_token_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                admin_token: Some("short".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .err()
        .ok_or_else(|| "short admin token should fail validation".to_string())?;

        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("admin.token")),
            "validation failure should mention admin.token",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CLEARVIEW_ADMIN_TOKEN", "admin-secret-value-0001");
        env::set_var("CLEARVIEW_CRON_SECRET", "cron-secret-value-0002");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("admin-secret-value-0001"),
                "debug output should not contain admin token",
            )?;
            ensure(
                !debug.contains("cron-secret-value-0002"),
                "debug output should not contain cron secret",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["CLEARVIEW_ADMIN_TOKEN", "CLEARVIEW_CRON_SECRET"]);
        result
    }
}
