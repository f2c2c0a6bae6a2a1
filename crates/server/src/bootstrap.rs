use std::sync::Arc;

use clearview_core::config::{AppConfig, ConfigError, LoadOptions};
use clearview_db::repositories::{SqlQuoteRepository, SqlServiceRepository, SqlSettingsRepository};
use clearview_db::{connect_with_config, migrations, DbPool};
use clearview_funnel::{FunnelSettings, HttpPropertyLookup, LookupError, SweepPolicy};
use clearview_notify::{transport_from_config, Mailer, TemplateError, TransportError};
use thiserror::Error;
use tracing::info;

use crate::api::{AppState, Backends};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub state: AppState,
    pub email_transport: &'static str,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("email transport setup failed: {0}")]
    EmailTransport(#[source] TransportError),
    #[error("email templates failed to compile: {0}")]
    EmailTemplates(#[source] TemplateError),
    #[error("property lookup client setup failed: {0}")]
    Lookup(#[source] LookupError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let transport = transport_from_config(&config.email).map_err(BootstrapError::EmailTransport)?;
    let mailer = Arc::new(
        Mailer::from_config(transport, &config.email).map_err(BootstrapError::EmailTemplates)?,
    );
    let email_transport = mailer.transport_name();
    let lookup = HttpPropertyLookup::from_config(&config.geo).map_err(BootstrapError::Lookup)?;
    info!(
        event_name = "system.bootstrap.integrations_ready",
        correlation_id = "bootstrap",
        email_transport,
        distance_configured = config.geo.distance_url.is_some(),
        estimate_configured = config.geo.estimate_url.is_some(),
        "email and property lookup clients initialized"
    );

    let state = AppState::assemble(
        Backends {
            quotes: Arc::new(SqlQuoteRepository::new(db_pool.clone())),
            services: Arc::new(SqlServiceRepository::new(db_pool.clone())),
            settings: Arc::new(SqlSettingsRepository::new(db_pool.clone())),
            mailer,
            lookup: Arc::new(lookup),
        },
        config.admin.clone(),
        FunnelSettings::from_config(&config.session),
        SweepPolicy::from_config(&config.followup),
    );

    Ok(Application { config, db_pool, state, email_transport })
}
