use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use clearview_core::domain::quote::{
    QuoteFields, QuoteId, QuoteRecord, QuoteStatus, SaveOutcome,
};
use clearview_core::domain::service::{Service, ServiceId};
use clearview_core::domain::settings::Settings;

pub mod memory;
pub mod quote;
pub mod service;
pub mod settings;

pub use memory::{InMemoryQuoteRepository, InMemoryServiceRepository, InMemorySettingsRepository};
pub use quote::SqlQuoteRepository;
pub use service::SqlServiceRepository;
pub use settings::SqlSettingsRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait QuoteRepository: Send + Sync {
    async fn find_by_id(&self, id: &QuoteId) -> Result<Option<QuoteRecord>, RepositoryError>;

    /// Full-state upsert. A resolvable `existing` id is updated in place and
    /// keeps its `created_at`; anything else creates a new row.
    async fn save_draft(
        &self,
        existing: Option<&QuoteId>,
        fields: QuoteFields,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome, RepositoryError>;

    /// Newest first.
    async fn list(
        &self,
        status: Option<QuoteStatus>,
        limit: u32,
    ) -> Result<Vec<QuoteRecord>, RepositoryError>;

    async fn followup_candidates(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<QuoteRecord>, RepositoryError>;

    /// Whether a submitted quote with the same email and phone was created
    /// at or after the candidate.
    async fn has_later_submission(&self, candidate: &QuoteRecord) -> Result<bool, RepositoryError>;

    /// Sets `followup_sent_at` only if it is still unset. Returns whether this
    /// call won.
    async fn mark_followup_sent(
        &self,
        id: &QuoteId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    /// Ordered by category, display order, then name.
    async fn list(&self) -> Result<Vec<Service>, RepositoryError>;
    async fn find_by_id(&self, id: &ServiceId) -> Result<Option<Service>, RepositoryError>;
    async fn save(&self, service: Service) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &ServiceId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Reads the singleton, writing defaults first when none exist yet.
    async fn get_or_init(&self) -> Result<Settings, RepositoryError>;
    async fn save(&self, settings: &Settings) -> Result<(), RepositoryError>;
}

pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn parse_decimal(
    column: &str,
    value: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    value
        .map(|raw| {
            Decimal::from_str(raw.trim())
                .map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
        })
        .transpose()
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(value).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn to_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}

pub(crate) fn parse_enum<T>(column: &str, value: &str) -> Result<T, RepositoryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| RepositoryError::Decode(format!("{column}: {e}")))
}
