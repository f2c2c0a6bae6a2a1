use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use clearview_core::domain::quote::{
    AdditionalServices, QuoteFields, QuoteId, QuoteRecord, QuoteStatus, SaveAction,
    WindowDetails,
};
use clearview_core::errors::DomainError;
use clearview_funnel::SweepReport;

use super::auth::{admin_guard, cron_guard};
use super::{ApiError, ApiJson, ApiSuccess, AppState};

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 500;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/quotes", post(submit_quote))
        .route("/api/quotes/incomplete", post(save_incomplete_quote))
        .route("/api/quotes/outside-area", post(save_outside_area_quote))
        .route("/api/admin/quotes", get(list_quotes))
        .route("/api/admin/quotes/{quote_id}", get(get_quote))
        .route(
            "/api/cron/check-incomplete-quotes",
            get(run_followup_sweep).post(run_followup_sweep),
        )
}

/// A whole quote as posted by a client that manages its own form state.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuotePayload {
    pub existing_quote_id: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub address: Option<String>,
    pub stories: Option<u32>,
    pub service_type: Option<String>,
    pub square_footage: Option<u32>,
    pub addons: Vec<String>,
    pub has_skylights: bool,
    pub additional_services: AdditionalServices,
    pub window_details: WindowDetails,
    pub distance: Option<Decimal>,
    pub final_price: Option<Decimal>,
    pub status: Option<QuoteStatus>,
    pub last_step_completed: Option<u8>,
    pub quote_data: Value,
}

impl QuotePayload {
    fn into_parts(self, status: QuoteStatus, last_step_completed: u8) -> (Option<QuoteId>, QuoteFields) {
        let existing = non_blank(self.existing_quote_id).map(QuoteId);
        let fields = QuoteFields {
            customer_name: non_blank(self.customer_name),
            customer_email: non_blank(self.customer_email),
            customer_phone: non_blank(self.customer_phone),
            address: non_blank(self.address),
            stories: self.stories,
            service_type: non_blank(self.service_type),
            square_footage: self.square_footage,
            addons: self.addons,
            has_skylights: self.has_skylights,
            additional_services: self.additional_services,
            window_details: self.window_details,
            distance: self.distance,
            final_price: self.final_price,
            status,
            last_step_completed: last_step_completed.clamp(1, 4),
            quote_data: self.quote_data,
        };
        (existing, fields)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

#[derive(Clone, Debug, Serialize)]
pub struct DraftSaved {
    pub success: bool,
    pub id: String,
    pub action: SaveAction,
}

#[derive(Clone, Debug, Serialize)]
pub struct QuoteSaved {
    pub success: bool,
    pub id: String,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SweepResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: SweepReport,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct QuoteListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

/// Create-or-update of an abandoned-form draft. An unknown
/// `existing_quote_id` creates a new row.
pub async fn save_incomplete_quote(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<QuotePayload>,
) -> Result<Json<DraftSaved>, ApiError> {
    let status = payload.status.unwrap_or(QuoteStatus::Incomplete);
    let step = payload.last_step_completed.unwrap_or(1);
    let (existing, fields) = payload.into_parts(status, step);

    let outcome = state
        .quotes
        .save_draft(existing.as_ref(), fields, Utc::now())
        .await
        .map_err(|error| ApiError::repository(error, "quote-draft"))?;
    info!(
        event_name = "api.quote.draft_saved",
        correlation_id = "quote-draft",
        quote_id = %outcome.id.0,
        action = ?outcome.action,
        status = status.as_str(),
        "incomplete quote saved"
    );

    Ok(Json(DraftSaved { success: true, id: outcome.id.0, action: outcome.action }))
}

pub async fn submit_quote(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<QuotePayload>,
) -> Result<Json<QuoteSaved>, ApiError> {
    save_final(&state, payload, QuoteStatus::Submitted, "Quote submitted successfully").await
}

pub async fn save_outside_area_quote(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<QuotePayload>,
) -> Result<Json<QuoteSaved>, ApiError> {
    save_final(&state, payload, QuoteStatus::OutsideArea, "Outside-area request received").await
}

async fn save_final(
    state: &AppState,
    payload: QuotePayload,
    status: QuoteStatus,
    message: &str,
) -> Result<Json<QuoteSaved>, ApiError> {
    // Submitted and outside-area records both close out the form.
    let (existing, fields) = payload.into_parts(status, 4);
    if fields.customer_email.is_none() {
        return Err(ApiError::new(
            DomainError::InvariantViolation("customer_email is required".to_string()),
            "quote-submit",
        ));
    }

    let outcome = state
        .quotes
        .save_draft(existing.as_ref(), fields, Utc::now())
        .await
        .map_err(|error| ApiError::repository(error, "quote-submit"))?;
    info!(
        event_name = "api.quote.saved",
        correlation_id = "quote-submit",
        quote_id = %outcome.id.0,
        action = ?outcome.action,
        status = status.as_str(),
        "quote saved"
    );

    Ok(Json(QuoteSaved { success: true, id: outcome.id.0, message: message.to_string() }))
}

pub async fn list_quotes(
    headers: HeaderMap,
    State(state): State<AppState>,
    Query(query): Query<QuoteListQuery>,
) -> Result<Json<ApiSuccess<Vec<QuoteRecord>>>, ApiError> {
    admin_guard(&headers, &state.admin)?;

    let status = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != "all")
        .map(str::parse::<QuoteStatus>)
        .transpose()
        .map_err(|error| ApiError::new(error, "admin"))?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let quotes = state
        .quotes
        .list(status, limit)
        .await
        .map_err(|error| ApiError::repository(error, "admin"))?;
    Ok(ApiSuccess::new(quotes))
}

pub async fn get_quote(
    headers: HeaderMap,
    Path(quote_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ApiSuccess<QuoteRecord>>, ApiError> {
    admin_guard(&headers, &state.admin)?;

    let quote = state
        .quotes
        .find_by_id(&QuoteId(quote_id.clone()))
        .await
        .map_err(|error| ApiError::repository(error, quote_id.clone()))?
        .ok_or_else(|| ApiError::not_found("Quote", quote_id))?;
    Ok(ApiSuccess::new(quote))
}

pub async fn run_followup_sweep(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<SweepResponse>, ApiError> {
    cron_guard(&headers, &state.admin)?;

    let report = state
        .sweep
        .run(Utc::now())
        .await
        .map_err(|error| ApiError::repository(error, "followup"))?;
    Ok(Json(SweepResponse { success: true, report }))
}
