//! HTTP surface of the calculator: customer sessions, direct quote saves,
//! the follow-up trigger, and the admin catalog/quote endpoints.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};

use clearview_core::config::AdminConfig;
use clearview_core::domain::service::ServiceValidationError;
use clearview_core::domain::settings::SettingsValidationError;
use clearview_core::errors::{ApplicationError, DomainError, InterfaceError};
use clearview_db::repositories::{
    QuoteRepository, RepositoryError, ServiceRepository, SettingsRepository,
};
use clearview_funnel::{
    CatalogCache, CatalogEvents, FollowupSweep, FunnelDeps, FunnelError, FunnelSettings,
    PropertyLookup, QuoteSessionService, SweepPolicy, TracingAuditSink,
};
use clearview_notify::Mailer;

pub mod auth;
pub mod catalog;
pub mod quotes;
pub mod sessions;

/// Storage and integrations the API is assembled from.
pub struct Backends {
    pub quotes: Arc<dyn QuoteRepository>,
    pub services: Arc<dyn ServiceRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub mailer: Arc<Mailer>,
    pub lookup: Arc<dyn PropertyLookup>,
}

#[derive(Clone)]
pub struct AppState {
    pub funnel: Arc<QuoteSessionService>,
    pub sweep: Arc<FollowupSweep>,
    pub quotes: Arc<dyn QuoteRepository>,
    pub services: Arc<dyn ServiceRepository>,
    pub settings: Arc<dyn SettingsRepository>,
    pub catalog_events: CatalogEvents,
    pub admin: AdminConfig,
}

impl AppState {
    pub fn assemble(
        backends: Backends,
        admin: AdminConfig,
        funnel_settings: FunnelSettings,
        sweep_policy: SweepPolicy,
    ) -> Self {
        let Backends { quotes, services, settings, mailer, lookup } = backends;
        let catalog_events = CatalogEvents::default();
        let catalog =
            Arc::new(CatalogCache::new(services.clone(), settings.clone(), &catalog_events));

        let funnel = Arc::new(QuoteSessionService::new(
            FunnelDeps {
                quotes: quotes.clone(),
                catalog,
                lookup,
                mailer: mailer.clone(),
                audit: Arc::new(TracingAuditSink),
            },
            funnel_settings,
        ));
        let sweep =
            Arc::new(FollowupSweep::new(quotes.clone(), settings.clone(), mailer, sweep_policy));

        Self { funnel, sweep, quotes, services, settings, catalog_events, admin }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .merge(sessions::routes())
        .merge(quotes::routes())
        .merge(catalog::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Clone, Debug, Serialize)]
pub struct ApiSuccess<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiSuccess<T> {
    pub fn new(data: T) -> Json<Self> {
        Json(Self { success: true, data })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct ApiFailure {
    pub success: bool,
    pub message: String,
}

/// Every handler error, rendered as `{success: false, message}`.
#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    pub fn new(error: impl Into<ApplicationError>, correlation_id: impl Into<String>) -> Self {
        Self(error.into().into_interface(correlation_id))
    }

    pub fn unauthorized(correlation_id: impl Into<String>) -> Self {
        Self::new(ApplicationError::Unauthorized, correlation_id)
    }

    pub fn not_found(resource: &str, correlation_id: impl Into<String>) -> Self {
        Self::new(ApplicationError::NotFound { resource: resource.to_string() }, correlation_id)
    }

    pub fn repository(error: RepositoryError, correlation_id: impl Into<String>) -> Self {
        let application = match error {
            RepositoryError::Conflict(message) => {
                ApplicationError::Domain(DomainError::InvariantViolation(message))
            }
            other => ApplicationError::Persistence(other.to_string()),
        };
        Self::new(application, correlation_id)
    }

    pub fn status(&self) -> StatusCode {
        match self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Request body extractor whose rejections use the `ApiError` envelope
/// instead of axum's plain-text body.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state).await?;
        Ok(Self(value))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(InterfaceError::BadRequest {
            message: format!("Invalid request body: {}", rejection.body_text()),
            correlation_id: "request-body".to_string(),
        })
    }
}

impl From<FunnelError> for ApiError {
    fn from(value: FunnelError) -> Self {
        let correlation_id = match &value {
            FunnelError::SessionNotFound(id) => id.clone(),
            FunnelError::Transition(_) => "unassigned".to_string(),
        };
        Self::new(value, correlation_id)
    }
}

impl From<SettingsValidationError> for ApiError {
    fn from(value: SettingsValidationError) -> Self {
        Self::new(DomainError::from(value), "admin")
    }
}

impl From<ServiceValidationError> for ApiError {
    fn from(value: ServiceValidationError) -> Self {
        Self::new(DomainError::from(value), "admin")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                event_name = "api.request.failed",
                correlation_id = self.0.correlation_id(),
                status = status.as_u16(),
                error = %self.0,
                "request failed"
            );
        } else {
            warn!(
                event_name = "api.request.rejected",
                correlation_id = self.0.correlation_id(),
                status = status.as_u16(),
                error = %self.0,
                "request rejected"
            );
        }

        (status, Json(ApiFailure { success: false, message: self.0.user_message() }))
            .into_response()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use chrono::Utc;
    use rust_decimal::Decimal;
    use serde_json::Value;
    use tower::ServiceExt;

    use clearview_core::config::AdminConfig;
    use clearview_core::domain::service::{Service, ServiceCategory, ServiceId};
    use clearview_core::domain::settings::Settings;
    use clearview_db::repositories::{
        InMemoryQuoteRepository, InMemoryServiceRepository, InMemorySettingsRepository,
    };
    use clearview_funnel::{FunnelSettings, StaticPropertyLookup, SweepPolicy};
    use clearview_notify::{DeliveryPolicy, EmailTemplates, Mailer, RecordingTransport};

    use super::{router, AppState, Backends};

    pub const ADMIN_TOKEN: &str = "admin-test-token";
    pub const CRON_SECRET: &str = "cron-test-secret";

    pub struct TestApp {
        pub router: Router,
        pub state: AppState,
        pub quotes: Arc<InMemoryQuoteRepository>,
        pub settings: Arc<InMemorySettingsRepository>,
        pub transport: Arc<RecordingTransport>,
    }

    pub fn exterior_service() -> Service {
        let now = Utc::now();
        Service {
            id: ServiceId("svc-exterior".to_string()),
            name: "Exterior Only Cleaning".to_string(),
            description: None,
            category: ServiceCategory::Main,
            per_sqft_price: Some(Decimal::new(10, 2)),
            flat_fee: None,
            use_both_pricing: false,
            minimum_price: None,
            is_active: true,
            display_order: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn test_app(lookup: StaticPropertyLookup) -> TestApp {
        let quotes = Arc::new(InMemoryQuoteRepository::default());
        let settings = Arc::new(InMemorySettingsRepository::with_settings(Settings::default()));
        let transport = Arc::new(RecordingTransport::new());
        let mailer = Arc::new(Mailer::new(
            transport.clone(),
            EmailTemplates::new().expect("templates"),
            DeliveryPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 },
            Some("office@example.com".to_string()),
        ));

        let state = AppState::assemble(
            Backends {
                quotes: quotes.clone(),
                services: Arc::new(InMemoryServiceRepository::with_services([
                    exterior_service(),
                ])),
                settings: settings.clone(),
                mailer,
                lookup: Arc::new(lookup),
            },
            AdminConfig {
                token: Some(ADMIN_TOKEN.to_string().into()),
                cron_secret: Some(CRON_SECRET.to_string().into()),
            },
            FunnelSettings::default(),
            SweepPolicy { grace: chrono::Duration::minutes(10), pacing: std::time::Duration::ZERO },
        );

        TestApp { router: router(state.clone()), state, quotes, settings, transport }
    }

    pub async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        send_raw(app, method, uri, bearer, body.map(|body| body.to_string())).await
    }

    /// Like `send`, but the body goes out verbatim so malformed JSON can be posted.
    pub async fn send_raw(
        app: &Router,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: Option<String>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body)),
            None => request.body(Body::empty()),
        }
        .expect("request");

        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }
}
