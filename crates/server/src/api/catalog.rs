use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use clearview_core::domain::service::{Service, ServiceId, ServiceInput};
use clearview_core::domain::settings::{Settings, SettingsPatch};
use clearview_funnel::CatalogChange;

use super::auth::admin_guard;
use super::{ApiError, ApiJson, ApiSuccess, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/settings", get(get_settings))
        .route("/api/settings/update", post(update_settings))
        .route("/api/services", get(list_services).post(create_service))
        .route("/api/services/{service_id}", put(update_service).delete(delete_service))
}

#[derive(Clone, Debug, Serialize)]
pub struct DeletedService {
    pub id: String,
}

pub async fn get_settings(
    State(state): State<AppState>,
) -> Result<Json<ApiSuccess<Settings>>, ApiError> {
    let settings = state
        .settings
        .get_or_init()
        .await
        .map_err(|error| ApiError::repository(error, "settings"))?;
    Ok(ApiSuccess::new(settings))
}

/// Applies a partial edit. Nothing is written unless the whole patch
/// validates.
pub async fn update_settings(
    headers: HeaderMap,
    State(state): State<AppState>,
    ApiJson(patch): ApiJson<SettingsPatch>,
) -> Result<Json<ApiSuccess<Settings>>, ApiError> {
    admin_guard(&headers, &state.admin)?;

    let mut settings = state
        .settings
        .get_or_init()
        .await
        .map_err(|error| ApiError::repository(error, "settings"))?;
    settings.apply_patch(patch)?;
    state
        .settings
        .save(&settings)
        .await
        .map_err(|error| ApiError::repository(error, "settings"))?;

    let notified = state.catalog_events.publish(CatalogChange::SettingsUpdated);
    info!(
        event_name = "api.settings.updated",
        correlation_id = "admin",
        discount_enabled = settings.discount_enabled,
        discount_type = settings.discount_type.as_str(),
        notified,
        "settings updated"
    );
    Ok(ApiSuccess::new(settings))
}

pub async fn list_services(
    State(state): State<AppState>,
) -> Result<Json<ApiSuccess<Vec<Service>>>, ApiError> {
    let services = state
        .services
        .list()
        .await
        .map_err(|error| ApiError::repository(error, "services"))?;
    Ok(ApiSuccess::new(services))
}

pub async fn create_service(
    headers: HeaderMap,
    State(state): State<AppState>,
    ApiJson(input): ApiJson<ServiceInput>,
) -> Result<(StatusCode, Json<ApiSuccess<Service>>), ApiError> {
    admin_guard(&headers, &state.admin)?;

    let catalog = state
        .services
        .list()
        .await
        .map_err(|error| ApiError::repository(error, "services"))?;
    input.validate(&catalog, None)?;

    let now = Utc::now();
    let service = input.into_service(ServiceId::generate(), now, now);
    save_and_publish(&state, &service).await?;
    Ok((StatusCode::CREATED, ApiSuccess::new(service)))
}

pub async fn update_service(
    headers: HeaderMap,
    Path(service_id): Path<String>,
    State(state): State<AppState>,
    ApiJson(input): ApiJson<ServiceInput>,
) -> Result<Json<ApiSuccess<Service>>, ApiError> {
    admin_guard(&headers, &state.admin)?;

    let id = ServiceId(service_id);
    let existing = state
        .services
        .find_by_id(&id)
        .await
        .map_err(|error| ApiError::repository(error, id.0.clone()))?
        .ok_or_else(|| ApiError::not_found("Service", id.0.clone()))?;
    let catalog = state
        .services
        .list()
        .await
        .map_err(|error| ApiError::repository(error, id.0.clone()))?;
    input.validate(&catalog, Some(&id))?;

    let service = input.into_service(id, existing.created_at, Utc::now());
    save_and_publish(&state, &service).await?;
    Ok(ApiSuccess::new(service))
}

pub async fn delete_service(
    headers: HeaderMap,
    Path(service_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ApiSuccess<DeletedService>>, ApiError> {
    admin_guard(&headers, &state.admin)?;

    let id = ServiceId(service_id);
    let removed = state
        .services
        .delete(&id)
        .await
        .map_err(|error| ApiError::repository(error, id.0.clone()))?;
    if !removed {
        return Err(ApiError::not_found("Service", id.0));
    }

    state.catalog_events.publish(CatalogChange::ServiceDeleted(id.clone()));
    info!(
        event_name = "api.service.deleted",
        correlation_id = "admin",
        service_id = %id.0,
        "service deleted"
    );
    Ok(ApiSuccess::new(DeletedService { id: id.0 }))
}

async fn save_and_publish(state: &AppState, service: &Service) -> Result<(), ApiError> {
    state
        .services
        .save(service.clone())
        .await
        .map_err(|error| ApiError::repository(error, service.id.0.clone()))?;
    state.catalog_events.publish(CatalogChange::ServiceSaved(service.id.clone()));
    info!(
        event_name = "api.service.saved",
        correlation_id = "admin",
        service_id = %service.id.0,
        category = service.category.as_str(),
        is_active = service.is_active,
        "service saved"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use rust_decimal::Decimal;
    use serde_json::json;

    use clearview_core::session::FormPatch;
    use clearview_db::repositories::SettingsRepository;
    use clearview_funnel::StaticPropertyLookup;

    use crate::api::testing::{send, test_app, ADMIN_TOKEN};

    fn lookup() -> StaticPropertyLookup {
        StaticPropertyLookup::new(Some(Decimal::from(4)), Some(2000))
    }

    #[tokio::test]
    async fn settings_read_is_public_and_update_is_admin_only() {
        let app = test_app(lookup());

        let (status, body) = send(&app.router, Method::GET, "/api/settings", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["discount_percentage"], 15);

        let patch = json!({ "discount_enabled": true, "discount_type": "actual" });
        let (status, _) = send(
            &app.router,
            Method::POST,
            "/api/settings/update",
            None,
            Some(patch.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/settings/update",
            Some(ADMIN_TOKEN),
            Some(patch),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["discount_type"], "actual");

        let stored = app.settings.get_or_init().await.expect("settings");
        assert!(stored.discount_enabled);
    }

    #[tokio::test]
    async fn invalid_settings_patch_changes_nothing() {
        let app = test_app(lookup());

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/settings/update",
            Some(ADMIN_TOKEN),
            Some(json!({ "business_name": "Sparkle", "discount_percentage": 75 })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({ "success": false, "message": "Discount percentage must be between 0 and 50" })
        );
        let stored = app.settings.get_or_init().await.expect("settings");
        assert_ne!(stored.business_name, "Sparkle");
    }

    #[tokio::test]
    async fn mistyped_settings_patch_is_a_bad_request_envelope() {
        let app = test_app(lookup());

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/settings/update",
            Some(ADMIN_TOKEN),
            Some(json!({ "discount_enabled": "yes" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().expect("message").contains("discount_enabled"), "{body}");
        let stored = app.settings.get_or_init().await.expect("settings");
        assert!(!stored.discount_enabled);
    }

    #[tokio::test]
    async fn service_crud_validates_and_enforces_unique_names() {
        let app = test_app(lookup());

        let (status, body) = send(&app.router, Method::GET, "/api/services", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().expect("services").len(), 1);

        let screens = json!({ "name": "Screen Cleaning", "category": "addon", "flat_fee": "40" });
        let (status, _) =
            send(&app.router, Method::POST, "/api/services", None, Some(screens.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/api/services",
            Some(ADMIN_TOKEN),
            Some(screens.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let id = body["data"]["id"].as_str().expect("id").to_string();

        let (status, body) =
            send(&app.router, Method::POST, "/api/services", Some(ADMIN_TOKEN), Some(screens))
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().expect("message").contains("already exists"));

        let (status, _) = send(
            &app.router,
            Method::POST,
            "/api/services",
            Some(ADMIN_TOKEN),
            Some(json!({ "name": "Gutters", "category": "addon", "flat_fee": "-5" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app.router,
            Method::PUT,
            &format!("/api/services/{id}"),
            Some(ADMIN_TOKEN),
            Some(json!({ "name": "Screen Cleaning", "category": "addon", "flat_fee": "45" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["flat_fee"], "45");

        let (status, _) = send(
            &app.router,
            Method::DELETE,
            &format!("/api/services/{id}"),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app.router,
            Method::DELETE,
            &format!("/api/services/{id}"),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Service not found");
    }

    #[tokio::test]
    async fn settings_changes_reach_live_sessions() {
        let app = test_app(lookup());
        let funnel = &app.state.funnel;

        let session = funnel.start().await;
        let id = clearview_core::session::SessionId(session.session_id);
        funnel
            .resolve_property(
                &id,
                FormPatch {
                    customer_name: Some("Dana Reyes".to_string()),
                    customer_email: Some("dana@example.com".to_string()),
                    customer_phone: Some("555-0142".to_string()),
                    address: Some("12 Harbor Lane".to_string()),
                    stories: Some(1),
                    ..FormPatch::default()
                },
            )
            .await
            .expect("property");
        let before = funnel
            .select_service(
                &id,
                FormPatch {
                    service_type: Some("Exterior Only Cleaning".to_string()),
                    stories: Some(1),
                    ..FormPatch::default()
                },
            )
            .await
            .expect("service");
        assert_eq!(before.price.final_price, Decimal::from(200));

        let (status, _) = send(
            &app.router,
            Method::POST,
            "/api/settings/update",
            Some(ADMIN_TOKEN),
            Some(json!({ "discount_enabled": true, "discount_type": "actual", "discount_percentage": 10 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let after = funnel
            .update_fields(&id, FormPatch { has_skylights: Some(true), ..FormPatch::default() })
            .await
            .expect("edit");
        let display = after.display_price.expect("display price");
        assert_eq!(display.charged, Decimal::from(180));
        assert_eq!(display.original, Decimal::from(200));
    }
}
