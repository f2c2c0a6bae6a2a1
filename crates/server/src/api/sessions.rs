//! Customer-facing calculator. Each call advances or edits one live session.

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use clearview_core::session::{FormPatch, SessionId};
use clearview_funnel::{SessionView, SubmitReceipt};

use super::{ApiError, ApiJson, ApiSuccess, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", post(start_session))
        .route("/api/sessions/{session_id}", get(view_session).delete(reset_session))
        .route("/api/sessions/{session_id}/fields", put(update_fields))
        .route("/api/sessions/{session_id}/property", post(resolve_property))
        .route("/api/sessions/{session_id}/square-footage", post(enter_square_footage))
        .route("/api/sessions/{session_id}/service", post(select_service))
        .route("/api/sessions/{session_id}/back", post(go_back))
        .route("/api/sessions/{session_id}/submit", post(submit))
        .route("/api/sessions/{session_id}/outside-area", post(submit_outside_area))
}

type ViewResponse = Result<Json<ApiSuccess<SessionView>>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct SquareFootageRequest {
    /// Accepted as typed by the customer ("2,000") or as a number.
    pub square_footage: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(flatten)]
    pub receipt: SubmitReceipt,
}

#[derive(Clone, Debug, Serialize)]
pub struct ResetResponse {
    pub success: bool,
    pub session_id: String,
}

pub async fn start_session(State(state): State<AppState>) -> Json<ApiSuccess<SessionView>> {
    ApiSuccess::new(state.funnel.start().await)
}

pub async fn view_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> ViewResponse {
    let view = state.funnel.view(&SessionId(session_id)).await?;
    Ok(ApiSuccess::new(view))
}

pub async fn update_fields(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ApiJson(patch): ApiJson<FormPatch>,
) -> ViewResponse {
    let view = state.funnel.update_fields(&SessionId(session_id), patch).await?;
    Ok(ApiSuccess::new(view))
}

pub async fn resolve_property(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ApiJson(patch): ApiJson<FormPatch>,
) -> ViewResponse {
    let view = state.funnel.resolve_property(&SessionId(session_id), patch).await?;
    Ok(ApiSuccess::new(view))
}

pub async fn enter_square_footage(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SquareFootageRequest>,
) -> ViewResponse {
    let raw = match request.square_footage {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        _ => String::new(),
    };
    let view = state.funnel.enter_square_footage(&SessionId(session_id), raw).await?;
    Ok(ApiSuccess::new(view))
}

pub async fn select_service(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ApiJson(patch): ApiJson<FormPatch>,
) -> ViewResponse {
    let view = state.funnel.select_service(&SessionId(session_id), patch).await?;
    Ok(ApiSuccess::new(view))
}

pub async fn go_back(Path(session_id): Path<String>, State(state): State<AppState>) -> ViewResponse {
    let view = state.funnel.back(&SessionId(session_id)).await?;
    Ok(ApiSuccess::new(view))
}

pub async fn submit(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ApiJson(patch): ApiJson<FormPatch>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let receipt = state.funnel.submit(&SessionId(session_id), patch).await?;
    Ok(Json(SubmitResponse { success: true, receipt }))
}

pub async fn submit_outside_area(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    ApiJson(patch): ApiJson<FormPatch>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let receipt = state.funnel.submit_outside_area(&SessionId(session_id), patch).await?;
    Ok(Json(SubmitResponse { success: true, receipt }))
}

pub async fn reset_session(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ResetResponse>, ApiError> {
    state.funnel.reset(&SessionId(session_id.clone())).await?;
    Ok(Json(ResetResponse { success: true, session_id }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};

    use clearview_db::repositories::QuoteRepository;
    use clearview_funnel::StaticPropertyLookup;

    use crate::api::testing::{send, test_app};

    fn contact(address: &str) -> Value {
        json!({
            "customer_name": "Dana Reyes",
            "customer_email": "dana@example.com",
            "customer_phone": "555-0142",
            "address": address,
            "stories": 1,
        })
    }

    async fn started(app: &axum::Router) -> String {
        let (status, body) = send(app, Method::POST, "/api/sessions", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["step"], "property_info");
        body["data"]["session_id"].as_str().expect("session id").to_string()
    }

    #[tokio::test]
    async fn full_calculator_run_prices_saves_and_emails() {
        let app = test_app(StaticPropertyLookup::new(Some(Decimal::from(4)), Some(2000)));
        let id = started(&app.router).await;

        let (status, body) = send(
            &app.router,
            Method::POST,
            &format!("/api/sessions/{id}/property"),
            None,
            Some(contact("12 Harbor Lane")),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["step"], "service_selection");
        assert_eq!(body["data"]["property"]["square_footage"], 2000);
        assert_eq!(body["data"]["options"][0]["name"], "Exterior Only Cleaning");
        assert_eq!(body["data"]["options"][0]["listed_price"], "200");

        let (status, body) = send(
            &app.router,
            Method::POST,
            &format!("/api/sessions/{id}/service"),
            None,
            Some(json!({ "service_type": "Exterior Only Cleaning", "stories": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["step"], "addons_and_submit");
        let price: Decimal = body["data"]["price"]["final_price"]
            .as_str()
            .expect("decimal string")
            .parse()
            .expect("decimal");
        assert_eq!(price, Decimal::from(200));

        let (status, body) = send(
            &app.router,
            Method::POST,
            &format!("/api/sessions/{id}/submit"),
            None,
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["success"], true);
        assert!(body["quote_id"].is_string());
        assert!(body["message"].as_str().expect("message").contains("within 24 hours"));

        assert_eq!(app.quotes.list(None, 10).await.expect("list").len(), 1);
        assert_eq!(app.transport.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn out_of_order_step_is_a_bad_request() {
        let app = test_app(StaticPropertyLookup::new(Some(Decimal::from(4)), Some(2000)));
        let id = started(&app.router).await;

        let (status, body) = send(
            &app.router,
            Method::POST,
            &format!("/api/sessions/{id}/service"),
            None,
            Some(json!({ "service_type": "Exterior Only Cleaning" })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn missing_contact_fields_are_reported() {
        let app = test_app(StaticPropertyLookup::new(Some(Decimal::from(4)), Some(2000)));
        let id = started(&app.router).await;

        let (status, body) = send(
            &app.router,
            Method::POST,
            &format!("/api/sessions/{id}/property"),
            None,
            Some(json!({
                "customer_name": "Dana Reyes",
                "address": "12 Harbor Lane",
                "stories": 1,
            })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Please fill in all required fields: email");
        assert!(app.quotes.list(None, 10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn mistyped_story_count_is_a_bad_request_envelope() {
        let app = test_app(StaticPropertyLookup::new(Some(Decimal::from(4)), Some(2000)));
        let id = started(&app.router).await;

        let mut payload = contact("12 Harbor Lane");
        payload["stories"] = json!("two");
        let (status, body) = send(
            &app.router,
            Method::POST,
            &format!("/api/sessions/{id}/property"),
            None,
            Some(payload),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert!(body["message"].as_str().expect("message").contains("stories"), "{body}");
        assert!(app.quotes.list(None, 10).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn far_address_branches_to_outside_area_contact() {
        let app = test_app(StaticPropertyLookup::new(Some(Decimal::from(25)), Some(2000)));
        let id = started(&app.router).await;

        let (_, body) = send(
            &app.router,
            Method::POST,
            &format!("/api/sessions/{id}/property"),
            None,
            Some(contact("900 Far Road")),
        )
        .await;
        assert_eq!(body["data"]["step"], "outside_area");
        assert!(body["data"]["notice"]
            .as_str()
            .expect("notice")
            .contains("typical 20-mile service area"));

        let (status, body) = send(
            &app.router,
            Method::POST,
            &format!("/api/sessions/{id}/outside-area"),
            None,
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["message"].as_str().expect("message").contains("availability and pricing"));

        let saved = app.quotes.list(None, 10).await.expect("list");
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].fields.status.as_str(), "outside_area");
    }

    #[tokio::test]
    async fn manual_square_footage_accepts_typed_numbers() {
        let app = test_app(StaticPropertyLookup::new(Some(Decimal::from(4)), None));
        let id = started(&app.router).await;

        let (_, body) = send(
            &app.router,
            Method::POST,
            &format!("/api/sessions/{id}/property"),
            None,
            Some(contact("12 Harbor Lane")),
        )
        .await;
        assert_eq!(body["data"]["needs_manual_square_footage"], true);

        let (status, _) = send(
            &app.router,
            Method::POST,
            &format!("/api/sessions/{id}/square-footage"),
            None,
            Some(json!({ "square_footage": 400 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app.router,
            Method::POST,
            &format!("/api/sessions/{id}/square-footage"),
            None,
            Some(json!({ "square_footage": "2,400" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["step"], "service_selection");
    }

    #[tokio::test]
    async fn unknown_and_reset_sessions_are_not_found() {
        let app = test_app(StaticPropertyLookup::new(Some(Decimal::from(4)), Some(2000)));

        let (status, body) =
            send(&app.router, Method::GET, "/api/sessions/does-not-exist", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Session not found");

        let id = started(&app.router).await;
        let (status, body) =
            send(&app.router, Method::DELETE, &format!("/api/sessions/{id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session_id"], id.as_str());

        let (status, _) =
            send(&app.router, Method::GET, &format!("/api/sessions/{id}"), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(app.state.funnel.live_sessions().await, 0);
    }
}
