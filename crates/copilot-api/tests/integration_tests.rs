//! Integration tests for the Copilot API.
//!
//! Each test builds its own router over an in-memory seeded database and
//! the network-free demo backend.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use serde_json::Value;
use tower::ServiceExt;

use copilot_api::error::ErrorBody;
use copilot_api::handlers::HealthResponse;
use copilot_api::{create_router, AppState};
use copilot_chat::backend::DemoBackend;
use copilot_chat::AnalyticsAssistant;
use copilot_core::config::CopilotConfig;
use copilot_core::ChatPayload;
use copilot_sql::SqlToolGate;
use copilot_storage::{seed_demo_data, Database, SqliteRepository};

// =============================================================================
// Helpers
// =============================================================================

fn make_state() -> AppState {
    let db = Arc::new(Database::in_memory().unwrap());
    let repo = SqliteRepository::new(db);
    seed_demo_data(&repo, NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()).unwrap();
    let gate = SqlToolGate::new(Arc::new(repo), "retail_sales");
    let assistant = AnalyticsAssistant::new(Arc::new(DemoBackend::new()), Arc::new(gate), "system");
    AppState::new(CopilotConfig::default(), assistant)
}

fn make_app() -> axum::Router {
    create_router(make_state())
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), 16 * 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_healthz() {
    let resp = make_app()
        .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let health: HealthResponse = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.backend, "demo");
}

// =============================================================================
// Chat
// =============================================================================

#[tokio::test]
async fn test_chat_default_question() {
    let resp = make_app()
        .oneshot(post_json("/chat", r#"{"message": "How are sales trending?"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let payload: ChatPayload = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(payload.answer, "Here is a breakdown of net sales over time by region.");
    // 120 days x 4 regions
    assert_eq!(payload.rows.as_ref().unwrap().len(), 480);
    let schema = payload.schema.unwrap();
    let names: Vec<&str> = schema.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["date", "region", "net_sales"]);
    assert_eq!(schema[0].column_type, "date");
}

#[tokio::test]
async fn test_chat_payload_shape() {
    let resp = make_app()
        .oneshot(post_json("/chat", r#"{"message": "top products by sales"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json: Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert!(json["answer"].is_string());
    assert!(json["sql"].as_str().unwrap().starts_with("SELECT sku"));
    assert_eq!(json["viz"]["type"], "bar");
    assert_eq!(json["rows"].as_array().unwrap().len(), 8);
    assert!(json["rows"][0]["net_sales"].is_number());
}

#[tokio::test]
async fn test_chat_empty_message_is_bad_request() {
    let resp = make_app()
        .oneshot(post_json("/chat", r#"{"message": "   "}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(body.error, "bad_request");
    assert_eq!(body.message, "message cannot be empty");
}

#[tokio::test]
async fn test_chat_too_long_is_bad_request() {
    let long = "a".repeat(4001);
    let resp = make_app()
        .oneshot(post_json("/chat", &format!(r#"{{"message": "{long}"}}"#)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_chat_malformed_json_is_bad_request() {
    let resp = make_app()
        .oneshot(post_json("/chat", "{not json"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(body.error, "bad_request");
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let resp = make_app()
        .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
