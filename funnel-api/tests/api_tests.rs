//! Integration tests for funnel-api endpoints
//!
//! Every test runs the full router against an in-memory store with no
//! pixels, CRM key or voice key configured.

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
};
use funnel_api::{build_router, AppState};
use funnel_common::config::TomlConfig;
use funnel_common::db::{FunnelStore, MemoryStore, Table};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot` method

/// Test helper: router plus a handle on its store
fn setup_app() -> (axum::Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn FunnelStore> = store.clone();
    let state = AppState::new(shared, &TomlConfig::default()).expect("Should build state");
    (build_router(state), store)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn send_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

// =============================================================================
// Health and build info
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = setup_app();

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "funnel-api");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_buildinfo_endpoint() {
    let (app, _) = setup_app();

    let response = app.oneshot(get("/api/buildinfo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert!(body["git_hash"].is_string());
    assert!(body["build_profile"].is_string());
}

// =============================================================================
// Tracking
// =============================================================================

#[tokio::test]
async fn test_pageview_stores_utm_and_returns_session() {
    let (app, store) = setup_app();

    let request = send_json(
        "POST",
        "/api/track/pageview",
        json!({
            "page_url": "https://bridge.example/eva?utm_source=reddit&utm_campaign=launch",
            "referrer": "https://reddit.com/r/test",
            "screen_width": 390,
            "screen_height": 844
        }),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = extract_json(response.into_body()).await;
    assert!(!body["session_id"].as_str().unwrap().is_empty());
    assert_eq!(store.row_count(Table::Pageviews).await, 1);
}

#[tokio::test]
async fn test_pageview_keeps_given_session_id() {
    let (app, _) = setup_app();

    let request = send_json(
        "POST",
        "/api/track/pageview",
        json!({ "session_id": "abc-123", "page_url": "/" }),
    );
    let response = app.oneshot(request).await.unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["session_id"], "abc-123");
}

#[tokio::test]
async fn test_lead_preserves_source_and_shows_in_activity() {
    let (app, store) = setup_app();

    let request = send_json(
        "POST",
        "/api/track/lead",
        json!({
            "session_id": "s1",
            "page_url": "/?utm_source=instagram",
            "email": "  fan@example.com ",
            "source": "exit_popup"
        }),
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(store.row_count(Table::EmailSignups).await, 1);

    let response = app
        .oneshot(get("/api/analytics/recent-activity"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["type"], "lead");
    assert_eq!(items[0]["source"], "exit_popup");
    // Addresses are masked in the feed
    assert!(!items[0]["detail"].as_str().unwrap().contains("fan@"));
}

#[tokio::test]
async fn test_lead_with_invalid_email_is_rejected() {
    let (app, store) = setup_app();

    let request = send_json(
        "POST",
        "/api/track/lead",
        json!({ "page_url": "/", "email": "not-an-email", "source": "hero_form" }),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(store.row_count(Table::EmailSignups).await, 0);
}

#[tokio::test]
async fn test_click_is_recorded() {
    let (app, store) = setup_app();

    let request = send_json(
        "POST",
        "/api/track/click",
        json!({ "session_id": "s2", "page_url": "/?utm_source=tiktok" }),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(store.row_count(Table::OutboundClicks).await, 1);
}

#[tokio::test]
async fn test_custom_event_requires_name() {
    let (app, _) = setup_app();

    let response = app
        .clone()
        .oneshot(send_json("POST", "/api/track/event", json!({ "name": " " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(send_json(
            "POST",
            "/api/track/event",
            json!({ "name": "VideoPlay", "params": { "clip": 3 } }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

// =============================================================================
// Analytics
// =============================================================================

#[tokio::test]
async fn test_conversion_analytics_on_empty_store() {
    let (app, _) = setup_app();

    let response = app
        .oneshot(get("/api/analytics/conversion?range=30d"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["bridge_visits"], 0);
    assert_eq!(body["conversion_rate"], 0.0);
}

#[tokio::test]
async fn test_traffic_over_time_has_one_row_per_day() {
    let (app, _) = setup_app();

    let response = app
        .clone()
        .oneshot(get("/api/analytics/traffic-over-time?range=14d"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body.as_array().unwrap().len(), 14);

    // Unknown ranges fall back to a week
    let response = app
        .oneshot(get("/api/analytics/conversion-over-time?range=bogus"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body.as_array().unwrap().len(), 7);
}

#[tokio::test]
async fn test_funnel_counts_tracked_events() {
    let (app, _) = setup_app();

    for _ in 0..4 {
        app.clone()
            .oneshot(send_json("POST", "/api/track/pageview", json!({ "page_url": "/" })))
            .await
            .unwrap();
    }
    app.clone()
        .oneshot(send_json(
            "POST",
            "/api/track/lead",
            json!({ "page_url": "/", "email": "a@b.co", "source": "hero_form" }),
        ))
        .await
        .unwrap();

    let response = app.oneshot(get("/api/analytics/funnel")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    let stages = body.as_array().unwrap();
    assert_eq!(stages.len(), 4);
    assert_eq!(stages[0]["count"], 4);
    assert_eq!(stages[1]["count"], 1);
    assert_eq!(stages[1]["rate"], 0.25);
}

// =============================================================================
// Dashboard CRUD
// =============================================================================

#[tokio::test]
async fn test_dm_campaign_crud_cycle() {
    let (app, _) = setup_app();

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/dm-campaigns",
            json!({ "platform": "instagram", "dms_sent": 40, "responses": 10 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = extract_json(response.into_body()).await;
    let id = created["id"].as_i64().unwrap();

    let response = app
        .clone()
        .oneshot(send_json(
            "PATCH",
            &format!("/api/dm-campaigns/{}", id),
            json!({ "responses": 20 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The list reflects the update despite the cache
    let response = app.clone().oneshot(get("/api/dm-campaigns")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body[0]["responses"], 20);

    let response = app
        .clone()
        .oneshot(get("/api/analytics/dm-campaigns"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body[0]["response_rate"], 0.5);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/dm-campaigns/{}", id))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/dm-campaigns/{}", id))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dm_campaign_rejects_negative_counts() {
    let (app, _) = setup_app();

    let response = app
        .oneshot(send_json(
            "POST",
            "/api/dm-campaigns",
            json!({ "platform": "twitter", "dms_sent": -1, "responses": 0 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_scheduled_post_status_change() {
    let (app, _) = setup_app();

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/scheduled-posts",
            json!({
                "scheduled_at": "2026-10-20T15:00:00Z",
                "platform": "twitter",
                "title": "Teaser",
                "subreddit": "ignored"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = extract_json(response.into_body()).await;
    assert_eq!(created["status"], "scheduled");
    assert!(created["subreddit"].is_null());
    let id = created["id"].as_i64().unwrap();

    let response = app
        .oneshot(send_json(
            "PUT",
            &format!("/api/scheduled-posts/{}/status", id),
            json!({ "status": "posted", "posted_url": "https://x.com/p/1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "posted");
    assert_eq!(body["posted_url"], "https://x.com/p/1");
}

#[tokio::test]
async fn test_conversion_batch_feeds_analytics() {
    let (app, _) = setup_app();

    let response = app
        .clone()
        .oneshot(send_json(
            "POST",
            "/api/conversions",
            json!({ "new_subs": 3, "attributed_source": "reddit" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.clone().oneshot(get("/api/conversions")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let response = app
        .oneshot(get("/api/analytics/conversion?range=7d"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["conversions"], 3);
}

// =============================================================================
// CRM proxy
// =============================================================================

#[tokio::test]
async fn test_subscribe_rejects_invalid_email() {
    let (app, _) = setup_app();

    let response = app
        .oneshot(send_json("POST", "/api/subscribe", json!({ "email": "nope" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_subscribe_without_key_is_server_error() {
    let (app, _) = setup_app();

    let response = app
        .oneshot(send_json(
            "POST",
            "/api/subscribe",
            json!({ "email": "fan@example.com" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "CONFIG_ERROR");
}

// =============================================================================
// Request body rejections
// =============================================================================

#[tokio::test]
async fn test_malformed_body_uses_error_envelope() {
    let (app, _) = setup_app();

    let request = Request::builder()
        .method("POST")
        .uri("/api/subscribe")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(body["error"]["message"].as_str().is_some_and(|m| !m.is_empty()));
}

#[tokio::test]
async fn test_unknown_post_status_is_bad_request() {
    let (app, _) = setup_app();

    let response = app
        .oneshot(send_json(
            "PUT",
            "/api/scheduled-posts/1/status",
            json!({ "status": "archived" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_track_without_json_content_type_is_bad_request() {
    let (app, _) = setup_app();

    let request = Request::builder()
        .method("POST")
        .uri("/api/track/pageview")
        .body(Body::from(r#"{"page":"/"}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

// =============================================================================
// Voice relay
// =============================================================================

#[tokio::test]
async fn test_voice_requires_websocket_upgrade() {
    let (app, _) = setup_app();

    let response = app.oneshot(get("/voice")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_voice_upgrade_without_key_is_config_error() {
    use tokio_tungstenite::tungstenite::Error as WsError;

    let (app, _) = setup_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let result = tokio_tungstenite::connect_async(format!("ws://{}/voice", addr)).await;
    let response = match result {
        Err(WsError::Http(response)) => response,
        Err(other) => panic!("Expected HTTP refusal, got {}", other),
        Ok(_) => panic!("Upgrade should be refused without a voice key"),
    };
    assert_eq!(response.status().as_u16(), 500);

    let bytes = response.body().clone().unwrap_or_default();
    let body: Value = serde_json::from_slice(&bytes).expect("Should parse JSON");
    assert_eq!(body["error"]["code"], "CONFIG_ERROR");
    assert_eq!(body["error"]["message"], "OPENAI_API_KEY not configured");

    server.abort();
}
