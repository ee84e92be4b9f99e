//! Router-level tests for the analytics endpoints
//!
//! Every test drives the full axum router with `oneshot` against the
//! in-memory store, so no database is needed.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use time::Duration;
use tower::ServiceExt;
use vitrine_api::{
    auth::JwtManager,
    config::{Config, StoreKind},
    create_router,
    store::MemoryStore,
    AppState,
};

// ============================================================================
// Test Utilities
// ============================================================================

const JWT_SECRET: &str = "integration-jwt-secret-at-least-32-characters";
const PURGE_SECRET: &str = "integration-purge-secret-at-least-32-chars";
const FIREFOX_UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
const CRAWLER_UA: &str = "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)";

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".to_string(),
        cors_allowed_origins: vec!["*".to_string()],
        store: StoreKind::Memory,
        database_url: None,
        database_max_connections: 1,
        run_migrations: false,
        identity_hash_salt: "integration-salt-0001".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        purge_secret: Some(PURGE_SECRET.to_string()),
        admin_roles: vec!["admin".to_string()],
    }
}

fn setup() -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::with_memory(test_config(), store.clone());
    (create_router(state), store)
}

fn setup_unconfigured() -> Router {
    let mut config = test_config();
    config.store = StoreKind::Postgres;
    create_router(AppState::unconfigured(config))
}

fn token(role: &str) -> String {
    JwtManager::new(JWT_SECRET)
        .issue("user-1", role, Some("ops@example.com"), Duration::hours(1))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn collect(app: &Router, body: Value, ua: &str, extra: &[(&str, &str)]) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/analytics/collect")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, ua);
    for (k, v) in extra {
        builder = builder.header(*k, *v);
    }
    let response = app
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn admin_request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token("admin")));
    let body = match body {
        Some(b) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(b.to_string())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn report(app: &Router) -> Value {
    let (status, body) = admin_request(app, "GET", "/api/v1/admin/analytics/report?days=7", None).await;
    assert_eq!(status, StatusCode::OK, "report failed: {}", body);
    body
}

fn pageview(session_id: &str, duration: i64) -> Value {
    json!({
        "sessionId": session_id,
        "eventType": "pageview",
        "path": "/",
        "duration": duration,
        "session": { "device": "desktop", "os": "Linux", "browser": "Firefox" }
    })
}

// ============================================================================
// Ingest
// ============================================================================

#[tokio::test]
async fn test_crawler_counts_only_after_human_validation() {
    let (app, _store) = setup();

    let (status, body) = collect(&app, pageview("crawler-1", 50), CRAWLER_UA, &[("x-real-ip", "203.0.113.10")]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    let before = report(&app).await;
    assert_eq!(before["kpis"]["unique_visitors"], 0);
    assert_eq!(before["filter"]["removed_as_bots"], 1);

    let (status, body) = collect(
        &app,
        json!({ "sessionId": "crawler-1", "humanValidated": true }),
        CRAWLER_UA,
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    let after = report(&app).await;
    assert_eq!(after["kpis"]["unique_visitors"], 1);
    assert_eq!(after["visitors"][0]["human_validated"], true);
}

#[tokio::test]
async fn test_human_validation_ping_creates_no_event() {
    let (app, store) = setup();
    collect(&app, pageview("s1", 4_000), FIREFOX_UA, &[]).await;
    collect(&app, json!({ "sessionId": "s1", "humanValidated": true }), FIREFOX_UA, &[]).await;
    // Unknown session: a no-op, still ok
    let (status, _) = collect(&app, json!({ "sessionId": "ghost", "humanValidated": true }), FIREFOX_UA, &[]).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(store.event_count().await, 1);
    assert_eq!(store.session_count().await, 1);
    assert_eq!(store.session("s1").await.unwrap().human_validated, Some(true));
}

#[tokio::test]
async fn test_authenticated_visits_write_nothing() {
    let (app, store) = setup();

    let mut body = pageview("editor", 3_000);
    body["isAuthenticated"] = json!(true);
    let (status, resp) = collect(&app, body, FIREFOX_UA, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp, json!({ "ok": true }));

    let bearer = format!("Bearer {}", token("editor"));
    let (status, _) = collect(
        &app,
        pageview("editor-2", 3_000),
        FIREFOX_UA,
        &[("authorization", bearer.as_str())],
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(store.session_count().await, 0);
    assert_eq!(store.event_count().await, 0);
}

#[tokio::test]
async fn test_collect_validation() {
    let (app, store) = setup();

    let (status, body) = collect(&app, json!({ "sessionId": "s", "eventType": "scroll" }), FIREFOX_UA, &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, _) = collect(&app, json!({ "sessionId": "s" }), FIREFOX_UA, &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let long_id = "x".repeat(129);
    let (status, _) = collect(&app, pageview(&long_id, 1_000), FIREFOX_UA, &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(store.session_count().await, 0);
}

#[tokio::test]
async fn test_referrer_is_sticky_and_hash_stable() {
    let (app, store) = setup();

    let mut first = pageview("s1", 2_000);
    first["referrer"] = json!("https://www.google.com/search?q=vitrine");
    collect(&app, first, FIREFOX_UA, &[("x-forwarded-for", "198.51.100.7, 10.0.0.1")]).await;

    let mut second = pageview("s1", 2_000);
    second["referrer"] = json!("https://www.facebook.com/");
    collect(&app, second, FIREFOX_UA, &[("x-forwarded-for", "198.51.100.99")]).await;

    let session = store.session("s1").await.unwrap();
    assert_eq!(session.referrer.as_deref(), Some("https://www.google.com/search?q=vitrine"));
    assert_eq!(session.raw_address.as_deref(), Some("198.51.100.7"));
    assert_eq!(store.event_count().await, 2);

    let body = report(&app).await;
    assert_eq!(body["sources"][0]["source"], "Google");
}

// ============================================================================
// Reporting
// ============================================================================

#[tokio::test]
async fn test_geography_buckets_known_and_unknown() {
    let (app, _store) = setup();
    let (status, _) = admin_request(
        &app,
        "PUT",
        "/api/v1/admin/analytics/filter",
        Some(json!({ "excludeBots": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    collect(&app, pageview("fr", 2_000), FIREFOX_UA, &[("cf-ipcountry", "France")]).await;
    collect(&app, pageview("blank", 0), FIREFOX_UA, &[]).await;

    let body = report(&app).await;
    let countries = body["countries"].as_array().unwrap();
    assert_eq!(countries.len(), 2);
    let find = |label: &str| countries.iter().find(|c| c["label"] == label).unwrap().clone();
    assert_eq!(find("France")["count"], 1);
    assert_eq!(find("France")["avg_time_ms"], 2000);
    assert_eq!(find("unknown")["count"], 1);
    assert_eq!(find("unknown")["avg_time_ms"], 0);
}

#[tokio::test]
async fn test_exclude_filter_hides_operator() {
    let (app, _store) = setup();
    collect(&app, pageview("me", 5_000), FIREFOX_UA, &[("x-real-ip", "192.0.2.1")]).await;
    collect(&app, pageview("them", 5_000), FIREFOX_UA, &[("x-real-ip", "192.0.2.2")]).await;

    let (status, me) = admin_request(&app, "GET", "/api/v1/admin/analytics/whoami", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["address"], Value::Null);

    let (status, saved) = admin_request(
        &app,
        "PUT",
        "/api/v1/admin/analytics/filter",
        Some(json!({ "exclude": [" 192.0.2.1 ", "192.0.2.1"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["exclude"], json!(["192.0.2.1"]));
    assert_eq!(saved["excludeBots"], true);

    let body = report(&app).await;
    assert_eq!(body["kpis"]["unique_visitors"], 1);
    assert_eq!(body["visitors"][0]["session_id"], "them");
    assert_eq!(body["filter"]["exclude_entries"], 1);
    // Raw addresses never leave the server
    assert!(body["visitors"][0].get("raw_address").is_none());
}

#[tokio::test]
async fn test_admin_routes_require_privileged_token() {
    let (app, _store) = setup();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/analytics/report")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/analytics/report")
                .header(header::AUTHORIZATION, format!("Bearer {}", token("editor")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invalid_period_rejected() {
    let (app, _store) = setup();
    let (status, body) =
        admin_request(&app, "GET", "/api/v1/admin/analytics/report?period=fortnight", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

// ============================================================================
// Purge
// ============================================================================

#[tokio::test]
async fn test_bots_purge_removes_validated_short_session() {
    let (app, store) = setup();
    collect(&app, pageview("short", 800), FIREFOX_UA, &[]).await;
    collect(&app, json!({ "sessionId": "short", "humanValidated": true }), FIREFOX_UA, &[]).await;
    collect(&app, pageview("reader", 45_000), FIREFOX_UA, &[]).await;

    let (status, body) = admin_request(&app, "POST", "/api/v1/admin/analytics/purge?bots=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "deleted": 1, "policy": "bots" }));
    assert!(store.session("short").await.is_none());
    assert!(store.session("reader").await.is_some());
}

#[tokio::test]
async fn test_purge_all_cascades_events() {
    let (app, store) = setup();
    for id in ["a", "b", "c"] {
        collect(&app, pageview(id, 5_000), FIREFOX_UA, &[]).await;
        collect(
            &app,
            json!({ "sessionId": id, "eventType": "click", "elementId": "button|Contact" }),
            FIREFOX_UA,
            &[],
        )
        .await;
    }
    assert_eq!(store.event_count().await, 6);

    let (status, body) = admin_request(&app, "POST", "/api/v1/admin/analytics/purge?all=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], 3);
    assert_eq!(store.session_count().await, 0);
    assert_eq!(store.event_count().await, 0);
}

#[tokio::test]
async fn test_purge_secret_authorizes_without_jwt() {
    let (app, store) = setup();
    collect(&app, pageview("fresh", 5_000), FIREFOX_UA, &[]).await;

    let request = |secret: &str| {
        Request::builder()
            .method("POST")
            .uri("/api/v1/admin/analytics/purge")
            .header("x-purge-secret", secret)
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(request("wrong")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.clone().oneshot(request(PURGE_SECRET)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    // Retention purge: recent sessions survive
    assert_eq!(body, json!({ "ok": true, "deleted": 0, "policy": "retention" }));
    assert_eq!(store.session_count().await, 1);
}

#[tokio::test]
async fn test_conflicting_purge_selectors_rejected() {
    let (app, store) = setup();
    collect(&app, pageview("keep", 5_000), FIREFOX_UA, &[]).await;

    let (status, body) =
        admin_request(&app, "POST", "/api/v1/admin/analytics/purge?all=1&bots=1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert_eq!(store.session_count().await, 1);
}

#[tokio::test]
async fn test_purge_by_hash_and_address() {
    let (app, store) = setup();
    collect(&app, pageview("one", 5_000), FIREFOX_UA, &[("x-real-ip", "192.0.2.1")]).await;
    collect(&app, pageview("two", 5_000), FIREFOX_UA, &[("x-real-ip", "192.0.2.2")]).await;
    collect(&app, pageview("three", 5_000), FIREFOX_UA, &[("x-real-ip", "192.0.2.3")]).await;

    let hash = store.session("one").await.unwrap().identity_hash.unwrap();
    let uri = format!("/api/v1/admin/analytics/purge?hash={}", hash);
    let (status, body) = admin_request(&app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["policy"], "hashes");
    assert_eq!(body["deleted"], 1);

    let (status, body) =
        admin_request(&app, "POST", "/api/v1/admin/analytics/purge?ips=192.0.2.2,192.0.2.9", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["policy"], "ips");
    assert_eq!(body["deleted"], 1);
    assert!(store.session("three").await.is_some());
}

// ============================================================================
// Not configured
// ============================================================================

#[tokio::test]
async fn test_unconfigured_store_degrades_quietly() {
    let app = setup_unconfigured();

    let (status, body) = collect(&app, pageview("s", 1_000), FIREFOX_UA, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "configured": false }));

    let body = report(&app).await;
    assert_eq!(body["configured"], false);
    assert_eq!(body["kpis"]["unique_visitors"], 0);
    assert_eq!(body["timeseries"].as_array().unwrap().len(), 7);

    let (status, body) = admin_request(&app, "POST", "/api/v1/admin/analytics/purge?all=1", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "NOT_CONFIGURED");

    let (status, _) = admin_request(
        &app,
        "PUT",
        "/api/v1/admin/analytics/filter",
        Some(json!({ "exclude": ["192.0.2.1"] })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, body) = admin_request(&app, "GET", "/api/v1/admin/analytics/filter", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["configured"], false);
}

#[tokio::test]
async fn test_health_probes() {
    let (app, _store) = setup();
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");

    let response = setup_unconfigured()
        .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
