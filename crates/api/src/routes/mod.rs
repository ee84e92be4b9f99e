//! API routes

pub mod collect;
pub mod filter_settings;
pub mod health;
pub mod purge;
pub mod report;
pub mod whoami;

use axum::{
    http::{HeaderMap, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{auth::optional_auth, state::AppState};

/// Extract client IP address from request headers.
/// Checks common proxy headers in order of preference.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("cf-connecting-ip") // Cloudflare
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
}

const COUNTRY_HEADERS: &[&str] = &["cf-ipcountry", "x-vercel-ip-country", "x-country-code"];
const CITY_HEADERS: &[&str] = &["x-vercel-ip-city", "cf-ipcity", "x-city"];

fn first_header(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|h| h.to_str().ok())
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

/// Country as reported by the edge
pub fn extract_country(headers: &HeaderMap) -> Option<String> {
    first_header(headers, COUNTRY_HEADERS)
}

/// City as reported by the edge. Vercel percent-encodes non-ASCII names.
pub fn extract_city(headers: &HeaderMap) -> Option<String> {
    let raw = first_header(headers, CITY_HEADERS)?;
    let decoded = url::form_urlencoded::parse(format!("v={}", raw).as_bytes())
        .next()
        .map(|(_, v)| v.trim().to_string())
        .unwrap_or(raw);
    Some(decoded).filter(|c| !c.is_empty())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth = middleware::from_fn_with_state(state.clone(), optional_auth);

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Website analytics collection (public with optional auth for admin exclusion)
    let public_api_routes = Router::new().route("/analytics/collect", post(collect::collect));

    let admin_api_routes = Router::new()
        .route("/admin/analytics/report", get(report::get_report))
        .route("/admin/analytics/purge", post(purge::purge))
        .route(
            "/admin/analytics/filter",
            get(filter_settings::get_filter).put(filter_settings::put_filter),
        )
        .route("/admin/analytics/whoami", get(whoami::whoami));

    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(admin_api_routes)
        .layer(auth);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.cors_allowed_origins))
        .with_state(state)
}
