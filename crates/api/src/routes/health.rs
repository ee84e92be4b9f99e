//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
}

async fn store_status(state: &AppState) -> &'static str {
    match &state.store {
        None => "not_configured",
        Some(store) => match store.ping().await {
            Ok(()) => "healthy",
            Err(e) => {
                tracing::warn!(error = %e, "Analytics store ping failed");
                "unhealthy"
            }
        },
    }
}

/// Health check endpoint. A missing store is reported, not treated as down.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let store = store_status(&state).await;

    let (status_code, status) = match store {
        "healthy" => (StatusCode::OK, "healthy"),
        "not_configured" => (StatusCode::OK, "degraded"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store.to_string(),
        }),
    )
}

/// Liveness probe (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe (checks if the service is ready to accept traffic)
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match store_status(&state).await {
        "unhealthy" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}
