//! Website analytics collection
//!
//! Public endpoint called by the tracking snippet for pageviews, clicks,
//! custom events and the out-of-band human validation ping.

use axum::{
    extract::{Extension, State},
    http::{header, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use vitrine_shared::{bot, Event, EventType, Session};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    routes::{extract_city, extract_client_ip, extract_country},
    state::AppState,
};

pub const MAX_SESSION_ID_LEN: usize = 128;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ClientInfo {
    pub device: Option<String>,
    pub os: Option<String>,
    pub browser: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectRequest {
    /// Client-generated session id (from sessionStorage)
    pub session_id: String,
    pub session: Option<ClientInfo>,
    pub event_type: Option<String>,
    pub path: Option<String>,
    pub element_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Milliseconds
    pub duration: Option<f64>,
    pub is_authenticated: Option<bool>,
    pub referrer: Option<String>,
    pub human_validated: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CollectResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configured: Option<bool>,
}

impl CollectResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            ok: true,
            configured: None,
        })
    }

    fn not_configured() -> Json<Self> {
        Json(Self {
            ok: true,
            configured: Some(false),
        })
    }
}

fn validate_session_id(raw: &str) -> ApiResult<String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(ApiError::Validation("sessionId is required".to_string()));
    }
    if id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(ApiError::Validation(format!(
            "sessionId must be at most {} characters",
            MAX_SESSION_ID_LEN
        )));
    }
    Ok(id.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// Handler
// =============================================================================

/// Record one event (or the human validation ping)
pub async fn collect(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth_user: Option<Extension<AuthUser>>,
    Json(req): Json<CollectRequest>,
) -> ApiResult<Json<CollectResponse>> {
    let session_id = validate_session_id(&req.session_id)?;
    let now = OffsetDateTime::now_utc();

    // Human validation ping: flag only, never an event row
    if req.human_validated == Some(true) && req.event_type.is_none() {
        if let Some(store) = &state.store {
            match store.mark_human_validated(&session_id, now).await {
                Ok(updated) => {
                    tracing::debug!(session_id = %session_id, updated, "Human validation ping")
                }
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Failed to record human validation")
                }
            }
        }
        return Ok(CollectResponse::ok());
    }

    // Authenticated visits (editors, admins) are never recorded
    if req.is_authenticated == Some(true) || auth_user.is_some() {
        return Ok(CollectResponse::ok());
    }

    let Some(store) = &state.store else {
        return Ok(CollectResponse::not_configured());
    };

    let event_type: EventType = req
        .event_type
        .as_deref()
        .ok_or_else(|| ApiError::Validation("eventType is required".to_string()))?
        .parse()
        .map_err(ApiError::Validation)?;

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ua| !ua.is_empty())
        .map(str::to_string);
    let address = extract_client_ip(&headers);
    let client = req.session.unwrap_or_default();

    let mut session = Session::new(session_id.clone(), now);
    session.identity_hash = state.hasher.hash(address.as_deref());
    session.raw_address = address;
    session.device = non_blank(client.device);
    session.os = non_blank(client.os);
    session.browser = non_blank(client.browser);
    session.country = extract_country(&headers);
    session.city = extract_city(&headers);
    session.referrer = non_blank(req.referrer);
    session.is_bot = Some(bot::is_bot_user_agent(user_agent.as_deref()));
    session.user_agent = user_agent;

    store.upsert_session(&session).await?;

    let mut event = Event::new(session_id, event_type, now);
    event.path = non_blank(req.path);
    event.element_id = non_blank(req.element_id);
    if let Some(metadata) = req.metadata.filter(|m| !m.is_null()) {
        event.metadata = metadata;
    }
    event.duration = req
        .duration
        .filter(|d| d.is_finite())
        .map(|d| d.round() as i64);

    store.insert_event(&event).await?;

    tracing::debug!(
        session_id = %event.session_id,
        event_type = %event.event_type,
        is_bot = session.is_bot.unwrap_or(false),
        "Analytics event recorded"
    );

    Ok(CollectResponse::ok())
}
