//! Operator self-test: which address and identity hash this request maps to

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    Json,
};
use serde::Serialize;

use crate::{
    auth::{require_admin, AuthUser},
    error::ApiResult,
    routes::extract_client_ip,
    state::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhoamiResponse {
    pub address: Option<String>,
    pub identity_hash: Option<String>,
}

pub async fn whoami(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth_user: Option<Extension<AuthUser>>,
) -> ApiResult<Json<WhoamiResponse>> {
    require_admin(&state, auth_user.as_ref().map(|Extension(u)| u))?;

    let address = extract_client_ip(&headers);
    let identity_hash = state.hasher.hash(address.as_deref());
    Ok(Json(WhoamiResponse {
        address,
        identity_hash,
    }))
}
