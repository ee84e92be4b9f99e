//! Operator include/exclude filter and bot exclusion toggle

use axum::{
    extract::{Extension, State},
    Json,
};
use serde::{Deserialize, Serialize};
use vitrine_shared::IpFilter;

use crate::{
    auth::{require_admin, AuthUser},
    error::ApiResult,
    settings::AnalyticsSettings,
    state::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterResponse {
    pub configured: bool,
    #[serde(flatten)]
    pub ip_filter: IpFilter,
    pub exclude_bots: bool,
}

impl FilterResponse {
    fn new(configured: bool, settings: AnalyticsSettings) -> Json<Self> {
        Json(Self {
            configured,
            ip_filter: settings.ip_filter,
            exclude_bots: settings.exclude_bots,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFilterRequest {
    #[serde(flatten)]
    pub ip_filter: IpFilter,
    /// Left unchanged when absent
    pub exclude_bots: Option<bool>,
}

pub async fn get_filter(
    State(state): State<AppState>,
    auth_user: Option<Extension<AuthUser>>,
) -> ApiResult<Json<FilterResponse>> {
    require_admin(&state, auth_user.as_ref().map(|Extension(u)| u))?;

    let Some(settings) = &state.settings else {
        return Ok(FilterResponse::new(false, AnalyticsSettings::default()));
    };
    let current = AnalyticsSettings::load(&**settings).await?;
    Ok(FilterResponse::new(true, current))
}

/// Replace the filter wholesale
pub async fn put_filter(
    State(state): State<AppState>,
    auth_user: Option<Extension<AuthUser>>,
    Json(req): Json<UpdateFilterRequest>,
) -> ApiResult<Json<FilterResponse>> {
    let user = require_admin(&state, auth_user.as_ref().map(|Extension(u)| u))?;
    let settings = state.settings()?;

    let exclude_bots = match req.exclude_bots {
        Some(v) => v,
        None => AnalyticsSettings::load(&**settings).await?.exclude_bots,
    };
    let updated = AnalyticsSettings {
        ip_filter: req.ip_filter.normalized(),
        exclude_bots,
    };
    updated.save(&**settings).await?;

    tracing::info!(
        user_id = %user.user_id,
        include = updated.ip_filter.include.len(),
        exclude = updated.ip_filter.exclude.len(),
        exclude_hashes = updated.ip_filter.exclude_hashes.len(),
        exclude_bots = updated.exclude_bots,
        "Analytics filter updated"
    );

    Ok(FilterResponse::new(true, updated))
}
