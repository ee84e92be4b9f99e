//! Admin / scheduled analytics purge

use axum::{
    extract::{Extension, Query, State},
    http::HeaderMap,
    Json,
};
use time::OffsetDateTime;
use vitrine_shared::PurgePolicy;

use crate::{
    auth::{require_admin, verify_purge_secret, AuthUser},
    error::ApiResult,
    purge::{PurgeManager, PurgeOutcome},
    state::AppState,
};

/// Run one purge policy. Authorized by an admin JWT or the shared purge secret.
pub async fn purge(
    State(state): State<AppState>,
    headers: HeaderMap,
    auth_user: Option<Extension<AuthUser>>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Json<PurgeOutcome>> {
    let actor = if verify_purge_secret(&headers, state.config.purge_secret.as_deref()) {
        "purge_secret".to_string()
    } else {
        require_admin(&state, auth_user.as_ref().map(|Extension(u)| u))?
            .user_id
            .clone()
    };

    let policy = PurgePolicy::from_query(&params)?;
    let store = state.store()?;

    tracing::info!(actor = %actor, policy = policy.label(), "Analytics purge requested");

    let outcome = PurgeManager::new(&**store, &state.hasher)
        .execute(&policy, OffsetDateTime::now_utc())
        .await?;

    Ok(Json(outcome))
}
