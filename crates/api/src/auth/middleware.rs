//! Request authentication middleware

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

/// Authenticated caller, placed in request extensions by [`optional_auth`]
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub role: String,
    pub email: Option<String>,
}

impl AuthUser {
    pub fn has_role_in(&self, roles: &[String]) -> bool {
        let role = self.role.trim().to_lowercase();
        roles.iter().any(|r| *r == role)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Attach an [`AuthUser`] when the request carries a valid bearer token.
/// Requests without one (or with an invalid one) continue anonymously.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(request.headers()) {
        match state.jwt.validate_token(token) {
            Ok(claims) => {
                request.extensions_mut().insert(AuthUser {
                    user_id: claims.sub,
                    role: claims.role,
                    email: claims.email,
                });
            }
            Err(e) => tracing::debug!(error = %e, "Ignoring invalid bearer token"),
        }
    }
    next.run(request).await
}

/// Check that the caller holds one of the configured admin roles
pub fn require_admin<'a>(
    state: &AppState,
    auth_user: Option<&'a AuthUser>,
) -> ApiResult<&'a AuthUser> {
    let user = auth_user.ok_or(ApiError::Unauthorized)?;
    if user.has_role_in(&state.config.admin_roles) {
        Ok(user)
    } else {
        tracing::warn!(user_id = %user.user_id, role = %user.role, "Rejected non-admin analytics access");
        Err(ApiError::Forbidden)
    }
}
