//! Shared purge secret for scheduled (cron/CI) purges

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

pub const PURGE_SECRET_HEADER: &str = "x-purge-secret";

/// Constant-time check of the `x-purge-secret` header. Always false when no
/// secret is configured.
pub fn verify_purge_secret(headers: &HeaderMap, configured: Option<&str>) -> bool {
    let Some(expected) = configured else {
        return false;
    };
    let Some(provided) = headers
        .get(PURGE_SECRET_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
    else {
        return false;
    };
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
