//! Authentication module for Vitrine

pub mod jwt;
pub mod middleware;
pub mod secret;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{optional_auth, require_admin, AuthUser};
pub use secret::{verify_purge_secret, PURGE_SECRET_HEADER};
