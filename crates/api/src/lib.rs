//! Vitrine API Library
//!
//! Analytics ingest, reporting, filter settings and retention purges for the
//! Vitrine site.

pub mod auth;
pub mod config;
pub mod error;
pub mod purge;
pub mod reporting;
pub mod routes;
pub mod settings;
pub mod state;
pub mod store;

pub use config::{Config, StoreKind};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
