//! Vitrine shared analytics core
//!
//! Domain types, identity hashing, bot classification, the filter engine,
//! report aggregation and retention policies used by the Vitrine API.

pub mod aggregate;
pub mod bot;
pub mod db;
pub mod error;
pub mod filter;
pub mod identity;
pub mod labels;
pub mod report;
pub mod retention;
pub mod types;
pub mod window;

pub use db::*;
pub use error::*;
pub use identity::IdentityHasher;
pub use report::{FilterSummary, Report};
pub use retention::{PurgePolicy, PURGE_CHUNK_SIZE};
pub use types::*;
pub use window::{Period, ReportWindow};
