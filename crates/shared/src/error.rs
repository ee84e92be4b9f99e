//! Error types for Vitrine analytics

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Conflicting purge parameters: {0}")]
    ConflictingPurgePolicy(String),
}
