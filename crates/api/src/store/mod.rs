//! Event store adapter
//!
//! Handlers talk to the backing store through [`AnalyticsStore`] and
//! [`SettingsStore`]. Postgres is the production backend; the in-memory store
//! backs local runs and router tests.

pub mod capabilities;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use time::OffsetDateTime;
use vitrine_shared::{Event, ReportWindow, Session};

pub use capabilities::{OptionalColumn, StoreCapabilities};
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Undefined column: {0}")]
    UndefinedColumn(String),
    #[error("Analytics store is not configured")]
    NotConfigured,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Sessions and events persistence
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Optional columns currently believed present
    async fn capabilities(&self) -> StoreResult<StoreCapabilities>;

    /// Insert or refresh a session. The identity hash is never overwritten and
    /// the first non-empty referrer sticks.
    async fn upsert_session(&self, session: &Session) -> StoreResult<()>;

    async fn insert_event(&self, event: &Event) -> StoreResult<()>;

    /// Set `human_validated`. Returns false when the session is unknown or the
    /// column is absent.
    async fn mark_human_validated(&self, session_id: &str, now: OffsetDateTime) -> StoreResult<bool>;

    /// Sessions with activity overlapping the window, newest first
    async fn sessions_in_window(&self, window: &ReportWindow) -> StoreResult<Vec<Session>>;

    async fn all_sessions(&self) -> StoreResult<Vec<Session>>;

    /// Every event of the given sessions, oldest first
    async fn events_for_sessions(&self, session_ids: &[String]) -> StoreResult<Vec<Event>>;

    async fn session_ids_created_before(&self, cutoff: OffsetDateTime) -> StoreResult<Vec<String>>;

    async fn all_session_ids(&self) -> StoreResult<Vec<String>>;

    async fn session_ids_by_hashes(&self, hashes: &[String]) -> StoreResult<Vec<String>>;

    /// `None` when the store keeps no raw addresses
    async fn session_ids_by_addresses(&self, addresses: &[String]) -> StoreResult<Option<Vec<String>>>;

    /// Delete one chunk: events first, then sessions, in one transaction.
    /// Returns the number of session rows removed.
    async fn delete_sessions(&self, session_ids: &[String]) -> StoreResult<u64>;

    async fn ping(&self) -> StoreResult<()>;
}

/// Generic key/value settings table
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>>;
    async fn put_setting(&self, key: &str, value: &str) -> StoreResult<()>;
}
