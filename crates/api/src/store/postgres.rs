//! Postgres-backed event store

use std::future::Future;

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tokio::sync::{OnceCell, RwLock};
use uuid::Uuid;
use vitrine_shared::{Event, EventType, ReportWindow, Session};

use super::capabilities::{self, OptionalColumn, StoreCapabilities};
use super::{AnalyticsStore, SettingsStore, StoreError, StoreResult};

/// Optional columns in projection order
const OPTIONAL_COLUMNS: [OptionalColumn; 5] = [
    OptionalColumn::RawAddress,
    OptionalColumn::Referrer,
    OptionalColumn::UserAgent,
    OptionalColumn::IsBot,
    OptionalColumn::HumanValidated,
];

/// Session projection; absent optional columns come back as typed NULLs
fn session_columns(caps: StoreCapabilities) -> String {
    let mut columns: Vec<String> = [
        "session_id",
        "identity_hash",
        "device",
        "os",
        "browser",
        "country",
        "city",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();

    for column in OPTIONAL_COLUMNS {
        if caps.has(column) {
            columns.push(column.name().to_string());
        } else {
            columns.push(format!("NULL::{} AS {}", column.sql_type(), column.name()));
        }
    }

    columns.extend(
        ["is_authenticated", "created_at", "updated_at"]
            .iter()
            .map(|c| c.to_string()),
    );
    columns.join(", ")
}

const EVENT_COLUMNS: &str =
    "id, session_id, event_type, path, element_id, metadata, duration, created_at";

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    session_id: String,
    event_type: String,
    path: Option<String>,
    element_id: Option<String>,
    metadata: Option<serde_json::Value>,
    duration: Option<i64>,
    created_at: OffsetDateTime,
}

impl EventRow {
    fn into_event(self) -> Option<Event> {
        let event_type: EventType = match self.event_type.parse() {
            Ok(t) => t,
            Err(_) => {
                tracing::debug!(event_id = %self.id, event_type = %self.event_type, "Skipping event with unknown type");
                return None;
            }
        };
        Some(Event {
            id: self.id,
            session_id: self.session_id,
            event_type,
            path: self.path,
            element_id: self.element_id,
            metadata: self
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            duration: self.duration,
            created_at: self.created_at,
        })
    }
}

fn upsert_query(session: &Session, caps: StoreCapabilities) -> QueryBuilder<'_, Postgres> {
    let mut columns = vec![
        "session_id",
        "identity_hash",
        "device",
        "os",
        "browser",
        "country",
        "city",
        "is_authenticated",
        "created_at",
        "updated_at",
    ];
    if caps.raw_address {
        columns.push("raw_address");
    }
    if caps.referrer {
        columns.push("referrer");
    }
    if caps.user_agent {
        columns.push("user_agent");
    }
    if caps.is_bot {
        columns.push("is_bot");
    }

    let mut qb = QueryBuilder::<Postgres>::new("INSERT INTO analytics_sessions (");
    qb.push(columns.join(", "));
    qb.push(") VALUES (");
    {
        let mut values = qb.separated(", ");
        values.push_bind(&session.session_id);
        values.push_bind(&session.identity_hash);
        values.push_bind(&session.device);
        values.push_bind(&session.os);
        values.push_bind(&session.browser);
        values.push_bind(&session.country);
        values.push_bind(&session.city);
        values.push_bind(session.is_authenticated);
        values.push_bind(session.created_at);
        values.push_bind(session.updated_at);
        if caps.raw_address {
            values.push_bind(&session.raw_address);
        }
        if caps.referrer {
            values.push_bind(&session.referrer);
        }
        if caps.user_agent {
            values.push_bind(&session.user_agent);
        }
        if caps.is_bot {
            values.push_bind(session.is_bot.unwrap_or(false));
        }
    }
    qb.push(
        r#") ON CONFLICT (session_id) DO UPDATE SET
            identity_hash = COALESCE(analytics_sessions.identity_hash, EXCLUDED.identity_hash),
            device = COALESCE(EXCLUDED.device, analytics_sessions.device),
            os = COALESCE(EXCLUDED.os, analytics_sessions.os),
            browser = COALESCE(EXCLUDED.browser, analytics_sessions.browser),
            country = COALESCE(EXCLUDED.country, analytics_sessions.country),
            city = COALESCE(EXCLUDED.city, analytics_sessions.city),"#,
    );
    if caps.raw_address {
        qb.push(" raw_address = COALESCE(analytics_sessions.raw_address, EXCLUDED.raw_address),");
    }
    if caps.referrer {
        // Sticky: the first non-empty referrer wins
        qb.push(" referrer = COALESCE(NULLIF(analytics_sessions.referrer, ''), EXCLUDED.referrer),");
    }
    if caps.user_agent {
        qb.push(" user_agent = COALESCE(EXCLUDED.user_agent, analytics_sessions.user_agent),");
    }
    qb.push(" updated_at = EXCLUDED.updated_at");
    qb
}

/// Event store over a Postgres pool
pub struct PgStore {
    pool: PgPool,
    capabilities: OnceCell<RwLock<StoreCapabilities>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            capabilities: OnceCell::new(),
        }
    }

    async fn capability_cell(&self) -> StoreResult<&RwLock<StoreCapabilities>> {
        self.capabilities
            .get_or_try_init(|| async {
                let rows: Vec<(String,)> = sqlx::query_as(
                    r#"
                    SELECT column_name::TEXT
                    FROM information_schema.columns
                    WHERE table_schema = current_schema()
                      AND table_name = 'analytics_sessions'
                    "#,
                )
                .fetch_all(&self.pool)
                .await?;

                let caps = StoreCapabilities::from_columns(rows.iter().map(|r| r.0.as_str()));
                tracing::info!(?caps, "Resolved analytics store capabilities");
                Ok::<_, StoreError>(RwLock::new(caps))
            })
            .await
    }

    async fn degrade(
        &self,
        from: StoreCapabilities,
        column: Option<String>,
    ) -> StoreResult<StoreCapabilities> {
        let Some((next, dropped)) = from.degrade_for_error(column.as_deref()) else {
            return Err(StoreError::UndefinedColumn(
                column.unwrap_or_else(|| "unknown".to_string()),
            ));
        };
        tracing::warn!(
            column = dropped.name(),
            reported = ?column,
            "Analytics column missing, retrying without it"
        );

        let cell = self.capability_cell().await?;
        let mut cached = cell.write().await;
        // Concurrent requests may have degraded further already
        *cached = cached.intersect(next);
        Ok(next)
    }

    /// Run `op` against the cached capabilities, dropping one optional column
    /// per undefined-column failure
    async fn with_degradation<T, F, Fut>(&self, op: F) -> StoreResult<T>
    where
        F: Fn(StoreCapabilities) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, sqlx::Error>> + Send,
        T: Send,
    {
        let mut caps = self.capabilities().await?;
        loop {
            match op(caps).await {
                Ok(value) => return Ok(value),
                Err(err) => match capabilities::undefined_column(&err) {
                    Some(column) => caps = self.degrade(caps, column).await?,
                    None => return Err(err.into()),
                },
            }
        }
    }

    async fn fetch_ids(&self, sql: &str) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }
}

#[async_trait]
impl AnalyticsStore for PgStore {
    async fn capabilities(&self) -> StoreResult<StoreCapabilities> {
        Ok(*self.capability_cell().await?.read().await)
    }

    async fn upsert_session(&self, session: &Session) -> StoreResult<()> {
        let pool = &self.pool;
        self.with_degradation(|caps| async move {
            let mut qb = upsert_query(session, caps);
            qb.build().execute(pool).await.map(|_| ())
        })
        .await
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO analytics_events (id, session_id, event_type, path, element_id, metadata, duration, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(&event.session_id)
        .bind(event.event_type.as_str())
        .bind(&event.path)
        .bind(&event.element_id)
        .bind(&event.metadata)
        .bind(event.duration)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_human_validated(&self, session_id: &str, now: OffsetDateTime) -> StoreResult<bool> {
        let pool = &self.pool;
        self.with_degradation(|caps| async move {
            if !caps.human_validated {
                return Ok(false);
            }
            let result = sqlx::query(
                "UPDATE analytics_sessions SET human_validated = TRUE, updated_at = $2 WHERE session_id = $1",
            )
            .bind(session_id)
            .bind(now)
            .execute(pool)
            .await?;
            Ok::<_, sqlx::Error>(result.rows_affected() > 0)
        })
        .await
    }

    async fn sessions_in_window(&self, window: &ReportWindow) -> StoreResult<Vec<Session>> {
        let pool = &self.pool;
        let (start, end) = (window.start, window.end);
        self.with_degradation(|caps| async move {
            let sql = format!(
                "SELECT {} FROM analytics_sessions WHERE updated_at >= $1 AND created_at <= $2 ORDER BY created_at DESC",
                session_columns(caps)
            );
            sqlx::query_as::<_, Session>(&sql)
                .bind(start)
                .bind(end)
                .fetch_all(pool)
                .await
        })
        .await
    }

    async fn all_sessions(&self) -> StoreResult<Vec<Session>> {
        let pool = &self.pool;
        self.with_degradation(|caps| async move {
            let sql = format!(
                "SELECT {} FROM analytics_sessions ORDER BY created_at DESC",
                session_columns(caps)
            );
            sqlx::query_as::<_, Session>(&sql).fetch_all(pool).await
        })
        .await
    }

    async fn events_for_sessions(&self, session_ids: &[String]) -> StoreResult<Vec<Event>> {
        if session_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM analytics_events WHERE session_id = ANY($1) ORDER BY created_at",
            EVENT_COLUMNS
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(session_ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().filter_map(EventRow::into_event).collect())
    }

    async fn session_ids_created_before(&self, cutoff: OffsetDateTime) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT session_id FROM analytics_sessions WHERE created_at < $1")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn all_session_ids(&self) -> StoreResult<Vec<String>> {
        self.fetch_ids("SELECT session_id FROM analytics_sessions").await
    }

    async fn session_ids_by_hashes(&self, hashes: &[String]) -> StoreResult<Vec<String>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT session_id FROM analytics_sessions WHERE identity_hash = ANY($1)")
                .bind(hashes)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn session_ids_by_addresses(&self, addresses: &[String]) -> StoreResult<Option<Vec<String>>> {
        let pool = &self.pool;
        self.with_degradation(|caps| async move {
            if !caps.raw_address {
                return Ok(None);
            }
            let rows: Vec<(String,)> = sqlx::query_as(
                "SELECT session_id FROM analytics_sessions WHERE raw_address = ANY($1)",
            )
            .bind(addresses)
            .fetch_all(pool)
            .await?;
            Ok::<_, sqlx::Error>(Some(rows.into_iter().map(|r| r.0).collect::<Vec<String>>()))
        })
        .await
    }

    async fn delete_sessions(&self, session_ids: &[String]) -> StoreResult<u64> {
        if session_ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM analytics_events WHERE session_id = ANY($1)")
            .bind(session_ids)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM analytics_sessions WHERE session_id = ANY($1)")
            .bind(session_ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM site_settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.0))
    }

    async fn put_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO site_settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_projection_nulls_missing_columns() {
        let caps = StoreCapabilities::full()
            .without(OptionalColumn::RawAddress)
            .without(OptionalColumn::HumanValidated);
        let sql = session_columns(caps);
        assert!(sql.contains("NULL::TEXT AS raw_address"));
        assert!(sql.contains("NULL::BOOLEAN AS human_validated"));
        assert!(sql.contains(", referrer,"));
        assert!(sql.starts_with("session_id, identity_hash"));
    }

    #[test]
    fn test_upsert_omits_missing_columns() {
        let session = Session::new("s1", OffsetDateTime::UNIX_EPOCH);
        let caps = StoreCapabilities::full().without(OptionalColumn::Referrer);
        let qb = upsert_query(&session, caps);
        assert!(!qb.sql().contains("referrer"));
        assert!(qb.sql().contains("raw_address"));
        assert!(qb.sql().contains("ON CONFLICT (session_id)"));

        let qb = upsert_query(&session, StoreCapabilities::full());
        assert!(qb.sql().contains("NULLIF(analytics_sessions.referrer, '')"));
    }

    async fn test_store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = vitrine_shared::create_pool(&url, 2).await.expect("pool");
        vitrine_shared::run_migrations(&pool).await.expect("migrations");
        PgStore::new(pool)
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_sticky_referrer_and_cascade_delete() {
        let store = test_store().await;
        let now = OffsetDateTime::now_utc();
        let id = format!("pg-test-{}", Uuid::new_v4());

        let mut session = Session::new(&id, now);
        session.referrer = Some("https://www.google.com/".into());
        store.upsert_session(&session).await.unwrap();
        session.referrer = Some("https://bing.com/".into());
        store.upsert_session(&session).await.unwrap();

        let mut event = Event::new(&id, EventType::Pageview, now);
        event.duration = Some(1200);
        store.insert_event(&event).await.unwrap();

        let stored = store.all_sessions().await.unwrap();
        let stored = stored.iter().find(|s| s.session_id == id).unwrap();
        assert_eq!(stored.referrer.as_deref(), Some("https://www.google.com/"));

        let deleted = store.delete_sessions(&[id.clone()]).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.events_for_sessions(&[id]).await.unwrap().is_empty());
    }
}
