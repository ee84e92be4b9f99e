//! Purge execution: resolve candidates, then delete them chunk by chunk

use serde::Serialize;
use time::OffsetDateTime;
use vitrine_shared::{retention, IdentityHasher, PurgePolicy};

use crate::store::{AnalyticsStore, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PurgeOutcome {
    pub ok: bool,
    pub deleted: u64,
    pub policy: &'static str,
}

pub struct PurgeManager<'a> {
    store: &'a dyn AnalyticsStore,
    hasher: &'a IdentityHasher,
}

impl<'a> PurgeManager<'a> {
    pub fn new(store: &'a dyn AnalyticsStore, hasher: &'a IdentityHasher) -> Self {
        Self { store, hasher }
    }

    /// Session ids the policy targets
    pub async fn candidates(&self, policy: &PurgePolicy, now: OffsetDateTime) -> StoreResult<Vec<String>> {
        match policy {
            PurgePolicy::Retention => {
                self.store
                    .session_ids_created_before(retention::retention_cutoff(now))
                    .await
            }
            PurgePolicy::All => self.store.all_session_ids().await,
            PurgePolicy::Bots(measure) => {
                let sessions = self.store.all_sessions().await?;
                let ids: Vec<String> = sessions.iter().map(|s| s.session_id.clone()).collect();
                let events = self.store.events_for_sessions(&ids).await?;
                Ok(retention::bot_candidates(&sessions, &events, *measure))
            }
            PurgePolicy::ByHashes(hashes) => self.store.session_ids_by_hashes(hashes).await,
            PurgePolicy::ByAddresses(addresses) => {
                match self.store.session_ids_by_addresses(addresses).await? {
                    Some(ids) => Ok(ids),
                    None => {
                        tracing::info!("No raw address column, purging by identity hash instead");
                        let hashes = self.hasher.hash_all(addresses);
                        self.store.session_ids_by_hashes(&hashes).await
                    }
                }
            }
        }
    }

    /// Run the policy. A failing chunk aborts the rest; earlier chunks stay
    /// committed.
    pub async fn execute(&self, policy: &PurgePolicy, now: OffsetDateTime) -> StoreResult<PurgeOutcome> {
        let ids = self.candidates(policy, now).await?;
        let mut deleted = 0u64;

        for (index, chunk) in retention::chunks(&ids).enumerate() {
            match self.store.delete_sessions(chunk).await {
                Ok(count) => deleted += count,
                Err(e) => {
                    tracing::error!(
                        policy = policy.label(),
                        chunk = index,
                        deleted_so_far = deleted,
                        error = %e,
                        "Purge chunk failed"
                    );
                    return Err(e);
                }
            }
        }

        tracing::info!(
            policy = policy.label(),
            candidates = ids.len(),
            deleted,
            "Analytics purge completed"
        );

        Ok(PurgeOutcome {
            ok: true,
            deleted,
            policy: policy.label(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, OptionalColumn, StoreCapabilities, StoreError};
    use time::Duration;
    use vitrine_shared::bot::DwellMeasure;
    use vitrine_shared::{Event, EventType, Session};

    fn hasher() -> IdentityHasher {
        IdentityHasher::new("purge-test-salt-0001")
    }

    async fn seed(store: &MemoryStore, id: &str, created_at: OffsetDateTime, duration: i64) {
        let mut session = Session::new(id, created_at);
        session.is_bot = Some(false);
        let address = format!("10.0.0.{}", id.len());
        session.identity_hash = hasher().hash(Some(address.as_str()));
        session.raw_address = Some(address);
        store.upsert_session(&session).await.unwrap();
        let mut event = Event::new(id, EventType::Pageview, created_at);
        event.duration = Some(duration);
        store.insert_event(&event).await.unwrap();
    }

    #[tokio::test]
    async fn test_retention_deletes_only_old_sessions() {
        let store = MemoryStore::new();
        let now = OffsetDateTime::now_utc();
        seed(&store, "old", now - Duration::days(120), 5_000).await;
        seed(&store, "new", now - Duration::days(10), 5_000).await;

        let h = hasher();
        let outcome = PurgeManager::new(&store, &h)
            .execute(&PurgePolicy::Retention, now)
            .await
            .unwrap();
        assert_eq!(outcome.deleted, 1);
        assert_eq!(outcome.policy, "retention");
        assert!(store.session("old").await.is_none());
        assert!(store.session("new").await.is_some());
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_bots_purge_ignores_human_validation() {
        let store = MemoryStore::new();
        let now = OffsetDateTime::now_utc();
        seed(&store, "short", now, 800).await;
        seed(&store, "reader", now, 30_000).await;
        store.mark_human_validated("short", now).await.unwrap();

        let h = hasher();
        let outcome = PurgeManager::new(&store, &h)
            .execute(&PurgePolicy::Bots(DwellMeasure::PageviewSum), now)
            .await
            .unwrap();
        assert_eq!(outcome.deleted, 1);
        assert!(store.session("short").await.is_none());
        assert!(store.session("reader").await.is_some());
    }

    #[tokio::test]
    async fn test_by_address_falls_back_to_hash() {
        let caps = StoreCapabilities::full().without(OptionalColumn::RawAddress);
        let store = MemoryStore::with_capabilities(caps);
        let now = OffsetDateTime::now_utc();
        seed(&store, "abc", now, 5_000).await;
        seed(&store, "abcdef", now, 5_000).await;

        let h = hasher();
        let policy = PurgePolicy::ByAddresses(vec!["10.0.0.3".into()]);
        let outcome = PurgeManager::new(&store, &h).execute(&policy, now).await.unwrap();
        assert_eq!(outcome.deleted, 1);
        assert!(store.session("abc").await.is_none());
    }

    #[tokio::test]
    async fn test_zero_candidates_is_noop() {
        let store = MemoryStore::new();
        let h = hasher();
        let outcome = PurgeManager::new(&store, &h)
            .execute(&PurgePolicy::All, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert_eq!(outcome, PurgeOutcome { ok: true, deleted: 0, policy: "all" });
    }

    #[tokio::test]
    async fn test_chunked_delete_and_partial_failure() {
        let store = MemoryStore::new().failing_deletes_after(2);
        let now = OffsetDateTime::now_utc();
        for i in 0..250 {
            let id = format!("s{:03}", i);
            store.upsert_session(&Session::new(&id, now)).await.unwrap();
        }

        let h = hasher();
        let result = PurgeManager::new(&store, &h)
            .execute(&PurgePolicy::All, now)
            .await;
        assert!(matches!(result, Err(StoreError::Database(_))));
        // Two chunks of 100 committed before the failure
        assert_eq!(store.session_count().await, 50);
    }
}
