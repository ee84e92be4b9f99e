//! In-process event store
//!
//! Mirrors the Postgres adapter's semantics (sticky referrer, write-once
//! identity hash, cascade deletes) and can pretend to lack optional columns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use vitrine_shared::{Event, ReportWindow, Session};

use super::{AnalyticsStore, SettingsStore, StoreCapabilities, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    sessions: Vec<Session>,
    events: Vec<Event>,
    settings: HashMap<String, String>,
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
    capabilities: StoreCapabilities,
    /// Delete calls allowed before every further one fails
    delete_budget: Option<AtomicUsize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capabilities(StoreCapabilities::full())
    }

    /// Store that behaves like a schema lacking some optional columns
    pub fn with_capabilities(capabilities: StoreCapabilities) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            capabilities,
            delete_budget: None,
        }
    }

    /// Make every delete after the first `allowed` calls fail
    pub fn failing_deletes_after(mut self, allowed: usize) -> Self {
        self.delete_budget = Some(AtomicUsize::new(allowed));
        self
    }

    /// Drop values the simulated schema cannot hold
    fn strip(&self, mut session: Session) -> Session {
        let caps = self.capabilities;
        if !caps.raw_address {
            session.raw_address = None;
        }
        if !caps.referrer {
            session.referrer = None;
        }
        if !caps.user_agent {
            session.user_agent = None;
        }
        if !caps.is_bot {
            session.is_bot = None;
        } else if session.is_bot.is_none() {
            session.is_bot = Some(false);
        }
        if !caps.human_validated {
            session.human_validated = None;
        } else if session.human_validated.is_none() {
            session.human_validated = Some(false);
        }
        session
    }

    pub async fn session_count(&self) -> usize {
        self.tables.read().await.sessions.len()
    }

    pub async fn event_count(&self) -> usize {
        self.tables.read().await.events.len()
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.tables
            .read()
            .await
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
    }

    fn ids_where<F: Fn(&Session) -> bool>(tables: &Tables, predicate: F) -> Vec<String> {
        tables
            .sessions
            .iter()
            .filter(|s| predicate(s))
            .map(|s| s.session_id.clone())
            .collect()
    }
}

fn newest_first(mut sessions: Vec<Session>) -> Vec<Session> {
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    sessions
}

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn capabilities(&self) -> StoreResult<StoreCapabilities> {
        Ok(self.capabilities)
    }

    async fn upsert_session(&self, session: &Session) -> StoreResult<()> {
        let incoming = self.strip(session.clone());
        let mut tables = self.tables.write().await;
        match tables
            .sessions
            .iter()
            .position(|s| s.session_id == incoming.session_id)
        {
            Some(idx) => {
                let existing = &mut tables.sessions[idx];
                if existing.identity_hash.is_none() {
                    existing.identity_hash = incoming.identity_hash;
                }
                if existing.raw_address.is_none() {
                    existing.raw_address = incoming.raw_address;
                }
                if existing.referrer.as_deref().map_or(true, str::is_empty) {
                    existing.referrer = incoming.referrer.or(existing.referrer.take());
                }
                existing.device = incoming.device.or(existing.device.take());
                existing.os = incoming.os.or(existing.os.take());
                existing.browser = incoming.browser.or(existing.browser.take());
                existing.country = incoming.country.or(existing.country.take());
                existing.city = incoming.city.or(existing.city.take());
                existing.user_agent = incoming.user_agent.or(existing.user_agent.take());
                existing.updated_at = incoming.updated_at;
            }
            None => tables.sessions.push(incoming),
        }
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        self.tables.write().await.events.push(event.clone());
        Ok(())
    }

    async fn mark_human_validated(&self, session_id: &str, now: OffsetDateTime) -> StoreResult<bool> {
        if !self.capabilities.human_validated {
            return Ok(false);
        }
        let mut tables = self.tables.write().await;
        match tables.sessions.iter_mut().find(|s| s.session_id == session_id) {
            Some(session) => {
                session.human_validated = Some(true);
                session.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn sessions_in_window(&self, window: &ReportWindow) -> StoreResult<Vec<Session>> {
        let tables = self.tables.read().await;
        let sessions = tables
            .sessions
            .iter()
            .filter(|s| s.updated_at >= window.start && s.created_at <= window.end)
            .cloned()
            .collect();
        Ok(newest_first(sessions))
    }

    async fn all_sessions(&self) -> StoreResult<Vec<Session>> {
        Ok(newest_first(self.tables.read().await.sessions.clone()))
    }

    async fn events_for_sessions(&self, session_ids: &[String]) -> StoreResult<Vec<Event>> {
        let tables = self.tables.read().await;
        let mut events: Vec<Event> = tables
            .events
            .iter()
            .filter(|e| session_ids.contains(&e.session_id))
            .cloned()
            .collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(events)
    }

    async fn session_ids_created_before(&self, cutoff: OffsetDateTime) -> StoreResult<Vec<String>> {
        let tables = self.tables.read().await;
        Ok(Self::ids_where(&tables, |s| s.created_at < cutoff))
    }

    async fn all_session_ids(&self) -> StoreResult<Vec<String>> {
        let tables = self.tables.read().await;
        Ok(Self::ids_where(&tables, |_| true))
    }

    async fn session_ids_by_hashes(&self, hashes: &[String]) -> StoreResult<Vec<String>> {
        let tables = self.tables.read().await;
        Ok(Self::ids_where(&tables, |s| {
            s.identity_hash.as_ref().is_some_and(|h| hashes.contains(h))
        }))
    }

    async fn session_ids_by_addresses(&self, addresses: &[String]) -> StoreResult<Option<Vec<String>>> {
        if !self.capabilities.raw_address {
            return Ok(None);
        }
        let tables = self.tables.read().await;
        Ok(Some(Self::ids_where(&tables, |s| {
            s.raw_address.as_ref().is_some_and(|a| addresses.contains(a))
        })))
    }

    async fn delete_sessions(&self, session_ids: &[String]) -> StoreResult<u64> {
        if let Some(budget) = &self.delete_budget {
            let spent = budget.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            });
            if spent.is_err() {
                return Err(StoreError::Database(sqlx::Error::Protocol(
                    "simulated delete failure".to_string(),
                )));
            }
        }

        let mut tables = self.tables.write().await;
        tables.events.retain(|e| !session_ids.contains(&e.session_id));
        let before = tables.sessions.len();
        tables.sessions.retain(|s| !session_ids.contains(&s.session_id));
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.tables.read().await.settings.get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
