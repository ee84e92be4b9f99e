//! Shared application state

use std::sync::Arc;

use vitrine_shared::IdentityHasher;

use crate::{
    auth::JwtManager,
    config::Config,
    error::{ApiError, ApiResult},
    store::{AnalyticsStore, MemoryStore, PgStore, SettingsStore},
};

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` when no backing store is configured
    pub store: Option<Arc<dyn AnalyticsStore>>,
    pub settings: Option<Arc<dyn SettingsStore>>,
    pub hasher: IdentityHasher,
    pub jwt: JwtManager,
}

impl AppState {
    fn build(
        config: Config,
        store: Option<Arc<dyn AnalyticsStore>>,
        settings: Option<Arc<dyn SettingsStore>>,
    ) -> Self {
        Self {
            hasher: IdentityHasher::new(&config.identity_hash_salt),
            jwt: JwtManager::new(&config.jwt_secret),
            config: Arc::new(config),
            store,
            settings,
        }
    }

    pub fn with_postgres(config: Config, store: Arc<PgStore>) -> Self {
        Self::build(config, Some(store.clone()), Some(store))
    }

    pub fn with_memory(config: Config, store: Arc<MemoryStore>) -> Self {
        Self::build(config, Some(store.clone()), Some(store))
    }

    /// State whose analytics routes degrade to "not configured"
    pub fn unconfigured(config: Config) -> Self {
        Self::build(config, None, None)
    }

    pub fn store(&self) -> ApiResult<&Arc<dyn AnalyticsStore>> {
        self.store.as_ref().ok_or(ApiError::NotConfigured)
    }

    pub fn settings(&self) -> ApiResult<&Arc<dyn SettingsStore>> {
        self.settings.as_ref().ok_or(ApiError::NotConfigured)
    }
}
