//! Operator analytics settings stored in `site_settings`

use vitrine_shared::{
    exclude_bots_from_stored, IpFilter, EXCLUDE_BOTS_SETTINGS_KEY, IP_FILTER_SETTINGS_KEY,
};

use crate::store::{SettingsStore, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticsSettings {
    pub ip_filter: IpFilter,
    pub exclude_bots: bool,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            ip_filter: IpFilter::default(),
            exclude_bots: true,
        }
    }
}

impl AnalyticsSettings {
    /// Absent keys give defaults; malformed blobs give defaults with a warning
    pub async fn load(store: &dyn SettingsStore) -> StoreResult<Self> {
        let filter = store.get_setting(IP_FILTER_SETTINGS_KEY).await?;
        let exclude_bots = store.get_setting(EXCLUDE_BOTS_SETTINGS_KEY).await?;
        Ok(Self {
            ip_filter: IpFilter::from_stored(filter.as_deref()),
            exclude_bots: exclude_bots_from_stored(exclude_bots.as_deref()),
        })
    }

    /// Replace both settings wholesale
    pub async fn save(&self, store: &dyn SettingsStore) -> StoreResult<()> {
        let filter = serde_json::to_string(&self.ip_filter).unwrap_or_else(|_| "{}".to_string());
        store.put_setting(IP_FILTER_SETTINGS_KEY, &filter).await?;
        store
            .put_setting(EXCLUDE_BOTS_SETTINGS_KEY, if self.exclude_bots { "true" } else { "false" })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_defaults_when_absent() {
        let store = MemoryStore::new();
        let settings = AnalyticsSettings::load(&store).await.unwrap();
        assert_eq!(settings, AnalyticsSettings::default());
        assert!(settings.exclude_bots);
    }

    #[tokio::test]
    async fn test_malformed_filter_falls_back() {
        let store = MemoryStore::new();
        store.put_setting(IP_FILTER_SETTINGS_KEY, "{oops").await.unwrap();
        store.put_setting(EXCLUDE_BOTS_SETTINGS_KEY, "false").await.unwrap();
        let settings = AnalyticsSettings::load(&store).await.unwrap();
        assert!(settings.ip_filter.is_empty());
        assert!(!settings.exclude_bots);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = MemoryStore::new();
        let settings = AnalyticsSettings {
            ip_filter: IpFilter {
                exclude: vec!["192.0.2.1".into()],
                ..Default::default()
            },
            exclude_bots: false,
        };
        settings.save(&store).await.unwrap();
        assert_eq!(AnalyticsSettings::load(&store).await.unwrap(), settings);
        assert_eq!(
            store.get_setting(IP_FILTER_SETTINGS_KEY).await.unwrap().as_deref(),
            Some(r#"{"include":[],"exclude":["192.0.2.1"],"excludeHashes":[]}"#)
        );
    }
}
