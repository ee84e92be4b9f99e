//! Common types used across Vitrine analytics

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Kind of an ingested event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Pageview,
    Click,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pageview => "pageview",
            Self::Click => "click",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pageview" => Ok(Self::Pageview),
            "click" => Ok(Self::Click),
            "custom" => Ok(Self::Custom),
            _ => Err(format!("Invalid event type: {}", s)),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// One visiting browser instance.
///
/// Optional columns that a given deployment may lack (`raw_address`, `is_bot`,
/// `human_validated`, `referrer`, `user_agent`) come back as `None` once the
/// store has normalized the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub session_id: String,
    pub identity_hash: Option<String>,
    pub raw_address: Option<String>,
    pub device: Option<String>,
    pub os: Option<String>,
    pub browser: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub is_bot: Option<bool>,
    pub human_validated: Option<bool>,
    pub is_authenticated: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Session {
    /// Empty session shell created at `now`
    pub fn new(session_id: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            session_id: session_id.into(),
            identity_hash: None,
            raw_address: None,
            device: None,
            os: None,
            browser: None,
            country: None,
            city: None,
            referrer: None,
            user_agent: None,
            is_bot: None,
            human_validated: None,
            is_authenticated: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once the client has sent the human-validation ping
    pub fn is_human_validated(&self) -> bool {
        self.human_validated == Some(true)
    }
}

/// One discrete user action tied to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub session_id: String,
    pub event_type: EventType,
    pub path: Option<String>,
    pub element_id: Option<String>,
    pub metadata: serde_json::Value,
    /// Milliseconds; for pageviews, time spent on the page
    pub duration: Option<i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Event {
    pub fn new(session_id: impl Into<String>, event_type: EventType, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            event_type,
            path: None,
            element_id: None,
            metadata: serde_json::Value::Object(Default::default()),
            duration: None,
            created_at: now,
        }
    }

    pub fn is_pageview(&self) -> bool {
        self.event_type == EventType::Pageview
    }

    /// Duration when strictly positive
    pub fn positive_duration(&self) -> Option<i64> {
        self.duration.filter(|d| *d > 0)
    }
}

// =============================================================================
// Operator Settings
// =============================================================================

/// Settings key holding the include/exclude filter blob
pub const IP_FILTER_SETTINGS_KEY: &str = "analytics_ip_filter";

/// Settings key holding the "exclude bots in reports" toggle
pub const EXCLUDE_BOTS_SETTINGS_KEY: &str = "analytics_exclude_bots";

/// Operator include/exclude configuration (singleton, replaced wholesale)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IpFilter {
    /// Raw addresses; when non-empty only matching sessions are reported
    pub include: Vec<String>,
    /// Raw addresses dropped from reporting
    pub exclude: Vec<String>,
    /// Identity hashes dropped from reporting
    pub exclude_hashes: Vec<String>,
}

impl IpFilter {
    /// Parse a stored blob. Absent or malformed blobs yield the empty filter.
    pub fn from_stored(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Self::default();
        };
        match serde_json::from_str::<IpFilter>(raw) {
            Ok(filter) => filter.normalized(),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed analytics IP filter");
                Self::default()
            }
        }
    }

    /// Trim entries, drop blanks and duplicates (first occurrence wins)
    pub fn normalized(self) -> Self {
        Self {
            include: normalize_list(self.include),
            exclude: normalize_list(self.exclude),
            exclude_hashes: normalize_list(self.exclude_hashes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.exclude_hashes.is_empty()
    }
}

fn normalize_list(values: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(values.len());
    for value in values {
        let value = value.trim();
        if !value.is_empty() && !out.iter().any(|v| v == value) {
            out.push(value.to_string());
        }
    }
    out
}

/// Parse the stored "exclude bots in reports" toggle (default: on)
pub fn exclude_bots_from_stored(raw: Option<&str>) -> bool {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return true;
    };
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Bool(b)) => b,
        Ok(serde_json::Value::Object(map)) => map
            .get("enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(true),
        Ok(serde_json::Value::String(s)) => !matches!(s.as_str(), "false" | "0" | "off"),
        _ => {
            tracing::warn!("Ignoring malformed exclude-bots setting");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_from_str() {
        assert_eq!("pageview".parse::<EventType>(), Ok(EventType::Pageview));
        assert_eq!(" Click ".parse::<EventType>(), Ok(EventType::Click));
        assert!("humanValidated".parse::<EventType>().is_err());
    }

    #[test]
    fn test_ip_filter_absent_or_malformed_is_empty() {
        assert_eq!(IpFilter::from_stored(None), IpFilter::default());
        assert_eq!(IpFilter::from_stored(Some("   ")), IpFilter::default());
        assert_eq!(IpFilter::from_stored(Some("{not json")), IpFilter::default());
        assert_eq!(IpFilter::from_stored(Some("[1,2]")), IpFilter::default());
    }

    #[test]
    fn test_ip_filter_parses_camel_case_and_normalizes() {
        let filter = IpFilter::from_stored(Some(
            r#"{"include":[" 1.2.3.4 ",""],"excludeHashes":["abc","abc"]}"#,
        ));
        assert_eq!(filter.include, vec!["1.2.3.4".to_string()]);
        assert!(filter.exclude.is_empty());
        assert_eq!(filter.exclude_hashes, vec!["abc".to_string()]);
    }

    #[test]
    fn test_exclude_bots_defaults_to_true() {
        assert!(exclude_bots_from_stored(None));
        assert!(exclude_bots_from_stored(Some("garbage")));
        assert!(!exclude_bots_from_stored(Some("false")));
        assert!(!exclude_bots_from_stored(Some(r#"{"enabled":false}"#)));
        assert!(exclude_bots_from_stored(Some("true")));
    }

    #[test]
    fn test_positive_duration() {
        let mut event = Event::new("s1", EventType::Pageview, OffsetDateTime::UNIX_EPOCH);
        assert_eq!(event.positive_duration(), None);
        event.duration = Some(0);
        assert_eq!(event.positive_duration(), None);
        event.duration = Some(1200);
        assert_eq!(event.positive_duration(), Some(1200));
    }
}
