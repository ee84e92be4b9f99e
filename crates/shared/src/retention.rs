//! Purge policies and their candidate predicates
//!
//! Execution (chunking, transactions) lives with the store; this module only
//! decides which sessions a policy targets.

use std::collections::{HashMap, HashSet};

use time::OffsetDateTime;

use crate::bot::{self, BotPolicy, DwellMeasure};
use crate::error::CoreError;
use crate::types::{Event, Session};
use crate::window::months_before;

/// Sessions created longer ago than this are removed by the default purge
pub const RETENTION_MONTHS: u8 = 3;

/// Session ids deleted per store transaction
pub const PURGE_CHUNK_SIZE: usize = 100;

/// One of the mutually exclusive deletion strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgePolicy {
    /// Sessions older than [`RETENTION_MONTHS`]
    Retention,
    All,
    Bots(DwellMeasure),
    ByHashes(Vec<String>),
    ByAddresses(Vec<String>),
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Collect repeatable, comma separated list values, first occurrence wins
fn list_values(pairs: &[(String, String)], keys: &[&str]) -> Vec<String> {
    let mut seen = HashSet::new();
    pairs
        .iter()
        .filter(|(k, _)| keys.contains(&k.as_str()))
        .flat_map(|(_, v)| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty() && seen.insert(v.to_string()))
        .map(str::to_string)
        .collect()
}

impl PurgePolicy {
    /// Parse query pairs. No selector means the retention purge.
    pub fn from_query(pairs: &[(String, String)]) -> Result<Self, CoreError> {
        let flag = |key: &str| pairs.iter().any(|(k, v)| k == key && is_truthy(v));
        let given = |keys: &[&str]| pairs.iter().any(|(k, _)| keys.contains(&k.as_str()));

        let hashes = list_values(pairs, &["hash", "hashes"]);
        let addresses = list_values(pairs, &["ip", "ips"]);

        let mut selected = Vec::new();
        if flag("all") {
            selected.push("all");
        }
        if flag("bots") {
            selected.push("bots");
        }
        if given(&["hash", "hashes"]) {
            selected.push("hashes");
        }
        if given(&["ip", "ips"]) {
            selected.push("ips");
        }

        match selected.as_slice() {
            [] => Ok(Self::Retention),
            ["all"] => Ok(Self::All),
            ["bots"] => {
                let measure = pairs
                    .iter()
                    .find(|(k, _)| k == "measure")
                    .map(|(_, v)| v.as_str());
                Ok(Self::Bots(DwellMeasure::parse(measure)))
            }
            ["hashes"] if hashes.is_empty() => Err(CoreError::Validation(
                "hash list is empty".to_string(),
            )),
            ["hashes"] => Ok(Self::ByHashes(hashes)),
            ["ips"] if addresses.is_empty() => Err(CoreError::Validation(
                "ip list is empty".to_string(),
            )),
            ["ips"] => Ok(Self::ByAddresses(addresses)),
            many => Err(CoreError::ConflictingPurgePolicy(many.join(", "))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Retention => "retention",
            Self::All => "all",
            Self::Bots(DwellMeasure::PageviewSum) => "bots",
            Self::Bots(DwellMeasure::EventSpan) => "bots_span",
            Self::ByHashes(_) => "hashes",
            Self::ByAddresses(_) => "ips",
        }
    }
}

/// Cutoff of the default purge relative to `now`
pub fn retention_cutoff(now: OffsetDateTime) -> OffsetDateTime {
    months_before(now, RETENTION_MONTHS)
}

/// Sessions the bots-only purge targets. Human validation is not consulted.
pub fn bot_candidates(sessions: &[Session], events: &[Event], measure: DwellMeasure) -> Vec<String> {
    let history: HashMap<&str, Vec<&Event>> = bot::events_by_session(events);
    let policy = BotPolicy::purge(measure);
    sessions
        .iter()
        .filter(|s| {
            let events = history
                .get(s.session_id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            bot::evaluate(s, events, policy).is_bot()
        })
        .map(|s| s.session_id.clone())
        .collect()
}

/// Split ids into transaction-sized chunks
pub fn chunks(ids: &[String]) -> impl Iterator<Item = &[String]> {
    ids.chunks(PURGE_CHUNK_SIZE)
}
