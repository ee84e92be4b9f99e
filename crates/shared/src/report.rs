//! Report assembly: filter, bot exclusion, then aggregation

use serde::Serialize;

use crate::aggregate::{self, Aggregates};
use crate::bot::{self, BotPolicy};
use crate::filter::{self, FilterStats};
use crate::identity::IdentityHasher;
use crate::types::{Event, IpFilter, Session};
use crate::window::{Period, ReportWindow};

/// What the operator filter and bot exclusion removed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterSummary {
    pub include_entries: usize,
    pub exclude_entries: usize,
    pub exclude_hash_entries: usize,
    pub exclude_bots: bool,
    pub sessions_before_filtering: usize,
    pub sessions_after_filtering: usize,
    pub removed_as_bots: usize,
    pub dropped_by_include: usize,
    pub dropped_by_exclude: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub configured: bool,
    pub period: String,
    pub window: ReportWindow,
    #[serde(flatten)]
    pub aggregates: Aggregates,
    pub filter: FilterSummary,
}

impl Report {
    /// Shape returned when no store is configured
    pub fn unconfigured(period: Period, window: ReportWindow) -> Self {
        Self {
            configured: false,
            period: period.label(),
            window,
            aggregates: aggregate::aggregate(&[], &[], &window),
            filter: FilterSummary::default(),
        }
    }
}

/// Drop sessions judged automated at report time. Returns the kept sessions
/// and how many were removed.
pub fn exclude_bots(sessions: Vec<Session>, events: &[Event]) -> (Vec<Session>, usize) {
    let history = bot::events_by_session(events);
    let before = sessions.len();
    let kept: Vec<Session> = sessions
        .into_iter()
        .filter(|s| {
            let events = history
                .get(s.session_id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            !bot::evaluate(s, events, BotPolicy::report()).is_bot()
        })
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

/// Build a report from window-scoped candidate sessions and the full event
/// history of those sessions
pub fn build(
    candidates: Vec<Session>,
    events: &[Event],
    ip_filter: &IpFilter,
    exclude_bots_enabled: bool,
    hasher: &IdentityHasher,
    period: Period,
    window: ReportWindow,
) -> Report {
    let ip_filter = ip_filter.clone().normalized();
    let (filtered, stats): (Vec<Session>, FilterStats) =
        filter::apply(candidates, &ip_filter, hasher);

    let (sessions, removed_as_bots) = if exclude_bots_enabled {
        exclude_bots(filtered, events)
    } else {
        (filtered, 0)
    };

    let summary = FilterSummary {
        include_entries: ip_filter.include.len(),
        exclude_entries: ip_filter.exclude.len(),
        exclude_hash_entries: ip_filter.exclude_hashes.len(),
        exclude_bots: exclude_bots_enabled,
        sessions_before_filtering: stats.candidates,
        sessions_after_filtering: stats.kept,
        removed_as_bots,
        dropped_by_include: stats.dropped_by_include,
        dropped_by_exclude: stats.dropped_by_exclude,
    };

    Report {
        configured: true,
        period: period.label(),
        window,
        aggregates: aggregate::aggregate(&sessions, events, &window),
        filter: summary,
    }
}
