//! Report metrics over a filtered session set
//!
//! Everything here is a pure function of the sessions, their events and the
//! window. Rankings sort by count descending with a stable sort, so ties keep
//! first-seen order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::Hash;

use serde::Serialize;
use time::{Date, OffsetDateTime};

use crate::bot::{self, BotPolicy};
use crate::labels::{click_label, normalize_label, source_label};
use crate::types::{Event, EventType, Session};
use crate::window::ReportWindow;

pub const TOP_CONTENT_LIMIT: usize = 20;
pub const GEOGRAPHY_LIMIT: usize = 15;
pub const CLICK_LIMIT: usize = 20;
pub const VISITS_BY_PAGE_LIMIT: usize = 20;
pub const VISITOR_LIST_LIMIT: usize = 100;

// =============================================================================
// Output Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Kpis {
    pub unique_visitors: i64,
    pub total_views: i64,
    pub total_clicks: i64,
    /// Whole percent
    pub bounce_rate: i64,
    /// One decimal
    pub avg_pages_per_visit: f64,
    pub avg_time_per_page_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayBucket {
    pub date: String,
    pub views: i64,
    pub visitors: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentEntry {
    pub path: String,
    pub views: i64,
    pub avg_time_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationEntry {
    pub label: String,
    pub count: i64,
    pub avg_time_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceEntry {
    pub source: String,
    pub browser: String,
    pub count: i64,
    pub avg_time_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClickEntry {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageVisitsEntry {
    pub path: String,
    pub visitors: i64,
    pub avg_time_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitorEntry {
    pub session_id: String,
    pub identity_hash: Option<String>,
    pub device: Option<String>,
    pub os: Option<String>,
    pub browser: Option<String>,
    pub country: String,
    pub city: String,
    pub source: String,
    pub pageviews: i64,
    pub dwell_ms: i64,
    pub verdict: &'static str,
    pub is_bot: bool,
    pub human_validated: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Aggregates {
    pub kpis: Kpis,
    pub timeseries: Vec<DayBucket>,
    pub top_content: Vec<ContentEntry>,
    pub countries: Vec<LocationEntry>,
    pub cities: Vec<LocationEntry>,
    pub sources: Vec<SourceEntry>,
    pub clicks: Vec<ClickEntry>,
    pub visits_by_page: Vec<PageVisitsEntry>,
    pub visitors: Vec<VisitorEntry>,
}

// =============================================================================
// Helpers
// =============================================================================

/// Running average over strictly positive durations
#[derive(Debug, Clone, Copy, Default)]
struct PositiveDwell {
    sum: i64,
    count: i64,
}

impl PositiveDwell {
    fn add(&mut self, duration: Option<i64>) {
        if let Some(d) = duration.filter(|d| *d > 0) {
            self.sum += d;
            self.count += 1;
        }
    }

    fn avg(&self) -> i64 {
        rounded_ratio(self.sum, self.count)
    }
}

/// `numerator / denominator` rounded to the nearest integer; 0 for an empty denominator
fn rounded_ratio(numerator: i64, denominator: i64) -> i64 {
    if denominator <= 0 {
        return 0;
    }
    (numerator as f64 / denominator as f64).round() as i64
}

/// Insertion-ordered grouping so stable sorts keep first-seen order on ties
struct Tally<K, V> {
    index: HashMap<K, usize>,
    entries: Vec<(K, V)>,
}

impl<K: Eq + Hash + Clone, V: Default> Tally<K, V> {
    fn new() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    fn entry(&mut self, key: K) -> &mut V {
        let idx = match self.index.get(&key) {
            Some(idx) => *idx,
            None => {
                self.entries.push((key.clone(), V::default()));
                self.index.insert(key, self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    fn into_entries(self) -> Vec<(K, V)> {
        self.entries
    }
}

fn path_key(path: Option<&str>) -> String {
    match path.map(str::trim) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => "/".to_string(),
    }
}

fn date_key(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

// =============================================================================
// Aggregation
// =============================================================================

/// Events of the given sessions that fall inside the window
pub fn window_events<'a>(
    sessions: &[Session],
    events: &'a [Event],
    window: &ReportWindow,
) -> Vec<&'a Event> {
    let ids: HashSet<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    events
        .iter()
        .filter(|e| ids.contains(e.session_id.as_str()) && window.contains(e.created_at))
        .collect()
}

pub fn kpis(sessions: &[Session], window_events: &[&Event]) -> Kpis {
    let visitors: HashSet<&str> = sessions.iter().map(|s| s.session_id.as_str()).collect();
    let unique_visitors = visitors.len() as i64;

    let mut views_per_session: HashMap<&str, i64> = HashMap::new();
    let mut dwell = PositiveDwell::default();
    let mut total_views = 0;
    let mut total_clicks = 0;
    for event in window_events {
        match event.event_type {
            EventType::Pageview => {
                total_views += 1;
                *views_per_session.entry(event.session_id.as_str()).or_default() += 1;
                dwell.add(event.duration);
            }
            EventType::Click => total_clicks += 1,
            EventType::Custom => {}
        }
    }

    let bounces = views_per_session.values().filter(|v| **v == 1).count() as i64;
    let (bounce_rate, avg_pages_per_visit) = if unique_visitors > 0 {
        let rate = rounded_ratio(bounces * 100, unique_visitors);
        let pages = (total_views as f64 / unique_visitors as f64 * 10.0).round() / 10.0;
        (rate, pages)
    } else {
        (0, 0.0)
    };

    Kpis {
        unique_visitors,
        total_views,
        total_clicks,
        bounce_rate,
        avg_pages_per_visit,
        avg_time_per_page_ms: dwell.avg(),
    }
}

/// One bucket per calendar day, zero-filled
pub fn timeseries(window: &ReportWindow, window_events: &[&Event]) -> Vec<DayBucket> {
    let mut buckets: BTreeMap<Date, (i64, HashSet<&str>)> = window
        .days()
        .into_iter()
        .map(|d| (d, (0, HashSet::new())))
        .collect();

    for event in window_events.iter().filter(|e| e.is_pageview()) {
        let day = event.created_at.to_offset(time::UtcOffset::UTC).date();
        if let Some((views, visitors)) = buckets.get_mut(&day) {
            *views += 1;
            visitors.insert(event.session_id.as_str());
        }
    }

    buckets
        .into_iter()
        .map(|(date, (views, visitors))| DayBucket {
            date: date_key(date),
            views,
            visitors: visitors.len() as i64,
        })
        .collect()
}

/// Pageviews per path; average includes zero-duration views
pub fn top_content(window_events: &[&Event]) -> Vec<ContentEntry> {
    let mut tally: Tally<String, (i64, i64)> = Tally::new();
    for event in window_events.iter().filter(|e| e.is_pageview()) {
        let (views, total) = tally.entry(path_key(event.path.as_deref()));
        *views += 1;
        *total += event.duration.unwrap_or(0).max(0);
    }

    let mut entries: Vec<ContentEntry> = tally
        .into_entries()
        .into_iter()
        .map(|(path, (views, total))| ContentEntry {
            path,
            views,
            avg_time_ms: rounded_ratio(total, views),
        })
        .collect();
    entries.sort_by(|a, b| b.views.cmp(&a.views));
    entries.truncate(TOP_CONTENT_LIMIT);
    entries
}

/// Sessions grouped by a label, with positive-duration dwell of their pageviews
fn session_breakdown<K, F>(
    sessions: &[Session],
    pageviews_by_session: &HashMap<&str, Vec<&Event>>,
    key: F,
) -> Vec<(K, i64, i64)>
where
    K: Eq + Hash + Clone,
    F: Fn(&Session) -> K,
{
    let mut tally: Tally<K, (i64, PositiveDwell)> = Tally::new();
    for session in sessions {
        let (count, dwell) = tally.entry(key(session));
        *count += 1;
        if let Some(views) = pageviews_by_session.get(session.session_id.as_str()) {
            for view in views {
                dwell.add(view.duration);
            }
        }
    }

    let mut rows: Vec<(K, i64, i64)> = tally
        .into_entries()
        .into_iter()
        .map(|(k, (count, dwell))| (k, count, dwell.avg()))
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1));
    rows
}

fn pageviews_by_session<'a>(window_events: &[&'a Event]) -> HashMap<&'a str, Vec<&'a Event>> {
    let mut map: HashMap<&str, Vec<&Event>> = HashMap::new();
    for event in window_events.iter().filter(|e| e.is_pageview()) {
        map.entry(event.session_id.as_str()).or_default().push(event);
    }
    map
}

pub fn geography(
    sessions: &[Session],
    window_events: &[&Event],
) -> (Vec<LocationEntry>, Vec<LocationEntry>) {
    let views = pageviews_by_session(window_events);
    let to_entries = |rows: Vec<(String, i64, i64)>| -> Vec<LocationEntry> {
        rows.into_iter()
            .take(GEOGRAPHY_LIMIT)
            .map(|(label, count, avg_time_ms)| LocationEntry {
                label,
                count,
                avg_time_ms,
            })
            .collect()
    };

    let countries = session_breakdown(sessions, &views, |s| normalize_label(s.country.as_deref()));
    let cities = session_breakdown(sessions, &views, |s| normalize_label(s.city.as_deref()));
    (to_entries(countries), to_entries(cities))
}

/// Referrer source jointly with browser label
pub fn sources(sessions: &[Session], window_events: &[&Event]) -> Vec<SourceEntry> {
    let views = pageviews_by_session(window_events);
    session_breakdown(sessions, &views, |s| {
        (
            source_label(s.referrer.as_deref()),
            normalize_label(s.browser.as_deref()),
        )
    })
    .into_iter()
    .map(|((source, browser), count, avg_time_ms)| SourceEntry {
        source,
        browser,
        count,
        avg_time_ms,
    })
    .collect()
}

pub fn clicks(window_events: &[&Event]) -> Vec<ClickEntry> {
    let mut tally: Tally<String, i64> = Tally::new();
    for event in window_events
        .iter()
        .filter(|e| e.event_type == EventType::Click)
    {
        *tally.entry(click_label(event.path.as_deref(), event.element_id.as_deref())) += 1;
    }

    let mut entries: Vec<ClickEntry> = tally
        .into_entries()
        .into_iter()
        .map(|(label, count)| ClickEntry { label, count })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count));
    entries.truncate(CLICK_LIMIT);
    entries
}

/// Unique sessions per path, positive-duration average
pub fn visits_by_page(window_events: &[&Event]) -> Vec<PageVisitsEntry> {
    let mut tally: Tally<String, (HashSet<String>, PositiveDwell)> = Tally::new();
    for event in window_events.iter().filter(|e| e.is_pageview()) {
        let (visitors, dwell) = tally.entry(path_key(event.path.as_deref()));
        visitors.insert(event.session_id.clone());
        dwell.add(event.duration);
    }

    let mut entries: Vec<PageVisitsEntry> = tally
        .into_entries()
        .into_iter()
        .map(|(path, (visitors, dwell))| PageVisitsEntry {
            path,
            visitors: visitors.len() as i64,
            avg_time_ms: dwell.avg(),
        })
        .collect();
    entries.sort_by(|a, b| b.visitors.cmp(&a.visitors));
    entries.truncate(VISITS_BY_PAGE_LIMIT);
    entries
}

/// Newest sessions first, with the report-time verdict over full history
pub fn visitors(
    sessions: &[Session],
    history: &HashMap<&str, Vec<&Event>>,
    window_events: &[&Event],
) -> Vec<VisitorEntry> {
    let views = pageviews_by_session(window_events);
    let mut ordered: Vec<&Session> = sessions.iter().collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    ordered
        .into_iter()
        .take(VISITOR_LIST_LIMIT)
        .map(|s| {
            let events = history
                .get(s.session_id.as_str())
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let verdict = bot::evaluate(s, events, BotPolicy::report());
            VisitorEntry {
                session_id: s.session_id.clone(),
                identity_hash: s.identity_hash.clone(),
                device: s.device.clone(),
                os: s.os.clone(),
                browser: s.browser.clone(),
                country: normalize_label(s.country.as_deref()),
                city: normalize_label(s.city.as_deref()),
                source: source_label(s.referrer.as_deref()),
                pageviews: views
                    .get(s.session_id.as_str())
                    .map_or(0, |v| v.len() as i64),
                dwell_ms: bot::pageview_dwell_ms(events.iter().copied()),
                verdict: verdict.as_str(),
                is_bot: verdict.is_bot(),
                human_validated: s.is_human_validated(),
                created_at: s.created_at,
            }
        })
        .collect()
}

/// Compute every breakdown for already filtered sessions.
///
/// `events` is the full history of those sessions; the window scopes the
/// metrics while the visitor verdicts look at everything.
pub fn aggregate(sessions: &[Session], events: &[Event], window: &ReportWindow) -> Aggregates {
    let in_window = window_events(sessions, events, window);
    let history = bot::events_by_session(events);
    let (countries, cities) = geography(sessions, &in_window);

    Aggregates {
        kpis: kpis(sessions, &in_window),
        timeseries: timeseries(window, &in_window),
        top_content: top_content(&in_window),
        countries,
        cities,
        sources: sources(sessions, &in_window),
        clicks: clicks(&in_window),
        visits_by_page: visits_by_page(&in_window),
        visitors: visitors(sessions, &history, &in_window),
    }
}
