//! Human vs. automated traffic classification
//!
//! Two decision points exist. At ingest only the User-Agent is known, so
//! [`is_bot_user_agent`] runs once and its result is stored. At report and
//! purge time the whole event history is available and [`evaluate`] combines
//! the stored flag with a dwell-time heuristic and the human-validation
//! override.

use std::collections::HashMap;

use crate::types::{Event, Session};

/// Sessions whose summed pageview duration is below this are bot-like in reports
pub const REPORT_DWELL_THRESHOLD_MS: i64 = 1000;

/// Wider cutoff used by the bots-only purge
pub const PURGE_DWELL_THRESHOLD_MS: i64 = 1500;

/// Lowercase UA fragments of crawlers, preview fetchers, headless browsers
/// and HTTP client libraries
const BOT_SIGNATURES: &[&str] = &[
    // Generic
    "bot",
    "crawler",
    "spider",
    "scraper",
    "crawling",
    // Search engines
    "googlebot",
    "bingbot",
    "slurp",
    "duckduckbot",
    "baiduspider",
    "yandex",
    "sogou",
    "exabot",
    "applebot",
    "petalbot",
    "seznambot",
    "qwantify",
    // SEO tooling
    "ahrefs",
    "semrush",
    "mj12bot",
    "dotbot",
    "rogerbot",
    "screaming frog",
    "lighthouse",
    "pingdom",
    "uptimerobot",
    // Social preview fetchers
    "facebookexternalhit",
    "facebookcatalog",
    "twitterbot",
    "linkedinbot",
    "telegrambot",
    "discordbot",
    "slackbot",
    "pinterestbot",
    "embedly",
    "skypeuripreview",
    // Headless / automation
    "headlesschrome",
    "phantomjs",
    "selenium",
    "webdriver",
    "puppeteer",
    "playwright",
    // HTTP client libraries
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "httpx",
    "java/",
    "okhttp",
    "go-http-client",
    "node-fetch",
    "axios",
    "libwww-perl",
    "scrapy",
    "httpclient",
    "postmanruntime",
    "insomnia",
];

/// Fetchers whose product token also appears inside human in-app browser UAs.
/// Only a UA that starts with the token is automated.
const BOT_PREFIX_SIGNATURES: &[&str] = &["whatsapp/"];

/// Classify a User-Agent at ingest time. Missing or empty UAs count as automated.
pub fn is_bot_user_agent(user_agent: Option<&str>) -> bool {
    let ua = match user_agent.map(str::trim) {
        Some(ua) if !ua.is_empty() => ua.to_lowercase(),
        _ => return true,
    };
    BOT_SIGNATURES.iter().any(|sig| ua.contains(sig))
        || BOT_PREFIX_SIGNATURES.iter().any(|sig| ua.starts_with(sig))
}

/// Stored UA verdict, re-derived from the UA when the column is absent
pub fn user_agent_flag(session: &Session) -> bool {
    session
        .is_bot
        .unwrap_or_else(|| is_bot_user_agent(session.user_agent.as_deref()))
}

// =============================================================================
// Dwell Measures
// =============================================================================

/// How a session's dwell time is measured for the bot test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DwellMeasure {
    /// Sum of `pageview.duration` values
    #[default]
    PageviewSum,
    /// Milliseconds between the first and the last event of any type
    EventSpan,
}

impl DwellMeasure {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_lowercase()).as_deref() {
            Some("span") | Some("event_span") => Self::EventSpan,
            _ => Self::PageviewSum,
        }
    }
}

/// Summed pageview duration in ms (absent durations count as zero)
pub fn pageview_dwell_ms<'a, I>(events: I) -> i64
where
    I: IntoIterator<Item = &'a Event>,
{
    events
        .into_iter()
        .filter(|e| e.is_pageview())
        .map(|e| e.duration.unwrap_or(0).max(0))
        .sum()
}

/// Timestamp delta between the first and last event in ms (0 for fewer than two)
pub fn event_span_ms<'a, I>(events: I) -> i64
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut first = None;
    let mut last = None;
    for event in events {
        let ts = event.created_at;
        if first.map_or(true, |f| ts < f) {
            first = Some(ts);
        }
        if last.map_or(true, |l| ts > l) {
            last = Some(ts);
        }
    }
    match (first, last) {
        (Some(f), Some(l)) => {
            let millis = (l - f).whole_milliseconds();
            i64::try_from(millis).unwrap_or(i64::MAX)
        }
        _ => 0,
    }
}

// =============================================================================
// Report/Purge-Time Evaluation
// =============================================================================

/// Parameters of one evaluation call site
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotPolicy {
    pub dwell_threshold_ms: i64,
    pub measure: DwellMeasure,
    /// Whether `human_validated` forces a human verdict
    pub honor_human_validation: bool,
}

impl BotPolicy {
    /// Display filtering: 1000 ms, override honored
    pub const fn report() -> Self {
        Self {
            dwell_threshold_ms: REPORT_DWELL_THRESHOLD_MS,
            measure: DwellMeasure::PageviewSum,
            honor_human_validation: true,
        }
    }

    /// Bots-only purge: 1500 ms, override ignored
    pub const fn purge(measure: DwellMeasure) -> Self {
        Self {
            dwell_threshold_ms: PURGE_DWELL_THRESHOLD_MS,
            measure,
            honor_human_validation: false,
        }
    }
}

/// Why a session was judged the way it was
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Human,
    HumanValidated,
    UserAgent,
    ShortDwell,
}

impl Verdict {
    pub fn is_bot(&self) -> bool {
        matches!(self, Self::UserAgent | Self::ShortDwell)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::HumanValidated => "human_validated",
            Self::UserAgent => "bot_user_agent",
            Self::ShortDwell => "bot_short_dwell",
        }
    }
}

/// Evaluate one session against its full event history
pub fn evaluate(session: &Session, events: &[&Event], policy: BotPolicy) -> Verdict {
    if policy.honor_human_validation && session.is_human_validated() {
        return Verdict::HumanValidated;
    }
    if user_agent_flag(session) {
        return Verdict::UserAgent;
    }
    let dwell = match policy.measure {
        DwellMeasure::PageviewSum => pageview_dwell_ms(events.iter().copied()),
        DwellMeasure::EventSpan => event_span_ms(events.iter().copied()),
    };
    if dwell < policy.dwell_threshold_ms {
        Verdict::ShortDwell
    } else {
        Verdict::Human
    }
}

/// Group events by their session id
pub fn events_by_session(events: &[Event]) -> HashMap<&str, Vec<&Event>> {
    let mut map: HashMap<&str, Vec<&Event>> = HashMap::new();
    for event in events {
        map.entry(event.session_id.as_str()).or_default().push(event);
    }
    map
}
