//! Report generation against the configured store

use time::OffsetDateTime;
use vitrine_shared::{report, IdentityHasher, Period, Report, ReportWindow};

use crate::settings::AnalyticsSettings;
use crate::store::{AnalyticsStore, SettingsStore, StoreResult};

/// Load the window's sessions and their full history, then filter and aggregate
pub async fn generate(
    store: &dyn AnalyticsStore,
    settings_store: &dyn SettingsStore,
    hasher: &IdentityHasher,
    period: Period,
    now: OffsetDateTime,
) -> StoreResult<Report> {
    let window = ReportWindow::resolve(period, now);
    let settings = AnalyticsSettings::load(settings_store).await?;

    let candidates = store.sessions_in_window(&window).await?;
    let ids: Vec<String> = candidates.iter().map(|s| s.session_id.clone()).collect();
    let events = store.events_for_sessions(&ids).await?;

    tracing::debug!(
        period = %period.label(),
        sessions = candidates.len(),
        events = events.len(),
        "Building analytics report"
    );

    Ok(report::build(
        candidates,
        &events,
        &settings.ip_filter,
        settings.exclude_bots,
        hasher,
        period,
        window,
    ))
}
