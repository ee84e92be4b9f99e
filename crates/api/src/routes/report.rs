//! Admin analytics report

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use serde::Deserialize;
use time::OffsetDateTime;
use vitrine_shared::{Period, Report, ReportWindow};

use crate::{
    auth::{require_admin, AuthUser},
    error::ApiResult,
    reporting,
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub period: Option<String>,
    pub days: Option<String>,
}

/// KPI bundle, time series, rankings, visitor list and filter summary
pub async fn get_report(
    State(state): State<AppState>,
    auth_user: Option<Extension<AuthUser>>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Report>> {
    let user = require_admin(&state, auth_user.as_ref().map(|Extension(u)| u))?;
    let period = Period::parse(query.period.as_deref(), query.days.as_deref())?;
    let now = OffsetDateTime::now_utc();

    let (Some(store), Some(settings)) = (&state.store, &state.settings) else {
        return Ok(Json(Report::unconfigured(period, ReportWindow::resolve(period, now))));
    };

    let report = reporting::generate(&**store, &**settings, &state.hasher, period, now).await?;

    tracing::info!(
        user_id = %user.user_id,
        period = %report.period,
        visitors = report.aggregates.kpis.unique_visitors,
        "Analytics report generated"
    );

    Ok(Json(report))
}
