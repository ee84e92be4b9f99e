//! Report windows: rolling days or calendar months (UTC)

use serde::Serialize;
use time::{Date, Duration, Month, OffsetDateTime, Time};

use crate::error::CoreError;

pub const MIN_ROLLING_DAYS: i64 = 1;
pub const MAX_ROLLING_DAYS: i64 = 90;
pub const DEFAULT_ROLLING_DAYS: i64 = 30;

/// Requested window mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    RollingDays(i64),
    CurrentMonth,
    LastMonth,
}

impl Period {
    /// Parse `period` / `days` query values. Out-of-range day counts are clamped.
    pub fn parse(period: Option<&str>, days: Option<&str>) -> Result<Self, CoreError> {
        match period.map(|p| p.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("days") => {
                let days = days
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(|d| {
                        d.parse::<i64>()
                            .map_err(|_| CoreError::InvalidPeriod(format!("days={}", d)))
                    })
                    .transpose()?
                    .unwrap_or(DEFAULT_ROLLING_DAYS);
                Ok(Self::RollingDays(days.clamp(MIN_ROLLING_DAYS, MAX_ROLLING_DAYS)))
            }
            Some("current_month") => Ok(Self::CurrentMonth),
            Some("last_month") => Ok(Self::LastMonth),
            Some(other) => Err(CoreError::InvalidPeriod(other.to_string())),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::RollingDays(d) => format!("{}d", d),
            Self::CurrentMonth => "current_month".to_string(),
            Self::LastMonth => "last_month".to_string(),
        }
    }
}

/// Inclusive time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportWindow {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl ReportWindow {
    /// Resolve a period relative to `now`
    pub fn resolve(period: Period, now: OffsetDateTime) -> Self {
        let now = now.to_offset(time::UtcOffset::UTC);
        let today = now.date();
        match period {
            Period::RollingDays(days) => {
                let days = days.clamp(MIN_ROLLING_DAYS, MAX_ROLLING_DAYS);
                let first = today - Duration::days(days - 1);
                Self {
                    start: midnight(first),
                    end: now,
                }
            }
            Period::CurrentMonth => Self {
                start: midnight(first_of_month(today)),
                end: now,
            },
            Period::LastMonth => {
                let this_month = first_of_month(today);
                let last_day = this_month - Duration::days(1);
                Self {
                    start: midnight(first_of_month(last_day)),
                    end: midnight(this_month) - Duration::nanoseconds(1),
                }
            }
        }
    }

    pub fn contains(&self, ts: OffsetDateTime) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Every calendar day from start to end, inclusive
    pub fn days(&self) -> Vec<Date> {
        let mut out = Vec::new();
        let mut day = self.start.date();
        let last = self.end.date();
        while day <= last {
            out.push(day);
            match day.next_day() {
                Some(next) => day = next,
                None => break,
            }
        }
        out
    }
}

fn midnight(date: Date) -> OffsetDateTime {
    date.with_time(Time::MIDNIGHT).assume_utc()
}

fn first_of_month(date: Date) -> Date {
    date.replace_day(1).unwrap_or(date)
}

/// Same instant `months` calendar months earlier, day clamped to month length
pub fn months_before(ts: OffsetDateTime, months: u8) -> OffsetDateTime {
    let date = ts.date();
    let mut year = date.year();
    let mut month = date.month();
    for _ in 0..months {
        if month == Month::January {
            year -= 1;
        }
        month = month.previous();
    }
    let day = date.day().min(month.length(year));
    match Date::from_calendar_date(year, month, day) {
        Ok(d) => ts.replace_date(d),
        Err(_) => ts - Duration::days(30 * i64::from(months)),
    }
}
