//! Timestamp utilities and relative time ranges

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Timestamp `days` days before `now`
pub fn days_ago(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days)
}

/// Relative time range accepted by every aggregation query
///
/// Parsed from the tokens `7d`, `14d`, `30d` and `90d`. Unknown tokens
/// resolve to [`TimeRange::Week`] rather than failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TimeRange {
    #[default]
    Week,
    Fortnight,
    Month,
    Quarter,
}

impl TimeRange {
    pub const ALL: [TimeRange; 4] = [
        TimeRange::Week,
        TimeRange::Fortnight,
        TimeRange::Month,
        TimeRange::Quarter,
    ];

    /// Number of calendar days covered by the range
    pub fn days(self) -> i64 {
        match self {
            TimeRange::Week => 7,
            TimeRange::Fortnight => 14,
            TimeRange::Month => 30,
            TimeRange::Quarter => 90,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            TimeRange::Week => "7d",
            TimeRange::Fortnight => "14d",
            TimeRange::Month => "30d",
            TimeRange::Quarter => "90d",
        }
    }

    /// Lenient parse: anything unrecognised is a week
    pub fn parse_lenient(token: &str) -> Self {
        token.parse().unwrap_or_default()
    }

    /// Earliest `created_at` included in the range
    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        days_ago(now, self.days())
    }

    /// Calendar days in the range, oldest first, ending with today
    pub fn calendar_days(self, now: DateTime<Utc>) -> Vec<NaiveDate> {
        let today = now.date_naive();
        let days = self.days();
        (0..days)
            .map(|i| today - Duration::days(days - 1 - i))
            .collect()
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "7d" => Ok(TimeRange::Week),
            "14d" => Ok(TimeRange::Fortnight),
            "30d" => Ok(TimeRange::Month),
            "90d" => Ok(TimeRange::Quarter),
            other => Err(format!("unknown time range: {}", other)),
        }
    }
}

impl From<String> for TimeRange {
    fn from(s: String) -> Self {
        TimeRange::parse_lenient(&s)
    }
}

impl From<TimeRange> for String {
    fn from(range: TimeRange) -> Self {
        range.token().to_string()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Chart label for a day bucket, e.g. `Oct 18`
pub fn day_label(day: NaiveDate) -> String {
    day.format("%b %-d").to_string()
}
