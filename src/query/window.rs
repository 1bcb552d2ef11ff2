//! Time range selection.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Longest selectable range.
pub const MAX_RANGE_DAYS: u32 = 365;

/// A user-selected range, relative to the newest measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeRange {
    Hours(u32),
    All,
}

impl TimeRange {
    pub const LAST_24H: TimeRange = TimeRange::Hours(24);
    pub const LAST_48H: TimeRange = TimeRange::Hours(48);
    pub const LAST_7D: TimeRange = TimeRange::Hours(7 * 24);

    /// Evaluate the range against the newest timestamp in the data, not the
    /// wall clock, so stale data still renders.
    pub fn resolve(self, latest: Option<DateTime<Utc>>) -> TimeWindow {
        match (self, latest) {
            (TimeRange::Hours(hours), Some(end)) => TimeWindow::Range {
                start: end - ChronoDuration::hours(hours as i64),
                end,
            },
            _ => TimeWindow::All,
        }
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        TimeRange::LAST_24H
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeRange::All => f.write_str("all"),
            TimeRange::Hours(h) if h % 24 == 0 => write!(f, "{}d", h / 24),
            TimeRange::Hours(h) => write!(f, "{}h", h),
        }
    }
}

impl FromStr for TimeRange {
    type Err = String;

    /// Accepts `all`, `<n>h` and `<n>d` (e.g. `24h`, `48h`, `7d`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "all" {
            return Ok(TimeRange::All);
        }

        let (num, per_unit) = if let Some(n) = s.strip_suffix('h') {
            (n, 1)
        } else if let Some(n) = s.strip_suffix('d') {
            (n, 24)
        } else {
            return Err(format!("invalid time range: {:?}", s));
        };

        let n: u32 = num
            .parse()
            .map_err(|_| format!("invalid time range: {:?}", s))?;
        let hours = n.saturating_mul(per_unit);
        if hours == 0 || hours > MAX_RANGE_DAYS * 24 {
            return Err(format!("time range out of bounds: {:?}", s));
        }
        Ok(TimeRange::Hours(hours))
    }
}

impl TryFrom<String> for TimeRange {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeRange> for String {
    fn from(range: TimeRange) -> Self {
        range.to_string()
    }
}

/// Concrete inclusive bounds, or no bounds at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeWindow {
    All,
    Range { start: DateTime<Utc>, end: DateTime<Utc> },
}

impl TimeWindow {
    #[cfg(test)]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        match self {
            TimeWindow::All => true,
            TimeWindow::Range { start, end } => *start <= t && t <= *end,
        }
    }

    /// Sub-slice of time-ordered items that falls inside the window.
    pub fn slice<'a, T, F>(&self, items: &'a [T], timestamp: F) -> &'a [T]
    where
        F: Fn(&T) -> DateTime<Utc>,
    {
        match self {
            TimeWindow::All => items,
            TimeWindow::Range { start, end } => {
                let lo = items.partition_point(|item| timestamp(item) < *start);
                let hi = items.partition_point(|item| timestamp(item) <= *end);
                &items[lo..hi.max(lo)]
            }
        }
    }
}
