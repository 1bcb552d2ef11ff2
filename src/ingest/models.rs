//! Measurement model types.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A measured quantity recorded per target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    AvgPing,
    MinPing,
    MaxPing,
    PacketLoss,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Metric::AvgPing, Metric::MinPing, Metric::MaxPing, Metric::PacketLoss];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::AvgPing => "avg_ping",
            Metric::MinPing => "min_ping",
            Metric::MaxPing => "max_ping",
            Metric::PacketLoss => "packet_loss",
        }
    }

    /// Human readable chart label.
    pub fn label(self) -> &'static str {
        match self {
            Metric::AvgPing => "Average Ping Time",
            Metric::MinPing => "Min Ping Time",
            Metric::MaxPing => "Max Ping Time",
            Metric::PacketLoss => "Packet Loss",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::PacketLoss => "%",
            _ => "ms",
        }
    }

    /// Whether `value` lies inside the declared bounds for this metric.
    pub fn in_bounds(self, value: f64) -> bool {
        match self {
            Metric::PacketLoss => (0.0..=100.0).contains(&value),
            _ => value.is_finite() && value >= 0.0,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avg_ping" | "average_ping" | "avg" => Ok(Metric::AvgPing),
            "min_ping" | "min" => Ok(Metric::MinPing),
            "max_ping" | "max" => Ok(Metric::MaxPing),
            "packet_loss" | "loss" | "loss_pct" | "packet_loss_pct" => Ok(Metric::PacketLoss),
            other => Err(format!("unknown metric: {}", other)),
        }
    }
}

/// One value per metric, as read from a single wide row for a single target.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricValues([Option<f64>; 4]);

impl MetricValues {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.0[metric.index()]
    }

    pub fn set(&mut self, metric: Metric, value: f64) {
        self.0[metric.index()] = Some(value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL
            .into_iter()
            .filter_map(move |m| self.get(m).map(|v| (m, v)))
    }
}

/// A single tidy measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRow {
    pub timestamp: DateTime<Utc>,
    pub target: Arc<str>,
    pub metric: Metric,
    pub value: f64,
}

/// A row where name resolution failed instead of producing a measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsFailureEvent {
    pub timestamp: DateTime<Utc>,
    pub target: Arc<str>,
}

/// Identifies one chartable series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub target: Arc<str>,
    pub metric: Metric,
}

/// Long-format table of measurements.
///
/// Rows are unique on (timestamp, target, metric) and ordered by
/// (target, metric, timestamp), so each series is one contiguous slice.
#[derive(Debug, Clone, Default)]
pub struct TidyTable {
    rows: Vec<MeasurementRow>,
    series: BTreeMap<SeriesKey, Range<usize>>,
}

impl TidyTable {
    /// Build a table from rows that are already deduplicated and sorted.
    pub(crate) fn from_sorted(rows: Vec<MeasurementRow>) -> Self {
        let mut series = BTreeMap::new();
        let mut start = 0;
        for i in 1..=rows.len() {
            let boundary = i == rows.len()
                || rows[i].target != rows[start].target
                || rows[i].metric != rows[start].metric;
            if boundary {
                let key = SeriesKey {
                    target: rows[start].target.clone(),
                    metric: rows[start].metric,
                };
                series.insert(key, start..i);
                start = i;
            }
        }
        Self { rows, series }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows of one series, in timestamp order.
    pub fn series(&self, target: &str, metric: Metric) -> &[MeasurementRow] {
        let key = SeriesKey {
            target: Arc::from(target),
            metric,
        };
        self.series
            .get(&key)
            .map(|r| &self.rows[r.clone()])
            .unwrap_or(&[])
    }

    /// Iterate every series of the given metric, ordered by target.
    pub fn series_for_metric(&self, metric: Metric) -> impl Iterator<Item = (&Arc<str>, &[MeasurementRow])> {
        self.series
            .iter()
            .filter(move |(k, _)| k.metric == metric)
            .map(|(k, r)| (&k.target, &self.rows[r.clone()]))
    }

    /// Distinct targets, sorted.
    pub fn targets(&self) -> Vec<Arc<str>> {
        let mut targets: Vec<Arc<str>> = self.series.keys().map(|k| k.target.clone()).collect();
        targets.dedup();
        targets
    }

    /// Look up a single value by its key.
    #[cfg(test)]
    pub fn value_at(&self, timestamp: DateTime<Utc>, target: &str, metric: Metric) -> Option<f64> {
        let series = self.series(target, metric);
        series
            .binary_search_by_key(&timestamp, |r| r.timestamp)
            .ok()
            .map(|i| series[i].value)
    }

    pub fn max_timestamp(&self) -> Option<DateTime<Utc>> {
        self.series
            .values()
            .filter_map(|r| self.rows[r.clone()].last().map(|row| row.timestamp))
            .max()
    }
}
