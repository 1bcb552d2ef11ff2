//! Column header classification.
//!
//! Two header conventions are understood:
//!
//! - named columns, `<target>_<metric>` (e.g. `8.8.8.8_avg_ping`), with an
//!   optional `dns_failure` indicator column;
//! - the device's numbered slots, `TargetN` plus `DelayAvgN`, `DelayMinN`,
//!   `DelayMaxN`, `LossPctN` (and ignored `TransmitN`/`ReceiveN`), where the
//!   target name is the value of the row's `TargetN` cell.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use super::{Metric, ReshapeError};

/// Which target a measurement column belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetRef {
    /// Target name taken from the header itself.
    Named(Arc<str>),
    /// Device slot; the name is read from the row's `TargetN` cell.
    Slot(u32),
}

/// Role of a single CSV column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnRole {
    Timestamp,
    Date,
    Time,
    Measurement { target: TargetRef, metric: Metric },
    SlotTarget(u32),
    DnsFailure,
    Ignored,
}

/// Where a row's timestamp comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimestampSource {
    Single(usize),
    DateAndTime { date: usize, time: usize },
}

/// Classified header of one file.
#[derive(Debug, Clone)]
pub struct FileSchema {
    pub headers: Vec<String>,
    pub roles: Vec<ColumnRole>,
    pub timestamp: TimestampSource,
    /// Measurement column indices grouped by target, in target order.
    pub targets: Vec<(TargetRef, Vec<(usize, Metric)>)>,
    pub dns_failure: Option<usize>,
}

// Longest suffixes first so `packet_loss_pct` is not read as `..._pct`.
const NAMED_SUFFIXES: &[(&str, Metric)] = &[
    ("packet_loss_pct", Metric::PacketLoss),
    ("packet_loss", Metric::PacketLoss),
    ("avg_ping", Metric::AvgPing),
    ("min_ping", Metric::MinPing),
    ("max_ping", Metric::MaxPing),
    ("ping_avg", Metric::AvgPing),
    ("ping_min", Metric::MinPing),
    ("ping_max", Metric::MaxPing),
    ("delay_avg", Metric::AvgPing),
    ("delay_min", Metric::MinPing),
    ("delay_max", Metric::MaxPing),
    ("loss_pct", Metric::PacketLoss),
];

/// Classify a single header.
pub fn classify_header(header: &str) -> ColumnRole {
    let trimmed = header.trim();
    let lower = trimmed.to_ascii_lowercase();

    match lower.as_str() {
        "timestamp" | "datetime" => return ColumnRole::Timestamp,
        "date" => return ColumnRole::Date,
        "time" => return ColumnRole::Time,
        "dns_failure" | "dns_failures" | "failure" => return ColumnRole::DnsFailure,
        "timezone" | "ipaddress" | "source_file" => return ColumnRole::Ignored,
        _ => {}
    }

    static SLOT_RE: OnceLock<Regex> = OnceLock::new();
    let slot_re = SLOT_RE.get_or_init(|| {
        Regex::new(r"^(?i)(target|transmit|receive|losspct|delaymin|delayavg|delaymax)(\d+)$").unwrap()
    });

    if let Some(caps) = slot_re.captures(trimmed) {
        let slot: u32 = match caps[2].parse() {
            Ok(n) => n,
            Err(_) => return ColumnRole::Ignored,
        };
        let metric = match caps[1].to_ascii_lowercase().as_str() {
            "target" => return ColumnRole::SlotTarget(slot),
            "delayavg" => Metric::AvgPing,
            "delaymin" => Metric::MinPing,
            "delaymax" => Metric::MaxPing,
            "losspct" => Metric::PacketLoss,
            _ => return ColumnRole::Ignored,
        };
        return ColumnRole::Measurement {
            target: TargetRef::Slot(slot),
            metric,
        };
    }

    for (suffix, metric) in NAMED_SUFFIXES {
        if lower.len() > suffix.len() + 1 && lower.ends_with(suffix) {
            let cut = trimmed.len() - suffix.len() - 1;
            if trimmed.as_bytes()[cut] == b'_' {
                return ColumnRole::Measurement {
                    target: TargetRef::Named(Arc::from(&trimmed[..cut])),
                    metric: *metric,
                };
            }
        }
    }

    ColumnRole::Ignored
}

impl FileSchema {
    /// Classify every header of a file.
    pub fn from_headers<'a, I>(filename: &str, headers: I) -> Result<Self, ReshapeError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();
        let roles: Vec<ColumnRole> = headers.iter().map(|h| classify_header(h)).collect();

        let find = |wanted: &ColumnRole| roles.iter().position(|r| r == wanted);
        let timestamp = match (find(&ColumnRole::Timestamp), find(&ColumnRole::Date), find(&ColumnRole::Time)) {
            (Some(idx), _, _) => TimestampSource::Single(idx),
            (None, Some(date), Some(time)) => TimestampSource::DateAndTime { date, time },
            (None, Some(idx), None) | (None, None, Some(idx)) => TimestampSource::Single(idx),
            (None, None, None) => {
                return Err(ReshapeError::NoTimestampColumn {
                    filename: filename.to_string(),
                })
            }
        };

        let mut targets: Vec<(TargetRef, Vec<(usize, Metric)>)> = Vec::new();
        for (idx, role) in roles.iter().enumerate() {
            if let ColumnRole::Measurement { target, metric } = role {
                match targets.iter_mut().find(|(t, _)| t == target) {
                    Some((_, cols)) => cols.push((idx, *metric)),
                    None => targets.push((target.clone(), vec![(idx, *metric)])),
                }
            }
        }
        targets.sort_by(|a, b| a.0.cmp(&b.0));

        let dns_failure = find(&ColumnRole::DnsFailure);
        let has_slot_failures = roles.iter().any(|r| matches!(r, ColumnRole::SlotTarget(_)));

        if targets.is_empty() && dns_failure.is_none() && !has_slot_failures {
            return Err(ReshapeError::NoMeasurementColumns {
                filename: filename.to_string(),
            });
        }

        Ok(Self {
            headers,
            roles,
            timestamp,
            targets,
            dns_failure,
        })
    }

    /// Index of the `TargetN` column for a device slot.
    pub fn slot_target_column(&self, slot: u32) -> Option<usize> {
        self.roles
            .iter()
            .position(|r| *r == ColumnRole::SlotTarget(slot))
    }

    /// Device slots that have a `TargetN` column.
    pub fn slots(&self) -> BTreeSet<u32> {
        self.roles
            .iter()
            .filter_map(|r| match r {
                ColumnRole::SlotTarget(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    /// Target names declared directly in the header.
    pub fn named_targets(&self) -> Vec<Arc<str>> {
        self.targets
            .iter()
            .filter_map(|(t, _)| match t {
                TargetRef::Named(name) => Some(name.clone()),
                TargetRef::Slot(_) => None,
            })
            .collect()
    }
}
