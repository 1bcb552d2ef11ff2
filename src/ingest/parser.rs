//! CSV row parsing and validation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};

use super::{
    DnsFailureEvent, FileSchema, MetricValues, ParseError, RejectReason, ReshapeError, RowRejection,
    TargetRef, TimestampSource, ValidationError,
};

/// Marker the device writes in place of a target name when resolution failed.
pub const DNS_FAILURE_PREFIX: &str = "DNS:Failure";

/// One target's measurements from one CSV row.
#[derive(Debug, Clone, PartialEq)]
pub struct WideRecord {
    pub timestamp: DateTime<Utc>,
    pub target: Arc<str>,
    pub values: MetricValues,
}

/// Validated contents of one file.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub filename: String,
    /// Measurement records, stably sorted by timestamp.
    pub records: Vec<WideRecord>,
    pub dns_failures: Vec<DnsFailureEvent>,
    /// Rows dropped as a whole.
    pub rejections: Vec<RowRejection>,
    /// Single targets left out of an otherwise usable row.
    pub skipped_targets: Vec<RowRejection>,
    pub rows_total: usize,
    pub rows_accepted: usize,
}

/// Parse a CSV payload into validated wide records.
///
/// Row level problems are recorded in [`ParsedFile::rejections`], target
/// level ones in [`ParsedFile::skipped_targets`]. A row counts as rejected
/// only when nothing in it survives because of a skip. Only a header that
/// cannot be read or classified fails the whole file.
pub fn parse_file(
    filename: &str,
    bytes: &[u8],
    excluded_targets: &BTreeSet<String>,
) -> Result<ParsedFile, ReshapeError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| ReshapeError::Unreadable {
            filename: filename.to_string(),
            reason: e.to_string(),
        })?
        .clone();
    let schema = FileSchema::from_headers(filename, headers.iter())?;

    let mut parser = RowParser {
        schema: &schema,
        excluded_targets,
        names: HashMap::new(),
    };
    let mut parsed = ParsedFile {
        filename: filename.to_string(),
        ..Default::default()
    };

    for (idx, result) in reader.records().enumerate() {
        let line = result
            .as_ref()
            .ok()
            .and_then(|r| r.position())
            .map(|p| p.line())
            .unwrap_or(idx as u64 + 2);
        parsed.rows_total += 1;

        let outcome = result
            .map_err(|e| RejectReason::from(ParseError::Malformed(e.to_string())))
            .and_then(|record| parser.parse_row(&record));

        match outcome {
            Ok(row) => {
                let usable = !row.records.is_empty() || !row.dns_failures.is_empty();
                if !usable {
                    if let Some(first) = row.skipped.first() {
                        parsed.rejections.push(RowRejection {
                            filename: filename.to_string(),
                            line,
                            reason: first.clone().into(),
                        });
                    }
                }
                for reason in row.skipped {
                    parsed.skipped_targets.push(RowRejection {
                        filename: filename.to_string(),
                        line,
                        reason: reason.into(),
                    });
                }
                if !usable {
                    continue;
                }
                parsed.rows_accepted += 1;
                parsed.records.extend(row.records);
                parsed.dns_failures.extend(row.dns_failures);
            }
            Err(reason) => parsed.rejections.push(RowRejection {
                filename: filename.to_string(),
                line,
                reason,
            }),
        }
    }

    // Stable, so equal timestamps keep their row order for last-write-wins.
    parsed.records.sort_by_key(|r| r.timestamp);
    parsed.dns_failures.sort_by_key(|e| e.timestamp);

    for rejection in &parsed.rejections {
        tracing::debug!(
            "Parser: {} line {}: {}",
            rejection.filename,
            rejection.line,
            rejection.reason
        );
    }
    for skip in &parsed.skipped_targets {
        tracing::trace!("Parser: {} line {}: skipped {}", skip.filename, skip.line, skip.reason);
    }
    tracing::info!(
        "Parser: {}: {} of {} rows accepted, {} records, {} DNS failures, {} rejections, {} targets skipped",
        filename,
        parsed.rows_accepted,
        parsed.rows_total,
        parsed.records.len(),
        parsed.dns_failures.len(),
        parsed.rejections.len(),
        parsed.skipped_targets.len()
    );

    Ok(parsed)
}

struct ParsedRow {
    records: Vec<WideRecord>,
    dns_failures: Vec<DnsFailureEvent>,
    skipped: Vec<ValidationError>,
}

struct RowParser<'a> {
    schema: &'a FileSchema,
    excluded_targets: &'a BTreeSet<String>,
    names: HashMap<String, Arc<str>>,
}

impl RowParser<'_> {
    fn intern(&mut self, name: &str) -> Arc<str> {
        if let Some(existing) = self.names.get(name) {
            return existing.clone();
        }
        let arc: Arc<str> = Arc::from(name);
        self.names.insert(name.to_string(), arc.clone());
        arc
    }

    fn parse_row(&mut self, record: &csv::StringRecord) -> Result<ParsedRow, RejectReason> {
        let schema = self.schema;
        let excluded = self.excluded_targets;
        let cell = |idx: usize| record.get(idx).unwrap_or("").trim();

        let timestamp = match schema.timestamp {
            TimestampSource::Single(idx) => {
                parse_timestamp(cell(idx)).ok_or_else(|| ParseError::Timestamp(cell(idx).to_string()))?
            }
            TimestampSource::DateAndTime { date, time } => {
                let joined = format!("{} {}", cell(date), cell(time));
                parse_timestamp(&joined).ok_or(ParseError::Timestamp(joined))?
            }
        };

        let mut row = ParsedRow {
            records: Vec::new(),
            dns_failures: Vec::new(),
            skipped: Vec::new(),
        };

        // A set failure indicator makes the whole row a DNS failure row.
        if let Some(idx) = schema.dns_failure {
            let flag = cell(idx);
            if is_set(flag) {
                let failed: Vec<Arc<str>> = match failure_target(flag) {
                    Some(name) => vec![self.intern(name)],
                    None => schema.named_targets(),
                };
                for target in failed {
                    if excluded.contains(&*target) {
                        row.skipped.push(ValidationError::TargetExcluded(target.to_string()));
                    } else {
                        row.dns_failures.push(DnsFailureEvent { timestamp, target });
                    }
                }
                return Ok(row);
            }
        }

        // Slots that failed resolution but have no measurement columns at all.
        for slot in schema.slots() {
            if schema.targets.iter().any(|(t, _)| *t == TargetRef::Slot(slot)) {
                continue;
            }
            if let Some(col) = schema.slot_target_column(slot) {
                if let Some(name) = cell(col).strip_prefix(DNS_FAILURE_PREFIX) {
                    let target = self.intern(&slot_failure_name(name, slot));
                    if excluded.contains(&*target) {
                        row.skipped.push(ValidationError::TargetExcluded(target.to_string()));
                    } else {
                        row.dns_failures.push(DnsFailureEvent { timestamp, target });
                    }
                }
            }
        }

        for (target_ref, columns) in &schema.targets {
            let all_empty = columns.iter().all(|(idx, _)| cell(*idx).is_empty());

            let target = match target_ref {
                TargetRef::Named(name) => name.clone(),
                TargetRef::Slot(slot) => {
                    let raw = schema
                        .slot_target_column(*slot)
                        .map(|col| cell(col))
                        .unwrap_or("");
                    if let Some(rest) = raw.strip_prefix(DNS_FAILURE_PREFIX) {
                        let target = self.intern(&slot_failure_name(rest, *slot));
                        if excluded.contains(&*target) {
                            row.skipped.push(ValidationError::TargetExcluded(target.to_string()));
                        } else {
                            row.dns_failures.push(DnsFailureEvent { timestamp, target });
                        }
                        continue;
                    }
                    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
                        // Unused device slots are blank throughout
                        if !all_empty {
                            row.skipped.push(ValidationError::TargetAbsent {
                                column: format!("Target{}", slot),
                            });
                        }
                        continue;
                    }
                    self.intern(raw)
                }
            };

            if all_empty {
                continue;
            }
            if excluded.contains(&*target) {
                row.skipped.push(ValidationError::TargetExcluded(target.to_string()));
                continue;
            }

            let mut values = MetricValues::default();
            for (idx, metric) in columns {
                let raw = cell(*idx);
                if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
                    continue;
                }
                let column = &schema.headers[*idx];
                let value: f64 = raw.parse().map_err(|_| ParseError::Number {
                    column: column.clone(),
                    value: raw.to_string(),
                })?;
                if !metric.in_bounds(value) {
                    return Err(ValidationError::OutOfBounds {
                        column: column.clone(),
                        value,
                    }
                    .into());
                }
                values.set(*metric, value);
            }

            if !values.is_empty() {
                row.records.push(WideRecord {
                    timestamp,
                    target,
                    values,
                });
            }
        }

        Ok(row)
    }
}

fn is_set(flag: &str) -> bool {
    !flag.is_empty()
        && !matches!(
            flag.to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "nan"
        )
}

/// Target named by a failure indicator value, if any.
fn failure_target(flag: &str) -> Option<&str> {
    let rest = flag.strip_prefix(DNS_FAILURE_PREFIX).unwrap_or(flag);
    let name = rest.trim_matches(|c: char| c == ':' || c == '-' || c.is_whitespace());
    match name.to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" => None,
        _ => Some(name),
    }
}

fn slot_failure_name(rest: &str, slot: u32) -> String {
    let name = rest.trim_matches(|c: char| c == ':' || c == '-' || c.is_whitespace());
    if name.is_empty() {
        format!("Target{}", slot)
    } else {
        name.to_string()
    }
}

/// Parse a timestamp cell. Values without an offset are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(|secs| DateTime::from_timestamp(secs, 0));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Metric;
    use chrono::TimeZone;

    fn parse(csv: &str) -> ParsedFile {
        parse_file("test.csv", csv.as_bytes(), &BTreeSet::new()).unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01 12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01 12:30"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T12:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("03/01/2024 12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("100"), DateTime::from_timestamp(100, 0));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_parse_named_schema() {
        let file = parse(
            "timestamp,target1_avg_ping,target1_loss_pct,target2_avg_ping\n\
             100,50,0,20\n\
             160,52,,21\n",
        );
        assert_eq!(file.rows_total, 2);
        assert_eq!(file.rows_accepted, 2);
        assert_eq!(file.records.len(), 4);
        assert_eq!(&*file.records[0].target, "target1");
        assert_eq!(file.records[0].values.get(Metric::AvgPing), Some(50.0));
        assert_eq!(file.records[0].values.get(Metric::PacketLoss), Some(0.0));
        assert_eq!(file.records[2].values.get(Metric::PacketLoss), None);
        assert!(file.rejections.is_empty());
    }

    #[test]
    fn test_negative_packet_loss_drops_exactly_one_row() {
        let file = parse(
            "timestamp,host_avg_ping,host_loss_pct\n\
             100,10,0\n\
             160,11,-5\n\
             220,12,1\n",
        );
        assert_eq!(file.rows_total, 3);
        assert_eq!(file.rows_accepted, 2);
        assert_eq!(file.rejections.len(), 1);
        assert_eq!(file.rejections[0].line, 3);
        assert!(matches!(
            file.rejections[0].reason,
            RejectReason::Invalid(ValidationError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_timestamp_and_number() {
        let file = parse(
            "timestamp,host_avg_ping\n\
             not-a-time,10\n\
             100,fast\n\
             160,-1\n\
             220,9\n",
        );
        assert_eq!(file.rows_accepted, 1);
        assert_eq!(file.rejections.len(), 3);
        assert!(matches!(file.rejections[0].reason, RejectReason::Parse(ParseError::Timestamp(_))));
        assert!(matches!(file.rejections[1].reason, RejectReason::Parse(ParseError::Number { .. })));
    }

    #[test]
    fn test_failure_indicator_row_is_not_a_measurement() {
        let file = parse(
            "timestamp,web_avg_ping,db_avg_ping,dns_failure\n\
             100,10,20,\n\
             160,,,DNS:Failure web\n\
             220,,,1\n",
        );
        assert_eq!(file.records.len(), 2);
        assert_eq!(file.dns_failures.len(), 3);
        assert_eq!(&*file.dns_failures[0].target, "web");
        assert_eq!(file.dns_failures[0].timestamp, DateTime::from_timestamp(160, 0).unwrap());
        // An unnamed flag applies to every target in the file
        let at_220: Vec<&str> = file.dns_failures[1..].iter().map(|e| &*e.target).collect();
        assert_eq!(at_220, vec!["db", "web"]);
    }

    #[test]
    fn test_parse_device_schema() {
        let file = parse(
            "Date,Time,Timezone,IPAddress,Target1,Transmit1,Receive1,LossPct1,DelayMin1,DelayAvg1,DelayMax1,Target2,Transmit2,Receive2,LossPct2,DelayMin2,DelayAvg2,DelayMax2\n\
             2024-03-01,12:00:00,UTC,10.0.0.2,8.8.8.8,5,5,0,10.1,12.5,15.0,DNS:Failure,,,,,,\n\
             2024-03-01,12:01:00,UTC,10.0.0.2,8.8.8.8,5,4,20,11.0,13.0,16.0,example.com,5,5,0,30,31,33\n",
        );
        assert_eq!(file.rows_accepted, 2);
        assert_eq!(file.records.len(), 3);
        assert_eq!(file.dns_failures.len(), 1);
        assert_eq!(&*file.dns_failures[0].target, "Target2");

        let first = &file.records[0];
        assert_eq!(&*first.target, "8.8.8.8");
        assert_eq!(first.values.get(Metric::MinPing), Some(10.1));
        assert_eq!(first.values.get(Metric::AvgPing), Some(12.5));
        assert_eq!(first.values.get(Metric::MaxPing), Some(15.0));
        assert_eq!(
            first.timestamp,
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
        );
        assert!(file.records.iter().any(|r| &*r.target == "example.com"));
    }

    #[test]
    fn test_excluded_and_absent_targets() {
        let mut excluded = BTreeSet::new();
        excluded.insert("10.0.0.1".to_string());
        let file = parse_file(
            "test.csv",
            b"Date,Time,Target1,DelayAvg1,Target2,DelayAvg2\n\
              2024-03-01,12:00:00,10.0.0.1,5,,7\n\
              2024-03-01,12:01:00,10.0.0.1,5,,\n",
            &excluded,
        )
        .unwrap();

        assert!(file.records.is_empty());
        assert_eq!(file.rows_accepted, 0);
        // Nothing survives in either row, so both count as rejected.
        assert_eq!(file.rejections.len(), 2);
        assert_eq!(file.skipped_targets.len(), 3);
        assert!(file.skipped_targets.iter().any(|r| matches!(
            r.reason,
            RejectReason::Invalid(ValidationError::TargetAbsent { .. })
        )));
    }

    #[test]
    fn test_excluded_target_does_not_reject_row() {
        let excluded: BTreeSet<String> = ["drop".to_string()].into();
        let file = parse_file(
            "test.csv",
            b"timestamp,keep_avg_ping,drop_avg_ping
              100,10,50
              160,11,51
              220,12,52
",
            &excluded,
        )
        .unwrap();

        assert_eq!(file.rows_accepted, 3);
        assert!(file.rejections.is_empty());
        assert_eq!(file.skipped_targets.len(), 3);
        assert!(file.records.iter().all(|r| &*r.target == "keep"));
    }

    #[test]
    fn test_excluded_slot_dns_failure_is_recorded() {
        let excluded: BTreeSet<String> = ["blocked.example".to_string()].into();
        let file = parse_file(
            "test.csv",
            b"Date,Time,Target1,Target2,DelayAvg2
              2024-03-01,12:00:00,DNS:Failure blocked.example,8.8.8.8,12
              2024-03-01,12:01:00,DNS:Failure other.example,8.8.8.8,13
",
            &excluded,
        )
        .unwrap();

        assert_eq!(file.rows_accepted, 2);
        assert!(file.rejections.is_empty());
        assert_eq!(file.dns_failures.len(), 1);
        assert_eq!(&*file.dns_failures[0].target, "other.example");
        assert_eq!(file.skipped_targets.len(), 1);
        assert_eq!(file.skipped_targets[0].line, 2);
        assert_eq!(
            file.skipped_targets[0].reason,
            RejectReason::Invalid(ValidationError::TargetExcluded("blocked.example".to_string()))
        );
    }

    #[test]
    fn test_out_of_order_rows_are_sorted() {
        let file = parse(
            "timestamp,host_avg_ping\n\
             300,3\n\
             100,1\n\
             200,2\n",
        );
        let values: Vec<f64> = file
            .records
            .iter()
            .filter_map(|r| r.values.get(Metric::AvgPing))
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_garbage_payload_fails_whole_file() {
        let result = parse_file("junk.csv", &[0xff, 0xfe, 0x00, 0x13], &BTreeSet::new());
        assert!(result.is_err());
    }
}
