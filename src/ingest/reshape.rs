//! Wide-to-tidy reshaping and cross-file merge.

use std::cmp::Ordering;

use super::{DnsFailureEvent, MeasurementRow, ParsedFile, TidyTable};

/// Output of one reshape pass.
#[derive(Debug, Clone, Default)]
pub struct Reshaped {
    pub table: TidyTable,
    /// DNS failure events ordered by (timestamp, target), exact repeats removed.
    pub dns_failures: Vec<DnsFailureEvent>,
    /// Rows discarded because a later row had the same key.
    pub duplicates_replaced: usize,
}

fn key_order(a: &MeasurementRow, b: &MeasurementRow) -> Ordering {
    a.target
        .cmp(&b.target)
        .then(a.metric.cmp(&b.metric))
        .then(a.timestamp.cmp(&b.timestamp))
}

/// Flatten every file's wide records into tidy rows and merge them.
///
/// `files` must be in listing order: on a duplicate (timestamp, target,
/// metric) key the row from the later file wins, and within one file the
/// later row wins.
pub fn reshape(files: &[ParsedFile]) -> Reshaped {
    let capacity: usize = files
        .iter()
        .flat_map(|f| f.records.iter())
        .map(|r| r.values.iter().count())
        .sum();

    let mut rows: Vec<MeasurementRow> = Vec::with_capacity(capacity);
    rows.extend(files.iter().flat_map(|f| f.records.iter()).flat_map(|record| {
        record.values.iter().map(move |(metric, value)| MeasurementRow {
            timestamp: record.timestamp,
            target: record.target.clone(),
            metric,
            value,
        })
    }));

    // Stable sort: equal keys stay in file order, then row order.
    rows.sort_by(key_order);

    let before = rows.len();
    let mut merged: Vec<MeasurementRow> = Vec::with_capacity(before);
    for row in rows {
        match merged.last_mut() {
            Some(last) if key_order(last, &row) == Ordering::Equal => *last = row,
            _ => merged.push(row),
        }
    }
    let duplicates_replaced = before - merged.len();

    let mut dns_failures: Vec<DnsFailureEvent> = files
        .iter()
        .flat_map(|f| f.dns_failures.iter().cloned())
        .collect();
    dns_failures.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.target.cmp(&b.target)));
    dns_failures.dedup();

    tracing::debug!(
        "Reshaper: {} files -> {} rows ({} duplicates replaced), {} DNS failures",
        files.len(),
        merged.len(),
        duplicates_replaced,
        dns_failures.len()
    );

    Reshaped {
        table: TidyTable::from_sorted(merged),
        dns_failures,
        duplicates_replaced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{parse_file, Metric};
    use chrono::DateTime;
    use std::collections::BTreeSet;

    fn parsed(name: &str, csv: &str) -> ParsedFile {
        parse_file(name, csv.as_bytes(), &BTreeSet::new()).unwrap()
    }

    #[test]
    fn test_later_file_wins_on_duplicate_key() {
        let a = parsed("a.csv", "timestamp,target1_avg_ping\n100,50\n");
        let b = parsed("b.csv", "timestamp,target1_avg_ping\n100,55\n");
        let out = reshape(&[a, b]);

        let t = DateTime::from_timestamp(100, 0).unwrap();
        assert_eq!(out.table.len(), 1);
        assert_eq!(out.table.value_at(t, "target1", Metric::AvgPing), Some(55.0));
        assert_eq!(out.duplicates_replaced, 1);
    }

    #[test]
    fn test_later_row_wins_within_file() {
        let a = parsed("a.csv", "timestamp,host_avg_ping\n100,1\n100,2\n");
        let out = reshape(&[a]);
        let t = DateTime::from_timestamp(100, 0).unwrap();
        assert_eq!(out.table.value_at(t, "host", Metric::AvgPing), Some(2.0));
    }

    #[test]
    fn test_row_count_matches_distinct_triples() {
        let a = parsed(
            "a.csv",
            "timestamp,h1_avg_ping,h1_loss_pct,h2_avg_ping\n100,1,0,5\n200,2,0,\n",
        );
        let b = parsed(
            "b.csv",
            "timestamp,h1_avg_ping,h2_avg_ping\n200,3,6\n300,4,7\n",
        );
        let out = reshape(&[a, b]);

        // a: (100,h1,avg) (100,h1,loss) (100,h2,avg) (200,h1,avg) (200,h1,loss)
        // b: (200,h1,avg)* (200,h2,avg) (300,h1,avg) (300,h2,avg)
        assert_eq!(out.table.len(), 8);
        assert_eq!(out.table.series("h1", Metric::AvgPing).len(), 3);
        assert_eq!(out.table.series("h2", Metric::AvgPing).len(), 3);
        assert_eq!(out.table.series("h1", Metric::PacketLoss).len(), 2);
        assert_eq!(out.table.targets().len(), 2);
    }

    #[test]
    fn test_series_are_time_ordered_across_files() {
        let a = parsed("a.csv", "timestamp,h_avg_ping\n300,3\n");
        let b = parsed("b.csv", "timestamp,h_avg_ping\n100,1\n200,2\n");
        let out = reshape(&[a, b]);
        let values: Vec<f64> = out
            .table
            .series("h", Metric::AvgPing)
            .iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert_eq!(out.table.max_timestamp(), DateTime::from_timestamp(300, 0));
    }

    #[test]
    fn test_dns_failures_merged_and_deduplicated() {
        let a = parsed("a.csv", "timestamp,h_avg_ping,dns_failure\n100,,h\n200,1,\n");
        let b = parsed("b.csv", "timestamp,h_avg_ping,dns_failure\n100,,h\n300,,h\n");
        let out = reshape(&[a, b]);
        assert_eq!(out.dns_failures.len(), 2);
        assert_eq!(out.table.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let out = reshape(&[]);
        assert!(out.table.is_empty());
        assert!(out.dns_failures.is_empty());
        assert_eq!(out.table.max_timestamp(), None);
    }
}
