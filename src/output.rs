//! Output formatting and persistence for aggregated results.
//!
//! Supports pretty JSON and CSV append of per-province means.

use anyhow::Result;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

use crate::aggregate::Aggregation;

/// One province's mean at one point in time.
#[derive(Debug, Serialize)]
pub struct SnapshotRow<'a> {
    pub timestamp: DateTime<Utc>,
    pub server: &'a str,
    pub province: &'a str,
    pub average_delay: Option<f64>,
    pub records: usize,
}

/// Serializes an aggregation as pretty-printed JSON.
pub fn to_json(aggregation: &Aggregation) -> Result<String> {
    Ok(serde_json::to_string_pretty(aggregation)?)
}

/// Appends one row per province of `aggregation` to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_snapshot(
    path: &str,
    server: &str,
    at: DateTime<Utc>,
    aggregation: &Aggregation,
) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV snapshot");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // header only on a fresh file
        .from_writer(file);

    for datum in &aggregation.map_data {
        writer.serialize(SnapshotRow {
            timestamp: at,
            server,
            province: &datum.name,
            average_delay: datum.value,
            records: aggregation
                .detail
                .get(&datum.name)
                .map_or(0, <[_]>::len),
        })?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{MissingDelayPolicy, aggregate};
    use crate::parser::parse_results;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn sample() -> Aggregation {
        let raw = parse_results(
            br#"{"Beijing-CT": {"average_delay": 50}, "Beijing-CU": {"average_delay": 150},
                 "Shanghai-CT": {"average_delay": null}}"#,
        )
        .unwrap();
        aggregate(&raw, MissingDelayPolicy::ZeroFill)
    }

    #[test]
    fn test_to_json_contains_map_and_detail() {
        let json = to_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["map_data"][0]["name"], "Beijing");
        assert_eq!(value["map_data"][0]["value"], 100.0);
        assert_eq!(value["detail"]["Shanghai"][0]["average_delay"], serde_json::Value::Null);
    }

    #[test]
    fn test_append_snapshot_writes_header_once() {
        let path = temp_path("latency_map_test_header.csv");
        let _ = fs::remove_file(&path);

        let agg = sample();
        append_snapshot(&path, "hk", Utc::now(), &agg).unwrap();
        append_snapshot(&path, "hk", Utc::now(), &agg).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content.lines().filter(|l| l.contains("timestamp")).count();
        assert_eq!(header_count, 1);
        // 1 header + 2 provinces per append
        assert_eq!(content.lines().count(), 5);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_snapshot_row_contents() {
        let path = temp_path("latency_map_test_rows.csv");
        let _ = fs::remove_file(&path);

        append_snapshot(&path, "hk", Utc::now(), &sample()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines[0], "timestamp,server,province,average_delay,records");
        assert!(lines[1].ends_with(",hk,Beijing,100.0,2"));
        assert!(lines[2].ends_with(",hk,Shanghai,0.0,1"));

        fs::remove_file(&path).unwrap();
    }
}
