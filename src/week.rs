//! Selection of one ISO week from a time-indexed CSV file, e.g. for plotting.
use crate::input::input_err_msg;
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Datelike, FixedOffset};
use log::{info, warn};
use std::io::Write;
use std::path::Path;

/// The column holding RFC 3339 timestamps
const TIMESTAMP_COLUMN: &str = "timestamp";

/// Whether the timestamp falls in the given ISO year and week.
///
/// The ISO year differs from the calendar year for a few days around New Year.
pub fn in_iso_week(timestamp: &DateTime<FixedOffset>, year: i32, week: u32) -> bool {
    let iso = timestamp.iso_week();
    iso.year() == year && iso.week() == week
}

/// Copy the rows of a CSV file which fall in the given ISO week.
///
/// The file must have a `timestamp` column. All columns are copied unchanged, with the header.
///
/// # Arguments
///
/// * `input_path` - The CSV file to read
/// * `year` - The ISO year
/// * `week` - The ISO week number (1 to 53)
/// * `out` - Where to write the selected rows
///
/// # Returns
///
/// The number of rows selected
pub fn select_week<W: Write>(input_path: &Path, year: i32, week: u32, out: W) -> Result<usize> {
    ensure!(
        (1..=53).contains(&week),
        "ISO week must be between 1 and 53 (got {week})"
    );

    let mut reader = csv::Reader::from_path(input_path).with_context(|| input_err_msg(input_path))?;
    let headers = reader
        .headers()
        .with_context(|| input_err_msg(input_path))?
        .clone();
    let column = headers
        .iter()
        .position(|h| h == TIMESTAMP_COLUMN)
        .with_context(|| format!("{} has no {TIMESTAMP_COLUMN} column", input_path.display()))?;

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(&headers)?;

    let mut count = 0;
    for record in reader.records() {
        let record = record.with_context(|| input_err_msg(input_path))?;
        let raw = record.get(column).unwrap_or_default();
        let timestamp = DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid timestamp in {}: {raw}", input_path.display()))?;
        if in_iso_week(&timestamp, year, week) {
            writer.write_record(&record)?;
            count += 1;
        }
    }
    writer.flush()?;

    if count == 0 {
        warn!("No data found for year {year}, week {week}");
    } else {
        info!("Selected {count} rows for year {year}, week {week}");
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::tempdir;

    #[rstest]
    #[case("2024-01-01T00:00:00+01:00", 2024, 1, true)]
    #[case("2023-01-01T12:00:00+01:00", 2022, 52, true)] // a Sunday, so still in the last ISO week of 2022
    #[case("2023-01-01T12:00:00+01:00", 2023, 1, false)]
    #[case("2020-12-31T23:00:00+00:00", 2020, 53, true)]
    fn test_in_iso_week(
        #[case] timestamp: &str,
        #[case] year: i32,
        #[case] week: u32,
        #[case] expected: bool,
    ) {
        let timestamp = DateTime::parse_from_rfc3339(timestamp).unwrap();
        assert_eq!(in_iso_week(&timestamp, year, week), expected);
    }

    #[test]
    fn test_select_week() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("prices.csv");
        fs::write(
            &file_path,
            "timestamp,price\n\
            2024-01-07T23:00:00+01:00,1\n\
            2024-01-08T00:00:00+01:00,2\n\
            2024-01-14T23:00:00+01:00,3\n\
            2024-01-15T00:00:00+01:00,4\n",
        )
        .unwrap();

        let mut out = Vec::new();
        assert_eq!(select_week(&file_path, 2024, 2, &mut out).unwrap(), 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "timestamp,price\n\
            2024-01-08T00:00:00+01:00,2\n\
            2024-01-14T23:00:00+01:00,3\n"
        );

        let mut out = Vec::new();
        assert_eq!(select_week(&file_path, 2024, 30, &mut out).unwrap(), 0);
        assert!(select_week(&file_path, 2024, 54, Vec::new()).is_err());
    }

    #[test]
    fn test_select_week_no_timestamp_column() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("prices.csv");
        fs::write(&file_path, "time,price\n2024-01-08T00:00:00+01:00,2\n").unwrap();
        assert!(select_week(&file_path, 2024, 2, Vec::new()).is_err());
    }
}
