//! Cleaning of Swissgrid reserve auction results into a price series.
//!
//! The raw results file lists every awarded bid of every control-reserve product. For one product
//! and country we keep one price per four-hour auction block, line the blocks up against the full
//! calendar for the year and fill gaps with the last known price.
//!
//! The same results also give the total volume awarded in each block, which is a guide to the
//! size of bids the market absorbs.
use crate::input::input_err_msg;
use crate::units::Power;
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeDelta};
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Number of auction blocks per day
const BLOCKS_PER_DAY: u32 = 6;

/// Length of one auction block in hours
const BLOCK_HOURS: i64 = 4;

/// Which results to keep and how to label them
#[derive(Debug, Clone, PartialEq)]
pub struct CleaningOptions {
    /// The calendar year the results file covers
    pub year: i32,
    /// Case-insensitive substring of the product description to keep
    pub product: String,
    /// The country code to keep
    pub country: String,
    /// Prefix of the auction IDs, e.g. `PRL` for primary control
    pub prefix: String,
    /// The UTC offset at which auction blocks start
    pub utc_offset: FixedOffset,
}

impl CleaningOptions {
    /// Options for Swiss primary control in the given year, with blocks in Central European Time
    pub fn primary_control(year: i32) -> Self {
        Self {
            year,
            product: "Primary control".into(),
            country: "CH".into(),
            prefix: "PRL".into(),
            utc_offset: FixedOffset::east_opt(3600).expect("Valid offset"),
        }
    }
}

/// A row of the raw results file. Other columns are ignored.
#[derive(Debug, Deserialize)]
struct RawResultRow {
    #[serde(rename = "Beschreibung")]
    description: Option<String>,
    #[serde(rename = "Land")]
    country: Option<String>,
    #[serde(rename = "Ausschreibung")]
    auction: String,
    #[serde(rename = "Preis")]
    price: Option<String>,
    #[serde(rename = "Zugesprochenes Volumen", default)]
    awarded_volume: Option<String>,
}

impl RawResultRow {
    /// Whether the row is for the product and country we want
    fn is_selected(&self, product: &str, country: &str) -> bool {
        let is_product = self
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(product));
        let is_country = self
            .country
            .as_deref()
            .is_some_and(|c| c.trim().to_uppercase() == country);
        is_product && is_country
    }
}

/// An accepted price for one auction block
#[derive(Debug, Clone, PartialEq)]
struct BlockPrice {
    block_id: String,
    price: Option<f64>,
}

/// A row of the cleaned output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedBlock {
    /// Auction block ID, `<prefix>_<yy>_<mm>_<dd>_<block>`
    pub block_id: String,
    /// When the block starts
    pub timestamp: DateTime<FixedOffset>,
    /// The block price, if one is known
    pub price: Option<f64>,
}

/// How many blocks had to be filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleaningReport {
    /// Number of blocks in the calendar
    pub expected_blocks: usize,
    /// Number of calendar blocks without a price in the results file
    pub missing_before_fill: usize,
    /// Number of calendar blocks still without a price after filling
    pub missing_after_fill: usize,
}

/// Parse a number, accepting a decimal comma
fn parse_decimal(raw: Option<&str>) -> Result<Option<f64>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    let price = raw
        .replace(',', ".")
        .parse()
        .with_context(|| format!("Invalid number: {raw}"))?;
    Ok(Some(price))
}

/// Read the `;`-separated raw results file
fn read_raw_results(file_path: &Path) -> Result<Vec<RawResultRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_path(file_path)?;

    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    ensure!(!rows.is_empty(), "Results file contains no rows");

    Ok(rows)
}

/// Keep the rows for one product and country, one per block.
///
/// A row whose price equals that of the previous matching row is a further award in the same
/// block and is dropped. Repeated auction IDs are numbered `<id>_1`, `<id>_2`... in order.
fn select_block_prices(
    rows: &[RawResultRow],
    options: &CleaningOptions,
) -> Result<Vec<BlockPrice>> {
    let product = options.product.to_lowercase();
    let country = options.country.trim().to_uppercase();

    let mut previous_price = None;
    let mut block_counts: HashMap<&str, u32> = HashMap::new();
    let mut blocks = Vec::new();
    for row in rows {
        if !row.is_selected(&product, &country) {
            continue;
        }

        let price = parse_decimal(row.price.as_deref())
            .with_context(|| format!("Bad row for auction {}", row.auction))?;
        let repeated = matches!((previous_price, price), (Some(a), Some(b)) if a == b);
        previous_price = price;
        if repeated {
            continue;
        }

        let auction = row.auction.trim();
        let count = block_counts.entry(auction).or_default();
        *count += 1;
        blocks.push(BlockPrice {
            block_id: format!("{auction}_{count}"),
            price,
        });
    }

    Ok(blocks)
}

/// The block ID and start time of every auction block in the year
fn expected_blocks(options: &CleaningOptions) -> Result<Vec<(String, DateTime<FixedOffset>)>> {
    let first = NaiveDate::from_ymd_opt(options.year, 1, 1)
        .with_context(|| format!("Invalid year: {}", options.year))?;
    let yy = options.year.rem_euclid(100);

    let mut blocks = Vec::new();
    for date in first.iter_days().take_while(|d| d.year() == options.year) {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .and_then(|dt| dt.and_local_timezone(options.utc_offset).single())
            .with_context(|| format!("Cannot place {date} at {}", options.utc_offset))?;
        for block in 1..=BLOCKS_PER_DAY {
            let block_id = format!(
                "{}_{yy:02}_{:02}_{:02}_{block}",
                options.prefix,
                date.month(),
                date.day()
            );
            let start = midnight + TimeDelta::hours(BLOCK_HOURS * i64::from(block - 1));
            blocks.push((block_id, start));
        }
    }

    Ok(blocks)
}

/// Join observed prices onto the calendar and fill gaps with the last known price
fn fill_blocks(
    calendar: Vec<(String, DateTime<FixedOffset>)>,
    observed: Vec<BlockPrice>,
) -> (Vec<CleanedBlock>, CleaningReport) {
    let observed: IndexMap<_, _> = observed
        .into_iter()
        .map(|block| (block.block_id, block.price))
        .collect();

    let expected_blocks = calendar.len();
    let mut missing_before_fill = 0;
    let mut missing_after_fill = 0;
    let mut last_price = None;
    let mut matched = 0;
    let blocks = calendar
        .into_iter()
        .map(|(block_id, timestamp)| {
            let found = observed.get(&block_id).copied();
            if found.is_some() {
                matched += 1;
            }
            let price = match found.flatten() {
                Some(price) => Some(price),
                None => {
                    missing_before_fill += 1;
                    last_price
                }
            };
            if price.is_none() {
                missing_after_fill += 1;
            }
            last_price = price;

            CleanedBlock {
                block_id,
                timestamp,
                price,
            }
        })
        .collect();

    if matched < observed.len() {
        debug!(
            "{} blocks in the results file are not in the calendar",
            observed.len() - matched
        );
    }

    (
        blocks,
        CleaningReport {
            expected_blocks,
            missing_before_fill,
            missing_after_fill,
        },
    )
}

/// Clean a raw reserve results file into a `block_id,timestamp,price` CSV file.
///
/// # Arguments
///
/// * `input_path` - The raw `;`-separated results file
/// * `output_path` - Where to write the cleaned file
/// * `options` - Product, country, year and time zone to use
pub fn clean_reserve_prices(
    input_path: &Path,
    output_path: &Path,
    options: &CleaningOptions,
) -> Result<CleaningReport> {
    let rows = read_raw_results(input_path).with_context(|| input_err_msg(input_path))?;
    let observed =
        select_block_prices(&rows, options).with_context(|| input_err_msg(input_path))?;
    info!(
        "Kept {} of {} rows for {} in {}",
        observed.len(),
        rows.len(),
        options.product,
        options.country
    );

    let (blocks, report) = fill_blocks(expected_blocks(options)?, observed);
    info!(
        "Missing blocks before fill for {}: {}",
        options.year, report.missing_before_fill
    );
    if report.missing_after_fill > 0 {
        warn!(
            "Still missing after fill for {}: {}",
            options.year, report.missing_after_fill
        );
    }

    let mut writer = csv::Writer::from_path(output_path)
        .with_context(|| format!("Could not create {}", output_path.display()))?;
    for block in &blocks {
        writer.serialize(block)?;
    }
    writer.flush()?;
    info!(
        "Wrote {} blocks to {}",
        blocks.len(),
        output_path.display()
    );

    Ok(report)
}

/// A row of the block volume output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockVolume {
    /// The auction (day) ID
    #[serde(rename = "Ausschreibung")]
    pub auction: String,
    /// The product description, which identifies the block within the day
    #[serde(rename = "Beschreibung")]
    pub description: String,
    /// Total volume awarded in the block
    #[serde(rename = "Total_MW")]
    pub total: Power,
}

/// Sum the awarded volume for each (auction, description) pair, in sorted key order.
///
/// Volumes which are missing or not numbers count as zero.
fn sum_block_volumes(rows: &[RawResultRow], options: &CleaningOptions) -> Vec<BlockVolume> {
    let product = options.product.to_lowercase();
    let country = options.country.trim().to_uppercase();

    let mut totals: IndexMap<(&str, &str), f64> = IndexMap::new();
    let mut unparsed = 0;
    for row in rows.iter().filter(|row| row.is_selected(&product, &country)) {
        let description = row.description.as_deref().unwrap_or_default();
        let total = totals.entry((row.auction.as_str(), description)).or_default();
        match parse_decimal(row.awarded_volume.as_deref()) {
            Ok(Some(volume)) => *total += volume,
            Ok(None) => {}
            Err(_) => unparsed += 1,
        }
    }
    if unparsed > 0 {
        debug!("Ignoring {unparsed} awarded volumes which are not numbers");
    }

    totals.sort_keys();
    totals
        .into_iter()
        .map(|((auction, description), total)| BlockVolume {
            auction: auction.to_string(),
            description: description.to_string(),
            total: Power::new(total),
        })
        .collect()
}

/// The default name of the block volume file, e.g. `CH_PRL_totalMW_per_block_2024.csv`
pub fn block_volumes_file_name(options: &CleaningOptions) -> String {
    format!(
        "{}_{}_totalMW_per_block_{}.csv",
        options.country.trim().to_uppercase(),
        options.prefix,
        options.year
    )
}

/// Write the total awarded volume per auction block to a CSV file.
///
/// # Arguments
///
/// * `input_path` - The raw `;`-separated results file
/// * `output_path` - Where to write the `Ausschreibung,Beschreibung,Total_MW` file
/// * `options` - Product and country to use
///
/// # Returns
///
/// The mean total volume per block
pub fn block_volumes(
    input_path: &Path,
    output_path: &Path,
    options: &CleaningOptions,
) -> Result<Power> {
    let rows = read_raw_results(input_path).with_context(|| input_err_msg(input_path))?;
    let volumes = sum_block_volumes(&rows, options);
    ensure!(
        !volumes.is_empty(),
        "No results for {} in {} in {}",
        options.product,
        options.country,
        input_path.display()
    );

    let mut writer = csv::Writer::from_path(output_path)
        .with_context(|| format!("Could not create {}", output_path.display()))?;
    for volume in &volumes {
        writer.serialize(volume)?;
    }
    writer.flush()?;

    let sum: f64 = volumes.iter().map(|v| v.total.value()).sum();
    let mean = Power::new(sum / volumes.len() as f64);
    info!(
        "{}: saved {} blocks to {} | average total MW per block = {:.2}",
        options.year,
        volumes.len(),
        output_path.display(),
        mean.value()
    );

    Ok(mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use rstest::rstest;
    use std::fs;
    use tempfile::tempdir;

    fn row(description: &str, country: &str, auction: &str, price: &str) -> RawResultRow {
        RawResultRow {
            description: Some(description.into()),
            country: Some(country.into()),
            auction: auction.into(),
            price: Some(price.into()),
            awarded_volume: None,
        }
    }

    #[rstest]
    #[case(Some("12.5"), Some(12.5))]
    #[case(Some("12,5"), Some(12.5))]
    #[case(Some(" "), None)]
    #[case(None, None)]
    fn test_parse_decimal(#[case] raw: Option<&str>, #[case] expected: Option<f64>) {
        assert_eq!(parse_decimal(raw).unwrap(), expected);
    }

    #[test]
    fn test_select_block_prices() {
        let options = CleaningOptions::primary_control(2023);
        let rows = [
            row("Primary Control Reserve", "CH", "PRL_23_01_01", "10"),
            row("Primary control reserve", "ch ", "PRL_23_01_01", "10"), // repeated price
            row("Primary control reserve", "CH", "PRL_23_01_01", "12"),
            row("Secondary control", "CH", "PRL_23_01_01", "99"),
            row("Primary control reserve", "DE", "PRL_23_01_01", "98"),
            row("Primary control reserve", "CH", "PRL_23_01_02", "7"),
        ];

        let blocks = select_block_prices(&rows, &options).unwrap();
        assert_eq!(
            blocks,
            [
                BlockPrice {
                    block_id: "PRL_23_01_01_1".into(),
                    price: Some(10.0)
                },
                BlockPrice {
                    block_id: "PRL_23_01_01_2".into(),
                    price: Some(12.0)
                },
                BlockPrice {
                    block_id: "PRL_23_01_02_1".into(),
                    price: Some(7.0)
                },
            ]
        );
    }

    #[rstest]
    #[case(2023, 365 * 6)]
    #[case(2024, 366 * 6)]
    fn test_expected_blocks(#[case] year: i32, #[case] count: usize) {
        let blocks = expected_blocks(&CleaningOptions::primary_control(year)).unwrap();
        assert_eq!(blocks.len(), count);
        assert_eq!(blocks[0].0, format!("PRL_{}_01_01_1", year % 100));
        assert_eq!(
            blocks[7].1,
            DateTime::parse_from_rfc3339(&format!("{year}-01-02T04:00:00+01:00")).unwrap()
        );
        assert!(blocks.last().unwrap().0.ends_with("_12_31_6"));
    }

    #[test]
    fn test_fill_blocks() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00+01:00").unwrap();
        let calendar = (1..=4)
            .map(|i| (format!("B_{i}"), start + TimeDelta::hours(4 * i)))
            .collect_vec();
        let observed = vec![
            BlockPrice {
                block_id: "B_2".into(),
                price: Some(5.0),
            },
            BlockPrice {
                block_id: "B_4".into(),
                price: Some(8.0),
            },
            BlockPrice {
                block_id: "B_9".into(),
                price: Some(1.0),
            },
        ];

        let (blocks, report) = fill_blocks(calendar, observed);
        let prices = blocks.iter().map(|b| b.price).collect_vec();
        assert_eq!(prices, [None, Some(5.0), Some(5.0), Some(8.0)]);
        assert_eq!(
            report,
            CleaningReport {
                expected_blocks: 4,
                missing_before_fill: 2,
                missing_after_fill: 1,
            }
        );
    }

    #[test]
    fn test_clean_reserve_prices() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("raw.csv");
        let output = dir.path().join("PRL_filled_2023.csv");
        fs::write(
            &input,
            "Ausschreibung;Beschreibung;Land;Preis;Volumen\n\
            PRL_23_01_01;Primary control;CH;10;1\n\
            PRL_23_01_01;Primary control;CH;11;1\n\
            PRL_23_01_01;Primary control;CH;11;2\n\
            PRL_23_01_02;Primary control;AT;50;1\n",
        )
        .unwrap();

        let report =
            clean_reserve_prices(&input, &output, &CleaningOptions::primary_control(2023)).unwrap();
        assert_eq!(report.expected_blocks, 365 * 6);
        assert_eq!(report.missing_before_fill, 365 * 6 - 2);
        assert_eq!(report.missing_after_fill, 0);

        let blocks: Vec<CleanedBlock> = csv::Reader::from_path(&output)
            .unwrap()
            .into_deserialize()
            .try_collect()
            .unwrap();
        assert_eq!(blocks.len(), 365 * 6);
        assert_eq!(blocks[0].price, Some(10.0));
        assert_eq!(blocks[1].price, Some(11.0));
        assert_eq!(blocks.last().unwrap().price, Some(11.0));
    }

    #[test]
    fn test_sum_block_volumes() {
        let options = CleaningOptions::primary_control(2024);
        let with_volume = |description: &str, country: &str, auction: &str, volume: &str| {
            RawResultRow {
                awarded_volume: Some(volume.into()),
                ..row(description, country, auction, "10")
            }
        };
        let rows = [
            with_volume("Primary control 2", "CH", "PRL_24_01_01", "3"),
            with_volume("Primary control 1", "CH", "PRL_24_01_01", "2,5"),
            with_volume("Primary control 1", "CH", "PRL_24_01_01", "4"),
            with_volume("Primary control 1", "CH", "PRL_24_01_01", "n/a"),
            with_volume("Primary control 1", "AT", "PRL_24_01_01", "100"),
            with_volume("Secondary control", "CH", "PRL_24_01_01", "100"),
            with_volume("Primary control 1", "CH", "PRL_24_01_02", " "),
        ];

        let volumes = sum_block_volumes(&rows, &options)
            .into_iter()
            .map(|v| (v.auction, v.description, v.total.value()))
            .collect_vec();
        assert_eq!(
            volumes,
            [
                (String::from("PRL_24_01_01"), String::from("Primary control 1"), 6.5),
                (String::from("PRL_24_01_01"), String::from("Primary control 2"), 3.0),
                (String::from("PRL_24_01_02"), String::from("Primary control 1"), 0.0),
            ]
        );
    }

    #[test]
    fn test_block_volumes() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("raw.csv");
        let options = CleaningOptions::primary_control(2023);
        let output = dir.path().join(block_volumes_file_name(&options));
        assert!(output.ends_with("CH_PRL_totalMW_per_block_2023.csv"));
        fs::write(
            &input,
            "Ausschreibung;Beschreibung;Land;Preis;Zugesprochenes Volumen\n\
            PRL_23_01_01;Primary control 1;CH;10;4\n\
            PRL_23_01_01;Primary control 1;CH;11;6\n\
            PRL_23_01_01;Primary control 2;CH;11;2\n\
            PRL_23_01_02;Primary control 1;AT;50;1\n",
        )
        .unwrap();

        let mean = block_volumes(&input, &output, &options).unwrap();
        assert_eq!(mean, Power::new(6.0));

        let volumes: Vec<BlockVolume> = csv::Reader::from_path(&output)
            .unwrap()
            .into_deserialize()
            .try_collect()
            .unwrap();
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].total, Power::new(10.0));
        assert_eq!(volumes[1].total, Power::new(2.0));
    }

    #[test]
    fn test_block_volumes_no_matching_rows() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("raw.csv");
        fs::write(
            &input,
            "Ausschreibung;Beschreibung;Land;Preis;Zugesprochenes Volumen\n\
            PRL_23_01_02;Primary control 1;AT;50;1\n",
        )
        .unwrap();

        let output = dir.path().join("volumes.csv");
        let options = CleaningOptions::primary_control(2023);
        assert!(block_volumes(&input, &output, &options).is_err());
        assert!(!output.exists());
    }
}
