//! Price paths read from market data on disk.
use super::{PricePoint, PriceProvider, PriceSeries};
use crate::horizon::Horizon;
use crate::input::{input_err_msg, read_csv};
use crate::units::MoneyPerEnergy;
use anyhow::{Context, Result, ensure};
use chrono::{DateTime, FixedOffset};
use log::debug;
use serde::Deserialize;
use std::path::PathBuf;

/// A row of a price CSV file.
///
/// Other columns (e.g. `block_id` in cleaned reserve data) are ignored. An empty price is read as a
/// missing value.
#[derive(Debug, Deserialize, PartialEq)]
struct PriceRow {
    timestamp: DateTime<FixedOffset>,
    price: Option<f64>,
}

/// Prices read from a CSV file with `timestamp` (RFC 3339) and `price` columns
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoricalPrices {
    /// Path to the CSV file, relative to the scenario directory
    pub file: PathBuf,
    /// Hold each price until the next observation, resampling to the horizon's resolution.
    ///
    /// Use this for data coarser than the horizon, such as four-hour reserve blocks.
    #[serde(default)]
    pub hold: bool,
}

impl HistoricalPrices {
    /// Read the rows from the file, checking that timestamps are strictly increasing
    fn read_rows(&self) -> Result<Vec<PriceRow>> {
        let rows: Vec<PriceRow> = read_csv(&self.file)?.collect();
        for (prev, next) in rows.iter().zip(rows.iter().skip(1)) {
            ensure!(
                next.timestamp > prev.timestamp,
                "Timestamps must be in increasing order ({} follows {})",
                next.timestamp,
                prev.timestamp
            );
        }

        Ok(rows)
    }
}

/// Convert a row into a point, with missing prices as NaN
fn to_point(timestamp: DateTime<FixedOffset>, price: Option<f64>) -> PricePoint {
    PricePoint {
        timestamp,
        price: MoneyPerEnergy::new(price.unwrap_or(f64::NAN)),
    }
}

/// For each time point of the horizon, take the last observation at or before it.
///
/// Points after the final observation are left out, so a file which ends too early gives a short
/// series.
fn hold_prices(rows: &[PriceRow], horizon: &Horizon) -> Vec<PricePoint> {
    let Some(last) = rows.last() else {
        return Vec::new();
    };

    horizon
        .iter_points()
        .map(|step| horizon.timestamp(step))
        .take_while(|timestamp| *timestamp <= last.timestamp)
        .filter_map(|timestamp| {
            let idx = rows.partition_point(|row| row.timestamp <= timestamp);
            (idx > 0).then(|| to_point(timestamp, rows[idx - 1].price))
        })
        .collect()
}

impl PriceProvider for HistoricalPrices {
    fn price_series(&self, horizon: &Horizon) -> Result<PriceSeries> {
        let rows = self
            .read_rows()
            .with_context(|| input_err_msg(&self.file))?;

        let points: Vec<_> = if self.hold {
            hold_prices(&rows, horizon)
        } else {
            let start = horizon.start();
            let skipped = rows.iter().take_while(|row| row.timestamp < start).count();
            if skipped > 0 {
                debug!("Skipping {skipped} price points before {start}");
            }
            rows.iter()
                .skip(skipped)
                .map(|row| to_point(row.timestamp, row.price))
                .collect()
        };

        debug!(
            "Read {} price points from {}",
            points.len(),
            self.file.display()
        );
        Ok(PriceSeries::new(points))
    }
}
