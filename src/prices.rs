//! Clearing-price paths for the planning horizon.
//!
//! A price path has one price per time point (`H + 1` values for `H` intervals), equally spaced at
//! the horizon's step duration. Providers are free to return more points than needed; only the
//! first `H + 1` are used.
use crate::error::DispatchError;
use crate::horizon::Horizon;
use crate::units::MoneyPerEnergy;
use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use log::debug;
use serde::Deserialize;
use std::path::Path;

pub mod historical;
pub mod synthetic;
pub use historical::HistoricalPrices;
pub use synthetic::SyntheticPrices;

/// The clearing price at one point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    /// When the price applies from
    pub timestamp: DateTime<FixedOffset>,
    /// The clearing price. May be NaN if the source had no value.
    pub price: MoneyPerEnergy,
}

/// A time-ordered sequence of clearing prices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSeries(Vec<PricePoint>);

impl PriceSeries {
    /// Create a new series from the given points
    pub fn new(points: Vec<PricePoint>) -> Self {
        Self(points)
    }

    /// Create a series from bare prices, timestamped according to the horizon
    pub fn from_prices<I>(horizon: &Horizon, prices: I) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        Self(
            prices
                .into_iter()
                .enumerate()
                .map(|(step, price)| PricePoint {
                    timestamp: horizon.timestamp(step),
                    price: MoneyPerEnergy::new(price),
                })
                .collect(),
        )
    }

    /// The number of points in the series
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the series has no points
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the points in the series
    pub fn iter(&self) -> std::slice::Iter<'_, PricePoint> {
        self.0.iter()
    }

    /// Get the point for the given step, if there is one
    pub fn get(&self, step: usize) -> Option<&PricePoint> {
        self.0.get(step)
    }

    /// Drop every point after the first `len`
    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

/// Something which can supply a clearing-price path for a horizon
pub trait PriceProvider {
    /// Get a price path covering (at least) every time point of `horizon`
    fn price_series(&self, horizon: &Horizon) -> Result<PriceSeries>;
}

/// The `[prices]` section of `dispatch.toml`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum PriceSource {
    /// Generate prices from a seeded random process
    Synthetic(SyntheticPrices),
    /// Read prices from a CSV file
    Historical(HistoricalPrices),
}

impl Default for PriceSource {
    fn default() -> Self {
        Self::Synthetic(SyntheticPrices::default())
    }
}

impl PriceSource {
    /// Resolve relative file paths against the scenario directory
    pub fn resolve_paths(&mut self, scenario_dir: &Path) {
        if let Self::Historical(historical) = self {
            if historical.file.is_relative() {
                historical.file = scenario_dir.join(&historical.file);
            }
        }
    }

    /// Check the source parameters
    pub fn validate(&self) -> Result<(), DispatchError> {
        match self {
            Self::Synthetic(synthetic) => synthetic.validate(),
            Self::Historical(_) => Ok(()),
        }
    }
}

impl PriceProvider for PriceSource {
    fn price_series(&self, horizon: &Horizon) -> Result<PriceSeries> {
        match self {
            Self::Synthetic(synthetic) => synthetic.price_series(horizon),
            Self::Historical(historical) => historical.price_series(horizon),
        }
    }
}

/// Check that a price path can be used for the given horizon.
///
/// There must be at least `H + 1` points, starting at the horizon start. Every price must be finite
/// and non-negative, and consecutive timestamps must be exactly one step apart. Points beyond the
/// horizon are ignored.
///
/// # Returns
///
/// The clearing price for each time point `0..=H`, or [`DispatchError::MissingData`] naming the
/// first unusable step.
pub fn check_price_series(
    series: &PriceSeries,
    horizon: &Horizon,
) -> Result<Vec<MoneyPerEnergy>, DispatchError> {
    let num_points = horizon.num_points();
    if series.len() < num_points {
        return Err(DispatchError::missing_data(
            series.len(),
            format!(
                "price series has {} points but the horizon needs {num_points}",
                series.len()
            ),
        ));
    }
    if series.len() > num_points {
        debug!(
            "Ignoring {} price points beyond the end of the horizon",
            series.len() - num_points
        );
    }

    if let Some(first) = series.get(0) {
        if first.timestamp != horizon.start() {
            return Err(DispatchError::missing_data(
                0,
                format!(
                    "expected timestamp {}, found {}",
                    horizon.start(),
                    first.timestamp
                ),
            ));
        }
    }

    let interval = horizon.step_interval();
    let mut prices = Vec::with_capacity(num_points);
    let mut previous: Option<&PricePoint> = None;
    for (step, point) in series.iter().take(num_points).enumerate() {
        let price = point.price;
        if !price.is_finite() {
            return Err(DispatchError::missing_data(
                step,
                format!("price at {} is missing or not a number", point.timestamp),
            ));
        }
        if price < MoneyPerEnergy::new(0.0) {
            return Err(DispatchError::missing_data(
                step,
                format!("price at {} is negative ({price})", point.timestamp),
            ));
        }
        if let Some(previous) = previous {
            let expected = previous.timestamp + interval;
            if point.timestamp != expected {
                return Err(DispatchError::missing_data(
                    step,
                    format!("expected timestamp {expected}, found {}", point.timestamp),
                ));
            }
        }

        prices.push(price);
        previous = Some(point);
    }

    Ok(prices)
}
