//! Seeded synthetic price paths.
use super::{PriceProvider, PriceSeries};
use crate::error::DispatchError;
use crate::horizon::Horizon;
use crate::units::{Dimensionless, MoneyPerEnergy};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::f64::consts::PI;

fn default_mean() -> MoneyPerEnergy {
    MoneyPerEnergy::new(50.0)
}

fn default_volatility() -> MoneyPerEnergy {
    MoneyPerEnergy::new(10.0)
}

fn default_smoothing() -> Dimensionless {
    Dimensionless::new(0.7)
}

/// An exponentially smoothed random walk around a mean price.
///
/// The same seed always gives the same path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyntheticPrices {
    /// Seed for the random number generator
    #[serde(default)]
    pub seed: u64,
    /// The price the walk reverts to
    #[serde(default = "default_mean")]
    pub mean: MoneyPerEnergy,
    /// Standard deviation of the per-step shock
    #[serde(default = "default_volatility")]
    pub volatility: MoneyPerEnergy,
    /// Weight of the previous price in each step, in `[0, 1)`
    #[serde(default = "default_smoothing")]
    pub smoothing: Dimensionless,
    /// Prices are clamped to be no lower than this
    #[serde(default)]
    pub floor: MoneyPerEnergy,
}

impl Default for SyntheticPrices {
    fn default() -> Self {
        Self {
            seed: 0,
            mean: default_mean(),
            volatility: default_volatility(),
            smoothing: default_smoothing(),
            floor: MoneyPerEnergy::default(),
        }
    }
}

impl SyntheticPrices {
    /// Check the generator parameters
    pub fn validate(&self) -> Result<(), DispatchError> {
        let zero = MoneyPerEnergy::new(0.0);
        if !self.mean.is_finite() || self.mean < zero {
            return Err(DispatchError::invalid_config(
                "prices mean must be a finite, non-negative number",
            ));
        }
        if !self.volatility.is_finite() || self.volatility < zero {
            return Err(DispatchError::invalid_config(
                "prices volatility must be a finite, non-negative number",
            ));
        }
        if !(0.0..1.0).contains(&self.smoothing.value()) {
            return Err(DispatchError::invalid_config(
                "prices smoothing must be in [0, 1)",
            ));
        }
        if !self.floor.is_finite() || self.floor < zero {
            return Err(DispatchError::invalid_config(
                "prices floor must be a finite, non-negative number",
            ));
        }

        Ok(())
    }

    /// Generate `num_points` prices
    pub fn generate(&self, num_points: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let smoothing = self.smoothing.value();
        let floor = self.floor.value();

        let mut level = self.mean.value();
        (0..num_points)
            .map(|_| {
                let target =
                    self.mean.value() + self.volatility.value() * standard_normal(&mut rng);
                level = smoothing * level + (1.0 - smoothing) * target;
                level.max(floor)
            })
            .collect()
    }
}

/// Draw from the standard normal distribution with the Box-Muller transform
fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

impl PriceProvider for SyntheticPrices {
    fn price_series(&self, horizon: &Horizon) -> Result<PriceSeries> {
        Ok(PriceSeries::from_prices(
            horizon,
            self.generate(horizon.num_points()),
        ))
    }
}
