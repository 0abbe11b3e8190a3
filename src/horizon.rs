//! The planning horizon: how many steps there are, how long each lasts and when it starts.
use crate::error::DispatchError;
use crate::units::Hours;
use chrono::{DateTime, FixedOffset, TimeDelta, TimeZone, Utc};
use log::warn;
use serde::Deserialize;
use std::ops::{Range, RangeInclusive};

/// Horizons longer than this are likely to take a long time to solve
const LARGE_HORIZON_STEPS: usize = 24 * 4 * 31;

fn default_days() -> u32 {
    1
}

fn default_granularity() -> u32 {
    1
}

/// The start of the horizon if none is configured
fn default_start() -> DateTime<FixedOffset> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .unwrap()
        .fixed_offset()
}

/// The `[horizon]` section of `dispatch.toml`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HorizonParameters {
    /// Number of days to plan for
    #[serde(default = "default_days")]
    pub days: u32,
    /// Number of time steps per hour
    #[serde(default = "default_granularity")]
    pub granularity: u32,
    /// Explicit number of dispatch intervals, overriding `days`
    #[serde(default)]
    pub steps: Option<usize>,
    /// Timestamp of the first time step (RFC 3339, e.g. "2024-01-01T00:00:00+01:00")
    #[serde(default)]
    pub start: Option<DateTime<FixedOffset>>,
}

impl Default for HorizonParameters {
    fn default() -> Self {
        Self {
            days: default_days(),
            granularity: default_granularity(),
            steps: None,
            start: None,
        }
    }
}

/// A validated planning horizon of `H` intervals and `H + 1` time points.
#[derive(Debug, Clone, PartialEq)]
pub struct Horizon {
    num_steps: usize,
    granularity: u32,
    start: DateTime<FixedOffset>,
}

impl Horizon {
    /// Create a new horizon with `num_steps` intervals of `1 / granularity` hours each
    pub fn new(
        num_steps: usize,
        granularity: u32,
        start: DateTime<FixedOffset>,
    ) -> Result<Self, DispatchError> {
        if granularity == 0 || 60 % granularity != 0 {
            return Err(DispatchError::invalid_config(format!(
                "horizon granularity must divide an hour into whole minutes (got {granularity})"
            )));
        }

        if num_steps > LARGE_HORIZON_STEPS {
            warn!("Horizon has {num_steps} steps; the solve may hit its time limit");
        }

        Ok(Self {
            num_steps,
            granularity,
            start,
        })
    }

    /// Build the horizon described by the `[horizon]` section
    pub fn from_parameters(params: &HorizonParameters) -> Result<Self, DispatchError> {
        let num_steps = match params.steps {
            Some(steps) => steps,
            None => (params.granularity as usize)
                .checked_mul(24)
                .and_then(|n| n.checked_mul(params.days as usize))
                .ok_or_else(|| DispatchError::invalid_config("horizon is too long"))?,
        };

        Self::new(
            num_steps,
            params.granularity,
            params.start.unwrap_or_else(default_start),
        )
    }

    /// The number of dispatch intervals, `H`
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// The number of time points, `H + 1`
    pub fn num_points(&self) -> usize {
        self.num_steps + 1
    }

    /// Number of time steps per hour
    pub fn granularity(&self) -> u32 {
        self.granularity
    }

    /// The length of one interval
    pub fn step_duration(&self) -> Hours {
        Hours::new(1.0 / self.granularity as f64)
    }

    /// The length of one interval as a calendar duration
    pub fn step_interval(&self) -> TimeDelta {
        TimeDelta::minutes(60 / self.granularity as i64)
    }

    /// The timestamp of the first time point
    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    /// The timestamp of the given time point
    pub fn timestamp(&self, step: usize) -> DateTime<FixedOffset> {
        self.start + self.step_interval() * i32::try_from(step).expect("Step index out of range")
    }

    /// Iterate over the dispatch intervals `0..H`
    pub fn iter_intervals(&self) -> Range<usize> {
        0..self.num_steps
    }

    /// Iterate over the time points `0..=H`
    pub fn iter_points(&self) -> RangeInclusive<usize> {
        0..=self.num_steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1, 24)]
    #[case(1, 4, 96)]
    #[case(7, 1, 168)]
    #[case(0, 1, 0)]
    fn test_from_parameters(#[case] days: u32, #[case] granularity: u32, #[case] steps: usize) {
        let params = HorizonParameters {
            days,
            granularity,
            ..HorizonParameters::default()
        };
        let horizon = Horizon::from_parameters(&params).unwrap();
        assert_eq!(horizon.num_steps(), steps);
        assert_eq!(horizon.num_points(), steps + 1);
        assert_eq!(horizon.iter_intervals().len(), steps);
    }

    #[test]
    fn test_steps_override_days() {
        let params = HorizonParameters {
            days: 365,
            steps: Some(2),
            ..HorizonParameters::default()
        };
        assert_eq!(Horizon::from_parameters(&params).unwrap().num_steps(), 2);
    }

    #[rstest]
    #[case(0)]
    #[case(7)]
    #[case(120)]
    fn test_bad_granularity(#[case] granularity: u32) {
        assert!(matches!(
            Horizon::new(24, granularity, default_start()),
            Err(DispatchError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_timestamps() {
        let start = DateTime::parse_from_rfc3339("2024-03-01T00:00:00+01:00").unwrap();
        let horizon = Horizon::new(96, 4, start).unwrap();
        assert_eq!(horizon.step_duration(), Hours::new(0.25));
        assert_eq!(
            horizon.timestamp(5),
            DateTime::parse_from_rfc3339("2024-03-01T01:15:00+01:00").unwrap()
        );
        assert_eq!(
            horizon.timestamp(96),
            DateTime::parse_from_rfc3339("2024-03-02T00:00:00+01:00").unwrap()
        );
    }
}
