//! Code for performing the dispatch optimisation.
//!
//! This assembles the battery and market constraints into one problem, sets the revenue objective,
//! solves it and reads the solution back into a plain time-indexed result.
use crate::battery::{BatteryVariables, add_battery_constraints, add_battery_variables};
use crate::error::DispatchError;
use crate::horizon::Horizon;
use crate::market::{BidMap, BidSide, add_bid_constraints, add_bid_variables};
use crate::optimisation::{Problem, Solution, SolveStatus};
use crate::parameters::DispatchParameters;
use crate::prices::{PriceProvider, PriceSeries, check_price_series};
use crate::units::{Energy, Money, MoneyPerEnergy, Power};
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use log::{debug, info};

/// The battery's state at one time point
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchPoint {
    /// The time point index
    pub step: usize,
    /// When the time point starts
    pub timestamp: DateTime<FixedOffset>,
    /// The clearing price
    pub price: MoneyPerEnergy,
    /// Energy stored at the time point
    pub state_of_charge: Energy,
    /// Charge power during the following interval
    pub charge: Power,
    /// Discharge power during the following interval
    pub discharge: Power,
    /// Whether the battery is charging during the following interval
    pub charging: bool,
}

/// What happened to one bid lane
#[derive(Debug, Clone, PartialEq)]
pub struct BidOutcome {
    /// The dispatch interval
    pub step: usize,
    /// When the interval starts
    pub timestamp: DateTime<FixedOffset>,
    /// The bid slot
    pub slot: usize,
    /// Buy or sell
    pub side: BidSide,
    /// The bid price
    pub price: MoneyPerEnergy,
    /// The bid volume
    pub volume: Power,
    /// Whether the bid was placed
    pub placed: bool,
    /// Whether the bid cleared the market
    pub activated: bool,
    /// The volume actually traded
    pub executed: Power,
}

/// The outcome of a dispatch optimisation run
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    /// How the solve terminated
    pub status: SolveStatus,
    /// Trading profit over the horizon
    pub objective: Money,
    /// One entry per time point `0..=H`. The terminal point has zero power.
    pub points: Vec<DispatchPoint>,
    /// One entry per bid lane
    pub bids: Vec<BidOutcome>,
}

impl DispatchResult {
    /// The number of dispatch intervals
    pub fn num_steps(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    /// Iterate over the state-of-charge trajectory
    pub fn iter_state_of_charge(&self) -> impl Iterator<Item = Energy> + '_ {
        self.points.iter().map(|point| point.state_of_charge)
    }

    /// Iterate over the bids which were placed
    pub fn iter_placed_bids(&self) -> impl Iterator<Item = &BidOutcome> {
        self.bids.iter().filter(|bid| bid.placed)
    }

    /// Iterate over the volumes traded by activated bids
    pub fn iter_executed_volumes(&self) -> impl Iterator<Item = (usize, BidSide, Power)> + '_ {
        self.bids
            .iter()
            .filter(|bid| bid.activated)
            .map(|bid| (bid.step, bid.side, bid.executed))
    }
}

/// Get a price path from the configured source and optimise against it.
///
/// # Arguments
///
/// * `params` - The scenario parameters
pub fn run_dispatch(params: &DispatchParameters) -> Result<DispatchResult> {
    params.validate()?;
    let horizon = params.horizon()?;
    let series = params
        .prices
        .price_series(&horizon)
        .context("Failed to load price data.")?;

    Ok(optimise_dispatch(params, &series)?)
}

/// Perform the dispatch optimisation for a given price path.
///
/// Parameters and prices are checked before anything is assembled.
///
/// # Arguments
///
/// * `params` - The scenario parameters (the `prices` section is not used)
/// * `series` - Clearing prices for every time point of the horizon
///
/// # Returns
///
/// The optimal (or time-limited) dispatch, or a [`DispatchError`].
pub fn optimise_dispatch(
    params: &DispatchParameters,
    series: &PriceSeries,
) -> Result<DispatchResult, DispatchError> {
    params.validate()?;
    let horizon = params.horizon()?;
    let prices = check_price_series(series, &horizon)?;

    if horizon.num_steps() == 0 {
        info!("Horizon has no intervals; nothing to optimise");
        return Ok(idle_result(params, series));
    }

    info!(
        "Assembling dispatch problem for {} steps of {}h",
        horizon.num_steps(),
        horizon.step_duration()
    );
    let mut problem = Problem::default();
    let battery_vars = add_battery_variables(&mut problem, &params.battery, &horizon);
    let bids = add_bid_variables(
        &mut problem,
        &params.market,
        &params.battery,
        &horizon,
        params.market.price_cap(&prices),
    );
    add_battery_constraints(&mut problem, &battery_vars, &params.battery, &horizon);
    add_bid_constraints(
        &mut problem,
        &bids,
        &battery_vars,
        &params.market,
        &params.battery,
        &prices,
        &horizon,
    );
    set_revenue_objective(&mut problem, &battery_vars, &prices, &horizon);

    let solution = problem.solve(&params.solver)?;
    info!("Objective value: {}", solution.objective);

    Ok(extract_result(
        &solution,
        &battery_vars,
        &bids,
        params.market.bid_slots,
        series,
        &prices,
        &horizon,
    ))
}

/// Revenue is `price * dt * (discharge - charge)` summed over the intervals
fn set_revenue_objective(
    problem: &mut Problem,
    vars: &BatteryVariables,
    prices: &[MoneyPerEnergy],
    horizon: &Horizon,
) {
    let dt = horizon.step_duration();
    for t in horizon.iter_intervals() {
        let revenue_per_power = (prices[t] * (Power::new(1.0) * dt)).value();
        problem.set_coefficient(vars.discharge[t], revenue_per_power);
        problem.set_coefficient(vars.charge[t], -revenue_per_power);
    }
}

/// The result for a horizon with no intervals: the battery just sits at its initial charge
fn idle_result(params: &DispatchParameters, series: &PriceSeries) -> DispatchResult {
    let point = series
        .get(0)
        .map(|first| DispatchPoint {
            step: 0,
            timestamp: first.timestamp,
            price: first.price,
            state_of_charge: params.battery.initial_state_of_charge,
            charge: Power::new(0.0),
            discharge: Power::new(0.0),
            charging: false,
        })
        .into_iter()
        .collect();

    DispatchResult {
        status: SolveStatus::Optimal,
        objective: Money::new(0.0),
        points: point,
        bids: Vec::new(),
    }
}

/// Read the solved values back into a [`DispatchResult`]
fn extract_result(
    solution: &Solution,
    battery_vars: &BatteryVariables,
    bids: &BidMap,
    bid_slots: usize,
    series: &PriceSeries,
    prices: &[MoneyPerEnergy],
    horizon: &Horizon,
) -> DispatchResult {
    let timestamp = |step: usize| {
        series
            .get(step)
            .map_or_else(|| horizon.timestamp(step), |p| p.timestamp)
    };

    let points = horizon
        .iter_points()
        .map(|step| {
            let interval = (step < horizon.num_steps()).then_some(step);
            DispatchPoint {
                step,
                timestamp: timestamp(step),
                price: prices[step],
                state_of_charge: Energy::new(
                    solution.value(battery_vars.state_of_charge[step]),
                ),
                charge: Power::new(
                    interval.map_or(0.0, |t| solution.value(battery_vars.charge[t])),
                ),
                discharge: Power::new(
                    interval.map_or(0.0, |t| solution.value(battery_vars.discharge[t])),
                ),
                charging: interval.is_some_and(|t| solution.is_set(battery_vars.charging[t])),
            }
        })
        .collect();

    let mut outcomes = Vec::with_capacity(bids.len());
    for step in horizon.iter_intervals() {
        for slot in 0..bid_slots {
            for side in BidSide::ALL {
                let vars = bids.get(step, slot, side);
                outcomes.push(BidOutcome {
                    step,
                    timestamp: timestamp(step),
                    slot,
                    side,
                    price: MoneyPerEnergy::new(solution.value(vars.price)),
                    volume: Power::new(solution.value(vars.volume)),
                    placed: solution.is_set(vars.placed),
                    activated: solution.is_set(vars.activated),
                    executed: Power::new(solution.value(vars.executed)),
                });
            }
        }
    }
    debug!(
        "{} of {} bids were placed",
        outcomes.iter().filter(|bid| bid.placed).count(),
        outcomes.len()
    );

    DispatchResult {
        status: solution.status,
        objective: Money::new(solution.objective),
        points,
        bids: outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{assert_error, dispatch_parameters, flat_prices, horizon};
    use crate::prices::{HistoricalPrices, PriceSource};
    use crate::units::Dimensionless;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    #[rstest]
    fn test_flat_prices_no_trade(
        mut dispatch_parameters: DispatchParameters,
        flat_prices: PriceSeries,
    ) {
        dispatch_parameters.battery.efficiency = Dimensionless::new(0.9);
        let result = optimise_dispatch(&dispatch_parameters, &flat_prices).unwrap();

        assert_eq!(result.status, SolveStatus::Optimal);
        assert_approx_eq!(f64, result.objective.value(), 0.0, epsilon = 1e-6);
        assert_eq!(result.iter_executed_volumes().count(), 0);
        assert_eq!(result.points.len(), 25);
    }

    #[rstest]
    fn test_terminal_point_has_no_power(dispatch_parameters: DispatchParameters, horizon: Horizon) {
        let prices = (0..horizon.num_points()).map(|t| if t % 2 == 0 { 20.0 } else { 80.0 });
        let series = PriceSeries::from_prices(&horizon, prices);
        let result = optimise_dispatch(&dispatch_parameters, &series).unwrap();

        let last = result.points.last().unwrap();
        assert_eq!(last.step, horizon.num_steps());
        assert_eq!(last.charge, Power::new(0.0));
        assert_eq!(last.discharge, Power::new(0.0));
        assert!(!last.charging);
        assert!(result.objective.value() > 0.0);
    }

    #[rstest]
    fn test_invalid_before_prices_checked(mut dispatch_parameters: DispatchParameters) {
        dispatch_parameters.market.bid_slots = 0;
        assert!(matches!(
            optimise_dispatch(&dispatch_parameters, &PriceSeries::default()),
            Err(DispatchError::InvalidConfiguration(_))
        ));
    }

    #[rstest]
    fn test_run_dispatch_synthetic(dispatch_parameters: DispatchParameters) {
        let result = run_dispatch(&dispatch_parameters).unwrap();
        assert_eq!(result.num_steps(), 24);
        assert_eq!(result.bids.len(), 24 * 2 * 2);
        assert!(result.objective.value() >= -1e-6);
    }

    #[rstest]
    fn test_run_dispatch_missing_file(mut dispatch_parameters: DispatchParameters) {
        dispatch_parameters.prices = PriceSource::Historical(HistoricalPrices {
            file: "/no/such/prices.csv".into(),
            hold: false,
        });
        assert_error!(run_dispatch(&dispatch_parameters), "Failed to load price data.");
    }
}
