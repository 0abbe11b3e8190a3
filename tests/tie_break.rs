//! Bids priced exactly at the clearing price, under each tie-break rule.
use bess_dispatch::battery::{BatteryParameters, add_battery_constraints, add_battery_variables};
use bess_dispatch::error::DispatchError;
use bess_dispatch::horizon::{Horizon, HorizonParameters};
use bess_dispatch::market::{
    BidSide, MarketParameters, TieBreak, add_bid_constraints, add_bid_variables,
};
use bess_dispatch::optimisation::{Problem, Solution, SolverOptions};
use bess_dispatch::units::{Dimensionless, Energy, MoneyPerEnergy, Power};
use rstest::rstest;

const CLEARING_PRICE: f64 = 50.0;

/// Solve a two-step problem in which the first bid of `side` is placed at the clearing price
/// with its activation fixed to `activated`
fn solve_tied_bid(
    tie_break: TieBreak,
    side: BidSide,
    activated: bool,
) -> Result<Solution, DispatchError> {
    let battery = BatteryParameters {
        capacity: Energy::new(40.0),
        min_state_of_charge: Energy::new(0.0),
        max_charge_power: Power::new(10.0),
        max_discharge_power: Power::new(10.0),
        efficiency: Dimensionless::new(1.0),
        self_discharge: Dimensionless::new(0.0),
        initial_state_of_charge: Energy::new(20.0),
    };
    let market = MarketParameters {
        bid_slots: 1,
        tie_break,
        ..MarketParameters::default()
    };
    let horizon = Horizon::from_parameters(&HorizonParameters {
        steps: Some(2),
        ..HorizonParameters::default()
    })
    .unwrap();
    let prices = vec![MoneyPerEnergy::new(CLEARING_PRICE); horizon.num_points()];

    let mut problem = Problem::default();
    let battery_vars = add_battery_variables(&mut problem, &battery, &horizon);
    let bids = add_bid_variables(
        &mut problem,
        &market,
        &battery,
        &horizon,
        market.price_cap(&prices),
    );
    add_battery_constraints(&mut problem, &battery_vars, &battery, &horizon);
    add_bid_constraints(
        &mut problem,
        &bids,
        &battery_vars,
        &market,
        &battery,
        &prices,
        &horizon,
    );

    let tied = bids.get(0, 0, side);
    problem.fix_variable(tied.price, CLEARING_PRICE);
    problem.fix_variable(tied.volume, 1.0);
    problem.fix_variable(tied.placed, 1.0);
    problem.fix_variable(tied.activated, if activated { 1.0 } else { 0.0 });

    problem.solve(&SolverOptions::default())
}

#[rstest]
#[case(TieBreak::Accept, true, true)]
#[case(TieBreak::Accept, false, false)]
#[case(TieBreak::Reject, true, false)]
#[case(TieBreak::Reject, false, true)]
#[case(TieBreak::Either, true, true)]
#[case(TieBreak::Either, false, true)]
fn test_tied_bid(
    #[values(BidSide::Buy, BidSide::Sell)] side: BidSide,
    #[case] tie_break: TieBreak,
    #[case] activated: bool,
    #[case] feasible: bool,
) {
    let result = solve_tied_bid(tie_break, side, activated);
    if feasible {
        assert!(result.is_ok(), "{side} bid with activated = {activated}");
    } else {
        assert!(matches!(result, Err(DispatchError::Infeasible { .. })));
    }
}
