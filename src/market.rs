//! The day-ahead bidding protocol.
//!
//! Every dispatch interval has a number of bid slots, and every slot has a buy lane and a sell
//! lane. Whether a placed bid is executed depends on how its price compares with the interval's
//! clearing price. That comparison is reified with big-M constraints so the whole model stays
//! linear.
use crate::battery::{BatteryParameters, BatteryVariables};
use crate::error::DispatchError;
use crate::horizon::Horizon;
use crate::optimisation::{ConstraintClass, Problem, Variable};
use crate::units::{MoneyPerEnergy, Power};
use derive_more::Display;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_string_enum::DeserializeLabeledStringEnum;

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_param_default!(default_bid_slots, usize, 2);
define_param_default!(default_min_bid_volume, Power, Power::new(1.0));
define_param_default!(default_tie_tolerance, MoneyPerEnergy, MoneyPerEnergy::new(0.01));
define_param_default!(default_bid_price_headroom, MoneyPerEnergy, MoneyPerEnergy::new(1.0));

/// Which way a bid trades
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidSide {
    /// Buy energy from the market (charges the battery)
    #[display("buy")]
    Buy,
    /// Sell energy to the market (discharges the battery)
    #[display("sell")]
    Sell,
}

impl BidSide {
    /// Both sides, in the order their lanes are created
    pub const ALL: [BidSide; 2] = [BidSide::Buy, BidSide::Sell];
}

/// What happens to a bid priced exactly at the clearing price
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// The bid is executed
    #[default]
    #[string = "accept"]
    Accept,
    /// The bid is not executed
    #[string = "reject"]
    Reject,
    /// Either outcome is allowed and the solver picks whichever is more profitable
    #[string = "either"]
    Either,
}

impl TieBreak {
    /// The margins by which the bid price must clear when activated and when not activated.
    ///
    /// A positive margin turns the corresponding inequality into a strict one, at the resolution
    /// given by `tolerance`.
    pub fn margins(self, tolerance: MoneyPerEnergy) -> (f64, f64) {
        let tolerance = tolerance.value();
        match self {
            TieBreak::Accept => (0.0, tolerance),
            TieBreak::Reject => (tolerance, 0.0),
            TieBreak::Either => (0.0, 0.0),
        }
    }
}

/// The `[market]` section of `dispatch.toml`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarketParameters {
    /// Number of parallel bid slots per time step
    #[serde(default = "default_bid_slots")]
    pub bid_slots: usize,
    /// The smallest volume a placed bid may have
    #[serde(default = "default_min_bid_volume")]
    pub min_bid_volume: Power,
    /// What happens to a bid priced exactly at the clearing price
    #[serde(default)]
    pub tie_break: TieBreak,
    /// Price resolution used to make the tie-break strict
    #[serde(default = "default_tie_tolerance")]
    pub tie_tolerance: MoneyPerEnergy,
    /// How far above the highest clearing price bids may be priced
    #[serde(default = "default_bid_price_headroom")]
    pub bid_price_headroom: MoneyPerEnergy,
}

impl Default for MarketParameters {
    fn default() -> Self {
        Self {
            bid_slots: default_bid_slots(),
            min_bid_volume: default_min_bid_volume(),
            tie_break: TieBreak::default(),
            tie_tolerance: default_tie_tolerance(),
            bid_price_headroom: default_bid_price_headroom(),
        }
    }
}

impl MarketParameters {
    /// Check the parameters against each other and against the battery's power limits
    pub fn validate(&self, battery: &BatteryParameters) -> Result<(), DispatchError> {
        if self.bid_slots == 0 {
            return Err(DispatchError::invalid_config(
                "market bid_slots must be at least one",
            ));
        }

        let min_bid = self.min_bid_volume;
        if !min_bid.is_finite() || min_bid < Power::new(0.0) {
            return Err(DispatchError::invalid_config(format!(
                "market min_bid_volume must be a finite, non-negative number (got {min_bid})"
            )));
        }
        if min_bid > battery.max_charge_power || min_bid > battery.max_discharge_power {
            return Err(DispatchError::invalid_config(format!(
                "market min_bid_volume ({min_bid}) exceeds the battery's power limits"
            )));
        }

        let tolerance = self.tie_tolerance;
        if !tolerance.is_finite() || tolerance <= MoneyPerEnergy::new(0.0) {
            return Err(DispatchError::invalid_config(format!(
                "market tie_tolerance must be a finite number greater than zero (got {tolerance})"
            )));
        }

        let headroom = self.bid_price_headroom;
        if !headroom.is_finite() || headroom < tolerance {
            return Err(DispatchError::invalid_config(format!(
                "market bid_price_headroom ({headroom}) must be finite and at least \
                tie_tolerance ({tolerance})"
            )));
        }

        Ok(())
    }

    /// The highest price a bid may be given, for the given clearing prices
    pub fn price_cap(&self, clearing_prices: &[MoneyPerEnergy]) -> MoneyPerEnergy {
        let highest = clearing_prices
            .iter()
            .copied()
            .fold(MoneyPerEnergy::new(0.0), |a, b| if b > a { b } else { a });
        highest + self.bid_price_headroom
    }
}

/// Identifies one bid lane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BidKey {
    /// The dispatch interval
    pub step: usize,
    /// The bid slot within the interval
    pub slot: usize,
    /// Buy or sell
    pub side: BidSide,
}

/// The decision variables of one bid lane
#[derive(Debug, Clone, Copy)]
pub struct BidVariables {
    /// The bid price
    pub price: Variable,
    /// The bid volume
    pub volume: Variable,
    /// Whether the bid is placed
    pub placed: Variable,
    /// Whether the bid clears the market
    pub activated: Variable,
    /// The volume actually traded
    pub executed: Variable,
}

/// All bid lanes in the problem, in the order they were created.
#[derive(Debug, Default)]
pub struct BidMap(IndexMap<BidKey, BidVariables>);

impl BidMap {
    /// Get the variables for the given lane
    pub fn get(&self, step: usize, slot: usize, side: BidSide) -> &BidVariables {
        self.0
            .get(&BidKey { step, slot, side })
            .expect("No bid found for given params")
    }

    /// Iterate over every lane
    pub fn iter(&self) -> impl Iterator<Item = (&BidKey, &BidVariables)> {
        self.0.iter()
    }

    /// The number of lanes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no lanes (only for a zero-length horizon)
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The maximum volume of a lane, which is the battery's power limit on that side
fn max_volume(battery: &BatteryParameters, side: BidSide) -> f64 {
    match side {
        BidSide::Buy => battery.max_charge_power.value(),
        BidSide::Sell => battery.max_discharge_power.value(),
    }
}

/// Add the variables for every bid lane to the problem.
///
/// # Arguments
///
/// * `problem` - The optimisation problem
/// * `market` - Market parameters
/// * `battery` - Battery parameters, which bound the bid volumes
/// * `horizon` - The planning horizon
/// * `price_cap` - Upper bound on bid prices
pub fn add_bid_variables(
    problem: &mut Problem,
    market: &MarketParameters,
    battery: &BatteryParameters,
    horizon: &Horizon,
    price_cap: MoneyPerEnergy,
) -> BidMap {
    let mut bids = IndexMap::new();
    for step in horizon.iter_intervals() {
        for slot in 0..market.bid_slots {
            for side in BidSide::ALL {
                let max_volume = max_volume(battery, side);
                let vars = BidVariables {
                    price: problem.add_continuous(0.0, 0.0, price_cap.value()),
                    volume: problem.add_continuous(0.0, 0.0, max_volume),
                    placed: problem.add_binary(0.0),
                    activated: problem.add_binary(0.0),
                    executed: problem.add_continuous(0.0, 0.0, max_volume),
                };

                let existing = bids.insert(BidKey { step, slot, side }, vars).is_some();
                assert!(!existing, "Duplicate entry for bid");
            }
        }
    }

    BidMap(bids)
}

/// Add the bidding constraints and link executed volumes to the battery's power flows.
///
/// # Arguments
///
/// * `problem` - The optimisation problem
/// * `bids` - Variables for every bid lane
/// * `battery_vars` - The battery's charge/discharge variables
/// * `market` - Market parameters
/// * `battery` - Battery parameters
/// * `clearing_prices` - Clearing price for every time point
/// * `horizon` - The planning horizon
pub fn add_bid_constraints(
    problem: &mut Problem,
    bids: &BidMap,
    battery_vars: &BatteryVariables,
    market: &MarketParameters,
    battery: &BatteryParameters,
    clearing_prices: &[MoneyPerEnergy],
    horizon: &Horizon,
) {
    let big_m = (market.price_cap(clearing_prices) + market.tie_tolerance).value();
    let margins = market.tie_break.margins(market.tie_tolerance);

    for step in horizon.iter_intervals() {
        let clearing = clearing_prices[step].value();

        for slot in 0..market.bid_slots {
            let buy = bids.get(step, slot, BidSide::Buy);
            let sell = bids.get(step, slot, BidSide::Sell);

            // A slot holds a buy bid or a sell bid, never both
            problem.add_upper(
                ConstraintClass::PlacementExclusion,
                step,
                1.0,
                [(buy.placed, 1.0), (sell.placed, 1.0)],
            );

            for (side, vars) in [(BidSide::Buy, buy), (BidSide::Sell, sell)] {
                add_lane_constraints(
                    problem,
                    step,
                    side,
                    vars,
                    market.min_bid_volume.value(),
                    max_volume(battery, side),
                );
                add_clearing_constraints(problem, step, side, vars, clearing, big_m, margins);
            }
        }

        add_aggregation_constraints(problem, bids, battery_vars, market.bid_slots, step);
    }
}

/// Add the placement, activation and executed-volume constraints for one lane
fn add_lane_constraints(
    problem: &mut Problem,
    step: usize,
    side: BidSide,
    vars: &BidVariables,
    min_bid_volume: f64,
    max_volume: f64,
) {
    // placed * min_bid <= volume. This only bounds the volume from below when placed.
    problem.add_upper(
        ConstraintClass::MinimumBidVolume,
        step,
        0.0,
        [(vars.placed, min_bid_volume), (vars.volume, -1.0)],
    );

    problem.add_upper(
        ConstraintClass::ActivationRequiresPlacement,
        step,
        0.0,
        [(vars.activated, 1.0), (vars.placed, -1.0)],
    );

    // executed = volume if activated, else 0. The volume's upper bound is the tightest M.
    problem.add_upper(
        ConstraintClass::ExecutedVolume,
        step,
        0.0,
        [(vars.executed, 1.0), (vars.volume, -1.0)],
    );
    problem.add_upper(
        ConstraintClass::ExecutedVolume,
        step,
        0.0,
        [(vars.executed, 1.0), (vars.activated, -max_volume)],
    );
    problem.add_lower(
        ConstraintClass::ExecutedVolume,
        step,
        -max_volume,
        [
            (vars.executed, 1.0),
            (vars.volume, -1.0),
            (vars.activated, -max_volume),
        ],
    );

    log::trace!("Added {side} lane constraints for step {step}");
}

/// Add the market-clearing constraints for one lane.
///
/// For a buy bid, with `p` the bid price, `c` the clearing price, `a` activation and `x`
/// placement:
///
/// ```text
/// a = 1          =>  p >= c + margin_activated
/// a = 0, x = 1   =>  p <= c - margin_not_activated
/// ```
///
/// and the mirror image for a sell bid. The second implication is switched off for unplaced
/// bids so that their price is free.
fn add_clearing_constraints(
    problem: &mut Problem,
    step: usize,
    side: BidSide,
    vars: &BidVariables,
    clearing: f64,
    big_m: f64,
    (margin_activated, margin_not_activated): (f64, f64),
) {
    match side {
        BidSide::Buy => {
            problem.add_lower(
                ConstraintClass::ClearingActivated,
                step,
                clearing + margin_activated - big_m,
                [(vars.price, 1.0), (vars.activated, -big_m)],
            );
            problem.add_upper(
                ConstraintClass::ClearingNotActivated,
                step,
                clearing - margin_not_activated + big_m,
                [
                    (vars.price, 1.0),
                    (vars.activated, -big_m),
                    (vars.placed, big_m),
                ],
            );
        }
        BidSide::Sell => {
            problem.add_upper(
                ConstraintClass::ClearingActivated,
                step,
                clearing - margin_activated + big_m,
                [(vars.price, 1.0), (vars.activated, big_m)],
            );
            problem.add_lower(
                ConstraintClass::ClearingNotActivated,
                step,
                clearing + margin_not_activated - big_m,
                [
                    (vars.price, 1.0),
                    (vars.activated, big_m),
                    (vars.placed, -big_m),
                ],
            );
        }
    }
}

/// Charge power is the sum of executed buy volumes; discharge power the sum of executed sells
fn add_aggregation_constraints(
    problem: &mut Problem,
    bids: &BidMap,
    battery_vars: &BatteryVariables,
    bid_slots: usize,
    step: usize,
) {
    for (side, power_var, class) in [
        (
            BidSide::Buy,
            battery_vars.charge[step],
            ConstraintClass::ChargeAggregation,
        ),
        (
            BidSide::Sell,
            battery_vars.discharge[step],
            ConstraintClass::DischargeAggregation,
        ),
    ] {
        let executed = (0..bid_slots).map(|slot| (bids.get(step, slot, side).executed, -1.0));
        problem.add_equality(
            class,
            step,
            0.0,
            std::iter::once((power_var, 1.0)).chain(executed),
        );
    }
}
