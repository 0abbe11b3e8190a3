//! Fixtures for tests
use crate::battery::BatteryParameters;
use crate::horizon::{Horizon, HorizonParameters};
use crate::market::MarketParameters;
use crate::optimisation::SolverOptions;
use crate::parameters::DispatchParameters;
use crate::prices::{PriceSeries, PriceSource};
use crate::units::{Dimensionless, Energy, Power};
use rstest::fixture;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

#[fixture]
pub fn battery() -> BatteryParameters {
    BatteryParameters {
        capacity: Energy::new(40.0),
        min_state_of_charge: Energy::new(0.0),
        max_charge_power: Power::new(10.0),
        max_discharge_power: Power::new(10.0),
        efficiency: Dimensionless::new(1.0),
        self_discharge: Dimensionless::new(0.0),
        initial_state_of_charge: Energy::new(20.0),
    }
}

#[fixture]
pub fn horizon_parameters() -> HorizonParameters {
    HorizonParameters::default()
}

#[fixture]
pub fn horizon(horizon_parameters: HorizonParameters) -> Horizon {
    Horizon::from_parameters(&horizon_parameters).unwrap()
}

#[fixture]
pub fn solver_options() -> SolverOptions {
    SolverOptions {
        time_limit: 30.0,
        ..SolverOptions::default()
    }
}

#[fixture]
pub fn dispatch_parameters(
    horizon_parameters: HorizonParameters,
    battery: BatteryParameters,
    solver_options: SolverOptions,
) -> DispatchParameters {
    DispatchParameters {
        horizon: horizon_parameters,
        battery,
        market: MarketParameters::default(),
        solver: solver_options,
        prices: PriceSource::default(),
    }
}

/// The same price at every time point of the default horizon
#[fixture]
pub fn flat_prices(horizon: Horizon) -> PriceSeries {
    PriceSeries::from_prices(&horizon, vec![50.0; horizon.num_points()])
}
