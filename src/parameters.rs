//! Defines the `DispatchParameters` struct, which represents the contents of `dispatch.toml`.
use crate::battery::BatteryParameters;
use crate::error::DispatchError;
use crate::horizon::{Horizon, HorizonParameters};
use crate::input::{input_err_msg, read_toml};
use crate::market::MarketParameters;
use crate::optimisation::SolverOptions;
use crate::prices::PriceSource;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// The name of the scenario configuration file
pub const DISPATCH_PARAMETERS_FILE_NAME: &str = "dispatch.toml";

/// Everything needed for one dispatch optimisation run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DispatchParameters {
    /// The planning horizon
    #[serde(default)]
    pub horizon: HorizonParameters,
    /// The physical battery
    pub battery: BatteryParameters,
    /// The bidding protocol
    #[serde(default)]
    pub market: MarketParameters,
    /// Options for the solver
    #[serde(default)]
    pub solver: SolverOptions,
    /// Where clearing prices come from
    #[serde(default)]
    pub prices: PriceSource,
}

impl DispatchParameters {
    /// Read and validate a scenario file from the specified directory.
    ///
    /// Relative price file paths are resolved against `scenario_dir`.
    ///
    /// # Arguments
    ///
    /// * `scenario_dir` - Folder containing `dispatch.toml`
    ///
    /// # Returns
    ///
    /// The file contents as a [`DispatchParameters`] struct or an error if the file is invalid
    pub fn from_path<P: AsRef<Path>>(scenario_dir: P) -> Result<DispatchParameters> {
        let scenario_dir = scenario_dir.as_ref();
        let file_path = scenario_dir.join(DISPATCH_PARAMETERS_FILE_NAME);
        let mut params: DispatchParameters = read_toml(&file_path)?;
        params.prices.resolve_paths(scenario_dir);

        params
            .validate()
            .with_context(|| input_err_msg(&file_path))?;

        Ok(params)
    }

    /// Check every section, returning the first problem found
    pub fn validate(&self) -> Result<(), DispatchError> {
        self.horizon()?;
        self.battery.validate()?;
        self.market.validate(&self.battery)?;
        self.solver.validate()?;
        self.prices.validate()?;

        Ok(())
    }

    /// Build the planning horizon
    pub fn horizon(&self) -> Result<Horizon, DispatchError> {
        Horizon::from_parameters(&self.horizon)
    }
}
