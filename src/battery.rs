//! The physical battery: parameters, state-of-charge dynamics and charge/discharge exclusion.
use crate::error::DispatchError;
use crate::horizon::Horizon;
use crate::optimisation::{ConstraintClass, Problem, Variable};
use crate::units::{Dimensionless, Energy, Power};
use serde::Deserialize;

/// Physical parameters of the battery, as read from the `[battery]` section of `dispatch.toml`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatteryParameters {
    /// Usable energy capacity (the maximum state of charge)
    pub capacity: Energy,
    /// The lowest state of charge the battery may reach
    #[serde(default)]
    pub min_state_of_charge: Energy,
    /// Maximum power drawn from the grid while charging
    pub max_charge_power: Power,
    /// Maximum power fed into the grid while discharging
    pub max_discharge_power: Power,
    /// Round-trip efficiency, applied on both the charge and the discharge side
    pub efficiency: Dimensionless,
    /// Fraction of the stored energy lost per time step
    #[serde(default)]
    pub self_discharge: Dimensionless,
    /// State of charge at the start of the horizon, which must also be reached at the end
    pub initial_state_of_charge: Energy,
}

/// Check that a quantity is finite and strictly positive
fn check_positive(name: &str, value: f64) -> Result<(), DispatchError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DispatchError::invalid_config(format!(
            "battery {name} must be a finite number greater than zero (got {value})"
        )))
    }
}

impl BatteryParameters {
    /// Check the parameters are physically meaningful.
    ///
    /// This must be called before any constraints are assembled from the parameters.
    pub fn validate(&self) -> Result<(), DispatchError> {
        check_positive("capacity", self.capacity.value())?;
        check_positive("max_charge_power", self.max_charge_power.value())?;
        check_positive("max_discharge_power", self.max_discharge_power.value())?;

        let min_soc = self.min_state_of_charge.value();
        if !(min_soc.is_finite() && min_soc >= 0.0) {
            return Err(DispatchError::invalid_config(format!(
                "battery min_state_of_charge must be a finite, non-negative number (got {min_soc})"
            )));
        }
        if self.min_state_of_charge > self.capacity {
            return Err(DispatchError::invalid_config(format!(
                "battery min_state_of_charge ({}) exceeds capacity ({})",
                self.min_state_of_charge, self.capacity
            )));
        }

        let efficiency = self.efficiency.value();
        if !(efficiency > 0.0 && efficiency <= 1.0) {
            return Err(DispatchError::invalid_config(format!(
                "battery efficiency must be in (0, 1] (got {efficiency})"
            )));
        }

        let self_discharge = self.self_discharge.value();
        if !(0.0..1.0).contains(&self_discharge) {
            return Err(DispatchError::invalid_config(format!(
                "battery self_discharge must be in [0, 1) (got {self_discharge})"
            )));
        }

        let initial = self.initial_state_of_charge;
        if !initial.is_finite() || initial < self.min_state_of_charge || initial > self.capacity {
            return Err(DispatchError::invalid_config(format!(
                "battery initial_state_of_charge ({initial}) must be between \
                min_state_of_charge ({}) and capacity ({})",
                self.min_state_of_charge, self.capacity
            )));
        }

        Ok(())
    }

    /// The state of charge after one interval, given the power flows during it
    pub fn next_state_of_charge(
        &self,
        state_of_charge: Energy,
        charge: Power,
        discharge: Power,
        horizon: &Horizon,
    ) -> Energy {
        let retained = Dimensionless::new(1.0) - self.self_discharge;
        let dt = horizon.step_duration();
        retained * state_of_charge + charge * dt * self.efficiency
            - discharge * dt / self.efficiency
    }
}

/// The battery's decision variables
#[derive(Debug, Clone, Default)]
pub struct BatteryVariables {
    /// State of charge at each point `0..=H`
    pub state_of_charge: Vec<Variable>,
    /// Charge power for each interval `0..H`
    pub charge: Vec<Variable>,
    /// Discharge power for each interval `0..H`
    pub discharge: Vec<Variable>,
    /// Whether the battery is charging in each interval `0..H`
    pub charging: Vec<Variable>,
}

/// Add the battery's variables to the problem.
///
/// Objective coefficients are all zero here; revenue terms are set when the objective is
/// assembled.
pub fn add_battery_variables(
    problem: &mut Problem,
    battery: &BatteryParameters,
    horizon: &Horizon,
) -> BatteryVariables {
    let num_steps = horizon.num_steps();
    let state_of_charge = (0..=num_steps)
        .map(|_| {
            problem.add_continuous(
                0.0,
                battery.min_state_of_charge.value(),
                battery.capacity.value(),
            )
        })
        .collect();

    let mut vars = BatteryVariables {
        state_of_charge,
        ..Default::default()
    };
    for _ in horizon.iter_intervals() {
        vars.charge
            .push(problem.add_continuous(0.0, 0.0, battery.max_charge_power.value()));
        vars.discharge
            .push(problem.add_continuous(0.0, 0.0, battery.max_discharge_power.value()));
        vars.charging.push(problem.add_binary(0.0));
    }

    vars
}

/// Add the state-of-charge dynamics and the charge/discharge exclusion constraints.
///
/// For every interval `t`:
///
/// ```text
/// SOC[t+1] - (1 - self_discharge) * SOC[t] - dt * efficiency * charge[t]
///     + dt / efficiency * discharge[t] = 0
/// charge[t] - P_charge * charging[t] <= 0
/// discharge[t] + P_discharge * charging[t] <= P_discharge
/// ```
///
/// plus `SOC[0] = SOC[H] = initial_SOC`.
pub fn add_battery_constraints(
    problem: &mut Problem,
    vars: &BatteryVariables,
    battery: &BatteryParameters,
    horizon: &Horizon,
) {
    let initial = battery.initial_state_of_charge.value();
    let retained = 1.0 - battery.self_discharge.value();
    let dt = horizon.step_duration().value();
    let efficiency = battery.efficiency.value();
    let soc = &vars.state_of_charge;

    problem.add_equality(
        ConstraintClass::InitialStateOfCharge,
        0,
        initial,
        [(soc[0], 1.0)],
    );

    for t in horizon.iter_intervals() {
        problem.add_equality(
            ConstraintClass::StateOfChargeRecurrence,
            t,
            0.0,
            [
                (soc[t + 1], 1.0),
                (soc[t], -retained),
                (vars.charge[t], -dt * efficiency),
                (vars.discharge[t], dt / efficiency),
            ],
        );

        let max_charge = battery.max_charge_power.value();
        problem.add_upper(
            ConstraintClass::ChargeExclusion,
            t,
            0.0,
            [(vars.charge[t], 1.0), (vars.charging[t], -max_charge)],
        );

        let max_discharge = battery.max_discharge_power.value();
        problem.add_upper(
            ConstraintClass::DischargeExclusion,
            t,
            max_discharge,
            [(vars.discharge[t], 1.0), (vars.charging[t], max_discharge)],
        );
    }

    let last = horizon.num_steps();
    problem.add_equality(
        ConstraintClass::TerminalStateOfCharge,
        last,
        initial,
        [(soc[last], 1.0)],
    );
}
