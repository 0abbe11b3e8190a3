//! Data structures for describing a mixed-integer linear program and solving it with HiGHS.
//!
//! The problem is accumulated into a [`Problem`] value (variable declarations plus constraint
//! records) and only converted into a HiGHS model inside [`Problem::solve`]. Nothing is shared
//! between runs: each run builds its own [`Problem`].
use crate::error::DispatchError;
use derive_more::Display;
use highs::{HighsModelStatus, RowProblem, Sense};
use log::{debug, info, warn};
use serde::Deserialize;
use std::time::Instant;

/// Absolute tolerance used when checking a candidate solution against the problem
const FEASIBILITY_TOLERANCE: f64 = 1e-6;

/// A decision variable in the optimisation.
///
/// Note that this type does **not** include the value of the variable; it just refers to a
/// particular column of the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variable(usize);

impl Variable {
    /// The column index of the variable in the problem
    pub fn index(self) -> usize {
        self.0
    }
}

/// Whether a variable may take fractional values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// Any value between the bounds
    Continuous,
    /// Either zero or one
    Binary,
}

/// The definition of a variable to be optimised.
///
/// The coefficients represent the multiplying factors in the objective function to maximise,
/// i.e. the Cs in:
///
/// f = c1*x1 + c2*x2 + ...
///
/// with x1, x2... taking values between min and max.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    /// Whether the variable is continuous or binary
    pub kind: VariableKind,
    /// The variable's minimum value
    pub min: f64,
    /// The variable's maximum value
    pub max: f64,
    /// The coefficient of the variable in the objective
    pub coefficient: f64,
}

/// The family a constraint belongs to, used for diagnostics and error reporting.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintClass {
    /// `SOC[0] = initial_SOC`
    #[display("initial state of charge")]
    InitialStateOfCharge,
    /// `SOC[H] = initial_SOC`
    #[display("terminal state of charge")]
    TerminalStateOfCharge,
    /// The state-of-charge recurrence between consecutive steps
    #[display("state of charge recurrence")]
    StateOfChargeRecurrence,
    /// Charge power is only allowed while the charging indicator is set
    #[display("charge exclusion")]
    ChargeExclusion,
    /// Discharge power is only allowed while the charging indicator is unset
    #[display("discharge exclusion")]
    DischargeExclusion,
    /// A slot may hold a buy bid or a sell bid, not both
    #[display("placement exclusion")]
    PlacementExclusion,
    /// A placed bid must reach the minimum bid volume
    #[display("minimum bid volume")]
    MinimumBidVolume,
    /// A bid can only be activated if it was placed
    #[display("activation requires placement")]
    ActivationRequiresPlacement,
    /// Bid price against the clearing price for an activated bid
    #[display("market clearing (activated)")]
    ClearingActivated,
    /// Bid price against the clearing price for a placed bid which was not activated
    #[display("market clearing (not activated)")]
    ClearingNotActivated,
    /// Executed volume is the bid volume if activated, else zero
    #[display("executed volume")]
    ExecutedVolume,
    /// Charge power is the sum of executed buy volumes
    #[display("charge aggregation")]
    ChargeAggregation,
    /// Discharge power is the sum of executed sell volumes
    #[display("discharge aggregation")]
    DischargeAggregation,
}

/// A constraint for an optimisation.
///
/// Each constraint adds an inequality to the problem of the form:
///
/// min <= a1*x1 + a2*x2 + ... <= max
///
/// Often, constraints will impose only a min or a max value, with the other set to infinity or
/// minus infinity.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    /// Which family the constraint belongs to
    pub class: ConstraintClass,
    /// The time step the constraint applies to
    pub step: usize,
    /// The minimum value for the constraint
    pub min: f64,
    /// The maximum value for the constraint
    pub max: f64,
    /// The non-zero coefficients of the constraint
    pub terms: Vec<(Variable, f64)>,
}

impl Constraint {
    /// Evaluate the left-hand side of the constraint for the given column values
    fn activity(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(var, coeff)| coeff * values[var.index()])
            .sum()
    }
}

/// Options controlling the HiGHS solve
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SolverOptions {
    /// Wall-clock time limit for the solve, in seconds
    #[serde(default = "default_time_limit")]
    pub time_limit: f64,
    /// Relative MIP optimality gap at which the solver stops
    #[serde(default = "default_mip_rel_gap")]
    pub mip_rel_gap: f64,
    /// Seed for the solver's internal random number generator
    #[serde(default)]
    pub random_seed: i32,
    /// Whether to let HiGHS write its own progress output to the console
    #[serde(default)]
    pub log_output: bool,
}

fn default_time_limit() -> f64 {
    60.0
}

fn default_mip_rel_gap() -> f64 {
    1e-4
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            time_limit: default_time_limit(),
            mip_rel_gap: default_mip_rel_gap(),
            random_seed: 0,
            log_output: false,
        }
    }
}

impl SolverOptions {
    /// Check that the options are usable
    pub fn validate(&self) -> Result<(), DispatchError> {
        if !(self.time_limit.is_finite() && self.time_limit > 0.0) {
            return Err(DispatchError::invalid_config(
                "solver time_limit must be a finite number greater than zero",
            ));
        }
        if !(self.mip_rel_gap.is_finite() && self.mip_rel_gap >= 0.0) {
            return Err(DispatchError::invalid_config(
                "solver mip_rel_gap must be a finite, non-negative number",
            ));
        }
        if self.random_seed < 0 {
            return Err(DispatchError::invalid_config(
                "solver random_seed cannot be negative",
            ));
        }

        Ok(())
    }
}

/// How the solver terminated when a solution was returned
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Optimal within the configured gap
    #[display("optimal")]
    Optimal,
    /// The time limit was reached but a feasible solution had been found
    #[display("time_limited")]
    TimeLimited,
}

/// The solution to an optimisation problem
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// How the solve terminated
    pub status: SolveStatus,
    /// The objective value of the solution
    pub objective: f64,
    values: Vec<f64>,
}

impl Solution {
    /// Get the value of a variable in the solution
    pub fn value(&self, var: Variable) -> f64 {
        self.values[var.index()]
    }

    /// Get the value of a binary variable in the solution
    pub fn is_set(&self, var: Variable) -> bool {
        self.value(var) > 0.5
    }
}

/// What the solver reported, reduced to the cases we treat differently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Solved(SolveStatus),
    Infeasible,
    Unsolved,
    Failed,
}

/// Decide what a HiGHS status means for us.
///
/// A time-limited solve is only accepted if the returned candidate passes our own feasibility
/// check, as HiGHS returns column values whether or not it found an incumbent.
fn interpret_status(status: HighsModelStatus, candidate_feasible: bool) -> Outcome {
    match status {
        HighsModelStatus::Optimal => Outcome::Solved(SolveStatus::Optimal),
        HighsModelStatus::Infeasible | HighsModelStatus::UnboundedOrInfeasible => {
            Outcome::Infeasible
        }
        HighsModelStatus::ReachedTimeLimit if candidate_feasible => {
            Outcome::Solved(SolveStatus::TimeLimited)
        }
        HighsModelStatus::ReachedTimeLimit => Outcome::Unsolved,
        _ => Outcome::Failed,
    }
}

/// A mixed-integer linear program to be maximised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Problem {
    variables: Vec<VariableDefinition>,
    constraints: Vec<Constraint>,
}

impl Problem {
    /// Add a continuous variable with the given objective coefficient and bounds
    pub fn add_continuous(&mut self, coefficient: f64, min: f64, max: f64) -> Variable {
        self.add_variable(VariableDefinition {
            kind: VariableKind::Continuous,
            min,
            max,
            coefficient,
        })
    }

    /// Add a binary variable with the given objective coefficient
    pub fn add_binary(&mut self, coefficient: f64) -> Variable {
        self.add_variable(VariableDefinition {
            kind: VariableKind::Binary,
            min: 0.0,
            max: 1.0,
            coefficient,
        })
    }

    fn add_variable(&mut self, definition: VariableDefinition) -> Variable {
        self.variables.push(definition);
        Variable(self.variables.len() - 1)
    }

    /// Set the objective coefficient of an existing variable
    pub fn set_coefficient(&mut self, var: Variable, coefficient: f64) {
        self.variables[var.index()].coefficient = coefficient;
    }

    /// Fix an existing variable to a single value
    pub fn fix_variable(&mut self, var: Variable, value: f64) {
        let def = &mut self.variables[var.index()];
        def.min = value;
        def.max = value;
    }

    /// Add a constraint of the form `min <= sum(terms) <= max`
    pub fn add_row<I>(&mut self, class: ConstraintClass, step: usize, min: f64, max: f64, terms: I)
    where
        I: IntoIterator<Item = (Variable, f64)>,
    {
        let terms: Vec<_> = terms.into_iter().collect();
        debug_assert!(
            terms.iter().all(|(var, _)| var.index() < self.variables.len()),
            "Constraint refers to unknown variable"
        );
        self.constraints.push(Constraint {
            class,
            step,
            min,
            max,
            terms,
        });
    }

    /// Add an equality constraint
    pub fn add_equality<I>(&mut self, class: ConstraintClass, step: usize, rhs: f64, terms: I)
    where
        I: IntoIterator<Item = (Variable, f64)>,
    {
        self.add_row(class, step, rhs, rhs, terms);
    }

    /// Add a constraint of the form `sum(terms) <= max`
    pub fn add_upper<I>(&mut self, class: ConstraintClass, step: usize, max: f64, terms: I)
    where
        I: IntoIterator<Item = (Variable, f64)>,
    {
        self.add_row(class, step, f64::NEG_INFINITY, max, terms);
    }

    /// Add a constraint of the form `sum(terms) >= min`
    pub fn add_lower<I>(&mut self, class: ConstraintClass, step: usize, min: f64, terms: I)
    where
        I: IntoIterator<Item = (Variable, f64)>,
    {
        self.add_row(class, step, min, f64::INFINITY, terms);
    }

    /// The number of variables in the problem
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// The number of binary variables in the problem
    pub fn num_binaries(&self) -> usize {
        self.variables
            .iter()
            .filter(|def| def.kind == VariableKind::Binary)
            .count()
    }

    /// The number of constraints in the problem
    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Iterate over the constraints of the given class
    pub fn iter_constraints(&self, class: ConstraintClass) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(move |c| c.class == class)
    }

    /// A copy of the problem with all constraints of one class removed
    pub fn without_class(&self, class: ConstraintClass) -> Problem {
        Problem {
            variables: self.variables.clone(),
            constraints: self
                .constraints
                .iter()
                .filter(|c| c.class != class)
                .cloned()
                .collect(),
        }
    }

    /// Evaluate the objective function for the given column values
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.variables
            .iter()
            .zip(values)
            .map(|(def, value)| def.coefficient * value)
            .sum()
    }

    /// Find the first bound, integrality requirement or constraint violated by `values`.
    ///
    /// Returns `None` if the values are feasible within tolerance.
    pub fn find_violation(&self, values: &[f64]) -> Option<String> {
        if values.len() != self.variables.len() {
            return Some(format!(
                "expected {} values, got {}",
                self.variables.len(),
                values.len()
            ));
        }

        for (idx, (def, &value)) in self.variables.iter().zip(values).enumerate() {
            if !value.is_finite()
                || value < def.min - FEASIBILITY_TOLERANCE
                || value > def.max + FEASIBILITY_TOLERANCE
            {
                return Some(format!("variable {idx} = {value} is out of bounds"));
            }
            if def.kind == VariableKind::Binary && (value - value.round()).abs() > 1e-5 {
                return Some(format!("variable {idx} = {value} is not integral"));
            }
        }

        self.constraints.iter().find_map(|constraint| {
            let activity = constraint.activity(values);
            let tolerance = FEASIBILITY_TOLERANCE * (1.0 + activity.abs());
            (activity < constraint.min - tolerance || activity > constraint.max + tolerance).then(
                || {
                    format!(
                        "{} constraint at step {} is violated ({activity} not in [{}, {}])",
                        constraint.class, constraint.step, constraint.min, constraint.max
                    )
                },
            )
        })
    }

    /// Convert into a HiGHS problem
    fn to_highs(&self) -> RowProblem {
        let mut pb = RowProblem::default();

        // Add variables
        let cols: Vec<_> = self
            .variables
            .iter()
            .map(|def| match def.kind {
                VariableKind::Continuous => pb.add_column(def.coefficient, def.min..=def.max),
                VariableKind::Binary => pb.add_integer_column(def.coefficient, 0.0..=1.0),
            })
            .collect();

        // Add constraints
        for constraint in &self.constraints {
            pb.add_row(
                constraint.min..=constraint.max,
                constraint
                    .terms
                    .iter()
                    .map(|&(var, coeff)| (cols[var.index()], coeff)),
            );
        }

        pb
    }

    /// Solve the problem once, returning the outcome and the column values HiGHS reported
    fn run_highs(&self, options: &SolverOptions) -> Result<(Outcome, Vec<f64>), DispatchError> {
        let mut model = self.to_highs().optimise(Sense::Maximise);
        model.set_option("output_flag", options.log_output);
        model.set_option("log_to_console", options.log_output);
        model.set_option("time_limit", options.time_limit);
        model.set_option("mip_rel_gap", options.mip_rel_gap);
        model.set_option("random_seed", options.random_seed);

        let solved = model
            .try_solve()
            .map_err(|status| DispatchError::Solver(format!("{status:?}")))?;
        let status = solved.status();
        let values = solved.get_solution().columns().to_vec();
        let candidate_feasible = status == HighsModelStatus::ReachedTimeLimit
            && self.find_violation(&values).is_none();

        debug!("HiGHS finished with status {status:?}");
        match interpret_status(status, candidate_feasible) {
            Outcome::Failed => Err(DispatchError::Solver(format!("{status:?}"))),
            outcome => Ok((outcome, values)),
        }
    }

    /// Perform the optimisation using the HiGHS solver.
    ///
    /// # Arguments
    ///
    /// * `options` - Time limit, gap and seed for the solver
    ///
    /// # Returns
    ///
    /// The solution, or a [`DispatchError`] distinguishing infeasibility from an exhausted time
    /// budget.
    pub fn solve(&self, options: &SolverOptions) -> Result<Solution, DispatchError> {
        info!(
            "Solving problem with {} variables ({} binary) and {} constraints",
            self.num_variables(),
            self.num_binaries(),
            self.num_constraints()
        );

        let start = Instant::now();
        let (outcome, values) = self.run_highs(options)?;
        debug!("Solve took {:.3}s", start.elapsed().as_secs_f64());

        match outcome {
            Outcome::Solved(status) => {
                if status == SolveStatus::TimeLimited {
                    warn!(
                        "Time limit of {}s reached; using best solution found",
                        options.time_limit
                    );
                }

                Ok(Solution {
                    status,
                    objective: self.objective_value(&values),
                    values,
                })
            }
            Outcome::Infeasible => Err(self.diagnose_infeasibility(options)),
            Outcome::Unsolved => Err(DispatchError::Unsolved {
                time_limit: options.time_limit,
            }),
            Outcome::Failed => unreachable!("Failed outcomes are returned as errors"),
        }
    }

    /// Work out which boundary constraint makes the problem infeasible.
    ///
    /// The boundary rows are relaxed one class at a time and the problem re-solved; the first
    /// class whose removal restores feasibility is reported.
    fn diagnose_infeasibility(&self, options: &SolverOptions) -> DispatchError {
        for class in [
            ConstraintClass::TerminalStateOfCharge,
            ConstraintClass::InitialStateOfCharge,
        ] {
            let Some(step) = self.iter_constraints(class).map(|c| c.step).next() else {
                continue;
            };

            debug!("Re-solving without {class} constraints to diagnose infeasibility");
            if let Ok((Outcome::Solved(_), _)) = self.without_class(class).run_highs(options) {
                return DispatchError::Infeasible {
                    class: Some(class),
                    step: Some(step),
                };
            }
        }

        DispatchError::Infeasible {
            class: None,
            step: None,
        }
    }
}
