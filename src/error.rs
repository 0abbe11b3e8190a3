//! The error taxonomy for a dispatch optimisation run.
use crate::optimisation::ConstraintClass;
use derive_more::Display;
use std::error::Error;

/// The ways in which a dispatch optimisation run can fail.
///
/// Configuration and price data are checked before the problem is assembled, so the first two
/// variants never involve the solver.
#[derive(Debug, Display, Clone, PartialEq)]
pub enum DispatchError {
    /// Battery, market, horizon or solver parameters violate their bounds
    #[display("Invalid configuration: {_0}")]
    InvalidConfiguration(String),
    /// The price series does not cover the horizon or contains unusable values
    #[display("Missing price data at step {step}: {message}")]
    MissingData {
        /// The first time step without a usable price
        step: usize,
        /// What is wrong with the price data
        message: String,
    },
    /// The assembled constraint set admits no solution
    #[display("{}", describe_infeasible(*class, *step))]
    Infeasible {
        /// The constraint class whose relaxation restores feasibility, if one was found
        class: Option<ConstraintClass>,
        /// The time step of the offending constraint, if known
        step: Option<usize>,
    },
    /// The solver used up its time budget without finding a feasible solution
    #[display("No feasible solution found within the time limit of {time_limit}s")]
    Unsolved {
        /// The time limit which was exhausted, in seconds
        time_limit: f64,
    },
    /// The solver stopped for some other reason
    #[display("Could not solve: {_0}")]
    Solver(String),
}

fn describe_infeasible(class: Option<ConstraintClass>, step: Option<usize>) -> String {
    match (class, step) {
        (Some(class), Some(step)) => {
            format!("Problem is infeasible: {class} constraint at step {step} cannot be met")
        }
        (Some(class), None) => format!("Problem is infeasible: {class} constraints cannot be met"),
        _ => "Problem is infeasible".to_string(),
    }
}

/// This is needed so that DispatchError can be treated like standard errors are.
impl Error for DispatchError {}

impl DispatchError {
    /// Shorthand for an [`DispatchError::InvalidConfiguration`] error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Shorthand for a [`DispatchError::MissingData`] error
    pub fn missing_data(step: usize, message: impl Into<String>) -> Self {
        Self::MissingData {
            step,
            message: message.into(),
        }
    }
}
