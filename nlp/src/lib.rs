//! # Nonlinear programming library
//!
//! Solves problems of the form
//!
//! ```text
//! minimise    f(x)
//! subject to  xl <= x    <= xu
//!             gl <= g(x) <= gu
//! ```
//!
//! The cost `f` and the constraints `g` are supplied together by a single [`Evaluator`]. The
//! evaluator is written once, generic over the scalar type, so that the solver can run it on plain
//! `f64` values and on dual numbers to obtain exact derivatives (see [`autodiff`]).
//!
//! Equality constraints have no dedicated type: they are expressed by collapsing the lower and
//! upper bound of a constraint to the same value.
//!
//! The problems are solved by [`InteriorPointSolver`], see [`ipm`].

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod ad;
pub mod autodiff;
mod bounds;
pub mod ipm;
mod options;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use std::time::Duration;

// Re-exports
pub use bounds::{Bounds, INFINITE_BOUND};
pub use ipm::InteriorPointSolver;
pub use num_dual::{Dual64, DualNum};
pub use options::*;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Combined cost and constraint callback.
pub trait Evaluator {
    /// Number of decision variables.
    fn num_vars(&self) -> usize;

    /// Number of constraint residuals.
    fn num_constraints(&self) -> usize;

    /// Evaluate the problem at `vars`.
    ///
    /// Writes every constraint residual into `constraints` (which has length
    /// `num_constraints()`) and returns the cost.
    ///
    /// Implementations must only use operations available on `D`, and must use the primitives in
    /// [`ad`] rather than `if` on a variable's value, so that derivatives stay well defined.
    fn eval<D: DualNum<f64> + Copy>(&self, vars: &[D], constraints: &mut [D]) -> D;
}

/// A solver for problems described by an [`Evaluator`].
pub trait NlpSolver {
    /// Solve the problem starting from `x0`.
    ///
    /// Returns an error only if the problem is malformed. A solve which does not converge is
    /// reported through [`NlpSolution::status`].
    fn solve<E: Evaluator>(
        &self,
        options: &SolverOptions,
        x0: &[f64],
        var_bounds: &Bounds,
        con_bounds: &Bounds,
        eval: &E,
    ) -> Result<NlpSolution, NlpError>;
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Exit status of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NlpStatus {
    /// Optimality and feasibility tolerances were met.
    Success,

    /// The wall-clock budget ran out, the solution is the best iterate.
    MaxTimeExceeded,

    /// The iteration limit was reached, the solution is the best iterate.
    MaxIterationsExceeded,

    /// The evaluator produced a non-finite value or no acceptable step was found, the solution is
    /// the best iterate.
    NumericalFailure,
}

/// Errors raised for malformed problems.
#[derive(Debug, thiserror::Error)]
pub enum NlpError {
    #[error("The problem has no decision variables")]
    EmptyProblem,

    #[error("Expected {what} to have length {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Lower bound {lower} is above upper bound {upper} at index {index}")]
    InvertedBounds { index: usize, lower: f64, upper: f64 },

    #[error("Invalid solver option: {0}")]
    InvalidOption(String),

    #[error("More equality constraints ({equalities}) than variables ({variables})")]
    TooFewDegreesOfFreedom { equalities: usize, variables: usize },
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Result of a solve.
#[derive(Debug, Clone)]
pub struct NlpSolution {
    /// Exit status
    pub status: NlpStatus,

    /// Primal solution
    pub x: Vec<f64>,

    /// Cost at `x`
    pub obj_value: f64,

    /// Largest distance of a constraint residual from its bounds at `x`
    pub constraint_violation: f64,

    /// Number of Newton steps taken
    pub iterations: usize,

    /// Wall-clock time spent solving
    pub solve_time: Duration,
}

impl NlpStatus {
    /// True if the solver met its tolerances.
    pub fn is_success(&self) -> bool {
        matches!(self, NlpStatus::Success)
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Check that a vector has the expected length.
pub(crate) fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), NlpError> {
    if expected != found {
        return Err(NlpError::DimensionMismatch {
            what,
            expected,
            found,
        });
    }

    Ok(())
}
