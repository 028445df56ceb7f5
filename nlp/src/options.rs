//! Solver options

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;
use std::time::Duration;

// Internal
use crate::NlpError;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Storage used for the constraint Jacobian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeMode {
    /// Compressed columns holding only the non-zero entries.
    Sparse,

    /// Full `m x n` matrix.
    Dense,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Options for the interior point solver.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Wall-clock budget for one solve. When exhausted the best iterate is returned.
    ///
    /// Units: seconds
    pub max_time_s: f64,

    /// Jacobian storage.
    pub derivatives: DerivativeMode,

    /// Solver logging: 0 is silent, 1 logs each iteration at debug, 2 also logs the Hessian
    /// regularisation and line search at trace.
    pub print_level: u8,

    /// Scaled optimality error below which the solve succeeds.
    pub tolerance: f64,

    /// Largest accepted distance of a constraint residual from its bounds.
    pub constraint_tolerance: f64,

    /// Looser optimality error accepted once it has held for `acceptable_iterations` iterations.
    pub acceptable_tolerance: f64,

    /// Number of consecutive acceptable iterations needed to stop, 0 disables the test.
    pub acceptable_iterations: usize,

    /// Maximum number of Newton steps.
    pub max_iterations: usize,

    /// Initial barrier parameter.
    pub initial_barrier: f64,

    /// Linear decrease factor of the barrier parameter.
    pub barrier_decrease_factor: f64,

    /// Superlinear decrease power of the barrier parameter.
    pub barrier_decrease_power: f64,

    /// The barrier parameter is decreased once the barrier problem is solved to this multiple of
    /// the barrier parameter.
    pub barrier_tolerance_factor: f64,

    /// Relative distance by which the initial point is moved inside its bounds.
    pub bound_push: f64,

    /// Lower limit of the fraction-to-the-boundary parameter.
    pub min_fraction_to_boundary: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for DerivativeMode {
    fn default() -> Self {
        DerivativeMode::Sparse
    }
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_time_s: 0.5,
            derivatives: DerivativeMode::Sparse,
            print_level: 0,
            tolerance: 1e-8,
            constraint_tolerance: 1e-4,
            acceptable_tolerance: 1e-6,
            acceptable_iterations: 15,
            max_iterations: 200,
            initial_barrier: 0.1,
            barrier_decrease_factor: 0.2,
            barrier_decrease_power: 1.5,
            barrier_tolerance_factor: 10.0,
            bound_push: 1e-2,
            min_fraction_to_boundary: 0.99,
        }
    }
}

impl SolverOptions {
    /// The wall-clock budget as a `Duration`.
    pub fn max_time(&self) -> Duration {
        Duration::from_secs_f64(self.max_time_s)
    }

    /// Check the options are usable.
    pub fn validate(&self) -> Result<(), NlpError> {
        let positive = [
            ("max_time_s", self.max_time_s),
            ("tolerance", self.tolerance),
            ("constraint_tolerance", self.constraint_tolerance),
            ("acceptable_tolerance", self.acceptable_tolerance),
            ("initial_barrier", self.initial_barrier),
            ("barrier_tolerance_factor", self.barrier_tolerance_factor),
        ];
        for (name, value) in positive.iter() {
            if !(value.is_finite() && *value > 0.0) {
                return Err(NlpError::InvalidOption(format!(
                    "{} must be positive and finite, found {}",
                    name, value
                )));
            }
        }

        let open_ranges = [
            ("barrier_decrease_factor", self.barrier_decrease_factor, 0.0, 1.0),
            ("barrier_decrease_power", self.barrier_decrease_power, 1.0, 2.0),
            ("bound_push", self.bound_push, 0.0, 0.5),
            ("min_fraction_to_boundary", self.min_fraction_to_boundary, 0.0, 1.0),
        ];
        for (name, value, lower, upper) in open_ranges.iter() {
            if !(*value > *lower && *value < *upper) {
                return Err(NlpError::InvalidOption(format!(
                    "{} must be in ({}, {}), found {}",
                    name, lower, upper, value
                )));
            }
        }

        if self.max_iterations == 0 {
            return Err(NlpError::InvalidOption(
                "max_iterations must be non-zero".into(),
            ));
        }

        Ok(())
    }
}
