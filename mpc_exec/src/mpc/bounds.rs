//! Variable and constraint bounds of the trajectory problem

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nlp::Bounds;

// Internal
use super::{
    layout::{Layout, StateVar},
    model::VehicleState,
    params::Params,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Magnitude standing in for "no bound".
pub const UNBOUNDED: f64 = 1.0e19;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Bounds on the decision vector.
///
/// State variables are free, steering and acceleration are limited symmetrically by the
/// actuator limits.
pub fn variable_bounds(layout: &Layout, params: &Params) -> Bounds {
    let mut bounds = Bounds::uniform(layout.num_vars(), -UNBOUNDED, UNBOUNDED);

    bounds.set_range(layout.deltas(), -params.max_steer_rad, params.max_steer_rad);
    bounds.set_range(layout.accels(), -params.max_accel, params.max_accel);

    bounds
}

/// Bounds on the constraint residuals.
///
/// All dynamics residuals must be zero, and the initial state rows are pinned to the measured
/// state.
pub fn constraint_bounds(layout: &Layout, state: &VehicleState) -> Bounds {
    let mut bounds = Bounds::uniform(layout.num_constraints(), 0.0, 0.0);

    for var in StateVar::ALL.iter() {
        bounds.fix(layout.state(*var, 0), state.get(*var));
    }

    bounds
}
