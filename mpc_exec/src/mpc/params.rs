//! Model predictive controller parameters

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nlp::SolverOptions;
use serde::Deserialize;

// Internal
use super::MpcError;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the model predictive controller.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Params {
    // ---- HORIZON ----
    /// Number of steps in the prediction horizon, at least 2.
    pub horizon_steps: usize,

    /// Duration of one horizon step.
    ///
    /// Units: seconds
    pub step_duration_s: f64,

    // ---- MODEL ----
    /// Distance between the front axle and the centre of gravity. This is an empirical value
    /// chosen so the model's turning radius at a fixed steering angle matches the vehicle's.
    ///
    /// Units: meters
    pub lf_m: f64,

    /// Speed the controller tracks.
    pub target_speed: f64,

    // ---- LIMITS ----
    /// Steering angle limit, applied symmetrically.
    ///
    /// Units: radians
    pub max_steer_rad: f64,

    /// Acceleration limit, applied symmetrically, in normalised throttle units.
    pub max_accel: f64,

    /// Floor applied to `|cte|` wherever it is used as a divisor.
    ///
    /// Units: meters
    pub cte_floor_m: f64,

    // ---- COST ----
    /// Cost function weights.
    pub weights: Weights,

    // ---- SOLVER ----
    /// NLP solver options.
    pub solver: SolverOptions,
}

/// Weights of the cost function terms. A zero weight disables its term.
#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct Weights {
    /// Squared cross-track error
    pub weight_cte: f64,

    /// Smoothed detector of cross-track error between consecutive steps
    pub weight_cte_change: f64,

    /// Squared heading error
    pub weight_epsi: f64,

    /// Squared steering angle divided by the floored `|cte|`
    pub weight_delta: f64,

    /// Squared steering change between steps divided by the floored `|cte|`
    pub weight_delta_dt: f64,

    /// Mean squared steering change over the horizon
    pub weight_delta_mean: f64,

    /// Smoothed detector of steering between consecutive steps
    pub weight_delta_change: f64,

    /// Squared deviation from the target speed
    pub weight_v: f64,

    /// Squared acceleration
    pub weight_a: f64,

    /// Squared acceleration change between steps
    pub weight_a_dt: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            horizon_steps: 10,
            step_duration_s: 0.05,
            lf_m: 2.67,
            target_speed: 150.0,
            max_steer_rad: 25f64.to_radians(),
            max_accel: 1.0,
            cte_floor_m: 1e-3,
            weights: Weights::default(),
            solver: SolverOptions::default(),
        }
    }
}

impl Params {
    /// Check the parameters before any solve is attempted.
    pub fn validate(&self) -> Result<(), MpcError> {
        if self.horizon_steps < 2 {
            return Err(MpcError::InvalidParams(format!(
                "horizon_steps must be at least 2, found {}",
                self.horizon_steps
            )));
        }

        let positive = [
            ("step_duration_s", self.step_duration_s),
            ("lf_m", self.lf_m),
            ("max_steer_rad", self.max_steer_rad),
            ("max_accel", self.max_accel),
            ("cte_floor_m", self.cte_floor_m),
        ];
        for (name, value) in positive.iter() {
            if !(value.is_finite() && *value > 0.0) {
                return Err(MpcError::InvalidParams(format!(
                    "{} must be positive and finite, found {}",
                    name, value
                )));
            }
        }

        if !self.target_speed.is_finite() {
            return Err(MpcError::InvalidParams(format!(
                "target_speed must be finite, found {}",
                self.target_speed
            )));
        }

        for (name, value) in self.weights.named().iter() {
            if !(value.is_finite() && *value >= 0.0) {
                return Err(MpcError::InvalidParams(format!(
                    "{} must be non-negative and finite, found {}",
                    name, value
                )));
            }
        }

        self.solver.validate().map_err(MpcError::SolverError)
    }
}

impl Weights {
    /// The weights paired with their names.
    pub fn named(&self) -> [(&'static str, f64); 10] {
        [
            ("weight_cte", self.weight_cte),
            ("weight_cte_change", self.weight_cte_change),
            ("weight_epsi", self.weight_epsi),
            ("weight_delta", self.weight_delta),
            ("weight_delta_dt", self.weight_delta_dt),
            ("weight_delta_mean", self.weight_delta_mean),
            ("weight_delta_change", self.weight_delta_change),
            ("weight_v", self.weight_v),
            ("weight_a", self.weight_a),
            ("weight_a_dt", self.weight_a_dt),
        ]
    }
}
