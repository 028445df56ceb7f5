//! # Vehicle model
//!
//! Discrete kinematic bicycle model with front wheel steering, referenced to the centre of
//! gravity, integrated with a forward Euler step of `dt`:
//!
//! ```text
//! x[t+1]    = x[t] + v[t] cos(psi[t]) dt
//! y[t+1]    = y[t] + v[t] sin(psi[t]) dt
//! psi[t+1]  = psi[t] + v[t] delta[t] / Lf dt
//! v[t+1]    = v[t] + a[t] dt
//! cte[t+1]  = (f(x[t]) - y[t]) + v[t] sin(epsi[t]) dt
//! epsi[t+1] = (psi[t] - atan(f'(x[t]))) + v[t] delta[t] / Lf dt
//! ```
//!
//! where `f` is the reference polynomial. All functions here are generic over the AD scalar so
//! the same code builds the solver's constraints and steps a plain `f64` simulation.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nlp::{ad, DualNum};
use serde::{Deserialize, Serialize};

// Internal
use super::layout::{Layout, StateVar, NUM_STATES};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The controller's estimate of the current vehicle state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Position
    ///
    /// Units: meters
    pub x: f64,

    /// Position
    ///
    /// Units: meters
    pub y: f64,

    /// Heading
    ///
    /// Units: radians
    pub psi: f64,

    /// Speed
    ///
    /// Units: simulator speed units, consistent with `target_speed`
    pub v: f64,

    /// Cross-track error, reference path minus position
    ///
    /// Units: meters
    pub cte: f64,

    /// Heading error, heading minus reference path tangent
    ///
    /// Units: radians
    pub epsi: f64,
}

/// Cubic reference path `y = c0 + c1 x + c2 x^2 + c3 x^3`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePolynomial {
    /// Coefficients, lowest power first
    pub coeffs: [f64; 4],
}

/// One actuation command.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Actuation {
    /// Steering angle
    ///
    /// Units: radians
    pub steering_rad: f64,

    /// Throttle (positive) or brake (negative), normalised
    pub acceleration: f64,
}

/// Kinematic bicycle model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicBicycle {
    /// Distance between the front axle and the centre of gravity
    ///
    /// Units: meters
    pub lf_m: f64,

    /// Integration step
    ///
    /// Units: seconds
    pub dt_s: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl VehicleState {
    /// The state as an array in block order.
    pub fn to_array(&self) -> [f64; NUM_STATES] {
        [self.x, self.y, self.psi, self.v, self.cte, self.epsi]
    }

    pub fn from_array(s: [f64; NUM_STATES]) -> Self {
        Self {
            x: s[0],
            y: s[1],
            psi: s[2],
            v: s[3],
            cte: s[4],
            epsi: s[5],
        }
    }

    /// Value of one state variable.
    pub fn get(&self, var: StateVar) -> f64 {
        self.to_array()[var.block()]
    }

    /// Build a state at the given pose and speed, computing the errors against `poly`.
    pub fn from_pose(x: f64, y: f64, psi: f64, v: f64, poly: &ReferencePolynomial) -> Self {
        Self {
            x,
            y,
            psi,
            v,
            cte: poly.eval(x) - y,
            epsi: psi - poly.heading(x),
        }
    }
}

impl ReferencePolynomial {
    pub fn new(coeffs: [f64; 4]) -> Self {
        Self { coeffs }
    }

    /// Desired `y` at `x`.
    pub fn eval<D: DualNum<f64> + Copy>(&self, x: D) -> D {
        let c = &self.coeffs;
        ad::constant::<D>(c[0])
            + x * (ad::constant::<D>(c[1])
                + x * (ad::constant::<D>(c[2]) + x * ad::constant::<D>(c[3])))
    }

    /// Slope `dy/dx` at `x`.
    pub fn slope<D: DualNum<f64> + Copy>(&self, x: D) -> D {
        let c = &self.coeffs;
        ad::constant::<D>(c[1])
            + x * (ad::constant::<D>(2.0 * c[2]) + x * ad::constant::<D>(3.0 * c[3]))
    }

    /// Desired heading at `x`.
    pub fn heading<D: DualNum<f64> + Copy>(&self, x: D) -> D {
        self.slope(x).atan()
    }
}

impl KinematicBicycle {
    pub fn new(lf_m: f64, dt_s: f64) -> Self {
        Self { lf_m, dt_s }
    }

    /// Predict the state one step ahead.
    ///
    /// `s` is ordered as the state blocks: `[x, y, psi, v, cte, epsi]`.
    pub fn predict<D: DualNum<f64> + Copy>(
        &self,
        s: &[D; NUM_STATES],
        poly: &ReferencePolynomial,
        delta: D,
        a: D,
    ) -> [D; NUM_STATES] {
        let [x, y, psi, v, _cte, epsi] = *s;
        let dt = ad::constant::<D>(self.dt_s);
        let yaw_step = v * delta / ad::constant::<D>(self.lf_m) * dt;

        [
            x + v * psi.cos() * dt,
            y + v * psi.sin() * dt,
            psi + yaw_step,
            v + a * dt,
            (poly.eval(x) - y) + v * epsi.sin() * dt,
            (psi - poly.heading(x)) + yaw_step,
        ]
    }

    /// Step a plain state forward under `act`.
    pub fn step(
        &self,
        state: &VehicleState,
        poly: &ReferencePolynomial,
        act: &Actuation,
    ) -> VehicleState {
        VehicleState::from_array(self.predict(
            &state.to_array(),
            poly,
            act.steering_rad,
            act.acceleration,
        ))
    }

    /// Write the dynamics constraint residuals for the decision vector `vars` into `out`.
    ///
    /// Rows for `t = 0` hold the initial state itself, which the constraint bounds pin to the
    /// measured state. Rows for `t >= 1` hold `actual[t] - predicted[t]`.
    pub fn residuals<D: DualNum<f64> + Copy>(
        &self,
        layout: &Layout,
        poly: &ReferencePolynomial,
        vars: &[D],
        out: &mut [D],
    ) {
        let n = layout.horizon();

        for var in StateVar::ALL.iter() {
            let i = layout.state(*var, 0);
            out[i] = vars[i];
        }

        for t in 1..n {
            let mut prev = [vars[0]; NUM_STATES];
            for var in StateVar::ALL.iter() {
                prev[var.block()] = vars[layout.state(*var, t - 1)];
            }

            let predicted = self.predict(
                &prev,
                poly,
                vars[layout.delta(t - 1)],
                vars[layout.accel(t - 1)],
            );

            for var in StateVar::ALL.iter() {
                let i = layout.state(*var, t);
                out[i] = vars[i] - predicted[var.block()];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn model() -> KinematicBicycle {
        KinematicBicycle::new(2.67, 0.05)
    }

    #[test]
    fn test_polynomial() {
        let poly = ReferencePolynomial::new([1.0, 2.0, -0.5, 0.25]);

        assert_abs_diff_eq!(poly.eval(2.0), 1.0 + 4.0 - 2.0 + 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(poly.slope(2.0), 2.0 - 2.0 + 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(poly.heading(2.0), 3.0f64.atan(), epsilon = 1e-12);
    }

    #[test]
    fn test_straight_line_step() {
        let poly = ReferencePolynomial::default();
        let state = VehicleState {
            v: 10.0,
            ..Default::default()
        };

        let next = model().step(
            &state,
            &poly,
            &Actuation {
                steering_rad: 0.0,
                acceleration: 1.0,
            },
        );

        assert_abs_diff_eq!(next.x, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(next.y, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(next.psi, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(next.v, 10.05, epsilon = 1e-12);
        assert_abs_diff_eq!(next.cte, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_turning_step() {
        let poly = ReferencePolynomial::new([1.0, 0.0, 0.0, 0.0]);
        let state = VehicleState {
            x: 0.0,
            y: 0.0,
            psi: 0.1,
            v: 20.0,
            cte: 1.0,
            epsi: 0.1,
        };
        let m = model();

        let next = m.step(
            &state,
            &poly,
            &Actuation {
                steering_rad: 0.2,
                acceleration: 0.0,
            },
        );

        let yaw_step = 20.0 * 0.2 / 2.67 * 0.05;
        assert_abs_diff_eq!(next.x, 20.0 * 0.1f64.cos() * 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(next.y, 20.0 * 0.1f64.sin() * 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(next.psi, 0.1 + yaw_step, epsilon = 1e-12);
        assert_abs_diff_eq!(next.cte, 1.0 + 20.0 * 0.1f64.sin() * 0.05, epsilon = 1e-12);
        assert_abs_diff_eq!(next.epsi, 0.1 + yaw_step, epsilon = 1e-12);
    }

    #[test]
    fn test_residuals_of_rollout() {
        let poly = ReferencePolynomial::new([0.5, 0.1, 0.01, -0.001]);
        let layout = Layout::new(6);
        let m = model();

        // Roll out a trajectory and write it into a decision vector
        let mut vars = vec![0.0; layout.num_vars()];
        let mut state = VehicleState::from_pose(0.0, 0.0, 0.05, 15.0, &poly);
        for t in 0..layout.horizon() {
            for var in StateVar::ALL.iter() {
                vars[layout.state(*var, t)] = state.get(*var);
            }
            if t + 1 < layout.horizon() {
                let act = Actuation {
                    steering_rad: 0.1 * t as f64,
                    acceleration: -0.5,
                };
                vars[layout.delta(t)] = act.steering_rad;
                vars[layout.accel(t)] = act.acceleration;
                state = m.step(&state, &poly, &act);
            }
        }

        let mut out = vec![0.0; layout.num_constraints()];
        m.residuals(&layout, &poly, &vars, &mut out);

        // Initial rows echo the initial state, every other row is satisfied
        for var in StateVar::ALL.iter() {
            let i = layout.state(*var, 0);
            assert_eq!(out[i], vars[i]);
            for t in 1..layout.horizon() {
                assert_abs_diff_eq!(out[layout.state(*var, t)], 0.0, epsilon = 1e-12);
            }
        }

        // Perturbing one state breaks exactly the rows it appears in
        vars[layout.state(StateVar::V, 2)] += 1.0;
        m.residuals(&layout, &poly, &vars, &mut out);
        assert_abs_diff_eq!(out[layout.state(StateVar::V, 2)], 1.0, epsilon = 1e-12);
        assert!(out[layout.state(StateVar::X, 3)].abs() > 1e-3);
        assert_abs_diff_eq!(out[layout.state(StateVar::X, 2)], 0.0, epsilon = 1e-12);
    }
}
