//! # Model predictive controller
//!
//! Computes the next steering and acceleration command by optimising the vehicle's trajectory
//! over a finite horizon. Each solve:
//!
//! 1. Builds the initial guess, all zeros except the first step of every state which is set to
//!    the current state.
//! 2. Assembles the variable and constraint bounds, see [`bounds`].
//! 3. Hands the combined cost and dynamics evaluator to the NLP solver.
//! 4. Extracts the first actuation and the predicted path from the primal solution.
//!
//! The controller does not retry or fall back when a solve fails, the status is reported in the
//! [`SolveResult`] and the caller decides what to command.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod bounds;
pub mod cost;
pub mod layout;
pub mod model;
mod params;
mod result;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::debug;
use nlp::{DualNum, Evaluator, InteriorPointSolver, NlpError, NlpSolver};

// Internal
pub use cost::{CostBreakdown, CostFunction, CostTerms};
pub use layout::{Layout, StateVar};
pub use model::{Actuation, KinematicBicycle, ReferencePolynomial, VehicleState};
pub use params::*;
pub use result::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during MPC operation.
#[derive(Debug, thiserror::Error)]
pub enum MpcError {
    #[error("Cannot load the MPC parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("Invalid MPC parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid MPC input: {0}")]
    InvalidInput(String),

    #[error("The NLP solver rejected the problem: {0}")]
    SolverError(NlpError),

    #[error("The solve did not produce a usable trajectory (status: {0:?})")]
    SolveFailed(SolveStatus),
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A configured controller.
///
/// The configuration is fixed at construction, solves only borrow the controller so one
/// instance can be shared between solves without any locking.
#[derive(Debug, Clone)]
pub struct Mpc {
    params: Params,
    layout: Layout,
    model: KinematicBicycle,
}

/// Cost and constraint callback for one solve.
struct MpcEvaluator<'a> {
    layout: &'a Layout,
    model: &'a KinematicBicycle,
    poly: &'a ReferencePolynomial,
    cost: CostFunction<'a>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Mpc {
    fn default() -> Self {
        Self::from_valid(Params::default())
    }
}

impl Mpc {
    /// Create a new controller, failing if the parameters are invalid.
    pub fn new(params: Params) -> Result<Self, MpcError> {
        params.validate()?;
        Ok(Self::from_valid(params))
    }

    /// Create a new controller from a parameter file relative to the parameters directory.
    pub fn init(params_file: &str) -> Result<Self, MpcError> {
        let params: Params = util::params::load(params_file).map_err(MpcError::ParamLoadError)?;
        Self::new(params)
    }

    fn from_valid(params: Params) -> Self {
        Self {
            layout: Layout::new(params.horizon_steps),
            model: KinematicBicycle::new(params.lf_m, params.step_duration_s),
            params,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn model(&self) -> &KinematicBicycle {
        &self.model
    }

    /// Solve for the next actuation from `state` along the reference path `poly`.
    pub fn solve(
        &self,
        state: &VehicleState,
        poly: &ReferencePolynomial,
    ) -> Result<SolveResult, MpcError> {
        self.solve_with(&InteriorPointSolver, state, poly)
    }

    /// Solve using the given NLP solver.
    pub fn solve_with<S: NlpSolver>(
        &self,
        solver: &S,
        state: &VehicleState,
        poly: &ReferencePolynomial,
    ) -> Result<SolveResult, MpcError> {
        check_finite("state", &state.to_array())?;
        check_finite("polynomial coefficients", &poly.coeffs)?;

        let layout = &self.layout;

        // Initial guess
        let mut x0 = vec![0.0; layout.num_vars()];
        for var in StateVar::ALL.iter() {
            x0[layout.state(*var, 0)] = state.get(*var);
        }

        let var_bounds = bounds::variable_bounds(layout, &self.params);
        let con_bounds = bounds::constraint_bounds(layout, state);

        let eval = MpcEvaluator {
            layout,
            model: &self.model,
            poly,
            cost: self.cost_function(),
        };

        let solution = solver
            .solve(&self.params.solver, &x0, &var_bounds, &con_bounds, &eval)
            .map_err(MpcError::SolverError)?;

        let result = SolveResult::extract(
            layout,
            &eval.cost,
            &solution,
            self.params.solver.constraint_tolerance,
        );

        debug!(
            "MPC solve {:?} in {:.3} s ({} iterations): steering {:.4} rad, \
            acceleration {:.4}, cost {:.4e}, violation {:.2e}",
            result.status,
            result.solve_time.as_secs_f64(),
            solution.iterations,
            result.actuation.steering_rad,
            result.actuation.acceleration,
            result.objective,
            result.constraint_violation
        );

        Ok(result)
    }

    /// The cost function of this controller.
    pub fn cost_function(&self) -> CostFunction<'_> {
        CostFunction::new(
            &self.layout,
            &self.params.weights,
            self.params.target_speed,
            self.params.cte_floor_m,
        )
    }
}

impl<'a> Evaluator for MpcEvaluator<'a> {
    fn num_vars(&self) -> usize {
        self.layout.num_vars()
    }

    fn num_constraints(&self) -> usize {
        self.layout.num_constraints()
    }

    fn eval<D: DualNum<f64> + Copy>(&self, vars: &[D], constraints: &mut [D]) -> D {
        self.model
            .residuals(self.layout, self.poly, vars, constraints);
        self.cost.eval(vars)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn check_finite(what: &str, values: &[f64]) -> Result<(), MpcError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(MpcError::InvalidInput(format!(
            "{} must be finite, found {:?}",
            what, values
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nlp::{Bounds, NlpSolution, NlpStatus, SolverOptions};
    use std::time::Duration;

    fn params(horizon_steps: usize, target_speed: f64, weights: Weights) -> Params {
        Params {
            horizon_steps,
            target_speed,
            weights,
            solver: SolverOptions {
                max_time_s: 10.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn at_speed(v: f64) -> VehicleState {
        VehicleState {
            v,
            ..Default::default()
        }
    }

    /// Check the properties every usable solution must have.
    fn check_solution(
        mpc: &Mpc,
        state: &VehicleState,
        poly: &ReferencePolynomial,
        r: &SolveResult,
    ) {
        let layout = mpc.layout();
        let p = mpc.params();

        assert!(r.status.is_usable(), "Solve failed with {:?}", r.status);
        assert_eq!(r.primal.len(), layout.num_vars());
        assert_eq!(r.predicted_path.len(), layout.horizon());

        // Trajectory starts at the vehicle
        assert_abs_diff_eq!(r.predicted_path[0].x, state.x, epsilon = 1e-2);
        assert_abs_diff_eq!(r.predicted_path[0].y, state.y, epsilon = 1e-2);

        // Dynamics are satisfied
        let mut residuals = vec![0.0; layout.num_constraints()];
        mpc.model().residuals(layout, poly, &r.primal, &mut residuals);
        for var in StateVar::ALL.iter() {
            assert_abs_diff_eq!(residuals[layout.state(*var, 0)], state.get(*var), epsilon = 1e-3);
            for t in 1..layout.horizon() {
                assert_abs_diff_eq!(residuals[layout.state(*var, t)], 0.0, epsilon = 1e-3);
            }
        }

        // Controls are within their limits
        for i in layout.deltas() {
            assert!(r.primal[i].abs() <= p.max_steer_rad + 1e-9);
        }
        for i in layout.accels() {
            assert!(r.primal[i].abs() <= p.max_accel + 1e-9);
        }

        // The reported breakdown is the optimised cost
        assert_abs_diff_eq!(r.cost.total(), r.objective, epsilon = 1e-6 * r.objective.max(1.0));
    }

    #[test]
    fn test_hold_speed_on_flat_path() {
        let weights = Weights {
            weight_v: 1.0,
            ..Default::default()
        };
        let mpc = Mpc::new(params(10, 50.0, weights)).unwrap();
        let state = at_speed(50.0);
        let poly = ReferencePolynomial::default();

        let r = mpc.solve(&state, &poly).unwrap();
        check_solution(&mpc, &state, &poly, &r);

        let act = r.actuation_checked().unwrap();
        assert!(act.steering_rad.abs() < 1e-3);
        assert!(act.acceleration.abs() < 0.1);
        assert!(r.objective.abs() < 1e-3);
    }

    #[test]
    fn test_accelerate_towards_target_speed() {
        let weights = Weights {
            weight_v: 1.0,
            ..Default::default()
        };
        let mpc = Mpc::new(params(10, 100.0, weights)).unwrap();
        let state = at_speed(50.0);
        let poly = ReferencePolynomial::default();

        let r = mpc.solve(&state, &poly).unwrap();
        check_solution(&mpc, &state, &poly, &r);

        let act = r.actuation_checked().unwrap();
        assert!(act.acceleration > 0.0);
        assert!(act.steering_rad.abs() < 1e-3);

        // Far below the target, so every step is at full throttle
        assert_abs_diff_eq!(act.acceleration, mpc.params().max_accel, epsilon = 1e-2);
    }

    #[test]
    fn test_steer_towards_path() {
        let weights = Weights {
            weight_cte: 1.0,
            ..Default::default()
        };
        let mpc = Mpc::new(params(10, 10.0, weights)).unwrap();

        // Path two meters to the left of the vehicle
        let poly = ReferencePolynomial::new([2.0, 0.0, 0.0, 0.0]);
        let state = VehicleState::from_pose(0.0, 0.0, 0.0, 10.0, &poly);
        assert_eq!(state.cte, 2.0);

        let r = mpc.solve(&state, &poly).unwrap();
        check_solution(&mpc, &state, &poly, &r);

        let layout = mpc.layout();
        let act = r.actuation_checked().unwrap();
        assert!(act.steering_rad > 0.0);
        assert!(r.predicted_path[layout.horizon() - 1].y > 0.0);
        assert!(r.primal[layout.state(StateVar::Cte, layout.horizon() - 1)] < state.cte);
        assert!(r.cost.cte > 0.0);
        assert_eq!(r.cost.speed, 0.0);
    }

    #[test]
    fn test_shortest_horizon() {
        let weights = Weights {
            weight_v: 1.0,
            weight_delta_mean: 1.0,
            weight_delta_dt: 1.0,
            ..Default::default()
        };
        let mpc = Mpc::new(params(2, 20.0, weights)).unwrap();
        let state = at_speed(19.0);
        let poly = ReferencePolynomial::default();

        let r = mpc.solve(&state, &poly).unwrap();
        check_solution(&mpc, &state, &poly, &r);
        assert_eq!(r.cost.steer_mean, 0.0);
        assert_eq!(r.cost.steer_rate, 0.0);
        assert!(r.actuation.acceleration > 0.0);
    }

    #[test]
    fn test_dense_derivatives_agree() {
        let weights = Weights {
            weight_cte: 1.0,
            weight_epsi: 1.0,
            weight_v: 1.0,
            ..Default::default()
        };
        let poly = ReferencePolynomial::new([0.5, 0.1, 0.0, 0.0]);
        let state = VehicleState::from_pose(0.0, 0.0, 0.0, 10.0, &poly);

        let sparse = Mpc::new(params(6, 10.0, weights)).unwrap();
        let mut dense_params = params(6, 10.0, weights);
        dense_params.solver.derivatives = nlp::DerivativeMode::Dense;
        let dense = Mpc::new(dense_params).unwrap();

        let rs = sparse.solve(&state, &poly).unwrap();
        let rd = dense.solve(&state, &poly).unwrap();
        check_solution(&sparse, &state, &poly, &rs);
        check_solution(&dense, &state, &poly, &rd);

        assert_abs_diff_eq!(rs.objective, rd.objective, epsilon = 1e-3 * rs.objective.max(1.0));
        assert_abs_diff_eq!(
            rs.actuation.steering_rad,
            rd.actuation.steering_rad,
            epsilon = 1e-2
        );
    }

    #[test]
    fn test_invalid_configuration() {
        let short = Params {
            horizon_steps: 1,
            ..Default::default()
        };
        assert!(matches!(Mpc::new(short), Err(MpcError::InvalidParams(_))));

        let mpc = Mpc::default();
        let state = VehicleState {
            cte: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            mpc.solve(&state, &ReferencePolynomial::default()),
            Err(MpcError::InvalidInput(_))
        ));
    }

    /// A solver which gives up immediately with a fixed status and violation.
    struct StoppingSolver {
        status: NlpStatus,
        violation: f64,
    }

    impl NlpSolver for StoppingSolver {
        fn solve<E: Evaluator>(
            &self,
            _options: &SolverOptions,
            x0: &[f64],
            _var_bounds: &Bounds,
            _con_bounds: &Bounds,
            _eval: &E,
        ) -> Result<NlpSolution, NlpError> {
            Ok(NlpSolution {
                status: self.status,
                x: x0.to_vec(),
                obj_value: f64::NAN,
                constraint_violation: self.violation,
                iterations: 0,
                solve_time: Duration::from_millis(1),
            })
        }
    }

    #[test]
    fn test_failure_is_reported() {
        let mpc = Mpc::default();
        let state = VehicleState {
            x: 1.0,
            y: -1.0,
            v: 30.0,
            ..Default::default()
        };

        let failing = StoppingSolver {
            status: NlpStatus::NumericalFailure,
            violation: f64::NAN,
        };
        let r = mpc
            .solve_with(&failing, &state, &ReferencePolynomial::default())
            .unwrap();

        assert_eq!(r.status, SolveStatus::NumericalFailure);
        assert!(matches!(
            r.actuation_checked(),
            Err(MpcError::SolveFailed(SolveStatus::NumericalFailure))
        ));

        // The initial guess starts at the vehicle
        assert_eq!(r.predicted_path[0].x, 1.0);
        assert_eq!(r.predicted_path[0].y, -1.0);
    }

    #[test]
    fn test_infeasible_timeout_is_not_applied() {
        let mpc = Mpc::default();
        let state = at_speed(30.0);
        let poly = ReferencePolynomial::default();
        let tolerance = mpc.params().solver.constraint_tolerance;

        let far = StoppingSolver {
            status: NlpStatus::MaxTimeExceeded,
            violation: 78.3,
        };
        let r = mpc.solve_with(&far, &state, &poly).unwrap();
        assert_eq!(r.status, SolveStatus::Infeasible);
        assert!(!r.status.is_usable());
        assert!(matches!(
            r.actuation_checked(),
            Err(MpcError::SolveFailed(SolveStatus::Infeasible))
        ));

        let close = StoppingSolver {
            status: NlpStatus::MaxTimeExceeded,
            violation: 0.5 * tolerance,
        };
        let r = mpc.solve_with(&close, &state, &poly).unwrap();
        assert_eq!(r.status, SolveStatus::TimeBudgetExhausted);
        assert!(r.actuation_checked().is_ok());
    }
}
