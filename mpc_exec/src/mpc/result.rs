//! Solve result and extraction from the primal solution

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::Point2;
use nlp::{NlpSolution, NlpStatus};
use serde::Serialize;
use std::time::Duration;

// Internal
use super::{
    cost::{CostBreakdown, CostFunction},
    layout::{Layout, StateVar},
    model::Actuation,
    MpcError,
};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Outcome of one solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolveStatus {
    /// The solver met its tolerances.
    Success,

    /// The time budget ran out, the result is the best iterate found and it satisfies the
    /// dynamics within the solver's constraint tolerance.
    TimeBudgetExhausted,

    /// The time budget ran out before any iterate satisfied the dynamics.
    Infeasible,

    /// The solver hit its iteration limit without converging.
    IterationLimit,

    /// The solver met a non-finite value.
    NumericalFailure,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Result of one solve.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub status: SolveStatus,

    /// First control of the optimised trajectory, the only one applied before the next solve.
    pub actuation: Actuation,

    /// Predicted position at every horizon step, starting with the current position.
    pub predicted_path: Vec<Point2<f64>>,

    /// Value of the cost at the solution
    pub objective: f64,

    /// Weighted cost terms at the solution
    pub cost: CostBreakdown,

    /// Largest constraint violation at the solution
    pub constraint_violation: f64,

    /// Wall-clock time taken by the solver
    pub solve_time: Duration,

    /// The full primal solution, laid out as described by [`Layout`]
    pub primal: Vec<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SolveStatus {
    /// Status of a solution, given the largest constraint violation accepted by the solver.
    pub fn from_solution(solution: &NlpSolution, constraint_tolerance: f64) -> Self {
        match solution.status {
            NlpStatus::Success => SolveStatus::Success,
            NlpStatus::MaxTimeExceeded => {
                // Also rejects a NaN violation
                if solution.constraint_violation <= constraint_tolerance {
                    SolveStatus::TimeBudgetExhausted
                } else {
                    SolveStatus::Infeasible
                }
            }
            NlpStatus::MaxIterationsExceeded => SolveStatus::IterationLimit,
            NlpStatus::NumericalFailure => SolveStatus::NumericalFailure,
        }
    }

    /// True if the solution may be applied to the vehicle.
    ///
    /// Running out of time is normal operation, the best iterate is still a valid trajectory as
    /// long as it satisfies the dynamics.
    pub fn is_usable(&self) -> bool {
        matches!(self, SolveStatus::Success | SolveStatus::TimeBudgetExhausted)
    }
}

impl SolveResult {
    /// Build the result from the solver's primal solution.
    pub(crate) fn extract(
        layout: &Layout,
        cost: &CostFunction,
        solution: &NlpSolution,
        constraint_tolerance: f64,
    ) -> Self {
        let x = &solution.x;

        let actuation = Actuation {
            steering_rad: x[layout.delta(0)],
            acceleration: x[layout.accel(0)],
        };

        let predicted_path = (0..layout.horizon())
            .map(|t| {
                Point2::new(
                    x[layout.state(StateVar::X, t)],
                    x[layout.state(StateVar::Y, t)],
                )
            })
            .collect();

        Self {
            status: SolveStatus::from_solution(solution, constraint_tolerance),
            actuation,
            predicted_path,
            objective: solution.obj_value,
            cost: cost.terms(x),
            constraint_violation: solution.constraint_violation,
            solve_time: solution.solve_time,
            primal: x.clone(),
        }
    }

    /// The actuation, or an error if the solve did not produce a usable trajectory.
    pub fn actuation_checked(&self) -> Result<Actuation, MpcError> {
        if self.status.is_usable() {
            Ok(self.actuation)
        } else {
            Err(MpcError::SolveFailed(self.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::params::Weights;

    fn solution(layout: &Layout, status: NlpStatus) -> NlpSolution {
        let x: Vec<f64> = (0..layout.num_vars()).map(|i| i as f64).collect();

        NlpSolution {
            status,
            x,
            obj_value: 1.5,
            constraint_violation: 1e-7,
            iterations: 3,
            solve_time: Duration::from_millis(12),
        }
    }

    #[test]
    fn test_extract() {
        let layout = Layout::new(4);
        let weights = Weights::default();
        let cost = CostFunction::new(&layout, &weights, 0.0, 1e-3);

        let result =
            SolveResult::extract(&layout, &cost, &solution(&layout, NlpStatus::Success), 1e-4);

        assert_eq!(result.status, SolveStatus::Success);
        assert_eq!(result.actuation.steering_rad, layout.delta_start() as f64);
        assert_eq!(result.actuation.acceleration, layout.a_start() as f64);
        assert_eq!(result.predicted_path.len(), 4);
        assert_eq!(result.predicted_path[0], Point2::new(0.0, 4.0));
        assert_eq!(result.predicted_path[3], Point2::new(3.0, 7.0));
        assert_eq!(result.objective, 1.5);
        assert_eq!(result.cost.total(), 0.0);
        assert_eq!(result.solve_time, Duration::from_millis(12));
    }

    #[test]
    fn test_actuation_checked() {
        let layout = Layout::new(3);
        let weights = Weights::default();
        let cost = CostFunction::new(&layout, &weights, 0.0, 1e-3);

        let usable = [NlpStatus::Success, NlpStatus::MaxTimeExceeded];
        for status in usable.iter() {
            let result = SolveResult::extract(&layout, &cost, &solution(&layout, *status), 1e-4);
            assert!(result.actuation_checked().is_ok());
        }

        let failed = [
            (NlpStatus::MaxIterationsExceeded, SolveStatus::IterationLimit),
            (NlpStatus::NumericalFailure, SolveStatus::NumericalFailure),
        ];
        for (nlp_status, status) in failed.iter() {
            let result =
                SolveResult::extract(&layout, &cost, &solution(&layout, *nlp_status), 1e-4);
            match result.actuation_checked() {
                Err(MpcError::SolveFailed(s)) => assert_eq!(s, *status),
                other => panic!("Expected a solve failure, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_timeout_needs_feasible_iterate() {
        let layout = Layout::new(3);
        let weights = Weights::default();
        let cost = CostFunction::new(&layout, &weights, 0.0, 1e-3);

        let mut timed_out = solution(&layout, NlpStatus::MaxTimeExceeded);
        let check = |sol: &NlpSolution| SolveResult::extract(&layout, &cost, sol, 1e-4);

        timed_out.constraint_violation = 1e-4;
        assert_eq!(check(&timed_out).status, SolveStatus::TimeBudgetExhausted);

        for violation in [2e-4, 78.3, f64::NAN].iter() {
            timed_out.constraint_violation = *violation;
            let result = check(&timed_out);
            assert_eq!(result.status, SolveStatus::Infeasible);
            assert!(matches!(
                result.actuation_checked(),
                Err(MpcError::SolveFailed(SolveStatus::Infeasible))
            ));
        }
    }
}
