//! Implementations for the MpcCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{trace, warn};
use nalgebra::Point2;
use serde::Serialize;

// Internal
use super::MpcCtrlError;
use crate::mpc::{
    Actuation, CostBreakdown, Mpc, Params, ReferencePolynomial, SolveStatus, VehicleState,
};
use util::{
    archive::{ArchiveError, Archived, Archiver},
    maths,
    module::State,
    params,
    session::Session,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// MPC control module state
#[derive(Default)]
pub struct MpcCtrl {
    mpc: Option<Mpc>,

    /// Number of cycles processed
    cycle: u64,

    /// Actuation commanded on the previous cycle
    prev_actuation: Option<Actuation>,

    /// Number of consecutive cycles without a usable solve
    consecutive_failures: u64,

    pub(crate) report: Option<StatusReport>,
    arch_cycles: Option<Archiver>,
}

/// Input data to MPC control.
#[derive(Debug, Default, Clone, Copy)]
pub struct InputData {
    /// Current estimate of the vehicle state.
    pub state: VehicleState,

    /// Reference path, in the same frame as the state.
    pub poly: ReferencePolynomial,
}

/// Output of MPC control.
#[derive(Debug, Clone)]
pub struct OutputData {
    /// Actuation to apply until the next cycle.
    pub actuation: Actuation,

    /// Predicted positions over the horizon, empty when the fallback actuation is commanded.
    pub predicted_path: Vec<Point2<f64>>,
}

/// Status report for MPC control processing.
#[derive(Debug, Clone, Copy)]
pub struct StatusReport {
    /// Status of this cycle's solve
    pub status: SolveStatus,

    /// True if the fallback actuation was commanded instead of the solve's
    pub fallback: bool,

    /// Number of consecutive cycles without a usable solve, including this one
    pub consecutive_failures: u64,

    /// Solver time
    ///
    /// Units: seconds
    pub solve_time_s: f64,

    /// Cost at the solution
    pub objective: f64,

    /// Largest constraint violation at the solution
    pub constraint_violation: f64,

    /// Weighted cost terms at the solution
    pub cost: CostBreakdown,
}

/// One row of the cycle archive.
#[derive(Serialize)]
struct CycleRecord {
    cycle: u64,
    status: SolveStatus,
    fallback: bool,
    consecutive_failures: u64,
    solve_time_s: f64,
    steering_rad: f64,
    acceleration: f64,
    objective: f64,
    constraint_violation: f64,
    cost_cte: f64,
    cost_epsi: f64,
    cost_speed: f64,
    cost_cte_change: f64,
    cost_steer: f64,
    cost_accel: f64,
    cost_steer_rate: f64,
    cost_steer_change: f64,
    cost_accel_rate: f64,
    cost_steer_mean: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl State for MpcCtrl {
    type InitData = &'static str;
    type InitError = MpcCtrlError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = MpcCtrlError;

    /// Initialise the MpcCtrl module.
    ///
    /// Expected init data is the path to the parameter file
    fn init(
        &mut self,
        init_data: Self::InitData,
        session: &Session,
    ) -> Result<(), Self::InitError> {
        let params: Params = params::load(init_data).map_err(MpcCtrlError::ParamLoadError)?;

        self.init_with_params(params, session)
    }

    /// Perform cyclic processing of MPC control.
    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        let mpc = self.mpc.as_ref().ok_or(MpcCtrlError::NotInitialised)?;

        let result = mpc
            .solve(&input_data.state, &input_data.poly)
            .map_err(MpcCtrlError::SolveError)?;

        self.cycle += 1;

        let output = match result.actuation_checked() {
            Ok(actuation) => {
                self.consecutive_failures = 0;
                OutputData {
                    actuation,
                    predicted_path: result.predicted_path.clone(),
                }
            }
            Err(e) => {
                self.consecutive_failures += 1;
                let actuation = self.fallback_actuation(mpc.params());
                warn!(
                    "{} ({} consecutive), holding steering at {:.4} rad and braking",
                    e, self.consecutive_failures, actuation.steering_rad
                );
                OutputData {
                    actuation,
                    predicted_path: Vec::new(),
                }
            }
        };

        let report = StatusReport {
            status: result.status,
            fallback: self.consecutive_failures > 0,
            consecutive_failures: self.consecutive_failures,
            solve_time_s: result.solve_time.as_secs_f64(),
            objective: result.objective,
            constraint_violation: result.constraint_violation,
            cost: result.cost,
        };

        trace!(
            "MpcCtrl output: steering {:.4} rad, acceleration {:.4}",
            output.actuation.steering_rad,
            output.actuation.acceleration
        );

        self.prev_actuation = Some(output.actuation);
        self.report = Some(report);

        Ok((output, report))
    }
}

impl Archived for MpcCtrl {
    fn write(&mut self) -> Result<(), ArchiveError> {
        let (arch, report, actuation) =
            match (&mut self.arch_cycles, self.report, self.prev_actuation) {
                (Some(a), Some(r), Some(act)) => (a, r, act),
                _ => return Ok(()),
            };

        arch.serialise(CycleRecord {
            cycle: self.cycle,
            status: report.status,
            fallback: report.fallback,
            consecutive_failures: report.consecutive_failures,
            solve_time_s: report.solve_time_s,
            steering_rad: actuation.steering_rad,
            acceleration: actuation.acceleration,
            objective: report.objective,
            constraint_violation: report.constraint_violation,
            cost_cte: report.cost.cte,
            cost_epsi: report.cost.epsi,
            cost_speed: report.cost.speed,
            cost_cte_change: report.cost.cte_change,
            cost_steer: report.cost.steer,
            cost_accel: report.cost.accel,
            cost_steer_rate: report.cost.steer_rate,
            cost_steer_change: report.cost.steer_change,
            cost_accel_rate: report.cost.accel_rate,
            cost_steer_mean: report.cost.steer_mean,
        })
    }
}

impl MpcCtrl {
    /// Initialise the module from already loaded parameters.
    pub fn init_with_params(
        &mut self,
        params: Params,
        session: &Session,
    ) -> Result<(), MpcCtrlError> {
        self.mpc = Some(Mpc::new(params).map_err(MpcCtrlError::MpcInitError)?);

        session
            .arch_dir("mpc_ctrl")
            .map_err(|e| MpcCtrlError::ArchiveInitError(e.to_string()))?;
        self.arch_cycles = Some(
            Archiver::from_path(session, "mpc_ctrl/cycles.csv")
                .map_err(|e| MpcCtrlError::ArchiveInitError(e.to_string()))?,
        );

        self.cycle = 0;
        self.prev_actuation = None;
        self.consecutive_failures = 0;
        self.report = None;

        Ok(())
    }

    /// The controller, if initialised.
    pub fn mpc(&self) -> Option<&Mpc> {
        self.mpc.as_ref()
    }

    /// Actuation commanded when no usable solve is available.
    ///
    /// Holds the previous steering angle and brakes fully.
    fn fallback_actuation(&self, params: &Params) -> Actuation {
        let steering_rad = self
            .prev_actuation
            .map(|a| a.steering_rad)
            .unwrap_or(0.0);

        Actuation {
            steering_rad: maths::clamp(steering_rad, -params.max_steer_rad, params.max_steer_rad),
            acceleration: -params.max_accel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpc::Weights;
    use nlp::SolverOptions;

    fn test_params() -> Params {
        Params {
            horizon_steps: 5,
            target_speed: 20.0,
            weights: Weights {
                weight_cte: 1.0,
                weight_epsi: 1.0,
                weight_v: 1.0,
                ..Default::default()
            },
            solver: SolverOptions {
                max_time_s: 10.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Parameters for which the solver always stops at its iteration limit.
    fn failing_params() -> Params {
        let mut params = test_params();
        params.solver.max_iterations = 1;
        params
    }

    fn input() -> InputData {
        InputData {
            state: VehicleState {
                v: 15.0,
                ..Default::default()
            },
            poly: ReferencePolynomial::default(),
        }
    }

    #[test]
    fn test_not_initialised() {
        let mut ctrl = MpcCtrl::default();
        assert!(matches!(
            ctrl.proc(&input()),
            Err(MpcCtrlError::NotInitialised)
        ));
        assert!(ctrl.write().is_ok());
    }

    #[test]
    fn test_init_rejects_invalid_params() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new("mpc_ctrl_test", dir.path()).unwrap();

        let params = Params {
            horizon_steps: 1,
            ..Default::default()
        };
        let mut ctrl = MpcCtrl::default();
        assert!(matches!(
            ctrl.init_with_params(params, &session),
            Err(MpcCtrlError::MpcInitError(_))
        ));
    }

    #[test]
    fn test_proc_and_archive() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new("mpc_ctrl_test", dir.path()).unwrap();

        let mut ctrl = MpcCtrl::default();
        ctrl.init_with_params(test_params(), &session).unwrap();

        for _ in 0..2 {
            let (output, report) = ctrl.proc(&input()).unwrap();
            ctrl.write().unwrap();

            assert!(report.status.is_usable());
            assert!(!report.fallback);
            assert_eq!(report.consecutive_failures, 0);
            assert_eq!(output.predicted_path.len(), 5);
            assert!(output.actuation.acceleration > 0.0);
        }

        let archive =
            std::fs::read_to_string(session.arch_root.join("mpc_ctrl/cycles.csv")).unwrap();
        let lines: Vec<&str> = archive.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("cycle,status,fallback,consecutive_failures"));
        assert!(lines[1].starts_with("1,"));
        assert!(lines[2].starts_with("2,"));
        assert!(lines[1..].iter().all(|l| l.contains(",false,0,")));
    }

    #[test]
    fn test_failure_policy() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new("mpc_ctrl_test", dir.path()).unwrap();

        let mut ctrl = MpcCtrl::default();
        ctrl.init_with_params(failing_params(), &session).unwrap();
        let max_accel = failing_params().max_accel;

        // With no previous command the wheels are held straight
        let (output, report) = ctrl.proc(&input()).unwrap();
        assert_eq!(report.status, SolveStatus::IterationLimit);
        assert!(report.fallback);
        assert_eq!(report.consecutive_failures, 1);
        assert_eq!(output.actuation.steering_rad, 0.0);
        assert_eq!(output.actuation.acceleration, -max_accel);
        assert!(output.predicted_path.is_empty());

        // The previous steering is held across failures
        ctrl.prev_actuation = Some(Actuation {
            steering_rad: 0.2,
            acceleration: 0.5,
        });
        let (output, report) = ctrl.proc(&input()).unwrap();
        assert_eq!(report.consecutive_failures, 2);
        assert_eq!(output.actuation.steering_rad, 0.2);
        assert_eq!(output.actuation.acceleration, -max_accel);
        ctrl.write().unwrap();

        // A usable solve clears the failure count
        ctrl.mpc = Some(Mpc::new(test_params()).unwrap());
        let (_, report) = ctrl.proc(&input()).unwrap();
        assert!(!report.fallback);
        assert_eq!(report.consecutive_failures, 0);
    }
}
