//! Closed-loop MPC executable entry point.
//!
//! # Architecture
//!
//! The executable drives a simulated vehicle along a fixed reference path:
//!
//!     - Initialise the session, logging and the MpcCtrl module
//!     - Main loop:
//!         - Compute the cross-track and heading errors of the current pose
//!         - MPC control processing
//!         - Step the plant forward one cycle under the commanded actuation
//!         - Write archives
//!
//! The plant is the same kinematic bicycle the controller predicts with, stepped in the world
//! frame at the cycle period.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{info, warn};
use std::thread;
use std::time::{Duration, Instant};

// Internal
use mpc_lib::{
    mpc::{KinematicBicycle, ReferencePolynomial, VehicleState},
    mpc_ctrl::{InputData, MpcCtrl},
    params::MpcExecParams,
};
use util::{
    archive::Archived,
    logger::logger_init,
    maths,
    module::State,
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Parameter file of the executable.
const EXEC_PARAMS_FILE: &str = "mpc_exec.toml";

/// Parameter file of the MpcCtrl module.
const MPC_PARAMS_FILE: &str = "mpc.toml";

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    let session = Session::in_sw_root("mpc_exec").wrap_err("Failed to create the session")?;

    let exec_params: MpcExecParams = util::params::load(EXEC_PARAMS_FILE)
        .wrap_err("Could not load the executable parameters")?;

    logger_init(&exec_params.log, &session).wrap_err("Failed to initialise logging")?;

    info!("MPC Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- INITIALISE MODULES ----

    let mut mpc_ctrl = MpcCtrl::new_initialised(MPC_PARAMS_FILE, &session)
        .wrap_err("Failed to initialise MpcCtrl")?;

    info!("MpcCtrl init complete");

    let lf_m = match mpc_ctrl.mpc() {
        Some(mpc) => mpc.params().lf_m,
        None => return Err(color_eyre::eyre::eyre!("MpcCtrl has no controller after init")),
    };
    let plant = KinematicBicycle::new(lf_m, exec_params.cycle_period_s);
    let poly = ReferencePolynomial::new(exec_params.path_coeffs);

    let mut state = pose_state(
        exec_params.initial_position_m[0],
        exec_params.initial_position_m[1],
        exec_params.initial_heading_rad,
        exec_params.initial_speed,
        &poly,
    );

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let mut distance_m = 0.0;
    let mut num_fallbacks = 0u64;
    let mut max_abs_cte_m: f64 = 0.0;

    for cycle in 0..exec_params.num_cycles {
        let cycle_start_instant = Instant::now();

        // ---- CONTROL ----

        let (output, report) = mpc_ctrl
            .proc(&InputData { state, poly })
            .wrap_err_with(|| format!("MpcCtrl failed on cycle {}", cycle))?;

        if report.fallback {
            num_fallbacks += 1;
        }

        info!(
            "Cycle {:4}: pos ({:8.3}, {:8.3}) v {:6.3} cte {:7.4} epsi {:7.4} -> \
            steering {:7.4} rad, accel {:7.4} ({:?}, {:.3} s)",
            cycle,
            state.x,
            state.y,
            state.v,
            state.cte,
            state.epsi,
            output.actuation.steering_rad,
            output.actuation.acceleration,
            report.status,
            report.solve_time_s
        );

        // ---- PLANT ----

        let next = plant.step(&state, &poly, &output.actuation);

        distance_m += maths::norm(&[state.x, state.y], &[next.x, next.y]).unwrap_or(0.0);
        state = pose_state(next.x, next.y, next.psi, next.v, &poly);
        max_abs_cte_m = max_abs_cte_m.max(state.cte.abs());

        // ---- WRITE ARCHIVES ----

        if let Err(e) = mpc_ctrl.write() {
            warn!("Could not write the MpcCtrl archive: {}", e);
        }

        // ---- CYCLE MANAGEMENT ----

        if exec_params.real_time {
            let cycle_dur = Instant::now() - cycle_start_instant;

            match Duration::from_secs_f64(exec_params.cycle_period_s).checked_sub(cycle_dur) {
                Some(d) => thread::sleep(d),
                None => warn!(
                    "Cycle overran by {:.06} s",
                    cycle_dur.as_secs_f64() - exec_params.cycle_period_s
                ),
            }
        }
    }

    // ---- SHUTDOWN ----

    info!(
        "Travelled {:.3} m in {} cycles, largest cross-track error {:.4} m, {} fallback cycles",
        distance_m, exec_params.num_cycles, max_abs_cte_m, num_fallbacks
    );
    info!("End of execution");

    Ok(())
}

/// Build the controller's state from a world frame pose, wrapping the heading error.
fn pose_state(x: f64, y: f64, psi: f64, v: f64, poly: &ReferencePolynomial) -> VehicleState {
    let mut state = VehicleState::from_pose(x, y, psi, v, poly);
    state.epsi = maths::wrap_pi(state.epsi);
    state
}
