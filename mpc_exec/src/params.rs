//! # MPC Executable Parameters
//!
//! This module provides parameters for the closed-loop executable.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Deserialize;
use util::logger::LogConfig;

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
pub struct MpcExecParams {
    /// Number of control cycles to run
    pub num_cycles: u64,

    /// Duration of one control cycle, which is also the plant integration step.
    ///
    /// Units: seconds
    pub cycle_period_s: f64,

    /// If true each cycle is padded out to `cycle_period_s` of wall-clock time
    pub real_time: bool,

    /// Reference path in the world frame, `y = c0 + c1 x + c2 x^2 + c3 x^3`
    pub path_coeffs: [f64; 4],

    /// Initial position
    ///
    /// Units: meters
    pub initial_position_m: [f64; 2],

    /// Initial heading
    ///
    /// Units: radians
    pub initial_heading_rad: f64,

    /// Initial speed
    pub initial_speed: f64,

    /// Log levels, `debug` with the solver at `info` if omitted
    #[serde(default)]
    pub log: LogConfig,
}
