//! # MPC library
//!
//! This library allows other crates in the workspace, and the `mpc_exec` binary, to access the
//! controller and its cyclic module.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

/// Model predictive controller - optimises the vehicle's trajectory over a finite horizon
pub mod mpc;

/// MPC control module - runs the controller once per cycle and handles failed solves
pub mod mpc_ctrl;

/// Parameters of the closed-loop executable
pub mod params;
