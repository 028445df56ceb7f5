//! MPC control module
//!
//! Runs one trajectory optimisation per cycle and decides what is commanded when a solve does
//! not produce a usable trajectory: the previous steering angle is held and full braking is
//! commanded until a solve succeeds again.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use state::*;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during MpcCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum MpcCtrlError {
    #[error("Cannot load the MpcCtrl parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("Cannot set up the MPC: {0}")]
    MpcInitError(crate::mpc::MpcError),

    #[error("Cannot set up the MpcCtrl archive: {0}")]
    ArchiveInitError(String),

    #[error("MpcCtrl has not been initialised")]
    NotInitialised,

    #[error("The MPC could not be solved: {0}")]
    SolveError(crate::mpc::MpcError),
}
