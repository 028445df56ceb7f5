//! Utility library for the MPC software
//!
//! Provides the pieces shared by every executable: locating the software root, loading
//! parameter files, session directories with their logs and CSV archives, and the module
//! interface.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod archive;
pub mod host;
pub mod logger;
pub mod maths;
pub mod module;
pub mod params;
pub mod session;
pub mod time;
