//! Module interfaces
//!
//! Each cyclic module in `mpc_exec` implements [`State`]. A module is constructed empty through
//! `Default`, brought up once with [`State::init`] against the running session, and then stepped
//! once per control cycle with [`State::proc`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// MODULE STATE
// ---------------------------------------------------------------------------

/// The module's internal state.
pub trait State {
    /// Data required during initialisation
    type InitData;
    /// An error which can occur during initialisation.
    type InitError;

    /// Data required for cyclic processing.
    type InputData;
    /// Data produced by cyclic processing.
    type OutputData;
    /// A report on the status of the cyclic processing.
    type StatusReport;
    /// An error which can occur during cyclic processing.
    type ProcError;

    /// Initialise the module.
    ///
    /// # Inputs
    /// - `init_data`: The input data required by the module.
    /// - `session`: The session the module archives into.
    ///
    /// # Outputs
    /// - On success `Ok(())`.
    /// - On error an `InitError` instance.
    fn init(&mut self, init_data: Self::InitData, session: &Session)
        -> Result<(), Self::InitError>;

    /// Main module processing function.
    ///
    /// # Inputs
    /// - `input_data`: The data required for processing by the module.
    ///
    /// # Outputs
    /// - On success a tuple of the output data and status report.
    /// - On error a `ProcError` instance.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>;

    /// Construct a default module and initialise it in one step.
    fn new_initialised(
        init_data: Self::InitData,
        session: &Session,
    ) -> Result<Self, Self::InitError>
    where
        Self: Default + Sized,
    {
        let mut module = Self::default();
        module.init(init_data, session)?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accumulates its inputs onto an offset given at init.
    #[derive(Default)]
    struct Accumulator {
        total: Option<f64>,
    }

    impl State for Accumulator {
        type InitData = f64;
        type InitError = ();
        type InputData = f64;
        type OutputData = f64;
        type StatusReport = bool;
        type ProcError = ();

        fn init(&mut self, init_data: f64, _session: &Session) -> Result<(), ()> {
            if init_data.is_finite() {
                self.total = Some(init_data);
                Ok(())
            } else {
                Err(())
            }
        }

        fn proc(&mut self, input_data: &f64) -> Result<(f64, bool), ()> {
            let total = self.total.as_mut().ok_or(())?;
            *total += input_data;
            Ok((*total, *input_data > 0.0))
        }
    }

    #[test]
    fn test_new_initialised() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new("module_test", dir.path()).unwrap();

        let mut acc = Accumulator::new_initialised(1.0, &session).unwrap();
        assert_eq!(acc.proc(&2.0), Ok((3.0, true)));
        assert_eq!(acc.proc(&-0.5), Ok((2.5, false)));

        assert!(Accumulator::new_initialised(f64::NAN, &session).is_err());
        assert!(Accumulator::default().proc(&1.0).is_err());
    }
}
