//! Decision vector layout
//!
//! The solver works on one flat vector holding the state trajectory and the control trajectory:
//!
//! ```text
//! | x[0..N) | y[0..N) | psi[0..N) | v[0..N) | cte[0..N) | epsi[0..N) | delta[0..N-1) | a[0..N-1) |
//! ```
//!
//! The constraint vector holds one residual per state variable per step and uses the same
//! grouping as the six state blocks, so a state index is also its constraint index.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::ops::Range;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of state variables per step.
pub const NUM_STATES: usize = 6;

/// Number of control variables per step.
pub const NUM_CONTROLS: usize = 2;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The state variables, in block order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateVar {
    X,
    Y,
    Psi,
    V,
    Cte,
    Epsi,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Block offsets of the decision vector for a horizon of `n` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    n: usize,
    x_start: usize,
    y_start: usize,
    psi_start: usize,
    v_start: usize,
    cte_start: usize,
    epsi_start: usize,
    delta_start: usize,
    a_start: usize,
    num_vars: usize,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl StateVar {
    /// All state variables in block order.
    pub const ALL: [StateVar; NUM_STATES] = [
        StateVar::X,
        StateVar::Y,
        StateVar::Psi,
        StateVar::V,
        StateVar::Cte,
        StateVar::Epsi,
    ];

    /// Position of the variable's block among the state blocks.
    pub fn block(self) -> usize {
        self as usize
    }
}

impl Layout {
    /// Compute the layout for a horizon of `n` steps.
    ///
    /// `n` must be at least 2, this is checked when the controller parameters are validated.
    pub fn new(n: usize) -> Self {
        let x_start = 0;
        let y_start = x_start + n;
        let psi_start = y_start + n;
        let v_start = psi_start + n;
        let cte_start = v_start + n;
        let epsi_start = cte_start + n;
        let delta_start = epsi_start + n;
        let a_start = delta_start + n.saturating_sub(1);
        let num_vars = a_start + n.saturating_sub(1);

        Self {
            n,
            x_start,
            y_start,
            psi_start,
            v_start,
            cte_start,
            epsi_start,
            delta_start,
            a_start,
            num_vars,
        }
    }

    /// Number of horizon steps.
    pub fn horizon(&self) -> usize {
        self.n
    }

    /// Length of the decision vector, `6N + 2(N - 1)`.
    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    /// Length of the constraint vector, `6N`.
    pub fn num_constraints(&self) -> usize {
        NUM_STATES * self.n
    }

    /// Offset of a state variable's block.
    pub fn start(&self, var: StateVar) -> usize {
        match var {
            StateVar::X => self.x_start,
            StateVar::Y => self.y_start,
            StateVar::Psi => self.psi_start,
            StateVar::V => self.v_start,
            StateVar::Cte => self.cte_start,
            StateVar::Epsi => self.epsi_start,
        }
    }

    pub fn delta_start(&self) -> usize {
        self.delta_start
    }

    pub fn a_start(&self) -> usize {
        self.a_start
    }

    /// Index of state variable `var` at step `t`.
    pub fn state(&self, var: StateVar, t: usize) -> usize {
        debug_assert!(t < self.n);
        self.start(var) + t
    }

    /// Index of the steering angle at step `t`.
    pub fn delta(&self, t: usize) -> usize {
        debug_assert!(t + 1 < self.n);
        self.delta_start + t
    }

    /// Index of the acceleration at step `t`.
    pub fn accel(&self, t: usize) -> usize {
        debug_assert!(t + 1 < self.n);
        self.a_start + t
    }

    /// Range of all state variables.
    pub fn states(&self) -> Range<usize> {
        self.x_start..self.delta_start
    }

    /// Range of the steering block.
    pub fn deltas(&self) -> Range<usize> {
        self.delta_start..self.a_start
    }

    /// Range of the acceleration block.
    pub fn accels(&self) -> Range<usize> {
        self.a_start..self.num_vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets() {
        let layout = Layout::new(10);

        let starts: Vec<usize> = StateVar::ALL.iter().map(|&v| layout.start(v)).collect();
        assert_eq!(starts, vec![0, 10, 20, 30, 40, 50]);
        assert_eq!(layout.delta_start(), 60);
        assert_eq!(layout.a_start(), 69);
        assert_eq!(layout.num_vars(), 10 * 6 + 9 * 2);
        assert_eq!(layout.num_constraints(), 60);

        assert_eq!(layout.state(StateVar::V, 3), 33);
        assert_eq!(layout.delta(8), 68);
        assert_eq!(layout.accel(0), 69);
        assert_eq!(layout.accels(), 69..78);
    }

    #[test]
    fn test_blocks_are_contiguous() {
        for n in 2..8 {
            let layout = Layout::new(n);

            let mut expected = 0;
            for var in StateVar::ALL.iter() {
                assert_eq!(layout.start(*var), expected);
                assert_eq!(var.block() * n, expected);
                expected += n;
            }
            assert_eq!(layout.states(), 0..expected);
            assert_eq!(layout.deltas().len(), n - 1);
            assert_eq!(layout.accels().len(), n - 1);
            assert_eq!(layout.accels().end, layout.num_vars());
        }
    }
}
