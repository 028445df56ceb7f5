//! Box bounds on variables and constraint residuals

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
use crate::{check_len, NlpError};
use std::ops::Range;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Magnitude at and beyond which a bound is treated as absent.
pub const INFINITE_BOUND: f64 = 1.0e19;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Element-wise lower and upper bounds.
///
/// An unbounded element is represented by a very large finite value rather than infinity, any
/// bound of magnitude [`INFINITE_BOUND`] or more is ignored by the solver.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Bounds {
    /// Create `len` bounds all set to `[lower, upper]`.
    pub fn uniform(len: usize, lower: f64, upper: f64) -> Self {
        Self {
            lower: vec![lower; len],
            upper: vec![upper; len],
        }
    }

    /// Number of bounded elements.
    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Set the bounds of every element in `range` to `[lower, upper]`.
    pub fn set_range(&mut self, range: Range<usize>, lower: f64, upper: f64) {
        for i in range {
            self.lower[i] = lower;
            self.upper[i] = upper;
        }
    }

    /// Collapse the bounds of element `i` onto `value`.
    pub fn fix(&mut self, i: usize, value: f64) {
        self.lower[i] = value;
        self.upper[i] = value;
    }

    /// Project `value` onto the bounds of element `i`.
    pub fn project(&self, i: usize, value: f64) -> f64 {
        value.max(self.lower[i]).min(self.upper[i])
    }

    /// Distance of `value` from the bounds of element `i`, zero if inside.
    pub fn violation(&self, i: usize, value: f64) -> f64 {
        (value - self.project(i, value)).abs()
    }

    /// True if element `i` has a finite lower bound.
    pub fn has_lower(&self, i: usize) -> bool {
        self.lower[i] > -INFINITE_BOUND
    }

    /// True if element `i` has a finite upper bound.
    pub fn has_upper(&self, i: usize) -> bool {
        self.upper[i] < INFINITE_BOUND
    }

    /// True if the bounds of element `i` collapse onto a single value.
    pub fn is_fixed(&self, i: usize) -> bool {
        self.lower[i] == self.upper[i]
    }

    /// Largest violation over all elements, NaN if any value is NaN.
    pub fn max_violation(&self, values: &[f64]) -> f64 {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| self.violation(i, v))
            .fold(0.0, |acc: f64, v| {
                if acc.is_nan() || v.is_nan() {
                    f64::NAN
                } else {
                    acc.max(v)
                }
            })
    }

    /// Check these bounds are well formed for a vector of length `len`.
    pub fn check(&self, what: &'static str, len: usize) -> Result<(), NlpError> {
        check_len(what, len, self.lower.len())?;
        check_len(what, len, self.upper.len())?;

        for (index, (&lower, &upper)) in self.lower.iter().zip(self.upper.iter()).enumerate() {
            // Also rejects NaN
            if !(lower <= upper) {
                return Err(NlpError::InvertedBounds {
                    index,
                    lower,
                    upper,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_and_violation() {
        let mut bounds = Bounds::uniform(3, -1.0, 1.0);
        bounds.fix(2, 0.5);

        assert_eq!(bounds.project(0, 3.0), 1.0);
        assert_eq!(bounds.project(1, -0.25), -0.25);
        assert_eq!(bounds.project(2, 0.0), 0.5);

        assert_eq!(bounds.violation(0, -3.0), 2.0);
        assert_eq!(bounds.violation(1, 0.9), 0.0);
        assert_eq!(bounds.max_violation(&[0.0, 1.5, 0.0]), 0.5);
    }

    #[test]
    fn test_max_violation_keeps_nan() {
        let bounds = Bounds::uniform(3, -1.0, 1.0);

        assert!(bounds.max_violation(&[f64::NAN, 0.0, 0.0]).is_nan());
        assert!(bounds.max_violation(&[2.0, f64::NAN, 0.0]).is_nan());
        assert!(bounds.max_violation(&[0.0, 0.0, f64::NAN]).is_nan());
        assert_eq!(bounds.max_violation(&[]), 0.0);
    }

    #[test]
    fn test_infinite_bounds() {
        let mut bounds = Bounds::uniform(4, -INFINITE_BOUND, INFINITE_BOUND);
        bounds.set_range(1..2, 0.0, 2e19);
        bounds.set_range(2..3, -1e20, 3.0);
        bounds.fix(3, 0.5);

        assert!(!bounds.has_lower(0) && !bounds.has_upper(0));
        assert!(bounds.has_lower(1) && !bounds.has_upper(1));
        assert!(!bounds.has_lower(2) && bounds.has_upper(2));
        assert!(bounds.is_fixed(3) && !bounds.is_fixed(2));
    }

    #[test]
    fn test_check() {
        let mut bounds = Bounds::uniform(2, 0.0, 1.0);
        assert!(bounds.check("bounds", 2).is_ok());
        assert!(matches!(
            bounds.check("bounds", 3),
            Err(NlpError::DimensionMismatch { expected: 3, found: 2, .. })
        ));

        bounds.set_range(1..2, 2.0, 1.0);
        assert!(matches!(
            bounds.check("bounds", 2),
            Err(NlpError::InvertedBounds { index: 1, .. })
        ));

        bounds.set_range(1..2, f64::NAN, 1.0);
        assert!(bounds.check("bounds", 2).is_err());
    }
}
