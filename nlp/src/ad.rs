//! Differentiable primitives
//!
//! Evaluators must not branch on the value of a decision variable with ordinary control flow.
//! These functions are the conditional expressions of the AD layer: the branch is chosen on the
//! primal (real) part and the derivative of the chosen branch is carried through.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_dual::DualNum;

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Lift a constant into the AD scalar.
pub fn constant<D: DualNum<f64>>(value: f64) -> D {
    D::from(value)
}

/// Absolute value.
pub fn abs<D: DualNum<f64> + Copy>(x: D) -> D {
    if x.re() < 0.0 {
        constant::<D>(0.0) - x
    } else {
        x
    }
}

/// `max(x, floor)`, with zero derivative while `x` is at or below the floor.
pub fn max<D: DualNum<f64> + Copy>(x: D, floor: f64) -> D {
    if x.re() > floor {
        x
    } else {
        constant(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_dual::Dual64;

    #[test]
    fn test_abs() {
        let neg = abs(Dual64::new(-2.0, 1.0));
        assert_eq!(neg.re, 2.0);
        assert_eq!(neg.eps, -1.0);

        let pos = abs(Dual64::new(3.0, 1.0));
        assert_eq!(pos.re, 3.0);
        assert_eq!(pos.eps, 1.0);

        assert_eq!(abs(-4.0f64), 4.0);
    }

    #[test]
    fn test_max() {
        let below = max(Dual64::new(1e-5, 1.0), 1e-3);
        assert_eq!(below.re, 1e-3);
        assert_eq!(below.eps, 0.0);

        let above = max(Dual64::new(0.5, 1.0), 1e-3);
        assert_eq!(above.re, 0.5);
        assert_eq!(above.eps, 1.0);
    }
}
