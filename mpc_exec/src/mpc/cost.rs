//! # Cost function
//!
//! The cost is a weighted sum of penalty terms over the horizon:
//!
//! - Tracking, for every step: squared cross-track error, squared heading error and squared
//!   deviation from the target speed.
//! - Effort, for every control step: a smoothed detector of cross-track error between steps,
//!   steering scaled by the inverse of `|cte|`, and squared acceleration.
//! - Rate of change, for every pair of control steps: steering change scaled by the inverse of
//!   `|cte|`, a smoothed detector of steering, squared acceleration change and the mean squared
//!   steering change.
//!
//! Dividing steering by `|cte|` penalises steering less when the vehicle is far from the path, so
//! it can correct aggressively. The divisor is floored at `cte_floor_m` to keep the gradient
//! bounded near the path.
//!
//! The detector `(|a| + |b| - |a + b|)^6` is zero when `a` and `b` share a sign and grows when
//! they have opposite signs and are both away from zero.
//!
//! The terms are evaluated individually into [`CostTerms`] so the solver's objective and the
//! breakdown reported after a solve are the same computation.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nlp::{ad, DualNum};

// Internal
use super::{
    layout::{Layout, StateVar},
    params::Weights,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Power applied to the smoothed sign-change detectors.
const DETECTOR_POWER: i32 = 6;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The cost function of one controller.
#[derive(Debug, Clone, Copy)]
pub struct CostFunction<'a> {
    layout: &'a Layout,
    weights: &'a Weights,
    target_speed: f64,
    cte_floor_m: f64,
}

/// Weighted value of each cost term.
#[derive(Debug, Clone, Copy)]
pub struct CostTerms<D> {
    pub cte: D,
    pub epsi: D,
    pub speed: D,
    pub cte_change: D,
    pub steer: D,
    pub accel: D,
    pub steer_rate: D,
    pub steer_change: D,
    pub accel_rate: D,
    pub steer_mean: D,
}

/// Cost terms evaluated at a solution.
pub type CostBreakdown = CostTerms<f64>;

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<'a> CostFunction<'a> {
    /// Create the cost function over `layout`.
    ///
    /// Panics if the horizon is shorter than two steps, `Params::validate` rejects such
    /// horizons.
    pub fn new(
        layout: &'a Layout,
        weights: &'a Weights,
        target_speed: f64,
        cte_floor_m: f64,
    ) -> Self {
        assert!(
            layout.horizon() >= 2,
            "The cost needs at least two horizon steps, found {}",
            layout.horizon()
        );

        Self {
            layout,
            weights,
            target_speed,
            cte_floor_m,
        }
    }

    /// Total cost of the decision vector.
    pub fn eval<D: DualNum<f64> + Copy>(&self, vars: &[D]) -> D {
        self.terms(vars).total()
    }

    /// Each weighted term of the cost of the decision vector.
    pub fn terms<D: DualNum<f64> + Copy>(&self, vars: &[D]) -> CostTerms<D> {
        let l = self.layout;
        let w = self.weights;
        let n = l.horizon();

        let cte = |t: usize| vars[l.state(StateVar::Cte, t)];
        let epsi = |t: usize| vars[l.state(StateVar::Epsi, t)];
        let v = |t: usize| vars[l.state(StateVar::V, t)];
        let delta = |t: usize| vars[l.delta(t)];
        let a = |t: usize| vars[l.accel(t)];
        let cte_divisor = |t: usize| ad::max(ad::abs(cte(t)), self.cte_floor_m);

        let mut terms = CostTerms::<D>::zero();

        // ---- TRACKING ----

        terms.cte = weighted(w.weight_cte, 0..n, |t| cte(t).powi(2));
        terms.epsi = weighted(w.weight_epsi, 0..n, |t| epsi(t).powi(2));
        terms.speed = weighted(w.weight_v, 0..n, |t| {
            (v(t) - ad::constant::<D>(self.target_speed)).powi(2)
        });

        // ---- EFFORT ----

        terms.cte_change = weighted(w.weight_cte_change, 0..n - 1, |t| {
            sign_change(cte(t), cte(t + 1))
        });
        terms.steer = weighted(w.weight_delta, 0..n - 1, |t| {
            (delta(t) / cte_divisor(t)).powi(2)
        });
        terms.accel = weighted(w.weight_a, 0..n - 1, |t| a(t).powi(2));

        // ---- RATE OF CHANGE ----

        let rate_steps = 0..n.saturating_sub(2);

        terms.steer_rate = weighted(w.weight_delta_dt, rate_steps.clone(), |t| {
            ((delta(t + 1) - delta(t)) / cte_divisor(t)).powi(2)
        });
        terms.steer_change = weighted(w.weight_delta_change, rate_steps.clone(), |t| {
            sign_change(delta(t), delta(t + 1))
        });
        terms.accel_rate = weighted(w.weight_a_dt, rate_steps.clone(), |t| {
            (a(t + 1) - a(t)).powi(2)
        });

        // Mean over an empty range is defined as zero
        if w.weight_delta_mean != 0.0 && !rate_steps.is_empty() {
            let count = rate_steps.len() as f64;
            let sum = sum(rate_steps, |t| (delta(t + 1) - delta(t)).powi(2));
            terms.steer_mean =
                ad::constant::<D>(w.weight_delta_mean) * sum / ad::constant::<D>(count);
        }

        terms
    }
}

impl<D: DualNum<f64> + Copy> CostTerms<D> {
    fn zero() -> Self {
        let z = ad::constant::<D>(0.0);
        Self {
            cte: z,
            epsi: z,
            speed: z,
            cte_change: z,
            steer: z,
            accel: z,
            steer_rate: z,
            steer_change: z,
            accel_rate: z,
            steer_mean: z,
        }
    }

    /// The terms in a fixed order.
    pub fn to_array(&self) -> [D; 10] {
        [
            self.cte,
            self.epsi,
            self.speed,
            self.cte_change,
            self.steer,
            self.accel,
            self.steer_rate,
            self.steer_change,
            self.accel_rate,
            self.steer_mean,
        ]
    }

    /// Sum of all terms.
    pub fn total(&self) -> D {
        self.to_array()
            .iter()
            .fold(ad::constant::<D>(0.0), |acc, &term| acc + term)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// `weight * sum(term(t))`, exactly zero when the weight is zero.
fn weighted<D, F>(weight: f64, steps: std::ops::Range<usize>, term: F) -> D
where
    D: DualNum<f64> + Copy,
    F: Fn(usize) -> D,
{
    if weight == 0.0 {
        return ad::constant::<D>(0.0);
    }

    ad::constant::<D>(weight) * sum(steps, term)
}

fn sum<D, F>(steps: std::ops::Range<usize>, term: F) -> D
where
    D: DualNum<f64> + Copy,
    F: Fn(usize) -> D,
{
    steps.fold(ad::constant::<D>(0.0), |acc, t| acc + term(t))
}

/// Smoothed detector of `a` and `b` having opposite signs.
fn sign_change<D: DualNum<f64> + Copy>(a: D, b: D) -> D {
    (ad::abs(a) + ad::abs(b) - ad::abs(a + b)).powi(DETECTOR_POWER)
}
