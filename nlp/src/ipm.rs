//! # Primal-dual interior point solver
//!
//! Every constraint row with unequal bounds is given a slack `s_i` and becomes the equality
//! `g_i(x) - s_i = 0`, the bounds moving onto the slack. Rows with equal bounds stay as
//! equalities, rows without finite bounds are dropped and fixed variables are held by an
//! equality on the variable. Writing `w = (x, s)` and `c(w) = 0` for all equalities, the solver
//! follows the solutions of the barrier problems
//!
//! ```text
//! minimise    f(x) - mu * sum ln(w_i - l_i) - mu * sum ln(u_i - w_i)
//! subject to  c(w) = 0
//! ```
//!
//! for a decreasing barrier parameter `mu`. Each iteration takes one Newton step on the
//! primal-dual optimality conditions. The step is computed in the null space of the constraint
//! Jacobian `A`: a QR factorisation of `Aᵀ` gives the range and null space bases, and the reduced
//! Hessian is factorised by Cholesky, with a multiple of the identity added to the Hessian until
//! it is positive definite. Steps stay strictly inside the bounds (fraction to the boundary) and
//! are accepted by backtracking on an exact penalty merit function, with one second order
//! correction of the first trial step.
//!
//! The Hessian of the Lagrangian is exact, see [`autodiff::lagrangian_hessian`].
//!
//! The best iterate seen is kept: the feasible one with the lowest cost, or the least infeasible
//! one while none is feasible. It is returned whenever the solve stops short of convergence.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, trace, warn};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use std::time::Instant;

// Internal
use crate::{
    autodiff::{self, Jacobian},
    check_len, Bounds, Evaluator, NlpError, NlpSolution, NlpSolver, NlpStatus, SolverOptions,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Scaling threshold of the dual and complementarity errors.
const MAX_ERROR_SCALE: f64 = 100.0;

/// Bound multipliers are kept within this factor of `mu / (w - l)`.
const MULTIPLIER_SPREAD: f64 = 1e10;

/// Sufficient decrease constant of the line search.
const ARMIJO: f64 = 1e-4;

/// Share of the predicted merit decrease which must come from the constraints.
const PENALTY_SHARE: f64 = 0.1;

/// Smallest step length tried by the line search.
const MIN_STEP: f64 = 1e-14;

/// First Hessian regularisation tried.
const FIRST_REGULARISATION: f64 = 1e-4;

const MIN_REGULARISATION: f64 = 1e-20;
const MAX_REGULARISATION: f64 = 1e40;

/// Growth of the regularisation while searching from zero, and from the previous value.
const FIRST_REGULARISATION_GROWTH: f64 = 100.0;
const REGULARISATION_GROWTH: f64 = 8.0;

/// First regularisation tried relative to the previous value.
const REGULARISATION_DECREASE: f64 = 1.0 / 3.0;

/// Relative size below which a diagonal entry of `R` marks dependent constraints.
const RANK_TOLERANCE: f64 = 1e-12;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Primal-dual interior point solver.
#[derive(Debug, Default, Clone, Copy)]
pub struct InteriorPointSolver;

/// Mapping from the problem to the barrier problem.
#[derive(Debug)]
struct Structure {
    /// Number of problem variables.
    n: usize,

    /// Equality rows and their value.
    equalities: Vec<(usize, f64)>,

    /// Rows with a slack, the slack of the k-th row is `w[n + k]`.
    inequalities: Vec<usize>,

    /// Fixed variables and their value.
    fixed: Vec<(usize, f64)>,

    /// Row of each problem constraint in `c(w)`, if kept.
    row_of: Vec<Option<usize>>,

    lower: Vec<f64>,
    upper: Vec<f64>,
    has_lower: Vec<bool>,
    has_upper: Vec<bool>,
    num_bounds: usize,
}

/// Primal and dual variables of the barrier problem.
#[derive(Debug, Clone)]
struct Iterate {
    w: DVector<f64>,

    /// Multipliers of `c(w) = 0`
    lambda: DVector<f64>,

    /// Multipliers of the lower bounds, zero where there is no bound
    z_lower: DVector<f64>,

    /// Multipliers of the upper bounds, zero where there is no bound
    z_upper: DVector<f64>,
}

/// Distances of an iterate from its bounds, one where there is no bound.
struct Slacks {
    lower: DVector<f64>,
    upper: DVector<f64>,
}

/// Newton system factorised in the null space of the constraint Jacobian.
struct Kkt {
    /// Regularised Hessian of the barrier Lagrangian
    hessian: DMatrix<f64>,

    /// Orthonormal basis of the range of `Aᵀ`
    range: DMatrix<f64>,

    /// Orthonormal basis of the null space of `A`
    null: DMatrix<f64>,

    /// `Aᵀ = range * r`
    r: DMatrix<f64>,

    reduced: Cholesky<f64, Dyn>,
}

/// Hessian regularisation, remembered between iterations.
#[derive(Debug, Default)]
struct Regularisation {
    last: f64,
}

/// Best point found so far.
#[derive(Debug)]
struct Best {
    x: Vec<f64>,
    feasible: bool,

    /// Cost if feasible, violation otherwise
    score: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl NlpSolver for InteriorPointSolver {
    fn solve<E: Evaluator>(
        &self,
        options: &SolverOptions,
        x0: &[f64],
        var_bounds: &Bounds,
        con_bounds: &Bounds,
        eval: &E,
    ) -> Result<NlpSolution, NlpError> {
        options.validate()?;

        let n = eval.num_vars();
        let m = eval.num_constraints();

        if n == 0 {
            return Err(NlpError::EmptyProblem);
        }
        check_len("initial guess", n, x0.len())?;
        var_bounds.check("variable bounds", n)?;
        con_bounds.check("constraint bounds", m)?;

        let structure = Structure::new(var_bounds, con_bounds);
        let equalities = structure.equalities.len() + structure.fixed.len();
        if equalities > n {
            return Err(NlpError::TooFewDegreesOfFreedom {
                equalities,
                variables: n,
            });
        }

        let start = Instant::now();
        let deadline = start + options.max_time();

        let x: Vec<f64> = x0
            .iter()
            .enumerate()
            .map(|(i, &v)| var_bounds.project(i, v))
            .collect();
        let (cost, g) = autodiff::evaluate(eval, &x);

        let mut best = Best::new(&x, cost, con_bounds.max_violation(&g), options);
        let mut it = structure.initial_point(&x, &g, options.bound_push);

        let mut mu = options.initial_barrier;
        let mut tau = fraction_to_boundary(options, mu);
        let mut penalty = 1.0;
        let mut regularisation = Regularisation::default();
        let mut acceptable_count = 0;
        let mut iterations = 0;

        let mut status = NlpStatus::MaxIterationsExceeded;
        if !(cost.is_finite() && g.iter().all(|v| v.is_finite())) {
            warn!("Non-finite cost or constraints at the initial point");
            status = NlpStatus::NumericalFailure;
        }

        while status == NlpStatus::MaxIterationsExceeded && iterations < options.max_iterations {
            if Instant::now() >= deadline {
                status = NlpStatus::MaxTimeExceeded;
                break;
            }

            let x = &it.w.as_slice()[..n];
            let d = autodiff::derivatives(eval, x, options.derivatives);
            let violation = con_bounds.max_violation(&d.constraints);

            let c = structure.residuals(&it.w, &d.constraints);
            let a = structure.jacobian(&d.jacobian);
            let gradient = structure.pad(&d.gradient);

            if !(gradient.iter().all(|v| v.is_finite()) && a.iter().all(|v| v.is_finite())) {
                warn!("Non-finite derivatives on iteration {}", iterations);
                status = NlpStatus::NumericalFailure;
                break;
            }

            let a_lambda = a.tr_mul(&it.lambda);
            let dual = &gradient + &a_lambda - &it.z_lower + &it.z_upper;

            // Convergence
            let error = structure.optimality_error(&it, &dual, &c, 0.0);
            if options.print_level > 0 {
                debug!(
                    "Iteration {}: cost {:e}, violation {:.2e}, error {:.2e}, mu {:.1e}, \
                    regularisation {:.1e}",
                    iterations, d.cost, violation, error, mu, regularisation.last
                );
            }

            if violation <= options.constraint_tolerance {
                if error <= options.tolerance {
                    status = NlpStatus::Success;
                    break;
                }

                if error <= options.acceptable_tolerance {
                    acceptable_count += 1;
                } else {
                    acceptable_count = 0;
                }
            } else {
                acceptable_count = 0;
            }

            if options.acceptable_iterations > 0
                && acceptable_count >= options.acceptable_iterations
            {
                status = NlpStatus::Success;
                break;
            }

            // Barrier update, repeated while the barrier problem is already solved
            let min_barrier = options.tolerance / 10.0;
            while mu > min_barrier
                && structure.optimality_error(&it, &dual, &c, mu)
                    <= options.barrier_tolerance_factor * mu
            {
                mu = (options.barrier_decrease_factor * mu)
                    .min(mu.powf(options.barrier_decrease_power))
                    .max(min_barrier);
                tau = fraction_to_boundary(options, mu);
            }

            // Newton system
            let lagrangian =
                autodiff::lagrangian_hessian(eval, x, &structure.row_multipliers(&it.lambda));
            if lagrangian.iter().any(|v| !v.is_finite()) {
                warn!("Non-finite Hessian on iteration {}", iterations);
                status = NlpStatus::NumericalFailure;
                break;
            }

            let slacks = structure.slacks(&it.w);
            let mut hessian = DMatrix::zeros(structure.num_primal(), structure.num_primal());
            hessian.view_mut((0, 0), (n, n)).copy_from(&lagrangian);
            for i in 0..structure.num_primal() {
                hessian[(i, i)] +=
                    it.z_lower[i] / slacks.lower[i] + it.z_upper[i] / slacks.upper[i];
            }

            let kkt = match Kkt::factor(hessian, &a, &mut regularisation, options.print_level) {
                Some(kkt) => kkt,
                None => {
                    warn!("Cannot factorise the Newton system on iteration {}", iterations);
                    status = NlpStatus::NumericalFailure;
                    break;
                }
            };

            let barrier_gradient = structure.barrier_gradient(&gradient, &slacks, mu);
            let r1 = &barrier_gradient + &a_lambda;
            let (mut dw, dlambda) = match kkt.solve(&r1, &c) {
                Some(step) => step,
                None => {
                    warn!("Cannot solve the Newton system on iteration {}", iterations);
                    status = NlpStatus::NumericalFailure;
                    break;
                }
            };

            // Line search on the exact penalty merit function
            let c_norm = c.lp_norm(1);
            let slope = barrier_gradient.dot(&dw);
            if c_norm > 0.0 {
                let curvature = dw.dot(&(&kkt.hessian * &dw)).max(0.0);
                let required = (slope + 0.5 * curvature) / ((1.0 - PENALTY_SHARE) * c_norm);
                if penalty < required {
                    penalty = required + 1.0;
                }
            }
            let directional = slope - penalty * c_norm;
            let merit0 = structure.barrier(&it.w, d.cost, mu) + penalty * c_norm;
            let sufficient =
                |merit: f64, alpha: f64| merit <= merit0 + ARMIJO * alpha * directional;

            let max_step = structure.max_primal_step(&slacks, &dw, tau);
            let mut alpha = max_step;
            let mut accepted = None;
            let mut first_trial = true;

            while alpha > MIN_STEP {
                let trial = &it.w + &dw * alpha;
                if let Some((cost_t, g_t, merit_t)) = structure.merit(eval, &trial, mu, penalty) {
                    if sufficient(merit_t, alpha) {
                        accepted = Some((trial, cost_t, g_t));
                        break;
                    }

                    // Second order correction of the full step
                    if first_trial {
                        let c_soc = &c * alpha + structure.residuals(&trial, &g_t);
                        if let Some((dw_soc, _)) = kkt.solve(&r1, &c_soc) {
                            let alpha_soc = structure.max_primal_step(&slacks, &dw_soc, tau);
                            let trial_soc = &it.w + &dw_soc * alpha_soc;

                            if let Some((cost_s, g_s, merit_s)) =
                                structure.merit(eval, &trial_soc, mu, penalty)
                            {
                                if sufficient(merit_s, alpha) {
                                    if options.print_level > 1 {
                                        trace!("Second order correction accepted");
                                    }
                                    dw = dw_soc;
                                    alpha = alpha_soc;
                                    accepted = Some((trial_soc, cost_s, g_s));
                                    break;
                                }
                            }
                        }
                    }
                }

                alpha *= 0.5;
                first_trial = false;
            }

            let (w_next, cost_next, g_next) = match accepted {
                Some(step) => step,
                None => {
                    warn!("Line search failed on iteration {}", iterations);
                    status = NlpStatus::NumericalFailure;
                    break;
                }
            };

            if options.print_level > 1 {
                trace!(
                    "Step {:.3e} of {:.3e}, penalty {:.2e}, largest change {:.2e}",
                    alpha,
                    max_step,
                    penalty,
                    dw.amax()
                );
            }

            // Bound multipliers
            let (dz_lower, dz_upper) = structure.bound_multiplier_step(&it, &slacks, &dw, mu);
            let alpha_z = max_step_to_boundary(&it.z_lower, &dz_lower, &structure.has_lower, tau)
                .min(max_step_to_boundary(
                    &it.z_upper,
                    &dz_upper,
                    &structure.has_upper,
                    tau,
                ));

            it.w = w_next;
            it.lambda += dlambda * alpha;
            it.z_lower += dz_lower * alpha_z;
            it.z_upper += dz_upper * alpha_z;
            structure.clamp_multipliers(&mut it, mu);

            iterations += 1;
            best.offer(
                &it.w.as_slice()[..n],
                cost_next,
                con_bounds.max_violation(&g_next),
                options,
            );
        }

        let x = if status == NlpStatus::Success {
            it.w.as_slice()[..n].to_vec()
        } else {
            best.x
        };

        let (obj_value, g) = autodiff::evaluate(eval, &x);
        let constraint_violation = con_bounds.max_violation(&g);
        let solve_time = start.elapsed();

        if options.print_level > 0 {
            debug!(
                "Solve finished with {:?} after {} iterations in {:.3} s",
                status,
                iterations,
                solve_time.as_secs_f64()
            );
        }

        Ok(NlpSolution {
            status,
            x,
            obj_value,
            constraint_violation,
            iterations,
            solve_time,
        })
    }
}

impl Structure {
    fn new(var_bounds: &Bounds, con_bounds: &Bounds) -> Self {
        let n = var_bounds.len();
        let m = con_bounds.len();

        let mut equalities = Vec::new();
        let mut inequalities = Vec::new();
        for i in 0..m {
            if con_bounds.is_fixed(i) {
                equalities.push((i, con_bounds.lower[i]));
            } else if con_bounds.has_lower(i) || con_bounds.has_upper(i) {
                inequalities.push(i);
            }
        }

        let fixed: Vec<(usize, f64)> = (0..n)
            .filter(|&i| var_bounds.is_fixed(i))
            .map(|i| (i, var_bounds.lower[i]))
            .collect();

        let mut row_of = vec![None; m];
        for (k, &(i, _)) in equalities.iter().enumerate() {
            row_of[i] = Some(k);
        }
        for (k, &i) in inequalities.iter().enumerate() {
            row_of[i] = Some(equalities.len() + k);
        }

        // Bounds of w = (x, s), fixed variables are held by their equality instead
        let mut lower = var_bounds.lower.clone();
        let mut upper = var_bounds.upper.clone();
        let mut has_lower: Vec<bool> = (0..n)
            .map(|i| !var_bounds.is_fixed(i) && var_bounds.has_lower(i))
            .collect();
        let mut has_upper: Vec<bool> = (0..n)
            .map(|i| !var_bounds.is_fixed(i) && var_bounds.has_upper(i))
            .collect();

        for &i in inequalities.iter() {
            lower.push(con_bounds.lower[i]);
            upper.push(con_bounds.upper[i]);
            has_lower.push(con_bounds.has_lower(i));
            has_upper.push(con_bounds.has_upper(i));
        }

        let num_bounds = has_lower.iter().chain(has_upper.iter()).filter(|&&b| b).count();

        Self {
            n,
            equalities,
            inequalities,
            fixed,
            row_of,
            lower,
            upper,
            has_lower,
            has_upper,
            num_bounds,
        }
    }

    /// Length of `w`.
    fn num_primal(&self) -> usize {
        self.n + self.inequalities.len()
    }

    /// Length of `c(w)`.
    fn num_rows(&self) -> usize {
        self.equalities.len() + self.inequalities.len() + self.fixed.len()
    }

    /// Starting point strictly inside the bounds, with unit bound multipliers.
    fn initial_point(&self, x: &[f64], g: &[f64], push: f64) -> Iterate {
        let mut w = DVector::zeros(self.num_primal());
        for (i, &v) in x.iter().enumerate() {
            w[i] = self.push_inside(i, v, push);
        }
        for (k, &row) in self.inequalities.iter().enumerate() {
            w[self.n + k] = self.push_inside(self.n + k, g[row], push);
        }

        let unit = |mask: &[bool]| {
            DVector::from_iterator(mask.len(), mask.iter().map(|&b| if b { 1.0 } else { 0.0 }))
        };

        Iterate {
            w,
            lambda: DVector::zeros(self.num_rows()),
            z_lower: unit(&self.has_lower),
            z_upper: unit(&self.has_upper),
        }
    }

    /// Move `value` inside the bounds of `w[i]` by a margin relative to the bounds.
    fn push_inside(&self, i: usize, value: f64, push: f64) -> f64 {
        let (l, u) = (self.lower[i], self.upper[i]);

        match (self.has_lower[i], self.has_upper[i]) {
            (true, true) => {
                let margin_l = (push * l.abs().max(1.0)).min(push * (u - l));
                let margin_u = (push * u.abs().max(1.0)).min(push * (u - l));
                value.max(l + margin_l).min(u - margin_u)
            }
            (true, false) => value.max(l + push * l.abs().max(1.0)),
            (false, true) => value.min(u - push * u.abs().max(1.0)),
            (false, false) => value,
        }
    }

    /// Equality residuals `c(w)`.
    fn residuals(&self, w: &DVector<f64>, g: &[f64]) -> DVector<f64> {
        DVector::from_iterator(
            self.num_rows(),
            self.equalities
                .iter()
                .map(|&(i, v)| g[i] - v)
                .chain(
                    self.inequalities
                        .iter()
                        .enumerate()
                        .map(|(k, &i)| g[i] - w[self.n + k]),
                )
                .chain(self.fixed.iter().map(|&(j, v)| w[j] - v)),
        )
    }

    /// Jacobian of `c(w)`.
    fn jacobian(&self, jacobian: &Jacobian) -> DMatrix<f64> {
        let ne = self.equalities.len();
        let ni = self.inequalities.len();
        let mut a = DMatrix::zeros(self.num_rows(), self.num_primal());

        jacobian.for_each(|row, col, v| {
            if let Some(k) = self.row_of[row] {
                a[(k, col)] = v;
            }
        });
        for k in 0..ni {
            a[(ne + k, self.n + k)] = -1.0;
        }
        for (k, &(j, _)) in self.fixed.iter().enumerate() {
            a[(ne + ni + k, j)] = 1.0;
        }

        a
    }

    /// Multiplier of every problem constraint, zero for dropped rows.
    fn row_multipliers(&self, lambda: &DVector<f64>) -> Vec<f64> {
        self.row_of
            .iter()
            .map(|row| row.map_or(0.0, |k| lambda[k]))
            .collect()
    }

    /// Extend a gradient over `x` with zeros for the slacks.
    fn pad(&self, gradient: &[f64]) -> DVector<f64> {
        DVector::from_iterator(
            self.num_primal(),
            gradient
                .iter()
                .copied()
                .chain(std::iter::repeat(0.0).take(self.inequalities.len())),
        )
    }

    fn slacks(&self, w: &DVector<f64>) -> Slacks {
        let np = self.num_primal();

        Slacks {
            lower: DVector::from_fn(np, |i, _| {
                if self.has_lower[i] {
                    w[i] - self.lower[i]
                } else {
                    1.0
                }
            }),
            upper: DVector::from_fn(np, |i, _| {
                if self.has_upper[i] {
                    self.upper[i] - w[i]
                } else {
                    1.0
                }
            }),
        }
    }

    /// Barrier objective at `w` for a cost of `cost`.
    fn barrier(&self, w: &DVector<f64>, cost: f64, mu: f64) -> f64 {
        let mut value = cost;
        for i in 0..w.len() {
            if self.has_lower[i] {
                value -= mu * (w[i] - self.lower[i]).ln();
            }
            if self.has_upper[i] {
                value -= mu * (self.upper[i] - w[i]).ln();
            }
        }
        value
    }

    fn barrier_gradient(&self, gradient: &DVector<f64>, slacks: &Slacks, mu: f64) -> DVector<f64> {
        DVector::from_fn(self.num_primal(), |i, _| {
            let mut v = gradient[i];
            if self.has_lower[i] {
                v -= mu / slacks.lower[i];
            }
            if self.has_upper[i] {
                v += mu / slacks.upper[i];
            }
            v
        })
    }

    /// Cost, constraints and merit at `w`, if all are finite.
    fn merit<E: Evaluator>(
        &self,
        eval: &E,
        w: &DVector<f64>,
        mu: f64,
        penalty: f64,
    ) -> Option<(f64, Vec<f64>, f64)> {
        let (cost, g) = autodiff::evaluate(eval, &w.as_slice()[..self.n]);
        if !(cost.is_finite() && g.iter().all(|v| v.is_finite())) {
            return None;
        }

        let merit = self.barrier(w, cost, mu) + penalty * self.residuals(w, &g).lp_norm(1);
        if merit.is_finite() {
            Some((cost, g, merit))
        } else {
            None
        }
    }

    /// Scaled optimality error of the barrier problem for `mu`, or of the problem for zero.
    fn optimality_error(
        &self,
        it: &Iterate,
        dual: &DVector<f64>,
        c: &DVector<f64>,
        mu: f64,
    ) -> f64 {
        let z_sum = it.z_lower.sum() + it.z_upper.sum();
        let dual_scale = MAX_ERROR_SCALE
            .max((it.lambda.lp_norm(1) + z_sum) / (self.num_rows() + self.num_bounds).max(1) as f64)
            / MAX_ERROR_SCALE;
        let complementarity_scale =
            MAX_ERROR_SCALE.max(z_sum / self.num_bounds.max(1) as f64) / MAX_ERROR_SCALE;

        let mut complementarity: f64 = 0.0;
        for i in 0..self.num_primal() {
            if self.has_lower[i] {
                let e = (it.w[i] - self.lower[i]) * it.z_lower[i] - mu;
                complementarity = complementarity.max(e.abs());
            }
            if self.has_upper[i] {
                let e = (self.upper[i] - it.w[i]) * it.z_upper[i] - mu;
                complementarity = complementarity.max(e.abs());
            }
        }

        (dual.amax() / dual_scale)
            .max(c.amax())
            .max(complementarity / complementarity_scale)
    }

    /// Largest step along `dw` keeping `w` a fraction `tau` inside its bounds.
    fn max_primal_step(&self, slacks: &Slacks, dw: &DVector<f64>, tau: f64) -> f64 {
        max_step_to_boundary(&slacks.lower, dw, &self.has_lower, tau).min(max_step_to_boundary(
            &slacks.upper,
            &(-dw),
            &self.has_upper,
            tau,
        ))
    }

    fn bound_multiplier_step(
        &self,
        it: &Iterate,
        slacks: &Slacks,
        dw: &DVector<f64>,
        mu: f64,
    ) -> (DVector<f64>, DVector<f64>) {
        let np = self.num_primal();

        let dz_lower = DVector::from_fn(np, |i, _| {
            if self.has_lower[i] {
                let z = it.z_lower[i];
                mu / slacks.lower[i] - z - z / slacks.lower[i] * dw[i]
            } else {
                0.0
            }
        });
        let dz_upper = DVector::from_fn(np, |i, _| {
            if self.has_upper[i] {
                let z = it.z_upper[i];
                mu / slacks.upper[i] - z + z / slacks.upper[i] * dw[i]
            } else {
                0.0
            }
        });

        (dz_lower, dz_upper)
    }

    /// Keep the bound multipliers close to their primal estimate `mu / (w - l)`.
    fn clamp_multipliers(&self, it: &mut Iterate, mu: f64) {
        for i in 0..self.num_primal() {
            if self.has_lower[i] {
                let s = it.w[i] - self.lower[i];
                it.z_lower[i] = it.z_lower[i]
                    .min(MULTIPLIER_SPREAD * mu / s)
                    .max(mu / (MULTIPLIER_SPREAD * s));
            }
            if self.has_upper[i] {
                let s = self.upper[i] - it.w[i];
                it.z_upper[i] = it.z_upper[i]
                    .min(MULTIPLIER_SPREAD * mu / s)
                    .max(mu / (MULTIPLIER_SPREAD * s));
            }
        }
    }
}

impl Kkt {
    /// Factorise the Newton system with Hessian `hessian` and constraint Jacobian `a`.
    ///
    /// Returns `None` if the constraints are linearly dependent or no regularisation makes the
    /// reduced Hessian positive definite.
    fn factor(
        mut hessian: DMatrix<f64>,
        a: &DMatrix<f64>,
        regularisation: &mut Regularisation,
        print_level: u8,
    ) -> Option<Self> {
        let np = hessian.nrows();
        let rows = a.nrows();

        // QR of Aᵀ padded to a square matrix, so that Q is complete
        let mut padded = DMatrix::zeros(np, np);
        padded.view_mut((0, 0), (np, rows)).copy_from(&a.transpose());
        let qr = padded.qr();
        let q = qr.q();
        let r = qr.r().view((0, 0), (rows, rows)).into_owned();

        let scale = r.amax().max(1.0);
        if (0..rows).any(|k| r[(k, k)].abs() <= RANK_TOLERANCE * scale) {
            return None;
        }

        let range = q.columns(0, rows).into_owned();
        let null = q.columns(rows, np - rows).into_owned();

        let reduced_hessian = null.transpose() * &hessian * &null;
        let (delta, reduced) = regularisation.factor(&reduced_hessian)?;

        if print_level > 1 && delta > 0.0 {
            trace!("Hessian regularised by {:.2e}", delta);
        }

        for i in 0..np {
            hessian[(i, i)] += delta;
        }

        Some(Self {
            hessian,
            range,
            null,
            r,
            reduced,
        })
    }

    /// Solve for the step `(dw, dlambda)` with dual right hand side `r1` and residuals `c`.
    fn solve(&self, r1: &DVector<f64>, c: &DVector<f64>) -> Option<(DVector<f64>, DVector<f64>)> {
        // Range space component, A dw = -c
        let py = self.r.tr_solve_upper_triangular(&(-c))?;
        let y = &self.range * py;

        // Null space component minimises the quadratic model
        let rhs = -(self.null.transpose() * (r1 + &self.hessian * &y));
        let pz = self.reduced.solve(&rhs);
        let dw = y + &self.null * pz;

        // Multipliers from the range space part of the dual equation
        let t = -(r1 + &self.hessian * &dw);
        let dlambda = self.r.solve_upper_triangular(&(self.range.transpose() * t))?;

        Some((dw, dlambda))
    }
}

impl Regularisation {
    /// Factorise `reduced + delta I` for the smallest `delta` found to make it positive definite.
    fn factor(&mut self, reduced: &DMatrix<f64>) -> Option<(f64, Cholesky<f64, Dyn>)> {
        if let Some(chol) = Cholesky::new(reduced.clone()) {
            return Some((0.0, chol));
        }

        let dim = reduced.nrows();
        let (mut delta, growth) = if self.last == 0.0 {
            (FIRST_REGULARISATION, FIRST_REGULARISATION_GROWTH)
        } else {
            (
                (self.last * REGULARISATION_DECREASE).max(MIN_REGULARISATION),
                REGULARISATION_GROWTH,
            )
        };

        while delta <= MAX_REGULARISATION {
            let shifted = reduced + DMatrix::<f64>::identity(dim, dim) * delta;
            if let Some(chol) = Cholesky::new(shifted) {
                self.last = delta;
                return Some((delta, chol));
            }
            delta *= growth;
        }

        None
    }
}

impl Best {
    fn new(x: &[f64], cost: f64, violation: f64, options: &SolverOptions) -> Self {
        let feasible = violation <= options.constraint_tolerance;
        Self {
            x: x.to_vec(),
            feasible,
            score: if feasible { cost } else { violation },
        }
    }

    /// Keep `x` if it is better than the current best.
    fn offer(&mut self, x: &[f64], cost: f64, violation: f64, options: &SolverOptions) {
        let candidate = Self::new(x, cost, violation, options);

        let better = match (candidate.feasible, self.feasible) {
            (true, false) => true,
            (false, true) => false,
            _ => candidate.score < self.score || self.score.is_nan(),
        };

        if better {
            *self = candidate;
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn fraction_to_boundary(options: &SolverOptions, mu: f64) -> f64 {
    options.min_fraction_to_boundary.max(1.0 - mu)
}

/// Largest step in `(0, 1]` along `steps` keeping each masked `values` entry above
/// `(1 - tau)` times its current value.
fn max_step_to_boundary(
    values: &DVector<f64>,
    steps: &DVector<f64>,
    mask: &[bool],
    tau: f64,
) -> f64 {
    values
        .iter()
        .zip(steps.iter())
        .zip(mask.iter())
        .filter(|(_, bounded)| **bounded)
        .fold(1.0, |alpha: f64, ((&v, &d), _)| {
            if d < 0.0 {
                alpha.min(-tau * v / d)
            } else {
                alpha
            }
        })
}
