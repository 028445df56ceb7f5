//! Forward-mode automatic differentiation of an [`Evaluator`]
//!
//! Each sweep seeds the dual part of one variable, so a single evaluation yields the derivative
//! of the cost and of every constraint with respect to that variable, i.e. one entry of the
//! gradient and one column of the constraint Jacobian.
//!
//! Second derivatives use hyper-dual numbers seeded on a pair of variables, one evaluation per
//! entry of the upper triangle of the Hessian.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::DMatrix;
use num_dual::{Dual64, HyperDual64};

// Internal
use crate::{DerivativeMode, Evaluator};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Constraint Jacobian `dg/dx`, `m` rows by `n` columns.
#[derive(Debug, Clone)]
pub enum Jacobian {
    Dense(DMatrix<f64>),
    Sparse(SparseColumns),
}

/// Jacobian stored column by column, keeping only the non-zero entries.
#[derive(Debug, Clone)]
pub struct SparseColumns {
    nrows: usize,

    /// `(row, value)` pairs for each column, in increasing row order
    cols: Vec<Vec<(usize, f64)>>,
}

/// Values and first derivatives of a problem at a point.
#[derive(Debug, Clone)]
pub struct Derivatives {
    pub cost: f64,
    pub gradient: Vec<f64>,
    pub constraints: Vec<f64>,
    pub jacobian: Jacobian,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Jacobian {
    fn zeros(nrows: usize, ncols: usize, mode: DerivativeMode) -> Self {
        match mode {
            DerivativeMode::Dense => Jacobian::Dense(DMatrix::zeros(nrows, ncols)),
            DerivativeMode::Sparse => Jacobian::Sparse(SparseColumns {
                nrows,
                cols: vec![Vec::new(); ncols],
            }),
        }
    }

    fn set_column<I: Iterator<Item = f64>>(&mut self, col: usize, values: I) {
        match self {
            Jacobian::Dense(mat) => {
                for (row, v) in values.enumerate() {
                    mat[(row, col)] = v;
                }
            }
            Jacobian::Sparse(sp) => {
                sp.cols[col] = values
                    .enumerate()
                    .filter(|&(_, v)| v != 0.0)
                    .collect();
            }
        }
    }

    pub fn nrows(&self) -> usize {
        match self {
            Jacobian::Dense(mat) => mat.nrows(),
            Jacobian::Sparse(sp) => sp.nrows,
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Jacobian::Dense(mat) => mat.ncols(),
            Jacobian::Sparse(sp) => sp.cols.len(),
        }
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        match self {
            Jacobian::Dense(mat) => mat.len(),
            Jacobian::Sparse(sp) => sp.cols.iter().map(|c| c.len()).sum(),
        }
    }

    /// Call `f(row, col, value)` for every stored entry.
    pub fn for_each<F: FnMut(usize, usize, f64)>(&self, mut f: F) {
        match self {
            Jacobian::Dense(mat) => {
                for col in 0..mat.ncols() {
                    for row in 0..mat.nrows() {
                        f(row, col, mat[(row, col)]);
                    }
                }
            }
            Jacobian::Sparse(sp) => {
                for (col, entries) in sp.cols.iter().enumerate() {
                    for &(row, v) in entries {
                        f(row, col, v);
                    }
                }
            }
        }
    }

    /// Entry at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        match self {
            Jacobian::Dense(mat) => mat[(row, col)],
            Jacobian::Sparse(sp) => sp.cols[col]
                .iter()
                .find(|&&(r, _)| r == row)
                .map(|&(_, v)| v)
                .unwrap_or(0.0),
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Evaluate the cost and constraints at `x` without derivatives.
pub fn evaluate<E: Evaluator>(eval: &E, x: &[f64]) -> (f64, Vec<f64>) {
    let mut constraints = vec![0.0; eval.num_constraints()];
    let cost = eval.eval(x, &mut constraints);
    (cost, constraints)
}

/// Evaluate the cost, its gradient, the constraints and their Jacobian at `x`.
pub fn derivatives<E: Evaluator>(eval: &E, x: &[f64], mode: DerivativeMode) -> Derivatives {
    let n = x.len();
    let m = eval.num_constraints();

    if n == 0 {
        let (cost, constraints) = evaluate(eval, x);
        return Derivatives {
            cost,
            gradient: Vec::new(),
            constraints,
            jacobian: Jacobian::zeros(m, 0, mode),
        };
    }

    let mut vars: Vec<Dual64> = x.iter().map(|&v| Dual64::new(v, 0.0)).collect();
    let mut g = vec![Dual64::new(0.0, 0.0); m];

    let mut cost = 0.0;
    let mut gradient = vec![0.0; n];
    let mut constraints = vec![0.0; m];
    let mut jacobian = Jacobian::zeros(m, n, mode);

    for j in 0..n {
        vars[j].eps = 1.0;
        let f = eval.eval(&vars, &mut g);
        vars[j].eps = 0.0;

        // The primal part is the same for every sweep
        if j == 0 {
            cost = f.re;
            for (c, gi) in constraints.iter_mut().zip(g.iter()) {
                *c = gi.re;
            }
        }

        gradient[j] = f.eps;
        jacobian.set_column(j, g.iter().map(|gi| gi.eps));
    }

    Derivatives {
        cost,
        gradient,
        constraints,
        jacobian,
    }
}

/// Hessian of the Lagrangian `f(x) + sum_i y_i g_i(x)` at `x`.
///
/// Takes `n (n + 1) / 2` evaluations of the problem.
pub fn lagrangian_hessian<E: Evaluator>(eval: &E, x: &[f64], multipliers: &[f64]) -> DMatrix<f64> {
    let n = x.len();

    let mut vars: Vec<HyperDual64> = x.iter().map(|&v| HyperDual64::from_re(v)).collect();
    let mut g = vec![HyperDual64::from_re(0.0); eval.num_constraints()];
    let mut hessian = DMatrix::zeros(n, n);

    for j in 0..n {
        vars[j].eps1 = 1.0;

        for k in j..n {
            vars[k].eps2 = 1.0;
            let f = eval.eval(&vars, &mut g);
            vars[k].eps2 = 0.0;

            let h = f.eps1eps2
                + g.iter()
                    .zip(multipliers.iter())
                    .map(|(gi, y)| gi.eps1eps2 * y)
                    .sum::<f64>();
            hessian[(j, k)] = h;
            hessian[(k, j)] = h;
        }

        vars[j].eps1 = 0.0;
    }

    hessian
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ad, DualNum};
    use approx::assert_relative_eq;

    /// f = x0^2 sin(x1) + |x2|, g0 = x0 x1, g1 = x2 - 1, g2 = cos(x1)
    struct Toy;

    impl Evaluator for Toy {
        fn num_vars(&self) -> usize {
            3
        }

        fn num_constraints(&self) -> usize {
            3
        }

        fn eval<D: DualNum<f64> + Copy>(&self, vars: &[D], constraints: &mut [D]) -> D {
            constraints[0] = vars[0] * vars[1];
            constraints[1] = vars[2] - ad::constant::<D>(1.0);
            constraints[2] = vars[1].cos();
            vars[0].powi(2) * vars[1].sin() + ad::abs(vars[2])
        }
    }

    #[test]
    fn test_derivatives() {
        let x = [1.5, 0.3, -2.0];

        for mode in [DerivativeMode::Dense, DerivativeMode::Sparse].iter() {
            let d = derivatives(&Toy, &x, *mode);

            assert_relative_eq!(d.cost, 2.25 * 0.3f64.sin() + 2.0, epsilon = 1e-12);
            assert_relative_eq!(d.gradient[0], 2.0 * 1.5 * 0.3f64.sin(), epsilon = 1e-12);
            assert_relative_eq!(d.gradient[1], 2.25 * 0.3f64.cos(), epsilon = 1e-12);
            assert_relative_eq!(d.gradient[2], -1.0, epsilon = 1e-12);

            assert_relative_eq!(d.constraints[0], 0.45, epsilon = 1e-12);
            assert_relative_eq!(d.constraints[1], -3.0, epsilon = 1e-12);

            assert_eq!(d.jacobian.nrows(), 3);
            assert_eq!(d.jacobian.ncols(), 3);
            assert_relative_eq!(d.jacobian.get(0, 0), 0.3, epsilon = 1e-12);
            assert_relative_eq!(d.jacobian.get(0, 1), 1.5, epsilon = 1e-12);
            assert_relative_eq!(d.jacobian.get(1, 2), 1.0, epsilon = 1e-12);
            assert_relative_eq!(d.jacobian.get(2, 1), -(0.3f64.sin()), epsilon = 1e-12);
            assert_eq!(d.jacobian.get(2, 0), 0.0);
        }
    }

    #[test]
    fn test_sparse_storage() {
        let x = [1.5, 0.3, -2.0];
        let dense = derivatives(&Toy, &x, DerivativeMode::Dense);
        let sparse = derivatives(&Toy, &x, DerivativeMode::Sparse);

        assert_eq!(dense.jacobian.nnz(), 9);
        assert_eq!(sparse.jacobian.nnz(), 4);

        for row in 0..3 {
            for col in 0..3 {
                assert_relative_eq!(
                    dense.jacobian.get(row, col),
                    sparse.jacobian.get(row, col),
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_entries() {
        let x = [1.5, 0.3, -2.0];
        let sparse = derivatives(&Toy, &x, DerivativeMode::Sparse);

        let mut entries = Vec::new();
        sparse.jacobian.for_each(|row, col, v| entries.push((row, col, v)));
        assert_eq!(entries.len(), 4);
        for (row, col, v) in entries {
            assert_eq!(sparse.jacobian.get(row, col), v);
        }

        let dense = derivatives(&Toy, &x, DerivativeMode::Dense);
        let mut count = 0;
        dense.jacobian.for_each(|row, col, v| {
            assert_relative_eq!(v, sparse.jacobian.get(row, col), epsilon = 1e-12);
            count += 1;
        });
        assert_eq!(count, 9);
    }

    #[test]
    fn test_lagrangian_hessian() {
        let (x0, x1) = (1.5, 0.3);
        let x = [x0, x1, -2.0];
        let y = [2.0, 5.0, -1.0];

        let h = lagrangian_hessian(&Toy, &x, &y);

        // f: d2/dx0^2 = 2 sin(x1), d2/dx0dx1 = 2 x0 cos(x1), d2/dx1^2 = -x0^2 sin(x1)
        // g0 = x0 x1 adds y0 on the cross term, g2 = cos(x1) adds -y2 cos(x1) on x1
        assert_relative_eq!(h[(0, 0)], 2.0 * x1.sin(), epsilon = 1e-12);
        assert_relative_eq!(h[(0, 1)], 2.0 * x0 * x1.cos() + y[0], epsilon = 1e-12);
        assert_relative_eq!(h[(1, 0)], h[(0, 1)], epsilon = 1e-12);
        assert_relative_eq!(
            h[(1, 1)],
            -x0 * x0 * x1.sin() - y[2] * x1.cos(),
            epsilon = 1e-12
        );

        // |x2| and x2 - 1 are piecewise linear
        for i in 0..3 {
            assert_eq!(h[(i, 2)], 0.0);
            assert_eq!(h[(2, i)], 0.0);
        }
    }
}
