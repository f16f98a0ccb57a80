//! Automatic differentiation support using `num-dual`.
//!
//! Residuals written over [`Dual64`] can be differentiated column by column
//! with [`compute_jacobian`]. Tabulated inputs (relative permeabilities,
//! viscosity multipliers, adsorption isotherms) are not generic over the number
//! type; [`lift`] carries their value and slope into the dual domain instead.
//!
//! # Example
//!
//! ```
//! use polyflow::autodiff::compute_jacobian;
//! use num_dual::Dual64;
//!
//! // f(x, y) = [x^2, xy]
//! let f = |vars: &[Dual64]| vec![vars[0] * vars[0], vars[0] * vars[1]];
//! let jac = compute_jacobian(f, &[2.0, 3.0]);
//! assert_eq!(jac.get(1, 0), 3.0);
//! ```

use nalgebra::DMatrix;
use num_dual::*;

/// Dense Jacobian `dF/dx` of a residual function.
#[derive(Debug, Clone, PartialEq)]
pub struct Jacobian {
    /// Number of equations (rows)
    pub n_equations: usize,
    /// Number of variables (columns)
    pub n_variables: usize,
    /// Row-major entries
    pub entries: Vec<f64>,
}

impl Jacobian {
    /// Jacobian of zeros.
    pub fn zeros(n_equations: usize, n_variables: usize) -> Self {
        Jacobian { n_equations, n_variables, entries: vec![0.0; n_equations * n_variables] }
    }

    /// Entry `(i, j)`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.entries[i * self.n_variables + j]
    }

    /// Sets entry `(i, j)`.
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.entries[i * self.n_variables + j] = value;
    }

    /// True if there are as many equations as variables.
    pub fn is_square(&self) -> bool {
        self.n_equations == self.n_variables
    }

    /// Copies the entries into a `nalgebra` matrix.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.n_equations, self.n_variables, &self.entries)
    }
}

/// Computes the Jacobian of `f` at `x` with forward-mode dual numbers.
///
/// One evaluation of `f` per variable; column `j` is read from the dual parts
/// of the residuals when `x[j]` is seeded.
pub fn compute_jacobian<F>(f: F, x: &[f64]) -> Jacobian
where
    F: Fn(&[Dual64]) -> Vec<Dual64>,
{
    let n_vars = x.len();
    let mut columns = Vec::with_capacity(n_vars);

    for j in 0..n_vars {
        let mut x_dual: Vec<Dual64> = x.iter().map(|&v| Dual64::from(v)).collect();
        x_dual[j] = Dual64::from(x[j]).derivative();
        let residuals = f(&x_dual);
        columns.push(residuals.iter().map(|r| r.eps).collect::<Vec<f64>>());
    }

    let n_eqs = columns.first().map_or(0, |c| c.len());
    let mut jacobian = Jacobian::zeros(n_eqs, n_vars);
    for (j, column) in columns.iter().enumerate() {
        for (i, value) in column.iter().enumerate() {
            jacobian.set(i, j, *value);
        }
    }
    jacobian
}

/// Lifts a scalar function value into the dual domain.
///
/// Given `value = g(x.re)` and `slope = g'(x.re)`, returns `g(x)` to first order.
pub fn lift(value: f64, slope: f64, x: Dual64) -> Dual64 {
    Dual64::new(value, slope * x.eps)
}
