//! Bracketing scalar root finder.
//!
//! Modified regula falsi with the Pegasus update: whenever the same endpoint is
//! retained twice, its function value is scaled by `f1 / (f1 + f_new)`, which
//! restores superlinear convergence on one-sided functions. A bisection step is
//! taken if the secant step is not finite or leaves the current bracket, so the
//! method is robust to residuals that are only non-strictly monotone.
//!
//! # Example
//!
//! ```
//! use polyflow::root_finder::RegulaFalsi;
//!
//! let solver = RegulaFalsi::new(50, 1e-12);
//! let root = solver.solve(|x| x * x - 2.0, 0.0, 2.0).unwrap();
//! assert!((root.x - 2.0_f64.sqrt()).abs() < 1e-10);
//! assert!(root.converged);
//! ```

/// Errors raised by [`RegulaFalsi`] under [`BracketPolicy::Error`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RootError {
    #[error("no sign change on [{a}, {b}]: f(a) = {fa}, f(b) = {fb}")]
    NotBracketed { a: f64, b: f64, fa: f64, fb: f64 },
    #[error("root finder did not converge in {iterations} iterations (last iterate {x})")]
    MaxIterationsExceeded { iterations: usize, x: f64 },
}

/// What to do when the interval has no sign change or the iteration cap is hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BracketPolicy {
    /// Return an error
    #[default]
    Error,
    /// Log a warning and return the best available point
    WarnAndContinue,
}

/// Approximate root returned by [`RegulaFalsi`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Root {
    pub x: f64,
    /// Number of interior function evaluations
    pub iterations: usize,
    /// False when the point was accepted without reaching the tolerance
    pub converged: bool,
}

/// Pegasus-modified regula falsi.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegulaFalsi {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub policy: BracketPolicy,
}

impl RegulaFalsi {
    /// Root finder with an iteration cap and a tolerance on both the bracket width and the residual.
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        RegulaFalsi { max_iterations, tolerance, policy: BracketPolicy::Error }
    }

    /// Sets what happens when the interval does not bracket a root.
    pub fn with_policy(mut self, policy: BracketPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Finds a zero of `f` in `[a, b]`.
    pub fn solve<F>(&self, mut f: F, a: f64, b: f64) -> Result<Root, RootError>
    where
        F: FnMut(f64) -> f64,
    {
        self.try_solve(|x| Ok::<f64, RootError>(f(x)), a, b)
    }

    /// Finds a zero of a fallible function in `[a, b]`.
    ///
    /// Errors produced by `f` are propagated unchanged; root-finding failures
    /// are converted into `E`.
    pub fn try_solve<F, E>(&self, mut f: F, a: f64, b: f64) -> Result<Root, E>
    where
        F: FnMut(f64) -> Result<f64, E>,
        E: From<RootError>,
    {
        let macheps = f64::EPSILON;
        let eps_x = self.tolerance + macheps * a.abs().max(b.abs()).max(1.0);

        let mut x0 = a;
        let mut x1 = b;
        let mut f0 = f(x0)?;
        let eps_f = self.tolerance + macheps * f0.abs().max(1.0);
        if f0.abs() < eps_f {
            return Ok(Root { x: x0, iterations: 0, converged: true });
        }
        let mut f1 = f(x1)?;
        if f1.abs() < eps_f {
            return Ok(Root { x: x1, iterations: 0, converged: true });
        }
        if f0 * f1 > 0.0 {
            return self.bracketing_failure(a, b, f0, f1).map_err(E::from);
        }

        let mut iterations = 0;
        // x1 is the latest iterate, x0 the latest one bracketing the root with it
        while (x1 - x0).abs() >= 1e-9 * eps_x {
            let xnew = secant_step(x0, x1, f0, f1);
            let fnew = f(xnew)?;
            iterations += 1;
            if iterations > self.max_iterations {
                return self.too_many_iterations(xnew, iterations - 1).map_err(E::from);
            }
            if fnew.abs() < eps_f {
                return Ok(Root { x: xnew, iterations, converged: true });
            }
            if (fnew > 0.0) == (f0 > 0.0) {
                x0 = x1;
                f0 = f1;
            } else {
                // Pegasus
                f0 *= f1 / (f1 + fnew);
            }
            x1 = xnew;
            f1 = fnew;
        }
        Ok(Root { x: 0.5 * (x0 + x1), iterations, converged: true })
    }

    fn bracketing_failure(&self, a: f64, b: f64, fa: f64, fb: f64) -> Result<Root, RootError> {
        match self.policy {
            BracketPolicy::Error => Err(RootError::NotBracketed { a, b, fa, fb }),
            BracketPolicy::WarnAndContinue => {
                log::warn!(
                    "no sign change on [{}, {}] (f(a) = {:e}, f(b) = {:e}), returning the smaller endpoint",
                    a,
                    b,
                    fa,
                    fb
                );
                let x = if fa.abs() < fb.abs() { a } else { b };
                Ok(Root { x, iterations: 0, converged: false })
            }
        }
    }

    fn too_many_iterations(&self, x: f64, iterations: usize) -> Result<Root, RootError> {
        match self.policy {
            BracketPolicy::Error => Err(RootError::MaxIterationsExceeded { iterations, x }),
            BracketPolicy::WarnAndContinue => {
                log::warn!("root finder hit its cap of {} iterations at x = {}", iterations, x);
                Ok(Root { x, iterations, converged: false })
            }
        }
    }
}

// Regula falsi step between the bracketing points, bisecting when the secant
// is degenerate or lands outside the bracket.
fn secant_step(x0: f64, x1: f64, f0: f64, f1: f64) -> f64 {
    let x = (x1 * f0 - x0 * f1) / (f0 - f1);
    let (lo, hi) = if x0 < x1 { (x0, x1) } else { (x1, x0) };
    if x.is_finite() && x >= lo && x <= hi { x } else { 0.5 * (x0 + x1) }
}
