//! Nonlinear solvers for the reordered transport step.
//!
//! Once the cells are ordered upstream first, every cell (or cyclic group of
//! cells) sees frozen inflow from already solved neighbours and can be solved
//! on its own:
//!
//! - [`single_cell`]: the two unknowns `(s, c)` of one cell, either by nested
//!   scalar root finding (bracketing) or by alternating directional searches
//!   (splitting) with bracketing as the fallback.
//! - [`multi_cell`]: Gauss-Seidel sweeps over a group of cells whose fluxes form
//!   a cycle, re-solving each member until the group state stops changing.
//!
//! Both share [`TransportConfig`] and report failures through [`SolverError`].
//!
//! # Example
//!
//! ```
//! use polyflow::solvers::{SolveMethod, TransportConfig};
//! use polyflow::GradientMethod;
//!
//! let config = TransportConfig::new()
//!     .with_method(SolveMethod::Splitting)
//!     .with_tolerance(1e-8)
//!     .with_max_iterations(50)
//!     .with_gradient_method(GradientMethod::Analytic);
//! assert_eq!(config.max_iterations, 50);
//! assert_eq!(SolveMethod::try_from(1).unwrap(), SolveMethod::Bracketing);
//! ```

pub mod multi_cell;
pub mod single_cell;

use crate::residual::GradientMethod;
use crate::root_finder::RootError;

/// Result type for solver operations.
pub type SolverResult<T> = Result<T, SolverError>;

/// Errors that can occur while setting up or running a transport step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolverError {
    /// The fluid model does not describe exactly two phases
    #[error("property object must have 2 phases, found {0}")]
    UnsupportedPhaseCount(usize),
    /// Legacy numeric method selector out of range
    #[error("unknown solve method {0}, expected 1 (bracketing) or 2 (splitting)")]
    UnknownMethod(i32),
    /// An input array has the wrong length
    #[error("{what} has length {found}, expected {expected}")]
    DimensionMismatch { what: &'static str, expected: usize, found: usize },
    /// A model or configuration parameter is out of range
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// A cyclic group did not settle within the sweep cap
    #[error(
        "multi-cell group of {cells} cells did not converge after {iterations} sweeps \
         (max delta s = {max_s_change:e}, max delta c = {max_c_change:e})"
    )]
    MultiCellNotConverged { cells: usize, iterations: usize, max_s_change: f64, max_c_change: f64 },
    /// Scalar root finding failed
    #[error(transparent)]
    Root(#[from] RootError),
    /// Newton update could not be computed
    #[error("singular Jacobian matrix")]
    SingularJacobian,
    /// Newton residual blew up
    #[error("residual {residual:e} exceeds the allowed maximum {allowed:e}")]
    ResidualTooLarge { residual: f64, allowed: f64 },
    /// Newton iteration hit its cap
    #[error("Newton iteration did not converge in {iterations} iterations")]
    NewtonNotConverged { iterations: usize },
}

/// Strategy used for a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolveMethod {
    /// Outer root finding on `c`, inner root finding on `s`
    #[default]
    Bracketing,
    /// Alternating directional searches, falling back to bracketing
    Splitting,
}

impl TryFrom<i32> for SolveMethod {
    type Error = SolverError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SolveMethod::Bracketing),
            2 => Ok(SolveMethod::Splitting),
            other => Err(SolverError::UnknownMethod(other)),
        }
    }
}

/// Configuration shared by all transport solvers.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub method: SolveMethod,
    /// Absolute tolerance for residuals and group changes
    pub tolerance: f64,
    /// Cap shared by root finders, splitting iterations and group sweeps
    pub max_iterations: usize,
    /// Jacobian used to orient splitting searches
    pub gradient_method: GradientMethod,
    /// Forward-difference step for [`GradientMethod::FiniteDifference`]
    pub fd_epsilon: f64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            method: SolveMethod::default(),
            tolerance: 1e-9,
            max_iterations: 30,
            gradient_method: GradientMethod::default(),
            fd_epsilon: 1e-5,
        }
    }
}

impl TransportConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the single-cell method.
    pub fn with_method(mut self, method: SolveMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets the tolerance shared by the root finders and group sweeps.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets the iteration cap shared by the root finders and group sweeps.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets how splitting computes residual gradients.
    pub fn with_gradient_method(mut self, gradient_method: GradientMethod) -> Self {
        self.gradient_method = gradient_method;
        self
    }

    /// Sets the finite-difference step used for gradients.
    pub fn with_fd_epsilon(mut self, fd_epsilon: f64) -> Self {
        self.fd_epsilon = fd_epsilon;
        self
    }

    /// Checks that the tolerances and caps are usable.
    pub fn validate(&self) -> SolverResult<()> {
        if self.tolerance.is_nan() || self.tolerance <= 0.0 {
            return Err(SolverError::InvalidParameter(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(SolverError::InvalidParameter(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.fd_epsilon.is_nan() || self.fd_epsilon <= 0.0 {
            return Err(SolverError::InvalidParameter(format!(
                "fd_epsilon must be positive, got {}",
                self.fd_epsilon
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.method, SolveMethod::Bracketing);
        assert_eq!(config.tolerance, 1e-9);
        assert_eq!(config.max_iterations, 30);
        assert_eq!(config.gradient_method, GradientMethod::FiniteDifference);
        assert_eq!(config.fd_epsilon, 1e-5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = TransportConfig::new()
            .with_method(SolveMethod::Splitting)
            .with_tolerance(1e-6)
            .with_max_iterations(12)
            .with_fd_epsilon(1e-6);
        assert_eq!(config.method, SolveMethod::Splitting);
        assert_eq!(config.tolerance, 1e-6);
        assert_eq!(config.max_iterations, 12);
        assert_eq!(config.fd_epsilon, 1e-6);
    }

    #[test]
    fn test_config_validation() {
        assert!(TransportConfig::new().with_tolerance(0.0).validate().is_err());
        assert!(TransportConfig::new().with_max_iterations(0).validate().is_err());
        assert!(TransportConfig::new().with_fd_epsilon(-1.0).validate().is_err());
    }

    #[test]
    fn test_method_from_legacy_selector() {
        assert_eq!(SolveMethod::try_from(1), Ok(SolveMethod::Bracketing));
        assert_eq!(SolveMethod::try_from(2), Ok(SolveMethod::Splitting));
        assert_eq!(SolveMethod::try_from(3), Err(SolverError::UnknownMethod(3)));
    }

    #[test]
    fn test_solver_error_display() {
        let err = SolverError::UnsupportedPhaseCount(3);
        assert_eq!(err.to_string(), "property object must have 2 phases, found 3");

        let err = SolverError::DimensionMismatch { what: "porosity", expected: 4, found: 3 };
        assert_eq!(err.to_string(), "porosity has length 3, expected 4");

        let err: SolverError = RootError::MaxIterationsExceeded { iterations: 5, x: 0.5 }.into();
        assert!(matches!(err, SolverError::Root(_)));
    }
}
