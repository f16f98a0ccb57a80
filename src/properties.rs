//! Fluid and polymer property models.
//!
//! # Collaborators
//!
//! - [`FluidProperties`]: the relative-permeability capability. Maps a water
//!   saturation to phase relative permeabilities (and their saturation
//!   derivatives), and exposes phase viscosities and admissible saturation range.
//! - [`PolymerProperties`]: immutable polymer model (viscosity multiplier and
//!   adsorption isotherm as functions of concentration, mixing parameter,
//!   dead pore space, rock density).
//!
//! [`CoreyFluid`] is a ready-made two-phase implementation with power-law
//! relative permeabilities.

use crate::solvers::{SolverError, SolverResult};

/// Relative permeabilities at a given water saturation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelPerm {
    /// `[k_rw, k_ro]`
    pub kr: [f64; 2],
    /// `[dk_rw/ds, dk_ro/ds]`, derivatives with respect to water saturation
    pub dkr_ds: [f64; 2],
}

/// Relative permeability and viscosity collaborator.
///
/// Phase 0 is water, phase 1 is oil. Saturation arguments are always water
/// saturations; implementations evaluate the oil curve at `1 - s`.
pub trait FluidProperties {
    /// Number of phases described. The transport solver requires exactly two.
    fn num_phases(&self) -> usize;

    /// Phase viscosities `[mu_w, mu_o]`.
    fn viscosity(&self) -> [f64; 2];

    /// Relative permeabilities `[k_rw, k_ro]` at water saturation `s` in `cell`.
    fn relperm(&self, s: f64, cell: usize) -> [f64; 2];

    /// Relative permeabilities and their water-saturation derivatives.
    fn relperm_with_der(&self, s: f64, cell: usize) -> RelPerm;

    /// Admissible water saturation range `(smin, smax)` in `cell`.
    fn sat_range(&self, cell: usize) -> (f64, f64);
}

/// Two-phase fluid with Corey-type relative permeabilities.
///
/// ```text
/// k_rw = k_rw_max * ((s - s_wc) / (1 - s_wc - s_or))^n_w
/// k_ro = k_ro_max * ((1 - s - s_or) / (1 - s_wc - s_or))^n_o
/// ```
///
/// The normalised saturation is clamped to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreyFluid {
    /// Water and oil viscosities (Pa s)
    pub viscosity: [f64; 2],
    /// Connate water saturation
    pub s_wc: f64,
    /// Residual oil saturation
    pub s_or: f64,
    /// Corey exponents `[n_w, n_o]`
    pub exponents: [f64; 2],
    /// End-point relative permeabilities `[k_rw_max, k_ro_max]`
    pub endpoints: [f64; 2],
}

impl CoreyFluid {
    /// Creates a fluid with quadratic curves, unit end points and no residual saturations.
    pub fn new(mu_w: f64, mu_o: f64) -> Self {
        CoreyFluid {
            viscosity: [mu_w, mu_o],
            s_wc: 0.0,
            s_or: 0.0,
            exponents: [2.0, 2.0],
            endpoints: [1.0, 1.0],
        }
    }

    /// Sets connate water and residual oil saturations.
    pub fn with_residuals(mut self, s_wc: f64, s_or: f64) -> Self {
        self.s_wc = s_wc;
        self.s_or = s_or;
        self
    }

    /// Sets the Corey exponents.
    pub fn with_exponents(mut self, n_w: f64, n_o: f64) -> Self {
        self.exponents = [n_w, n_o];
        self
    }

    /// Sets the end-point relative permeabilities.
    pub fn with_endpoints(mut self, k_rw_max: f64, k_ro_max: f64) -> Self {
        self.endpoints = [k_rw_max, k_ro_max];
        self
    }

    fn mobile_span(&self) -> f64 {
        1.0 - self.s_wc - self.s_or
    }

    // Power law on a clamped normalised saturation, with derivative w.r.t. the
    // unnormalised argument.
    fn corey(&self, normalised: f64, exponent: f64, endpoint: f64) -> (f64, f64) {
        if normalised <= 0.0 {
            return (0.0, 0.0);
        }
        if normalised >= 1.0 {
            return (endpoint, 0.0);
        }
        let value = endpoint * normalised.powf(exponent);
        let der = endpoint * exponent * normalised.powf(exponent - 1.0) / self.mobile_span();
        (value, der)
    }
}

impl FluidProperties for CoreyFluid {
    fn num_phases(&self) -> usize {
        2
    }

    fn viscosity(&self) -> [f64; 2] {
        self.viscosity
    }

    fn relperm(&self, s: f64, cell: usize) -> [f64; 2] {
        self.relperm_with_der(s, cell).kr
    }

    fn relperm_with_der(&self, s: f64, _cell: usize) -> RelPerm {
        let span = self.mobile_span();
        let (krw, dkrw) = self.corey((s - self.s_wc) / span, self.exponents[0], self.endpoints[0]);
        let (kro, dkro) =
            self.corey((1.0 - s - self.s_or) / span, self.exponents[1], self.endpoints[1]);
        RelPerm { kr: [krw, kro], dkr_ds: [dkrw, -dkro] }
    }

    fn sat_range(&self, _cell: usize) -> (f64, f64) {
        (self.s_wc, 1.0 - self.s_or)
    }
}

/// Piecewise linear table `y(x)` with constant extrapolation.
///
/// Abscissas must be strictly increasing. Outside the tabulated range the end
/// values are returned and the derivative is zero.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearTable {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl LinearTable {
    /// Piecewise linear table through `(x, y)`; `x` must be strictly increasing.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> SolverResult<Self> {
        if x.is_empty() || x.len() != y.len() {
            return Err(SolverError::DimensionMismatch {
                what: "table ordinates",
                expected: x.len(),
                found: y.len(),
            });
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SolverError::InvalidParameter(
                "table abscissas must be strictly increasing".to_string(),
            ));
        }
        Ok(LinearTable { x, y })
    }

    /// A table that is constant everywhere.
    pub fn constant(value: f64) -> Self {
        LinearTable { x: vec![0.0], y: vec![value] }
    }

    /// Interpolated value, constant beyond the end points.
    pub fn eval(&self, x: f64) -> f64 {
        self.eval_with_der(x).0
    }

    /// Value and slope at `x`. On a knot the slope of the segment to the right is used.
    pub fn eval_with_der(&self, x: f64) -> (f64, f64) {
        let n = self.x.len();
        if x < self.x[0] {
            return (self.y[0], 0.0);
        }
        if x >= self.x[n - 1] {
            return (self.y[n - 1], 0.0);
        }
        // partition_point returns the first knot strictly greater than x
        let upper = self.x.partition_point(|&xi| xi <= x);
        let lower = upper - 1;
        let slope = (self.y[upper] - self.y[lower]) / (self.x[upper] - self.x[lower]);
        (self.y[lower] + slope * (x - self.x[lower]), slope)
    }
}

/// Polymer model parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PolymerProperties {
    /// Maximum polymer concentration (normalisation of the mixing rule)
    pub c_max_limit: f64,
    /// Todd-Longstaff mixing parameter in `[0, 1]`
    pub omega: f64,
    /// Dead pore space fraction
    pub dps: f64,
    /// Rock density
    pub rhor: f64,
    /// Viscosity multiplier as a function of concentration
    pub visc_mult: LinearTable,
    /// Adsorbed polymer per unit rock mass as a function of concentration
    pub adsorption: LinearTable,
}

impl PolymerProperties {
    /// Validates and stores the polymer parameters.
    pub fn new(
        c_max_limit: f64,
        omega: f64,
        dps: f64,
        rhor: f64,
        visc_mult: LinearTable,
        adsorption: LinearTable,
    ) -> SolverResult<Self> {
        if c_max_limit.is_nan() || c_max_limit <= 0.0 {
            return Err(SolverError::InvalidParameter(format!(
                "c_max_limit must be positive, got {}",
                c_max_limit
            )));
        }
        if !(0.0..=1.0).contains(&omega) {
            return Err(SolverError::InvalidParameter(format!(
                "mixing parameter omega must lie in [0, 1], got {}",
                omega
            )));
        }
        Ok(PolymerProperties { c_max_limit, omega, dps, rhor, visc_mult, adsorption })
    }

    /// Water viscosity multiplier at concentration `c`.
    pub fn visc_mult(&self, c: f64) -> f64 {
        self.visc_mult.eval(c)
    }

    /// Viscosity multiplier and its derivative.
    pub fn visc_mult_with_der(&self, c: f64) -> (f64, f64) {
        self.visc_mult.eval_with_der(c)
    }

    /// Adsorbed polymer per unit rock mass at concentration `c`.
    pub fn adsorption(&self, c: f64) -> f64 {
        self.adsorption.eval(c)
    }

    /// Adsorption and its derivative.
    pub fn adsorption_with_der(&self, c: f64) -> (f64, f64) {
        self.adsorption.eval_with_der(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_table_interpolation() {
        let table = LinearTable::new(vec![0.0, 1.0, 3.0], vec![1.0, 3.0, 4.0]).unwrap();
        assert_relative_eq!(table.eval(0.5), 2.0);
        assert_relative_eq!(table.eval(2.0), 3.5);
        assert_eq!(table.eval_with_der(2.0).1, 0.5);
    }

    #[test]
    fn test_linear_table_extrapolation_is_flat() {
        let table = LinearTable::new(vec![0.0, 1.0], vec![1.0, 3.0]).unwrap();
        assert_eq!(table.eval_with_der(-1.0), (1.0, 0.0));
        assert_eq!(table.eval_with_der(5.0), (3.0, 0.0));
    }

    #[test]
    fn test_linear_table_rejects_unsorted() {
        let result = LinearTable::new(vec![0.0, 0.0], vec![1.0, 2.0]);
        assert!(matches!(result, Err(SolverError::InvalidParameter(_))));
        let result = LinearTable::new(vec![0.0, 1.0], vec![1.0]);
        assert!(matches!(result, Err(SolverError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_corey_end_points() {
        let fluid = CoreyFluid::new(1e-3, 5e-3).with_residuals(0.2, 0.2);
        assert_eq!(fluid.sat_range(0), (0.2, 0.8));
        assert_eq!(fluid.relperm(0.2, 0), [0.0, 1.0]);
        assert_eq!(fluid.relperm(0.8, 0), [1.0, 0.0]);
    }

    #[test]
    fn test_corey_derivative_matches_difference() {
        let fluid = CoreyFluid::new(1e-3, 5e-3).with_residuals(0.1, 0.15).with_exponents(2.5, 1.7);
        let h = 1e-6;
        for &s in &[0.2, 0.45, 0.7] {
            let rp = fluid.relperm_with_der(s, 0);
            let plus = fluid.relperm(s + h, 0);
            let minus = fluid.relperm(s - h, 0);
            for phase in 0..2 {
                let fd = (plus[phase] - minus[phase]) / (2.0 * h);
                assert_relative_eq!(rp.dkr_ds[phase], fd, max_relative = 1e-6);
            }
        }
    }

    #[test]
    fn test_polymer_properties_validation() {
        let vm = LinearTable::constant(1.0);
        let ads = LinearTable::constant(0.0);
        assert!(PolymerProperties::new(0.0, 0.5, 0.0, 1.0, vm.clone(), ads.clone()).is_err());
        assert!(PolymerProperties::new(1.0, 1.5, 0.0, 1.0, vm.clone(), ads.clone()).is_err());
        assert!(PolymerProperties::new(1.0, 0.5, 0.0, 1.0, vm, ads).is_ok());
    }
}
