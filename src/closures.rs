//! Constitutive closures: fractional flow and polymer retention factor.
//!
//! Effective water viscosity follows a Todd-Longstaff style mixing rule. With
//! `cbar = c / c_max_limit`, `mu_m = visc_mult(c) * mu_w` and
//! `mu_p = visc_mult(c_max_limit) * mu_w`:
//!
//! ```text
//! mu_w_e        = mu_m^omega * mu_w^(1 - omega)
//! mu_p_eff      = mu_m^omega * mu_p^(1 - omega)
//! 1 / mu_w_eff  = (1 - cbar) / mu_w_e + cbar / mu_p_eff
//! f_w(s, c)     = lambda_w / (lambda_w + lambda_o),   lambda_w = k_rw(s) / mu_w_eff
//! mc(c)         = c * mu_w_eff / mu_p_eff
//! ```
//!
//! All functions are pure. The `*_with_der` variants use the analytic chain
//! rule through the mixing rule and the relative permeability derivatives.

use crate::properties::{FluidProperties, PolymerProperties};

#[cfg(feature = "autodiff")]
use num_dual::*;

/// Mixed viscosities at one concentration, together with their c-derivatives.
#[derive(Debug, Clone, Copy)]
struct MixedViscosity {
    inv_mu_w_eff: f64,
    mu_p_eff: f64,
    d_inv_mu_w_eff: f64,
    d_mu_p_eff: f64,
}

/// Fractional flow and retention closures for one fluid/polymer pair.
pub struct Closures<'a, F: FluidProperties + ?Sized> {
    fluid: &'a F,
    polymer: &'a PolymerProperties,
}

impl<'a, F: FluidProperties + ?Sized> Clone for Closures<'a, F> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, F: FluidProperties + ?Sized> Copy for Closures<'a, F> {}

impl<'a, F: FluidProperties + ?Sized> Closures<'a, F> {
    /// Closures over a fluid and a polymer description.
    pub fn new(fluid: &'a F, polymer: &'a PolymerProperties) -> Self {
        Closures { fluid, polymer }
    }

    /// Fluid properties.
    pub fn fluid(&self) -> &'a F {
        self.fluid
    }

    /// Polymer properties.
    pub fn polymer(&self) -> &'a PolymerProperties {
        self.polymer
    }

    fn mixed_viscosity(&self, c: f64) -> MixedViscosity {
        let poly = self.polymer;
        let cbar = c / poly.c_max_limit;
        let mu_w = self.fluid.viscosity()[0];
        let (mult, d_mult) = poly.visc_mult_with_der(c);
        let mu_m = mult * mu_w;
        let d_mu_m = d_mult * mu_w;
        let mu_p = poly.visc_mult(poly.c_max_limit) * mu_w;
        let omega = poly.omega;

        let mu_m_omega = mu_m.powf(omega);
        let d_mu_m_omega = omega * d_mu_m * mu_m.powf(omega - 1.0);
        let mu_w_factor = mu_w.powf(1.0 - omega);
        let mu_p_factor = mu_p.powf(1.0 - omega);

        let mu_w_e = mu_m_omega * mu_w_factor;
        let d_mu_w_e = d_mu_m_omega * mu_w_factor;
        let mu_p_eff = mu_m_omega * mu_p_factor;
        let d_mu_p_eff = d_mu_m_omega * mu_p_factor;

        let inv_mu_w_eff = (1.0 - cbar) / mu_w_e + cbar / mu_p_eff;
        let d_inv_mu_w_eff = -d_mu_w_e / (mu_w_e * mu_w_e) * (1.0 - cbar)
            - d_mu_p_eff / (mu_p_eff * mu_p_eff) * cbar
            + (1.0 / mu_p_eff - 1.0 / mu_w_e) / poly.c_max_limit;

        MixedViscosity { inv_mu_w_eff, mu_p_eff, d_inv_mu_w_eff, d_mu_p_eff }
    }

    /// Water fractional flow at saturation `s` and concentration `c`.
    pub fn frac_flow(&self, s: f64, c: f64, cell: usize) -> f64 {
        let visc = self.mixed_viscosity(c);
        let kr = self.fluid.relperm(s, cell);
        let mob_w = kr[0] * visc.inv_mu_w_eff;
        let mob_o = kr[1] / self.fluid.viscosity()[1];
        mob_w / (mob_w + mob_o)
    }

    /// Fractional flow and `[df/ds, df/dc]`.
    pub fn frac_flow_with_der(&self, s: f64, c: f64, cell: usize) -> (f64, [f64; 2]) {
        let visc = self.mixed_viscosity(c);
        let rp = self.fluid.relperm_with_der(s, cell);
        let mu_o = self.fluid.viscosity()[1];

        let mob_w = rp.kr[0] * visc.inv_mu_w_eff;
        let mob_o = rp.kr[1] / mu_o;
        let dmob_w_ds = rp.dkr_ds[0] * visc.inv_mu_w_eff;
        let dmob_o_ds = rp.dkr_ds[1] / mu_o;
        let dmob_w_dc = rp.kr[0] * visc.d_inv_mu_w_eff;

        let total = mob_w + mob_o;
        let total_sq = total * total;
        let df_ds = (dmob_w_ds * mob_o - dmob_o_ds * mob_w) / total_sq;
        // Oil mobility does not depend on c
        let df_dc = dmob_w_dc * mob_o / total_sq;
        (mob_w / total, [df_ds, df_dc])
    }

    /// Polymer retention factor `mc(c)`.
    pub fn mc(&self, c: f64) -> f64 {
        let visc = self.mixed_viscosity(c);
        c / (visc.inv_mu_w_eff * visc.mu_p_eff)
    }

    /// Retention factor and its derivative with respect to `c`.
    pub fn mc_with_der(&self, c: f64) -> (f64, f64) {
        let visc = self.mixed_viscosity(c);
        let denom = visc.inv_mu_w_eff * visc.mu_p_eff;
        let d_denom = visc.d_inv_mu_w_eff * visc.mu_p_eff + visc.inv_mu_w_eff * visc.d_mu_p_eff;
        (c / denom, 1.0 / denom - c * d_denom / (denom * denom))
    }

    #[cfg(feature = "autodiff")]
    fn mixed_viscosity_dual(&self, c: Dual64) -> (Dual64, Dual64) {
        use crate::autodiff::lift;

        let poly = self.polymer;
        let mu_w = Dual64::from(self.fluid.viscosity()[0]);
        let (mult, d_mult) = poly.visc_mult_with_der(c.re);
        let mu_m = lift(mult, d_mult, c) * mu_w;
        let mu_p = Dual64::from(poly.visc_mult(poly.c_max_limit)) * mu_w;
        let omega = poly.omega;

        let mu_m_omega = mu_m.powf(omega);
        let mu_w_e = mu_m_omega * mu_w.powf(1.0 - omega);
        let mu_p_eff = mu_m_omega * mu_p.powf(1.0 - omega);

        let cbar = c / Dual64::from(poly.c_max_limit);
        let inv_mu_w_eff = (Dual64::from(1.0) - cbar) / mu_w_e + cbar / mu_p_eff;
        (inv_mu_w_eff, mu_p_eff)
    }

    /// Phase mobilities `[lambda_w, lambda_o]` evaluated on dual numbers.
    #[cfg(feature = "autodiff")]
    pub fn mobilities_dual(&self, s: Dual64, c: Dual64, cell: usize) -> [Dual64; 2] {
        use crate::autodiff::lift;

        let (inv_mu_w_eff, _) = self.mixed_viscosity_dual(c);
        let rp = self.fluid.relperm_with_der(s.re, cell);
        let krw = lift(rp.kr[0], rp.dkr_ds[0], s);
        let kro = lift(rp.kr[1], rp.dkr_ds[1], s);
        [krw * inv_mu_w_eff, kro / Dual64::from(self.fluid.viscosity()[1])]
    }

    /// Fractional flow evaluated on dual numbers.
    #[cfg(feature = "autodiff")]
    pub fn frac_flow_dual(&self, s: Dual64, c: Dual64, cell: usize) -> Dual64 {
        let [mob_w, mob_o] = self.mobilities_dual(s, c, cell);
        mob_w / (mob_w + mob_o)
    }

    /// Retention factor evaluated on dual numbers.
    #[cfg(feature = "autodiff")]
    pub fn mc_dual(&self, c: Dual64) -> Dual64 {
        let (inv_mu_w_eff, mu_p_eff) = self.mixed_viscosity_dual(c);
        c / (inv_mu_w_eff * mu_p_eff)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::properties::{CoreyFluid, LinearTable};
    use approx::assert_relative_eq;

    pub(crate) fn test_fluid() -> CoreyFluid {
        CoreyFluid::new(1.0e-3, 4.0e-3).with_residuals(0.1, 0.1).with_exponents(2.0, 2.0)
    }

    pub(crate) fn test_polymer() -> PolymerProperties {
        let visc_mult =
            LinearTable::new(vec![0.0, 0.5, 1.0, 2.0], vec![1.0, 4.0, 9.0, 20.0]).unwrap();
        let adsorption = LinearTable::new(
            vec![0.0, 0.5, 1.0, 2.0],
            vec![0.0, 1.5e-5, 2.5e-5, 3.0e-5],
        )
        .unwrap();
        PolymerProperties::new(2.0, 0.7, 0.05, 2000.0, visc_mult, adsorption).unwrap()
    }

    // Points chosen away from table knots and saturation end points.
    pub(crate) fn sample_points() -> Vec<(f64, f64)> {
        let mut points = Vec::new();
        for i in 0..7 {
            for j in 0..6 {
                let s = 0.13 + 0.11 * i as f64 + 0.003 * j as f64;
                let c = 0.07 + 0.29 * j as f64 + 0.005 * i as f64;
                points.push((s, c));
            }
        }
        points
    }

    #[test]
    fn test_frac_flow_in_unit_interval() {
        let fluid = test_fluid();
        let polymer = test_polymer();
        let closures = Closures::new(&fluid, &polymer);

        for (s, c) in sample_points() {
            let f = closures.frac_flow(s, c, 0);
            assert!((0.0..=1.0).contains(&f), "f({}, {}) = {}", s, c, f);
        }
        assert_eq!(closures.frac_flow(0.1, 0.5, 0), 0.0);
        assert_eq!(closures.frac_flow(0.9, 0.5, 0), 1.0);
    }

    #[test]
    fn test_polymer_reduces_fractional_flow() {
        let fluid = test_fluid();
        let polymer = test_polymer();
        let closures = Closures::new(&fluid, &polymer);

        let clean = closures.frac_flow(0.5, 0.0, 0);
        let viscous = closures.frac_flow(0.5, 1.5, 0);
        assert!(viscous < clean);
    }

    #[test]
    fn test_frac_flow_derivative_matches_central_difference() {
        let fluid = test_fluid();
        let polymer = test_polymer();
        let closures = Closures::new(&fluid, &polymer);
        let h = 1e-7;

        for (s, c) in sample_points() {
            let (f, der) = closures.frac_flow_with_der(s, c, 0);
            assert_eq!(f, closures.frac_flow(s, c, 0));

            let fd_s = (closures.frac_flow(s + h, c, 0) - closures.frac_flow(s - h, c, 0)) / (2.0 * h);
            let fd_c = (closures.frac_flow(s, c + h, 0) - closures.frac_flow(s, c - h, 0)) / (2.0 * h);
            assert_relative_eq!(der[0], fd_s, max_relative = 1e-6, epsilon = 1e-9);
            assert_relative_eq!(der[1], fd_c, max_relative = 1e-6, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_mc_derivative_matches_central_difference() {
        let fluid = test_fluid();
        let polymer = test_polymer();
        let closures = Closures::new(&fluid, &polymer);
        let h = 1e-7;

        for (_, c) in sample_points() {
            let (mc, dmc) = closures.mc_with_der(c);
            assert_relative_eq!(mc, closures.mc(c), max_relative = 1e-14);
            let fd = (closures.mc(c + h) - closures.mc(c - h)) / (2.0 * h);
            assert_relative_eq!(dmc, fd, max_relative = 1e-6, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_mc_vanishes_without_polymer() {
        let fluid = test_fluid();
        let polymer = test_polymer();
        let closures = Closures::new(&fluid, &polymer);
        assert_eq!(closures.mc(0.0), 0.0);
    }

    #[test]
    fn test_closures_are_reproducible() {
        let fluid = test_fluid();
        let polymer = test_polymer();
        let closures = Closures::new(&fluid, &polymer);
        for (s, c) in sample_points() {
            assert_eq!(closures.frac_flow(s, c, 0).to_bits(), closures.frac_flow(s, c, 0).to_bits());
            assert_eq!(closures.mc(c).to_bits(), closures.mc(c).to_bits());
        }
    }

    #[test]
    #[cfg(feature = "autodiff")]
    fn test_dual_closures_match_analytic() {
        let fluid = test_fluid();
        let polymer = test_polymer();
        let closures = Closures::new(&fluid, &polymer);

        for (s, c) in sample_points() {
            let (f, der) = closures.frac_flow_with_der(s, c, 0);
            let by_s = closures.frac_flow_dual(Dual64::new(s, 1.0), Dual64::from(c), 0);
            let by_c = closures.frac_flow_dual(Dual64::from(s), Dual64::new(c, 1.0), 0);
            assert_relative_eq!(by_s.re, f, max_relative = 1e-12);
            assert_relative_eq!(by_s.eps, der[0], max_relative = 1e-9, epsilon = 1e-12);
            assert_relative_eq!(by_c.eps, der[1], max_relative = 1e-9, epsilon = 1e-12);

            let (_, dmc) = closures.mc_with_der(c);
            let mc = closures.mc_dual(Dual64::new(c, 1.0));
            assert_relative_eq!(mc.eps, dmc, max_relative = 1e-9, epsilon = 1e-12);
        }
    }
}
