//! Single-cell implicit Euler residuals.
//!
//! For a cell with previous state `(s0, c0, cmax0)` and flux budget
//! `(influx, influx_polymer, outflux, dtpv, porosity)`:
//!
//! ```text
//! r_s(s, c) = s - s0 + dtpv * (outflux * f(s, c) + influx)
//! r_c(s, c) = (s - dps) * c - (s0 - dps) * c0
//!           + rhor * (1 - phi) / phi * (ads(max(c, cmax0)) - ads(max(c0, cmax0)))
//!           + dtpv * (outflux * f(s, c) * mc(c) + influx_polymer)
//! ```
//!
//! Influxes are negative and outfluxes positive.

use nalgebra::Matrix2;

use crate::closures::Closures;
use crate::grid::UnstructuredGrid;
use crate::properties::FluidProperties;
use crate::root_finder::{RegulaFalsi, Root, RootError};

#[cfg(feature = "autodiff")]
use num_dual::*;

/// Selects one of the two balance equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equation {
    /// Water saturation balance `r_s`
    Saturation,
    /// Polymer concentration balance `r_c`
    Concentration,
}

impl Equation {
    /// Residual row of this equation.
    pub fn row(self) -> usize {
        match self {
            Equation::Saturation => 0,
            Equation::Concentration => 1,
        }
    }

    /// The other equation.
    pub fn other(self) -> Equation {
        match self {
            Equation::Saturation => Equation::Concentration,
            Equation::Concentration => Equation::Saturation,
        }
    }
}

/// How the 2x2 Jacobian of the coupled residual is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradientMethod {
    /// Forward differences, one extra residual evaluation per column
    #[default]
    FiniteDifference,
    /// Closed-form derivatives of the closures
    Analytic,
    /// Forward-mode dual numbers
    #[cfg(feature = "autodiff")]
    AutoDiff,
}

/// Largest absolute component of a two-equation residual.
pub fn inf_norm(residual: [f64; 2]) -> f64 {
    residual[0].abs().max(residual[1].abs())
}

/// Frozen data needed to build the flux budget of any cell.
#[derive(Debug, Clone, Copy)]
pub struct UpwindData<'a> {
    pub grid: &'a UnstructuredGrid,
    pub darcyflux: &'a [f64],
    pub source: &'a [f64],
    pub fractional_flow: &'a [f64],
    pub mc: &'a [f64],
    /// Retention factor of the injected fluid, `mc(inflow_c)`
    pub inflow_mc: f64,
}

/// Signed fluxes seen by one cell during one solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluxBudget {
    /// Water influx, `sum min(v, 0) * f_upstream` plus injected water
    pub influx: f64,
    /// Polymer influx, `sum min(v, 0) * f_upstream * mc_upstream` plus injected polymer
    pub influx_polymer: f64,
    /// Total outflux, `sum max(v, 0)` plus produced fluid
    pub outflux: f64,
    /// `dt / pore_volume`
    pub dtpv: f64,
    pub porosity: f64,
}

impl FluxBudget {
    /// Accumulates the budget of `cell` from its faces and source term.
    ///
    /// Boundary faces without a neighbour do not contribute; exterior inflow and
    /// outflow enter only through `source`.
    pub fn build(upwind: &UpwindData<'_>, cell: usize, dtpv: f64, porosity: f64) -> Self {
        let dflux = -upwind.source[cell];
        let (mut influx, mut influx_polymer, mut outflux) = if dflux < 0.0 {
            (dflux, dflux * upwind.inflow_mc, 0.0)
        } else {
            (0.0, 0.0, dflux)
        };

        for face in upwind.grid.cell_fluxes(cell, upwind.darcyflux) {
            let Some(other) = face.neighbour else { continue };
            if face.outflux < 0.0 {
                let water = face.outflux * upwind.fractional_flow[other];
                influx += water;
                influx_polymer += water * upwind.mc[other];
            } else {
                outflux += face.outflux;
            }
        }

        FluxBudget { influx, influx_polymer, outflux, dtpv, porosity }
    }
}

/// State of a cell at the start of its solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellStart {
    pub s0: f64,
    pub c0: f64,
    pub cmax0: f64,
}

/// Residual evaluator for one cell.
pub struct CellResidual<'a, F: FluidProperties + ?Sized> {
    closures: Closures<'a, F>,
    cell: usize,
    start: CellStart,
    budget: FluxBudget,
    sat_range: (f64, f64),
}

impl<'a, F: FluidProperties + ?Sized> CellResidual<'a, F> {
    /// Residual of `cell` for the given start state and flux budget.
    pub fn new(closures: Closures<'a, F>, cell: usize, start: CellStart, budget: FluxBudget) -> Self {
        let sat_range = closures.fluid().sat_range(cell);
        CellResidual { closures, cell, start, budget, sat_range }
    }

    /// Cell index.
    pub fn cell(&self) -> usize {
        self.cell
    }

    /// State at the start of the step.
    pub fn start(&self) -> CellStart {
        self.start
    }

    /// Flux budget of the cell.
    pub fn budget(&self) -> &FluxBudget {
        &self.budget
    }

    /// Closures used to evaluate the residuals.
    pub fn closures(&self) -> Closures<'a, F> {
        self.closures
    }

    /// Admissible saturation range `(smin, smax)` of the cell.
    pub fn sat_range(&self) -> (f64, f64) {
        self.sat_range
    }

    fn adsorption_factor(&self) -> f64 {
        let poly = self.closures.polymer();
        poly.rhor * (1.0 - self.budget.porosity) / self.budget.porosity
    }

    /// Saturation residual at `s` with `c` held fixed.
    pub fn residual_s(&self, s: f64, c: f64) -> f64 {
        let b = &self.budget;
        s - self.start.s0 + b.dtpv * (b.outflux * self.closures.frac_flow(s, c, self.cell) + b.influx)
    }

    /// Concentration residual at the point `(s, c)`.
    pub fn residual_c(&self, s: f64, c: f64) -> f64 {
        let ff = self.closures.frac_flow(s, c, self.cell);
        self.residual_c_with(s, c, ff, self.closures.mc(c))
    }

    fn residual_c_with(&self, s: f64, c: f64, ff: f64, mc: f64) -> f64 {
        let poly = self.closures.polymer();
        let CellStart { s0, c0, cmax0 } = self.start;
        let b = &self.budget;
        let ads = poly.adsorption(c.max(cmax0));
        let ads0 = poly.adsorption(c0.max(cmax0));
        (s - poly.dps) * c - (s0 - poly.dps) * c0
            + self.adsorption_factor() * (ads - ads0)
            + b.dtpv * (b.outflux * ff * mc + b.influx_polymer)
    }

    /// Both residuals at `x = [s, c]`.
    pub fn residual(&self, x: [f64; 2]) -> [f64; 2] {
        let [s, c] = x;
        let ff = self.closures.frac_flow(s, c, self.cell);
        let b = &self.budget;
        let r_s = s - self.start.s0 + b.dtpv * (b.outflux * ff + b.influx);
        [r_s, self.residual_c_with(s, c, ff, self.closures.mc(c))]
    }

    /// Solves `r_s(s, c) = 0` for `s` over the admissible saturation range.
    pub fn solve_saturation(&self, c: f64, solver: &RegulaFalsi) -> Result<Root, RootError> {
        let (smin, smax) = self.sat_range;
        solver.solve(|s| self.residual_s(s, c), smin, smax)
    }

    /// Concentration residual along the curve `r_s = 0`.
    ///
    /// Returns the residual together with the saturation that satisfies the
    /// saturation equation at `c`.
    pub fn residual_c_on_saturation_curve(
        &self,
        c: f64,
        solver: &RegulaFalsi,
    ) -> Result<(f64, f64), RootError> {
        let s = self.solve_saturation(c, solver)?.x;
        Ok((self.residual_c(s, c), s))
    }

    /// Residual and Jacobian `[[dr_s/ds, dr_s/dc], [dr_c/ds, dr_c/dc]]` at `x`.
    pub fn jacobian(&self, x: [f64; 2], method: GradientMethod, fd_epsilon: f64) -> ([f64; 2], Matrix2<f64>) {
        match method {
            GradientMethod::FiniteDifference => self.jacobian_fd(x, fd_epsilon),
            GradientMethod::Analytic => self.jacobian_analytic(x),
            #[cfg(feature = "autodiff")]
            GradientMethod::AutoDiff => self.jacobian_dual(x),
        }
    }

    /// Residual and the gradient of one equation at `x`.
    pub fn gradient(
        &self,
        x: [f64; 2],
        equation: Equation,
        method: GradientMethod,
        fd_epsilon: f64,
    ) -> ([f64; 2], [f64; 2]) {
        let (res, jac) = self.jacobian(x, method, fd_epsilon);
        let row = equation.row();
        (res, [jac[(row, 0)], jac[(row, 1)]])
    }

    fn jacobian_fd(&self, x: [f64; 2], eps: f64) -> ([f64; 2], Matrix2<f64>) {
        let res = self.residual(x);
        let res_s = self.residual([x[0] + eps, x[1]]);
        let res_c = self.residual([x[0], x[1] + eps]);
        let jac = Matrix2::new(
            (res_s[0] - res[0]) / eps,
            (res_c[0] - res[0]) / eps,
            (res_s[1] - res[1]) / eps,
            (res_c[1] - res[1]) / eps,
        );
        (res, jac)
    }

    fn jacobian_analytic(&self, x: [f64; 2]) -> ([f64; 2], Matrix2<f64>) {
        let [s, c] = x;
        let poly = self.closures.polymer();
        let b = &self.budget;
        let (ff, [ff_ds, ff_dc]) = self.closures.frac_flow_with_der(s, c, self.cell);
        let (mc, mc_dc) = self.closures.mc_with_der(c);
        // Adsorption is irreversible below the historical maximum
        let ads_dc = if c < self.start.cmax0 { 0.0 } else { poly.adsorption_with_der(c).1 };

        let res = [
            s - self.start.s0 + b.dtpv * (b.outflux * ff + b.influx),
            self.residual_c_with(s, c, ff, mc),
        ];
        let jac = Matrix2::new(
            1.0 + b.dtpv * b.outflux * ff_ds,
            b.dtpv * b.outflux * ff_dc,
            c + b.dtpv * b.outflux * ff_ds * mc,
            s - poly.dps
                + self.adsorption_factor() * ads_dc
                + b.dtpv * b.outflux * (ff_dc * mc + ff * mc_dc),
        );
        (res, jac)
    }

    #[cfg(feature = "autodiff")]
    fn residual_dual(&self, x: &[Dual64]) -> Vec<Dual64> {
        use crate::autodiff::lift;

        let (s, c) = (x[0], x[1]);
        let poly = self.closures.polymer();
        let CellStart { s0, c0, cmax0 } = self.start;
        let b = &self.budget;
        let ff = self.closures.frac_flow_dual(s, c, self.cell);
        let mc = self.closures.mc_dual(c);
        let ads = if c.re < cmax0 {
            Dual64::from(poly.adsorption(cmax0))
        } else {
            let (value, slope) = poly.adsorption_with_der(c.re);
            lift(value, slope, c)
        };
        let ads0 = poly.adsorption(c0.max(cmax0));

        let dtpv = Dual64::from(b.dtpv);
        let outflux = Dual64::from(b.outflux);
        let dps = Dual64::from(poly.dps);
        let r_s = s - Dual64::from(s0) + dtpv * (outflux * ff + Dual64::from(b.influx));
        let r_c = (s - dps) * c - Dual64::from((s0 - poly.dps) * c0)
            + Dual64::from(self.adsorption_factor()) * (ads - Dual64::from(ads0))
            + dtpv * (outflux * ff * mc + Dual64::from(b.influx_polymer));
        vec![r_s, r_c]
    }

    #[cfg(feature = "autodiff")]
    fn jacobian_dual(&self, x: [f64; 2]) -> ([f64; 2], Matrix2<f64>) {
        use crate::autodiff::compute_jacobian;

        let jac = compute_jacobian(|vars| self.residual_dual(vars), &x);
        let jac = Matrix2::new(jac.get(0, 0), jac.get(0, 1), jac.get(1, 0), jac.get(1, 1));
        (self.residual(x), jac)
    }
}
