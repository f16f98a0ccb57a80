//! Fully implicit Newton step for pressure, saturation, concentration and wells.
//!
//! This is the coupled counterpart of the reordered transport solver: every
//! cell and every well is solved simultaneously. The residual is written over
//! [`Dual64`] so that the Jacobian comes from [`compute_jacobian`], and the
//! Newton loop carries the usual safeguards for reservoir problems:
//!
//! - **Relaxation**: when the residual history oscillates, updates are damped
//!   (`dx * omega`) or over-relaxed against the previous update
//!   (`dx * omega + (1 - omega) * dx_old`).
//! - **Chopping**: saturation updates are scaled so that no cell moves by more
//!   than `ds_max`; pressure updates are capped relative to the pressure.
//! - **Convergence**: a mass-balance criterion on the summed residual and a
//!   CNV criterion on the largest pore-volume-normalised residual, per
//!   component, plus an absolute tolerance on the well equations.
//!
//! Unknowns are laid out in blocks, `[p; s; c]` with one entry per cell, then
//! one bottom-hole pressure per well. Residual rows follow the same shape:
//! water, oil and polymer balance per cell, then one control equation per well.

use nalgebra::DVector;
use num_dual::Dual64;

use crate::autodiff::{compute_jacobian, lift};
use crate::closures::Closures;
use crate::grid::UnstructuredGrid;
use crate::properties::FluidProperties;
use crate::solvers::{SolverError, SolverResult};

/// Balance equations per cell: water, oil and polymer.
pub const NUM_COMPONENTS: usize = 3;

/// Largest absolute residual of each component block.
pub type ComponentNorms = [f64; NUM_COMPONENTS];

/// How Newton updates are relaxed once oscillation is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelaxType {
    /// `dx * omega`
    #[default]
    Dampen,
    /// `dx * omega + (1 - omega) * dx_old`
    Sor,
}

/// Newton parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverParameters {
    /// Pressure updates are capped at `dp_max_rel * |p|`
    pub dp_max_rel: f64,
    /// Largest saturation change per iteration
    pub ds_max: f64,
    /// Bottom-hole pressure updates are capped at `dr_max_rel * |bhp|`
    pub dr_max_rel: f64,
    pub relax_type: RelaxType,
    /// Lower bound for the relaxation factor
    pub relax_max: f64,
    /// Reduction of the relaxation factor per detected oscillation
    pub relax_increment: f64,
    /// Relative tolerance of the oscillation detector
    pub relax_rel_tol: f64,
    /// Convergence measures above this abort the step
    pub max_residual_allowed: f64,
    pub tolerance_mb: f64,
    pub tolerance_cnv: f64,
    pub tolerance_wells: f64,
    pub max_iter: usize,
}

impl Default for SolverParameters {
    fn default() -> Self {
        SolverParameters {
            dp_max_rel: 1.0e9,
            ds_max: 0.2,
            dr_max_rel: 1.0e9,
            relax_type: RelaxType::Dampen,
            relax_max: 0.5,
            relax_increment: 0.1,
            relax_rel_tol: 0.2,
            max_residual_allowed: 1.0e7,
            tolerance_mb: 1.0e-7,
            tolerance_cnv: 1.0e-3,
            tolerance_wells: 1.0 / 86400.0,
            max_iter: 15,
        }
    }
}

impl SolverParameters {
    /// Default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the relaxation type.
    pub fn with_relax_type(mut self, relax_type: RelaxType) -> Self {
        self.relax_type = relax_type;
        self
    }

    /// Sets the Newton iteration cap.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Sets the largest saturation change per iteration.
    pub fn with_ds_max(mut self, ds_max: f64) -> Self {
        self.ds_max = ds_max;
        self
    }

    /// Sets the relative pressure update cap.
    pub fn with_dp_max_rel(mut self, dp_max_rel: f64) -> Self {
        self.dp_max_rel = dp_max_rel;
        self
    }

    /// Sets the mass-balance, CNV and well tolerances.
    pub fn with_tolerances(mut self, mb: f64, cnv: f64, wells: f64) -> Self {
        self.tolerance_mb = mb;
        self.tolerance_cnv = cnv;
        self.tolerance_wells = wells;
        self
    }

    /// Checks that tolerances and caps are positive and `relax_max` lies in `[0, 1]`.
    pub fn validate(&self) -> SolverResult<()> {
        let positive = [
            ("dp_max_rel", self.dp_max_rel),
            ("ds_max", self.ds_max),
            ("dr_max_rel", self.dr_max_rel),
            ("max_residual_allowed", self.max_residual_allowed),
            ("tolerance_mb", self.tolerance_mb),
            ("tolerance_cnv", self.tolerance_cnv),
            ("tolerance_wells", self.tolerance_wells),
        ];
        for (name, value) in positive {
            if value.is_nan() || value <= 0.0 {
                return Err(SolverError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.relax_max) {
            return Err(SolverError::InvalidParameter(format!(
                "relax_max must lie in [0, 1], got {}",
                self.relax_max
            )));
        }
        Ok(())
    }
}

/// Cell fields advanced by the fully implicit step.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservoirState {
    pub pressure: Vec<f64>,
    pub saturation: Vec<f64>,
    pub concentration: Vec<f64>,
    pub cmax: Vec<f64>,
}

impl ReservoirState {
    /// Uniform state with `cmax` equal to the concentration.
    pub fn uniform(num_cells: usize, pressure: f64, saturation: f64, concentration: f64) -> Self {
        ReservoirState {
            pressure: vec![pressure; num_cells],
            saturation: vec![saturation; num_cells],
            concentration: vec![concentration; num_cells],
            cmax: vec![concentration; num_cells],
        }
    }

    /// Number of cells.
    pub fn num_cells(&self) -> usize {
        self.pressure.len()
    }
}

/// Well unknowns.
#[derive(Debug, Clone, PartialEq)]
pub struct WellState {
    /// Bottom-hole pressure per well
    pub bhp: Vec<f64>,
}

/// One implicit time step over the whole model.
pub trait FullyImplicitStep {
    /// Advances the reservoir and well state by `dt` and returns the number of
    /// Newton iterations used. `polymer_inflow` is the concentration of the
    /// water injected in each cell.
    fn step(
        &mut self,
        dt: f64,
        reservoir: &mut ReservoirState,
        wells: &mut WellState,
        polymer_inflow: &[f64],
    ) -> SolverResult<usize>;
}

/// Fixed data of the step being solved.
#[derive(Debug, Clone, Copy)]
pub struct StepData<'s> {
    pub dt: f64,
    /// State at the start of the step
    pub previous: &'s ReservoirState,
    pub polymer_inflow: &'s [f64],
}

/// Residual of a coupled cell/well system.
pub trait CoupledSystem {
    fn num_cells(&self) -> usize;

    fn num_wells(&self) -> usize;

    fn pore_volume(&self) -> &[f64];

    /// Residual rows `[water; oil; polymer; wells]` at unknowns `[p; s; c; bhp]`.
    ///
    /// Balance rows are rates: accumulation over `dt` plus net outflow.
    fn residual(&self, step: &StepData<'_>, x: &[Dual64]) -> Vec<Dual64>;
}

/// Result of [`detect_oscillations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Oscillation {
    pub oscillate: bool,
    pub stagnate: bool,
}

/// Inspects the last three entries of the residual history.
///
/// A component oscillates when its residual is close to the one two
/// iterations back but far from the previous one. The system oscillates when
/// more than one component does. It stagnates when no component changed by
/// more than 0.1% between the two older iterates.
pub fn detect_oscillations(history: &[ComponentNorms], it: usize, rel_tol: f64) -> Oscillation {
    if it < 2 || it >= history.len() {
        return Oscillation::default();
    }
    let f0 = &history[it];
    let f1 = &history[it - 1];
    let f2 = &history[it - 2];

    let mut oscillating = 0;
    let mut stagnate = true;
    for p in 0..NUM_COMPONENTS {
        let d1 = ((f0[p] - f2[p]) / f0[p]).abs();
        let d2 = ((f0[p] - f1[p]) / f0[p]).abs();
        if d1 < rel_tol && rel_tol < d2 {
            oscillating += 1;
        }
        stagnate = stagnate && ((f1[p] - f2[p]) / f2[p]).abs() <= 1.0e-3;
    }
    Oscillation { oscillate: oscillating > 1, stagnate }
}

/// Relaxes `dx` in place and stores the unrelaxed update in `dx_old`.
pub fn stabilize(dx: &mut [f64], dx_old: &mut [f64], omega: f64, relax_type: RelaxType) {
    for (d, old) in dx.iter_mut().zip(dx_old.iter_mut()) {
        let raw = *d;
        if omega != 1.0 {
            *d = match relax_type {
                RelaxType::Dampen => raw * omega,
                RelaxType::Sor => raw * omega + (1.0 - omega) * *old,
            };
        }
        *old = raw;
    }
}

/// Scales all saturation updates so that the largest has magnitude `ds_max`.
pub fn chop_saturation(ds: &mut [f64], ds_max: f64) {
    let largest = ds.iter().fold(0.0_f64, |acc, d| acc.max(d.abs()));
    if largest > ds_max {
        let factor = ds_max / largest;
        ds.iter_mut().for_each(|d| *d *= factor);
    }
}

/// Caps each update at `max_rel * |value|`, keeping its sign.
pub fn chop_relative(dx: &mut [f64], values: &[f64], max_rel: f64) {
    for (d, v) in dx.iter_mut().zip(values) {
        let cap = max_rel * v.abs();
        *d = d.signum() * d.abs().min(cap);
    }
}

/// Convergence measures of one Newton iterate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceReport {
    /// `dt * |sum R| / sum pv` per component
    pub mass_balance: ComponentNorms,
    /// `dt * max |R / pv|` per component
    pub cnv: ComponentNorms,
    /// Largest absolute well residual
    pub well: f64,
    pub converged: bool,
}

/// Evaluates the mass-balance, CNV and well criteria.
///
/// Fails when a measure is NaN or above `max_residual_allowed`.
pub fn check_convergence(
    residual: &[f64],
    pore_volume: &[f64],
    dt: f64,
    params: &SolverParameters,
) -> SolverResult<ConvergenceReport> {
    let n = pore_volume.len();
    let pv_sum: f64 = pore_volume.iter().sum();

    let mut mass_balance = [0.0; NUM_COMPONENTS];
    let mut cnv = [0.0; NUM_COMPONENTS];
    for comp in 0..NUM_COMPONENTS {
        let block = &residual[comp * n..(comp + 1) * n];
        mass_balance[comp] = dt * block.iter().sum::<f64>().abs() / pv_sum;
        cnv[comp] = dt
            * block
                .iter()
                .zip(pore_volume)
                .fold(0.0_f64, |acc, (r, pv)| acc.max((r / pv).abs()));
    }
    let well = residual[NUM_COMPONENTS * n..].iter().fold(0.0_f64, |acc, r| acc.max(r.abs()));

    for value in mass_balance.iter().chain(&cnv).chain(std::iter::once(&well)) {
        if value.is_nan() || *value > params.max_residual_allowed {
            return Err(SolverError::ResidualTooLarge {
                residual: *value,
                allowed: params.max_residual_allowed,
            });
        }
    }

    let converged = mass_balance.iter().all(|&mb| mb < params.tolerance_mb)
        && cnv.iter().all(|&c| c < params.tolerance_cnv)
        && well < params.tolerance_wells;
    Ok(ConvergenceReport { mass_balance, cnv, well, converged })
}

/// Largest absolute residual per component block.
pub fn component_norms(residual: &[f64], num_cells: usize) -> ComponentNorms {
    let mut norms = [0.0; NUM_COMPONENTS];
    for (comp, norm) in norms.iter_mut().enumerate() {
        *norm = residual[comp * num_cells..(comp + 1) * num_cells]
            .iter()
            .fold(0.0_f64, |acc, r| acc.max(r.abs()));
    }
    norms
}

/// Newton driver for any [`CoupledSystem`].
pub struct NewtonSolver<S: CoupledSystem> {
    system: S,
    params: SolverParameters,
}

impl<S: CoupledSystem> NewtonSolver<S> {
    /// Validates the parameters and the system dimensions.
    pub fn new(system: S, params: SolverParameters) -> SolverResult<Self> {
        params.validate()?;
        if system.pore_volume().len() != system.num_cells() {
            return Err(SolverError::DimensionMismatch {
                what: "pore volume",
                expected: system.num_cells(),
                found: system.pore_volume().len(),
            });
        }
        Ok(NewtonSolver { system, params })
    }

    /// Coupled system being solved.
    pub fn system(&self) -> &S {
        &self.system
    }

    /// Newton parameters.
    pub fn params(&self) -> &SolverParameters {
        &self.params
    }

    fn check_dimensions(
        &self,
        reservoir: &ReservoirState,
        wells: &WellState,
        polymer_inflow: &[f64],
    ) -> SolverResult<()> {
        let n = self.system.num_cells();
        let checks = [
            ("pressure", n, reservoir.pressure.len()),
            ("saturation", n, reservoir.saturation.len()),
            ("concentration", n, reservoir.concentration.len()),
            ("cmax", n, reservoir.cmax.len()),
            ("polymer inflow", n, polymer_inflow.len()),
            ("bottom-hole pressure", self.system.num_wells(), wells.bhp.len()),
        ];
        for (what, expected, found) in checks {
            if expected != found {
                return Err(SolverError::DimensionMismatch { what, expected, found });
            }
        }
        Ok(())
    }

    fn evaluate(&self, step: &StepData<'_>, x: &[f64]) -> Vec<f64> {
        let x_dual: Vec<Dual64> = x.iter().map(|&v| Dual64::from(v)).collect();
        self.system.residual(step, &x_dual).iter().map(|r| r.re).collect()
    }

    /// Solves `J dx = R`; the Newton iterate is `x - dx`.
    fn newton_update(&self, step: &StepData<'_>, x: &[f64], residual: &[f64]) -> SolverResult<Vec<f64>> {
        let jacobian = compute_jacobian(|v| self.system.residual(step, v), x);
        if !jacobian.is_square() {
            return Err(SolverError::DimensionMismatch {
                what: "residual",
                expected: jacobian.n_variables,
                found: jacobian.n_equations,
            });
        }
        let rhs = DVector::from_column_slice(residual);
        match jacobian.to_matrix().lu().solve(&rhs) {
            Some(dx) => Ok(dx.as_slice().to_vec()),
            None => Err(SolverError::SingularJacobian),
        }
    }

    // Chops and applies `dx` to the packed unknowns.
    fn apply_update(&self, x: &mut [f64], dx: &mut [f64]) {
        let n = self.system.num_cells();
        let (p, rest) = x.split_at_mut(n);
        let (s, rest) = rest.split_at_mut(n);
        let (c, bhp) = rest.split_at_mut(n);
        let (dp, drest) = dx.split_at_mut(n);
        let (ds, drest) = drest.split_at_mut(n);
        let (dc, dbhp) = drest.split_at_mut(n);

        chop_relative(dp, p, self.params.dp_max_rel);
        chop_saturation(ds, self.params.ds_max);
        chop_relative(dbhp, bhp, self.params.dr_max_rel);

        for (v, d) in p.iter_mut().zip(dp.iter()) {
            *v = (*v - d).max(0.0);
        }
        for (v, d) in s.iter_mut().zip(ds.iter()) {
            *v = (*v - d).clamp(0.0, 1.0);
        }
        for (v, d) in c.iter_mut().zip(dc.iter()) {
            *v = (*v - d).max(0.0);
        }
        for (v, d) in bhp.iter_mut().zip(dbhp.iter()) {
            *v -= d;
        }
    }
}

fn pack(reservoir: &ReservoirState, wells: &WellState) -> Vec<f64> {
    let mut x = Vec::with_capacity(NUM_COMPONENTS * reservoir.num_cells() + wells.bhp.len());
    x.extend_from_slice(&reservoir.pressure);
    x.extend_from_slice(&reservoir.saturation);
    x.extend_from_slice(&reservoir.concentration);
    x.extend_from_slice(&wells.bhp);
    x
}

fn unpack(x: &[f64], reservoir: &mut ReservoirState, wells: &mut WellState) {
    let n = reservoir.num_cells();
    reservoir.pressure.copy_from_slice(&x[..n]);
    reservoir.saturation.copy_from_slice(&x[n..2 * n]);
    reservoir.concentration.copy_from_slice(&x[2 * n..3 * n]);
    wells.bhp.copy_from_slice(&x[3 * n..]);
    for (cmax, &c) in reservoir.cmax.iter_mut().zip(&reservoir.concentration) {
        *cmax = cmax.max(c);
    }
}

impl<S: CoupledSystem> FullyImplicitStep for NewtonSolver<S> {
    fn step(
        &mut self,
        dt: f64,
        reservoir: &mut ReservoirState,
        wells: &mut WellState,
        polymer_inflow: &[f64],
    ) -> SolverResult<usize> {
        if dt.is_nan() || dt <= 0.0 {
            return Err(SolverError::InvalidParameter(format!(
                "time step must be positive, got {}",
                dt
            )));
        }
        self.check_dimensions(reservoir, wells, polymer_inflow)?;

        let n = self.system.num_cells();
        let previous = reservoir.clone();
        let step = StepData { dt, previous: &previous, polymer_inflow };
        let pore_volume = self.system.pore_volume();

        let mut x = pack(reservoir, wells);
        let mut residual = self.evaluate(&step, &x);
        let mut history = vec![component_norms(&residual, n)];
        let mut report = check_convergence(&residual, pore_volume, dt, &self.params)?;

        let mut it = 0;
        let mut omega = 1.0;
        let mut dx_old = vec![0.0; x.len()];
        while !report.converged && it < self.params.max_iter {
            let mut dx = self.newton_update(&step, &x, &residual)?;

            let oscillation = detect_oscillations(&history, it, self.params.relax_rel_tol);
            if oscillation.oscillate {
                omega = (omega - self.params.relax_increment).max(self.params.relax_max);
                log::warn!("oscillating Newton iteration {}, relaxation set to {}", it, omega);
            } else if oscillation.stagnate {
                log::debug!("stagnating Newton iteration {}", it);
            }
            stabilize(&mut dx, &mut dx_old, omega, self.params.relax_type);
            self.apply_update(&mut x, &mut dx);

            residual = self.evaluate(&step, &x);
            history.push(component_norms(&residual, n));
            it += 1;
            report = check_convergence(&residual, pore_volume, dt, &self.params)?;
            log::trace!(
                "Newton iteration {}: mb = {:?}, cnv = {:?}, well = {:e}",
                it,
                report.mass_balance,
                report.cnv,
                report.well
            );
        }

        if !report.converged {
            return Err(SolverError::NewtonNotConverged { iterations: it });
        }
        unpack(&x, reservoir, wells);
        log::debug!("fully implicit step dt = {} converged in {} iterations", dt, it);
        Ok(it)
    }
}

/// Well kind; injectors inject water carrying the cell's inflow concentration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKind {
    Injector,
    Producer,
}

/// Well control equation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WellControl {
    /// Total reservoir rate, positive for both injection and production
    Rate(f64),
    Bhp(f64),
}

/// Single-cell well.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Well {
    pub cell: usize,
    pub well_index: f64,
    pub kind: WellKind,
    pub control: WellControl,
}

/// Incompressible two-phase flow with polymer on an unstructured grid.
pub struct PolymerFlowSystem<'a, F: FluidProperties + ?Sized> {
    grid: &'a UnstructuredGrid,
    transmissibility: &'a [f64],
    porosity: &'a [f64],
    pore_volume: &'a [f64],
    closures: Closures<'a, F>,
    wells: Vec<Well>,
}

impl<'a, F: FluidProperties + ?Sized> PolymerFlowSystem<'a, F> {
    /// Checks the phase count, geometry lengths and well cells against the grid.
    pub fn new(
        grid: &'a UnstructuredGrid,
        transmissibility: &'a [f64],
        porosity: &'a [f64],
        pore_volume: &'a [f64],
        closures: Closures<'a, F>,
        wells: Vec<Well>,
    ) -> SolverResult<Self> {
        if closures.fluid().num_phases() != 2 {
            return Err(SolverError::UnsupportedPhaseCount(closures.fluid().num_phases()));
        }
        let n = grid.num_cells();
        let checks = [
            ("transmissibility", grid.num_faces(), transmissibility.len()),
            ("porosity", n, porosity.len()),
            ("pore volume", n, pore_volume.len()),
        ];
        for (what, expected, found) in checks {
            if expected != found {
                return Err(SolverError::DimensionMismatch { what, expected, found });
            }
        }
        if let Some(well) = wells.iter().find(|w| w.cell >= n) {
            return Err(SolverError::InvalidParameter(format!(
                "well perforates cell {} but the grid has {} cells",
                well.cell, n
            )));
        }
        Ok(PolymerFlowSystem { grid, transmissibility, porosity, pore_volume, closures, wells })
    }

    /// Wells of the system.
    pub fn wells(&self) -> &[Well] {
        &self.wells
    }

    // Adsorbed amount at `c` given the historical maximum `cmax`; adsorption is irreversible.
    fn adsorption_dual(&self, c: Dual64, cmax: f64) -> Dual64 {
        let polymer = self.closures.polymer();
        if c.re < cmax {
            Dual64::from(polymer.adsorption(cmax))
        } else {
            let (ads, d_ads) = polymer.adsorption_with_der(c.re);
            lift(ads, d_ads, c)
        }
    }
}

impl<F: FluidProperties + ?Sized> CoupledSystem for PolymerFlowSystem<'_, F> {
    fn num_cells(&self) -> usize {
        self.grid.num_cells()
    }

    fn num_wells(&self) -> usize {
        self.wells.len()
    }

    fn pore_volume(&self) -> &[f64] {
        self.pore_volume
    }

    fn residual(&self, step: &StepData<'_>, x: &[Dual64]) -> Vec<Dual64> {
        let n = self.grid.num_cells();
        let (p, rest) = x.split_at(n);
        let (s, rest) = rest.split_at(n);
        let (c, bhp) = rest.split_at(n);
        let prev = step.previous;
        let polymer = self.closures.polymer();

        let mobility: Vec<[Dual64; 2]> =
            (0..n).map(|i| self.closures.mobilities_dual(s[i], c[i], i)).collect();
        let mc: Vec<Dual64> = c.iter().map(|&ci| self.closures.mc_dual(ci)).collect();

        let mut r = vec![Dual64::from(0.0); NUM_COMPONENTS * n + self.wells.len()];

        for i in 0..n {
            let pvdt = self.pore_volume[i] / step.dt;
            let phi = self.porosity[i];
            let k = polymer.rhor * (1.0 - phi) / phi;
            let (s0, c0, cmax0) = (prev.saturation[i], prev.concentration[i], prev.cmax[i]);

            r[i] = (s[i] - s0) * pvdt;
            r[n + i] = (s[i] - s0) * (-pvdt);
            let retained = (s[i] - polymer.dps) * c[i] - (s0 - polymer.dps) * c0
                + (self.adsorption_dual(c[i], cmax0) - polymer.adsorption(c0.max(cmax0))) * k;
            r[2 * n + i] = retained * pvdt;
        }

        for face in 0..self.grid.num_faces() {
            let [Some(a), Some(b)] = self.grid.face_cells(face) else { continue };
            let dphi = p[a] - p[b];
            let up = if dphi.re >= 0.0 { a } else { b };
            let t = self.transmissibility[face];
            let water = mobility[up][0] * dphi * t;
            let oil = mobility[up][1] * dphi * t;
            let poly = water * mc[up];
            for (offset, flux) in [(0, water), (n, oil), (2 * n, poly)] {
                r[offset + a] = r[offset + a] + flux;
                r[offset + b] = r[offset + b] - flux;
            }
        }

        for (w, well) in self.wells.iter().enumerate() {
            let i = well.cell;
            let drawdown = p[i] - bhp[w];
            // Positive for outflow from the cell
            let (q_water, q_oil, q_poly) = match well.kind {
                WellKind::Injector => {
                    let total = (mobility[i][0] + mobility[i][1]) * drawdown * well.well_index;
                    let injected_mc = self.closures.mc(step.polymer_inflow[i]);
                    (total, Dual64::from(0.0), total * injected_mc)
                }
                WellKind::Producer => {
                    let q_water = mobility[i][0] * drawdown * well.well_index;
                    let q_oil = mobility[i][1] * drawdown * well.well_index;
                    (q_water, q_oil, q_water * mc[i])
                }
            };
            r[i] = r[i] + q_water;
            r[n + i] = r[n + i] + q_oil;
            r[2 * n + i] = r[2 * n + i] + q_poly;

            let row = NUM_COMPONENTS * n + w;
            r[row] = match (well.control, well.kind) {
                (WellControl::Bhp(target), _) => bhp[w] - target,
                (WellControl::Rate(target), WellKind::Injector) => -(q_water + q_oil) - target,
                (WellControl::Rate(target), WellKind::Producer) => q_water + q_oil - target,
            };
        }
        r
    }
}
