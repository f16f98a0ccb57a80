//! Reordered implicit transport of water and polymer.
//!
//! [`PolymerTransport`] advances saturation and polymer concentration by one
//! implicit Euler step for a fixed total flux field. The cells are visited in
//! upstream-first order, so each cell (or cyclic group) only needs the
//! fractional-flow and retention caches of neighbours that are already solved.
//!
//! # Example
//!
//! ```
//! use polyflow::{
//!     CoreyFluid, LinearTable, PolymerProperties, PolymerState, PolymerTransport, StepInput,
//!     TransportConfig, UnstructuredGrid, UpwindOrdering,
//! };
//!
//! let grid = UnstructuredGrid::cartesian_1d(3);
//! let porosity = vec![0.3; 3];
//! let pore_volume = vec![1.0; 3];
//! let fluid = CoreyFluid::new(1e-3, 3e-3);
//! let polymer = PolymerProperties::new(
//!     1.0,
//!     0.5,
//!     0.0,
//!     1000.0,
//!     LinearTable::new(vec![0.0, 1.0], vec![1.0, 5.0]).unwrap(),
//!     LinearTable::constant(0.0),
//! )
//! .unwrap();
//!
//! let mut transport = PolymerTransport::new(
//!     &grid,
//!     &porosity,
//!     &pore_volume,
//!     &fluid,
//!     &polymer,
//!     TransportConfig::default(),
//! )
//! .unwrap();
//!
//! // Inject at the left, produce at the right
//! let darcyflux = vec![0.0, 0.5, 0.5, 0.0];
//! let source = vec![0.5, 0.0, -0.5];
//! let input = StepInput { darcyflux: &darcyflux, source: &source, dt: 0.2, inflow_c: 0.8 };
//! let mut state = PolymerState::uniform(3, 0.1, 0.0);
//!
//! transport.solve(&input, &mut state, &UpwindOrdering).unwrap();
//! assert!(state.saturation[0] > 0.1);
//! assert!(state.concentration[0] > 0.0);
//! ```

use crate::closures::Closures;
use crate::grid::UnstructuredGrid;
use crate::ordering::{CellGroups, CellOrdering};
use crate::properties::{FluidProperties, PolymerProperties};
use crate::residual::{CellResidual, CellStart, FluxBudget, UpwindData};
use crate::solvers::multi_cell::{CellState, GroupCells, GroupReport, MultiCellSolver};
use crate::solvers::single_cell::{CellReport, CellSolver};
use crate::solvers::{SolverError, SolverResult, TransportConfig};

/// Per-step driving data.
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    /// Total Darcy flux per face, positive from `face_cells[f][0]` to `face_cells[f][1]`
    pub darcyflux: &'a [f64],
    /// Per-cell source, positive for injection
    pub source: &'a [f64],
    pub dt: f64,
    /// Polymer concentration of the injected water
    pub inflow_c: f64,
}

/// Transported fields, owned by the caller and updated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct PolymerState {
    pub saturation: Vec<f64>,
    pub concentration: Vec<f64>,
    /// Historical maximum concentration per cell
    pub cmax: Vec<f64>,
}

impl PolymerState {
    /// Uniform state with `cmax` equal to the concentration.
    pub fn uniform(num_cells: usize, saturation: f64, concentration: f64) -> Self {
        PolymerState {
            saturation: vec![saturation; num_cells],
            concentration: vec![concentration; num_cells],
            cmax: vec![concentration; num_cells],
        }
    }

    /// State of one cell.
    pub fn cell(&self, cell: usize) -> CellState {
        CellState {
            saturation: self.saturation[cell],
            concentration: self.concentration[cell],
            cmax: self.cmax[cell],
        }
    }

    fn set_cell(&mut self, cell: usize, state: CellState) {
        self.saturation[cell] = state.saturation;
        self.concentration[cell] = state.concentration;
        self.cmax[cell] = state.cmax;
    }
}

/// Summary of one transport step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Groups solved, singletons included
    pub groups: usize,
    /// Cyclic groups solved with the multi-cell solver
    pub multi_cell_groups: usize,
    /// Largest number of sweeps needed by a cyclic group
    pub max_group_sweeps: usize,
    /// Directional searches performed by the splitting method
    pub searches: usize,
    /// Cell solves where splitting fell back to bracketing
    pub fallbacks: usize,
}

impl StepReport {
    fn record_cell(&mut self, report: &CellReport) {
        self.searches += report.searches;
        if report.fell_back {
            self.fallbacks += 1;
        }
    }
}

/// Implicit transport solver for two-phase flow with polymer.
pub struct PolymerTransport<'a, F: FluidProperties + ?Sized> {
    grid: &'a UnstructuredGrid,
    porosity: &'a [f64],
    pore_volume: &'a [f64],
    closures: Closures<'a, F>,
    config: TransportConfig,
    solver: CellSolver,
    fractional_flow: Vec<f64>,
    mc: Vec<f64>,
}

fn check_len(what: &'static str, expected: usize, found: usize) -> SolverResult<()> {
    if expected == found {
        Ok(())
    } else {
        Err(SolverError::DimensionMismatch { what, expected, found })
    }
}

impl<'a, F: FluidProperties + ?Sized> PolymerTransport<'a, F> {
    /// Validates the model and configuration.
    ///
    /// Fails if the fluid does not have exactly two phases, if the geometry
    /// arrays do not match the grid, or if a parameter is out of range.
    pub fn new(
        grid: &'a UnstructuredGrid,
        porosity: &'a [f64],
        pore_volume: &'a [f64],
        fluid: &'a F,
        polymer: &'a PolymerProperties,
        config: TransportConfig,
    ) -> SolverResult<Self> {
        if fluid.num_phases() != 2 {
            return Err(SolverError::UnsupportedPhaseCount(fluid.num_phases()));
        }
        let num_cells = grid.num_cells();
        check_len("porosity", num_cells, porosity.len())?;
        check_len("pore volume", num_cells, pore_volume.len())?;
        if let Some(cell) = porosity.iter().position(|&phi| phi.is_nan() || phi <= 0.0 || phi > 1.0) {
            return Err(SolverError::InvalidParameter(format!(
                "porosity of cell {} is {}, expected a value in (0, 1]",
                cell, porosity[cell]
            )));
        }
        if let Some(cell) = pore_volume.iter().position(|&pv| pv.is_nan() || pv <= 0.0) {
            return Err(SolverError::InvalidParameter(format!(
                "pore volume of cell {} is {}, expected a positive value",
                cell, pore_volume[cell]
            )));
        }
        config.validate()?;

        Ok(PolymerTransport {
            grid,
            porosity,
            pore_volume,
            closures: Closures::new(fluid, polymer),
            solver: CellSolver::from_config(&config),
            config,
            fractional_flow: vec![-1.0; num_cells],
            mc: vec![-1.0; num_cells],
        })
    }

    /// Solver configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Grid the solver was built on.
    pub fn grid(&self) -> &'a UnstructuredGrid {
        self.grid
    }

    /// Fractional flow cache from the last solve.
    pub fn fractional_flow(&self) -> &[f64] {
        &self.fractional_flow
    }

    /// Retention factor cache from the last solve.
    pub fn mc(&self) -> &[f64] {
        &self.mc
    }

    fn check_input(&self, input: &StepInput<'_>, state: &PolymerState) -> SolverResult<()> {
        let num_cells = self.grid.num_cells();
        check_len("darcy flux", self.grid.num_faces(), input.darcyflux.len())?;
        check_len("source", num_cells, input.source.len())?;
        check_len("saturation", num_cells, state.saturation.len())?;
        check_len("concentration", num_cells, state.concentration.len())?;
        check_len("cmax", num_cells, state.cmax.len())?;
        if input.dt.is_nan() || input.dt <= 0.0 {
            return Err(SolverError::InvalidParameter(format!(
                "time step must be positive, got {}",
                input.dt
            )));
        }
        Ok(())
    }

    /// Recomputes the fractional flow and retention caches of every cell.
    pub fn init_caches(&mut self, state: &PolymerState) {
        for cell in 0..self.grid.num_cells() {
            let (s, c) = (state.saturation[cell], state.concentration[cell]);
            self.fractional_flow[cell] = self.closures.frac_flow(s, c, cell);
            self.mc[cell] = self.closures.mc(c);
        }
    }

    /// Advances `state` by one step, visiting cells in the order given by `ordering`.
    pub fn solve<O>(
        &mut self,
        input: &StepInput<'_>,
        state: &mut PolymerState,
        ordering: &O,
    ) -> SolverResult<StepReport>
    where
        O: CellOrdering + ?Sized,
    {
        self.check_input(input, state)?;
        let groups = ordering.order(self.grid, input.darcyflux);
        self.solve_groups(input, state, &groups)
    }

    /// Advances `state` by one step over precomputed groups.
    ///
    /// Groups must be ordered so that no group depends on a later one.
    pub fn solve_groups(
        &mut self,
        input: &StepInput<'_>,
        state: &mut PolymerState,
        groups: &CellGroups,
    ) -> SolverResult<StepReport> {
        self.check_input(input, state)?;
        self.init_caches(state);

        let mut report = StepReport::default();
        for group in groups.iter() {
            report.groups += 1;
            match group {
                [cell] => {
                    let cell_report = self.solve_single_cell(input, state, *cell)?;
                    report.record_cell(&cell_report);
                }
                cells => {
                    let group_report = self.solve_multi_cell(input, state, cells)?;
                    report.multi_cell_groups += 1;
                    report.max_group_sweeps = report.max_group_sweeps.max(group_report.sweeps);
                    report.searches += group_report.searches;
                    report.fallbacks += group_report.fallbacks;
                }
            }
        }

        log::debug!(
            "transport step dt = {}: {} groups ({} cyclic, max {} sweeps), {} splitting fallbacks",
            input.dt,
            report.groups,
            report.multi_cell_groups,
            report.max_group_sweeps,
            report.fallbacks
        );
        Ok(report)
    }

    fn step<'s>(&'s mut self, input: &'s StepInput<'s>, state: &'s mut PolymerState) -> Step<'s, 'a, F> {
        Step {
            grid: self.grid,
            porosity: self.porosity,
            pore_volume: self.pore_volume,
            closures: self.closures,
            solver: self.solver,
            input,
            inflow_mc: self.closures.mc(input.inflow_c),
            state,
            fractional_flow: &mut self.fractional_flow,
            mc: &mut self.mc,
        }
    }

    /// Solves one cell against the current caches and updates its state and caches.
    pub fn solve_single_cell(
        &mut self,
        input: &StepInput<'_>,
        state: &mut PolymerState,
        cell: usize,
    ) -> SolverResult<CellReport> {
        self.step(input, state).solve_cell(cell)
    }

    /// Solves a cyclic group of cells by repeated sweeps.
    pub fn solve_multi_cell(
        &mut self,
        input: &StepInput<'_>,
        state: &mut PolymerState,
        cells: &[usize],
    ) -> SolverResult<GroupReport> {
        let group_solver = MultiCellSolver::new(self.config.max_iterations, self.config.tolerance);
        let mut step = self.step(input, state);
        group_solver.solve(cells, &mut step)
    }
}

// Borrowed view of the solver during one step.
struct Step<'s, 'a, F: FluidProperties + ?Sized> {
    grid: &'a UnstructuredGrid,
    porosity: &'a [f64],
    pore_volume: &'a [f64],
    closures: Closures<'a, F>,
    solver: CellSolver,
    input: &'s StepInput<'s>,
    inflow_mc: f64,
    state: &'s mut PolymerState,
    fractional_flow: &'s mut [f64],
    mc: &'s mut [f64],
}

impl<F: FluidProperties + ?Sized> GroupCells for Step<'_, '_, F> {
    fn cell_state(&self, cell: usize) -> CellState {
        self.state.cell(cell)
    }

    fn set_cell_state(&mut self, cell: usize, state: CellState) {
        self.state.set_cell(cell, state);
    }

    fn refresh_caches(&mut self, cell: usize) {
        let (s, c) = (self.state.saturation[cell], self.state.concentration[cell]);
        self.fractional_flow[cell] = self.closures.frac_flow(s, c, cell);
        self.mc[cell] = self.closures.mc(c);
    }

    fn solve_cell(&mut self, cell: usize) -> SolverResult<CellReport> {
        let solution = {
            let upwind = UpwindData {
                grid: self.grid,
                darcyflux: self.input.darcyflux,
                source: self.input.source,
                fractional_flow: &*self.fractional_flow,
                mc: &*self.mc,
                inflow_mc: self.inflow_mc,
            };
            let dtpv = self.input.dt / self.pore_volume[cell];
            let budget = FluxBudget::build(&upwind, cell, dtpv, self.porosity[cell]);
            let start = CellStart {
                s0: self.state.saturation[cell],
                c0: self.state.concentration[cell],
                cmax0: self.state.cmax[cell],
            };
            let residual = CellResidual::new(self.closures, cell, start, budget);
            self.solver.solve(&residual)?
        };

        let (s, c) = (solution.saturation, solution.concentration);
        self.state.saturation[cell] = s;
        self.state.concentration[cell] = c;
        self.state.cmax[cell] = self.state.cmax[cell].max(c);
        self.fractional_flow[cell] = self.closures.frac_flow(s, c, cell);
        self.mc[cell] = self.closures.mc(c);
        Ok(solution.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closures::tests::{test_fluid, test_polymer};
    use crate::ordering::UpwindOrdering;
    use crate::properties::{CoreyFluid, RelPerm};
    use crate::residual::inf_norm;
    use crate::solvers::SolveMethod;
    use approx::assert_relative_eq;

    struct ThreePhase(CoreyFluid);

    impl FluidProperties for ThreePhase {
        fn num_phases(&self) -> usize {
            3
        }
        fn viscosity(&self) -> [f64; 2] {
            self.0.viscosity()
        }
        fn relperm(&self, s: f64, cell: usize) -> [f64; 2] {
            self.0.relperm(s, cell)
        }
        fn relperm_with_der(&self, s: f64, cell: usize) -> RelPerm {
            self.0.relperm_with_der(s, cell)
        }
        fn sat_range(&self, cell: usize) -> (f64, f64) {
            self.0.sat_range(cell)
        }
    }

    fn config(method: SolveMethod) -> TransportConfig {
        TransportConfig::new().with_method(method).with_tolerance(1e-10).with_max_iterations(60)
    }

    // Injector in cell 0, producer in the last cell.
    fn line_flow(n: usize, rate: f64) -> (Vec<f64>, Vec<f64>) {
        let mut darcyflux = vec![rate; n + 1];
        darcyflux[0] = 0.0;
        darcyflux[n] = 0.0;
        let mut source = vec![0.0; n];
        source[0] = rate;
        source[n - 1] = -rate;
        (darcyflux, source)
    }

    #[test]
    fn test_rejects_three_phase_fluid() {
        let grid = UnstructuredGrid::cartesian_1d(2);
        let fluid = ThreePhase(test_fluid());
        let polymer = test_polymer();
        let result = PolymerTransport::new(
            &grid,
            &[0.3, 0.3],
            &[1.0, 1.0],
            &fluid,
            &polymer,
            TransportConfig::default(),
        );
        assert!(matches!(result, Err(SolverError::UnsupportedPhaseCount(3))));
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let grid = UnstructuredGrid::cartesian_1d(2);
        let fluid = test_fluid();
        let polymer = test_polymer();
        let config = TransportConfig::default();

        let short = PolymerTransport::new(&grid, &[0.3], &[1.0, 1.0], &fluid, &polymer, config.clone());
        assert!(matches!(short, Err(SolverError::DimensionMismatch { what: "porosity", .. })));

        let zero_phi = PolymerTransport::new(&grid, &[0.3, 0.0], &[1.0, 1.0], &fluid, &polymer, config.clone());
        assert!(matches!(zero_phi, Err(SolverError::InvalidParameter(_))));

        let zero_pv = PolymerTransport::new(&grid, &[0.3, 0.3], &[1.0, 0.0], &fluid, &polymer, config);
        assert!(matches!(zero_pv, Err(SolverError::InvalidParameter(_))));
    }

    #[test]
    fn test_rejects_mismatched_step_input() {
        let grid = UnstructuredGrid::cartesian_1d(2);
        let porosity = [0.3, 0.3];
        let pore_volume = [1.0, 1.0];
        let fluid = test_fluid();
        let polymer = test_polymer();
        let mut transport = PolymerTransport::new(
            &grid,
            &porosity,
            &pore_volume,
            &fluid,
            &polymer,
            TransportConfig::default(),
        )
        .unwrap();

        let darcyflux = [0.0, 1.0];
        let source = [1.0, -1.0];
        let input = StepInput { darcyflux: &darcyflux, source: &source, dt: 1.0, inflow_c: 0.0 };
        let mut state = PolymerState::uniform(2, 0.2, 0.0);
        let err = transport.solve(&input, &mut state, &UpwindOrdering).unwrap_err();
        assert_eq!(err, SolverError::DimensionMismatch { what: "darcy flux", expected: 3, found: 2 });
    }

    #[test]
    fn test_isolated_producer_cell() {
        let grid = UnstructuredGrid::cartesian_1d(1);
        let porosity = [0.3];
        let pore_volume = [1.0];
        let fluid = test_fluid();
        let polymer = test_polymer();
        let darcyflux = [0.0, 0.0];
        let source = [-1.0];
        let input = StepInput { darcyflux: &darcyflux, source: &source, dt: 0.01, inflow_c: 1.0 };

        for method in [SolveMethod::Bracketing, SolveMethod::Splitting] {
            let mut transport =
                PolymerTransport::new(&grid, &porosity, &pore_volume, &fluid, &polymer, config(method))
                    .unwrap();
            let mut state = PolymerState::uniform(1, 0.2, 0.0);
            transport.solve(&input, &mut state, &UpwindOrdering).unwrap();
            assert!(state.saturation[0] < 0.2);
            assert_eq!(state.concentration[0], 0.0);
            assert_eq!(state.cmax[0], 0.0);
        }
    }

    #[test]
    fn test_methods_agree_on_line() {
        let n = 5;
        let grid = UnstructuredGrid::cartesian_1d(n);
        let porosity = vec![0.25; n];
        let pore_volume = vec![0.5; n];
        let fluid = test_fluid();
        let polymer = test_polymer();
        let (darcyflux, source) = line_flow(n, 0.4);
        let input = StepInput { darcyflux: &darcyflux, source: &source, dt: 0.5, inflow_c: 1.2 };

        let mut states = Vec::new();
        for method in [SolveMethod::Bracketing, SolveMethod::Splitting] {
            let mut transport =
                PolymerTransport::new(&grid, &porosity, &pore_volume, &fluid, &polymer, config(method))
                    .unwrap();
            let mut state = PolymerState::uniform(n, 0.2, 0.0);
            let report = transport.solve(&input, &mut state, &UpwindOrdering).unwrap();
            assert_eq!(report.groups, n);
            assert_eq!(report.multi_cell_groups, 0);
            states.push(state);
        }
        for cell in 0..n {
            assert_relative_eq!(states[0].saturation[cell], states[1].saturation[cell], epsilon = 1e-7);
            assert_relative_eq!(states[0].concentration[cell], states[1].concentration[cell], epsilon = 1e-7);
        }
        assert!(states[0].concentration[0] > 0.0);
    }

    #[test]
    fn test_solved_cells_satisfy_residuals() {
        let n = 4;
        let grid = UnstructuredGrid::cartesian_1d(n);
        let porosity = vec![0.3; n];
        let pore_volume = vec![1.0; n];
        let fluid = test_fluid();
        let polymer = test_polymer();
        let (darcyflux, source) = line_flow(n, 0.5);
        let input = StepInput { darcyflux: &darcyflux, source: &source, dt: 0.4, inflow_c: 1.0 };

        let mut transport = PolymerTransport::new(
            &grid,
            &porosity,
            &pore_volume,
            &fluid,
            &polymer,
            config(SolveMethod::Splitting),
        )
        .unwrap();
        let before = PolymerState::uniform(n, 0.3, 0.1);
        let mut state = before.clone();
        transport.solve(&input, &mut state, &UpwindOrdering).unwrap();

        // Rebuild each residual from the converged upstream caches
        let closures = Closures::new(&fluid, &polymer);
        let upwind = UpwindData {
            grid: &grid,
            darcyflux: &darcyflux,
            source: &source,
            fractional_flow: transport.fractional_flow(),
            mc: transport.mc(),
            inflow_mc: closures.mc(input.inflow_c),
        };
        for cell in 0..n {
            let budget = FluxBudget::build(&upwind, cell, input.dt / pore_volume[cell], porosity[cell]);
            let start = CellStart {
                s0: before.saturation[cell],
                c0: before.concentration[cell],
                cmax0: before.cmax[cell],
            };
            let residual = CellResidual::new(closures, cell, start, budget);
            let res = residual.residual([state.saturation[cell], state.concentration[cell]]);
            assert!(inf_norm(res) <= 1e-9, "cell {}: {:?}", cell, res);
        }
    }

    #[test]
    fn test_cmax_is_monotone() {
        let n = 3;
        let grid = UnstructuredGrid::cartesian_1d(n);
        let porosity = vec![0.3; n];
        let pore_volume = vec![1.0; n];
        let fluid = test_fluid();
        let polymer = test_polymer();
        let (darcyflux, source) = line_flow(n, 0.5);
        let mut transport = PolymerTransport::new(
            &grid,
            &porosity,
            &pore_volume,
            &fluid,
            &polymer,
            config(SolveMethod::Bracketing),
        )
        .unwrap();

        let mut state = PolymerState::uniform(n, 0.2, 0.0);
        // Polymer slug followed by chase water
        for (step, inflow_c) in [1.5, 1.5, 1.5, 0.0, 0.0, 0.0].into_iter().enumerate() {
            let input = StepInput { darcyflux: &darcyflux, source: &source, dt: 0.5, inflow_c };
            let previous = state.cmax.clone();
            transport.solve(&input, &mut state, &UpwindOrdering).unwrap();
            for cell in 0..n {
                assert!(state.cmax[cell] >= previous[cell], "step {} cell {}", step, cell);
                assert!(state.cmax[cell] >= state.concentration[cell]);
            }
        }
        assert!(state.concentration[0] < state.cmax[0]);
    }

    #[test]
    fn test_two_cell_cycle_converges() {
        // Face 1 carries flow 0 -> 1 and face 2 carries flow 1 -> 0
        let faces = vec![[None, Some(0)], [Some(0), Some(1)], [Some(1), Some(0)], [Some(1), None]];
        let grid = UnstructuredGrid::from_face_cells(2, faces).unwrap();
        let porosity = [0.3, 0.3];
        let pore_volume = [1.0, 1.0];
        let fluid = test_fluid();
        let polymer = test_polymer();
        let darcyflux = [0.0, 2.0, 1.0, 0.0];
        let source = [1.0, -1.0];
        let input = StepInput { darcyflux: &darcyflux, source: &source, dt: 0.3, inflow_c: 1.0 };

        let groups = UpwindOrdering.order(&grid, &darcyflux);
        assert_eq!(groups.num_groups(), 1);

        for method in [SolveMethod::Bracketing, SolveMethod::Splitting] {
            let config = TransportConfig::new()
                .with_method(method)
                .with_tolerance(1e-7)
                .with_max_iterations(50);
            let mut transport =
                PolymerTransport::new(&grid, &porosity, &pore_volume, &fluid, &polymer, config).unwrap();
            let mut state = PolymerState {
                saturation: vec![0.3, 0.5],
                concentration: vec![0.0, 0.5],
                cmax: vec![0.0, 0.5],
            };
            let report = transport.solve(&input, &mut state, &UpwindOrdering).unwrap();
            assert_eq!(report.multi_cell_groups, 1);
            assert!(report.max_group_sweeps >= 2);
            assert!(state.concentration[0] > 0.0);
            assert!(state.cmax[1] >= 0.5);
        }
    }

    #[test]
    fn test_circulating_pair_satisfies_residuals() {
        // Equal and opposite face fluxes, no sources: water only circulates
        let faces = vec![[None, Some(0)], [Some(0), Some(1)], [Some(1), Some(0)], [Some(1), None]];
        let grid = UnstructuredGrid::from_face_cells(2, faces).unwrap();
        let porosity = [0.3, 0.3];
        let pore_volume = [1.0, 1.0];
        let fluid = test_fluid();
        let polymer = test_polymer();
        let darcyflux = [0.0, 1.0, 1.0, 0.0];
        let source = [0.0, 0.0];
        let input = StepInput { darcyflux: &darcyflux, source: &source, dt: 0.3, inflow_c: 0.0 };
        let closures = Closures::new(&fluid, &polymer);

        for method in [SolveMethod::Bracketing, SolveMethod::Splitting] {
            let config = TransportConfig::new()
                .with_method(method)
                .with_tolerance(1e-7)
                .with_max_iterations(50);
            let mut transport =
                PolymerTransport::new(&grid, &porosity, &pore_volume, &fluid, &polymer, config).unwrap();
            let before = PolymerState {
                saturation: vec![0.3, 0.6],
                concentration: vec![0.0, 0.8],
                cmax: vec![0.0, 0.8],
            };
            let mut state = before.clone();
            let report = transport.solve(&input, &mut state, &UpwindOrdering).unwrap();
            assert_eq!(report.multi_cell_groups, 1);
            assert!(report.max_group_sweeps >= 2);
            if method == SolveMethod::Splitting {
                assert!(report.searches > 0);
            }

            let upwind = UpwindData {
                grid: &grid,
                darcyflux: &darcyflux,
                source: &source,
                fractional_flow: transport.fractional_flow(),
                mc: transport.mc(),
                inflow_mc: closures.mc(input.inflow_c),
            };
            for cell in 0..2 {
                let budget = FluxBudget::build(&upwind, cell, input.dt / pore_volume[cell], porosity[cell]);
                let start = CellStart {
                    s0: before.saturation[cell],
                    c0: before.concentration[cell],
                    cmax0: before.cmax[cell],
                };
                let residual = CellResidual::new(closures, cell, start, budget);
                let res = residual.residual([state.saturation[cell], state.concentration[cell]]);
                assert!(inf_norm(res) <= 1e-5, "{:?} cell {}: {:?}", method, cell, res);
            }

            let water_change: f64 =
                state.saturation.iter().zip(&before.saturation).map(|(s, s0)| s - s0).sum();
            assert!(water_change.abs() <= 1e-5, "{:?}: water change {}", method, water_change);
            assert!(state.concentration[0] > 0.0);
            assert!(state.concentration[1] < 0.8);
            assert_eq!(state.cmax[1], 0.8);
        }
    }
}
