//! Gauss-Seidel sweeps over cyclic groups of cells.
//!
//! When the upwind graph has a cycle, no order of the cells in the cycle lets
//! each one see only solved upstream neighbours. The group is then solved as a
//! fixed point: every sweep resets each member to its state at the start of the
//! step and re-solves it against the latest caches of the other members.
//! Sweeps stop when neither the saturation nor the concentration of any member
//! changes by more than the tolerance.
//!
//! ```text
//! sweep 1:  cell A (sees B at its initial guess) -> cell B (sees new A)
//! sweep 2:  cell A (sees new B)                  -> cell B (sees newer A)
//! ...       until max |delta s|, max |delta c| <= tol
//! ```

use crate::solvers::single_cell::CellReport;
use crate::solvers::{SolverError, SolverResult};

/// Saturation, concentration and historical maximum concentration of a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellState {
    pub saturation: f64,
    pub concentration: f64,
    pub cmax: f64,
}

/// Access to the cells of a group while it is being solved.
pub trait GroupCells {
    fn cell_state(&self, cell: usize) -> CellState;

    fn set_cell_state(&mut self, cell: usize, state: CellState);

    /// Recomputes the fractional flow and retention caches of `cell` from its state.
    fn refresh_caches(&mut self, cell: usize);

    /// Solves `cell` against the current caches of its neighbours, writing back
    /// its state and caches.
    fn solve_cell(&mut self, cell: usize) -> SolverResult<CellReport>;
}

/// Largest changes observed during one sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepInfo {
    pub sweep: usize,
    pub max_s_change: f64,
    pub max_c_change: f64,
    /// Cell with the largest saturation change
    pub max_s_cell: Option<usize>,
    /// Cell with the largest concentration change
    pub max_c_cell: Option<usize>,
}

/// Outcome of a converged group solve.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupReport {
    pub cells: usize,
    pub sweeps: usize,
    pub max_s_change: f64,
    pub max_c_change: f64,
    /// Directional searches performed by the splitting method, over all sweeps
    pub searches: usize,
    /// Cell solves where splitting fell back to bracketing
    pub fallbacks: usize,
    pub history: Vec<SweepInfo>,
}

/// Fixed-point solver for cyclic groups.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultiCellSolver {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl MultiCellSolver {
    /// Solver capped at `max_iterations` sweeps with convergence tolerance `tolerance`.
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        MultiCellSolver { max_iterations, tolerance }
    }

    /// Sweeps over `cells` until the largest changes fall below the tolerance.
    pub fn solve<S>(&self, cells: &[usize], system: &mut S) -> SolverResult<GroupReport>
    where
        S: GroupCells + ?Sized,
    {
        // Snapshot is taken per cell id, after the caches reflect the initial guess
        let mut snapshot = Vec::with_capacity(cells.len());
        for &cell in cells {
            system.refresh_caches(cell);
            snapshot.push(system.cell_state(cell));
        }

        let mut history = Vec::new();
        let mut searches = 0;
        let mut fallbacks = 0;
        loop {
            let mut info = SweepInfo {
                sweep: history.len() + 1,
                max_s_change: 0.0,
                max_c_change: 0.0,
                max_s_cell: None,
                max_c_cell: None,
            };
            for (&cell, &start) in cells.iter().zip(&snapshot) {
                let old = system.cell_state(cell);
                system.set_cell_state(cell, start);
                let report = system.solve_cell(cell)?;
                searches += report.searches;
                if report.fell_back {
                    fallbacks += 1;
                }
                let new = system.cell_state(cell);

                let ds = (new.saturation - old.saturation).abs();
                let dc = (new.concentration - old.concentration).abs();
                if ds > info.max_s_change {
                    info.max_s_change = ds;
                    info.max_s_cell = Some(cell);
                }
                if dc > info.max_c_change {
                    info.max_c_change = dc;
                    info.max_c_cell = Some(cell);
                }
            }
            log::trace!(
                "group sweep {}: max delta s = {:e} (cell {:?}), max delta c = {:e} (cell {:?})",
                info.sweep,
                info.max_s_change,
                info.max_s_cell,
                info.max_c_change,
                info.max_c_cell
            );
            history.push(info);

            let converged =
                info.max_s_change <= self.tolerance && info.max_c_change <= self.tolerance;
            if converged {
                log::debug!("solved {} cell multicell problem in {} sweeps", cells.len(), history.len());
                return Ok(GroupReport {
                    cells: cells.len(),
                    sweeps: history.len(),
                    max_s_change: info.max_s_change,
                    max_c_change: info.max_c_change,
                    searches,
                    fallbacks,
                    history,
                });
            }
            if history.len() >= self.max_iterations {
                return Err(SolverError::MultiCellNotConverged {
                    cells: cells.len(),
                    iterations: history.len(),
                    max_s_change: info.max_s_change,
                    max_c_change: info.max_c_change,
                });
            }
        }
    }
}
