//! Solvers for the two unknowns of a single cell.
//!
//! [`CellSolver::Bracketing`] nests two scalar root finders: the outer one on
//! `c` over `[0, c_max_limit]`, the inner one on `s` over `[smin, smax]`, so the
//! concentration residual is always evaluated on the curve `r_s = 0`.
//!
//! [`CellSolver::Splitting`] alternates between the two equations. Each step
//! searches along a [`BoxPath`] that starts perpendicular to the gradient of the
//! equation just solved and bends towards a box corner on the other side of the
//! zero level of the equation being solved. The search box shrinks towards the
//! accepted points as the iteration proceeds. If the iteration cap is reached
//! the cell is re-solved from scratch with the bracketing fallback.

use crate::properties::FluidProperties;
use crate::path::{BoxPath, PathResidual};
use crate::residual::{inf_norm, CellResidual, Equation, GradientMethod};
use crate::root_finder::{BracketPolicy, RegulaFalsi};
use crate::solvers::{SolveMethod, SolverResult, TransportConfig};

/// Nested scalar root finding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracketing {
    pub max_iterations: usize,
    pub tolerance: f64,
}

/// Alternating directional searches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Splitting {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub gradient_method: GradientMethod,
    pub fd_epsilon: f64,
    /// Used when the iteration cap is reached
    pub fallback: Bracketing,
}

/// Single-cell strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellSolver {
    Bracketing(Bracketing),
    Splitting(Splitting),
}

/// How a cell solve went.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellReport {
    /// Strategy that produced the accepted state
    pub method: SolveMethod,
    /// Directional searches performed by the splitting method
    pub searches: usize,
    /// True if splitting gave up and bracketing was used
    pub fell_back: bool,
}

/// Accepted state of a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellSolution {
    pub saturation: f64,
    pub concentration: f64,
    pub report: CellReport,
}

impl CellSolver {
    /// Builds the strategy selected by `config`, with bracketing as the splitting fallback.
    pub fn from_config(config: &TransportConfig) -> Self {
        let bracketing =
            Bracketing { max_iterations: config.max_iterations, tolerance: config.tolerance };
        match config.method {
            SolveMethod::Bracketing => CellSolver::Bracketing(bracketing),
            SolveMethod::Splitting => CellSolver::Splitting(Splitting {
                max_iterations: config.max_iterations,
                tolerance: config.tolerance,
                gradient_method: config.gradient_method,
                fd_epsilon: config.fd_epsilon,
                fallback: bracketing,
            }),
        }
    }

    /// Method this strategy starts with.
    pub fn method(&self) -> SolveMethod {
        match self {
            CellSolver::Bracketing(_) => SolveMethod::Bracketing,
            CellSolver::Splitting(_) => SolveMethod::Splitting,
        }
    }

    /// Solves the cell described by `residual`.
    pub fn solve<F>(&self, residual: &CellResidual<'_, F>) -> SolverResult<CellSolution>
    where
        F: FluidProperties + ?Sized,
    {
        match self {
            CellSolver::Bracketing(bracketing) => bracketing.solve(residual),
            CellSolver::Splitting(splitting) => splitting.solve(residual),
        }
    }
}

impl Bracketing {
    fn root_finder(&self) -> RegulaFalsi {
        RegulaFalsi::new(self.max_iterations, self.tolerance)
    }

    /// Solves for `c` on the curve `r_s = 0`, then recovers `s` at the root.
    pub fn solve<F>(&self, residual: &CellResidual<'_, F>) -> SolverResult<CellSolution>
    where
        F: FluidProperties + ?Sized,
    {
        let solver = self.root_finder();
        let c_max_limit = residual.closures().polymer().c_max_limit;
        let root = solver.try_solve(
            |c| residual.residual_c_on_saturation_curve(c, &solver).map(|(r_c, _)| r_c),
            0.0,
            c_max_limit,
        )?;
        let saturation = residual.solve_saturation(root.x, &solver)?.x;

        Ok(CellSolution {
            saturation,
            concentration: root.x,
            report: CellReport { method: SolveMethod::Bracketing, searches: 0, fell_back: false },
        })
    }
}

// Corner of the box on the far side of the zero level of `equation`, given the
// sign of its residual at the current point.
fn target_corner(equation: Equation, residual: f64, x_min: [f64; 2], x_max: [f64; 2]) -> [f64; 2] {
    match (equation, residual < 0.0) {
        (Equation::Saturation, true) => [x_max[0], x_min[1]],
        (Equation::Saturation, false) => [x_min[0], x_max[1]],
        (Equation::Concentration, true) => x_max,
        (Equation::Concentration, false) => x_min,
    }
}

struct SearchBox {
    x_min: [f64; 2],
    x_max: [f64; 2],
}

impl Splitting {
    /// Alternates directional searches until both residuals are below tolerance.
    pub fn solve<F>(&self, residual: &CellResidual<'_, F>) -> SolverResult<CellSolution>
    where
        F: FluidProperties + ?Sized,
    {
        let tol = self.tolerance;
        let start = residual.start();
        let mut x = [start.s0, start.c0];
        let res = residual.residual(x);

        if inf_norm(res) < tol {
            return Ok(self.solution(x, 0));
        }

        let (smin, smax) = residual.sat_range();
        let c_max_limit = residual.closures().polymer().c_max_limit;
        let mut bounds = SearchBox { x_min: [smin, 0.0], x_max: [smax, c_max_limit] };
        let mut searches = 0;

        // Start with the equation that is closer to being satisfied, heading along
        // the diagonal towards the corner that brackets its zero level.
        let mut solved = if res[0].abs() < res[1].abs() {
            Equation::Saturation
        } else {
            Equation::Concentration
        };
        if res[solved.row()].abs() > tol {
            x = self.search(residual, solved, x, None, res, &bounds)?;
            searches += 1;
        }
        let (mut res, mut gradient) =
            residual.gradient(x, solved, self.gradient_method, self.fd_epsilon);

        let mut iterations = 0;
        while inf_norm(res) > tol && iterations < self.max_iterations {
            let next = solved.other();
            let direction = match next {
                Equation::Concentration => {
                    // The zero level of r_s is assumed increasing in the (s, c) plane
                    if res[1] < -tol {
                        bounds.x_min = x;
                    } else if res[1] > tol {
                        bounds.x_max = x;
                    }
                    [-gradient[1], gradient[0]]
                }
                Equation::Saturation => [gradient[1], -gradient[0]],
            };
            x = self.search(residual, next, x, Some(direction), res, &bounds)?;
            searches += 1;
            solved = next;
            (res, gradient) = residual.gradient(x, solved, self.gradient_method, self.fd_epsilon);
            iterations += 1;
            log::trace!(
                "cell {}: splitting iteration {} at s = {}, c = {}, |r| = {:e}",
                residual.cell(),
                iterations,
                x[0],
                x[1],
                inf_norm(res)
            );
        }

        if iterations >= self.max_iterations && inf_norm(res) >= tol {
            log::warn!(
                "cell {}: splitting did not converge in {} iterations (|r| = {:e}), falling back to bracketing",
                residual.cell(),
                iterations,
                inf_norm(res)
            );
            let mut solution = self.fallback.solve(residual)?;
            solution.report.searches = searches;
            solution.report.fell_back = true;
            return Ok(solution);
        }

        Ok(self.solution(x, searches))
    }

    fn solution(&self, x: [f64; 2], searches: usize) -> CellSolution {
        CellSolution {
            saturation: x[0],
            concentration: x[1],
            report: CellReport { method: SolveMethod::Splitting, searches, fell_back: false },
        }
    }

    // One directional search for the zero of `equation` starting from `x`, where
    // the residual is `res`. Without a direction the search heads straight for
    // the target corner.
    fn search<F>(
        &self,
        residual: &CellResidual<'_, F>,
        equation: Equation,
        x: [f64; 2],
        direction: Option<[f64; 2]>,
        res: [f64; 2],
        bounds: &SearchBox,
    ) -> SolverResult<[f64; 2]>
    where
        F: FluidProperties + ?Sized,
    {
        let r = res[equation.row()];
        let end = target_corner(equation, r, bounds.x_min, bounds.x_max);
        let direction = direction.unwrap_or([end[0] - x[0], end[1] - x[1]]);
        let path = BoxPath::new(x, direction, end, bounds.x_min, bounds.x_max);
        let mut along = PathResidual::new(residual, path, equation);
        let at_exit = along.eval(along.path().t_out());
        let crossed = if r < 0.0 { at_exit >= 0.0 } else { at_exit <= 0.0 };
        if crossed {
            along.path_mut().truncate_at_exit();
        }

        let solver = RegulaFalsi::new(self.max_iterations, self.tolerance)
            .with_policy(BracketPolicy::WarnAndContinue);
        let t = solver.solve(|t| along.eval(t), 0.0, along.path().t_max())?.x;
        let r_t = along.eval(t);
        if r_t.abs() > self.tolerance {
            log::warn!(
                "cell {}: directional search on {:?} stopped at |r| = {:e}",
                residual.cell(),
                equation,
                r_t.abs()
            );
        }
        Ok(along.path().point(t))
    }
}
