//! # Polyflow: Reordered Implicit Transport for Polymer Flooding
//!
//! Advances water saturation and polymer concentration through a porous
//! medium by one implicit Euler step, for a fixed total flux field on an
//! unstructured grid. Polymer thickens the water phase through a
//! Todd-Longstaff mixing rule and is retained irreversibly on the rock.
//!
//! The step is solved cell by cell. Cells are ordered so that every upstream
//! neighbour is solved first ([`UpwindOrdering`]); each cell then has two
//! unknowns `(s, c)` and two residual equations, solved either by nested
//! bracketing or by alternating directional searches. Cells whose fluxes form
//! a loop are grouped and solved by repeated sweeps.
//!
//! ## Example
//!
//! ```
//! use polyflow::{
//!     CoreyFluid, LinearTable, PolymerProperties, PolymerState, PolymerTransport, SolveMethod,
//!     StepInput, TransportConfig, UnstructuredGrid, UpwindOrdering,
//! };
//!
//! let n = 10;
//! let grid = UnstructuredGrid::cartesian_1d(n);
//! let porosity = vec![0.25; n];
//! let pore_volume = vec![0.1; n];
//!
//! let fluid = CoreyFluid::new(1.0e-3, 5.0e-3).with_residuals(0.15, 0.2);
//! let polymer = PolymerProperties::new(
//!     2.0,    // c_max_limit
//!     0.6,    // Todd-Longstaff omega
//!     0.05,   // dead pore space
//!     2600.0, // rock density
//!     LinearTable::new(vec![0.0, 1.0, 2.0], vec![1.0, 6.0, 20.0]).unwrap(),
//!     LinearTable::new(vec![0.0, 2.0], vec![0.0, 1.0e-5]).unwrap(),
//! )
//! .unwrap();
//!
//! let config = TransportConfig::new().with_method(SolveMethod::Splitting);
//! let mut transport =
//!     PolymerTransport::new(&grid, &porosity, &pore_volume, &fluid, &polymer, config).unwrap();
//!
//! // Inject at cell 0, produce at the last cell
//! let rate = 0.05;
//! let mut darcyflux = vec![rate; n + 1];
//! darcyflux[0] = 0.0;
//! darcyflux[n] = 0.0;
//! let mut source = vec![0.0; n];
//! source[0] = rate;
//! source[n - 1] = -rate;
//!
//! let mut state = PolymerState::uniform(n, 0.15, 0.0);
//! for _ in 0..5 {
//!     let input = StepInput { darcyflux: &darcyflux, source: &source, dt: 0.1, inflow_c: 1.5 };
//!     transport.solve(&input, &mut state, &UpwindOrdering).unwrap();
//! }
//! assert!(state.saturation[0] > state.saturation[n - 1]);
//! assert!(state.concentration.iter().all(|&c| (0.0..=2.0).contains(&c)));
//! ```
//!
//! ## Optional Features
//!
//! - **`autodiff`** (default): dual-number residuals using `num-dual`. Enables
//!   [`GradientMethod::AutoDiff`] for the cell Jacobian and the
//!   [`fully_implicit`] Newton solver.
//!
//! ```toml
//! [dependencies]
//! polyflow = { version = "0.1", default-features = false }
//! ```

pub mod closures;
pub mod grid;
pub mod ordering;
pub mod path;
pub mod properties;
pub mod residual;
pub mod root_finder;
pub mod solvers;
pub mod transport;

// Optional feature modules
#[cfg(feature = "autodiff")]
pub mod autodiff;

#[cfg(feature = "autodiff")]
pub mod fully_implicit;

pub use closures::Closures;
pub use grid::UnstructuredGrid;
pub use ordering::{CellGroups, CellOrdering, UpwindOrdering};
pub use properties::{CoreyFluid, FluidProperties, LinearTable, PolymerProperties, RelPerm};
pub use residual::{CellResidual, GradientMethod};
pub use root_finder::{BracketPolicy, RegulaFalsi, Root, RootError};
pub use solvers::{SolveMethod, SolverError, SolverResult, TransportConfig};
pub use transport::{PolymerState, PolymerTransport, StepInput, StepReport};

#[cfg(feature = "autodiff")]
pub use fully_implicit::{FullyImplicitStep, NewtonSolver, SolverParameters};
