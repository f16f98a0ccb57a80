//! Read-only unstructured grid connectivity.
//!
//! The transport solver only needs the topology of the mesh: which faces bound
//! each cell and which two cells share each face. Geometry (pore volumes,
//! porosity) is passed separately to [`PolymerTransport`](crate::PolymerTransport).
//!
//! Connectivity is stored the same way as in classic reservoir codes:
//!
//! - `face_cells[f] = [c0, c1]`, where a `None` entry marks the exterior side
//!   of a boundary face. A positive Darcy flux on face `f` flows from `c0` to `c1`.
//! - `cell_faces[cell_facepos[c]..cell_facepos[c + 1]]` lists the faces of cell `c`
//!   (compressed row storage).
//!
//! # Example
//!
//! ```
//! use polyflow::UnstructuredGrid;
//!
//! // Three cells in a row: |0|1|2|
//! let grid = UnstructuredGrid::cartesian_1d(3);
//! assert_eq!(grid.num_cells(), 3);
//! assert_eq!(grid.num_faces(), 4);
//! assert_eq!(grid.face_cells(1), [Some(0), Some(1)]);
//! ```

use crate::solvers::{SolverError, SolverResult};

/// Cell/face adjacency of an unstructured grid.
#[derive(Debug, Clone, PartialEq)]
pub struct UnstructuredGrid {
    num_cells: usize,
    face_cells: Vec<[Option<usize>; 2]>,
    cell_facepos: Vec<usize>,
    cell_faces: Vec<usize>,
}

/// One face seen from a given cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellFlux {
    /// Face index
    pub face: usize,
    /// Flux oriented so that it is positive when leaving the cell
    pub outflux: f64,
    /// Cell on the other side, `None` for the exterior
    pub neighbour: Option<usize>,
}

impl UnstructuredGrid {
    /// Builds the grid from the face-to-cell table.
    ///
    /// The cell-to-face table is derived in face order, so the faces of each
    /// cell are listed by increasing face index.
    pub fn from_face_cells(
        num_cells: usize,
        face_cells: Vec<[Option<usize>; 2]>,
    ) -> SolverResult<Self> {
        let mut counts = vec![0usize; num_cells];
        for (face, pair) in face_cells.iter().enumerate() {
            if pair[0].is_none() && pair[1].is_none() {
                return Err(SolverError::InvalidParameter(format!(
                    "face {} has no adjacent cell",
                    face
                )));
            }
            for cell in pair.iter().flatten() {
                if *cell >= num_cells {
                    return Err(SolverError::InvalidParameter(format!(
                        "face {} references cell {} but the grid has {} cells",
                        face, cell, num_cells
                    )));
                }
                counts[*cell] += 1;
            }
        }

        let mut cell_facepos = Vec::with_capacity(num_cells + 1);
        cell_facepos.push(0);
        for count in &counts {
            let last = cell_facepos[cell_facepos.len() - 1];
            cell_facepos.push(last + count);
        }

        let mut fill = cell_facepos.clone();
        let mut cell_faces = vec![0usize; cell_facepos[num_cells]];
        for (face, pair) in face_cells.iter().enumerate() {
            for cell in pair.iter().flatten() {
                cell_faces[fill[*cell]] = face;
                fill[*cell] += 1;
            }
        }

        Ok(UnstructuredGrid { num_cells, face_cells, cell_facepos, cell_faces })
    }

    /// A one-dimensional row of `n` cells with a boundary face at each end.
    ///
    /// Face `i` separates cell `i - 1` (left) from cell `i` (right).
    pub fn cartesian_1d(n: usize) -> Self {
        let face_cells = (0..=n)
            .map(|f| {
                let left = if f == 0 { None } else { Some(f - 1) };
                let right = if f == n { None } else { Some(f) };
                [left, right]
            })
            .collect();

        let mut cell_facepos = Vec::with_capacity(n + 1);
        let mut cell_faces = Vec::with_capacity(2 * n);
        for cell in 0..n {
            cell_facepos.push(2 * cell);
            cell_faces.push(cell);
            cell_faces.push(cell + 1);
        }
        cell_facepos.push(2 * n);

        UnstructuredGrid { num_cells: n, face_cells, cell_facepos, cell_faces }
    }

    /// Number of cells.
    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    /// Number of faces.
    pub fn num_faces(&self) -> usize {
        self.face_cells.len()
    }

    /// The two cells adjacent to `face`.
    pub fn face_cells(&self, face: usize) -> [Option<usize>; 2] {
        self.face_cells[face]
    }

    /// Faces bounding `cell`.
    pub fn cell_faces(&self, cell: usize) -> &[usize] {
        &self.cell_faces[self.cell_facepos[cell]..self.cell_facepos[cell + 1]]
    }

    /// Iterates over the faces of `cell`, orienting each face flux so that it
    /// is positive when leaving the cell.
    pub fn cell_fluxes<'a>(
        &'a self,
        cell: usize,
        darcyflux: &'a [f64],
    ) -> impl Iterator<Item = CellFlux> + 'a {
        self.cell_faces(cell).iter().map(move |&face| {
            let [first, second] = self.face_cells[face];
            if first == Some(cell) {
                CellFlux { face, outflux: darcyflux[face], neighbour: second }
            } else {
                CellFlux { face, outflux: -darcyflux[face], neighbour: first }
            }
        })
    }
}
