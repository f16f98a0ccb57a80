//! Upstream-first ordering of cells.
//!
//! Implicit upwind transport is lower block-triangular once the cells are
//! ordered along the flow: a cell depends only on its upstream neighbours.
//! Cells whose fluxes form a loop end up in the same strongly connected
//! component and must be solved together.
//!
//! [`UpwindOrdering`] builds the upstream graph from the face fluxes and runs
//! Tarjan's algorithm on it. Tarjan emits a component only after every
//! component reachable from it, and the graph's edges point from a cell to its
//! upstream neighbours, so the components come out upstream first.

use crate::grid::UnstructuredGrid;

/// Cells grouped into strongly connected components, in solve order.
///
/// Stored like the grid's cell-to-face table: the cells of group `g` are
/// `cells[offsets[g]..offsets[g + 1]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellGroups {
    cells: Vec<usize>,
    offsets: Vec<usize>,
}

impl CellGroups {
    /// Builds groups from explicit lists.
    pub fn from_groups<I>(groups: I) -> Self
    where
        I: IntoIterator<Item = Vec<usize>>,
    {
        let mut cells = Vec::new();
        let mut offsets = vec![0];
        for group in groups {
            cells.extend(group);
            offsets.push(cells.len());
        }
        CellGroups { cells, offsets }
    }

    /// Number of groups.
    pub fn num_groups(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Cells of group `index`.
    pub fn group(&self, index: usize) -> &[usize] {
        &self.cells[self.offsets[index]..self.offsets[index + 1]]
    }

    /// Groups in solve order.
    pub fn iter(&self) -> impl Iterator<Item = &[usize]> + '_ {
        self.offsets.windows(2).map(move |w| &self.cells[w[0]..w[1]])
    }

    /// All cells in solve order.
    pub fn sequence(&self) -> &[usize] {
        &self.cells
    }
}

/// Supplies the order in which cell groups are solved for a given flux field.
pub trait CellOrdering {
    fn order(&self, grid: &UnstructuredGrid, darcyflux: &[f64]) -> CellGroups;
}

/// Tarjan ordering of the upwind graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpwindOrdering;

impl UpwindOrdering {
    /// Upstream neighbours of every cell.
    pub fn upstream_neighbours(grid: &UnstructuredGrid, darcyflux: &[f64]) -> Vec<Vec<usize>> {
        let mut upstream = vec![Vec::new(); grid.num_cells()];
        for face in 0..grid.num_faces() {
            let flux = darcyflux[face];
            if let [Some(first), Some(second)] = grid.face_cells(face) {
                if flux > 0.0 {
                    upstream[second].push(first);
                } else if flux < 0.0 {
                    upstream[first].push(second);
                }
            }
        }
        upstream
    }
}

impl CellOrdering for UpwindOrdering {
    fn order(&self, grid: &UnstructuredGrid, darcyflux: &[f64]) -> CellGroups {
        strongly_connected_components(&Self::upstream_neighbours(grid, darcyflux))
    }
}

/// Iterative Tarjan; each component is emitted after all components reachable from it.
fn strongly_connected_components(adjacency: &[Vec<usize>]) -> CellGroups {
    let n = adjacency.len();
    let mut index: Vec<Option<usize>> = vec![None; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut next_index = 0;

    let mut cells = Vec::with_capacity(n);
    let mut offsets = vec![0];

    // (node, next edge to explore)
    let mut call_stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if index[root].is_some() {
            continue;
        }
        index[root] = Some(next_index);
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        call_stack.push((root, 0));

        while let Some(&(node, edge)) = call_stack.last() {
            if let Some(&next) = adjacency[node].get(edge) {
                if let Some(top) = call_stack.last_mut() {
                    top.1 += 1;
                }
                match index[next] {
                    None => {
                        index[next] = Some(next_index);
                        lowlink[next] = next_index;
                        next_index += 1;
                        stack.push(next);
                        on_stack[next] = true;
                        call_stack.push((next, 0));
                    }
                    Some(next_idx) if on_stack[next] => {
                        lowlink[node] = lowlink[node].min(next_idx);
                    }
                    Some(_) => {}
                }
                continue;
            }

            call_stack.pop();
            if let Some(&(parent, _)) = call_stack.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[node]);
            }
            if Some(lowlink[node]) == index[node] {
                let start = cells.len();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    cells.push(member);
                    if member == node {
                        break;
                    }
                }
                // Discovery order within the component
                cells[start..].reverse();
                offsets.push(cells.len());
            }
        }
    }

    CellGroups { cells, offsets }
}
