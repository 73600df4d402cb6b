use crate::assembly::{LocalMatrix, LocalVector};
use crate::constraints::AffineConstraints;
use crate::dofs::DofHandler;
use crate::space::DOFS_PER_CELL;
use eyre::eyre;
use nalgebra::DVector;
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use std::ops::Range;

/// Number of cells whose local contributions are buffered at a time.
const CELL_CHUNK_SIZE: usize = 1024;

/// Expresses every cell-local degree of freedom in terms of unconstrained global degrees of
/// freedom.
#[derive(Debug, Clone)]
pub struct CondensedCellDofs {
    entries: Vec<Vec<(usize, f64)>>,
}

impl CondensedCellDofs {
    pub fn new(cell_dofs: &[usize; DOFS_PER_CELL], constraints: &AffineConstraints) -> Self {
        let entries = cell_dofs
            .iter()
            .map(|&dof| {
                let mut entries = Vec::new();
                constraints.resolve_into(dof, &mut entries);
                entries
            })
            .collect();
        Self { entries }
    }

    /// The `(global dof, weight)` pairs of local degree of freedom `i`.
    pub fn local(&self, i: usize) -> &[(usize, f64)] {
        &self.entries[i]
    }

    /// All distinct global degrees of freedom coupled through this cell, sorted.
    pub fn global_dofs(&self) -> Vec<usize> {
        let mut dofs: Vec<usize> = self.entries.iter().flatten().map(|(dof, _)| *dof).collect();
        dofs.sort_unstable();
        dofs.dedup();
        dofs
    }
}

/// Builds the sparsity pattern of the condensed system.
///
/// Every diagonal entry is present, so that constrained rows can receive a unit diagonal.
pub fn assemble_pattern(dofs: &DofHandler, constraints: &AffineConstraints) -> eyre::Result<SparsityPattern> {
    let n = dofs.n_dofs();
    let cell_couplings: Vec<Vec<usize>> = (0..dofs.num_cells())
        .into_par_iter()
        .with_min_len(50)
        .map(|cell| CondensedCellDofs::new(dofs.cell_dofs(cell), constraints).global_dofs())
        .collect();

    let num_total_coordinates = n + cell_couplings.iter().map(|c| c.len() * c.len()).sum::<usize>();
    let mut coordinates = Vec::with_capacity(num_total_coordinates);
    coordinates.extend((0..n).map(|i| (i, i)));
    for coupling in &cell_couplings {
        for &i in coupling {
            for &j in coupling {
                coordinates.push((i, j));
            }
        }
    }
    coordinates.par_sort_unstable();

    let mut row_offsets = Vec::with_capacity(n + 1);
    let mut column_indices = Vec::new();
    row_offsets.push(0);
    let mut current_row = 0;
    let mut prev_col = None;
    for (i, j) in coordinates {
        while i > current_row {
            row_offsets.push(column_indices.len());
            current_row += 1;
            prev_col = None;
        }
        // Only add column if it is not a duplicate
        if Some(j) != prev_col {
            column_indices.push(j);
            prev_col = Some(j);
        }
    }
    for _ in current_row..n {
        row_offsets.push(column_indices.len());
    }

    SparsityPattern::try_from_offsets_and_indices(n, n, row_offsets, column_indices)
        .map_err(|err| eyre!("failed to build sparsity pattern: {}", err))
}

/// Computes cell-local contributions in parallel and hands them to `scatter` sequentially, in
/// increasing cell order.
pub fn assemble_cells_in_order<L, F, S>(cells: Range<usize>, compute: F, mut scatter: S) -> eyre::Result<()>
where
    L: Send,
    F: Fn(usize) -> eyre::Result<L> + Sync,
    S: FnMut(usize, L) -> eyre::Result<()>,
{
    let mut start = cells.start;
    while start < cells.end {
        let end = (start + CELL_CHUNK_SIZE).min(cells.end);
        let locals = (start..end)
            .into_par_iter()
            .map(|cell| compute(cell).map(|local| (cell, local)))
            .collect::<eyre::Result<Vec<_>>>()?;
        for (cell, local) in locals {
            scatter(cell, local)?;
        }
        start = end;
    }
    Ok(())
}

/// Adds a cell vector to a global vector, distributing contributions of constrained degrees of
/// freedom to the degrees of freedom they depend on.
pub fn distribute_local_vector(condensed: &CondensedCellDofs, local: &LocalVector, global: &mut DVector<f64>) {
    for i in 0..DOFS_PER_CELL {
        for &(dof, weight) in condensed.local(i) {
            global[dof] += weight * local[i];
        }
    }
}

/// Adds a cell matrix to a global matrix, with the same constraint treatment as
/// [`distribute_local_vector`] applied to rows and columns.
pub fn distribute_local_matrix(
    condensed: &CondensedCellDofs,
    local: &LocalMatrix,
    global: &mut CsrMatrix<f64>,
) -> eyre::Result<()> {
    let (offsets, indices, values) = global.csr_data_mut();
    for i in 0..DOFS_PER_CELL {
        for &(row, row_weight) in condensed.local(i) {
            let row_range = offsets[row]..offsets[row + 1];
            let row_columns = &indices[row_range.clone()];
            for j in 0..DOFS_PER_CELL {
                let a_ij = local[(i, j)];
                if a_ij == 0.0 {
                    continue;
                }
                for &(col, col_weight) in condensed.local(j) {
                    let k = row_columns
                        .binary_search(&col)
                        .map_err(|_| eyre!("entry ({}, {}) is missing from the sparsity pattern", row, col))?;
                    values[row_range.start + k] += row_weight * col_weight * a_ij;
                }
            }
        }
    }
    Ok(())
}

/// Sets the diagonal entry of every constrained row to `value`.
pub fn set_constrained_diagonal(
    matrix: &mut CsrMatrix<f64>,
    constraints: &AffineConstraints,
    value: f64,
) -> eyre::Result<()> {
    let (offsets, indices, values) = matrix.csr_data_mut();
    for dof in constraints.constrained_dofs() {
        let k = indices[offsets[dof]..offsets[dof + 1]]
            .binary_search(&dof)
            .map_err(|_| eyre!("diagonal entry {} is missing from the sparsity pattern", dof))?;
        values[offsets[dof] + k] = value;
    }
    Ok(())
}

/// Extracts the sub-matrix with the given row and column ranges.
pub fn extract_block(matrix: &CsrMatrix<f64>, rows: Range<usize>, cols: Range<usize>) -> eyre::Result<CsrMatrix<f64>> {
    let mut offsets = Vec::with_capacity(rows.len() + 1);
    let mut indices = Vec::new();
    let mut values = Vec::new();
    offsets.push(0);
    for i in rows.clone() {
        let row = matrix.row(i);
        for (&j, &v) in row.col_indices().iter().zip(row.values()) {
            if cols.contains(&j) {
                indices.push(j - cols.start);
                values.push(v);
            }
        }
        offsets.push(indices.len());
    }
    CsrMatrix::try_from_csr_data(rows.len(), cols.len(), offsets, indices, values)
        .map_err(|err| eyre!("failed to extract block: {}", err))
}
