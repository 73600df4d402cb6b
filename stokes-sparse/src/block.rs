//! Block-structured vectors and operators.
use crate::operator::LinearOperator;
use crate::Real;
use nalgebra::{DVector, DVectorView, DVectorViewMut, Scalar};
use std::error::Error;
use std::ops::Range;

/// A vector partitioned into consecutive blocks.
///
/// The storage is a single contiguous [`DVector`], so a block vector can be handed to any
/// routine operating on plain vectors, while the block layout is available for block-wise
/// operators.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockVector<T: Scalar> {
    values: DVector<T>,
    offsets: Vec<usize>,
}

fn offsets_from_sizes(block_sizes: &[usize]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(block_sizes.len() + 1);
    offsets.push(0);
    for size in block_sizes {
        offsets.push(offsets.last().unwrap() + size);
    }
    offsets
}

impl<T: Real> BlockVector<T> {
    pub fn zeros(block_sizes: &[usize]) -> Self {
        let offsets = offsets_from_sizes(block_sizes);
        Self {
            values: DVector::zeros(*offsets.last().unwrap()),
            offsets,
        }
    }

    /// Creates a new zero vector with the same block layout as `self`.
    pub fn zeros_like(&self) -> Self {
        Self {
            values: DVector::zeros(self.len()),
            offsets: self.offsets.clone(),
        }
    }
}

impl<T: Scalar> BlockVector<T> {
    /// Wraps a plain vector with the given block layout.
    ///
    /// # Panics
    ///
    /// Panics if the sum of the block sizes does not equal the length of the vector.
    pub fn from_vector(block_sizes: &[usize], values: DVector<T>) -> Self {
        let offsets = offsets_from_sizes(block_sizes);
        assert_eq!(
            *offsets.last().unwrap(),
            values.len(),
            "Block sizes must add up to the vector length"
        );
        Self { values, offsets }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn num_blocks(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn block_sizes(&self) -> Vec<usize> {
        self.offsets.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn block_range(&self, block: usize) -> Range<usize> {
        self.offsets[block]..self.offsets[block + 1]
    }

    pub fn block(&self, block: usize) -> DVectorView<T> {
        let range = self.block_range(block);
        self.values.rows(range.start, range.len())
    }

    pub fn block_mut(&mut self, block: usize) -> DVectorViewMut<T> {
        let range = self.block_range(block);
        self.values.rows_mut(range.start, range.len())
    }

    /// Whether `other` is partitioned identically to `self`.
    pub fn has_same_layout(&self, other: &Self) -> bool {
        self.offsets == other.offsets
    }

    pub fn as_vector(&self) -> &DVector<T> {
        &self.values
    }

    pub fn as_vector_mut(&mut self) -> &mut DVector<T> {
        &mut self.values
    }

    pub fn into_vector(self) -> DVector<T> {
        self.values
    }
}

/// A block operator whose blocks are arbitrary linear operators.
///
/// Missing blocks are treated as zero.
pub struct BlockOperator<'a, T: Scalar> {
    row_offsets: Vec<usize>,
    col_offsets: Vec<usize>,
    blocks: Vec<Option<Box<dyn LinearOperator<T> + 'a>>>,
}

impl<'a, T: Real> BlockOperator<'a, T> {
    pub fn new(row_block_sizes: &[usize], col_block_sizes: &[usize]) -> Self {
        let num_blocks = row_block_sizes.len() * col_block_sizes.len();
        Self {
            row_offsets: offsets_from_sizes(row_block_sizes),
            col_offsets: offsets_from_sizes(col_block_sizes),
            blocks: (0..num_blocks).map(|_| None).collect(),
        }
    }

    fn num_block_cols(&self) -> usize {
        self.col_offsets.len() - 1
    }

    fn num_block_rows(&self) -> usize {
        self.row_offsets.len() - 1
    }

    pub fn set_block(&mut self, i: usize, j: usize, operator: impl LinearOperator<T> + 'a) {
        assert!(i < self.num_block_rows() && j < self.num_block_cols());
        let n = self.num_block_cols();
        self.blocks[i * n + j] = Some(Box::new(operator));
    }

    pub fn with_block(mut self, i: usize, j: usize, operator: impl LinearOperator<T> + 'a) -> Self {
        self.set_block(i, j, operator);
        self
    }

    pub fn nrows(&self) -> usize {
        *self.row_offsets.last().unwrap()
    }

    pub fn ncols(&self) -> usize {
        *self.col_offsets.last().unwrap()
    }
}

impl<'a, T: Real> LinearOperator<T> for BlockOperator<'a, T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        assert_eq!(y.len(), self.nrows());
        assert_eq!(x.len(), self.ncols());
        let n = self.num_block_cols();
        for i in 0..self.num_block_rows() {
            let row_start = self.row_offsets[i];
            let row_len = self.row_offsets[i + 1] - row_start;
            let mut y_i = y.rows_mut(row_start, row_len);
            y_i.fill(T::zero());
            let mut contribution = DVector::zeros(row_len);
            for j in 0..n {
                if let Some(block) = &self.blocks[i * n + j] {
                    let col_start = self.col_offsets[j];
                    let col_len = self.col_offsets[j + 1] - col_start;
                    block.apply(DVectorViewMut::from(&mut contribution), x.rows(col_start, col_len))?;
                    y_i += &contribution;
                }
            }
        }
        Ok(())
    }
}

/// Applies the inverse of a block lower-triangular operator by forward substitution.
///
/// The operator is given by the *inverses* of its diagonal blocks and its strictly lower
/// off-diagonal blocks `L_ij`, `i > j`. Applying it to `x` computes
///
/// ```text
/// z_i = D_i^{-1} (x_i - sum_{j < i} L_ij z_j).
/// ```
///
/// For a 2x2 saddle-point problem with `D_0^{-1} = A^{-1}`, `D_1^{-1} = -S^{-1}` and
/// `L_10 = B`, this is exactly the operator `[[A^{-1}, 0], [S^{-1} B A^{-1}, -S^{-1}]]`, but
/// each inverse is applied only once.
pub struct BlockTriangularPreconditioner<'a, T: Scalar> {
    offsets: Vec<usize>,
    diagonal_inverses: Vec<Box<dyn LinearOperator<T> + 'a>>,
    lower: Vec<Option<Box<dyn LinearOperator<T> + 'a>>>,
}

impl<'a, T: Real> BlockTriangularPreconditioner<'a, T> {
    pub fn new(block_sizes: &[usize], diagonal_inverses: Vec<Box<dyn LinearOperator<T> + 'a>>) -> Self {
        assert_eq!(block_sizes.len(), diagonal_inverses.len());
        let n = block_sizes.len();
        Self {
            offsets: offsets_from_sizes(block_sizes),
            diagonal_inverses,
            lower: (0..n * n).map(|_| None).collect(),
        }
    }

    /// Sets the strictly lower block `L_ij`.
    ///
    /// # Panics
    ///
    /// Panics unless `i > j`.
    pub fn with_lower_block(mut self, i: usize, j: usize, operator: impl LinearOperator<T> + 'a) -> Self {
        assert!(i > j, "Only strictly lower blocks can be set");
        let n = self.diagonal_inverses.len();
        self.lower[i * n + j] = Some(Box::new(operator));
        self
    }
}

impl<'a, T: Real> LinearOperator<T> for BlockTriangularPreconditioner<'a, T> {
    fn apply(&self, mut z: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        let n = self.diagonal_inverses.len();
        assert_eq!(x.len(), self.offsets[n]);
        assert_eq!(z.len(), self.offsets[n]);
        let block_range = |i: usize| (self.offsets[i], self.offsets[i + 1] - self.offsets[i]);

        for i in 0..n {
            let (start, len) = block_range(i);
            let mut rhs = x.rows(start, len).clone_owned();
            let mut contribution = DVector::zeros(len);
            for j in 0..i {
                if let Some(block) = &self.lower[i * n + j] {
                    let (col_start, col_len) = block_range(j);
                    block.apply(DVectorViewMut::from(&mut contribution), z.rows(col_start, col_len))?;
                    rhs -= &contribution;
                }
            }
            self.diagonal_inverses[i].apply(z.rows_mut(start, len), DVectorView::from(&rhs))?;
        }
        Ok(())
    }
}
