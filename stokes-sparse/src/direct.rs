//! Dense direct solvers, for small systems only.
use crate::operator::LinearOperator;
use crate::{Real, SetupError};
use nalgebra::{Cholesky, DMatrix, DVectorView, DVectorViewMut, Dyn, LU};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;

#[derive(Debug, Clone)]
enum Factorization<T: Real> {
    Cholesky(Cholesky<T, Dyn>),
    Lu(LU<T, Dyn, Dyn>),
}

/// A dense factorization whose application computes `y = A^{-1} x`.
#[derive(Debug, Clone)]
pub struct DirectSolver<T: Real> {
    factorization: Factorization<T>,
    dim: usize,
}

impl<T: Real> DirectSolver<T> {
    /// Factorizes `matrix` with partial-pivoting LU.
    pub fn lu(matrix: DMatrix<T>) -> Result<Self, SetupError> {
        if !matrix.is_square() {
            return Err(SetupError::NonSquare {
                nrows: matrix.nrows(),
                ncols: matrix.ncols(),
            });
        }
        let dim = matrix.nrows();
        let lu = matrix.lu();
        if !lu.is_invertible() {
            return Err(SetupError::Singular);
        }
        Ok(Self {
            factorization: Factorization::Lu(lu),
            dim,
        })
    }

    /// Attempts a Cholesky factorization, falling back to LU if `matrix` is not positive
    /// definite.
    pub fn cholesky_or_lu(matrix: DMatrix<T>) -> Result<Self, SetupError> {
        if !matrix.is_square() {
            return Err(SetupError::NonSquare {
                nrows: matrix.nrows(),
                ncols: matrix.ncols(),
            });
        }
        let dim = matrix.nrows();
        match Cholesky::new(matrix.clone()) {
            Some(cholesky) => Ok(Self {
                factorization: Factorization::Cholesky(cholesky),
                dim,
            }),
            None => Self::lu(matrix),
        }
    }

    pub fn lu_from_csr(matrix: &CsrMatrix<T>) -> Result<Self, SetupError> {
        Self::lu(DMatrix::from(matrix))
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn is_cholesky(&self) -> bool {
        matches!(self.factorization, Factorization::Cholesky(_))
    }
}

impl<T: Real> LinearOperator<T> for DirectSolver<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        assert_eq!(x.len(), self.dim);
        assert_eq!(y.len(), self.dim);
        match &self.factorization {
            Factorization::Cholesky(cholesky) => y.copy_from(&cholesky.solve(&x)),
            Factorization::Lu(lu) => {
                let solution = lu.solve(&x).ok_or(SetupError::Singular)?;
                y.copy_from(&solution);
            }
        }
        Ok(())
    }
}
