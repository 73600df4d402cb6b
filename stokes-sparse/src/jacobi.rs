use crate::operator::LinearOperator;
use crate::{csr_diagonal, Real, SetupError};
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;

/// Damped Jacobi preconditioner `y = omega * D^{-1} x`.
#[derive(Debug, Clone)]
pub struct Jacobi<T: Real> {
    inverse_diagonal: DVector<T>,
    omega: T,
}

impl<T: Real> Jacobi<T> {
    /// Builds an undamped Jacobi preconditioner from the diagonal of `matrix`.
    pub fn from_csr(matrix: &CsrMatrix<T>) -> Result<Self, SetupError> {
        let diagonal = csr_diagonal(matrix)?;
        Ok(Self {
            inverse_diagonal: diagonal.map(|d_i| T::one() / d_i),
            omega: T::one(),
        })
    }

    pub fn with_relaxation(self, omega: T) -> Self {
        Self { omega, ..self }
    }

    pub fn inverse_diagonal(&self) -> &DVector<T> {
        &self.inverse_diagonal
    }

    pub fn relaxation(&self) -> T {
        self.omega
    }
}

impl<T: Real> LinearOperator<T> for Jacobi<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        assert_eq!(x.len(), self.inverse_diagonal.len());
        assert_eq!(y.len(), self.inverse_diagonal.len());
        for i in 0..x.len() {
            y[i] = self.omega * self.inverse_diagonal[i] * x[i];
        }
        Ok(())
    }
}
