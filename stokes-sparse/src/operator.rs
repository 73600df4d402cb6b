//! The [`LinearOperator`] capability and a few elementary operators and combinators.
use crate::Real;
use nalgebra::{DMatrix, DVectorView, DVectorViewMut, Scalar};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;

/// A linear map `y = A x`.
///
/// The operator does not need to be backed by a matrix: preconditioners and inner solves
/// (see [`InverseOperator`](crate::cg::InverseOperator)) are linear operators too.
pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>>;
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T, A> LinearOperator<T> for Box<A>
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T: Real> LinearOperator<T> for DMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        assert_eq!(self.ncols(), x.len(), "Operator and input dimensions must match");
        assert_eq!(self.nrows(), y.len(), "Operator and output dimensions must match");
        y.gemv(T::one(), self, &x, T::zero());
        Ok(())
    }
}

impl<T: Real> LinearOperator<T> for CsrMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        assert_eq!(self.ncols(), x.len(), "Operator and input dimensions must match");
        assert_eq!(self.nrows(), y.len(), "Operator and output dimensions must match");
        for (i, row) in self.row_iter().enumerate() {
            let mut y_i = T::zero();
            for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
                y_i += a_ij * x[j];
            }
            y[i] = y_i;
        }
        Ok(())
    }
}

pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.copy_from(&x);
        Ok(())
    }
}

/// `y = scale * A x`.
#[derive(Debug, Clone)]
pub struct ScaledOperator<T, A> {
    scale: T,
    operator: A,
}

impl<T, A> ScaledOperator<T, A> {
    pub fn new(scale: T, operator: A) -> Self {
        Self { scale, operator }
    }
}

impl<T, A> LinearOperator<T> for ScaledOperator<T, A>
where
    T: Real,
    A: LinearOperator<T>,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        self.operator.apply(y.rows_mut(0, y.len()), x)?;
        y *= self.scale;
        Ok(())
    }
}
