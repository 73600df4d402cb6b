//! Composable linear operators, block structures and iterative solvers used by `stokes-dae`.
//!
//! Everything in this crate is expressed in terms of the [`LinearOperator`] capability: sparse
//! matrices, dense factorizations, preconditioners and even inner Krylov solves all implement
//! it, so that block operators and block preconditioners can be composed without knowing the
//! concrete types involved.
use nalgebra::RealField;
use std::error::Error;
use std::fmt;

pub mod amg;
pub mod block;
pub mod cg;
pub mod direct;
pub mod fgmres;
pub mod jacobi;
pub mod operator;

pub use block::{BlockOperator, BlockTriangularPreconditioner, BlockVector};
pub use operator::{IdentityOperator, LinearOperator, ScaledOperator};

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

/// Trait alias for the scalar types supported by the solvers in this crate.
pub trait Real: RealField + Copy {}

impl<T: RealField + Copy> Real for T {}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(Box<dyn Error>),
    PreconditionerError(Box<dyn Error>),
    StoppingCriterionError(Box<dyn Error>),
    IndefiniteOperator,
    IndefinitePreconditioner,
    /// The Krylov basis collapsed before the tolerance was reached.
    Breakdown,
    MaxIterationsReached {
        max_iter: usize,
    },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => {
                write!(f, "Error applying operator: ")?;
                err.fmt(f)
            }
            Self::PreconditionerError(err) => {
                write!(f, "Error applying preconditioner: ")?;
                err.fmt(f)
            }
            Self::StoppingCriterionError(err) => {
                write!(f, "Error evaluating stopping criterion: ")?;
                err.fmt(f)
            }
            Self::IndefiniteOperator => write!(f, "Operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "Indefinite preconditioner"),
            Self::Breakdown => write!(f, "Krylov subspace breakdown"),
            Self::MaxIterationsReached { max_iter } => {
                write!(f, "Max iterations ({}) reached.", max_iter)
            }
        }
    }
}

/// Failure of an iterative solve, together with the solver output at the time of failure.
#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError<Output> {
    pub output: Output,
    pub kind: SolveErrorKind,
}

impl<Output> SolveError<Output> {
    pub(crate) fn new(output: Output, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }

    /// Whether the failure is a plain iteration-budget exhaustion.
    pub fn is_max_iterations(&self) -> bool {
        matches!(self.kind, SolveErrorKind::MaxIterationsReached { .. })
    }
}

impl<Output: IterationCount> fmt::Display for SolveError<Output> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Solve failed after {} iterations. ", self.output.iterations())?;
        write!(f, "Error: {}", self.kind)
    }
}

impl<Output: IterationCount + fmt::Debug> Error for SolveError<Output> {}

/// Solver outputs that report how many iterations were performed.
pub trait IterationCount {
    fn iterations(&self) -> usize;
}

/// Errors that can occur while building a preconditioner from a matrix.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SetupError {
    /// A zero (or missing) diagonal entry was found in the given row.
    ZeroDiagonal { row: usize },
    /// The matrix is not square.
    NonSquare { nrows: usize, ncols: usize },
    /// A dense factorization failed because the matrix is singular.
    Singular,
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroDiagonal { row } => write!(f, "zero diagonal entry in row {}", row),
            Self::NonSquare { nrows, ncols } => write!(f, "matrix is not square ({}x{})", nrows, ncols),
            Self::Singular => write!(f, "matrix is singular"),
        }
    }
}

impl Error for SetupError {}

/// Extracts the diagonal of a CSR matrix, reporting missing or zero entries.
pub(crate) fn csr_diagonal<T: Real>(matrix: &nalgebra_sparse::CsrMatrix<T>) -> Result<nalgebra::DVector<T>, SetupError> {
    if matrix.nrows() != matrix.ncols() {
        return Err(SetupError::NonSquare {
            nrows: matrix.nrows(),
            ncols: matrix.ncols(),
        });
    }
    let mut diagonal = nalgebra::DVector::zeros(matrix.nrows());
    for (i, row) in matrix.row_iter().enumerate() {
        let d = row
            .col_indices()
            .binary_search(&i)
            .map(|k| row.values()[k])
            .unwrap_or_else(|_| T::zero());
        if d == T::zero() {
            return Err(SetupError::ZeroDiagonal { row: i });
        }
        diagonal[i] = d;
    }
    Ok(diagonal)
}
