//! Restarted flexible GMRES with right preconditioning.
//!
//! In contrast to standard GMRES, the flexible variant stores the preconditioned basis vectors
//! `z_j = P v_j` explicitly. The preconditioner is therefore allowed to change between
//! iterations, which makes it possible to use inner iterative solves (for example
//! [`InverseOperator`](crate::cg::InverseOperator)) as preconditioners.
use crate::operator::LinearOperator;
use crate::{IterationCount, Real, SolveError, SolveErrorKind};
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};

#[derive(Debug, Clone, PartialEq)]
pub struct FgmresOutput<T> {
    /// Total number of Arnoldi steps over all restart cycles.
    pub num_iterations: usize,
    /// Norm of the true residual `b - A x` at exit.
    pub residual_norm: T,
    pub num_restarts: usize,
}

impl<T> IterationCount for FgmresOutput<T> {
    fn iterations(&self) -> usize {
        self.num_iterations
    }
}

pub type FgmresError<T> = SolveError<FgmresOutput<T>>;

/// Restarted FGMRES solver.
///
/// The solve has converged when the residual norm `||b - A x||` drops to or below the absolute
/// `tolerance`.
#[derive(Debug, Clone)]
pub struct FlexibleGmres<T> {
    restart: usize,
    max_iter: usize,
    tolerance: T,
}

impl<T: Real> Default for FlexibleGmres<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Real> FlexibleGmres<T> {
    pub fn new() -> Self {
        Self {
            restart: 30,
            max_iter: 1000,
            tolerance: T::from_subset(&1e-8),
        }
    }

    /// Sets the maximum Krylov dimension per restart cycle.
    pub fn with_restart(self, restart: usize) -> Self {
        assert!(restart > 0, "Restart length must be positive");
        Self { restart, ..self }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }

    pub fn with_tolerance(self, tolerance: T) -> Self {
        Self { tolerance, ..self }
    }

    pub fn restart(&self) -> usize {
        self.restart
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    pub fn tolerance(&self) -> T {
        self.tolerance
    }

    /// Solves `A x = b`, using the contents of `x` as the initial guess.
    pub fn solve_with_guess<'b>(
        &self,
        operator: &dyn LinearOperator<T>,
        preconditioner: &dyn LinearOperator<T>,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<FgmresOutput<T>, FgmresError<T>> {
        self.solve_with_guess_(operator, preconditioner, b.into(), x.into())
    }

    fn residual(
        operator: &dyn LinearOperator<T>,
        b: &DVectorView<T>,
        x: &DVectorViewMut<T>,
        r: &mut DVector<T>,
    ) -> Result<T, SolveErrorKind> {
        operator
            .apply(DVectorViewMut::from(&mut *r), x.rows(0, x.len()))
            .map_err(SolveErrorKind::OperatorError)?;
        r.axpy(T::one(), b, -T::one());
        Ok(r.norm())
    }

    fn solve_with_guess_(
        &self,
        operator: &dyn LinearOperator<T>,
        preconditioner: &dyn LinearOperator<T>,
        b: DVectorView<T>,
        mut x: DVectorViewMut<T>,
    ) -> Result<FgmresOutput<T>, FgmresError<T>> {
        assert_eq!(b.len(), x.len());
        let n = b.len();
        let m = self.restart;

        let mut output = FgmresOutput {
            num_iterations: 0,
            residual_norm: T::zero(),
            num_restarts: 0,
        };

        let mut r = DVector::zeros(n);
        let mut beta = match Self::residual(operator, &b, &x, &mut r) {
            Ok(norm) => norm,
            Err(kind) => return Err(SolveError::new(output, kind)),
        };
        output.residual_norm = beta;

        let mut v: Vec<DVector<T>> = Vec::with_capacity(m + 1);
        let mut z: Vec<DVector<T>> = Vec::with_capacity(m);
        let mut h = DMatrix::zeros(m + 1, m);
        let mut g = DVector::zeros(m + 1);
        let mut cs = DVector::<T>::zeros(m);
        let mut sn = DVector::<T>::zeros(m);
        let mut w = DVector::zeros(n);

        loop {
            if beta <= self.tolerance {
                return Ok(output);
            }
            if output.num_iterations >= self.max_iter {
                let max_iter = self.max_iter;
                return Err(SolveError::new(output, SolveErrorKind::MaxIterationsReached { max_iter }));
            }

            v.clear();
            z.clear();
            h.fill(T::zero());
            g.fill(T::zero());
            g[0] = beta;
            v.push(&r / beta);

            let mut k = 0;
            while k < m && output.num_iterations < self.max_iter {
                let mut z_k = DVector::zeros(n);
                if let Err(err) = preconditioner.apply(DVectorViewMut::from(&mut z_k), DVectorView::from(&v[k])) {
                    return Err(SolveError::new(output, SolveErrorKind::PreconditionerError(err)));
                }
                if let Err(err) = operator.apply(DVectorViewMut::from(&mut w), DVectorView::from(&z_k)) {
                    return Err(SolveError::new(output, SolveErrorKind::OperatorError(err)));
                }
                z.push(z_k);

                // Modified Gram-Schmidt
                for (i, v_i) in v.iter().enumerate() {
                    let h_ik = w.dot(v_i);
                    h[(i, k)] = h_ik;
                    w.axpy(-h_ik, v_i, T::one());
                }
                let w_norm = w.norm();
                h[(k + 1, k)] = w_norm;

                for i in 0..k {
                    let (c, s) = (cs[i], sn[i]);
                    let h_i = h[(i, k)];
                    let h_ip1 = h[(i + 1, k)];
                    h[(i, k)] = c * h_i + s * h_ip1;
                    h[(i + 1, k)] = -s * h_i + c * h_ip1;
                }

                let denom = h[(k, k)].hypot(h[(k + 1, k)]);
                if denom == T::zero() {
                    return Err(SolveError::new(output, SolveErrorKind::Breakdown));
                }
                cs[k] = h[(k, k)] / denom;
                sn[k] = h[(k + 1, k)] / denom;
                h[(k, k)] = denom;
                h[(k + 1, k)] = T::zero();
                g[k + 1] = -sn[k] * g[k];
                g[k] = cs[k] * g[k];

                output.num_iterations += 1;
                k += 1;

                let estimate = g[k].abs();
                if estimate <= self.tolerance || w_norm == T::zero() {
                    break;
                }
                v.push(&w / w_norm);
            }

            // Solve the upper triangular least-squares system and update x with the
            // preconditioned basis
            let mut y = DVector::zeros(k);
            for i in (0..k).rev() {
                let mut sum = g[i];
                for j in (i + 1)..k {
                    sum -= h[(i, j)] * y[j];
                }
                y[i] = sum / h[(i, i)];
            }
            for (y_i, z_i) in y.iter().zip(&z) {
                x.axpy(*y_i, z_i, T::one());
            }

            beta = match Self::residual(operator, &b, &x, &mut r) {
                Ok(norm) => norm,
                Err(kind) => return Err(SolveError::new(output, kind)),
            };
            output.residual_norm = beta;
            log::trace!(
                "FGMRES cycle {} finished after {} total iterations, residual {}",
                output.num_restarts,
                output.num_iterations,
                beta
            );
            if beta > self.tolerance && output.num_iterations < self.max_iter {
                output.num_restarts += 1;
            }
        }
    }
}
