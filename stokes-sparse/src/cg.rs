//! Preconditioned Conjugate Gradient and an inner-solve operator built on top of it.
use crate::operator::{IdentityOperator, LinearOperator};
use crate::{IterationCount, Real, SolveError, SolveErrorKind};
use nalgebra::{DVector, DVectorView, DVectorViewMut, Scalar};
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::marker::PhantomData;

/// Decides when CG stops, based on the norm of the recursively updated residual.
pub trait CgStoppingCriterion<T: Scalar> {
    /// `residual_norm` is the norm of CG's recursive residual after `iteration` updates of the
    /// iterate, `rhs_norm` the norm of the right-hand side.
    fn has_converged(&self, iteration: usize, residual_norm: T, rhs_norm: T) -> bool;
}

/// `||r|| <= tol * ||b||`.
///
/// The residual is CG's recursive one. For ill-conditioned problems it may keep decreasing while
/// the true residual stagnates.
#[derive(Debug, Clone, Copy)]
pub struct RelativeResidualCriterion<T: Scalar> {
    tol: T,
}

impl<T: Scalar> RelativeResidualCriterion<T> {
    pub fn new(tol: T) -> Self {
        Self { tol }
    }
}

impl Default for RelativeResidualCriterion<f64> {
    fn default() -> Self {
        Self::new(1e-8)
    }
}

impl<T: Real> CgStoppingCriterion<T> for RelativeResidualCriterion<T> {
    fn has_converged(&self, _iteration: usize, residual_norm: T, rhs_norm: T) -> bool {
        residual_norm <= self.tol * rhs_norm
    }
}

/// Stops once the residual is below an absolute `tolerance`, or once it has been reduced by the
/// factor `reduction` relative to the residual of the initial guess, whichever happens first.
pub struct ReductionCriterion<T: Scalar> {
    reduction: T,
    tolerance: T,
    initial_residual_norm: Cell<T>,
}

impl<T: Real> ReductionCriterion<T> {
    pub fn new(reduction: T, tolerance: T) -> Self {
        Self {
            reduction,
            tolerance,
            initial_residual_norm: Cell::new(T::zero()),
        }
    }

    pub fn reduction(&self) -> T {
        self.reduction
    }

    pub fn tolerance(&self) -> T {
        self.tolerance
    }
}

impl<T: Real> std::fmt::Debug for ReductionCriterion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReductionCriterion")
            .field("reduction", &self.reduction)
            .field("tolerance", &self.tolerance)
            .field("initial_residual_norm", &self.initial_residual_norm.get())
            .finish()
    }
}

impl<T: Real> CgStoppingCriterion<T> for ReductionCriterion<T> {
    fn has_converged(&self, iteration: usize, residual_norm: T, _rhs_norm: T) -> bool {
        if iteration == 0 {
            self.initial_residual_norm.set(residual_norm);
        }
        residual_norm <= self.tolerance || residual_norm <= self.reduction * self.initial_residual_norm.get()
    }
}

/// Scratch vectors of a CG solve. Reusing a workspace avoids reallocation across solves of the
/// same dimension.
#[derive(Debug, Clone)]
pub struct CgWorkspace<T: Scalar> {
    residual: DVector<T>,
    preconditioned: DVector<T>,
    direction: DVector<T>,
    operator_direction: DVector<T>,
}

impl<T: Real> Default for CgWorkspace<T> {
    fn default() -> Self {
        Self::with_dim(0)
    }
}

impl<T: Real> CgWorkspace<T> {
    fn with_dim(dim: usize) -> Self {
        Self {
            residual: DVector::zeros(dim),
            preconditioned: DVector::zeros(dim),
            direction: DVector::zeros(dim),
            operator_direction: DVector::zeros(dim),
        }
    }

    fn resize(&mut self, dim: usize) {
        if self.residual.len() != dim {
            *self = Self::with_dim(dim);
        }
    }
}

/// Builder-style preconditioned CG.
///
/// ```ignore
/// let output = ConjugateGradient::new()
///     .with_operator(&a)
///     .with_preconditioner(&p)
///     .with_stopping_criterion(RelativeResidualCriterion::new(1e-10))
///     .solve_with_guess(&b, &mut x)?;
/// ```
#[derive(Debug)]
pub struct ConjugateGradient<T: Scalar, A, P, Criterion> {
    workspace: CgWorkspace<T>,
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    max_iter: Option<usize>,
}

impl<T: Real> ConjugateGradient<T, (), IdentityOperator, ()> {
    pub fn new() -> Self {
        Self::with_workspace(CgWorkspace::default())
    }

    /// Starts from an existing workspace, which can be recovered with
    /// [`into_workspace`](ConjugateGradient::into_workspace).
    pub fn with_workspace(workspace: CgWorkspace<T>) -> Self {
        Self {
            workspace,
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            max_iter: None,
        }
    }
}

impl<T: Real> Default for ConjugateGradient<T, (), IdentityOperator, ()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar, A, P, Criterion> ConjugateGradient<T, A, P, Criterion> {
    pub fn with_operator<A2>(self, operator: A2) -> ConjugateGradient<T, A2, P, Criterion> {
        ConjugateGradient {
            workspace: self.workspace,
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }

    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<T, A, P2, Criterion> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }

    pub fn with_stopping_criterion<C2>(self, stopping_criterion: C2) -> ConjugateGradient<T, A, P, C2> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            max_iter: self.max_iter,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }

    pub fn into_workspace(self) -> CgWorkspace<T> {
        self.workspace
    }
}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct CgOutput<T> {
    /// Number of updates made to the solution vector.
    pub num_iterations: usize,
    marker: PhantomData<T>,
}

impl<T> IterationCount for CgOutput<T> {
    fn iterations(&self) -> usize {
        self.num_iterations
    }
}

pub type CgError<T> = SolveError<CgOutput<T>>;

impl<T, A, P, Criterion> ConjugateGradient<T, A, P, Criterion>
where
    T: Real,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
    Criterion: CgStoppingCriterion<T>,
{
    /// Solves `A x = b`, using the contents of `x` as the initial guess.
    pub fn solve_with_guess<'b>(
        &mut self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<CgOutput<T>, CgError<T>> {
        let mut num_iterations = 0;
        let result = self.iterate(b.into(), x.into(), &mut num_iterations);
        let output = CgOutput {
            num_iterations,
            marker: PhantomData,
        };
        match result {
            Ok(()) => Ok(output),
            Err(kind) => Err(SolveError::new(output, kind)),
        }
    }

    fn iterate(
        &mut self,
        b: DVectorView<T>,
        mut x: DVectorViewMut<T>,
        num_iterations: &mut usize,
    ) -> Result<(), SolveErrorKind> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len(), "right-hand side and solution must have the same dimension");

        let rhs_norm = b.norm();
        if rhs_norm == T::zero() {
            x.fill(T::zero());
            return Ok(());
        }

        self.workspace.resize(x.len());
        let CgWorkspace {
            residual: r,
            preconditioned: z,
            direction: p,
            operator_direction: ap,
        } = &mut self.workspace;

        self.operator
            .apply(DVectorViewMut::from(&mut *r), x.rows(0, x.len()))
            .map_err(OperatorError)?;
        r.axpy(T::one(), &b, -T::one());
        self.preconditioner
            .apply(DVectorViewMut::from(&mut *z), DVectorView::from(&*r))
            .map_err(PreconditionerError)?;
        p.copy_from(&*z);
        let mut rho = z.dot(&*r);

        while !self
            .stopping_criterion
            .has_converged(*num_iterations, r.norm(), rhs_norm)
        {
            if let Some(max_iter) = self.max_iter {
                if *num_iterations >= max_iter {
                    return Err(MaxIterationsReached { max_iter });
                }
            }

            self.operator
                .apply(DVectorViewMut::from(&mut *ap), DVectorView::from(&*p))
                .map_err(OperatorError)?;
            let curvature = p.dot(&*ap);
            if curvature <= T::zero() {
                return Err(IndefiniteOperator);
            }
            if rho <= T::zero() {
                return Err(IndefinitePreconditioner);
            }

            let step = rho / curvature;
            x.axpy(step, &*p, T::one());
            r.axpy(-step, &*ap, T::one());
            *num_iterations += 1;

            self.preconditioner
                .apply(DVectorViewMut::from(&mut *z), DVectorView::from(&*r))
                .map_err(PreconditionerError)?;
            let rho_next = z.dot(&*r);
            p.axpy(T::one(), &*z, rho_next / rho);
            rho = rho_next;
        }
        Ok(())
    }
}

/// Approximate inverse `A^{-1}` realized by an inner, preconditioned CG solve.
///
/// Every application solves `A x = b` from a zero initial guess using a
/// [`ReductionCriterion`]. The inner solve must converge within `max_iter` iterations,
/// otherwise the application fails with the underlying [`CgError`].
///
/// Since the inner tolerance is loose, the resulting operator is only approximately linear and
/// should only be used as a preconditioner for flexible outer methods such as
/// [`FlexibleGmres`](crate::fgmres::FlexibleGmres).
pub struct InverseOperator<T: Scalar, A, P> {
    operator: A,
    preconditioner: P,
    reduction: T,
    tolerance: T,
    max_iter: usize,
    workspace: RefCell<CgWorkspace<T>>,
    total_iterations: Cell<usize>,
    applications: Cell<usize>,
}

impl<T: Real, A, P> InverseOperator<T, A, P> {
    pub fn new(operator: A, preconditioner: P) -> Self {
        Self {
            operator,
            preconditioner,
            reduction: T::from_subset(&1e-2),
            tolerance: T::from_subset(&1e-8),
            max_iter: 5000,
            workspace: RefCell::new(CgWorkspace::default()),
            total_iterations: Cell::new(0),
            applications: Cell::new(0),
        }
    }

    pub fn with_reduction(self, reduction: T, tolerance: T) -> Self {
        Self {
            reduction,
            tolerance,
            ..self
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }

    /// Total number of inner CG iterations over all applications so far.
    pub fn total_iterations(&self) -> usize {
        self.total_iterations.get()
    }

    pub fn applications(&self) -> usize {
        self.applications.get()
    }
}

impl<T, A, P> LinearOperator<T> for InverseOperator<T, A, P>
where
    T: Real,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.fill(T::zero());
        let workspace = self.workspace.take();
        let mut cg = ConjugateGradient::with_workspace(workspace)
            .with_operator(&self.operator)
            .with_preconditioner(&self.preconditioner)
            .with_stopping_criterion(ReductionCriterion::new(self.reduction, self.tolerance))
            .with_max_iter(self.max_iter);
        let result = cg.solve_with_guess(x, y);
        self.workspace.replace(cg.into_workspace());

        self.applications.set(self.applications.get() + 1);
        let iterations = match &result {
            Ok(output) => output.num_iterations,
            Err(err) => err.output.num_iterations,
        };
        self.total_iterations
            .set(self.total_iterations.get() + iterations);
        result.map(|_| ()).map_err(|err| Box::new(err) as Box<dyn Error>)
    }
}
