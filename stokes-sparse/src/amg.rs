//! Smoothed aggregation algebraic multigrid.
//!
//! The hierarchy is built purely from the matrix entries:
//!
//! 1. Strong connections are identified by `|a_ij| >= theta * sqrt(|a_ii a_jj|)`. Only
//!    connections between unknowns with the same component label are ever considered strong,
//!    so that e.g. the two components of a velocity field are coarsened separately.
//! 2. Unknowns are grouped into aggregates by a three-pass greedy algorithm.
//! 3. The tentative piecewise constant prolongation is smoothed by one damped Jacobi step,
//!    `P = (I - omega D^{-1} A) P_tent`, and the coarse operator is the Galerkin product
//!    `A_c = P^T A P`.
//!
//! The resulting V-cycle uses damped Jacobi pre- and post-smoothing and a dense factorization
//! on the coarsest level. Since pre- and post-smoothing are identical and the restriction is the
//! transpose of the prolongation, the V-cycle is a symmetric operator and can serve as a
//! preconditioner for Conjugate Gradient.
use crate::direct::DirectSolver;
use crate::operator::LinearOperator;
use crate::{csr_diagonal, Real, SetupError};
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct AmgSettings {
    /// The strength-of-connection threshold `theta`.
    pub aggregation_threshold: f64,
    /// Number of Jacobi sweeps, both before and after the coarse grid correction.
    pub smoother_sweeps: usize,
    pub max_levels: usize,
    /// Levels with at most this many unknowns are solved directly.
    pub coarse_size: usize,
    /// Whether to smooth the tentative prolongation.
    pub smoothed_prolongation: bool,
    /// Upper bound on the size of a dense coarsest-level factorization. If aggregation stalls
    /// on a larger level, the coarsest level is handled by smoothing only.
    pub max_direct_size: usize,
}

impl Default for AmgSettings {
    fn default() -> Self {
        Self {
            aggregation_threshold: 0.02,
            smoother_sweeps: 2,
            max_levels: 10,
            coarse_size: 64,
            smoothed_prolongation: true,
            max_direct_size: 2000,
        }
    }
}

#[derive(Debug, Clone)]
struct Level<T: Real> {
    matrix: CsrMatrix<T>,
    prolongation: CsrMatrix<T>,
    restriction: CsrMatrix<T>,
    smoother_weights: DVector<T>,
}

#[derive(Debug, Clone)]
enum CoarseSolver<T: Real> {
    Direct(DirectSolver<T>),
    Smoother {
        matrix: CsrMatrix<T>,
        weights: DVector<T>,
        sweeps: usize,
    },
}

#[derive(Debug, Clone)]
pub struct AlgebraicMultigrid<T: Real> {
    levels: Vec<Level<T>>,
    coarse: CoarseSolver<T>,
    coarse_dim: usize,
    smoother_sweeps: usize,
}

/// Gershgorin bound on the spectral radius of `D^{-1} A`.
fn jacobi_spectral_bound<T: Real>(matrix: &CsrMatrix<T>, diagonal: &DVector<T>) -> T {
    let mut bound = T::zero();
    for (i, row) in matrix.row_iter().enumerate() {
        let row_sum = row.values().iter().fold(T::zero(), |acc, a_ij| acc + a_ij.abs());
        bound = bound.max(row_sum / diagonal[i].abs());
    }
    bound
}

fn jacobi_weights<T: Real>(matrix: &CsrMatrix<T>, diagonal: &DVector<T>) -> DVector<T> {
    let omega = T::from_subset(&(4.0 / 3.0)) / jacobi_spectral_bound(matrix, diagonal);
    diagonal.map(|d_i| omega / d_i)
}

fn strong_connections<T: Real>(
    matrix: &CsrMatrix<T>,
    diagonal: &DVector<T>,
    labels: &[usize],
    threshold: T,
) -> Vec<Vec<usize>> {
    matrix
        .row_iter()
        .enumerate()
        .map(|(i, row)| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .filter(|&(&j, &a_ij)| {
                    j != i && labels[i] == labels[j] && a_ij.abs() >= threshold * (diagonal[i] * diagonal[j]).abs().sqrt()
                })
                .map(|(&j, _)| j)
                .collect()
        })
        .collect()
}

/// Greedy aggregation. Returns the aggregate index of every unknown and the number of
/// aggregates.
fn aggregate(strong: &[Vec<usize>]) -> (Vec<usize>, usize) {
    let n = strong.len();
    let mut aggregate_of: Vec<Option<usize>> = vec![None; n];
    let mut count = 0;

    // Seed aggregates from unknowns whose entire strong neighborhood is still free
    for i in 0..n {
        let is_free = aggregate_of[i].is_none() && strong[i].iter().all(|&j| aggregate_of[j].is_none());
        if is_free && !strong[i].is_empty() {
            aggregate_of[i] = Some(count);
            for &j in &strong[i] {
                aggregate_of[j] = Some(count);
            }
            count += 1;
        }
    }

    // Attach leftovers to a neighboring seed aggregate
    let seeded = aggregate_of.clone();
    for i in 0..n {
        if aggregate_of[i].is_none() {
            aggregate_of[i] = strong[i].iter().find_map(|&j| seeded[j]);
        }
    }

    // Whatever remains forms new aggregates with its free neighbors
    for i in 0..n {
        if aggregate_of[i].is_none() {
            aggregate_of[i] = Some(count);
            for &j in &strong[i] {
                if aggregate_of[j].is_none() {
                    aggregate_of[j] = Some(count);
                }
            }
            count += 1;
        }
    }

    (aggregate_of.into_iter().flatten().collect(), count)
}

impl<T: Real> AlgebraicMultigrid<T> {
    /// Builds a hierarchy treating all unknowns as a single component.
    pub fn new(matrix: &CsrMatrix<T>, settings: &AmgSettings) -> Result<Self, SetupError> {
        let labels = vec![0; matrix.nrows()];
        Self::with_component_labels(matrix, &labels, settings)
    }

    /// Builds a hierarchy where unknowns are only aggregated with unknowns carrying the same
    /// component label.
    ///
    /// The tentative prolongation is piecewise constant per aggregate, so the labels define the
    /// near-null space: one constant mode per component, e.g. per velocity component of a vector
    /// Laplacian.
    pub fn with_component_labels(
        matrix: &CsrMatrix<T>,
        labels: &[usize],
        settings: &AmgSettings,
    ) -> Result<Self, SetupError> {
        assert_eq!(labels.len(), matrix.nrows(), "Need exactly one label per unknown");
        let threshold = T::from_subset(&settings.aggregation_threshold);
        let mut levels = Vec::new();
        let mut current = matrix.clone();
        let mut current_labels = labels.to_vec();

        loop {
            let diagonal = csr_diagonal(&current)?;
            let n = current.nrows();
            if n <= settings.coarse_size || levels.len() + 1 >= settings.max_levels {
                break;
            }

            let strong = strong_connections(&current, &diagonal, &current_labels, threshold);
            let (aggregate_of, num_aggregates) = aggregate(&strong);
            if num_aggregates == 0 || num_aggregates >= n {
                log::debug!("AMG aggregation stalled at level {} with {} unknowns", levels.len(), n);
                break;
            }

            let mut tentative = CooMatrix::new(n, num_aggregates);
            for (i, &agg) in aggregate_of.iter().enumerate() {
                tentative.push(i, agg, T::one());
            }
            let tentative = CsrMatrix::from(&tentative);

            let prolongation = if settings.smoothed_prolongation {
                let omega = T::from_subset(&(4.0 / 3.0)) / jacobi_spectral_bound(&current, &diagonal);
                let mut scaled = current.clone();
                for (i, mut row) in scaled.row_iter_mut().enumerate() {
                    let factor = omega / diagonal[i];
                    for a_ij in row.values_mut() {
                        *a_ij *= factor;
                    }
                }
                let correction = &scaled * &tentative;
                let mut smoothed = CooMatrix::new(n, num_aggregates);
                for (i, j, &v) in tentative.triplet_iter() {
                    smoothed.push(i, j, v);
                }
                for (i, j, &v) in correction.triplet_iter() {
                    smoothed.push(i, j, -v);
                }
                CsrMatrix::from(&smoothed)
            } else {
                tentative
            };

            let restriction = prolongation.transpose();
            let coarse_matrix = &(&restriction * &current) * &prolongation;
            let mut coarse_labels = vec![0; num_aggregates];
            for (i, &agg) in aggregate_of.iter().enumerate() {
                coarse_labels[agg] = current_labels[i];
            }

            let smoother_weights = jacobi_weights(&current, &diagonal);
            levels.push(Level {
                matrix: current,
                prolongation,
                restriction,
                smoother_weights,
            });
            current = coarse_matrix;
            current_labels = coarse_labels;
        }

        let coarse_dim = current.nrows();
        let coarse = if coarse_dim <= settings.max_direct_size {
            CoarseSolver::Direct(DirectSolver::cholesky_or_lu(DMatrix::from(&current))?)
        } else {
            let diagonal = csr_diagonal(&current)?;
            CoarseSolver::Smoother {
                weights: jacobi_weights(&current, &diagonal),
                matrix: current,
                sweeps: 4 * settings.smoother_sweeps.max(1),
            }
        };

        log::debug!(
            "AMG hierarchy with {} levels, coarsest level has {} unknowns",
            levels.len() + 1,
            coarse_dim
        );

        Ok(Self {
            levels,
            coarse,
            coarse_dim,
            smoother_sweeps: settings.smoother_sweeps,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len() + 1
    }

    /// Number of unknowns on each level, finest first.
    pub fn level_sizes(&self) -> Vec<usize> {
        self.levels
            .iter()
            .map(|level| level.matrix.nrows())
            .chain(std::iter::once(self.coarse_dim))
            .collect()
    }

    fn cycle(&self, level_index: usize, b: &DVector<T>) -> Result<DVector<T>, Box<dyn Error>> {
        let mut x = DVector::zeros(b.len());
        let Some(level) = self.levels.get(level_index) else {
            match &self.coarse {
                CoarseSolver::Direct(solver) => solver.apply(DVectorViewMut::from(&mut x), DVectorView::from(b))?,
                CoarseSolver::Smoother {
                    matrix,
                    weights,
                    sweeps,
                } => smooth(matrix, weights, *sweeps, b, &mut x)?,
            }
            return Ok(x);
        };

        smooth(&level.matrix, &level.smoother_weights, self.smoother_sweeps, b, &mut x)?;

        let mut r = DVector::zeros(b.len());
        level
            .matrix
            .apply(DVectorViewMut::from(&mut r), DVectorView::from(&x))?;
        r.axpy(T::one(), b, -T::one());

        let mut coarse_rhs = DVector::zeros(level.restriction.nrows());
        level
            .restriction
            .apply(DVectorViewMut::from(&mut coarse_rhs), DVectorView::from(&r))?;
        let coarse_correction = self.cycle(level_index + 1, &coarse_rhs)?;
        level
            .prolongation
            .apply(DVectorViewMut::from(&mut r), DVectorView::from(&coarse_correction))?;
        x += &r;

        smooth(&level.matrix, &level.smoother_weights, self.smoother_sweeps, b, &mut x)?;
        Ok(x)
    }
}

/// Performs damped Jacobi sweeps `x <- x + W (b - A x)`.
fn smooth<T: Real>(
    matrix: &CsrMatrix<T>,
    weights: &DVector<T>,
    sweeps: usize,
    b: &DVector<T>,
    x: &mut DVector<T>,
) -> Result<(), Box<dyn Error>> {
    let mut r = DVector::zeros(b.len());
    for _ in 0..sweeps {
        matrix.apply(DVectorViewMut::from(&mut r), DVectorView::from(&*x))?;
        r.axpy(T::one(), b, -T::one());
        r.component_mul_assign(weights);
        *x += &r;
    }
    Ok(())
}

impl<T: Real> LinearOperator<T> for AlgebraicMultigrid<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        let solution = self.cycle(0, &x.clone_owned())?;
        y.copy_from(&solution);
        Ok(())
    }
}
