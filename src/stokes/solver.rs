use crate::config::LinearSolverSettings;
use crate::constraints::AffineConstraints;
use crate::dae::LinearSolveOutcome;
use crate::stokes::JacobianSystem;
use eyre::eyre;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use stokes_sparse::cg::InverseOperator;
use stokes_sparse::fgmres::FlexibleGmres;
use stokes_sparse::{BlockTriangularPreconditioner, LinearOperator, ScaledOperator};

/// Solves `J dst = src` with the system of the last Jacobian setup.
///
/// The unconstrained entries of `dst` solve the condensed system, for which the constrained
/// entries of `src` are ignored. The constrained entries of `dst` are then completed with
/// [`AffineConstraints::complete_update`], so that a Newton update moves constrained unknowns onto
/// their constraints. If a dense factorization is available it is used directly. Otherwise FGMRES
/// with the block triangular Schur complement preconditioner runs with the small first-tier
/// budget, and on failure once more from the first-tier iterate with a budget of `n_dofs`
/// iterations and a wider restart.
///
/// Failure of both tiers is reported as [`LinearSolveOutcome::NotConverged`].
pub fn solve_saddle_point_system(
    system: &JacobianSystem,
    constraints: &AffineConstraints,
    settings: &LinearSolverSettings,
    src: &DVector<f64>,
    dst: &mut DVector<f64>,
) -> eyre::Result<LinearSolveOutcome> {
    let n = system.jacobian().full().nrows();
    if src.len() != n || dst.len() != n {
        return Err(eyre!(
            "vector lengths ({}, {}) do not match the system size {}",
            src.len(),
            dst.len(),
            n
        ));
    }

    let mut rhs = src.clone();
    constraints.set_zero(&mut rhs);
    dst.fill(0.0);

    if let Some(direct) = system.direct_solver() {
        match direct.apply(DVectorViewMut::from(&mut *dst), DVectorView::from(&rhs)) {
            Ok(()) => {
                constraints.complete_update(src, dst);
                return Ok(LinearSolveOutcome::Converged {
                    iterations: 0,
                    inner_iterations: 0,
                });
            }
            Err(err) => {
                log::warn!("Direct solve failed ({}), falling back to FGMRES", err);
                dst.fill(0.0);
            }
        }
    }

    let jacobian = system.jacobian();
    let preconditioner = system.preconditioner();
    let operator = jacobian.as_block_operator();

    let velocity_inverse = InverseOperator::new(jacobian.block(0, 0), system.velocity_amg())
        .with_reduction(settings.inner_reduction, settings.inner_tolerance)
        .with_max_iter(settings.inner_max_iterations);
    let pressure_inverse = InverseOperator::new(preconditioner.block(1, 1), system.pressure_jacobi())
        .with_reduction(settings.inner_reduction, settings.inner_tolerance)
        .with_max_iter(settings.inner_max_iterations);
    let inner_iterations = || velocity_inverse.total_iterations() + pressure_inverse.total_iterations();
    let diagonal_inverses: Vec<Box<dyn LinearOperator<f64> + '_>> = vec![
        Box::new(&velocity_inverse),
        Box::new(ScaledOperator::new(-1.0, &pressure_inverse)),
    ];
    let block_preconditioner = BlockTriangularPreconditioner::new(&jacobian.block_sizes(), diagonal_inverses)
        .with_lower_block(1, 0, jacobian.block(1, 0));

    let first_tier = FlexibleGmres::new()
        .with_restart(settings.first_tier_restart)
        .with_max_iter(settings.first_tier_max_iterations)
        .with_tolerance(settings.tolerance);
    let first_iterations =
        match first_tier.solve_with_guess(&operator, &block_preconditioner, DVectorView::from(&rhs), &mut *dst) {
            Ok(output) => {
                log::debug!(
                    "FGMRES converged in {} iterations ({} inner CG iterations)",
                    output.num_iterations,
                    inner_iterations()
                );
                constraints.complete_update(src, dst);
                return Ok(LinearSolveOutcome::Converged {
                    iterations: output.num_iterations,
                    inner_iterations: inner_iterations(),
                });
            }
            Err(err) => {
                log::info!(
                    "FGMRES did not converge in {} iterations (residual {:e}), retrying with larger budget",
                    err.output.num_iterations,
                    err.output.residual_norm
                );
                if !err.is_max_iterations() {
                    // The iterate may be garbage after a breakdown or inner failure
                    dst.fill(0.0);
                }
                err.output.num_iterations
            }
        };

    let second_tier = FlexibleGmres::new()
        .with_restart(settings.second_tier_restart)
        .with_max_iter(n.max(1))
        .with_tolerance(settings.tolerance);
    match second_tier.solve_with_guess(&operator, &block_preconditioner, DVectorView::from(&rhs), &mut *dst) {
        Ok(output) => {
            let iterations = first_iterations + output.num_iterations;
            log::debug!(
                "FGMRES converged in {} iterations ({} inner CG iterations) after escalation",
                iterations,
                inner_iterations()
            );
            constraints.complete_update(src, dst);
            Ok(LinearSolveOutcome::Converged {
                iterations,
                inner_iterations: inner_iterations(),
            })
        }
        Err(err) => {
            log::warn!(
                "Linear solve failed after escalation ({} inner CG iterations): {}",
                inner_iterations(),
                err
            );
            constraints.set_zero(dst);
            Ok(LinearSolveOutcome::NotConverged)
        }
    }
}
