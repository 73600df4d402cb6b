//! The contract between a differential-algebraic model `F(t, y, y') = 0` and an implicit time
//! integrator, and a small backward Euler driver implementing the integrator side.
use eyre::eyre;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use stokes_sparse::BlockVector;

/// Result of a linear solve with the Jacobian of the last setup.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinearSolveOutcome {
    /// `iterations` counts outer Krylov iterations, `inner_iterations` the iterations of inner
    /// solves used for preconditioning.
    Converged { iterations: usize, inner_iterations: usize },
    /// The solve did not reach its tolerance. The integrator should reject the step and retry
    /// with a smaller step size.
    NotConverged,
}

impl LinearSolveOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }
}

/// Decision taken by the model after an accepted step.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    /// The model has changed the dimension or meaning of the state vectors. The integrator must
    /// discard its history and restart from the vectors returned by the model.
    Restart,
}

/// A differential-algebraic model as seen by an implicit integrator.
///
/// The Jacobian is `dF/dy + alpha dF/dy'`. Newton updates are computed as `dst = J^{-1} src`
/// and subtracted from the iterate.
pub trait DaeModel {
    /// A zero vector with the block layout of the current state.
    fn create_new_vector(&self) -> BlockVector<f64>;

    fn n_dofs(&self) -> usize;

    fn residual(&mut self, t: f64, y: &DVector<f64>, y_dot: &DVector<f64>, residual: &mut DVector<f64>)
        -> eyre::Result<()>;

    /// Prepares the Jacobian used by all subsequent calls to
    /// [`solve_jacobian_system`](Self::solve_jacobian_system).
    fn setup_jacobian(&mut self, t: f64, y: &DVector<f64>, y_dot: &DVector<f64>, alpha: f64) -> eyre::Result<()>;

    /// Solves `J dst = src` approximately. Numerical failure is reported as
    /// [`LinearSolveOutcome::NotConverged`], errors are reserved for misuse.
    fn solve_jacobian_system(&self, src: &DVector<f64>, dst: &mut DVector<f64>) -> eyre::Result<LinearSolveOutcome>;

    /// `1` for differential components, `0` for algebraic ones.
    fn differential_components(&self) -> DVector<f64>;

    fn output_step(&mut self, t: f64, y: &DVector<f64>, y_dot: &DVector<f64>, step_number: usize, h: f64)
        -> eyre::Result<()>;

    /// Called after every accepted step. The model may replace `y` and `y_dot` (including
    /// their length) and request a restart.
    fn solver_should_restart(
        &mut self,
        t: f64,
        step_number: usize,
        h: f64,
        y: &mut DVector<f64>,
        y_dot: &mut DVector<f64>,
    ) -> eyre::Result<StepControl>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackwardEulerSettings {
    pub initial_step_size: f64,
    pub max_step_size: f64,
    pub min_step_size: f64,
    pub final_time: f64,
    pub max_steps: usize,
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    /// Newton converges when the weighted norm of the update falls below this value.
    pub newton_tolerance: f64,
    pub max_newton_iterations: usize,
}

impl Default for BackwardEulerSettings {
    fn default() -> Self {
        Self {
            initial_step_size: 1e-2,
            max_step_size: 1e-1,
            min_step_size: 1e-10,
            final_time: 1.0,
            max_steps: 10000,
            relative_tolerance: 1e-6,
            absolute_tolerance: 1e-8,
            newton_tolerance: 0.1,
            max_newton_iterations: 5,
        }
    }
}

/// Statistics of a completed integration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationSummary {
    pub final_time: f64,
    pub steps: usize,
    pub rejected_steps: usize,
    pub restarts: usize,
    pub newton_iterations: usize,
    pub linear_iterations: usize,
    pub inner_linear_iterations: usize,
}

/// Fixed-leading-coefficient BDF1 with modified Newton and step-size control.
///
/// The Jacobian is set up once per step attempt. A step is rejected and retried with half the
/// step size if a linear solve does not converge, Newton fails to converge, or the estimated
/// local error of the differential components is too large.
#[derive(Debug, Clone, Default)]
pub struct BackwardEuler {
    settings: BackwardEulerSettings,
}

enum Attempt {
    Accepted { error_estimate: f64 },
    Rejected,
}

impl BackwardEuler {
    pub fn new(settings: BackwardEulerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BackwardEulerSettings {
        &self.settings
    }

    fn weighted_rms(&self, v: &DVector<f64>, y: &DVector<f64>, mask: Option<&DVector<f64>>) -> f64 {
        let mut sum = 0.0;
        let mut count = 0;
        for i in 0..v.len() {
            if mask.map_or(true, |mask| mask[i] != 0.0) {
                let w = 1.0 / (self.settings.relative_tolerance * y[i].abs() + self.settings.absolute_tolerance);
                sum += (w * v[i]).powi(2);
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            (sum / count as f64).sqrt()
        }
    }

    /// Integrates from `t0` to the final time. `y` and `y_dot` must be consistent initial values
    /// and hold the final state on return.
    pub fn integrate<M>(
        &self,
        model: &mut M,
        t0: f64,
        y: &mut DVector<f64>,
        y_dot: &mut DVector<f64>,
    ) -> eyre::Result<IntegrationSummary>
    where
        M: DaeModel + ?Sized,
    {
        let settings = &self.settings;
        if !(settings.min_step_size > 0.0 && settings.initial_step_size >= settings.min_step_size) {
            return Err(eyre!(
                "invalid step sizes: initial {}, minimum {}",
                settings.initial_step_size,
                settings.min_step_size
            ));
        }

        let mut summary = IntegrationSummary {
            final_time: t0,
            ..Default::default()
        };
        let mut t = t0;
        let mut h = settings.initial_step_size;
        let time_tolerance = 1e-12 * settings.final_time.abs().max(1.0);
        model.output_step(t, y, y_dot, 0, h)?;

        while t < settings.final_time - time_tolerance && summary.steps < settings.max_steps {
            h = h.min(settings.final_time - t);
            let mut y_new = y.clone();
            let mut y_dot_new = y_dot.clone();

            match self.attempt_step(model, t, h, y, y_dot, &mut y_new, &mut y_dot_new, &mut summary)? {
                Attempt::Rejected => {
                    summary.rejected_steps += 1;
                    h *= 0.5;
                    if h < settings.min_step_size {
                        return Err(eyre!(
                            "step size {:e} fell below the minimum {:e} at t = {}",
                            h,
                            settings.min_step_size,
                            t
                        ));
                    }
                    log::debug!("Step rejected at t = {}, retrying with h = {:e}", t, h);
                    continue;
                }
                Attempt::Accepted { error_estimate } => {
                    t += h;
                    summary.steps += 1;
                    *y = y_new;
                    *y_dot = y_dot_new;
                    log::debug!("Accepted step {} to t = {} with h = {:e}", summary.steps, t, h);

                    model.output_step(t, y, y_dot, summary.steps, h)?;
                    if model.solver_should_restart(t, summary.steps, h, y, y_dot)? == StepControl::Restart {
                        summary.restarts += 1;
                        log::info!("Restarting time integration at t = {} with {} unknowns", t, y.len());
                    }

                    let factor = if error_estimate > 0.0 {
                        (0.9 / error_estimate.sqrt()).clamp(0.2, 2.0)
                    } else {
                        2.0
                    };
                    h = (h * factor).clamp(settings.min_step_size, settings.max_step_size);
                }
            }
        }

        summary.final_time = t;
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn attempt_step<M>(
        &self,
        model: &mut M,
        t: f64,
        h: f64,
        y: &DVector<f64>,
        y_dot: &DVector<f64>,
        y_new: &mut DVector<f64>,
        y_dot_new: &mut DVector<f64>,
        summary: &mut IntegrationSummary,
    ) -> eyre::Result<Attempt>
    where
        M: DaeModel + ?Sized,
    {
        let t_new = t + h;
        let alpha = 1.0 / h;
        // Linear extrapolation as predictor
        y_new.copy_from(y);
        y_new.axpy(h, y_dot, 1.0);
        y_dot_new.copy_from(y_dot);

        model.setup_jacobian(t_new, y_new, y_dot_new, alpha)?;
        let mut residual = model.create_new_vector();
        let mut delta = model.create_new_vector();
        if residual.len() != y_new.len() {
            return Err(eyre!(
                "model vectors have {} entries, but the state has {}",
                residual.len(),
                y_new.len()
            ));
        }

        for _ in 0..self.settings.max_newton_iterations {
            model.residual(t_new, y_new, y_dot_new, residual.as_vector_mut())?;
            summary.newton_iterations += 1;
            log::trace!(
                "Newton residual block norms at t = {}: {:?}",
                t_new,
                (0..residual.num_blocks())
                    .map(|block| residual.block(block).norm())
                    .collect::<Vec<_>>()
            );
            delta.as_vector_mut().fill(0.0);
            match model.solve_jacobian_system(residual.as_vector(), delta.as_vector_mut())? {
                LinearSolveOutcome::Converged {
                    iterations,
                    inner_iterations,
                } => {
                    summary.linear_iterations += iterations;
                    summary.inner_linear_iterations += inner_iterations;
                }
                LinearSolveOutcome::NotConverged => return Ok(Attempt::Rejected),
            }
            let update = delta.as_vector();
            *y_new -= update;
            y_dot_new.axpy(-alpha, update, 1.0);

            if self.weighted_rms(update, y_new, None) <= self.settings.newton_tolerance {
                let mask = model.differential_components();
                let change = &*y_dot_new - y_dot;
                let error_estimate = 0.5 * h * self.weighted_rms(&change, y_new, Some(&mask));
                return Ok(if error_estimate > 1.0 {
                    Attempt::Rejected
                } else {
                    Attempt::Accepted { error_estimate }
                });
            }
        }
        Ok(Attempt::Rejected)
    }
}
