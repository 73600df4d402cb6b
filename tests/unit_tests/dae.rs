use nalgebra::DVector;
use stokes_dae::{BackwardEuler, BackwardEulerSettings, BlockVector, DaeModel, LinearSolveOutcome, StepControl};
use util::assert_scalar_eq;

/// `y' + y = 0`, optionally misbehaving in configurable ways.
#[derive(Default)]
struct Decay {
    alpha: Option<f64>,
    /// Linear solves fail for step sizes above this value.
    max_solvable_step: Option<f64>,
    restart_at_step: Option<usize>,
    outputs: Vec<(usize, f64)>,
}

impl DaeModel for Decay {
    fn create_new_vector(&self) -> BlockVector<f64> {
        BlockVector::zeros(&[1])
    }

    fn n_dofs(&self) -> usize {
        1
    }

    fn residual(&mut self, _t: f64, y: &DVector<f64>, y_dot: &DVector<f64>, residual: &mut DVector<f64>) -> eyre::Result<()> {
        residual[0] = y_dot[0] + y[0];
        Ok(())
    }

    fn setup_jacobian(&mut self, _t: f64, _y: &DVector<f64>, _y_dot: &DVector<f64>, alpha: f64) -> eyre::Result<()> {
        self.alpha = Some(alpha);
        Ok(())
    }

    fn solve_jacobian_system(&self, src: &DVector<f64>, dst: &mut DVector<f64>) -> eyre::Result<LinearSolveOutcome> {
        let alpha = self
            .alpha
            .ok_or_else(|| eyre::eyre!("no Jacobian"))?;
        if let Some(max_step) = self.max_solvable_step {
            if 1.0 / alpha > max_step {
                return Ok(LinearSolveOutcome::NotConverged);
            }
        }
        dst[0] = src[0] / (1.0 + alpha);
        Ok(LinearSolveOutcome::Converged {
            iterations: 1,
            inner_iterations: 0,
        })
    }

    fn differential_components(&self) -> DVector<f64> {
        DVector::repeat(1, 1.0)
    }

    fn output_step(&mut self, t: f64, _y: &DVector<f64>, _y_dot: &DVector<f64>, step_number: usize, _h: f64) -> eyre::Result<()> {
        self.outputs.push((step_number, t));
        Ok(())
    }

    fn solver_should_restart(
        &mut self,
        _t: f64,
        step_number: usize,
        _h: f64,
        _y: &mut DVector<f64>,
        _y_dot: &mut DVector<f64>,
    ) -> eyre::Result<StepControl> {
        Ok(if self.restart_at_step == Some(step_number) {
            StepControl::Restart
        } else {
            StepControl::Continue
        })
    }
}

fn accurate_settings() -> BackwardEulerSettings {
    BackwardEulerSettings {
        relative_tolerance: 1e-4,
        absolute_tolerance: 1e-6,
        ..BackwardEulerSettings::default()
    }
}

fn initial_state() -> (DVector<f64>, DVector<f64>) {
    (DVector::repeat(1, 1.0), DVector::repeat(1, -1.0))
}

#[test]
fn backward_euler_integrates_exponential_decay() {
    let mut model = Decay::default();
    let (mut y, mut y_dot) = initial_state();
    let summary = BackwardEuler::new(accurate_settings())
        .integrate(&mut model, 0.0, &mut y, &mut y_dot)
        .unwrap();

    assert_scalar_eq!(summary.final_time, 1.0, abstol = 1e-12);
    assert_scalar_eq!(y[0], (-1.0f64).exp(), abstol = 2e-2);
    // The final state satisfies the equation
    assert_scalar_eq!(y_dot[0] + y[0], 0.0, abstol = 1e-10);
    assert_eq!(summary.restarts, 0);
    assert!(summary.linear_iterations >= summary.steps);

    // Initial output plus one per accepted step
    assert_eq!(model.outputs.len(), summary.steps + 1);
    assert_eq!(model.outputs[0], (0, 0.0));
    assert!(model.outputs.windows(2).all(|w| w[1].1 > w[0].1));
}

#[test]
fn restart_requests_are_counted() {
    let mut model = Decay {
        restart_at_step: Some(3),
        ..Decay::default()
    };
    let (mut y, mut y_dot) = initial_state();
    let summary = BackwardEuler::new(accurate_settings())
        .integrate(&mut model, 0.0, &mut y, &mut y_dot)
        .unwrap();
    assert_eq!(summary.restarts, 1);
    assert_scalar_eq!(summary.final_time, 1.0, abstol = 1e-12);
}

#[test]
fn failed_linear_solves_reject_steps() {
    let mut model = Decay {
        max_solvable_step: Some(0.05),
        ..Decay::default()
    };
    let settings = BackwardEulerSettings {
        initial_step_size: 0.1,
        ..accurate_settings()
    };
    let (mut y, mut y_dot) = initial_state();
    let summary = BackwardEuler::new(settings)
        .integrate(&mut model, 0.0, &mut y, &mut y_dot)
        .unwrap();
    assert!(summary.rejected_steps >= 1);
    assert_scalar_eq!(summary.final_time, 1.0, abstol = 1e-12);
    assert_scalar_eq!(y[0], (-1.0f64).exp(), abstol = 2e-2);
}

#[test]
fn persistent_failure_is_an_error() {
    let mut model = Decay {
        max_solvable_step: Some(0.0),
        ..Decay::default()
    };
    let settings = BackwardEulerSettings {
        initial_step_size: 0.1,
        min_step_size: 1e-3,
        ..accurate_settings()
    };
    let (mut y, mut y_dot) = initial_state();
    assert!(BackwardEuler::new(settings)
        .integrate(&mut model, 0.0, &mut y, &mut y_dot)
        .is_err());
}

#[test]
fn max_steps_bounds_the_integration() {
    let mut model = Decay::default();
    let settings = BackwardEulerSettings {
        max_steps: 3,
        ..accurate_settings()
    };
    let (mut y, mut y_dot) = initial_state();
    let summary = BackwardEuler::new(settings)
        .integrate(&mut model, 0.0, &mut y, &mut y_dot)
        .unwrap();
    assert_eq!(summary.steps, 3);
    assert!(summary.final_time < 1.0);
}

#[test]
fn invalid_step_sizes_are_rejected() {
    let mut model = Decay::default();
    let settings = BackwardEulerSettings {
        min_step_size: 0.0,
        ..BackwardEulerSettings::default()
    };
    let (mut y, mut y_dot) = initial_state();
    assert!(BackwardEuler::new(settings)
        .integrate(&mut model, 0.0, &mut y, &mut y_dot)
        .is_err());
}
