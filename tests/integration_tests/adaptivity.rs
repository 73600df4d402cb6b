use crate::LidDrivenCavity;
use std::sync::{Arc, Mutex};
use stokes_dae::mesh::procedural::create_unit_square_quad_mesh;
use stokes_dae::output::{OutputSink, StepView};
use stokes_dae::{
    BackwardEulerSettings, DaeModel, SerialCommunicator, SimulationResult, StepControl, StokesParameters, StokesProblem,
};

fn cavity(parameters: StokesParameters) -> StokesProblem<LidDrivenCavity> {
    let parameters = StokesParameters {
        initial_global_refinement: 2,
        ..parameters
    };
    StokesProblem::new(&create_unit_square_quad_mesh(1), LidDrivenCavity, parameters, SerialCommunicator).unwrap()
}

/// Records the number of active cells of every step it receives.
#[derive(Clone, Default)]
struct CellCounter {
    cells: Arc<Mutex<Vec<usize>>>,
}

impl OutputSink for CellCounter {
    fn output_step(&mut self, step: &StepView) -> eyre::Result<()> {
        self.cells
            .lock()
            .unwrap()
            .push(step.mesh.num_active_cells());
        Ok(())
    }
}

/// Three steps of size 0.01 with a loose local error control.
fn run_cavity(problem: &mut StokesProblem<LidDrivenCavity>) -> SimulationResult {
    problem
        .run(BackwardEulerSettings {
            initial_step_size: 0.01,
            max_step_size: 0.01,
            final_time: 0.03,
            relative_tolerance: 1.0,
            absolute_tolerance: 1.0,
            ..BackwardEulerSettings::default()
        })
        .unwrap()
}

#[test]
fn exceeding_the_threshold_adapts_and_restarts() {
    let mut problem = cavity(StokesParameters {
        error_threshold: 1e-8,
        ..StokesParameters::default()
    });
    let (mut y, mut y_dot) = problem.initial_state();
    problem.setup_jacobian(0.0, &y, &y_dot, 10.0).unwrap();
    let generation = problem.mesh().generation();

    let control = problem.check_adaptation(0.0, &mut y, &mut y_dot).unwrap();
    assert_eq!(control, StepControl::Restart);
    assert_eq!(problem.adaptations(), 1);
    assert!(problem.mesh().num_active_cells() > 16);
    assert!(problem.mesh().generation() > generation);
    assert_eq!(problem.discretization().generation(), problem.mesh().generation());
    assert_eq!(y.len(), problem.n_dofs());
    assert_eq!(y_dot.len(), problem.n_dofs());

    // The transferred state satisfies the constraints of the new mesh
    let (y_consistent, _) = problem.consistent_state(&y, &y_dot);
    assert!((&y_consistent - &y).amax() < 1e-12);

    // The old Jacobian is gone
    assert!(problem.jacobian_system().is_none());
    let rhs = problem.create_new_vector().into_vector();
    let mut dst = problem.create_new_vector().into_vector();
    assert!(problem.solve_jacobian_system(&rhs, &mut dst).is_err());

    problem.setup_jacobian(0.0, &y, &y_dot, 10.0).unwrap();
    let mut residual = problem.create_new_vector().into_vector();
    problem.residual(0.0, &y, &y_dot, &mut residual).unwrap();
    assert!(problem
        .solve_jacobian_system(&residual, &mut dst)
        .unwrap()
        .is_converged());
}

#[test]
fn threshold_above_indicators_continues() {
    let mut problem = cavity(StokesParameters {
        error_threshold: 1e6,
        ..StokesParameters::default()
    });
    let (mut y, mut y_dot) = problem.initial_state();
    let y_before = y.clone();
    let control = problem.check_adaptation(0.0, &mut y, &mut y_dot).unwrap();
    assert_eq!(control, StepControl::Continue);
    assert_eq!(problem.adaptations(), 0);
    assert_eq!(problem.mesh().num_active_cells(), 16);
    assert_eq!(y, y_before);
}

#[test]
fn disabled_space_adaptivity_never_adapts() {
    let mut problem = cavity(StokesParameters {
        use_space_adaptivity: false,
        error_threshold: 0.0,
        ..StokesParameters::default()
    });
    let (mut y, mut y_dot) = problem.initial_state();
    let control = problem.check_adaptation(0.0, &mut y, &mut y_dot).unwrap();
    assert_eq!(control, StepControl::Continue);
    assert_eq!(problem.mesh().num_active_cells(), 16);
}

#[test]
fn non_adaptive_refinement_refines_every_cell() {
    let mut problem = cavity(StokesParameters {
        adaptive_refinement: false,
        error_threshold: 1e-8,
        ..StokesParameters::default()
    });
    let (mut y, mut y_dot) = problem.initial_state();
    let control = problem.check_adaptation(0.0, &mut y, &mut y_dot).unwrap();
    assert_eq!(control, StepControl::Restart);
    assert_eq!(problem.mesh().num_active_cells(), 64);
    assert_eq!(problem.mesh().max_level(), 3);
}

#[test]
fn fixed_fraction_marking_adapts() {
    let mut problem = cavity(StokesParameters {
        max_cells: -1,
        error_threshold: 1e-8,
        ..StokesParameters::default()
    });
    let (mut y, mut y_dot) = problem.initial_state();
    let control = problem.check_adaptation(0.0, &mut y, &mut y_dot).unwrap();
    assert_eq!(control, StepControl::Restart);
    assert!(problem.mesh().num_active_cells() > 16);
    assert!(problem.mesh().is_balanced());
}

#[test]
fn lower_threshold_never_adapts_less() {
    let thresholds = [1e2, 1e-1, 1e-3, 1e-8];
    let cells: Vec<usize> = thresholds
        .iter()
        .map(|&error_threshold| {
            let mut problem = cavity(StokesParameters {
                error_threshold,
                ..StokesParameters::default()
            });
            let (mut y, mut y_dot) = problem.initial_state();
            problem.check_adaptation(0.0, &mut y, &mut y_dot).unwrap();
            problem.mesh().num_active_cells()
        })
        .collect();
    assert!(cells.windows(2).all(|w| w[0] <= w[1]), "cells: {:?}", cells);
    assert_eq!(cells[0], 16);
}

#[test]
fn adaptive_run_respects_cell_limit() {
    let counter = CellCounter::default();
    let mut problem = cavity(StokesParameters {
        error_threshold: 1e-8,
        max_cells: 40,
        ..StokesParameters::default()
    })
    .with_output(Box::new(counter.clone()));
    let result = run_cavity(&mut problem);

    assert!(result.summary.restarts >= 1);
    let cells = counter.cells.lock().unwrap();
    assert!(cells.len() > 1);
    assert!(cells.iter().all(|&n| n <= 40), "cells: {:?}", cells);
    assert!(problem.mesh().num_active_cells() <= 40);
    assert!(problem.mesh().is_balanced());
}

#[test]
fn lower_threshold_never_adapts_less_over_a_run() {
    let thresholds = [1e6, 1e-3, 1e-8];
    let adaptations: Vec<usize> = thresholds
        .iter()
        .map(|&error_threshold| {
            let mut problem = cavity(StokesParameters {
                error_threshold,
                ..StokesParameters::default()
            });
            let result = run_cavity(&mut problem);
            assert_eq!(result.summary.restarts, problem.adaptations());
            problem.adaptations()
        })
        .collect();
    assert_eq!(adaptations[0], 0);
    assert!(adaptations[2] >= 1);
    assert!(adaptations.windows(2).all(|w| w[0] <= w[1]), "adaptations: {:?}", adaptations);
}
