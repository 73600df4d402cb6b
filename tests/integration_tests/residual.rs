use util::wavy_vector;
use crate::{ChannelFlow, PlugFlow};
use nalgebra::{DVector, Vector2};
use stokes_dae::discretization::Discretization;
use stokes_dae::mesh::procedural::create_unit_square_quad_mesh;
use stokes_dae::mesh::{AdaptiveQuadMesh, CellFlag};
use stokes_dae::space::FiniteElementSpace;
use stokes_dae::stokes::assemble_residual;
use stokes_dae::{DaeModel, FlowData, SerialCommunicator, StokesParameters, StokesProblem};

/// A 2x2 mesh with one refined cell, and one of its children refined once more.
fn locally_refined_mesh() -> AdaptiveQuadMesh {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
    for index in [0, 3] {
        let cell = mesh.active_cells()[index];
        mesh.set_flag(cell, Some(CellFlag::Refine));
        mesh.execute_coarsening_and_refinement();
    }
    mesh
}

fn channel_flow_state(
    mesh: &AdaptiveQuadMesh,
    discretization: &Discretization,
    data: &ChannelFlow,
    t: f64,
) -> (DVector<f64>, DVector<f64>) {
    let dofs = discretization.dofs();
    let y = dofs.interpolate(mesh, |x| data.exact_solution(x, t).unwrap().velocity, |_| 0.0);
    let y_dot = dofs.interpolate(mesh, |x| Vector2::new(x.y * (1.0 - x.y), 0.0), |_| 0.0);
    (y, y_dot)
}

#[test]
fn exact_channel_flow_has_zero_residual_with_hanging_nodes() {
    let mesh = locally_refined_mesh();
    let data = ChannelFlow { viscosity: 0.7 };
    let t = 0.3;
    let discretization =
        Discretization::new(&mesh, FiniteElementSpace::taylor_hood(), &data, t, &SerialCommunicator).unwrap();
    assert!(discretization.hanging_node_constraints().n_constraints() > 0);

    let (y, y_dot) = channel_flow_state(&mesh, &discretization, &data, t);
    let mut residual = discretization.create_vector().into_vector();
    assemble_residual(&mesh, &discretization, &data, 0.7, t, &y, &y_dot, &mut residual, &SerialCommunicator).unwrap();
    assert!(residual.amax() < 1e-12, "residual: {}", residual.amax());
}

#[test]
fn constrained_rows_measure_distance_to_constraints() {
    let mesh = locally_refined_mesh();
    let data = ChannelFlow { viscosity: 1.0 };
    let t = 0.5;
    let discretization =
        Discretization::new(&mesh, FiniteElementSpace::taylor_hood(), &data, t, &SerialCommunicator).unwrap();
    let constraints = discretization.constraints();
    let (mut y, y_dot) = channel_flow_state(&mesh, &discretization, &data, t);

    // Perturb constrained entries only, the consistent state stays the same
    let perturbation = wavy_vector(y.len());
    for dof in constraints.constrained_dofs() {
        y[dof] += perturbation[dof];
    }
    let mut residual = DVector::zeros(y.len());
    assemble_residual(&mesh, &discretization, &data, 1.0, t, &y, &y_dot, &mut residual, &SerialCommunicator).unwrap();

    for dof in 0..y.len() {
        let expected = if constraints.is_constrained(dof) {
            perturbation[dof]
        } else {
            0.0
        };
        assert!((residual[dof] - expected).abs() < 1e-12, "dof {}: {} vs {}", dof, residual[dof], expected);
    }
}

#[test]
fn plug_flow_initial_state_has_zero_residual() {
    let parameters = StokesParameters {
        initial_global_refinement: 2,
        use_space_adaptivity: false,
        ..StokesParameters::default()
    };
    let mut problem = StokesProblem::new(&create_unit_square_quad_mesh(1), PlugFlow, parameters, SerialCommunicator)
        .unwrap();
    let (y, y_dot) = problem.initial_state();
    let mut residual = problem.create_new_vector().into_vector();
    problem.residual(0.0, &y, &y_dot, &mut residual).unwrap();
    assert!(residual.amax() < 1e-12);

    // At a later time the Dirichlet data has moved on, which shows up in the constrained rows
    problem.residual(0.5, &y, &y_dot, &mut residual).unwrap();
    let discretization = problem.discretization();
    assert_eq!(discretization.constraint_time(), 0.5);
    for dof in discretization.constraints().constrained_dofs() {
        let expected = if discretization.dofs().component(dof) == 0 { -0.5 } else { 0.0 };
        assert!((residual[dof] - expected).abs() < 1e-12);
    }
}

#[test]
fn residual_rejects_mismatched_vectors() {
    let mesh = locally_refined_mesh();
    let data = ChannelFlow { viscosity: 1.0 };
    let discretization =
        Discretization::new(&mesh, FiniteElementSpace::taylor_hood(), &data, 0.0, &SerialCommunicator).unwrap();
    let n = discretization.n_dofs();
    let y = DVector::zeros(n);
    let mut residual = DVector::zeros(n + 1);
    assert!(
        assemble_residual(&mesh, &discretization, &data, 1.0, 0.0, &y, &y, &mut residual, &SerialCommunicator).is_err()
    );
}

#[test]
fn residual_rejects_stale_discretization() {
    let mut mesh = locally_refined_mesh();
    let data = ChannelFlow { viscosity: 1.0 };
    let discretization =
        Discretization::new(&mesh, FiniteElementSpace::taylor_hood(), &data, 0.0, &SerialCommunicator).unwrap();
    mesh.refine_global(1);
    let y = discretization.create_vector().into_vector();
    let mut residual = discretization.create_vector().into_vector();
    assert!(
        assemble_residual(&mesh, &discretization, &data, 1.0, 0.0, &y, &y, &mut residual, &SerialCommunicator).is_err()
    );
}
