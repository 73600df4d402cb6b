use crate::{refine_active, BoundaryIdData};
use nalgebra::{Matrix2, Point2, Vector2};
use std::f64::consts::PI;
use stokes_dae::discretization::Discretization;
use stokes_dae::kelly::{kelly_indicators, max_indicator, velocity_gradient_at};
use stokes_dae::mesh::procedural::create_unit_square_quad_mesh;
use stokes_dae::mesh::AdaptiveQuadMesh;
use stokes_dae::space::FiniteElementSpace;
use stokes_dae::SerialCommunicator;
use util::assert_approx_matrix_eq;

fn locally_refined_mesh() -> AdaptiveQuadMesh {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
    refine_active(&mut mesh, &[0]);
    refine_active(&mut mesh, &[3]);
    mesh
}

fn discretize(mesh: &AdaptiveQuadMesh) -> Discretization {
    Discretization::new(mesh, FiniteElementSpace::taylor_hood(), &BoundaryIdData, 0.0, &SerialCommunicator).unwrap()
}

#[test]
fn gradient_of_interpolated_linear_field_is_exact() {
    let mesh = locally_refined_mesh();
    let discretization = discretize(&mesh);
    let u = discretization.dofs().interpolate(
        &mesh,
        |x| Vector2::new(2.0 * x.x - x.y, 0.5 * x.x + 3.0 * x.y),
        |_| 0.0,
    );
    let expected = Matrix2::new(2.0, -1.0, 0.5, 3.0);
    for &cell in mesh.active_cells() {
        let gradient = velocity_gradient_at(&mesh, &discretization, &u, cell, &Point2::new(0.3, -0.7)).unwrap();
        assert_approx_matrix_eq!(gradient, expected, abstol = 1e-12);
    }
}

#[test]
fn indicators_vanish_for_fields_with_continuous_gradients() {
    let mesh = locally_refined_mesh();
    let discretization = discretize(&mesh);
    let comm = SerialCommunicator;

    let linear = discretization.dofs().interpolate(
        &mesh,
        |x| Vector2::new(1.0 + 2.0 * x.x - x.y, 3.0 * x.x + x.y),
        |x| x.x,
    );
    let indicators = kelly_indicators(&mesh, &discretization, &linear, &comm).unwrap();
    assert_eq!(indicators.len(), mesh.num_active_cells());
    assert!(indicators.iter().all(|&eta| eta.abs() < 1e-12));
}

#[test]
fn indicators_detect_gradient_jumps() {
    let mesh = locally_refined_mesh();
    let discretization = discretize(&mesh);
    let comm = SerialCommunicator;

    let mut wavy = discretization.dofs().interpolate(
        &mesh,
        |x| Vector2::new((2.0 * PI * x.x).sin() * (PI * x.y).cos(), (3.0 * PI * x.y).sin()),
        |_| 0.0,
    );
    discretization
        .hanging_node_constraints()
        .distribute(&mut wavy);
    let indicators = kelly_indicators(&mesh, &discretization, &wavy, &comm).unwrap();
    assert!(indicators.iter().all(|&eta| eta >= 0.0));
    assert!(indicators.iter().any(|&eta| eta > 1e-3));

    let max = max_indicator(&indicators, discretization.locally_owned_cells(), &comm);
    assert_eq!(max, indicators.iter().copied().fold(0.0, f64::max));
}

#[test]
fn stale_discretization_is_rejected() {
    let mut mesh = locally_refined_mesh();
    let discretization = discretize(&mesh);
    let u = discretization.create_vector().into_vector();
    mesh.refine_global(1);
    assert!(kelly_indicators(&mesh, &discretization, &u, &SerialCommunicator).is_err());
}
