use crate::refine_active;
use nalgebra::{DVector, Point2, Vector2};
use stokes_dae::dofs::DofHandler;
use stokes_dae::mesh::procedural::create_unit_square_quad_mesh;
use stokes_dae::mesh::{AdaptiveQuadMesh, CellFlag};
use stokes_dae::transfer::SolutionTransfer;

fn quadratic_velocity(x: &Point2<f64>) -> Vector2<f64> {
    Vector2::new(x.x * x.x - x.x * x.y + 1.0, 2.0 * x.y * x.y - x.x)
}

fn linear_pressure(x: &Point2<f64>) -> f64 {
    4.0 * x.x - x.y
}

/// Flags a mixture of refinement and coarsening and executes it, transferring `vectors`.
fn adapt_and_transfer(mesh: &mut AdaptiveQuadMesh, vectors: &[&DVector<f64>]) -> (DofHandler, Vec<DVector<f64>>) {
    let dofs = DofHandler::distribute(mesh);
    let active = mesh.active_cells().to_vec();
    // Coarsen the family of the first coarse cell, refine the last active cell
    for &cell in &active[..4] {
        mesh.set_flag(cell, Some(CellFlag::Coarsen));
    }
    mesh.set_flag(*active.last().unwrap(), Some(CellFlag::Refine));
    let counts = mesh.prepare_coarsening_and_refinement();
    assert_eq!(counts.coarsen, 4);
    assert!(counts.refine >= 1);

    let transfer = SolutionTransfer::prepare_for_coarsening_and_refinement(mesh, &dofs, vectors).unwrap();
    assert_eq!(transfer.num_vectors(), vectors.len());
    mesh.execute_coarsening_and_refinement();
    let new_dofs = DofHandler::distribute(mesh);
    let transferred = transfer.interpolate(mesh, &new_dofs).unwrap();
    (new_dofs, transferred)
}

#[test]
fn constant_fields_are_transferred_exactly() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
    mesh.refine_global(1);
    let dofs = DofHandler::distribute(&mesh);
    let constant = dofs.interpolate(&mesh, |_| Vector2::new(1.5, -2.0), |_| 3.0);

    let (new_dofs, transferred) = adapt_and_transfer(&mut mesh, &[&constant]);
    let expected = new_dofs.interpolate(&mesh, |_| Vector2::new(1.5, -2.0), |_| 3.0);
    assert_eq!(transferred.len(), 1);
    assert_eq!(transferred[0].len(), new_dofs.n_dofs());
    assert!((&transferred[0] - &expected).amax() < 1e-14);
}

#[test]
fn polynomial_fields_in_the_discrete_space_are_preserved() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
    mesh.refine_global(1);
    refine_active(&mut mesh, &[5]);
    let dofs = DofHandler::distribute(&mesh);
    let field = dofs.interpolate(&mesh, quadratic_velocity, linear_pressure);
    let other = dofs.interpolate(&mesh, |x| Vector2::new(x.y, x.x), |_| 0.0);

    let (new_dofs, transferred) = adapt_and_transfer(&mut mesh, &[&field, &other]);
    let expected = new_dofs.interpolate(&mesh, quadratic_velocity, linear_pressure);
    let expected_other = new_dofs.interpolate(&mesh, |x| Vector2::new(x.y, x.x), |_| 0.0);
    assert!((&transferred[0] - &expected).amax() < 1e-12);
    assert!((&transferred[1] - &expected_other).amax() < 1e-12);
}

#[test]
fn transfer_requires_matching_generations() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(1)).unwrap();
    mesh.refine_global(1);
    let dofs = DofHandler::distribute(&mesh);
    let vector = DVector::zeros(dofs.n_dofs());

    let too_short = DVector::zeros(dofs.n_dofs() - 1);
    assert!(SolutionTransfer::prepare_for_coarsening_and_refinement(&mesh, &dofs, &[&too_short]).is_err());

    let transfer = SolutionTransfer::prepare_for_coarsening_and_refinement(&mesh, &dofs, &[&vector]).unwrap();
    // Interpolating before the mesh has changed is an error
    assert!(transfer.interpolate(&mesh, &dofs).is_err());

    mesh.refine_global(1);
    assert!(SolutionTransfer::prepare_for_coarsening_and_refinement(&mesh, &dofs, &[&vector]).is_err());
}
