use crate::refine_active;
use nalgebra::Vector2;
use stokes_dae::dofs::DofHandler;
use stokes_dae::mesh::procedural::create_unit_square_quad_mesh;
use stokes_dae::mesh::AdaptiveQuadMesh;
use stokes_dae::space::{local_pressure_dof, local_velocity_dof, FiniteElementSpace, DOFS_PER_CELL};
use std::collections::HashSet;

#[test]
fn taylor_hood_space_layout() {
    let space = FiniteElementSpace::taylor_hood();
    assert_eq!(space.num_components(), 3);
    assert_eq!(space.component_to_block(), &[0, 0, 1]);
    assert_eq!(space.num_blocks(), 2);
    assert_eq!(space.velocity_degree(), 2);
    assert_eq!(space.pressure_degree(), 1);
    assert_eq!(space.dofs_per_cell(), DOFS_PER_CELL);
    assert_eq!(space.cell_quadrature().len(), 9);
    assert_eq!(local_velocity_dof(1, 0), 9);
    assert_eq!(local_pressure_dof(3), 21);
}

#[test]
fn single_cell_numbering() {
    let mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(1)).unwrap();
    let dofs = DofHandler::distribute(&mesh);
    assert_eq!(dofs.n_velocity_dofs(), 18);
    assert_eq!(dofs.n_pressure_dofs(), 4);
    assert_eq!(dofs.n_dofs(), 22);
    assert_eq!(dofs.block_sizes(), [18, 4]);
    assert_eq!(dofs.num_cells(), 1);
    assert_eq!(dofs.generation(), mesh.generation());

    let cell_dofs = dofs.cell_dofs(0);
    let unique: HashSet<_> = cell_dofs.iter().collect();
    assert_eq!(unique.len(), DOFS_PER_CELL);
    for node in 0..9 {
        assert_eq!(dofs.component(cell_dofs[local_velocity_dof(0, node)]), 0);
        assert_eq!(dofs.component(cell_dofs[local_velocity_dof(1, node)]), 1);
    }
    for node in 0..4 {
        assert!(cell_dofs[local_pressure_dof(node)] >= 18);
        assert_eq!(dofs.component(cell_dofs[local_pressure_dof(node)]), 2);
    }
}

#[test]
fn shared_nodes_are_numbered_once() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
    let dofs = DofHandler::distribute(&mesh);
    assert_eq!(dofs.n_velocity_dofs(), 2 * 25);
    assert_eq!(dofs.n_pressure_dofs(), 9);

    refine_active(&mut mesh, &[3]);
    let dofs = DofHandler::distribute(&mesh);
    // The refined cell adds 8 quarter points on its faces and 8 interior points
    assert_eq!(dofs.n_velocity_dofs(), 2 * (25 + 16));
    assert_eq!(dofs.n_pressure_dofs(), 9 + 5);
    assert_eq!(dofs.num_cells(), mesh.num_active_cells());
}

#[test]
fn interpolation_evaluates_at_support_points() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(1)).unwrap();
    mesh.refine_global(1);
    let dofs = DofHandler::distribute(&mesh);
    let vector = dofs.interpolate(&mesh, |x| Vector2::new(x.x, 2.0 * x.y), |x| x.x + x.y);

    for (node, &vertex) in dofs.velocity_vertices().iter().enumerate() {
        let x = mesh.vertex(vertex);
        assert_eq!(vector[dofs.velocity_dof(node, 0)], x.x);
        assert_eq!(vector[dofs.velocity_dof(node, 1)], 2.0 * x.y);
        assert_eq!(dofs.velocity_node(vertex), Some(node));
    }
    for (node, &vertex) in dofs.pressure_vertices().iter().enumerate() {
        let x = mesh.vertex(vertex);
        assert_eq!(vector[dofs.pressure_dof(node)], x.x + x.y);
        assert_eq!(dofs.pressure_node(vertex), Some(node));
    }
}
