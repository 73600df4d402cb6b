use crate::{cell_area, refine_active};
use proptest::collection::vec;
use proptest::prelude::*;
use stokes_dae::mesh::procedural::{create_rectangular_quad_mesh, create_unit_square_quad_mesh, BOTTOM, LEFT, RIGHT, TOP};
use stokes_dae::mesh::{AdaptiveQuadMesh, CellFlag, FaceNeighbor, FlagCounts, QuadMesh2d};
use nalgebra::{Point2, Vector2};

#[test]
fn rectangular_mesh_has_colorized_boundary() {
    let mesh = create_rectangular_quad_mesh(&Point2::new(-1.0, 0.0), &Vector2::new(2.0, 1.0), 2, 1);
    assert_eq!(mesh.num_cells(), 2);
    assert_eq!(mesh.vertices().len(), 6);
    // Faces are ordered bottom, right, top, left
    assert_eq!(mesh.boundary_ids()[0], [Some(BOTTOM), None, Some(TOP), Some(LEFT)]);
    assert_eq!(mesh.boundary_ids()[1], [Some(BOTTOM), Some(RIGHT), Some(TOP), None]);
    assert!(mesh.validate().is_ok());
}

#[test]
fn clockwise_cells_are_rejected() {
    let vertices = vec![
        Point2::new(0.0, 0.0),
        Point2::new(1.0, 0.0),
        Point2::new(1.0, 1.0),
        Point2::new(0.0, 1.0),
    ];
    let mesh = QuadMesh2d::from_vertices_and_connectivity(vertices, vec![[0, 3, 2, 1]]);
    assert!(mesh.validate().is_err());
    assert!(AdaptiveQuadMesh::from_coarse_mesh(&mesh).is_err());
}

#[test]
fn global_refinement() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
    assert_eq!(mesh.num_active_cells(), 4);
    assert_eq!(mesh.generation(), 0);

    mesh.refine_global(2);
    assert_eq!(mesh.num_active_cells(), 64);
    assert_eq!(mesh.generation(), 2);
    assert_eq!(mesh.max_level(), 2);
    assert!(mesh.is_balanced());

    let total_area: f64 = mesh
        .active_cells()
        .iter()
        .map(|&cell| cell_area(&mesh, cell))
        .sum();
    assert!((total_area - 1.0).abs() < 1e-12);
}

#[test]
fn children_inherit_boundary_ids() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(1)).unwrap();
    mesh.refine_global(1);
    let children = mesh.children(0).unwrap();
    // Child 0 contains the lower left corner
    assert_eq!(mesh.boundary_id(children[0], 0), Some(BOTTOM));
    assert_eq!(mesh.boundary_id(children[0], 3), Some(LEFT));
    assert_eq!(mesh.boundary_id(children[0], 1), None);
    assert_eq!(mesh.boundary_id(children[2], 1), Some(RIGHT));
    assert_eq!(mesh.boundary_id(children[2], 2), Some(TOP));
    for (k, &child) in children.iter().enumerate() {
        assert_eq!(mesh.parent(child), Some(0));
        assert_eq!(mesh.child_index(child), k);
        assert_eq!(mesh.level(child), 1);
    }
}

#[test]
fn face_neighbors_across_hanging_faces() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
    // Coarse cells are numbered row by row, so cell 1 is the right neighbor of cell 0
    assert_eq!(mesh.face_neighbor(1, 3), FaceNeighbor::Conforming { cell: 0, face: 1 });

    refine_active(&mut mesh, &[0]);
    assert_eq!(mesh.num_active_cells(), 7);
    let children = mesh.children(0).unwrap();

    match mesh.face_neighbor(1, 3) {
        FaceNeighbor::Finer { cells } => {
            let mut cells = cells.to_vec();
            cells.sort();
            let mut expected = vec![(children[1], 1), (children[2], 1)];
            expected.sort();
            assert_eq!(cells, expected);
        }
        other => panic!("expected a finer neighbor, got {:?}", other),
    }
    assert_eq!(mesh.face_neighbor(children[1], 1), FaceNeighbor::Coarser { cell: 1, face: 3 });
    assert_eq!(
        mesh.face_neighbor(children[0], 1),
        FaceNeighbor::Conforming {
            cell: children[1],
            face: 3
        }
    );
    assert_eq!(mesh.face_neighbor(children[0], 0), FaceNeighbor::Boundary(Some(BOTTOM)));
    assert!(mesh.is_balanced());
}

#[test]
fn refinement_spreads_to_keep_balance() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
    refine_active(&mut mesh, &[0]);
    // The child of cell 0 touching the center of the domain borders cells 1 and 2
    let inner_child = mesh.children(0).unwrap()[2];
    mesh.set_flag(inner_child, Some(CellFlag::Refine));
    let counts = mesh.prepare_coarsening_and_refinement();
    // The coarse neighbors to the right and top must be refined as well
    assert_eq!(counts.refine, 3);
    assert_eq!(mesh.flag(1), Some(CellFlag::Refine));
    assert_eq!(mesh.flag(2), Some(CellFlag::Refine));
    mesh.execute_coarsening_and_refinement();
    assert!(mesh.is_balanced());
    assert_eq!(mesh.num_active_cells(), 7 + 3 * 3);
}

#[test]
fn coarsening_restores_parent() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(1)).unwrap();
    mesh.refine_global(1);
    let num_vertices = mesh.num_vertices();
    for cell in mesh.active_cells().to_vec() {
        mesh.set_flag(cell, Some(CellFlag::Coarsen));
    }
    assert_eq!(
        mesh.prepare_coarsening_and_refinement(),
        FlagCounts {
            refine: 0,
            coarsen: 4
        }
    );
    mesh.execute_coarsening_and_refinement();
    assert_eq!(mesh.active_cells(), &[0]);
    assert_eq!(mesh.generation(), 2);
    assert_eq!(mesh.num_vertices(), num_vertices);
}

#[test]
fn incomplete_families_are_not_coarsened() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(1)).unwrap();
    mesh.refine_global(1);
    let active = mesh.active_cells().to_vec();
    for &cell in &active[..3] {
        mesh.set_flag(cell, Some(CellFlag::Coarsen));
    }
    assert_eq!(mesh.prepare_coarsening_and_refinement(), FlagCounts::default());

    // Coarse cells have no parent and can not be coarsened
    let mut coarse = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(1)).unwrap();
    coarse.set_flag(0, Some(CellFlag::Coarsen));
    assert_eq!(coarse.prepare_coarsening_and_refinement(), FlagCounts::default());
}

#[test]
fn fixed_fraction_marking() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
    let indicators = [4.0, 1.0, 3.0, 2.0];
    let counts = mesh
        .refine_and_coarsen_fixed_fraction(&indicators, 0.3, 0.1)
        .unwrap();
    assert_eq!(counts, FlagCounts { refine: 1, coarsen: 1 });
    assert_eq!(mesh.flag(0), Some(CellFlag::Refine));
    assert_eq!(mesh.flag(1), Some(CellFlag::Coarsen));
    assert_eq!(mesh.flag(2), None);
    assert_eq!(mesh.flag(3), None);

    assert!(mesh
        .refine_and_coarsen_fixed_fraction(&[1.0, 2.0], 0.3, 0.1)
        .is_err());
    assert!(mesh
        .refine_and_coarsen_fixed_fraction(&[1.0, -2.0, 0.0, 0.0], 0.3, 0.1)
        .is_err());
}

#[test]
fn fixed_number_marking_respects_cell_limit() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(4)).unwrap();
    let indicators: Vec<f64> = (0..16).map(|i| i as f64).collect();

    let counts = mesh
        .refine_and_coarsen_fixed_number(&indicators, 0.5, 0.25, None)
        .unwrap();
    assert_eq!(counts, FlagCounts { refine: 8, coarsen: 4 });
    assert_eq!(mesh.flag(15), Some(CellFlag::Refine));
    assert_eq!(mesh.flag(0), Some(CellFlag::Coarsen));

    mesh.clear_flags();
    // 16 + 3 r - 0.75 * 4 <= 25 allows r = 4
    let counts = mesh
        .refine_and_coarsen_fixed_number(&indicators, 0.5, 0.25, Some(25))
        .unwrap();
    assert_eq!(counts, FlagCounts { refine: 4, coarsen: 4 });

    mesh.clear_flags();
    // Too many cells already: only coarsen
    let counts = mesh
        .refine_and_coarsen_fixed_number(&indicators, 0.5, 0.0, Some(12))
        .unwrap();
    assert_eq!(counts.refine, 0);
    assert!(counts.coarsen >= 6);
}

/// Active index of a cell with exactly one coarser face neighbor.
fn index_next_to_coarser_cell(mesh: &AdaptiveQuadMesh) -> usize {
    mesh.active_cells()
        .iter()
        .position(|&cell| {
            (0..4)
                .filter(|&face| matches!(mesh.face_neighbor(cell, face), FaceNeighbor::Coarser { .. }))
                .count()
                == 1
        })
        .expect("mesh has a hanging face")
}

#[test]
fn cell_limit_accounts_for_balancing() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
    refine_active(&mut mesh, &[0]);
    assert_eq!(mesh.num_active_cells(), 7);
    let mut indicators = vec![1.0; 7];
    indicators[index_next_to_coarser_cell(&mesh)] = 10.0;

    // Marking predicts 7 + 3 = 10 cells, but balancing also refines the coarse neighbor
    let counts = mesh
        .refine_and_coarsen_fixed_number(&indicators, 0.15, 0.0, Some(12))
        .unwrap();
    assert_eq!(counts, FlagCounts { refine: 1, coarsen: 0 });
    let counts = mesh.prepare_within_cell_limit(&indicators, 12).unwrap();
    assert_eq!(counts, FlagCounts::default());
    assert!(mesh.active_cells().iter().all(|&cell| mesh.flag(cell).is_none()));

    mesh.refine_and_coarsen_fixed_number(&indicators, 0.15, 0.0, Some(13))
        .unwrap();
    let counts = mesh.prepare_within_cell_limit(&indicators, 13).unwrap();
    assert_eq!(counts, FlagCounts { refine: 2, coarsen: 0 });
    mesh.execute_coarsening_and_refinement();
    assert_eq!(mesh.num_active_cells(), 13);
    assert!(mesh.is_balanced());

    assert!(mesh.prepare_within_cell_limit(&[1.0], 100).is_err());
}

#[test]
fn repeated_refinement_and_coarsening_reuses_storage() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
    refine_active(&mut mesh, &[0]);
    let active = mesh.active_cells().to_vec();
    let (num_cells, num_vertices) = (mesh.num_allocated_cells(), mesh.num_vertices());

    for _ in 0..5 {
        for cell in mesh.active_cells().to_vec() {
            if mesh.level(cell) == 1 {
                mesh.set_flag(cell, Some(CellFlag::Coarsen));
            }
        }
        mesh.execute_coarsening_and_refinement();
        assert_eq!(mesh.num_active_cells(), 4);
        assert!(mesh.children(0).is_none());

        refine_active(&mut mesh, &[0]);
        assert_eq!(mesh.active_cells(), active.as_slice());
        assert_eq!(mesh.num_allocated_cells(), num_cells);
        assert_eq!(mesh.num_vertices(), num_vertices);
        assert!(mesh.active_cells().iter().all(|&cell| mesh.flag(cell).is_none()));
    }
    assert!(mesh.is_balanced());
}

#[test]
fn locally_owned_ranges_partition_active_cells() {
    let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(3)).unwrap();
    mesh.refine_global(1);
    let n = mesh.num_active_cells();
    let ranges: Vec<_> = (0..4).map(|rank| mesh.locally_owned_range(rank, 4)).collect();
    assert_eq!(ranges[0].start, 0);
    assert_eq!(ranges[3].end, n);
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
    for index in 0..n {
        let rank = mesh.subdomain_id(index, 4);
        assert!(ranges[rank].contains(&index));
    }
}

fn apply_flags(mesh: &mut AdaptiveQuadMesh, choices: &[u8]) {
    for (i, cell) in mesh.active_cells().to_vec().into_iter().enumerate() {
        let flag = match choices[i % choices.len()] {
            0 => Some(CellFlag::Refine),
            1 => Some(CellFlag::Coarsen),
            _ => None,
        };
        mesh.set_flag(cell, flag);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn adaptation_keeps_mesh_balanced_and_area_preserved(
        rounds in vec(vec(0u8..4, 1..40), 1..4)
    ) {
        let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
        mesh.refine_global(1);
        for choices in rounds {
            let generation = mesh.generation();
            apply_flags(&mut mesh, &choices);
            mesh.execute_coarsening_and_refinement();
            prop_assert_eq!(mesh.generation(), generation + 1);
            prop_assert!(mesh.is_balanced());
            prop_assert!(mesh.active_cells().iter().all(|&cell| mesh.flag(cell).is_none()));
        }
        let total_area: f64 = mesh
            .active_cells()
            .iter()
            .map(|&cell| cell_area(&mesh, cell))
            .sum();
        prop_assert!((total_area - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fixed_fraction_refines_when_total_is_positive(
        indicators in vec(0.0..10.0f64, 16),
        top in 0.01..1.0f64,
    ) {
        let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(4)).unwrap();
        let counts = mesh.refine_and_coarsen_fixed_fraction(&indicators, top, 0.0).unwrap();
        let total: f64 = indicators.iter().sum();
        if total > 0.0 {
            prop_assert!(counts.refine >= 1);
        }
        prop_assert_eq!(counts.coarsen, 0);
    }

    #[test]
    fn fixed_number_never_predicts_more_than_max_cells(
        indicators in vec(0.0..10.0f64, 16),
        (top, bottom) in (0.0..1.0f64, 0.0..1.0f64).prop_filter("fractions sum to at most one", |(t, b)| t + b <= 1.0),
        max_cells in 16usize..100,
    ) {
        let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(4)).unwrap();
        let counts = mesh
            .refine_and_coarsen_fixed_number(&indicators, top, bottom, Some(max_cells))
            .unwrap();
        let predicted = 16.0 + 3.0 * counts.refine as f64 - 0.75 * counts.coarsen as f64;
        prop_assert!(predicted <= max_cells as f64);
    }

    #[test]
    fn adaptation_within_cell_limit_never_exceeds_it(
        indicators in vec(0.0..10.0f64, 64),
        (top, bottom) in (0.0..1.0f64, 0.0..1.0f64).prop_filter("fractions sum to at most one", |(t, b)| t + b <= 1.0),
        extra_cells in 0usize..60,
    ) {
        let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(&create_unit_square_quad_mesh(2)).unwrap();
        mesh.refine_global(1);
        refine_active(&mut mesh, &[0, 5]);
        let n = mesh.num_active_cells();
        let max_cells = n + extra_cells;
        let indicators = &indicators[..n];

        mesh.refine_and_coarsen_fixed_number(indicators, top, bottom, Some(max_cells)).unwrap();
        let counts = mesh.prepare_within_cell_limit(indicators, max_cells).unwrap();
        mesh.execute_coarsening_and_refinement();
        prop_assert_eq!(mesh.num_active_cells(), n + 3 * counts.refine - 3 * (counts.coarsen / 4));
        prop_assert!(mesh.num_active_cells() <= max_cells);
        prop_assert!(mesh.is_balanced());
    }
}
