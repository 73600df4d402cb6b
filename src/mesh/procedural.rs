//! Basic procedural mesh generation routines.
use crate::mesh::{BoundaryId, QuadMesh2d};
use nalgebra::{Point2, Vector2};

/// Boundary id of the face `x = x_min` of a rectangle.
pub const LEFT: BoundaryId = 0;
pub const RIGHT: BoundaryId = 1;
pub const BOTTOM: BoundaryId = 2;
pub const TOP: BoundaryId = 3;

pub fn create_unit_square_quad_mesh(cells_per_dim: usize) -> QuadMesh2d {
    create_rectangular_quad_mesh(&Point2::origin(), &Vector2::new(1.0, 1.0), cells_per_dim, cells_per_dim)
}

/// Generates an axis-aligned rectangle subdivided into `cells_x * cells_y` quadrilaterals.
///
/// Boundary faces are colorized: [`LEFT`], [`RIGHT`], [`BOTTOM`] and [`TOP`].
pub fn create_rectangular_quad_mesh(
    lower_left: &Point2<f64>,
    extents: &Vector2<f64>,
    cells_x: usize,
    cells_y: usize,
) -> QuadMesh2d {
    if cells_x == 0 || cells_y == 0 {
        return QuadMesh2d::from_vertices_and_connectivity(Vec::new(), Vec::new());
    }

    let hx = extents.x / cells_x as f64;
    let hy = extents.y / cells_y as f64;
    let to_global_vertex_index = |i, j| (cells_x + 1) * j + i;

    let mut vertices = Vec::with_capacity((cells_x + 1) * (cells_y + 1));
    for j in 0..=cells_y {
        for i in 0..=cells_x {
            vertices.push(lower_left + Vector2::new(i as f64 * hx, j as f64 * hy));
        }
    }

    let mut cells = Vec::with_capacity(cells_x * cells_y);
    for j in 0..cells_y {
        for i in 0..cells_x {
            cells.push([
                to_global_vertex_index(i, j),
                to_global_vertex_index(i + 1, j),
                to_global_vertex_index(i + 1, j + 1),
                to_global_vertex_index(i, j + 1),
            ]);
        }
    }

    let x_min = lower_left.x;
    let x_max = lower_left.x + extents.x;
    let y_min = lower_left.y;
    let tol = 1e-12 * extents.x.abs().max(extents.y.abs());
    QuadMesh2d::from_vertices_and_connectivity(vertices, cells).with_boundary_ids_from(|x| {
        if (x.x - x_min).abs() <= tol {
            LEFT
        } else if (x.x - x_max).abs() <= tol {
            RIGHT
        } else if (x.y - y_min).abs() <= tol {
            BOTTOM
        } else {
            TOP
        }
    })
}
