//! Kelly-type a posteriori error indicator for the velocity.
//!
//! For every active cell `K`,
//!
//! ```text
//! eta_K^2 = h_K / 24 * sum_{F in faces(K)} int_F |[grad u . n]|^2
//! ```
//!
//! where the jump of the normal derivative is summed over the velocity components, `h_K` is the
//! cell diameter and boundary faces do not contribute. On faces shared with finer cells the
//! integral is split into the two halves.
use crate::comm::Communicator;
use crate::discretization::Discretization;
use crate::element::{q2_gradients, reference_face_point, Q2_NODES};
use crate::mesh::{AdaptiveQuadMesh, CellId, FaceNeighbor};
use crate::space::local_velocity_dof;
use eyre::eyre;
use nalgebra::{DVector, Matrix2, Point2, Vector2};
use rayon::prelude::*;

/// Computes one indicator per active cell, in active order.
///
/// Each worker evaluates its locally owned cells, the results are combined with a collective
/// sum, so every worker receives all indicators.
pub fn kelly_indicators(
    mesh: &AdaptiveQuadMesh,
    discretization: &Discretization,
    solution: &DVector<f64>,
    comm: &dyn Communicator,
) -> eyre::Result<Vec<f64>> {
    discretization.ensure_current(mesh)?;
    let face_rule = discretization.space().face_quadrature();
    let owned = discretization.locally_owned_cells();

    let local_indicators = owned
        .clone()
        .into_par_iter()
        .map(|active_index| {
            let cell = mesh.active_cells()[active_index];
            let mut sum_of_squares = 0.0;
            for face in 0..4 {
                let (a, b) = mesh.element(cell).face(face);
                let normal = outward_normal(&a, &b);
                let segments: Vec<(f64, f64, CellId)> = match mesh.face_neighbor(cell, face) {
                    FaceNeighbor::Boundary(_) => continue,
                    FaceNeighbor::Conforming { cell: neighbor, .. } | FaceNeighbor::Coarser { cell: neighbor, .. } => {
                        vec![(-1.0, 1.0, neighbor)]
                    }
                    FaceNeighbor::Finer { cells } => vec![(-1.0, 0.0, cells[0].0), (0.0, 1.0, cells[1].0)],
                };
                for (s_start, s_end, neighbor) in segments {
                    let half_length = 0.5 * (s_end - s_start);
                    let jacobian = half_length * 0.5 * (b - a).norm();
                    for (&w, &s) in face_rule.weights.iter().zip(&face_rule.points) {
                        let s_cell = s_start + (s + 1.0) * half_length;
                        let xi = reference_face_point(face, s_cell);
                        let x = mesh.element(cell).map_reference_coords(&xi);
                        let gradient = velocity_gradient_at(mesh, discretization, solution, cell, &xi)?;
                        let xi_neighbor = reference_point_on_faces(mesh, neighbor, &x)?;
                        let neighbor_gradient =
                            velocity_gradient_at(mesh, discretization, solution, neighbor, &xi_neighbor)?;
                        let jump = (gradient - neighbor_gradient) * normal;
                        sum_of_squares += w * jacobian * jump.norm_squared();
                    }
                }
            }
            let h = mesh.element(cell).diameter();
            Ok((h / 24.0 * sum_of_squares).sqrt())
        })
        .collect::<eyre::Result<Vec<f64>>>()?;

    let mut indicators = vec![0.0; mesh.num_active_cells()];
    indicators[owned].copy_from_slice(&local_indicators);
    comm.sum_slice(&mut indicators);
    Ok(indicators)
}

/// Largest indicator over all workers.
pub fn max_indicator(indicators: &[f64], owned: std::ops::Range<usize>, comm: &dyn Communicator) -> f64 {
    let local_max = indicators[owned].iter().copied().fold(0.0, f64::max);
    comm.max(local_max)
}

fn outward_normal(a: &Point2<f64>, b: &Point2<f64>) -> Vector2<f64> {
    let d = (b - a).normalize();
    Vector2::new(d.y, -d.x)
}

/// Reference coordinates of the point `x`, which must lie on one of the faces of `cell`.
fn reference_point_on_faces(mesh: &AdaptiveQuadMesh, cell: CellId, x: &Point2<f64>) -> eyre::Result<Point2<f64>> {
    let element = mesh.element(cell);
    let (face, t) = (0..4)
        .map(|face| {
            let (a, b) = element.face(face);
            let d = b - a;
            let t = (x - a).dot(&d) / d.norm_squared();
            let distance = (a + d * t.clamp(0.0, 1.0) - x).norm();
            (face, t, distance / d.norm())
        })
        .min_by(|(_, _, d1), (_, _, d2)| d1.total_cmp(d2))
        .filter(|(_, _, distance)| *distance < 1e-8)
        .map(|(face, t, _)| (face, t))
        .ok_or_else(|| eyre!("point ({}, {}) does not lie on a face of cell {}", x.x, x.y, cell))?;
    Ok(reference_face_point(face, 2.0 * t - 1.0))
}

/// Physical velocity gradient of the discrete solution at reference point `xi` of `cell`.
/// Row `i` holds the gradient of component `i`.
pub fn velocity_gradient_at(
    mesh: &AdaptiveQuadMesh,
    discretization: &Discretization,
    solution: &DVector<f64>,
    cell: CellId,
    xi: &Point2<f64>,
) -> eyre::Result<Matrix2<f64>> {
    let active_index = mesh
        .active_index(cell)
        .ok_or_else(|| eyre!("cell {} is not active", cell))?;
    let local = discretization.dofs().extract_local(solution, active_index);
    let jacobian = mesh.element(cell).reference_jacobian(xi);
    let inverse_transpose = jacobian
        .try_inverse()
        .ok_or_else(|| eyre!("singular element Jacobian on cell {}", cell))?
        .transpose();
    let gradients = inverse_transpose * q2_gradients(xi);
    let mut gradient = Matrix2::zeros();
    for c in 0..2 {
        for i in 0..Q2_NODES {
            let u = local[local_velocity_dof(c, i)];
            gradient[(c, 0)] += gradients[(0, i)] * u;
            gradient[(c, 1)] += gradients[(1, i)] * u;
        }
    }
    Ok(gradient)
}
