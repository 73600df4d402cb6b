//! Boundary, forcing and initial data of a flow problem.
use crate::mesh::BoundaryId;
use nalgebra::{Matrix2, Point2, Vector2};

/// Values of a known exact solution at a point.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ExactSolution {
    pub velocity: Vector2<f64>,
    /// Row `i` holds the gradient of velocity component `i`.
    pub velocity_gradient: Matrix2<f64>,
    pub pressure: f64,
}

/// Problem data consumed by the discretization.
///
/// Boundary faces whose id is not Dirichlet carry the natural (do-nothing) condition.
pub trait FlowData: Send + Sync {
    fn is_dirichlet(&self, boundary_id: BoundaryId) -> bool;

    /// Prescribed velocity on Dirichlet boundary `boundary_id` at position `x` and time `t`.
    fn dirichlet_velocity(&self, boundary_id: BoundaryId, x: &Point2<f64>, t: f64) -> Vector2<f64>;

    fn forcing(&self, _x: &Point2<f64>, _t: f64) -> Vector2<f64> {
        Vector2::zeros()
    }

    fn initial_velocity(&self, x: &Point2<f64>) -> Vector2<f64>;

    fn initial_pressure(&self, _x: &Point2<f64>) -> f64 {
        0.0
    }

    fn initial_velocity_dot(&self, _x: &Point2<f64>) -> Vector2<f64> {
        Vector2::zeros()
    }

    /// The exact solution, if known. Used for error reporting only.
    fn exact_solution(&self, _x: &Point2<f64>, _t: f64) -> Option<ExactSolution> {
        None
    }
}
