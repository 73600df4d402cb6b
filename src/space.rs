//! The Taylor-Hood finite element space descriptor.
use crate::element::{Q1_NODES, Q2_NODES};
use crate::quadrature::{gauss, quadrilateral_gauss, GaussRule1d, QuadratureRule2d};

/// Number of velocity components.
pub const VELOCITY_COMPONENTS: usize = 2;
/// Degrees of freedom per cell: two biquadratic velocity components and a bilinear pressure.
pub const DOFS_PER_CELL: usize = VELOCITY_COMPONENTS * Q2_NODES + Q1_NODES;

/// Local index of the velocity degree of freedom of component `component` at Q2 node `node`.
///
/// Cell-local degrees of freedom are ordered by component: all x-velocities, all y-velocities,
/// then all pressures.
pub const fn local_velocity_dof(component: usize, node: usize) -> usize {
    component * Q2_NODES + node
}

pub const fn local_pressure_dof(node: usize) -> usize {
    VELOCITY_COMPONENTS * Q2_NODES + node
}

/// Describes the finite element space: the field components, their polynomial degrees and which
/// solution block each component belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiniteElementSpace {
    component_to_block: Vec<usize>,
    velocity_degree: usize,
    pressure_degree: usize,
}

impl FiniteElementSpace {
    /// Continuous Q2^2-Q1 elements. Components are `(u_x, u_y, p)`, the velocity components form
    /// block 0 and the pressure block 1.
    pub fn taylor_hood() -> Self {
        Self {
            component_to_block: vec![0, 0, 1],
            velocity_degree: 2,
            pressure_degree: 1,
        }
    }

    pub fn num_components(&self) -> usize {
        self.component_to_block.len()
    }

    pub fn component_to_block(&self) -> &[usize] {
        &self.component_to_block
    }

    pub fn num_blocks(&self) -> usize {
        self.component_to_block.iter().max().map_or(0, |b| b + 1)
    }

    pub fn velocity_degree(&self) -> usize {
        self.velocity_degree
    }

    pub fn pressure_degree(&self) -> usize {
        self.pressure_degree
    }

    pub fn dofs_per_cell(&self) -> usize {
        DOFS_PER_CELL
    }

    /// Gauss rule with `degree + 1` points per direction, exact for the products of velocity
    /// basis functions on parallelograms.
    pub fn cell_quadrature(&self) -> QuadratureRule2d {
        quadrilateral_gauss(self.velocity_degree + 1)
    }

    pub fn face_quadrature(&self) -> GaussRule1d {
        gauss(self.velocity_degree + 1)
    }
}
