//! Degree-of-freedom numbering for the Taylor-Hood space on an adaptive mesh.
use crate::mesh::{AdaptiveQuadMesh, VertexId};
use crate::space::{local_pressure_dof, local_velocity_dof, DOFS_PER_CELL, VELOCITY_COMPONENTS};
use nalgebra::{DVector, Point2, Vector2};
use rustc_hash::FxHashMap;

/// Numbering of the global degrees of freedom for one mesh generation.
///
/// Velocity nodes are the support points of the Q2 element, pressure nodes the cell vertices.
/// Both are numbered in order of first appearance when traversing the active cells. Velocity
/// degrees of freedom come first (`2 * node + component`, block 0), followed by the pressure
/// degrees of freedom (block 1).
///
/// Nodes sitting on hanging faces are numbered like all other nodes and later constrained.
#[derive(Debug, Clone)]
pub struct DofHandler {
    generation: u64,
    velocity_vertices: Vec<VertexId>,
    pressure_vertices: Vec<VertexId>,
    velocity_node_of: FxHashMap<VertexId, usize>,
    pressure_node_of: FxHashMap<VertexId, usize>,
    cell_dofs: Vec<[usize; DOFS_PER_CELL]>,
}

impl DofHandler {
    pub fn distribute(mesh: &AdaptiveQuadMesh) -> Self {
        let mut velocity_vertices = Vec::new();
        let mut pressure_vertices = Vec::new();
        let mut velocity_node_of = FxHashMap::default();
        let mut pressure_node_of = FxHashMap::default();

        let mut cell_nodes = Vec::with_capacity(mesh.num_active_cells());
        for &cell in mesh.active_cells() {
            let q2_nodes = mesh.q2_nodes(cell).map(|vertex| {
                *velocity_node_of.entry(vertex).or_insert_with(|| {
                    velocity_vertices.push(vertex);
                    velocity_vertices.len() - 1
                })
            });
            let q1_nodes = mesh.cell_vertices(cell).map(|vertex| {
                *pressure_node_of.entry(vertex).or_insert_with(|| {
                    pressure_vertices.push(vertex);
                    pressure_vertices.len() - 1
                })
            });
            cell_nodes.push((q2_nodes, q1_nodes));
        }

        let n_u = VELOCITY_COMPONENTS * velocity_vertices.len();
        let cell_dofs = cell_nodes
            .into_iter()
            .map(|(q2_nodes, q1_nodes)| {
                let mut dofs = [0; DOFS_PER_CELL];
                for (i, node) in q2_nodes.iter().enumerate() {
                    for c in 0..VELOCITY_COMPONENTS {
                        dofs[local_velocity_dof(c, i)] = VELOCITY_COMPONENTS * node + c;
                    }
                }
                for (i, node) in q1_nodes.iter().enumerate() {
                    dofs[local_pressure_dof(i)] = n_u + node;
                }
                dofs
            })
            .collect();

        Self {
            generation: mesh.generation(),
            velocity_vertices,
            pressure_vertices,
            velocity_node_of,
            pressure_node_of,
            cell_dofs,
        }
    }

    /// The mesh generation this numbering was built for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn n_velocity_dofs(&self) -> usize {
        VELOCITY_COMPONENTS * self.velocity_vertices.len()
    }

    pub fn n_pressure_dofs(&self) -> usize {
        self.pressure_vertices.len()
    }

    pub fn n_dofs(&self) -> usize {
        self.n_velocity_dofs() + self.n_pressure_dofs()
    }

    /// Sizes of the velocity and pressure blocks.
    pub fn block_sizes(&self) -> [usize; 2] {
        [self.n_velocity_dofs(), self.n_pressure_dofs()]
    }

    /// Global degrees of freedom of the active cell with the given active index, in local order.
    pub fn cell_dofs(&self, active_index: usize) -> &[usize; DOFS_PER_CELL] {
        &self.cell_dofs[active_index]
    }

    pub fn num_cells(&self) -> usize {
        self.cell_dofs.len()
    }

    pub fn velocity_dof(&self, node: usize, component: usize) -> usize {
        VELOCITY_COMPONENTS * node + component
    }

    pub fn pressure_dof(&self, node: usize) -> usize {
        self.n_velocity_dofs() + node
    }

    pub fn velocity_node(&self, vertex: VertexId) -> Option<usize> {
        self.velocity_node_of.get(&vertex).copied()
    }

    pub fn pressure_node(&self, vertex: VertexId) -> Option<usize> {
        self.pressure_node_of.get(&vertex).copied()
    }

    /// Mesh vertex of every velocity node, indexed by node.
    pub fn velocity_vertices(&self) -> &[VertexId] {
        &self.velocity_vertices
    }

    pub fn pressure_vertices(&self) -> &[VertexId] {
        &self.pressure_vertices
    }

    /// Component of a global degree of freedom: 0 and 1 for velocities, 2 for the pressure.
    pub fn component(&self, dof: usize) -> usize {
        let n_u = self.n_velocity_dofs();
        if dof < n_u {
            dof % VELOCITY_COMPONENTS
        } else {
            VELOCITY_COMPONENTS
        }
    }

    /// Gathers the cell-local coefficients of `vector` on the given active cell.
    pub fn extract_local(&self, vector: &DVector<f64>, active_index: usize) -> [f64; DOFS_PER_CELL] {
        self.cell_dofs[active_index].map(|dof| vector[dof])
    }

    /// Fills a vector by evaluating `velocity` at every velocity node and `pressure` at every
    /// pressure node.
    pub fn interpolate(
        &self,
        mesh: &AdaptiveQuadMesh,
        velocity: impl Fn(&Point2<f64>) -> Vector2<f64>,
        pressure: impl Fn(&Point2<f64>) -> f64,
    ) -> DVector<f64> {
        let mut vector = DVector::zeros(self.n_dofs());
        for (node, &vertex) in self.velocity_vertices.iter().enumerate() {
            let u = velocity(mesh.vertex(vertex));
            for c in 0..VELOCITY_COMPONENTS {
                vector[self.velocity_dof(node, c)] = u[c];
            }
        }
        for (node, &vertex) in self.pressure_vertices.iter().enumerate() {
            vector[self.pressure_dof(node)] = pressure(mesh.vertex(vertex));
        }
        vector
    }
}
