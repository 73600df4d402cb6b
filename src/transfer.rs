//! Transfer of finite element vectors across refinement and coarsening.
use crate::dofs::DofHandler;
use crate::element::{child_to_parent_reference, q1_basis, q1_reference_nodes, q2_basis, q2_reference_nodes, Q1_NODES, Q2_NODES};
use crate::mesh::{AdaptiveQuadMesh, CellFlag, CellId, VertexId};
use crate::space::{local_pressure_dof, local_velocity_dof, DOFS_PER_CELL, VELOCITY_COMPONENTS};
use eyre::eyre;
use nalgebra::{DVector, Point2, Vector2};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Default)]
struct FieldSnapshot {
    velocity: FxHashMap<VertexId, Vector2<f64>>,
    pressure: FxHashMap<VertexId, f64>,
    /// Local coefficients of the cells about to be refined.
    refined_cells: FxHashMap<CellId, [f64; DOFS_PER_CELL]>,
}

/// Interpolates vectors from the old mesh onto the new mesh after
/// [`AdaptiveQuadMesh::execute_coarsening_and_refinement`].
///
/// Vertex ids are stable, so values at nodes that exist on both meshes are copied. Nodes
/// created by refinement are evaluated from the coefficients of the refined parent. Coarsening
/// only ever keeps existing nodes, which amounts to injection.
///
/// Usage follows the mesh protocol, and every step is collective:
/// 1. flag cells and call [`AdaptiveQuadMesh::prepare_coarsening_and_refinement`],
/// 2. [`SolutionTransfer::prepare_for_coarsening_and_refinement`] with constraint-consistent
///    vectors,
/// 3. execute the refinement and rebuild the degree-of-freedom numbering,
/// 4. [`SolutionTransfer::interpolate`].
#[derive(Debug, Clone)]
pub struct SolutionTransfer {
    generation: u64,
    snapshots: Vec<FieldSnapshot>,
}

impl SolutionTransfer {
    pub fn prepare_for_coarsening_and_refinement(
        mesh: &AdaptiveQuadMesh,
        dofs: &DofHandler,
        vectors: &[&DVector<f64>],
    ) -> eyre::Result<Self> {
        if dofs.generation() != mesh.generation() {
            return Err(eyre!(
                "cannot snapshot vectors of mesh generation {} on mesh generation {}",
                dofs.generation(),
                mesh.generation()
            ));
        }

        let snapshots = vectors
            .iter()
            .map(|vector| {
                if vector.len() != dofs.n_dofs() {
                    return Err(eyre!("vector has length {}, expected {}", vector.len(), dofs.n_dofs()));
                }
                let velocity = dofs
                    .velocity_vertices()
                    .iter()
                    .enumerate()
                    .map(|(node, &vertex)| {
                        let u = Vector2::new(vector[dofs.velocity_dof(node, 0)], vector[dofs.velocity_dof(node, 1)]);
                        (vertex, u)
                    })
                    .collect();
                let pressure = dofs
                    .pressure_vertices()
                    .iter()
                    .enumerate()
                    .map(|(node, &vertex)| (vertex, vector[dofs.pressure_dof(node)]))
                    .collect();
                let refined_cells = mesh
                    .active_cells()
                    .iter()
                    .enumerate()
                    .filter(|&(_, &cell)| mesh.flag(cell) == Some(CellFlag::Refine))
                    .map(|(active_index, &cell)| (cell, dofs.extract_local(vector, active_index)))
                    .collect();
                Ok(FieldSnapshot {
                    velocity,
                    pressure,
                    refined_cells,
                })
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        Ok(Self {
            generation: mesh.generation(),
            snapshots,
        })
    }

    pub fn num_vectors(&self) -> usize {
        self.snapshots.len()
    }

    /// Interpolates all snapshot vectors onto the numbering `dofs` of the refined mesh.
    pub fn interpolate(&self, mesh: &AdaptiveQuadMesh, dofs: &DofHandler) -> eyre::Result<Vec<DVector<f64>>> {
        if mesh.generation() <= self.generation || dofs.generation() != mesh.generation() {
            return Err(eyre!(
                "solution transfer prepared on generation {} cannot interpolate onto generation {} (dofs: {})",
                self.generation,
                mesh.generation(),
                dofs.generation()
            ));
        }
        self.snapshots
            .iter()
            .map(|snapshot| interpolate_snapshot(snapshot, mesh, dofs))
            .collect()
    }
}

fn interpolate_snapshot(snapshot: &FieldSnapshot, mesh: &AdaptiveQuadMesh, dofs: &DofHandler) -> eyre::Result<DVector<f64>> {
    let mut vector = DVector::zeros(dofs.n_dofs());
    let mut velocity_done = vec![false; dofs.velocity_vertices().len()];
    let mut pressure_done = vec![false; dofs.pressure_vertices().len()];
    let q2_nodes_ref = q2_reference_nodes();
    let q1_nodes_ref = q1_reference_nodes();

    for &cell in mesh.active_cells() {
        let parent = mesh
            .parent(cell)
            .and_then(|parent| snapshot.refined_cells.get(&parent))
            .map(|local| (local, mesh.child_index(cell)));
        let parent_point = |xi: &Point2<f64>| parent.map(|(local, child)| (local, child_to_parent_reference(child, xi)));

        for (i, &vertex) in mesh.q2_nodes(cell).iter().enumerate() {
            let node = dofs
                .velocity_node(vertex)
                .ok_or_else(|| eyre!("vertex {} is not a velocity node", vertex))?;
            if velocity_done[node] {
                continue;
            }
            let u = match snapshot.velocity.get(&vertex) {
                Some(u) => *u,
                None => {
                    let (local, xi) = parent_point(&q2_nodes_ref[i])
                        .ok_or_else(|| eyre!("no data to transfer to velocity node at vertex {}", vertex))?;
                    let phi = q2_basis(&xi);
                    let mut u = Vector2::zeros();
                    for c in 0..VELOCITY_COMPONENTS {
                        u[c] = (0..Q2_NODES).map(|j| phi[j] * local[local_velocity_dof(c, j)]).sum();
                    }
                    u
                }
            };
            for c in 0..VELOCITY_COMPONENTS {
                vector[dofs.velocity_dof(node, c)] = u[c];
            }
            velocity_done[node] = true;
        }

        for (i, &vertex) in mesh.cell_vertices(cell).iter().enumerate() {
            let node = dofs
                .pressure_node(vertex)
                .ok_or_else(|| eyre!("vertex {} is not a pressure node", vertex))?;
            if pressure_done[node] {
                continue;
            }
            let p = match snapshot.pressure.get(&vertex) {
                Some(p) => *p,
                None => {
                    let (local, xi) = parent_point(&q1_nodes_ref[i])
                        .ok_or_else(|| eyre!("no data to transfer to pressure node at vertex {}", vertex))?;
                    let psi = q1_basis(&xi);
                    (0..Q1_NODES).map(|j| psi[j] * local[local_pressure_dof(j)]).sum()
                }
            };
            vector[dofs.pressure_dof(node)] = p;
            pressure_done[node] = true;
        }
    }
    Ok(vector)
}
