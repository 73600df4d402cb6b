//! Affine constraints `x_i = sum_j w_ij x_j + b_i` over degrees of freedom.
use crate::data::FlowData;
use crate::dofs::DofHandler;
use crate::mesh::{AdaptiveQuadMesh, FaceNeighbor};
use crate::space::VELOCITY_COMPONENTS;
use eyre::eyre;
use nalgebra::DVector;
use rustc_hash::FxHashMap;

/// A single constraint `dof = sum(weight * column) + inhomogeneity`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintLine {
    pub dof: usize,
    pub entries: Vec<(usize, f64)>,
    pub inhomogeneity: f64,
}

/// A set of affine constraints.
///
/// Lines are added with [`add_line`](Self::add_line) and friends. Before the constraints can be
/// applied, they must be [closed](Self::close): closing substitutes constrained columns
/// recursively, so that every line only references unconstrained degrees of freedom.
#[derive(Debug, Clone, Default)]
pub struct AffineConstraints {
    lines: Vec<ConstraintLine>,
    line_of_dof: FxHashMap<usize, usize>,
    closed: bool,
}

impl AffineConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an (initially homogeneous, empty) constraint for `dof`. Returns `false` if `dof` is
    /// already constrained, in which case nothing is changed.
    pub fn add_line(&mut self, dof: usize) -> bool {
        if self.line_of_dof.contains_key(&dof) {
            return false;
        }
        self.closed = false;
        self.line_of_dof.insert(dof, self.lines.len());
        self.lines.push(ConstraintLine {
            dof,
            entries: Vec::new(),
            inhomogeneity: 0.0,
        });
        true
    }

    /// # Panics
    ///
    /// Panics if `dof` has no constraint line.
    pub fn add_entry(&mut self, dof: usize, column: usize, weight: f64) {
        self.closed = false;
        let line = self.line_mut(dof);
        line.entries.push((column, weight));
    }

    pub fn set_inhomogeneity(&mut self, dof: usize, value: f64) {
        self.closed = false;
        self.line_mut(dof).inhomogeneity = value;
    }

    fn line_mut(&mut self, dof: usize) -> &mut ConstraintLine {
        let index = *self
            .line_of_dof
            .get(&dof)
            .unwrap_or_else(|| panic!("no constraint line for dof {}", dof));
        &mut self.lines[index]
    }

    pub fn is_constrained(&self, dof: usize) -> bool {
        self.line_of_dof.contains_key(&dof)
    }

    pub fn line(&self, dof: usize) -> Option<&ConstraintLine> {
        self.line_of_dof.get(&dof).map(|&i| &self.lines[i])
    }

    pub fn lines(&self) -> &[ConstraintLine] {
        &self.lines
    }

    pub fn n_constraints(&self) -> usize {
        self.lines.len()
    }

    pub fn constrained_dofs(&self) -> impl Iterator<Item = usize> + '_ {
        self.lines.iter().map(|line| line.dof)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Resolves chains of constraints and merges duplicate entries.
    ///
    /// Fails if the constraints are cyclic.
    pub fn close(&mut self) -> eyre::Result<()> {
        let max_depth = self.lines.len() + 1;
        for i in 0..self.lines.len() {
            let mut depth = 0;
            loop {
                let line = &self.lines[i];
                if !line.entries.iter().any(|(column, _)| self.is_constrained(*column)) {
                    break;
                }
                depth += 1;
                if depth > max_depth {
                    return Err(eyre!("cyclic constraints involving dof {}", line.dof));
                }

                let mut entries = Vec::with_capacity(line.entries.len());
                let mut inhomogeneity = line.inhomogeneity;
                for &(column, weight) in &line.entries {
                    if column == line.dof {
                        return Err(eyre!("dof {} is constrained in terms of itself", column));
                    }
                    match self.line(column) {
                        Some(other) => {
                            inhomogeneity += weight * other.inhomogeneity;
                            entries.extend(other.entries.iter().map(|&(c, w)| (c, weight * w)));
                        }
                        None => entries.push((column, weight)),
                    }
                }
                self.lines[i].entries = entries;
                self.lines[i].inhomogeneity = inhomogeneity;
            }

            let entries = &mut self.lines[i].entries;
            entries.sort_by_key(|(column, _)| *column);
            let mut merged: Vec<(usize, f64)> = Vec::with_capacity(entries.len());
            for &(column, weight) in entries.iter() {
                match merged.last_mut() {
                    Some((last, w)) if *last == column => *w += weight,
                    _ => merged.push((column, weight)),
                }
            }
            merged.retain(|(_, weight)| *weight != 0.0);
            *entries = merged;
        }

        self.lines.sort_by_key(|line| line.dof);
        self.line_of_dof = self
            .lines
            .iter()
            .enumerate()
            .map(|(i, line)| (line.dof, i))
            .collect();
        self.closed = true;
        Ok(())
    }

    /// Overwrites every constrained entry of `vector` with the value implied by the unconstrained
    /// entries.
    pub fn distribute(&self, vector: &mut DVector<f64>) {
        debug_assert!(self.closed, "constraints must be closed before use");
        for line in &self.lines {
            vector[line.dof] = line.inhomogeneity
                + line
                    .entries
                    .iter()
                    .map(|&(column, weight)| weight * vector[column])
                    .sum::<f64>();
        }
    }

    /// Completes a Newton update whose unconstrained entries are already in `update`.
    ///
    /// `residual` must hold `y_i - y~_i` in the constrained rows, where `y~_i` is the constrained
    /// value of `y`. Subtracting the completed update from `y` then satisfies every line exactly.
    pub fn complete_update(&self, residual: &DVector<f64>, update: &mut DVector<f64>) {
        debug_assert!(self.closed, "constraints must be closed before use");
        for line in &self.lines {
            update[line.dof] = residual[line.dof]
                + line
                    .entries
                    .iter()
                    .map(|&(column, weight)| weight * update[column])
                    .sum::<f64>();
        }
    }

    pub fn set_zero(&self, vector: &mut DVector<f64>) {
        for line in &self.lines {
            vector[line.dof] = 0.0;
        }
    }

    /// Expresses `dof` in terms of unconstrained degrees of freedom, appending
    /// `(global dof, weight)` pairs to `out`. Inhomogeneities are not included.
    pub fn resolve_into(&self, dof: usize, out: &mut Vec<(usize, f64)>) {
        match self.line(dof) {
            Some(line) => out.extend_from_slice(&line.entries),
            None => out.push((dof, 1.0)),
        }
    }
}

/// Adds the continuity constraints of the nodes on hanging faces.
///
/// On a face shared by a coarse cell and two finer cells, the finer side nodes are constrained to
/// the traces of the coarse side basis functions: pressure at the face midpoint is the mean of the
/// endpoint values, and the velocities at the quarter points interpolate the coarse quadratic.
pub fn make_hanging_node_constraints(mesh: &AdaptiveQuadMesh, dofs: &DofHandler, constraints: &mut AffineConstraints) {
    const NEAR: [f64; 3] = [0.375, 0.75, -0.125];
    const FAR: [f64; 3] = [-0.125, 0.75, 0.375];

    for &cell in mesh.active_cells() {
        let vertices = mesh.cell_vertices(cell);
        let q2_nodes = mesh.q2_nodes(cell);
        for face in 0..4 {
            let FaceNeighbor::Finer { cells } = mesh.face_neighbor(cell, face) else {
                continue;
            };
            let a = vertices[face];
            let b = vertices[(face + 1) % 4];
            let m = q2_nodes[4 + face];

            let pressure_dof = |v| dofs.pressure_node(v).map(|node| dofs.pressure_dof(node));
            if let (Some(p_m), Some(p_a), Some(p_b)) = (pressure_dof(m), pressure_dof(a), pressure_dof(b)) {
                if constraints.add_line(p_m) {
                    constraints.add_entry(p_m, p_a, 0.5);
                    constraints.add_entry(p_m, p_b, 0.5);
                }
            }

            let coarse_nodes = [a, m, b].map(|v| dofs.velocity_node(v));
            let [Some(n_a), Some(n_m), Some(n_b)] = coarse_nodes else {
                continue;
            };
            for ((fine, fine_face), weights) in cells.into_iter().zip([NEAR, FAR]) {
                let q = mesh.q2_nodes(fine)[4 + fine_face];
                let Some(n_q) = dofs.velocity_node(q) else {
                    continue;
                };
                for c in 0..VELOCITY_COMPONENTS {
                    let dof = dofs.velocity_dof(n_q, c);
                    if constraints.add_line(dof) {
                        for (node, weight) in [n_a, n_m, n_b].into_iter().zip(weights) {
                            constraints.add_entry(dof, dofs.velocity_dof(node, c), weight);
                        }
                    }
                }
            }
        }
    }
}

/// Constrains the velocity on Dirichlet boundaries to the boundary data at time `t`.
///
/// Boundary ids are processed in increasing order, and degrees of freedom that are already
/// constrained (including those constrained by earlier boundary ids) are left unchanged.
pub fn make_dirichlet_constraints(
    mesh: &AdaptiveQuadMesh,
    dofs: &DofHandler,
    data: &dyn FlowData,
    t: f64,
    constraints: &mut AffineConstraints,
) {
    let mut faces = Vec::new();
    for (active_index, &cell) in mesh.active_cells().iter().enumerate() {
        for face in 0..4 {
            if let FaceNeighbor::Boundary(Some(id)) = mesh.face_neighbor(cell, face) {
                if data.is_dirichlet(id) {
                    faces.push((id, active_index, cell, face));
                }
            }
        }
    }
    faces.sort_by_key(|&(id, active_index, _, face)| (id, active_index, face));

    for (id, _, cell, face) in faces {
        let nodes = mesh.q2_nodes(cell);
        for vertex in [nodes[face], nodes[4 + face], nodes[(face + 1) % 4]] {
            let Some(node) = dofs.velocity_node(vertex) else {
                continue;
            };
            let value = data.dirichlet_velocity(id, mesh.vertex(vertex), t);
            for c in 0..VELOCITY_COMPONENTS {
                let dof = dofs.velocity_dof(node, c);
                if constraints.add_line(dof) {
                    constraints.set_inhomogeneity(dof, value[c]);
                }
            }
        }
    }
}
