//! Coarse quadrilateral meshes and the adaptive quadtree forest built on top of them.
use crate::element::Quad4Element;
use eyre::eyre;
use nalgebra::Point2;
use rustc_hash::FxHashMap;

mod adaptive;
pub mod procedural;

pub use adaptive::{AdaptiveQuadMesh, CellFlag, CellId, FaceNeighbor, FlagCounts, VertexId};

/// Identifier attached to boundary faces, used to select boundary data.
pub type BoundaryId = u32;

/// A conforming mesh of straight-sided quadrilaterals with counter-clockwise vertex order.
///
/// Faces on the boundary of the domain carry a [`BoundaryId`].
#[derive(Debug, Clone, PartialEq)]
pub struct QuadMesh2d {
    vertices: Vec<Point2<f64>>,
    cells: Vec<[usize; 4]>,
    boundary_ids: Vec<[Option<BoundaryId>; 4]>,
}

impl QuadMesh2d {
    /// Creates a mesh in which every boundary face receives boundary id 0.
    pub fn from_vertices_and_connectivity(vertices: Vec<Point2<f64>>, cells: Vec<[usize; 4]>) -> Self {
        let mut face_count = FxHashMap::default();
        for cell in &cells {
            for k in 0..4 {
                *face_count.entry(edge_key(cell[k], cell[(k + 1) % 4])).or_insert(0) += 1;
            }
        }
        let boundary_ids = cells
            .iter()
            .map(|cell| {
                let mut ids = [None; 4];
                for k in 0..4 {
                    if face_count[&edge_key(cell[k], cell[(k + 1) % 4])] == 1 {
                        ids[k] = Some(0);
                    }
                }
                ids
            })
            .collect();
        Self {
            vertices,
            cells,
            boundary_ids,
        }
    }

    /// Assigns a boundary id to every boundary face by evaluating `id_of_face` at the face
    /// midpoint.
    pub fn with_boundary_ids_from(mut self, id_of_face: impl Fn(&Point2<f64>) -> BoundaryId) -> Self {
        for (cell, ids) in self.cells.iter().zip(&mut self.boundary_ids) {
            for k in 0..4 {
                if ids[k].is_some() {
                    let a = self.vertices[cell[k]];
                    let b = self.vertices[cell[(k + 1) % 4]];
                    ids[k] = Some(id_of_face(&nalgebra::center(&a, &b)));
                }
            }
        }
        self
    }

    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    pub fn connectivity(&self) -> &[[usize; 4]] {
        &self.cells
    }

    pub fn boundary_ids(&self) -> &[[Option<BoundaryId>; 4]] {
        &self.boundary_ids
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, index: usize) -> Option<Quad4Element> {
        let cell = self.cells.get(index)?;
        Some(Quad4Element::from_vertices(cell.map(|v| self.vertices[v])))
    }

    /// Checks that all cells reference existing vertices and are counter-clockwise oriented.
    pub fn validate(&self) -> eyre::Result<()> {
        for (index, cell) in self.cells.iter().enumerate() {
            if let Some(&v) = cell.iter().find(|&&v| v >= self.vertices.len()) {
                return Err(eyre!("cell {} references non-existent vertex {}", index, v));
            }
            let element = Quad4Element::from_vertices(cell.map(|v| self.vertices[v]));
            let det = element.reference_jacobian(&Point2::origin()).determinant();
            if det <= 0.0 {
                return Err(eyre!("cell {} is degenerate or clockwise oriented", index));
            }
        }
        Ok(())
    }
}

pub(crate) fn edge_key(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}
