use super::{edge_key, BoundaryId, QuadMesh2d};
use crate::element::Quad4Element;
use eyre::eyre;
use nalgebra::Point2;
use ordered_float::OrderedFloat;
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::ops::Range;

/// Index of a cell in the cell arena of an [`AdaptiveQuadMesh`]. Stable across refinement.
pub type CellId = usize;
/// Index of a vertex. Vertices are never removed, so ids are stable across refinement.
pub type VertexId = usize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CellFlag {
    Refine,
    Coarsen,
}

/// Number of cells flagged by a marking strategy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct FlagCounts {
    pub refine: usize,
    pub coarsen: usize,
}

/// What lies across a face of an active cell.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaceNeighbor {
    Boundary(Option<BoundaryId>),
    /// An active cell on the same level sharing the entire face.
    Conforming { cell: CellId, face: usize },
    /// The face is split in two. The first cell touches the first vertex of the face (in
    /// counter-clockwise order), the second cell the second vertex. Faces are the local faces
    /// of the finer cells.
    Finer { cells: [(CellId, usize); 2] },
    /// The face is one half of face `face` of the coarser active cell `cell`.
    Coarser { cell: CellId, face: usize },
}

#[derive(Debug, Clone)]
struct TreeCell {
    vertices: [VertexId; 4],
    midpoints: [VertexId; 4],
    center: VertexId,
    parent: Option<CellId>,
    child_index: usize,
    children: Option<[CellId; 4]>,
    /// Children removed by coarsening, reused on the next refinement.
    retired_children: Option<[CellId; 4]>,
    level: usize,
    boundary: [Option<BoundaryId>; 4],
    flag: Option<CellFlag>,
}

/// A forest of quadtrees over a coarse quadrilateral mesh.
///
/// Every cell owns the vertices at its face midpoints and its center, created when the cell is
/// created. Face midpoints are shared between neighbors. Consequently all support points of the
/// biquadratic element are mesh vertices, and a vertex keeps its id (and position) for the
/// lifetime of the mesh, also across refinement and coarsening. Coarsening retires the children
/// of a cell and refining it again brings them back, so the storage is bounded by the finest
/// mesh ever reached.
///
/// Meshes always satisfy the 2:1 face balance: cells sharing (part of) a face differ by at
/// most one refinement level.
#[derive(Debug, Clone)]
pub struct AdaptiveQuadMesh {
    vertices: Vec<Point2<f64>>,
    cells: Vec<TreeCell>,
    roots: Vec<CellId>,
    midpoints: FxHashMap<(VertexId, VertexId), VertexId>,
    generation: u64,
    active: Vec<CellId>,
    active_index: Vec<Option<usize>>,
    edges: FxHashMap<(VertexId, VertexId), Vec<(CellId, usize)>>,
}

/// Faces of child `k` that lie on the boundary of its parent. Face `j` of the child lies on
/// face `j` of the parent.
fn outer_faces(child_index: usize) -> [usize; 2] {
    [child_index, (child_index + 3) % 4]
}

impl AdaptiveQuadMesh {
    pub fn from_coarse_mesh(coarse: &QuadMesh2d) -> eyre::Result<Self> {
        coarse.validate()?;
        if coarse.num_cells() == 0 {
            return Err(eyre!("cannot build an adaptive mesh from an empty coarse mesh"));
        }
        let mut mesh = Self {
            vertices: coarse.vertices().to_vec(),
            cells: Vec::new(),
            roots: Vec::new(),
            midpoints: FxHashMap::default(),
            generation: 0,
            active: Vec::new(),
            active_index: Vec::new(),
            edges: FxHashMap::default(),
        };
        for (cell, boundary) in coarse.connectivity().iter().zip(coarse.boundary_ids()) {
            let id = mesh.create_cell(*cell, None, 0, 0, *boundary);
            mesh.roots.push(id);
        }
        mesh.update_active_cells();
        Ok(mesh)
    }

    /// Incremented on every change of the set of active cells.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Active cells in canonical order: depth-first over the coarse cells, children in order.
    pub fn active_cells(&self) -> &[CellId] {
        &self.active
    }

    pub fn num_active_cells(&self) -> usize {
        self.active.len()
    }

    /// Position of `cell` in [`active_cells`](Self::active_cells), if the cell is active.
    pub fn active_index(&self, cell: CellId) -> Option<usize> {
        self.active_index.get(cell).copied().flatten()
    }

    pub fn is_active(&self, cell: CellId) -> bool {
        self.active_index(cell).is_some()
    }

    pub fn vertex(&self, vertex: VertexId) -> &Point2<f64> {
        &self.vertices[vertex]
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of stored cells, active, refined or retired.
    pub fn num_allocated_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell_vertices(&self, cell: CellId) -> [VertexId; 4] {
        self.cells[cell].vertices
    }

    /// The support points of the biquadratic element on `cell`: vertices, face midpoints and
    /// center.
    pub fn q2_nodes(&self, cell: CellId) -> [VertexId; 9] {
        let c = &self.cells[cell];
        [
            c.vertices[0],
            c.vertices[1],
            c.vertices[2],
            c.vertices[3],
            c.midpoints[0],
            c.midpoints[1],
            c.midpoints[2],
            c.midpoints[3],
            c.center,
        ]
    }

    pub fn level(&self, cell: CellId) -> usize {
        self.cells[cell].level
    }

    pub fn max_level(&self) -> usize {
        self.active.iter().map(|&c| self.cells[c].level).max().unwrap_or(0)
    }

    pub fn parent(&self, cell: CellId) -> Option<CellId> {
        self.cells[cell].parent
    }

    /// Which child of its parent `cell` is. Child `k` contains vertex `k` of the parent.
    pub fn child_index(&self, cell: CellId) -> usize {
        self.cells[cell].child_index
    }

    pub fn children(&self, cell: CellId) -> Option<[CellId; 4]> {
        self.cells[cell].children
    }

    pub fn boundary_id(&self, cell: CellId, face: usize) -> Option<BoundaryId> {
        self.cells[cell].boundary[face]
    }

    pub fn element(&self, cell: CellId) -> Quad4Element {
        Quad4Element::from_vertices(self.cells[cell].vertices.map(|v| self.vertices[v]))
    }

    pub fn flag(&self, cell: CellId) -> Option<CellFlag> {
        self.cells[cell].flag
    }

    pub fn set_flag(&mut self, cell: CellId, flag: Option<CellFlag>) {
        self.cells[cell].flag = flag;
    }

    pub fn clear_flags(&mut self) {
        for cell in &mut self.cells {
            cell.flag = None;
        }
    }

    pub fn flag_counts(&self) -> FlagCounts {
        let mut counts = FlagCounts::default();
        for &cell in &self.active {
            match self.cells[cell].flag {
                Some(CellFlag::Refine) => counts.refine += 1,
                Some(CellFlag::Coarsen) => counts.coarsen += 1,
                None => {}
            }
        }
        counts
    }

    /// The contiguous range of active indices owned by worker `rank` out of `num_subdomains`.
    pub fn locally_owned_range(&self, rank: usize, num_subdomains: usize) -> Range<usize> {
        assert!(rank < num_subdomains);
        let n = self.active.len();
        (rank * n / num_subdomains)..((rank + 1) * n / num_subdomains)
    }

    /// The worker owning the active cell with the given active index.
    pub fn subdomain_id(&self, active_index: usize, num_subdomains: usize) -> usize {
        (0..num_subdomains)
            .find(|&rank| self.locally_owned_range(rank, num_subdomains).contains(&active_index))
            .unwrap_or(num_subdomains - 1)
    }

    /// Determines what lies across face `face` of the active cell `cell`.
    pub fn face_neighbor(&self, cell: CellId, face: usize) -> FaceNeighbor {
        debug_assert!(self.is_active(cell), "face neighbors are only defined for active cells");
        let c = &self.cells[cell];
        let a = c.vertices[face];
        let b = c.vertices[(face + 1) % 4];

        if let Some(&(neighbor, neighbor_face)) = self.other_on_edge(cell, a, b) {
            return FaceNeighbor::Conforming {
                cell: neighbor,
                face: neighbor_face,
            };
        }

        let m = c.midpoints[face];
        if let (Some(&first), Some(&second)) = (self.other_on_edge(cell, a, m), self.other_on_edge(cell, m, b)) {
            return FaceNeighbor::Finer { cells: [first, second] };
        }

        if let Some(parent) = c.parent {
            if outer_faces(c.child_index).contains(&face) {
                let p = &self.cells[parent];
                let key = edge_key(p.vertices[face], p.vertices[(face + 1) % 4]);
                if let Some(&(coarse, coarse_face)) = self.edges.get(&key).and_then(|entries| entries.first()) {
                    return FaceNeighbor::Coarser {
                        cell: coarse,
                        face: coarse_face,
                    };
                }
            }
        }

        FaceNeighbor::Boundary(c.boundary[face])
    }

    /// If the edge `(a, b)` is split by refinement of the cells on one side, returns the vertex
    /// splitting it.
    pub fn split_point(&self, a: VertexId, b: VertexId) -> Option<VertexId> {
        let m = *self.midpoints.get(&edge_key(a, b))?;
        self.edges.contains_key(&edge_key(a, m)).then_some(m)
    }

    /// Checks the 2:1 face balance: every face without a neighbor must be a boundary face.
    pub fn is_balanced(&self) -> bool {
        self.active.iter().all(|&cell| {
            (0..4).all(|face| match self.face_neighbor(cell, face) {
                FaceNeighbor::Boundary(id) => id.is_some(),
                _ => true,
            })
        })
    }

    /// Refines every active cell `times` times.
    pub fn refine_global(&mut self, times: usize) {
        for _ in 0..times {
            let active = self.active.clone();
            for cell in active {
                self.refine_cell(cell);
            }
            self.clear_flags();
            self.generation += 1;
            self.update_active_cells();
        }
        log::debug!(
            "Globally refined mesh now has {} active cells (generation {})",
            self.active.len(),
            self.generation
        );
    }

    /// Flags the cells with the largest indicators for refinement until their indicators sum up to
    /// `top_fraction` of the total, and the cells with the smallest indicators for coarsening as
    /// long as their sum stays within `bottom_fraction` of the total.
    ///
    /// `indicators` holds one value per active cell, in active order.
    pub fn refine_and_coarsen_fixed_fraction(
        &mut self,
        indicators: &[f64],
        top_fraction: f64,
        bottom_fraction: f64,
    ) -> eyre::Result<FlagCounts> {
        self.check_indicators(indicators)?;
        let total: f64 = indicators.iter().sum();

        let refine_target = top_fraction * total;
        let mut sum = 0.0;
        for index in self.descending_order(indicators) {
            if refine_target <= 0.0 || sum >= refine_target {
                break;
            }
            self.cells[self.active[index]].flag = Some(CellFlag::Refine);
            sum += indicators[index];
        }

        let coarsen_target = bottom_fraction * total;
        let mut sum = 0.0;
        let mut ascending = self.descending_order(indicators);
        ascending.reverse();
        for index in ascending {
            let cell = self.active[index];
            if coarsen_target <= 0.0 || self.cells[cell].flag.is_some() || sum + indicators[index] > coarsen_target {
                break;
            }
            self.cells[cell].flag = Some(CellFlag::Coarsen);
            sum += indicators[index];
        }

        Ok(self.flag_counts())
    }

    /// Flags `floor(top_fraction * n)` cells with the largest indicators for refinement and
    /// `floor(bottom_fraction * n)` cells with the smallest for coarsening, where `n` is the number
    /// of active cells.
    ///
    /// With `max_cells`, the number of refined cells is reduced such that the predicted number of
    /// active cells after refinement stays within the bound. Refining a cell adds three cells,
    /// coarsening a cell removes three quarters of a cell.
    pub fn refine_and_coarsen_fixed_number(
        &mut self,
        indicators: &[f64],
        top_fraction: f64,
        bottom_fraction: f64,
        max_cells: Option<usize>,
    ) -> eyre::Result<FlagCounts> {
        self.check_indicators(indicators)?;
        let n = self.active.len();
        let mut refine = (top_fraction * n as f64).floor() as usize;
        let mut coarsen = (bottom_fraction * n as f64).floor() as usize;

        if let Some(max_cells) = max_cells {
            let max_cells = max_cells as f64;
            let n_f = n as f64;
            if n_f > max_cells {
                refine = 0;
                let required = ((n_f - max_cells) * 4.0 / 3.0).ceil() as usize;
                coarsen = coarsen.max(required).min(n);
            } else if n_f + 3.0 * refine as f64 - 0.75 * coarsen as f64 > max_cells {
                let bound = (max_cells - n_f + 0.75 * coarsen as f64) / 3.0;
                refine = bound.max(0.0).floor() as usize;
            }
        }
        refine = refine.min(n);
        coarsen = coarsen.min(n - refine);

        let order = self.descending_order(indicators);
        for &index in order.iter().take(refine) {
            self.cells[self.active[index]].flag = Some(CellFlag::Refine);
        }
        for &index in order.iter().rev().take(coarsen) {
            self.cells[self.active[index]].flag = Some(CellFlag::Coarsen);
        }
        Ok(self.flag_counts())
    }

    /// Like [`prepare_coarsening_and_refinement`](Self::prepare_coarsening_and_refinement), but
    /// afterwards at most `max_cells` cells are active.
    ///
    /// Balancing may add refinement flags, so the prediction of the marking strategy is only a
    /// lower bound. As long as the prepared flags exceed the limit, the refinement flag of the
    /// marked cell with the smallest indicator is withdrawn and the flags are prepared again. If
    /// the limit can not be met even without refinement, the coarsening flags are kept as is.
    pub fn prepare_within_cell_limit(&mut self, indicators: &[f64], max_cells: usize) -> eyre::Result<FlagCounts> {
        self.check_indicators(indicators)?;
        let mut marked: Vec<Option<CellFlag>> = self
            .active
            .iter()
            .map(|&cell| self.cells[cell].flag)
            .collect();
        let mut refined: Vec<usize> = self
            .descending_order(indicators)
            .into_iter()
            .filter(|&index| marked[index] == Some(CellFlag::Refine))
            .collect();

        loop {
            let counts = self.prepare_coarsening_and_refinement();
            let predicted = self.active.len() + 3 * counts.refine - 3 * (counts.coarsen / 4);
            let weakest = match refined.pop() {
                Some(index) if predicted > max_cells => index,
                _ => return Ok(counts),
            };
            marked[weakest] = None;
            for (&cell, &flag) in self.active.iter().zip(&marked) {
                self.cells[cell].flag = flag;
            }
        }
    }

    /// Adjusts the flags such that executing them keeps the mesh 2:1 balanced.
    ///
    /// Refinement flags spread to coarser neighbors, and coarsening flags survive only if all four
    /// siblings are flagged and coarsening does not create a level jump of two. Refinement takes
    /// precedence over coarsening. Returns the resulting flag counts.
    pub fn prepare_coarsening_and_refinement(&mut self) -> FlagCounts {
        for &cell in &self.active {
            if self.cells[cell].flag == Some(CellFlag::Coarsen) && self.cells[cell].parent.is_none() {
                self.cells[cell].flag = None;
            }
        }

        loop {
            let mut changed = false;

            for &cell in &self.active {
                if self.cells[cell].flag != Some(CellFlag::Refine) {
                    continue;
                }
                for face in 0..4 {
                    if let FaceNeighbor::Coarser { cell: coarse, .. } = self.face_neighbor(cell, face) {
                        if self.cells[coarse].flag != Some(CellFlag::Refine) {
                            self.cells[coarse].flag = Some(CellFlag::Refine);
                            changed = true;
                        }
                    }
                }
            }

            let mut parents: Vec<CellId> = self
                .active
                .iter()
                .filter(|&&cell| self.cells[cell].flag == Some(CellFlag::Coarsen))
                .filter_map(|&cell| self.cells[cell].parent)
                .collect();
            parents.dedup();
            for parent in parents {
                if !self.family_can_be_coarsened(parent) {
                    for child in self.cells[parent].children.into_iter().flatten() {
                        if self.cells[child].flag == Some(CellFlag::Coarsen) {
                            self.cells[child].flag = None;
                            changed = true;
                        }
                    }
                }
            }

            if !changed {
                break;
            }
        }

        self.flag_counts()
    }

    fn family_can_be_coarsened(&self, parent: CellId) -> bool {
        let Some(children) = self.cells[parent].children else {
            return false;
        };
        let all_flagged = children
            .iter()
            .all(|&child| self.is_active(child) && self.cells[child].flag == Some(CellFlag::Coarsen));
        all_flagged
            && children.iter().all(|&child| {
                outer_faces(self.cells[child].child_index)
                    .iter()
                    .all(|&face| match self.face_neighbor(child, face) {
                        FaceNeighbor::Finer { .. } => false,
                        FaceNeighbor::Conforming { cell, .. } => self.cells[cell].flag != Some(CellFlag::Refine),
                        _ => true,
                    })
            })
    }

    /// Executes the refinement and coarsening flags (after making them consistent) and advances
    /// the generation counter. All flags are cleared afterwards.
    pub fn execute_coarsening_and_refinement(&mut self) {
        self.prepare_coarsening_and_refinement();

        let mut to_refine = Vec::new();
        let mut to_coarsen = Vec::new();
        for &cell in &self.active {
            match self.cells[cell].flag {
                Some(CellFlag::Refine) => to_refine.push(cell),
                Some(CellFlag::Coarsen) => to_coarsen.extend(self.cells[cell].parent),
                None => {}
            }
        }
        to_coarsen.dedup();

        for &parent in &to_coarsen {
            let cell = &mut self.cells[parent];
            cell.retired_children = cell.children.take();
        }
        for &cell in &to_refine {
            self.refine_cell(cell);
        }
        self.clear_flags();
        self.generation += 1;
        self.update_active_cells();

        log::debug!(
            "Refined {} and coarsened {} cells, {} active cells (generation {})",
            to_refine.len(),
            4 * to_coarsen.len(),
            self.active.len(),
            self.generation
        );
    }

    fn check_indicators(&self, indicators: &[f64]) -> eyre::Result<()> {
        if indicators.len() != self.active.len() {
            return Err(eyre!(
                "expected one indicator per active cell ({}), got {}",
                self.active.len(),
                indicators.len()
            ));
        }
        if let Some(value) = indicators.iter().find(|value| !value.is_finite() || **value < 0.0) {
            return Err(eyre!("indicators must be finite and non-negative, found {}", value));
        }
        Ok(())
    }

    /// Active indices sorted by decreasing indicator. Ties are broken by active index.
    fn descending_order(&self, indicators: &[f64]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..indicators.len()).collect();
        order.sort_by_key(|&i| (Reverse(OrderedFloat(indicators[i])), i));
        order
    }

    fn other_on_edge(&self, cell: CellId, a: VertexId, b: VertexId) -> Option<&(CellId, usize)> {
        self.edges
            .get(&edge_key(a, b))?
            .iter()
            .find(|(other, _)| *other != cell)
    }

    fn midpoint_vertex(&mut self, a: VertexId, b: VertexId) -> VertexId {
        let key = edge_key(a, b);
        if let Some(&m) = self.midpoints.get(&key) {
            return m;
        }
        let m = self.vertices.len();
        self.vertices
            .push(nalgebra::center(&self.vertices[a], &self.vertices[b]));
        self.midpoints.insert(key, m);
        m
    }

    fn create_cell(
        &mut self,
        vertices: [VertexId; 4],
        parent: Option<CellId>,
        child_index: usize,
        level: usize,
        boundary: [Option<BoundaryId>; 4],
    ) -> CellId {
        let midpoints = [0, 1, 2, 3].map(|k| self.midpoint_vertex(vertices[k], vertices[(k + 1) % 4]));
        let center = self.vertices.len();
        let element = Quad4Element::from_vertices(vertices.map(|v| self.vertices[v]));
        self.vertices
            .push(element.map_reference_coords(&Point2::origin()));
        self.cells.push(TreeCell {
            vertices,
            midpoints,
            center,
            parent,
            child_index,
            children: None,
            retired_children: None,
            level,
            boundary,
            flag: None,
        });
        self.cells.len() - 1
    }

    fn refine_cell(&mut self, cell: CellId) {
        if let Some(children) = self.cells[cell].retired_children.take() {
            for child in children {
                self.cells[child].flag = None;
            }
            self.cells[cell].children = Some(children);
            return;
        }

        let TreeCell {
            vertices: [v0, v1, v2, v3],
            midpoints: [m0, m1, m2, m3],
            center: c,
            level,
            boundary: [b0, b1, b2, b3],
            ..
        } = self.cells[cell].clone();

        let children = [
            ([v0, m0, c, m3], [b0, None, None, b3]),
            ([m0, v1, m1, c], [b0, b1, None, None]),
            ([c, m1, v2, m2], [None, b1, b2, None]),
            ([m3, c, m2, v3], [None, None, b2, b3]),
        ];
        let mut ids = [0; 4];
        for (k, (vertices, boundary)) in children.into_iter().enumerate() {
            ids[k] = self.create_cell(vertices, Some(cell), k, level + 1, boundary);
        }
        self.cells[cell].children = Some(ids);
    }

    fn update_active_cells(&mut self) {
        self.active.clear();
        let mut stack: Vec<CellId> = self.roots.iter().rev().copied().collect();
        while let Some(cell) = stack.pop() {
            match self.cells[cell].children {
                Some(children) => stack.extend(children.iter().rev()),
                None => self.active.push(cell),
            }
        }

        self.active_index.clear();
        self.active_index.resize(self.cells.len(), None);
        for (index, &cell) in self.active.iter().enumerate() {
            self.active_index[cell] = Some(index);
        }

        self.edges.clear();
        for &cell in &self.active {
            let vertices = self.cells[cell].vertices;
            for face in 0..4 {
                self.edges
                    .entry(edge_key(vertices[face], vertices[(face + 1) % 4]))
                    .or_default()
                    .push((cell, face));
            }
        }
    }
}
