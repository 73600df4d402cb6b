//! Everything derived from one generation of the mesh: numbering, constraints, sparsity.
use crate::assembly::assemble_pattern;
use crate::comm::Communicator;
use crate::constraints::{make_dirichlet_constraints, make_hanging_node_constraints, AffineConstraints};
use crate::data::FlowData;
use crate::dofs::DofHandler;
use crate::mesh::AdaptiveQuadMesh;
use crate::quadrature::QuadratureRule2d;
use crate::space::FiniteElementSpace;
use eyre::eyre;
use nalgebra_sparse::pattern::SparsityPattern;
use std::ops::Range;
use stokes_sparse::BlockVector;

/// Degree-of-freedom numbering, constraints and sparsity pattern of one mesh generation.
///
/// A discretization is tied to the generation of the mesh it was built from. Consumers must
/// call [`ensure_current`](Self::ensure_current) before using it together with a mesh.
#[derive(Debug, Clone)]
pub struct Discretization {
    space: FiniteElementSpace,
    quadrature: QuadratureRule2d,
    dofs: DofHandler,
    hanging_node_constraints: AffineConstraints,
    constraints: AffineConstraints,
    constraint_time: f64,
    pattern: SparsityPattern,
    locally_owned_cells: Range<usize>,
}

impl Discretization {
    /// Collective: must be called by all workers.
    pub fn new(
        mesh: &AdaptiveQuadMesh,
        space: FiniteElementSpace,
        data: &dyn FlowData,
        t: f64,
        comm: &dyn Communicator,
    ) -> eyre::Result<Self> {
        let dofs = DofHandler::distribute(mesh);
        let mut hanging_node_constraints = AffineConstraints::new();
        make_hanging_node_constraints(mesh, &dofs, &mut hanging_node_constraints);
        hanging_node_constraints.close()?;

        let constraints = Self::build_constraints(mesh, &dofs, &hanging_node_constraints, data, t)?;
        let pattern = assemble_pattern(&dofs, &constraints)?;
        comm.barrier();

        let [n_u, n_p] = dofs.block_sizes();
        log::info!(
            "Number of active cells: {} (on {} levels)",
            mesh.num_active_cells(),
            mesh.max_level() + 1
        );
        log::info!("Number of degrees of freedom: {} ({}+{})", dofs.n_dofs(), n_u, n_p);
        log::debug!(
            "{} constrained dofs, {} nonzeros",
            constraints.n_constraints(),
            pattern.nnz()
        );

        Ok(Self {
            quadrature: space.cell_quadrature(),
            space,
            dofs,
            hanging_node_constraints,
            constraints,
            constraint_time: t,
            pattern,
            locally_owned_cells: mesh.locally_owned_range(comm.rank(), comm.size()),
        })
    }

    fn build_constraints(
        mesh: &AdaptiveQuadMesh,
        dofs: &DofHandler,
        hanging_node_constraints: &AffineConstraints,
        data: &dyn FlowData,
        t: f64,
    ) -> eyre::Result<AffineConstraints> {
        let mut constraints = hanging_node_constraints.clone();
        make_dirichlet_constraints(mesh, dofs, data, t, &mut constraints);
        constraints.close()?;
        Ok(constraints)
    }

    /// Re-evaluates the Dirichlet data at time `t`. The set of constrained degrees of freedom
    /// does not change, so the sparsity pattern stays valid.
    pub fn update_constraints(&mut self, mesh: &AdaptiveQuadMesh, data: &dyn FlowData, t: f64) -> eyre::Result<()> {
        self.ensure_current(mesh)?;
        if t != self.constraint_time {
            self.constraints = Self::build_constraints(mesh, &self.dofs, &self.hanging_node_constraints, data, t)?;
            self.constraint_time = t;
        }
        Ok(())
    }

    pub fn generation(&self) -> u64 {
        self.dofs.generation()
    }

    /// Fails if the mesh has been modified since this discretization was built.
    pub fn ensure_current(&self, mesh: &AdaptiveQuadMesh) -> eyre::Result<()> {
        if self.generation() != mesh.generation() {
            return Err(eyre!(
                "stale discretization: built for mesh generation {}, but the mesh is at generation {}",
                self.generation(),
                mesh.generation()
            ));
        }
        Ok(())
    }

    pub fn space(&self) -> &FiniteElementSpace {
        &self.space
    }

    pub fn quadrature(&self) -> &QuadratureRule2d {
        &self.quadrature
    }

    pub fn dofs(&self) -> &DofHandler {
        &self.dofs
    }

    /// Hanging-node and Dirichlet constraints, closed.
    pub fn constraints(&self) -> &AffineConstraints {
        &self.constraints
    }

    /// Hanging-node constraints only, closed among themselves. They are homogeneous and
    /// independent of time.
    pub fn hanging_node_constraints(&self) -> &AffineConstraints {
        &self.hanging_node_constraints
    }

    /// Time at which the Dirichlet constraints were last evaluated.
    pub fn constraint_time(&self) -> f64 {
        self.constraint_time
    }

    pub fn pattern(&self) -> &SparsityPattern {
        &self.pattern
    }

    pub fn n_dofs(&self) -> usize {
        self.dofs.n_dofs()
    }

    pub fn block_sizes(&self) -> [usize; 2] {
        self.dofs.block_sizes()
    }

    /// Active indices of the cells owned by this worker.
    pub fn locally_owned_cells(&self) -> Range<usize> {
        self.locally_owned_cells.clone()
    }

    /// A zero vector split into the velocity and pressure blocks.
    pub fn create_vector(&self) -> BlockVector<f64> {
        BlockVector::zeros(&self.block_sizes())
    }

    /// Component labels of the velocity block, used to keep components apart during
    /// aggregation.
    pub fn velocity_component_labels(&self) -> Vec<usize> {
        (0..self.dofs.n_velocity_dofs())
            .map(|dof| self.dofs.component(dof))
            .collect()
    }
}
