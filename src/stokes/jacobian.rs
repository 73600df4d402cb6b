use crate::assembly::{
    assemble_cells_in_order, distribute_local_matrix, extract_block, local_jacobian, local_preconditioner,
    set_constrained_diagonal, CellValues, CondensedCellDofs,
};
use crate::comm::Communicator;
use crate::config::LinearSolverSettings;
use crate::discretization::Discretization;
use crate::mesh::AdaptiveQuadMesh;
use eyre::eyre;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use stokes_sparse::amg::{AlgebraicMultigrid, AmgSettings};
use stokes_sparse::direct::DirectSolver;
use stokes_sparse::jacobi::Jacobi;
use stokes_sparse::{BlockOperator, LinearOperator};

/// A sparse matrix over all degrees of freedom together with its velocity/pressure blocks.
#[derive(Debug, Clone)]
pub struct StokesBlockMatrix {
    full: CsrMatrix<f64>,
    blocks: [[CsrMatrix<f64>; 2]; 2],
}

impl StokesBlockMatrix {
    fn from_full(full: CsrMatrix<f64>, block_sizes: [usize; 2]) -> eyre::Result<Self> {
        let [n_u, n_p] = block_sizes;
        let u = 0..n_u;
        let p = n_u..n_u + n_p;
        let blocks = [
            [extract_block(&full, u.clone(), u.clone())?, extract_block(&full, u.clone(), p.clone())?],
            [extract_block(&full, p.clone(), u)?, extract_block(&full, p.clone(), p)?],
        ];
        Ok(Self { full, blocks })
    }

    pub fn full(&self) -> &CsrMatrix<f64> {
        &self.full
    }

    /// Block `(i, j)`, where block 0 is the velocity and block 1 the pressure.
    pub fn block(&self, i: usize, j: usize) -> &CsrMatrix<f64> {
        &self.blocks[i][j]
    }

    pub fn block_sizes(&self) -> [usize; 2] {
        [self.blocks[0][0].nrows(), self.blocks[1][1].nrows()]
    }

    pub fn as_block_operator(&self) -> BlockOperator<'_, f64> {
        let sizes = self.block_sizes();
        let mut operator = BlockOperator::new(&sizes, &sizes);
        for i in 0..2 {
            for j in 0..2 {
                operator.set_block(i, j, &self.blocks[i][j]);
            }
        }
        operator
    }
}

/// The Jacobian of the Stokes system and the preconditioner built from it.
///
/// A system is valid for the mesh generation it was assembled on only.
pub struct JacobianSystem {
    generation: u64,
    alpha: f64,
    jacobian: StokesBlockMatrix,
    preconditioner: StokesBlockMatrix,
    velocity_amg: AlgebraicMultigrid<f64>,
    pressure_jacobi: Jacobi<f64>,
    direct: Option<DirectSolver<f64>>,
}

impl JacobianSystem {
    /// Assembles the block Jacobian `[[alpha M + mu E, Bt], [B, 0]]` and the preconditioner
    /// matrix `[[M / alpha + mu L, 0], [0, Mp / mu]]`. Constrained rows and columns are condensed,
    /// and their diagonal entries set to one. Collective.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        mesh: &AdaptiveQuadMesh,
        discretization: &Discretization,
        viscosity: f64,
        alpha: f64,
        settings: &LinearSolverSettings,
        use_direct_solver: bool,
        comm: &dyn Communicator,
    ) -> eyre::Result<Self> {
        discretization.ensure_current(mesh)?;
        if !(alpha.is_finite() && alpha > 0.0) {
            return Err(eyre!("alpha must be positive and finite, got {}", alpha));
        }

        let constraints = discretization.constraints();
        let dofs = discretization.dofs();
        let nnz = discretization.pattern().nnz();
        let new_matrix = || {
            CsrMatrix::try_from_pattern_and_values(discretization.pattern().clone(), vec![0.0; nnz])
                .map_err(|err| eyre!("failed to allocate matrix: {}", err))
        };
        let mut jacobian = new_matrix()?;
        let mut preconditioner = new_matrix()?;

        let quadrature = discretization.quadrature();
        assemble_cells_in_order(
            discretization.locally_owned_cells(),
            |active_index| {
                let cell = mesh.active_cells()[active_index];
                let values = CellValues::new(&mesh.element(cell), quadrature)?;
                Ok((
                    local_jacobian(&values, alpha, viscosity),
                    local_preconditioner(&values, alpha, viscosity),
                ))
            },
            |active_index, (cell_jacobian, cell_preconditioner)| {
                let condensed = CondensedCellDofs::new(dofs.cell_dofs(active_index), constraints);
                distribute_local_matrix(&condensed, &cell_jacobian, &mut jacobian)?;
                distribute_local_matrix(&condensed, &cell_preconditioner, &mut preconditioner)
            },
        )?;
        comm.sum_slice(jacobian.values_mut());
        comm.sum_slice(preconditioner.values_mut());
        set_constrained_diagonal(&mut jacobian, constraints, 1.0)?;
        set_constrained_diagonal(&mut preconditioner, constraints, 1.0)?;

        let block_sizes = discretization.block_sizes();
        let direct = if use_direct_solver && discretization.n_dofs() <= settings.direct_solver_max_dofs {
            match DirectSolver::lu_from_csr(&jacobian) {
                Ok(solver) => Some(solver),
                Err(err) => {
                    log::warn!("Direct factorization failed ({}), falling back to iterative solver", err);
                    None
                }
            }
        } else {
            None
        };

        let jacobian = StokesBlockMatrix::from_full(jacobian, block_sizes)?;
        let preconditioner = StokesBlockMatrix::from_full(preconditioner, block_sizes)?;

        let amg_settings = AmgSettings {
            aggregation_threshold: settings.amg_aggregation_threshold,
            smoother_sweeps: settings.amg_smoother_sweeps,
            ..AmgSettings::default()
        };
        let velocity_amg = AlgebraicMultigrid::with_component_labels(
            preconditioner.block(0, 0),
            &discretization.velocity_component_labels(),
            &amg_settings,
        )?;
        let pressure_jacobi = Jacobi::from_csr(preconditioner.block(1, 1))?;
        log::debug!(
            "Assembled Jacobian with alpha = {:e}, AMG hierarchy {:?}",
            alpha,
            velocity_amg.level_sizes()
        );

        Ok(Self {
            generation: discretization.generation(),
            alpha,
            jacobian,
            preconditioner,
            velocity_amg,
            pressure_jacobi,
            direct,
        })
    }

    /// The mesh generation the system was assembled on.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn jacobian(&self) -> &StokesBlockMatrix {
        &self.jacobian
    }

    pub fn preconditioner(&self) -> &StokesBlockMatrix {
        &self.preconditioner
    }

    pub fn velocity_amg(&self) -> &AlgebraicMultigrid<f64> {
        &self.velocity_amg
    }

    pub fn pressure_jacobi(&self) -> &Jacobi<f64> {
        &self.pressure_jacobi
    }

    pub fn direct_solver(&self) -> Option<&DirectSolver<f64>> {
        self.direct.as_ref()
    }

    /// Computes `J x`.
    pub fn apply_jacobian(&self, x: &DVector<f64>) -> eyre::Result<DVector<f64>> {
        let mut y = DVector::zeros(self.jacobian.full().nrows());
        self.jacobian
            .as_block_operator()
            .apply(DVectorViewMut::from(&mut y), DVectorView::from(x))
            .map_err(|err| eyre!("failed to apply Jacobian: {}", err))?;
        Ok(y)
    }
}
