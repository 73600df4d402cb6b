//! The time-dependent Stokes problem as a differential-algebraic model.
//!
//! [`StokesProblem`] owns the adaptive mesh, its current [`Discretization`] and the Jacobian
//! system of the last setup, and implements [`DaeModel`] on top of them:
//!
//! - [`residual`](DaeModel::residual) assembles `F(t, y, y')` with constrained rows replaced by
//!   the distance of `y` to its constraint-consistent version,
//! - [`setup_jacobian`](DaeModel::setup_jacobian) assembles the block Jacobian and the block
//!   Schur complement preconditioner,
//! - [`solve_jacobian_system`](DaeModel::solve_jacobian_system) runs the two-tier FGMRES
//!   strategy (or a dense factorization for small systems),
//! - [`solver_should_restart`](DaeModel::solver_should_restart) runs the mesh adaptation check.
//!
//! The Jacobian system is tied to the mesh generation it was assembled on. Adapting the mesh
//! drops it, and solving before the next setup is an error.
use crate::comm::{Communicator, SerialCommunicator};
use crate::config::{LinearSolverSettings, StokesParameters};
use crate::dae::{BackwardEuler, BackwardEulerSettings, DaeModel, IntegrationSummary, LinearSolveOutcome, StepControl};
use crate::data::FlowData;
use crate::discretization::Discretization;
use crate::error::ErrorTable;
use crate::mesh::{AdaptiveQuadMesh, QuadMesh2d};
use crate::output::{NullSink, OutputSink, StepView};
use crate::space::FiniteElementSpace;
use eyre::eyre;
use nalgebra::DVector;
use stokes_sparse::BlockVector;

mod adapt;
mod jacobian;
mod residual;
mod solver;

pub use jacobian::*;
pub use residual::*;
pub use solver::*;

/// Final state and statistics of [`StokesProblem::run`].
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub summary: IntegrationSummary,
    pub solution: DVector<f64>,
    pub solution_dot: DVector<f64>,
}

pub struct StokesProblem<D: FlowData, C: Communicator = SerialCommunicator> {
    mesh: AdaptiveQuadMesh,
    discretization: Discretization,
    data: D,
    parameters: StokesParameters,
    solver_settings: LinearSolverSettings,
    comm: C,
    system: Option<JacobianSystem>,
    error_table: ErrorTable,
    output: Box<dyn OutputSink>,
    adaptations: usize,
}

impl<D: FlowData, C: Communicator> StokesProblem<D, C> {
    /// Validates the parameters, refines the coarse mesh globally and sets up the first
    /// discretization at `t = 0`. Collective.
    pub fn new(coarse_mesh: &QuadMesh2d, data: D, parameters: StokesParameters, comm: C) -> eyre::Result<Self> {
        parameters.validate()?;
        coarse_mesh.validate()?;
        let mut mesh = AdaptiveQuadMesh::from_coarse_mesh(coarse_mesh)?;
        mesh.refine_global(parameters.initial_global_refinement);
        let discretization = Discretization::new(&mesh, FiniteElementSpace::taylor_hood(), &data, 0.0, &comm)?;
        Ok(Self {
            mesh,
            discretization,
            data,
            parameters,
            solver_settings: LinearSolverSettings::default(),
            comm,
            system: None,
            error_table: ErrorTable::new(),
            output: Box::new(NullSink),
            adaptations: 0,
        })
    }

    pub fn with_solver_settings(self, solver_settings: LinearSolverSettings) -> Self {
        Self { solver_settings, ..self }
    }

    /// Additional sink receiving every accepted step.
    pub fn with_output(self, output: Box<dyn OutputSink>) -> Self {
        Self { output, ..self }
    }

    pub fn mesh(&self) -> &AdaptiveQuadMesh {
        &self.mesh
    }

    pub fn discretization(&self) -> &Discretization {
        &self.discretization
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn parameters(&self) -> &StokesParameters {
        &self.parameters
    }

    pub fn solver_settings(&self) -> &LinearSolverSettings {
        &self.solver_settings
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    /// The Jacobian system of the last setup, if it is still valid.
    pub fn jacobian_system(&self) -> Option<&JacobianSystem> {
        self.system.as_ref()
    }

    pub fn error_table(&self) -> &ErrorTable {
        &self.error_table
    }

    /// Number of mesh adaptations performed so far.
    pub fn adaptations(&self) -> usize {
        self.adaptations
    }

    /// Returns copies of `y` and `y_dot` consistent with the constraints of the current
    /// discretization. `y_dot` is only made consistent with the hanging-node constraints.
    pub fn consistent_state(&self, y: &DVector<f64>, y_dot: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        let mut y = y.clone();
        self.discretization.constraints().distribute(&mut y);
        let mut y_dot = y_dot.clone();
        self.discretization
            .hanging_node_constraints()
            .distribute(&mut y_dot);
        (y, y_dot)
    }

    /// Interpolates the initial data on the current discretization.
    pub fn initial_state(&self) -> (DVector<f64>, DVector<f64>) {
        let dofs = self.discretization.dofs();
        let data = &self.data;
        let y = dofs.interpolate(&self.mesh, |x| data.initial_velocity(x), |x| data.initial_pressure(x));
        let y_dot = dofs.interpolate(&self.mesh, |x| data.initial_velocity_dot(x), |_| 0.0);
        self.consistent_state(&y, &y_dot)
    }

    /// Runs a complete simulation from the initial state at `t = 0` with the backward Euler
    /// driver. The number of steps is additionally bounded by `max_time_steps`. The returned
    /// state is consistent with the constraints at the final time.
    pub fn run(&mut self, settings: BackwardEulerSettings) -> eyre::Result<SimulationResult> {
        let settings = BackwardEulerSettings {
            max_steps: settings.max_steps.min(self.parameters.max_time_steps),
            ..settings
        };
        let (mut y, mut y_dot) = self.initial_state();
        let summary = BackwardEuler::new(settings).integrate(self, 0.0, &mut y, &mut y_dot)?;
        log::info!(
            "Finished at t = {} after {} steps ({} rejected, {} restarts, {} linear iterations, {} inner)",
            summary.final_time,
            summary.steps,
            summary.rejected_steps,
            summary.restarts,
            summary.linear_iterations,
            summary.inner_linear_iterations
        );
        self.error_table.finish()?;
        self.output.finish()?;
        self.discretization
            .update_constraints(&self.mesh, &self.data, summary.final_time)?;
        let (solution, solution_dot) = self.consistent_state(&y, &y_dot);
        Ok(SimulationResult {
            summary,
            solution,
            solution_dot,
        })
    }

    fn check_vector_len(&self, name: &str, vector: &DVector<f64>) -> eyre::Result<()> {
        if vector.len() != self.discretization.n_dofs() {
            return Err(eyre!(
                "{} has length {}, but the discretization has {} dofs",
                name,
                vector.len(),
                self.discretization.n_dofs()
            ));
        }
        Ok(())
    }
}

impl<D: FlowData, C: Communicator> DaeModel for StokesProblem<D, C> {
    fn create_new_vector(&self) -> BlockVector<f64> {
        self.discretization.create_vector()
    }

    fn n_dofs(&self) -> usize {
        self.discretization.n_dofs()
    }

    fn residual(&mut self, t: f64, y: &DVector<f64>, y_dot: &DVector<f64>, residual: &mut DVector<f64>) -> eyre::Result<()> {
        self.discretization
            .update_constraints(&self.mesh, &self.data, t)?;
        self.check_vector_len("y", y)?;
        self.check_vector_len("y_dot", y_dot)?;
        // Within a Newton solve, constrained rates follow their values with the current alpha
        let alpha = self
            .system
            .as_ref()
            .filter(|system| system.generation() == self.discretization.generation())
            .map(JacobianSystem::alpha);
        let rates = alpha.map(|alpha| rates_on_constraints(&self.discretization, y, y_dot, alpha));
        assemble_residual(
            &self.mesh,
            &self.discretization,
            &self.data,
            self.parameters.viscosity,
            t,
            y,
            rates.as_ref().unwrap_or(y_dot),
            residual,
            &self.comm,
        )
    }

    fn setup_jacobian(&mut self, t: f64, y: &DVector<f64>, y_dot: &DVector<f64>, alpha: f64) -> eyre::Result<()> {
        self.check_vector_len("y", y)?;
        self.check_vector_len("y_dot", y_dot)?;
        self.discretization
            .update_constraints(&self.mesh, &self.data, t)?;
        self.system = None;
        self.system = Some(JacobianSystem::assemble(
            &self.mesh,
            &self.discretization,
            self.parameters.viscosity,
            alpha,
            &self.solver_settings,
            self.parameters.use_direct_solver,
            &self.comm,
        )?);
        Ok(())
    }

    fn solve_jacobian_system(&self, src: &DVector<f64>, dst: &mut DVector<f64>) -> eyre::Result<LinearSolveOutcome> {
        let system = self
            .system
            .as_ref()
            .ok_or_else(|| eyre!("solve requested before the Jacobian was set up"))?;
        if system.generation() != self.discretization.generation() {
            return Err(eyre!(
                "Jacobian was assembled on mesh generation {}, but the discretization is at generation {}",
                system.generation(),
                self.discretization.generation()
            ));
        }
        solve_saddle_point_system(system, self.discretization.constraints(), &self.solver_settings, src, dst)
    }

    fn differential_components(&self) -> DVector<f64> {
        let dofs = self.discretization.dofs();
        let constraints = self.discretization.constraints();
        DVector::from_fn(dofs.n_dofs(), |dof, _| {
            if dof < dofs.n_velocity_dofs() && !constraints.is_constrained(dof) {
                1.0
            } else {
                0.0
            }
        })
    }

    fn output_step(&mut self, t: f64, y: &DVector<f64>, y_dot: &DVector<f64>, step_number: usize, h: f64) -> eyre::Result<()> {
        self.check_vector_len("y", y)?;
        self.discretization
            .update_constraints(&self.mesh, &self.data, t)?;
        let (solution, solution_dot) = self.consistent_state(y, y_dot);
        log::info!(
            "Time step {} at t = {:.6} (h = {:e}), {} cells, {} dofs",
            step_number,
            t,
            h,
            self.mesh.num_active_cells(),
            self.discretization.n_dofs()
        );
        let view = StepView {
            time: t,
            step: step_number,
            step_size: h,
            solution: &solution,
            solution_dot: &solution_dot,
            mesh: &self.mesh,
            discretization: &self.discretization,
            data: &self.data,
            comm: &self.comm,
        };
        self.error_table.output_step(&view)?;
        self.output.output_step(&view)
    }

    fn solver_should_restart(
        &mut self,
        t: f64,
        _step_number: usize,
        _h: f64,
        y: &mut DVector<f64>,
        y_dot: &mut DVector<f64>,
    ) -> eyre::Result<StepControl> {
        self.check_adaptation(t, y, y_dot)
    }
}
