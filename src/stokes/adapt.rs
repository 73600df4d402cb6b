use crate::comm::Communicator;
use crate::dae::StepControl;
use crate::data::FlowData;
use crate::discretization::Discretization;
use crate::kelly::{kelly_indicators, max_indicator};
use crate::mesh::CellFlag;
use crate::stokes::StokesProblem;
use crate::transfer::SolutionTransfer;
use eyre::eyre;
use nalgebra::DVector;

impl<D: FlowData, C: Communicator> StokesProblem<D, C> {
    /// Adapts the mesh if the largest error indicator of the velocity exceeds the threshold.
    ///
    /// On adaptation, `y` and `y_dot` are transferred to the new mesh, made consistent with the
    /// new constraints and [`StepControl::Restart`] is returned. The Jacobian system is dropped,
    /// so a new setup is required before the next solve. Collective.
    pub fn check_adaptation(
        &mut self,
        t: f64,
        y: &mut DVector<f64>,
        y_dot: &mut DVector<f64>,
    ) -> eyre::Result<StepControl> {
        if !self.parameters.use_space_adaptivity {
            return Ok(StepControl::Continue);
        }
        self.discretization
            .update_constraints(&self.mesh, &self.data, t)?;
        let (y_consistent, y_dot_consistent) = self.consistent_state(y, y_dot);

        let indicators = kelly_indicators(&self.mesh, &self.discretization, &y_consistent, &self.comm)?;
        let max = max_indicator(&indicators, self.discretization.locally_owned_cells(), &self.comm);
        if max <= self.parameters.error_threshold {
            log::debug!(
                "Largest error indicator {:e} within threshold {:e}",
                max,
                self.parameters.error_threshold
            );
            return Ok(StepControl::Continue);
        }
        log::info!(
            "Largest error indicator {:e} exceeds threshold {:e} at t = {}, adapting mesh",
            max,
            self.parameters.error_threshold,
            t
        );

        let parameters = &self.parameters;
        let cell_limit = if !parameters.adaptive_refinement {
            for cell in self.mesh.active_cells().to_vec() {
                self.mesh.set_flag(cell, Some(CellFlag::Refine));
            }
            None
        } else if parameters.uses_fixed_number_marking() {
            let max_cells = parameters.max_cells as usize;
            self.mesh.refine_and_coarsen_fixed_number(
                &indicators,
                parameters.top_fraction,
                parameters.bottom_fraction,
                Some(max_cells),
            )?;
            Some(max_cells)
        } else {
            self.mesh
                .refine_and_coarsen_fixed_fraction(&indicators, parameters.top_fraction, parameters.bottom_fraction)?;
            None
        };

        self.comm.barrier();
        let counts = match cell_limit {
            Some(max_cells) => self.mesh.prepare_within_cell_limit(&indicators, max_cells)?,
            None => self.mesh.prepare_coarsening_and_refinement(),
        };
        if counts.refine == 0 && counts.coarsen == 0 {
            log::info!("No cells flagged after balancing, keeping the mesh");
            return Ok(StepControl::Continue);
        }
        log::debug!("Refining {} and coarsening {} cells", counts.refine, counts.coarsen);

        let transfer = SolutionTransfer::prepare_for_coarsening_and_refinement(
            &self.mesh,
            self.discretization.dofs(),
            &[&y_consistent, &y_dot_consistent],
        )?;
        self.mesh.execute_coarsening_and_refinement();
        self.system = None;
        self.discretization = Discretization::new(
            &self.mesh,
            self.discretization.space().clone(),
            &self.data,
            t,
            &self.comm,
        )?;

        let mut transferred = transfer.interpolate(&self.mesh, self.discretization.dofs())?;
        let missing = || eyre!("solution transfer returned fewer vectors than prepared");
        *y_dot = transferred.pop().ok_or_else(missing)?;
        *y = transferred.pop().ok_or_else(missing)?;
        self.discretization.constraints().distribute(y);
        self.discretization
            .hanging_node_constraints()
            .distribute(y_dot);
        self.adaptations += 1;
        Ok(StepControl::Restart)
    }
}
