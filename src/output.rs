//! Per-step output of accepted time steps.
use crate::comm::Communicator;
use crate::data::FlowData;
use crate::discretization::Discretization;
use crate::mesh::AdaptiveQuadMesh;
use nalgebra::DVector;

/// The state handed to an [`OutputSink`] after an accepted time step.
///
/// `solution` and `solution_dot` satisfy the constraints.
pub struct StepView<'a> {
    pub time: f64,
    pub step: usize,
    pub step_size: f64,
    pub solution: &'a DVector<f64>,
    pub solution_dot: &'a DVector<f64>,
    pub mesh: &'a AdaptiveQuadMesh,
    pub discretization: &'a Discretization,
    pub data: &'a dyn FlowData,
    pub comm: &'a dyn Communicator,
}

/// Consumer of accepted time steps, for example a file writer or an error table.
pub trait OutputSink {
    fn output_step(&mut self, step: &StepView) -> eyre::Result<()>;

    /// Called once after the last time step.
    fn finish(&mut self) -> eyre::Result<()> {
        Ok(())
    }
}

/// Discards all output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn output_step(&mut self, _step: &StepView) -> eyre::Result<()> {
        Ok(())
    }
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn output_step(&mut self, step: &StepView) -> eyre::Result<()> {
        (**self).output_step(step)
    }

    fn finish(&mut self) -> eyre::Result<()> {
        (**self).finish()
    }
}
