//! Error norms against exact solutions and the discrete divergence.
use crate::assembly::{evaluate_fields, CellValues};
use crate::comm::Communicator;
use crate::data::FlowData;
use crate::discretization::Discretization;
use crate::mesh::AdaptiveQuadMesh;
use crate::output::{OutputSink, StepView};
use eyre::eyre;
use nalgebra::DVector;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Norms of the error of a discrete solution at one point in time.
#[derive(Debug, Copy, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorNorms {
    pub velocity_l2: f64,
    pub velocity_h1_seminorm: f64,
    pub pressure_l2: f64,
}

/// Sums `f` over the quadrature points of the locally owned cells, then over all workers.
fn integrate_owned<F>(
    mesh: &AdaptiveQuadMesh,
    discretization: &Discretization,
    comm: &dyn Communicator,
    f: F,
) -> eyre::Result<f64>
where
    F: Fn(usize, &CellValues) -> eyre::Result<f64> + Sync,
{
    discretization.ensure_current(mesh)?;
    let local: f64 = discretization
        .locally_owned_cells()
        .into_par_iter()
        .map(|active_index| {
            let cell = mesh.active_cells()[active_index];
            let values = CellValues::new(&mesh.element(cell), discretization.quadrature())?;
            f(active_index, &values)
        })
        .collect::<eyre::Result<Vec<f64>>>()?
        .into_iter()
        .sum();
    Ok(comm.sum(local))
}

/// The L2 norm of the divergence of the discrete velocity.
pub fn divergence_l2_norm(
    mesh: &AdaptiveQuadMesh,
    discretization: &Discretization,
    solution: &DVector<f64>,
    comm: &dyn Communicator,
) -> eyre::Result<f64> {
    let squared = integrate_owned(mesh, discretization, comm, |active_index, values| {
        let local = discretization.dofs().extract_local(solution, active_index);
        Ok(values
            .quadrature_points()
            .iter()
            .map(|q| evaluate_fields(q, &local).divergence().powi(2) * q.jxw)
            .sum())
    })?;
    Ok(squared.sqrt())
}

/// Errors against [`FlowData::exact_solution`]. Returns `None` if no exact solution is known.
pub fn compute_errors(
    mesh: &AdaptiveQuadMesh,
    discretization: &Discretization,
    data: &dyn FlowData,
    solution: &DVector<f64>,
    t: f64,
    comm: &dyn Communicator,
) -> eyre::Result<Option<ErrorNorms>> {
    let Some(cell) = mesh.active_cells().first() else {
        return Ok(None);
    };
    if data.exact_solution(&mesh.element(*cell).vertices()[0], t).is_none() {
        return Ok(None);
    }

    let squared_error = |component: usize| {
        integrate_owned(mesh, discretization, comm, |active_index, values| {
            let local = discretization.dofs().extract_local(solution, active_index);
            let mut sum = 0.0;
            for q in values.quadrature_points() {
                let fields = evaluate_fields(q, &local);
                let exact = data
                    .exact_solution(&q.point, t)
                    .ok_or_else(|| eyre!("exact solution is not defined at ({}, {})", q.point.x, q.point.y))?;
                let error = match component {
                    0 => (fields.velocity - exact.velocity).norm_squared(),
                    1 => (fields.velocity_gradient - exact.velocity_gradient).norm_squared(),
                    _ => (fields.pressure - exact.pressure).powi(2),
                };
                sum += error * q.jxw;
            }
            Ok(sum)
        })
    };

    Ok(Some(ErrorNorms {
        velocity_l2: squared_error(0)?.sqrt(),
        velocity_h1_seminorm: squared_error(1)?.sqrt(),
        pressure_l2: squared_error(2)?.sqrt(),
    }))
}

/// One row of an [`ErrorTable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTableRow {
    pub step: usize,
    pub time: f64,
    pub active_cells: usize,
    pub dofs: usize,
    pub divergence_l2: f64,
    pub errors: Option<ErrorNorms>,
}

/// Collects error norms of every output step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorTable {
    rows: Vec<ErrorTableRow>,
}

impl ErrorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[ErrorTableRow] {
        &self.rows
    }

    /// Largest divergence norm over all recorded steps.
    pub fn max_divergence(&self) -> f64 {
        self.rows.iter().map(|row| row.divergence_l2).fold(0.0, f64::max)
    }
}

impl OutputSink for ErrorTable {
    fn output_step(&mut self, step: &StepView) -> eyre::Result<()> {
        let divergence_l2 = divergence_l2_norm(step.mesh, step.discretization, step.solution, step.comm)?;
        let errors = compute_errors(
            step.mesh,
            step.discretization,
            step.data,
            step.solution,
            step.time,
            step.comm,
        )?;
        self.rows.push(ErrorTableRow {
            step: step.step,
            time: step.time,
            active_cells: step.mesh.num_active_cells(),
            dofs: step.discretization.n_dofs(),
            divergence_l2,
            errors,
        });
        Ok(())
    }

    fn finish(&mut self) -> eyre::Result<()> {
        log::info!("Error table:\n{}", self);
        Ok(())
    }
}

impl fmt::Display for ErrorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>6} {:>12} {:>8} {:>8} {:>12} {:>12} {:>12} {:>12}",
            "step", "time", "cells", "dofs", "div L2", "u L2", "u H1", "p L2"
        )?;
        for row in &self.rows {
            write!(
                f,
                "{:>6} {:>12.4e} {:>8} {:>8} {:>12.4e}",
                row.step, row.time, row.active_cells, row.dofs, row.divergence_l2
            )?;
            match &row.errors {
                Some(e) => writeln!(
                    f,
                    " {:>12.4e} {:>12.4e} {:>12.4e}",
                    e.velocity_l2, e.velocity_h1_seminorm, e.pressure_l2
                )?,
                None => writeln!(f, " {:>12} {:>12} {:>12}", "-", "-", "-")?,
            }
        }
        Ok(())
    }
}
