use crate::assembly::{
    assemble_cells_in_order, distribute_local_vector, local_residual, CellValues, CondensedCellDofs,
};
use crate::comm::Communicator;
use crate::data::FlowData;
use crate::discretization::Discretization;
use crate::mesh::AdaptiveQuadMesh;
use eyre::eyre;
use nalgebra::DVector;

/// Assembles `F(t, y, y')`.
///
/// The physics is evaluated with `y` made consistent with the constraints at time `t` (and `y'`
/// consistent with the hanging-node constraints). The rows of constrained degrees of freedom
/// hold `y_i - y~_i` instead, the distance of `y` to its constraint-consistent version. See
/// [`rates_on_constraints`] for the rates of boundary-constrained entries during a Newton solve.
#[allow(clippy::too_many_arguments)]
pub fn assemble_residual(
    mesh: &AdaptiveQuadMesh,
    discretization: &Discretization,
    data: &dyn FlowData,
    viscosity: f64,
    t: f64,
    y: &DVector<f64>,
    y_dot: &DVector<f64>,
    residual: &mut DVector<f64>,
    comm: &dyn Communicator,
) -> eyre::Result<()> {
    discretization.ensure_current(mesh)?;
    let n = discretization.n_dofs();
    if y.len() != n || y_dot.len() != n || residual.len() != n {
        return Err(eyre!(
            "vector lengths ({}, {}, {}) do not match the number of dofs {}",
            y.len(),
            y_dot.len(),
            residual.len(),
            n
        ));
    }

    let constraints = discretization.constraints();
    let dofs = discretization.dofs();
    let mut y_consistent = y.clone();
    constraints.distribute(&mut y_consistent);
    let mut y_dot_consistent = y_dot.clone();
    discretization
        .hanging_node_constraints()
        .distribute(&mut y_dot_consistent);

    residual.fill(0.0);
    let quadrature = discretization.quadrature();
    assemble_cells_in_order(
        discretization.locally_owned_cells(),
        |active_index| {
            let cell = mesh.active_cells()[active_index];
            let values = CellValues::new(&mesh.element(cell), quadrature)?;
            let local_y = dofs.extract_local(&y_consistent, active_index);
            let local_y_dot = dofs.extract_local(&y_dot_consistent, active_index);
            Ok(local_residual(&values, &local_y, &local_y_dot, viscosity, |x| data.forcing(x, t)))
        },
        |active_index, local| {
            let condensed = CondensedCellDofs::new(dofs.cell_dofs(active_index), constraints);
            distribute_local_vector(&condensed, &local, residual);
            Ok(())
        },
    )?;
    comm.sum_slice(residual.as_mut_slice());

    for line in constraints.lines() {
        residual[line.dof] = y[line.dof] - y_consistent[line.dof];
    }
    Ok(())
}

/// Returns `y'` with the rate of every boundary-constrained entry replaced by
/// `y'_i - alpha (y_i - y~_i)`, where `y~_i` is the constrained value at the time of the last
/// constraint update.
///
/// A Newton iteration with leading coefficient `alpha` changes `y'` by `alpha` times the change of
/// `y`, so this is the rate an entry has once `y_i` is on its constraint. With these rates the
/// residual does not depend on constrained entries outside of their own rows. Entries with
/// hanging-node constraints are left alone.
pub fn rates_on_constraints(
    discretization: &Discretization,
    y: &DVector<f64>,
    y_dot: &DVector<f64>,
    alpha: f64,
) -> DVector<f64> {
    let hanging = discretization.hanging_node_constraints();
    let mut y_consistent = y.clone();
    discretization.constraints().distribute(&mut y_consistent);
    let mut rates = y_dot.clone();
    for line in discretization.constraints().lines() {
        if !hanging.is_constrained(line.dof) {
            rates[line.dof] -= alpha * (y[line.dof] - y_consistent[line.dof]);
        }
    }
    rates
}
