use crate::element::{q1_basis, q2_basis, q2_gradients, Quad4Element, Q1_NODES, Q2_NODES};
use crate::quadrature::QuadratureRule2d;
use crate::space::{local_pressure_dof, local_velocity_dof, DOFS_PER_CELL, VELOCITY_COMPONENTS};
use eyre::eyre;
use nalgebra::{Matrix1x4, Matrix2, OMatrix, Point2, SMatrix, SVector, Vector2, U1, U2, U9};

pub type LocalVector = SVector<f64, DOFS_PER_CELL>;
pub type LocalMatrix = SMatrix<f64, DOFS_PER_CELL, DOFS_PER_CELL>;

/// Basis function values and physical gradients at a quadrature point of a cell.
#[derive(Debug, Clone)]
pub struct QuadraturePointValues {
    pub point: Point2<f64>,
    /// Quadrature weight times the determinant of the geometry Jacobian.
    pub jxw: f64,
    pub velocity_basis: OMatrix<f64, U1, U9>,
    /// Physical gradients of the velocity basis, one column per basis function.
    pub velocity_gradients: OMatrix<f64, U2, U9>,
    pub pressure_basis: Matrix1x4<f64>,
}

/// Values of the discrete fields at a point.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FieldValues {
    pub velocity: Vector2<f64>,
    /// Row `i` is the gradient of velocity component `i`.
    pub velocity_gradient: Matrix2<f64>,
    pub pressure: f64,
}

impl FieldValues {
    pub fn divergence(&self) -> f64 {
        self.velocity_gradient.trace()
    }

    pub fn symmetric_gradient(&self) -> Matrix2<f64> {
        (self.velocity_gradient + self.velocity_gradient.transpose()) * 0.5
    }
}

/// Precomputed quadrature point data of a single cell.
#[derive(Debug, Clone)]
pub struct CellValues {
    points: Vec<QuadraturePointValues>,
    diameter: f64,
}

impl CellValues {
    pub fn new(element: &Quad4Element, quadrature: &QuadratureRule2d) -> eyre::Result<Self> {
        let points = quadrature
            .weights
            .iter()
            .zip(&quadrature.points)
            .map(|(&weight, xi)| {
                let jacobian = element.reference_jacobian(xi);
                let det = jacobian.determinant();
                if det <= 0.0 {
                    return Err(eyre!(
                        "non-positive Jacobian determinant {} at reference point ({}, {})",
                        det,
                        xi.x,
                        xi.y
                    ));
                }
                let inverse_transpose = jacobian
                    .try_inverse()
                    .ok_or_else(|| eyre!("singular element Jacobian"))?
                    .transpose();
                Ok(QuadraturePointValues {
                    point: element.map_reference_coords(xi),
                    jxw: weight * det,
                    velocity_basis: q2_basis(xi),
                    velocity_gradients: inverse_transpose * q2_gradients(xi),
                    pressure_basis: q1_basis(xi),
                })
            })
            .collect::<eyre::Result<Vec<_>>>()?;
        Ok(Self {
            points,
            diameter: element.diameter(),
        })
    }

    pub fn quadrature_points(&self) -> &[QuadraturePointValues] {
        &self.points
    }

    pub fn diameter(&self) -> f64 {
        self.diameter
    }

    pub fn measure(&self) -> f64 {
        self.points.iter().map(|q| q.jxw).sum()
    }
}

/// Evaluates the discrete fields from the cell-local coefficients `local`.
pub fn evaluate_fields(q: &QuadraturePointValues, local: &[f64]) -> FieldValues {
    assert_eq!(local.len(), DOFS_PER_CELL);
    let mut velocity = Vector2::zeros();
    let mut velocity_gradient = Matrix2::zeros();
    for c in 0..VELOCITY_COMPONENTS {
        for i in 0..Q2_NODES {
            let u_ci = local[local_velocity_dof(c, i)];
            velocity[c] += q.velocity_basis[i] * u_ci;
            for d in 0..2 {
                velocity_gradient[(c, d)] += q.velocity_gradients[(d, i)] * u_ci;
            }
        }
    }
    let pressure = (0..Q1_NODES)
        .map(|j| q.pressure_basis[j] * local[local_pressure_dof(j)])
        .sum();
    FieldValues {
        velocity,
        velocity_gradient,
        pressure,
    }
}

/// Cell residual of the momentum and continuity equations:
///
/// ```text
/// (u_t, v) + mu (eps(u), eps(v)) - (p, div v) - (f, v)
/// -(div u, q)
/// ```
pub fn local_residual(
    values: &CellValues,
    y: &[f64],
    y_dot: &[f64],
    viscosity: f64,
    forcing: impl Fn(&Point2<f64>) -> Vector2<f64>,
) -> LocalVector {
    let mut residual = LocalVector::zeros();
    for q in values.quadrature_points() {
        let fields = evaluate_fields(q, y);
        let velocity_dot = evaluate_fields(q, y_dot).velocity;
        let eps = fields.symmetric_gradient();
        let f = forcing(&q.point);

        for c in 0..VELOCITY_COMPONENTS {
            for i in 0..Q2_NODES {
                let phi = q.velocity_basis[i];
                let grad_phi = q.velocity_gradients.column(i);
                let viscous = grad_phi[0] * eps[(c, 0)] + grad_phi[1] * eps[(c, 1)];
                residual[local_velocity_dof(c, i)] +=
                    ((velocity_dot[c] - f[c]) * phi + viscosity * viscous - fields.pressure * grad_phi[c]) * q.jxw;
            }
        }
        let divergence = fields.divergence();
        for j in 0..Q1_NODES {
            residual[local_pressure_dof(j)] -= divergence * q.pressure_basis[j] * q.jxw;
        }
    }
    residual
}

/// Cell Jacobian `alpha dR/dy' + dR/dy`:
///
/// ```text
/// [ alpha M + mu E   Bt ]
/// [ B                0  ]
/// ```
///
/// with `E` the symmetric-gradient viscosity form and `B` the negative divergence.
pub fn local_jacobian(values: &CellValues, alpha: f64, viscosity: f64) -> LocalMatrix {
    let mut matrix = LocalMatrix::zeros();
    for q in values.quadrature_points() {
        let g = &q.velocity_gradients;
        for c in 0..VELOCITY_COMPONENTS {
            for i in 0..Q2_NODES {
                let row = local_velocity_dof(c, i);
                for d in 0..VELOCITY_COMPONENTS {
                    for j in 0..Q2_NODES {
                        let mut value = 0.5 * g[(d, i)] * g[(c, j)];
                        if c == d {
                            value += 0.5 * g.column(i).dot(&g.column(j));
                            value = viscosity * value + alpha * q.velocity_basis[i] * q.velocity_basis[j];
                        } else {
                            value *= viscosity;
                        }
                        matrix[(row, local_velocity_dof(d, j))] += value * q.jxw;
                    }
                }
                for j in 0..Q1_NODES {
                    let coupling = -q.pressure_basis[j] * g[(c, i)] * q.jxw;
                    matrix[(row, local_pressure_dof(j))] += coupling;
                    matrix[(local_pressure_dof(j), row)] += coupling;
                }
            }
        }
    }
    matrix
}

/// Cell matrix of the block preconditioner:
///
/// ```text
/// [ M / alpha + mu L   0        ]
/// [ 0                  Mp / mu  ]
/// ```
///
/// with `L` the vector Laplacian and `Mp` the pressure mass matrix.
pub fn local_preconditioner(values: &CellValues, alpha: f64, viscosity: f64) -> LocalMatrix {
    let mut matrix = LocalMatrix::zeros();
    for q in values.quadrature_points() {
        let g = &q.velocity_gradients;
        for i in 0..Q2_NODES {
            for j in 0..Q2_NODES {
                let value = (q.velocity_basis[i] * q.velocity_basis[j] / alpha
                    + viscosity * g.column(i).dot(&g.column(j)))
                    * q.jxw;
                for c in 0..VELOCITY_COMPONENTS {
                    matrix[(local_velocity_dof(c, i), local_velocity_dof(c, j))] += value;
                }
            }
        }
        for i in 0..Q1_NODES {
            for j in 0..Q1_NODES {
                matrix[(local_pressure_dof(i), local_pressure_dof(j))] +=
                    q.pressure_basis[i] * q.pressure_basis[j] / viscosity * q.jxw;
            }
        }
    }
    matrix
}
