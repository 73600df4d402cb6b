//! Reference quadrilaterals and the Lagrange bases used by the Taylor-Hood pair.
//!
//! The reference square is `[-1, 1]^2`. Vertices are numbered counter-clockwise starting in the
//! lower left corner. Faces are numbered such that face `k` connects vertex `k` and vertex
//! `(k + 1) % 4`, i.e. bottom, right, top, left.
use itertools::Itertools;
use nalgebra::{distance, Matrix1x4, Matrix2, Matrix2x4, OMatrix, Point2, Vector2, U1, U2, U9};

/// Number of basis functions of the biquadratic element.
pub const Q2_NODES: usize = 9;
/// Number of basis functions of the bilinear element.
pub const Q1_NODES: usize = 4;

/// A straight-sided quadrilateral with the bilinear geometry map.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Quad4Element {
    vertices: [Point2<f64>; 4],
}

impl Quad4Element {
    pub fn from_vertices(vertices: [Point2<f64>; 4]) -> Self {
        Self { vertices }
    }

    pub fn reference() -> Self {
        Self::from_vertices([
            Point2::new(-1.0, -1.0),
            Point2::new(1.0, -1.0),
            Point2::new(1.0, 1.0),
            Point2::new(-1.0, 1.0),
        ])
    }

    pub fn vertices(&self) -> &[Point2<f64>; 4] {
        &self.vertices
    }

    #[rustfmt::skip]
    pub fn evaluate_basis(&self, xi: &Point2<f64>) -> Matrix1x4<f64> {
        // N_{alpha, beta}([alpha, beta]) = 1 with alpha, beta = 1 or -1
        let phi = |alpha: f64, beta: f64| (1.0 + alpha * xi[0]) * (1.0 + beta * xi[1]) / 4.0;
        Matrix1x4::new(
            phi(-1.0, -1.0),
            phi( 1.0, -1.0),
            phi( 1.0,  1.0),
            phi(-1.0,  1.0),
        )
    }

    #[rustfmt::skip]
    pub fn gradients(&self, xi: &Point2<f64>) -> Matrix2x4<f64> {
        let phi_grad = |alpha: f64, beta: f64| {
            Vector2::new(
                alpha * (1.0 + beta * xi[1]) / 4.0,
                beta * (1.0 + alpha * xi[0]) / 4.0,
            )
        };
        Matrix2x4::from_columns(&[
            phi_grad(-1.0, -1.0),
            phi_grad( 1.0, -1.0),
            phi_grad( 1.0,  1.0),
            phi_grad(-1.0,  1.0),
        ])
    }

    #[allow(non_snake_case)]
    pub fn map_reference_coords(&self, xi: &Point2<f64>) -> Point2<f64> {
        let X: Matrix2x4<f64> = Matrix2x4::from_fn(|i, j| self.vertices[j][i]);
        let N = self.evaluate_basis(xi);
        Point2::from(X * N.transpose())
    }

    /// The Jacobian `dx/dxi` of the geometry map.
    #[allow(non_snake_case)]
    pub fn reference_jacobian(&self, xi: &Point2<f64>) -> Matrix2<f64> {
        let X: Matrix2x4<f64> = Matrix2x4::from_fn(|i, j| self.vertices[j][i]);
        let G = self.gradients(xi);
        X * G.transpose()
    }

    /// Largest distance between two vertices.
    pub fn diameter(&self) -> f64 {
        self.vertices
            .iter()
            .tuple_combinations()
            .map(|(x, y)| distance(x, y))
            .fold(0.0, f64::max)
    }

    /// Endpoints of face `k`, in counter-clockwise order.
    pub fn face(&self, k: usize) -> (Point2<f64>, Point2<f64>) {
        (self.vertices[k], self.vertices[(k + 1) % 4])
    }
}

/// Reference coordinates of the point with parameter `s` in `[-1, 1]` on face `k`, following the
/// counter-clockwise orientation of the face.
pub fn reference_face_point(k: usize, s: f64) -> Point2<f64> {
    match k {
        0 => Point2::new(s, -1.0),
        1 => Point2::new(1.0, s),
        2 => Point2::new(-s, 1.0),
        3 => Point2::new(-1.0, -s),
        _ => panic!("A quadrilateral has only four faces"),
    }
}

/// Support points of the biquadratic element: vertices, face midpoints, center.
pub fn q2_reference_nodes() -> [Point2<f64>; Q2_NODES] {
    let p = |x, y| Point2::new(x, y);
    [
        p(-1.0, -1.0),
        p(1.0, -1.0),
        p(1.0, 1.0),
        p(-1.0, 1.0),
        p(0.0, -1.0),
        p(1.0, 0.0),
        p(0.0, 1.0),
        p(-1.0, 0.0),
        p(0.0, 0.0),
    ]
}

/// Support points of the bilinear element.
pub fn q1_reference_nodes() -> [Point2<f64>; Q1_NODES] {
    *Quad4Element::reference().vertices()
}

/// The 1D quadratic Lagrange polynomial with value 1 at `alpha` in {-1, 0, 1}.
fn quad9_phi_1d(alpha: f64, xi: f64) -> f64 {
    let alpha2 = alpha * alpha;
    let a = (3.0 / 2.0) * alpha2 - 1.0;
    let b = alpha / 2.0;
    let c = 1.0 - alpha2;
    a * xi * xi + b * xi + c
}

fn quad9_phi_grad_1d(alpha: f64, xi: f64) -> f64 {
    let alpha2 = alpha * alpha;
    let a = (3.0 / 2.0) * alpha2 - 1.0;
    let b = alpha / 2.0;
    2.0 * a * xi + b
}

const Q2_NODE_COORDS: [(f64, f64); Q2_NODES] = [
    (-1.0, -1.0),
    (1.0, -1.0),
    (1.0, 1.0),
    (-1.0, 1.0),
    (0.0, -1.0),
    (1.0, 0.0),
    (0.0, 1.0),
    (-1.0, 0.0),
    (0.0, 0.0),
];

/// Biquadratic Lagrange basis on the reference square.
///
/// The basis functions are separable, `N_{alpha, beta}(xi, eta) = N_alpha(xi) N_beta(eta)`.
pub fn q2_basis(xi: &Point2<f64>) -> OMatrix<f64, U1, U9> {
    OMatrix::<f64, U1, U9>::from_fn(|_, i| {
        let (alpha, beta) = Q2_NODE_COORDS[i];
        quad9_phi_1d(alpha, xi[0]) * quad9_phi_1d(beta, xi[1])
    })
}

/// Reference gradients of the biquadratic basis, one column per basis function.
pub fn q2_gradients(xi: &Point2<f64>) -> OMatrix<f64, U2, U9> {
    let mut gradients = OMatrix::<f64, U2, U9>::zeros();
    for (i, &(alpha, beta)) in Q2_NODE_COORDS.iter().enumerate() {
        gradients[(0, i)] = quad9_phi_grad_1d(alpha, xi[0]) * quad9_phi_1d(beta, xi[1]);
        gradients[(1, i)] = quad9_phi_1d(alpha, xi[0]) * quad9_phi_grad_1d(beta, xi[1]);
    }
    gradients
}

/// Bilinear basis on the reference square.
pub fn q1_basis(xi: &Point2<f64>) -> Matrix1x4<f64> {
    Quad4Element::reference().evaluate_basis(xi)
}

pub fn q1_gradients(xi: &Point2<f64>) -> Matrix2x4<f64> {
    Quad4Element::reference().gradients(xi)
}

/// Maps reference coordinates of child `k` to reference coordinates of its parent.
///
/// Children are numbered like the vertices of the parent: child `k` contains parent vertex `k`.
pub fn child_to_parent_reference(child: usize, xi: &Point2<f64>) -> Point2<f64> {
    let offset = match child {
        0 => Vector2::new(-1.0, -1.0),
        1 => Vector2::new(1.0, -1.0),
        2 => Vector2::new(1.0, 1.0),
        3 => Vector2::new(-1.0, 1.0),
        _ => panic!("A quadrilateral has only four children"),
    };
    Point2::from((xi.coords + offset) / 2.0)
}
