//! Gauss quadrature on the reference interval `[-1, 1]` and the reference square `[-1, 1]^2`.
use nalgebra::Point2;
use std::f64::consts::PI;

/// Recurrence relation for Legendre polynomials.
///
/// Note: we use a formula for which derivatives are *not* defined at |x| == 1, so it is only
/// suitable for evaluation in the open interval (-1, 1).
fn legendre_value_and_derivative(n: usize, x: f64) -> (f64, f64) {
    // m P_m(x) = (2m - 1) * x P_{m - 1}(x) - (m - 1) P_{m - 2}(x)
    let mut p1 = 1.0;
    let mut p2 = 0.0;
    for m in 1..=n {
        let m = m as f64;
        let p3 = p2;
        p2 = p1;
        p1 = ((2.0 * m - 1.0) * x * p2 - (m - 1.0) * p3) / m;
    }
    let n = n as f64;
    (p1, n * (x * p1 - p2) / (x * x - 1.0))
}

/// A one-dimensional Gauss rule. Points are sorted in ascending order.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussRule1d {
    pub weights: Vec<f64>,
    pub points: Vec<f64>,
}

/// Gauss quadrature for the reference interval [-1, 1].
///
/// Given `n` points, the rule integrates polynomials of order up to `2 n - 1` exactly.
///
/// # Panics
///
/// Panics if zero points are requested.
pub fn gauss(num_points: usize) -> GaussRule1d {
    let n = num_points;
    assert!(n > 0, "number of points must be positive");

    let m = (n + 1) / 2;
    let mut points = vec![0.0; n];
    let mut weights = vec![0.0; n];

    // Only find the first m roots, the rest follow by symmetry
    for i in 0..m {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let (mut p, mut dp) = legendre_value_and_derivative(n, x);
        for _ in 0..100 {
            let dx = -p / dp;
            x += dx;
            (p, dp) = legendre_value_and_derivative(n, x);
            if dx.abs() <= 1e-15 {
                break;
            }
        }
        let w = 2.0 / ((1.0 - x * x) * dp * dp);
        // Roots are found in descending order
        points[n - 1 - i] = x;
        weights[n - 1 - i] = w;
        points[i] = -x;
        weights[i] = w;
    }

    GaussRule1d { weights, points }
}

/// A quadrature rule on the reference square.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule2d {
    pub weights: Vec<f64>,
    pub points: Vec<Point2<f64>>,
}

impl QuadratureRule2d {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Approximates the integral of the given function over the reference square.
    pub fn integrate(&self, f: impl Fn(&Point2<f64>) -> f64) -> f64 {
        self.weights
            .iter()
            .zip(&self.points)
            .map(|(w, p)| w * f(p))
            .sum()
    }
}

/// Tensor-product Gauss rule with `num_points_per_dim^2` points.
pub fn quadrilateral_gauss(num_points_per_dim: usize) -> QuadratureRule2d {
    let rule = gauss(num_points_per_dim);
    let n = num_points_per_dim;
    let mut weights = Vec::with_capacity(n * n);
    let mut points = Vec::with_capacity(n * n);
    for (&wx, &x) in rule.weights.iter().zip(&rule.points) {
        for (&wy, &y) in rule.weights.iter().zip(&rule.points) {
            weights.push(wx * wy);
            points.push(Point2::new(x, y));
        }
    }
    QuadratureRule2d { weights, points }
}
