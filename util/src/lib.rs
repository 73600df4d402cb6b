use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Approx assertion for scalars
#[macro_export]
macro_rules! assert_scalar_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let x = $x;
        let y = $y;
        let absdiff = (x - y).abs();
        if !(absdiff <= $tol) {
            panic!(
                "assert_scalar_eq!({}, {}) failed: left = {:e}, right = {:e}, diff = {:e}, abstol = {:e}",
                stringify!($x),
                stringify!($y),
                x,
                y,
                absdiff,
                $tol
            );
        }
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// The 1D finite difference Laplacian `tridiag(-1, 2, -1)` of dimension `n`.
pub fn laplacian_1d(n: usize) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        coo.push(i, i, 2.0);
        if i > 0 {
            coo.push(i, i - 1, -1.0);
        }
        if i + 1 < n {
            coo.push(i, i + 1, -1.0);
        }
    }
    CsrMatrix::from(&coo)
}

/// The 5-point finite difference Laplacian on an `n x n` grid of interior points.
pub fn laplacian_2d(n: usize) -> CsrMatrix<f64> {
    let index = |i: usize, j: usize| i * n + j;
    let mut coo = CooMatrix::new(n * n, n * n);
    for i in 0..n {
        for j in 0..n {
            let row = index(i, j);
            coo.push(row, row, 4.0);
            if i > 0 {
                coo.push(row, index(i - 1, j), -1.0);
            }
            if i + 1 < n {
                coo.push(row, index(i + 1, j), -1.0);
            }
            if j > 0 {
                coo.push(row, index(i, j - 1), -1.0);
            }
            if j + 1 < n {
                coo.push(row, index(i, j + 1), -1.0);
            }
        }
    }
    CsrMatrix::from(&coo)
}

/// A deterministic, non-trivial vector with entries in `[-1, 1]`.
pub fn wavy_vector(n: usize) -> DVector<f64> {
    DVector::from_fn(n, |i, _| ((i as f64 + 1.0) * 0.7).sin())
}
