//! Dense matrix primitives shared by the process model, process-noise
//! assembler and the EKF core. Thin wrappers over `nalgebra`'s dynamic
//! types — the state dimension is configurable at runtime (truncated
//! trailing groups), so fixed-size `SMatrix`/`SVector` types are not used
//! here.

use nalgebra::{DMatrix, DVector};

/// `a * b`.
pub fn mul(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    a * b
}

/// `a * b * a^T`, the covariance-propagation sandwich used by both predict
/// (`F P F^T`) and the Joseph-form update.
pub fn sandwich(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    a * b * a.transpose()
}

/// Symmetrize by averaging a matrix with its transpose.
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

pub fn is_symmetric(m: &DMatrix<f64>, tol: f64) -> bool {
    if m.nrows() != m.ncols() {
        return false;
    }
    for i in 0..m.nrows() {
        for j in (i + 1)..m.ncols() {
            if (m[(i, j)] - m[(j, i)]).abs() > tol {
                return false;
            }
        }
    }
    true
}

pub fn all_finite_vec(v: &DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}

pub fn all_finite_mat(m: &DMatrix<f64>) -> bool {
    m.iter().all(|x| x.is_finite())
}

/// Invert via LU decomposition. Returns `None` if singular to working
/// precision, mirroring the EKF core's fallback to a pseudo-inverse path.
pub fn invert(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    m.clone().try_inverse()
}

/// Symmetric (Cholesky-based) pseudo-inverse, used when a direct inverse of
/// the innovation covariance `S` fails because of near-singularity. Falls
/// back to the Moore-Penrose pseudo-inverse if even the Cholesky square root
/// is unavailable (S not positive definite to working precision).
pub fn pseudo_inverse_sym(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if let Some(chol) = nalgebra::linalg::Cholesky::new(m.clone()) {
        let l = chol.l();
        if let Some(l_inv) = l.clone().try_inverse() {
            return Some(l_inv.transpose() * l_inv);
        }
    }
    m.clone().pseudo_inverse(1e-12).ok()
}

/// Writes `block` into `dst` with its top-left corner at `(row, col)`.
pub fn copy_into_roi(dst: &mut DMatrix<f64>, block: &DMatrix<f64>, row: usize, col: usize) {
    dst.view_mut((row, col), (block.nrows(), block.ncols()))
        .copy_from(block);
}

pub fn set_diag_range(m: &mut DMatrix<f64>, start: usize, len: usize, value: f64) {
    for i in start..start + len {
        m[(i, i)] = value;
    }
}

pub fn add_diag_range(m: &mut DMatrix<f64>, start: usize, len: usize, value: f64) {
    for i in start..start + len {
        m[(i, i)] += value;
    }
}

/// Central-difference Jacobian of `f` at `x`, used by [`JacobianMode::Numeric`]
/// and by [`JacobianMode::Debug`] as the cross-check for the analytical path.
///
/// [`JacobianMode::Numeric`]: crate::measurement::JacobianMode::Numeric
/// [`JacobianMode::Debug`]: crate::measurement::JacobianMode::Debug
pub fn numeric_jacobian(
    f: impl Fn(&DVector<f64>) -> DVector<f64>,
    x: &DVector<f64>,
    step: f64,
) -> DMatrix<f64> {
    let y0 = f(x);
    let m = y0.len();
    let n = x.len();
    let mut jac = DMatrix::<f64>::zeros(m, n);
    for j in 0..n {
        let mut xp = x.clone();
        let mut xm = x.clone();
        xp[j] += step;
        xm[j] -= step;
        let yp = f(&xp);
        let ym = f(&xm);
        let col = (yp - ym) / (2.0 * step);
        jac.view_mut((0, j), (m, 1)).copy_from(&col);
    }
    jac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetrize_fixes_roundoff() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0 + 1e-13, 2.0, 3.0]);
        let s = symmetrize(&m);
        assert!(is_symmetric(&s, 1e-15));
    }

    #[test]
    fn invert_identity() {
        let m = DMatrix::<f64>::identity(3, 3);
        let inv = invert(&m).unwrap();
        assert!((inv - DMatrix::<f64>::identity(3, 3)).norm() < 1e-12);
    }

    #[test]
    fn numeric_jacobian_of_linear_map_is_the_matrix() {
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 3.0]);
        let a2 = a.clone();
        let jac = numeric_jacobian(move |x| &a2 * x, &DVector::from_vec(vec![1.0, 1.0]), 1e-6);
        assert!((jac - a).norm() < 1e-6);
    }
}
