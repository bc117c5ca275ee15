//! Singular Value Decomposition (SVD) of 3×3 matrices.
//!
//! For any matrix A ∈ ℝ³ˣ³, the SVD decomposes it into three matrices:
//!
//! ```text
//! A = U Σ Vᵀ
//! ```
//!
//! where:
//! * U ∈ ℝ³ˣ³ is an orthogonal matrix (left singular vectors)
//! * Σ ∈ ℝ³ˣ³ is a diagonal matrix of singular values (σ₁ ≥ σ₂ ≥ σ₃ ≥ 0)
//! * V ∈ ℝ³ˣ³ is an orthogonal matrix (right singular vectors)
//!
//! The decomposition is delegated to `nalgebra`; this module converts to and
//! from the `glam` types used across the workspace and guarantees the sorted
//! order of the singular values.
//!
//! # Example
//!
//! ```
//! use glam::{DMat3, DVec3};
//! use arvis_linalg::svd::svd3;
//!
//! let matrix = DMat3::from_diagonal(DVec3::new(1.0, 2.0, 3.0));
//! let svd = svd3(&matrix).unwrap();
//! assert!((svd.s().x - 3.0).abs() < 1e-12);
//! ```

use glam::{DMat3, DVec3};
use nalgebra::Matrix3;

use crate::LinalgError;

/// Convergence threshold handed to the iterative solver.
const SVD3_EPSILON: f64 = f64::EPSILON;

#[derive(Debug, Clone, Copy)]
/// Helper struct to store the factors of a 3x3 SVD.
pub struct SVD3Set {
    /// The matrix of left singular vectors.
    u: DMat3,

    /// The singular values in descending order.
    s: DVec3,

    /// The matrix of right singular vectors.
    v: DMat3,
}

impl SVD3Set {
    /// Get the left singular vectors matrix.
    #[inline]
    pub fn u(&self) -> &DMat3 {
        &self.u
    }

    /// Get the singular values, sorted in descending order.
    #[inline]
    pub fn s(&self) -> &DVec3 {
        &self.s
    }

    /// Get the diagonal matrix of singular values.
    #[inline]
    pub fn s_mat(&self) -> DMat3 {
        DMat3::from_diagonal(self.s)
    }

    /// Get the right singular vectors matrix.
    #[inline]
    pub fn v(&self) -> &DMat3 {
        &self.v
    }
}

/// Convert a glam matrix into its nalgebra counterpart.
pub fn to_nalgebra(m: &DMat3) -> Matrix3<f64> {
    // both libraries store column-major
    Matrix3::from_column_slice(&m.to_cols_array())
}

/// Convert a nalgebra matrix into its glam counterpart.
pub fn from_nalgebra(m: &Matrix3<f64>) -> DMat3 {
    DMat3::from_cols_slice(m.as_slice())
}

/// Compute the singular value decomposition of a 3x3 matrix.
///
/// # Arguments
///
/// * `a` - The matrix to decompose.
///
/// # Returns
///
/// The factors `U`, `Σ`, `V` with `a = U·diag(Σ)·Vᵀ` and `Σ` sorted in
/// descending order.
///
/// # Errors
///
/// Returns [`LinalgError::NonFiniteInput`] if `a` contains NaN or infinite
/// entries, or [`LinalgError::SvdNotConverged`] if the solver fails.
pub fn svd3(a: &DMat3) -> Result<SVD3Set, LinalgError> {
    if !a.is_finite() {
        return Err(LinalgError::NonFiniteInput);
    }

    let svd = to_nalgebra(a)
        .try_svd(true, true, SVD3_EPSILON, 0)
        .ok_or(LinalgError::SvdNotConverged)?;

    let u = svd.u.ok_or(LinalgError::MissingSingularVectors("left"))?;
    let v_t = svd
        .v_t
        .ok_or(LinalgError::MissingSingularVectors("right"))?;

    let mut u = from_nalgebra(&u);
    let mut v = from_nalgebra(&v_t.transpose());
    let mut s = [
        svd.singular_values[0],
        svd.singular_values[1],
        svd.singular_values[2],
    ];

    // enforce descending order, swapping the matching singular vectors
    for i in 0..2 {
        for j in 0..(2 - i) {
            if s[j] < s[j + 1] {
                s.swap(j, j + 1);
                swap_cols(&mut u, j, j + 1);
                swap_cols(&mut v, j, j + 1);
            }
        }
    }

    Ok(SVD3Set {
        u,
        s: DVec3::from_array(s),
        v,
    })
}

fn swap_cols(m: &mut DMat3, a: usize, b: usize) {
    let col_a = m.col(a);
    let col_b = m.col(b);
    *m.col_mut(a) = col_b;
    *m.col_mut(b) = col_a;
}

/// Project a 3x3 matrix onto the closest rotation matrix in the Frobenius sense.
///
/// The reflection case is corrected by flipping the singular vector of the
/// smallest singular value, so the result always has determinant +1.
pub fn nearest_rotation(m: &DMat3) -> Result<DMat3, LinalgError> {
    let svd = svd3(m)?;
    let u = *svd.u();
    let v = *svd.v();
    let d = (u * v.transpose()).determinant();
    if d < 0.0 {
        let correction = DMat3::from_diagonal(DVec3::new(1.0, 1.0, -1.0));
        Ok(u * correction * v.transpose())
    } else {
        Ok(u * v.transpose())
    }
}
