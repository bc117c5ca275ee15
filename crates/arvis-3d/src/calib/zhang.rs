//! Closed-form intrinsics from plane homographies.
//!
//! Every view homography `H = K·[r1 r2 t]` gives two linear constraints on the
//! symmetric `B = K⁻ᵀK⁻¹`: `h1ᵀBh2 = 0` and `h1ᵀBh1 = h2ᵀBh2`. A zero skew row
//! `B12 = 0` is added and `K` is read back from `B` (Zhang, 2000).

use arvis_image::ImageSize;
use glam::{DMat3, DVec2, DVec3};
use nalgebra::DMatrix;

use super::{CalibrationError, CalibrationView};
use crate::camera::Intrinsics;
use crate::pnp::ops::{classify_object_points, ObjectGeometry};
use crate::pnp::planar::estimate_homography;
use crate::pnp::NumericTol;

/// Coordinates of coplanar object points in their own plane frame.
fn plane_coordinates(object: &[DVec3], tol: &NumericTol) -> Result<Vec<DVec2>, CalibrationError> {
    match classify_object_points(object, tol)? {
        ObjectGeometry::Planar { origin, basis } => {
            let basis_t = basis.transpose();
            Ok(object.iter().map(|p| (basis_t * (*p - origin)).truncate()).collect())
        }
        ObjectGeometry::General => Err(CalibrationError::Degenerate("calibration target is not planar")),
    }
}

/// Row `v_ij` of the constraint matrix, with `b = [B11, B12, B22, B13, B23, B33]`.
fn constraint(h: &DMat3, i: usize, j: usize) -> [f64; 6] {
    let (hi, hj) = (h.col(i), h.col(j));
    [
        hi.x * hj.x,
        hi.x * hj.y + hi.y * hj.x,
        hi.y * hj.y,
        hi.z * hj.x + hi.x * hj.z,
        hi.z * hj.y + hi.y * hj.z,
        hi.z * hj.z,
    ]
}

/// Estimate zero-skew intrinsics from at least three views of a planar target.
///
/// Image points are first mapped to a frame centered on the image with unit
/// half extent, which keeps the linear system well conditioned.
pub(super) fn initial_intrinsics(
    views: &[CalibrationView],
    size: ImageSize,
    tol: &NumericTol,
) -> Result<Intrinsics, CalibrationError> {
    let center = DVec2::new(size.width as f64, size.height as f64) * 0.5;
    let scale = center.x.max(center.y);
    if scale <= 0.0 {
        return Err(CalibrationError::Degenerate("empty image size"));
    }

    let mut rows: Vec<[f64; 6]> = Vec::with_capacity(2 * views.len() + 1);
    for view in views {
        let plane = plane_coordinates(&view.object_points, tol)?;
        let image: Vec<DVec2> = view.image_points.iter().map(|p| (*p - center) / scale).collect();
        let h = estimate_homography(&plane, &image, tol.eps)?;

        let (v11, v12, v22) = (constraint(&h, 0, 0), constraint(&h, 0, 1), constraint(&h, 1, 1));
        rows.push(v12);
        rows.push(std::array::from_fn(|k| v11[k] - v22[k]));
    }
    rows.push([0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);

    let v = DMatrix::from_fn(rows.len(), 6, |r, c| rows[r][c]);
    let eig = (v.transpose() * &v).symmetric_eigen();
    let mut order: Vec<(f64, usize)> = eig
        .eigenvalues
        .iter()
        .enumerate()
        .map(|(i, e)| (e.abs(), i))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0));
    if order[1].0 <= tol.eps * order[5].0 {
        return Err(CalibrationError::Degenerate("views do not constrain the intrinsics"));
    }
    let b = eig.eigenvectors.column(order[0].1);
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let den = b11 * b22 - b12 * b12;
    if den.abs() <= f64::EPSILON * (b11 * b22).abs() || b11.abs() <= f64::EPSILON {
        return Err(CalibrationError::Degenerate("singular image of the absolute conic"));
    }
    let v0 = (b12 * b13 - b11 * b23) / den;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    let alpha_sq = lambda / b11;
    let beta_sq = lambda * b11 / den;
    if !(alpha_sq > 0.0 && beta_sq > 0.0 && alpha_sq.is_finite() && beta_sq.is_finite()) {
        return Err(CalibrationError::Degenerate("views do not constrain the intrinsics"));
    }
    let u0 = -b13 * alpha_sq / lambda;

    let intrinsics = Intrinsics::new(
        alpha_sq.sqrt() * scale,
        beta_sq.sqrt() * scale,
        u0 * scale + center.x,
        v0 * scale + center.y,
        size,
    )?;
    log::debug!(
        "closed-form intrinsics fx {:.2} fy {:.2} cx {:.2} cy {:.2}",
        intrinsics.fx,
        intrinsics.fy,
        intrinsics.cx,
        intrinsics.cy
    );
    Ok(intrinsics)
}
