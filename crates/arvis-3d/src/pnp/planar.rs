//! Pose of a planar target from the homography between the target plane and
//! the normalized image plane.
//!
//! With object points on the plane `z = 0` of a local frame, the projection
//! reduces to `λ·m = [r1 r2 t]·(x, y, 1)ᵀ`, so the homography estimated by DLT
//! carries the first two rotation columns and the translation up to scale.

use arvis_linalg::svd::{nearest_rotation, svd3};
use arvis_linalg::RigidTransform;
use glam::{DMat3, DVec2, DVec3};
use nalgebra::DMatrix;

use super::ops::{
    check_image_spread, classify_object_points, normalize_points_2d, pixels_to_normalized,
    ObjectGeometry,
};
use super::{check_correspondences, finalize, PnPError, PnPParams, PnPResult, PnPSolver};
use crate::camera::Intrinsics;

/// Marker type representing the planar homography solver.
pub struct PlanarPnP;

impl PnPSolver for PlanarPnP {
    type Param = PnPParams;

    fn solve(
        object: &[DVec3],
        image: &[DVec2],
        intrinsics: &Intrinsics,
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        solve_planar(object, image, intrinsics, params)
    }
}

/// Solve the pose of coplanar object points.
///
/// # Errors
///
/// * [`PnPError::InsufficientCorrespondences`] with fewer than 4 points.
/// * [`PnPError::DegenerateGeometry`] when the object points are collinear or
///   not coplanar, when the image points are collinear, or when the
///   homography is not uniquely determined.
pub fn solve_planar(
    object: &[DVec3],
    image: &[DVec2],
    intrinsics: &Intrinsics,
    params: &PnPParams,
) -> Result<PnPResult, PnPError> {
    check_correspondences(object, image)?;
    check_image_spread(image, &params.tol)?;

    let (origin, basis) = match classify_object_points(object, &params.tol)? {
        ObjectGeometry::Planar { origin, basis } => (origin, basis),
        ObjectGeometry::General => {
            return Err(PnPError::DegenerateGeometry("object points are not coplanar"))
        }
    };

    // coordinates of the object points in the plane frame
    let basis_t = basis.transpose();
    let plane: Vec<DVec2> = object
        .iter()
        .map(|p| (basis_t * (*p - origin)).truncate())
        .collect();

    let normalized = pixels_to_normalized(image, intrinsics);
    let h = estimate_homography(&plane, &normalized, params.tol.eps)?;

    // a rank deficient homography maps the plane onto a line
    let s = *svd3(&h)?.s();
    if s.z <= params.tol.collinearity * s.x {
        return Err(PnPError::DegenerateGeometry("rank deficient homography"));
    }

    let plane_pose = decompose_homography(&h)?;

    // camera_from_object = camera_from_plane ∘ plane_from_object
    let plane_from_object = RigidTransform::new(basis_t, -(basis_t * origin));
    let pose = plane_pose.compose(&plane_from_object);

    finalize(object, image, intrinsics, pose, params)
}

/// Estimate the homography `H` with `dst ~ H·src` by normalized DLT.
pub(crate) fn estimate_homography(src: &[DVec2], dst: &[DVec2], eps: f64) -> Result<DMat3, PnPError> {
    let (src_n, t_src) = normalize_points_2d(src)?;
    let (dst_n, t_dst) = normalize_points_2d(dst)?;

    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (s, d)) in src_n.iter().zip(dst_n.iter()).enumerate() {
        let (x, y) = (s.x, s.y);
        let (u, v) = (d.x, d.y);
        let rx = 2 * i;
        let ry = rx + 1;
        a[(rx, 0)] = x;
        a[(rx, 1)] = y;
        a[(rx, 2)] = 1.0;
        a[(rx, 6)] = -u * x;
        a[(rx, 7)] = -u * y;
        a[(rx, 8)] = -u;
        a[(ry, 3)] = x;
        a[(ry, 4)] = y;
        a[(ry, 5)] = 1.0;
        a[(ry, 6)] = -v * x;
        a[(ry, 7)] = -v * y;
        a[(ry, 8)] = -v;
    }

    // null space of A from the eigen decomposition of AᵀA (9×9)
    let ata = a.transpose() * &a;
    let eig = ata.symmetric_eigen();

    let mut order: Vec<(f64, usize)> = eig
        .eigenvalues
        .iter()
        .enumerate()
        .map(|(i, v)| (v.abs(), i))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0));

    let largest = order[8].0;
    if order[1].0 <= eps * largest {
        return Err(PnPError::DegenerateGeometry(
            "homography is not uniquely determined",
        ));
    }

    let h = eig.eigenvectors.column(order[0].1);
    let h_n = DMat3::from_cols(
        DVec3::new(h[0], h[3], h[6]),
        DVec3::new(h[1], h[4], h[7]),
        DVec3::new(h[2], h[5], h[8]),
    );

    Ok(t_dst.inverse() * h_n * t_src)
}

/// Split a plane-to-normalized-image homography into the pose of the plane frame.
fn decompose_homography(h: &DMat3) -> Result<RigidTransform, PnPError> {
    let h1 = h.x_axis;
    let h2 = h.y_axis;
    let h3 = h.z_axis;

    let norm = 0.5 * (h1.length() + h2.length());
    if norm <= f64::EPSILON {
        return Err(PnPError::DegenerateGeometry("degenerate homography"));
    }

    // the target must lie in front of the camera
    let scale = if h3.z < 0.0 { -1.0 / norm } else { 1.0 / norm };

    let r1 = h1 * scale;
    let r2 = h2 * scale;
    let t = h3 * scale;

    let rotation = nearest_rotation(&DMat3::from_cols(r1, r2, r1.cross(r2)))?;
    Ok(RigidTransform::new(rotation, t))
}
