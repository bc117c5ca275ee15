#![allow(clippy::op_ref)]

use arvis_linalg::svd::svd3;
use glam::{DMat3, DVec2, DVec3};
use nalgebra::{DMatrix, DVector, Vector4};

use super::{NumericTol, PnPError};
use crate::ops::compute_centroid;

/// Shape of an object point set, as seen by the solvers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ObjectGeometry {
    /// The points lie on a plane through `origin` spanned by the first two
    /// columns of `basis`; the third column is the plane normal.
    Planar { origin: DVec3, basis: DMat3 },
    /// The points span all three dimensions.
    General,
}

/// Classify the object points from the principal spreads of their scatter matrix.
///
/// Fails with [`PnPError::DegenerateGeometry`] for coincident or collinear points.
pub(crate) fn classify_object_points(
    points: &[DVec3],
    tol: &NumericTol,
) -> Result<ObjectGeometry, PnPError> {
    let c = compute_centroid(points);
    let mut cov = DMat3::ZERO;
    for p in points {
        let d = *p - c;
        cov += DMat3::from_cols(d * d.x, d * d.y, d * d.z);
    }
    cov *= 1.0 / points.len() as f64;

    let svd = svd3(&cov)?;
    // singular values of the scatter matrix are variances
    let s = svd.s();
    let spread = DVec3::new(s.x.max(0.0).sqrt(), s.y.max(0.0).sqrt(), s.z.max(0.0).sqrt());

    if spread.x <= f64::EPSILON {
        return Err(PnPError::DegenerateGeometry("coincident object points"));
    }
    if spread.y <= tol.collinearity * spread.x {
        return Err(PnPError::DegenerateGeometry("collinear object points"));
    }
    if spread.z <= tol.planarity * spread.x {
        let v = svd.v();
        let e1 = v.x_axis;
        let e2 = v.y_axis;
        return Ok(ObjectGeometry::Planar {
            origin: c,
            basis: DMat3::from_cols(e1, e2, e1.cross(e2)),
        });
    }
    Ok(ObjectGeometry::General)
}

/// Fails with [`PnPError::DegenerateGeometry`] when the 2D points are
/// coincident or lie on one line.
pub(crate) fn check_image_spread(points: &[DVec2], tol: &NumericTol) -> Result<(), PnPError> {
    let n = points.len() as f64;
    let c = points.iter().copied().sum::<DVec2>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let d = *p - c;
        sxx += d.x * d.x;
        sxy += d.x * d.y;
        syy += d.y * d.y;
    }
    let (sxx, sxy, syy) = (sxx / n, sxy / n, syy / n);

    // eigenvalues of the 2×2 scatter matrix
    let half_trace = 0.5 * (sxx + syy);
    let root = (0.25 * (sxx - syy) * (sxx - syy) + sxy * sxy).sqrt();
    let major = (half_trace + root).max(0.0).sqrt();
    let minor = (half_trace - root).max(0.0).sqrt();

    if major <= f64::EPSILON {
        return Err(PnPError::DegenerateGeometry("coincident image points"));
    }
    if minor <= tol.collinearity * major {
        return Err(PnPError::DegenerateGeometry("collinear image points"));
    }
    Ok(())
}

/// Normalize 2D points so that their centroid is the origin and their mean
/// distance to it is √2.
///
/// Returns the normalized points and the similarity `T` with `p̂ = T·p`.
pub(crate) fn normalize_points_2d(points: &[DVec2]) -> Result<(Vec<DVec2>, DMat3), PnPError> {
    let n = points.len() as f64;
    let c = points.iter().copied().sum::<DVec2>() / n;
    let mean_dist = points.iter().map(|p| p.distance(c)).sum::<f64>() / n;
    if mean_dist <= f64::EPSILON {
        return Err(PnPError::DegenerateGeometry("coincident points"));
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = DMat3::from_cols(
        DVec3::new(s, 0.0, 0.0),
        DVec3::new(0.0, s, 0.0),
        DVec3::new(-s * c.x, -s * c.y, 1.0),
    );
    Ok((points.iter().map(|p| (*p - c) * s).collect(), t))
}

/// Pixel coordinates to normalized camera coordinates.
pub(crate) fn pixels_to_normalized(image: &[DVec2], k: &crate::camera::Intrinsics) -> Vec<DVec2> {
    image
        .iter()
        .map(|uv| DVec2::new((uv.x - k.cx) / k.fx, (uv.y - k.cy) / k.fy))
        .collect()
}

/// Gauss-Newton refinement of the EPnP betas against the control point distances.
pub(crate) fn gauss_newton(beta_init: [f64; 4], null4: &DMatrix<f64>, rho: &[f64; 6]) -> [f64; 4] {
    const PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

    let mut bet = Vector4::from_column_slice(&beta_init);

    for _ in 0..6 {
        let mut f_vec = DVector::<f64>::zeros(6);
        let mut j_mat = DMatrix::<f64>::zeros(6, 4);

        for (r, (i, j)) in PAIRS.iter().enumerate() {
            let block_i = null4.view((*i * 3, 0), (3, 4));
            let block_j = null4.view((*j * 3, 0), (3, 4));

            let vi = &block_i * &bet;
            let vj = &block_j * &bet;
            let diff = DVec3::new(vi[0] - vj[0], vi[1] - vj[1], vi[2] - vj[2]);

            f_vec[r] = diff.dot(diff) - rho[r];

            for k in 0..4 {
                let ci = block_i.column(k);
                let cj = block_j.column(k);
                let col_diff = DVec3::new(ci[0] - cj[0], ci[1] - cj[1], ci[2] - cj[2]);
                j_mat[(r, k)] = 2.0 * col_diff.dot(diff);
            }
        }

        let jt = j_mat.transpose();
        let a = &jt * &j_mat + DMatrix::<f64>::identity(4, 4) * 1e-12;
        let b = &jt * f_vec;

        match a.lu().solve(&b) {
            Some(delta) => {
                let norm_val = delta.norm();
                bet -= &delta;
                if norm_val < 1e-12 {
                    break;
                }
            }
            None => break,
        }
    }

    [bet[0], bet[1], bet[2], bet[3]]
}
