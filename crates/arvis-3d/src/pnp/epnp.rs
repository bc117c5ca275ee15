//! Efficient Perspective-n-Point (EPnP) solver
//! Paper: [Lepetit et al., IJCV 2009](https://www.tugraz.at/fileadmin/user_upload/Institute/ICG/Images/team_lepetit/publications/lepetit_ijcv08.pdf)
//! Reference: [OpenCV EPnP implementation](https://github.com/opencv/opencv/blob/4.x/modules/calib3d/src/epnp.cpp)

use arvis_linalg::svd::svd3;
use arvis_linalg::{fit_rigid, RigidTransform};
use glam::{DMat3, DVec2, DVec3};
use nalgebra::{DMatrix, DVector, Vector4};

use super::ops::{check_image_spread, gauss_newton};
use super::{check_correspondences, finalize, PnPError, PnPParams, PnPResult, PnPSolver};
use crate::camera::Intrinsics;
use crate::ops::{compute_centroid, reprojection_rmse};

/// Marker type representing the Efficient PnP algorithm.
pub struct EPnP;

impl PnPSolver for EPnP {
    type Param = PnPParams;

    fn solve(
        object: &[DVec3],
        image: &[DVec2],
        intrinsics: &Intrinsics,
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        solve_epnp(object, image, intrinsics, params)
    }
}

/// Solve Perspective-n-Point (EPnP).
///
/// # Arguments
/// * `object` – 3-D coordinates in the object frame, `N≥4`.
/// * `image` – Corresponding pixel coordinates.
/// * `intrinsics` – Camera intrinsics.
///
/// # Returns
/// The object-to-camera pose with its Rodrigues vector and reprojection RMSE.
pub fn solve_epnp(
    object: &[DVec3],
    image: &[DVec2],
    intrinsics: &Intrinsics,
    params: &PnPParams,
) -> Result<PnPResult, PnPError> {
    check_correspondences(object, image)?;
    check_image_spread(image, &params.tol)?;
    let n = object.len();

    let cw = select_control_points(object)?;
    let alphas = compute_barycentric(object, &cw, params.tol.eps)?;

    let m_rows = build_m(&alphas, image, intrinsics);
    let m_flat: Vec<f64> = m_rows.iter().flat_map(|row| row.iter()).copied().collect();
    let m_mat = DMatrix::<f64>::from_row_slice(2 * n, 12, &m_flat);

    // null space of M via the eigen decomposition of MᵀM (12×12)
    let mtm = m_mat.transpose() * &m_mat;
    let eig = mtm.symmetric_eigen();

    let mut value_index_pairs: Vec<(f64, usize)> = eig
        .eigenvalues
        .iter()
        .copied()
        .enumerate()
        .map(|(index, value)| (value.abs(), index))
        .collect();
    value_index_pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    // column k belongs to beta k, column 0 has the smallest eigenvalue
    let null4 = DMatrix::from_columns(&[
        eig.eigenvectors.column(value_index_pairs[0].1),
        eig.eigenvectors.column(value_index_pairs[1].1),
        eig.eigenvectors.column(value_index_pairs[2].1),
        eig.eigenvectors.column(value_index_pairs[3].1),
    ]);

    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(&cw);
    let rho_vec = DVector::<f64>::from_column_slice(&rho);

    let betas: Vec<[f64; 4]> = [
        estimate_beta([0, 1, 3, 6], &l, &rho_vec, params.tol.svd),
        estimate_beta([0, 1, 2], &l, &rho_vec, params.tol.svd),
        estimate_beta([0, 1, 2, 3, 4], &l, &rho_vec, params.tol.svd),
    ]
    .into_iter()
    .flatten()
    .map(|b| gauss_newton(b, &null4, &rho))
    .collect();

    let mut best: Option<(f64, RigidTransform)> = None;
    for bet in &betas {
        let Some(pose) = pose_from_betas(bet, &null4, &alphas, object)? else {
            continue;
        };
        let err = reprojection_rmse(object, image, &pose, intrinsics);
        log::trace!("epnp candidate with rmse {err:.3e} px");
        if best.as_ref().map_or(err.is_finite(), |(e, _)| err < *e) {
            best = Some((err, pose));
        }
    }

    let Some((_, pose)) = best else {
        return Err(PnPError::DegenerateGeometry("no EPnP candidate in front of the camera"));
    };

    finalize(object, image, intrinsics, pose, params)
}

/// Compute the pose from a set of betas using the null-space vectors.
///
/// Returns `None` when the betas collapse the control points.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &DMatrix<f64>,
    alphas: &[[f64; 4]],
    object: &[DVec3],
) -> Result<Option<RigidTransform>, PnPError> {
    let beta_vec = Vector4::from_column_slice(betas);
    let cc_flat = null4 * beta_vec;

    let mut cc = [DVec3::ZERO; 4];
    for (i, c) in cc.iter_mut().enumerate() {
        *c = DVec3::new(cc_flat[3 * i], cc_flat[3 * i + 1], cc_flat[3 * i + 2]);
    }

    let mut pcs: Vec<DVec3> = alphas
        .iter()
        .map(|a| cc[0] * a[0] + cc[1] * a[1] + cc[2] * a[2] + cc[3] * a[3])
        .collect();

    if !pcs.iter().all(|p| p.is_finite()) || pcs.iter().all(|p| p.length_squared() == 0.0) {
        return Ok(None);
    }

    if pcs[0].z < 0.0 {
        for p in &mut pcs {
            *p = -*p;
        }
    }

    Ok(Some(fit_rigid(object, &pcs)?))
}

fn select_control_points(object: &[DVec3]) -> Result<[DVec3; 4], PnPError> {
    let n = object.len() as f64;
    let c = compute_centroid(object);

    let mut cov = DMat3::ZERO;
    for p in object {
        let diff = *p - c;
        cov += DMat3::from_cols(diff * diff.x, diff * diff.y, diff * diff.z);
    }
    cov *= 1.0 / n;

    // singular values come sorted in descending order
    let svd = svd3(&cov)?;
    let s = svd.s();
    let v = svd.v();

    Ok([
        c,
        c + v.x_axis * s.x.max(0.0).sqrt(),
        c + v.y_axis * s.y.max(0.0).sqrt(),
        c + v.z_axis * s.z.max(0.0).sqrt(),
    ])
}

/// Barycentric coordinates of the object points with respect to the control points.
///
/// For each point the weights `[a0, a1, a2, a3]` satisfy `a0 + a1 + a2 + a3 = 1`
/// and `p = Σ a_j·c_j`. A flat control tetrahedron (`|det(B)| <= eps`) falls
/// back to the Moore–Penrose pseudo-inverse.
fn compute_barycentric(
    object: &[DVec3],
    cw: &[DVec3; 4],
    eps: f64,
) -> Result<Vec<[f64; 4]>, PnPError> {
    let b = DMat3::from_cols(cw[1] - cw[0], cw[2] - cw[0], cw[3] - cw[0]);

    let b_inv = if b.determinant().abs() > eps {
        b.inverse()
    } else {
        let svd = svd3(&b)?;
        let s = svd.s();
        let inv = |x: f64| if x.abs() > eps { 1.0 / x } else { 0.0 };
        let sigma_inv = DMat3::from_diagonal(DVec3::new(inv(s.x), inv(s.y), inv(s.z)));
        *svd.v() * sigma_inv * svd.u().transpose()
    };

    Ok(object
        .iter()
        .map(|&p| {
            let lamb = b_inv * (p - cw[0]);
            [1.0 - (lamb.x + lamb.y + lamb.z), lamb.x, lamb.y, lamb.z]
        })
        .collect())
}

/// Construct the 2N×12 design matrix `M`, two rows per correspondence.
fn build_m(alphas: &[[f64; 4]], image: &[DVec2], k: &Intrinsics) -> Vec<[f64; 12]> {
    let mut m = vec![[0.0f64; 12]; 2 * alphas.len()];

    for (i, (a, uv)) in alphas.iter().zip(image).enumerate() {
        let row_x = 2 * i;
        let row_y = row_x + 1;
        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[row_x][base] = alpha * k.fx;
            m[row_x][base + 2] = alpha * (k.cx - uv.x);
            m[row_y][base + 1] = alpha * k.fy;
            m[row_y][base + 2] = alpha * (k.cy - uv.y);
        }
    }
    m
}

const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Build the 6×10 matrix **L** relating the products of betas to the
/// squared control point distances.
///
/// Column order: `b00, b01, b11, b02, b12, b22, b03, b13, b23, b33`.
fn build_l6x10(null4: &DMatrix<f64>) -> [[f64; 10]; 6] {
    let mut l = [[0.0f64; 10]; 6];

    for (row, &(a, b)) in l.iter_mut().zip(CP_PAIRS.iter()) {
        let mut d = [DVec3::ZERO; 4];
        for (k, dk) in d.iter_mut().enumerate() {
            let col = null4.column(k);
            *dk = DVec3::new(
                col[3 * a] - col[3 * b],
                col[3 * a + 1] - col[3 * b + 1],
                col[3 * a + 2] - col[3 * b + 2],
            );
        }

        *row = [
            d[0].dot(d[0]),
            2.0 * d[0].dot(d[1]),
            d[1].dot(d[1]),
            2.0 * d[0].dot(d[2]),
            2.0 * d[1].dot(d[2]),
            d[2].dot(d[2]),
            2.0 * d[0].dot(d[3]),
            2.0 * d[1].dot(d[3]),
            2.0 * d[2].dot(d[3]),
            d[3].dot(d[3]),
        ];
    }
    l
}

/// Extracts a 6×k `DMatrix` by picking the specified columns of `L`.
fn l_submatrix(l: &[[f64; 10]; 6], cols: &[usize]) -> DMatrix<f64> {
    let data: Vec<f64> = cols
        .iter()
        .flat_map(|&c| (0..6).map(move |r| l[r][c]))
        .collect();
    DMatrix::<f64>::from_column_slice(6, cols.len(), &data)
}

/// Initial betas from a least-squares solve on a column subset of `L`.
///
/// Returns `None` if the solve fails or the leading beta vanishes.
fn estimate_beta<const K: usize>(
    cols: [usize; K],
    l: &[[f64; 10]; 6],
    rho: &DVector<f64>,
    tol_svd: f64,
) -> Option<[f64; 4]> {
    let l_sub = l_submatrix(l, &cols);
    let sol = l_sub.svd(true, true).solve(rho, tol_svd).ok()?;
    let x = sol.column(0);

    let mut beta = [0.0; 4];
    match K {
        // b00, b01, b02, b03
        4 => {
            let s = x[0].abs().sqrt();
            if s <= f64::EPSILON {
                return None;
            }
            let sign = if x[0] < 0.0 { -1.0 } else { 1.0 };
            beta = [s, sign * x[1] / s, sign * x[2] / s, sign * x[3] / s];
        }
        // b00, b01, b11
        3 => {
            if x[0] < 0.0 {
                beta[0] = (-x[0]).sqrt();
                beta[1] = if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 };
            } else {
                beta[0] = x[0].sqrt();
                beta[1] = if x[2] > 0.0 { x[2].sqrt() } else { 0.0 };
            }
            if x[1] < 0.0 {
                beta[0] = -beta[0];
            }
        }
        // b00, b01, b11, b02, b12
        5 => {
            if x[0] < 0.0 {
                beta[0] = (-x[0]).sqrt();
                beta[1] = if x[2] < 0.0 { (-x[2]).sqrt() } else { 0.0 };
            } else {
                beta[0] = x[0].sqrt();
                beta[1] = if x[2] > 0.0 { x[2].sqrt() } else { 0.0 };
            }
            if x[1] < 0.0 {
                beta[0] = -beta[0];
            }
            if beta[0].abs() <= f64::EPSILON {
                return None;
            }
            beta[2] = x[3] / beta[0];
        }
        _ => return None,
    }
    Some(beta)
}

/// The six squared distances between the 4 control points.
fn rho_ctrlpts(cw: &[DVec3; 4]) -> [f64; 6] {
    CP_PAIRS.map(|(i, j)| cw[i].distance_squared(cw[j]))
}
