//! Levenberg-Marquardt pose refinement for PnP solutions.
//!
//! The pose is updated on the left, `R ← exp(δω)·R` and `t ← t + δt`, and the
//! residuals are pixel reprojection errors with an analytic Jacobian.

use arvis_linalg::rotation::{matrix_to_rotation_vector, skew};
use arvis_linalg::RigidTransform;
use glam::{DMat3, DQuat, DVec2, DVec3};
use nalgebra::{Matrix2x3, Matrix3, Matrix6, Vector6};

use super::{PnPError, PnPResult};
use crate::camera::Intrinsics;

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Clone)]
pub struct LMRefineParams {
    /// Maximum number of LM iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the relative cost change.
    pub cost_tolerance: f64,
    /// Convergence threshold on the gradient norm.
    pub gradient_tolerance: f64,
    /// Initial damping factor (lambda).
    pub initial_lambda: f64,
}

impl Default for LMRefineParams {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            cost_tolerance: 1e-6,
            gradient_tolerance: 1e-6,
            initial_lambda: 1e-3,
        }
    }
}

impl LMRefineParams {
    /// Create default refinement parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iters: usize) -> Self {
        self.max_iterations = max_iters;
        self
    }

    /// Set cost tolerance.
    pub fn with_cost_tolerance(mut self, tol: f64) -> Self {
        self.cost_tolerance = tol;
        self
    }

    /// Set gradient tolerance.
    pub fn with_gradient_tolerance(mut self, tol: f64) -> Self {
        self.gradient_tolerance = tol;
        self
    }

    /// Set initial lambda.
    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.initial_lambda = lambda;
        self
    }
}

const MAX_LAMBDA: f64 = 1e10;

/// Sum of squared pixel residuals. Points behind the camera make the cost infinite.
fn cost(object: &[DVec3], image: &[DVec2], pose: &RigidTransform, k: &Intrinsics) -> f64 {
    object
        .iter()
        .zip(image)
        .map(|(&p, uv)| {
            let pc = pose.transform_point(p);
            if pc.z <= f64::EPSILON {
                return f64::INFINITY;
            }
            let u = k.fx * pc.x / pc.z + k.cx;
            let v = k.fy * pc.y / pc.z + k.cy;
            (u - uv.x).powi(2) + (v - uv.y).powi(2)
        })
        .sum()
}

/// Normal equations `JᵀJ` and `Jᵀr` at the current pose.
fn linearize(
    object: &[DVec3],
    image: &[DVec2],
    pose: &RigidTransform,
    k: &Intrinsics,
) -> (Matrix6<f64>, Vector6<f64>) {
    let mut jtj = Matrix6::<f64>::zeros();
    let mut jtr = Vector6::<f64>::zeros();

    for (&p, uv) in object.iter().zip(image) {
        let rp = pose.rotation * p;
        let pc = rp + pose.translation;
        if pc.z <= f64::EPSILON {
            continue;
        }
        let inv_z = 1.0 / pc.z;
        let inv_z2 = inv_z * inv_z;

        let r = nalgebra::Vector2::new(
            k.fx * pc.x * inv_z + k.cx - uv.x,
            k.fy * pc.y * inv_z + k.cy - uv.y,
        );

        // d(u, v) / d(pc)
        let d_proj = Matrix2x3::new(
            k.fx * inv_z,
            0.0,
            -k.fx * pc.x * inv_z2,
            0.0,
            k.fy * inv_z,
            -k.fy * pc.y * inv_z2,
        );

        // d(pc) / d(δω, δt) = [-[R·p]× | I]
        let s = skew(rp);
        let neg_skew = Matrix3::from_fn(|i, j| -s.col(j)[i]);

        let mut j = nalgebra::Matrix2x6::<f64>::zeros();
        j.fixed_view_mut::<2, 3>(0, 0).copy_from(&(d_proj * neg_skew));
        j.fixed_view_mut::<2, 3>(0, 3).copy_from(&d_proj);

        jtj += j.transpose() * j;
        jtr += j.transpose() * r;
    }
    (jtj, jtr)
}

fn apply_update(pose: &RigidTransform, delta: &Vector6<f64>) -> RigidTransform {
    let omega = DVec3::new(delta[0], delta[1], delta[2]);
    let dt = DVec3::new(delta[3], delta[4], delta[5]);
    let dr = DMat3::from_quat(DQuat::from_scaled_axis(omega));
    RigidTransform::new(dr * pose.rotation, pose.translation + dt)
}

/// Refine a pose with Levenberg-Marquardt on the pixel reprojection error.
///
/// # Arguments
/// * `object` - 3-D points in the object frame.
/// * `image` - Observed pixel coordinates.
/// * `intrinsics` - Camera intrinsics.
/// * `initial` - Initial object-to-camera pose.
/// * `params` - Iteration limits and tolerances.
///
/// # Errors
///
/// Returns [`PnPError::MismatchedArrayLengths`] for inconsistent inputs.
pub fn refine_pose_lm(
    object: &[DVec3],
    image: &[DVec2],
    intrinsics: &Intrinsics,
    initial: &RigidTransform,
    params: &LMRefineParams,
) -> Result<PnPResult, PnPError> {
    if object.len() != image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "object points",
            left_len: object.len(),
            right_name: "image points",
            right_len: image.len(),
        });
    }

    let mut pose = *initial;
    let mut current_cost = cost(object, image, &pose, intrinsics);
    let mut lambda = params.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;

    while iterations < params.max_iterations && current_cost.is_finite() {
        iterations += 1;

        let (jtj, jtr) = linearize(object, image, &pose, intrinsics);
        if jtr.amax() < params.gradient_tolerance {
            converged = true;
            break;
        }

        let mut accepted = false;
        while lambda < MAX_LAMBDA {
            let mut damped = jtj;
            for i in 0..6 {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
            }
            let Some(chol) = damped.cholesky() else {
                lambda *= 10.0;
                continue;
            };
            let delta = -chol.solve(&jtr);
            let candidate = apply_update(&pose, &delta);
            let candidate_cost = cost(object, image, &candidate, intrinsics);

            if candidate_cost < current_cost {
                let rel = (current_cost - candidate_cost) / current_cost.max(f64::MIN_POSITIVE);
                pose = candidate;
                current_cost = candidate_cost;
                lambda = (lambda / 10.0).max(1e-12);
                accepted = true;
                if rel < params.cost_tolerance {
                    converged = true;
                }
                break;
            }
            lambda *= 10.0;
        }

        if !accepted {
            // no descent direction left
            converged = true;
            break;
        }
        if converged {
            break;
        }
    }

    let n = object.len().max(1) as f64;
    let reproj_rmse = (current_cost / n).sqrt();
    log::debug!(
        "lm refinement finished after {iterations} iterations, rmse {reproj_rmse:.3e} px"
    );

    Ok(PnPResult {
        rotation: pose.rotation,
        translation: pose.translation,
        rvec: matrix_to_rotation_vector(&pose.rotation),
        reproj_rmse,
        num_iterations: Some(iterations),
        converged: Some(converged),
    })
}
