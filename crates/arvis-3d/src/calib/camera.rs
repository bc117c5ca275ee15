use arvis_image::ImageSize;
use arvis_imgproc::calibration::distortion::PolynomialDistortion;
use arvis_linalg::RigidTransform;
use nalgebra::DVector;

use super::{
    check_views, lm, pose_at, push_pose, push_residuals, rms, zhang, CalibrationError,
    CalibrationParams, CalibrationView,
};
use crate::camera::Intrinsics;
use crate::pnp::planar::solve_planar;
use crate::pnp::PnPParams;

const NUM_INTRINSICS: usize = 4;

/// Intrinsic calibration of one camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraCalibrationResult {
    /// Estimated pinhole intrinsics.
    pub intrinsics: Intrinsics,
    /// Distortion coefficients `k1, k2, p1, p2[, k3]`, empty when not estimated.
    pub dist_coeffs: Vec<f64>,
    /// Pose of the target in the camera frame, one per view.
    pub poses: Vec<RigidTransform>,
    /// Root mean square reprojection error per point, in pixels.
    pub rms: f64,
}

impl CameraCalibrationResult {
    /// The distortion model, `None` when not estimated or all zero.
    pub fn distortion(&self) -> Option<PolynomialDistortion> {
        PolynomialDistortion::from_coeffs(&self.dist_coeffs).filter(|d| !d.is_identity())
    }
}

fn intrinsics_at(x: &DVector<f64>, size: ImageSize) -> Intrinsics {
    Intrinsics {
        fx: x[0],
        fy: x[1],
        cx: x[2],
        cy: x[3],
        width: size.width,
        height: size.height,
    }
}

fn residuals(
    x: &DVector<f64>,
    views: &[CalibrationView],
    size: ImageSize,
    num_dist: usize,
) -> Option<DVector<f64>> {
    let k = intrinsics_at(x, size);
    let distortion = PolynomialDistortion::from_coeffs(&x.as_slice()[NUM_INTRINSICS..NUM_INTRINSICS + num_dist]);
    let pose_offset = NUM_INTRINSICS + num_dist;

    let n: usize = views.iter().map(CalibrationView::len).sum();
    let mut out = Vec::with_capacity(2 * n);
    for (i, view) in views.iter().enumerate() {
        let pose = pose_at(x, pose_offset + 6 * i);
        push_residuals(
            &mut out,
            &view.object_points,
            &view.image_points,
            &pose,
            &k,
            distortion.as_ref(),
        )?;
    }
    Some(DVector::from_vec(out))
}

/// Calibrate a camera from views of a planar target.
///
/// # Arguments
///
/// * `views` - At least [`super::MIN_VIEWS`] views, each with at least four
///   coplanar object points.
/// * `image_size` - Size of the calibrated images.
/// * `params` - Distortion model and refinement settings.
///
/// # Errors
///
/// Fails when the views are too few, inconsistent or all parallel to each
/// other, or when the refinement ends on invalid intrinsics.
pub fn calibrate_camera(
    views: &[CalibrationView],
    image_size: ImageSize,
    params: &CalibrationParams,
) -> Result<CameraCalibrationResult, CalibrationError> {
    params.check()?;
    check_views(
        views
            .iter()
            .map(|v| (v.object_points.as_slice(), v.image_points.as_slice())),
    )?;

    let pnp = PnPParams::default();
    let initial = zhang::initial_intrinsics(views, image_size, &pnp.tol)?;

    let num_dist = params.num_distortion_coeffs;
    let mut x0 = Vec::with_capacity(NUM_INTRINSICS + num_dist + 6 * views.len());
    x0.extend([initial.fx, initial.fy, initial.cx, initial.cy]);
    x0.extend(std::iter::repeat(0.0).take(num_dist));
    for view in views {
        let pose = solve_planar(&view.object_points, &view.image_points, &initial, &pnp)?;
        push_pose(&mut x0, &pose.camera_from_object());
    }

    let (x, r) = lm::minimize(
        DVector::from_vec(x0),
        |x| residuals(x, views, image_size, num_dist),
        &params.lm(),
    )?;

    let intrinsics = intrinsics_at(&x, image_size);
    intrinsics.validate()?;
    let pose_offset = NUM_INTRINSICS + num_dist;
    let result = CameraCalibrationResult {
        intrinsics,
        dist_coeffs: x.as_slice()[NUM_INTRINSICS..pose_offset].to_vec(),
        poses: (0..views.len()).map(|i| pose_at(&x, pose_offset + 6 * i)).collect(),
        rms: rms(&r),
    };
    log::debug!(
        "calibrated camera from {} views: fx {:.2} fy {:.2} cx {:.2} cy {:.2}, rms {:.4} px",
        views.len(),
        intrinsics.fx,
        intrinsics.fy,
        intrinsics.cx,
        intrinsics.cy,
        result.rms
    );
    Ok(result)
}
