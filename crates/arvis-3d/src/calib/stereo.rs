use arvis_image::ImageSize;
use arvis_linalg::svd::nearest_rotation;
use arvis_linalg::RigidTransform;
use glam::{DMat3, DVec2, DVec3};
use nalgebra::DVector;

use super::{
    calibrate_camera, check_views, lm, pose_at, push_pose, push_residuals, rms, CalibrationError,
    CalibrationParams, CalibrationView, CameraCalibrationResult,
};
use crate::stereo::StereoRig;

/// A planar target seen by both cameras of a rig at the same time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StereoView {
    /// Target points in the target frame.
    pub object_points: Vec<DVec3>,
    /// Observations in the left image.
    pub left_points: Vec<DVec2>,
    /// Observations in the right image.
    pub right_points: Vec<DVec2>,
}

impl StereoView {
    /// Create a view from target points seen in both images.
    pub fn new(object_points: Vec<DVec3>, left_points: Vec<DVec2>, right_points: Vec<DVec2>) -> Self {
        Self {
            object_points,
            left_points,
            right_points,
        }
    }

    fn left(&self) -> CalibrationView {
        CalibrationView::new(self.object_points.clone(), self.left_points.clone())
    }

    fn right(&self) -> CalibrationView {
        CalibrationView::new(self.object_points.clone(), self.right_points.clone())
    }
}

/// Calibration of a stereo rig, `x_right = R·x_left + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoCalibrationResult {
    /// Calibration of the left camera; its poses are the jointly refined ones.
    pub left: CameraCalibrationResult,
    /// Calibration of the right camera; its poses follow from the left poses
    /// and the relative pose.
    pub right: CameraCalibrationResult,
    /// Rotation from the left to the right camera frame.
    pub rotation: DMat3,
    /// Translation from the left to the right camera frame.
    pub translation: DVec3,
    /// Root mean square reprojection error per point over both cameras, in pixels.
    pub rms: f64,
}

impl StereoCalibrationResult {
    /// The pose of the left camera frame in the right camera frame.
    pub fn right_from_left(&self) -> RigidTransform {
        RigidTransform::new(self.rotation, self.translation)
    }

    /// Build the validated stereo rig.
    pub fn rig(&self) -> Result<StereoRig, CalibrationError> {
        Ok(StereoRig::new(
            self.left.intrinsics,
            self.right.intrinsics,
            self.left.distortion(),
            self.right.distortion(),
            self.rotation,
            self.translation,
        )?)
    }
}

/// Calibrate a stereo rig from synchronized views of a planar target.
///
/// Each camera is calibrated on its own first. The relative pose starts from
/// the average over the views and is refined together with the left target
/// poses on the reprojection error of both images, with the intrinsics fixed.
pub fn calibrate_stereo(
    views: &[StereoView],
    image_size: ImageSize,
    params: &CalibrationParams,
) -> Result<StereoCalibrationResult, CalibrationError> {
    params.check()?;
    check_views(
        views
            .iter()
            .map(|v| (v.object_points.as_slice(), v.left_points.as_slice())),
    )?;
    check_views(
        views
            .iter()
            .map(|v| (v.object_points.as_slice(), v.right_points.as_slice())),
    )?;

    let left_views: Vec<CalibrationView> = views.iter().map(StereoView::left).collect();
    let right_views: Vec<CalibrationView> = views.iter().map(StereoView::right).collect();
    let mut left = calibrate_camera(&left_views, image_size, params)?;
    let mut right = calibrate_camera(&right_views, image_size, params)?;

    let mut rotation_sum = DMat3::ZERO;
    let mut translation_sum = DVec3::ZERO;
    for (l, r) in left.poses.iter().zip(&right.poses) {
        let rel = r.compose(&l.inverse());
        rotation_sum += rel.rotation;
        translation_sum += rel.translation;
    }
    let initial = RigidTransform::new(
        nearest_rotation(&rotation_sum)?,
        translation_sum / views.len() as f64,
    );

    let mut x0 = Vec::with_capacity(6 * (views.len() + 1));
    push_pose(&mut x0, &initial);
    for pose in &left.poses {
        push_pose(&mut x0, pose);
    }

    let (kl, kr) = (left.intrinsics, right.intrinsics);
    let (dl, dr) = (left.distortion(), right.distortion());
    let residuals = |x: &DVector<f64>| {
        let right_from_left = pose_at(x, 0);
        let n: usize = views.iter().map(|v| v.object_points.len()).sum();
        let mut out = Vec::with_capacity(4 * n);
        for (i, view) in views.iter().enumerate() {
            let left_pose = pose_at(x, 6 * (i + 1));
            let right_pose = right_from_left.compose(&left_pose);
            push_residuals(&mut out, &view.object_points, &view.left_points, &left_pose, &kl, dl.as_ref())?;
            push_residuals(&mut out, &view.object_points, &view.right_points, &right_pose, &kr, dr.as_ref())?;
        }
        Some(DVector::from_vec(out))
    };
    let (x, r) = lm::minimize(DVector::from_vec(x0), residuals, &params.lm())?;

    let right_from_left = pose_at(&x, 0);
    left.poses = (0..views.len()).map(|i| pose_at(&x, 6 * (i + 1))).collect();
    right.poses = left.poses.iter().map(|p| right_from_left.compose(p)).collect();

    let result = StereoCalibrationResult {
        left,
        right,
        rotation: right_from_left.rotation,
        translation: right_from_left.translation,
        rms: rms(&r),
    };
    log::debug!(
        "calibrated stereo rig from {} views: baseline {:.4} m, rms {:.4} px",
        views.len(),
        result.translation.length(),
        result.rms
    );
    Ok(result)
}
