//! Camera and stereo rig calibration from views of a planar target.
//!
//! [`calibrate_camera`] starts from the closed-form intrinsics of Zhang's
//! method, solves one target pose per view and refines intrinsics, distortion
//! and poses jointly with Levenberg-Marquardt. [`calibrate_stereo`] calibrates
//! both cameras, then refines the relative pose with the intrinsics fixed.

mod camera;
mod lm;
mod stereo;
mod zhang;

pub use camera::{calibrate_camera, CameraCalibrationResult};
pub use stereo::{calibrate_stereo, StereoCalibrationResult, StereoView};

use arvis_imgproc::calibration::distortion::PolynomialDistortion;
use arvis_linalg::rotation::{matrix_to_rotation_vector, rotation_vector_to_matrix};
use arvis_linalg::{LinalgError, RigidTransform};
use glam::{DVec2, DVec3};
use nalgebra::DVector;
use thiserror::Error;

use crate::camera::{CameraError, Intrinsics};
use crate::ops::project_point;
use crate::pnp::{PnPError, MIN_CORRESPONDENCES};
use crate::stereo::StereoError;

/// Minimum number of views accepted by the calibration.
pub const MIN_VIEWS: usize = 3;

/// Errors raised by the calibration solvers.
#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    /// Fewer views than [`MIN_VIEWS`].
    #[error("Not enough views: {actual} given, at least {required} required")]
    NotEnoughViews {
        /// Views required.
        required: usize,
        /// Views given.
        actual: usize,
    },

    /// A view has fewer correspondences than a homography needs.
    #[error("View {view} has {actual} correspondences, at least {required} required")]
    TooFewPoints {
        /// Index of the view.
        view: usize,
        /// Correspondences required.
        required: usize,
        /// Correspondences given.
        actual: usize,
    },

    /// The object and image points of a view differ in length.
    #[error("View {view} has {object} object points and {image} image points")]
    MismatchedView {
        /// Index of the view.
        view: usize,
        /// Number of object points.
        object: usize,
        /// Number of image points.
        image: usize,
    },

    /// Only 0, 4 or 5 distortion coefficients are estimated.
    #[error("Unsupported number of distortion coefficients {0}")]
    UnsupportedDistortion(usize),

    /// The views do not determine the parameters.
    #[error("Degenerate calibration data: {0}")]
    Degenerate(&'static str),

    /// Pose estimation of a view failed.
    #[error(transparent)]
    PnP(#[from] PnPError),

    /// The estimated intrinsics are invalid.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// The estimated rig is invalid.
    #[error(transparent)]
    Stereo(#[from] StereoError),

    /// Linear algebra failure.
    #[error(transparent)]
    Linalg(#[from] LinalgError),
}

/// Correspondences between a planar target and one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationView {
    /// Target points in the target frame.
    pub object_points: Vec<DVec3>,
    /// Observed pixel coordinates.
    pub image_points: Vec<DVec2>,
}

impl CalibrationView {
    /// Create a view from matched object and image points.
    pub fn new(object_points: Vec<DVec3>, image_points: Vec<DVec2>) -> Self {
        Self {
            object_points,
            image_points,
        }
    }

    /// Number of correspondences.
    pub fn len(&self) -> usize {
        self.object_points.len()
    }

    /// Whether the view has no correspondences.
    pub fn is_empty(&self) -> bool {
        self.object_points.is_empty()
    }
}

/// Options of the calibration solvers.
#[derive(Debug, Clone)]
pub struct CalibrationParams {
    /// Distortion coefficients estimated: 0, 4 for `k1, k2, p1, p2` or 5 to add `k3`.
    pub num_distortion_coeffs: usize,
    /// Maximum number of Levenberg-Marquardt iterations.
    pub max_iterations: usize,
    /// Relative cost decrease below which the refinement stops.
    pub cost_tolerance: f64,
    /// Initial damping factor.
    pub initial_lambda: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            num_distortion_coeffs: 5,
            max_iterations: 100,
            cost_tolerance: 1e-12,
            initial_lambda: 1e-3,
        }
    }
}

impl CalibrationParams {
    /// Set the number of estimated distortion coefficients.
    pub fn with_distortion_coeffs(mut self, n: usize) -> Self {
        self.num_distortion_coeffs = n;
        self
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n;
        self
    }

    fn check(&self) -> Result<(), CalibrationError> {
        match self.num_distortion_coeffs {
            0 | 4 | 5 => Ok(()),
            n => Err(CalibrationError::UnsupportedDistortion(n)),
        }
    }

    fn lm(&self) -> lm::LmSettings {
        lm::LmSettings {
            max_iterations: self.max_iterations,
            cost_tolerance: self.cost_tolerance,
            initial_lambda: self.initial_lambda,
        }
    }
}

fn check_views<'a>(
    views: impl ExactSizeIterator<Item = (&'a [DVec3], &'a [DVec2])>,
) -> Result<(), CalibrationError> {
    if views.len() < MIN_VIEWS {
        return Err(CalibrationError::NotEnoughViews {
            required: MIN_VIEWS,
            actual: views.len(),
        });
    }
    for (view, (object, image)) in views.enumerate() {
        if object.len() != image.len() {
            return Err(CalibrationError::MismatchedView {
                view,
                object: object.len(),
                image: image.len(),
            });
        }
        if object.len() < MIN_CORRESPONDENCES {
            return Err(CalibrationError::TooFewPoints {
                view,
                required: MIN_CORRESPONDENCES,
                actual: object.len(),
            });
        }
    }
    Ok(())
}

fn push_pose(x: &mut Vec<f64>, pose: &RigidTransform) {
    let r = matrix_to_rotation_vector(&pose.rotation);
    let t = pose.translation;
    x.extend([r.x, r.y, r.z, t.x, t.y, t.z]);
}

fn pose_at(x: &DVector<f64>, offset: usize) -> RigidTransform {
    let rvec = DVec3::new(x[offset], x[offset + 1], x[offset + 2]);
    let t = DVec3::new(x[offset + 3], x[offset + 4], x[offset + 5]);
    RigidTransform::new(rotation_vector_to_matrix(rvec), t)
}

/// Append the pixel residuals of one view, `None` when a point falls behind the camera.
fn push_residuals(
    out: &mut Vec<f64>,
    object: &[DVec3],
    image: &[DVec2],
    pose: &RigidTransform,
    intrinsics: &Intrinsics,
    distortion: Option<&PolynomialDistortion>,
) -> Option<()> {
    for (p, uv) in object.iter().zip(image) {
        let proj = project_point(pose.transform_point(*p), intrinsics, distortion)?;
        out.push(proj.x - uv.x);
        out.push(proj.y - uv.y);
    }
    Some(())
}

/// Root mean square of the per-point pixel error.
fn rms(residuals: &DVector<f64>) -> f64 {
    let num_points = residuals.len() / 2;
    if num_points == 0 {
        return 0.0;
    }
    (residuals.norm_squared() / num_points as f64).sqrt()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_views() {
        let view = CalibrationView::new(vec![DVec3::ZERO; 4], vec![DVec2::ZERO; 4]);
        fn pairs(views: &[CalibrationView]) -> Vec<(&[DVec3], &[DVec2])> {
            views
                .iter()
                .map(|v| (&v.object_points[..], &v.image_points[..]))
                .collect::<Vec<_>>()
        }

        let two = vec![view.clone(); 2];
        assert_eq!(
            check_views(pairs(&two).into_iter()),
            Err(CalibrationError::NotEnoughViews {
                required: 3,
                actual: 2
            })
        );

        let mut views = vec![view.clone(); 3];
        views[1].image_points.pop();
        assert!(matches!(
            check_views(pairs(&views).into_iter()),
            Err(CalibrationError::MismatchedView { view: 1, .. })
        ));

        views[1].object_points.pop();
        assert!(matches!(
            check_views(pairs(&views).into_iter()),
            Err(CalibrationError::TooFewPoints { view: 1, actual: 3, .. })
        ));
    }

    #[test]
    fn test_params_reject_unsupported_distortion() {
        assert!(CalibrationParams::default().check().is_ok());
        assert_eq!(
            CalibrationParams::default().with_distortion_coeffs(3).check(),
            Err(CalibrationError::UnsupportedDistortion(3))
        );
    }

    #[test]
    fn test_pose_packing() {
        let pose = test_utils::poses()[3];
        let mut x = vec![1.0];
        push_pose(&mut x, &pose);
        let x = DVector::from_vec(x);
        assert!(pose_at(&x, 1).abs_diff_eq(&pose, 1e-12));
    }
}
