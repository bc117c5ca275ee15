//! Stereo rectification, disparity and dense reconstruction.
//!
//! The pipeline for one frame pair is: [`rectify`] both images with the cached
//! [`RectificationMaps`], run a [`StereoCorrelator`] through
//! [`compute_disparity`], [`reproject_to_3d`] with `Q` and finally
//! [`assemble_point_cloud`]. [`StereoReconstructor`] bundles these steps.

mod disparity;
mod reconstructor;
mod rectify;
mod reproject;

pub use disparity::{compute_disparity, BlockMatcher, DisparityMap, StereoCorrelator, DISPARITY_SCALE};
pub use reconstructor::{StereoFrame, StereoReconstructor};
pub use rectify::{compute_rectification_maps, rectify, RectificationMaps};
pub use reproject::{assemble_point_cloud, reproject_to_3d, reprojection_matrix};

use arvis_image::{ImageError, ImageSize};
use arvis_imgproc::calibration::distortion::PolynomialDistortion;
use glam::{DMat3, DVec3};
use thiserror::Error;

use crate::camera::{CameraError, Intrinsics};

/// Errors of the stereo pipeline.
#[derive(Debug, Error, PartialEq)]
pub enum StereoError {
    /// The two cameras of a rig do not share the image size.
    #[error("Stereo cameras disagree on image size: left {0}, right {1}")]
    ImageSizeMismatch(ImageSize, ImageSize),

    /// The baseline between the cameras vanishes.
    #[error("Degenerate stereo baseline with length {0}")]
    DegenerateBaseline(f64),

    /// The rectified focal length must be finite and positive.
    #[error("Invalid rectified focal length {0}")]
    InvalidFocalLength(f64),

    /// The relative rotation is not a proper rotation.
    #[error("The relative rotation of the rig is not orthonormal")]
    InvalidRotation,

    /// Invalid camera parameters.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// Image buffer error.
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// A calibrated stereo pair.
///
/// The extrinsics map left camera coordinates to right camera coordinates:
/// `x_right = R·x_left + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoRig {
    left: Intrinsics,
    right: Intrinsics,
    distortion_left: Option<PolynomialDistortion>,
    distortion_right: Option<PolynomialDistortion>,
    rotation: DMat3,
    translation: DVec3,
}

impl StereoRig {
    /// Create a rig from the calibration of both cameras.
    ///
    /// # Errors
    ///
    /// * [`StereoError::ImageSizeMismatch`] when the image sizes differ.
    /// * [`StereoError::InvalidRotation`] when `rotation` is not a rotation.
    /// * [`StereoError::DegenerateBaseline`] when `translation` vanishes.
    pub fn new(
        left: Intrinsics,
        right: Intrinsics,
        distortion_left: Option<PolynomialDistortion>,
        distortion_right: Option<PolynomialDistortion>,
        rotation: DMat3,
        translation: DVec3,
    ) -> Result<Self, StereoError> {
        if left.size() != right.size() {
            return Err(StereoError::ImageSizeMismatch(left.size(), right.size()));
        }
        left.validate()?;
        right.validate()?;

        let ortho = (rotation.transpose() * rotation).abs_diff_eq(DMat3::IDENTITY, 1e-6);
        if !ortho || (rotation.determinant() - 1.0).abs() > 1e-6 {
            return Err(StereoError::InvalidRotation);
        }

        let baseline = translation.length();
        if !baseline.is_finite() || baseline <= f64::EPSILON {
            return Err(StereoError::DegenerateBaseline(baseline));
        }

        Ok(Self {
            left,
            right,
            distortion_left: distortion_left.filter(|d| !d.is_identity()),
            distortion_right: distortion_right.filter(|d| !d.is_identity()),
            rotation,
            translation,
        })
    }

    /// Intrinsics of the left camera.
    pub fn left(&self) -> &Intrinsics {
        &self.left
    }

    /// Intrinsics of the right camera.
    pub fn right(&self) -> &Intrinsics {
        &self.right
    }

    /// Lens distortion of the left camera.
    pub fn distortion_left(&self) -> Option<&PolynomialDistortion> {
        self.distortion_left.as_ref()
    }

    /// Lens distortion of the right camera.
    pub fn distortion_right(&self) -> Option<&PolynomialDistortion> {
        self.distortion_right.as_ref()
    }

    /// Rotation from the left to the right camera frame.
    pub fn rotation(&self) -> DMat3 {
        self.rotation
    }

    /// Translation from the left to the right camera frame.
    pub fn translation(&self) -> DVec3 {
        self.translation
    }

    /// Image size shared by both cameras.
    pub fn image_size(&self) -> ImageSize {
        self.left.size()
    }
}
