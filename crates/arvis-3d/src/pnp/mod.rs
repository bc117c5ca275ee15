//! Perspective-n-Point (PnP) solvers.
//!
//! All solvers return the pose of the object in the camera frame, i.e. the
//! transform mapping object coordinates to camera coordinates.

/// EPnP solver implementation.
pub mod epnp;

/// Homography based solver for planar targets.
pub mod planar;

/// LM-based pose refinement.
pub mod refine;

pub(crate) mod ops;

pub use epnp::EPnP;
pub use planar::PlanarPnP;
pub use refine::{refine_pose_lm, LMRefineParams};

use arvis_linalg::{LinalgError, RigidTransform};
use glam::{DMat3, DVec2, DVec3};
use thiserror::Error;

use crate::camera::Intrinsics;

/// Minimum number of correspondences accepted by the solvers.
pub const MIN_CORRESPONDENCES: usize = 4;

/// Error types for PnP solvers.
#[derive(Debug, Error, PartialEq)]
pub enum PnPError {
    /// Invalid input data - insufficient correspondences for the specific solver.
    #[error("PnP solver requires at least {required} 2D-3D correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver.
        required: usize,
        /// Actual number of correspondences provided.
        actual: usize,
    },

    /// Invalid input data - mismatched array lengths with descriptive labels.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice.
        left_name: &'static str,
        /// Length of the left-hand slice.
        left_len: usize,
        /// Label for the right-hand slice.
        right_name: &'static str,
        /// Length of the right-hand slice.
        right_len: usize,
    },

    /// The correspondences do not constrain a unique pose.
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(&'static str),

    /// The underlying linear algebra primitive failed.
    #[error(transparent)]
    Linalg(#[from] LinalgError),
}

/// Numeric tolerances used by linear algebra routines throughout the PnP pipeline.
#[derive(Debug, Clone)]
pub struct NumericTol {
    /// Tolerance for singular-value decomposition based least squares.
    pub svd: f64,
    /// Epsilon threshold for determinant / singular-value checks when deciding whether to fall back to a pseudo-inverse.
    pub eps: f64,
    /// Ratio of the second to the first principal spread of the object points
    /// below which the points count as collinear.
    pub collinearity: f64,
    /// Ratio of the third to the first principal spread of the object points
    /// below which the points count as coplanar.
    pub planarity: f64,
}

impl Default for NumericTol {
    fn default() -> Self {
        Self {
            svd: 1e-12,
            eps: 1e-12,
            collinearity: 1e-6,
            planarity: 1e-5,
        }
    }
}

/// Parameters shared by the PnP solvers.
#[derive(Debug, Clone)]
pub struct PnPParams {
    /// Shared numeric tolerances.
    pub tol: NumericTol,
    /// Optional LM refinement parameters. If `Some`, the pose will be refined
    /// after the initial linear solution.
    pub refine_lm: Option<LMRefineParams>,
}

impl Default for PnPParams {
    fn default() -> Self {
        Self {
            tol: NumericTol::default(),
            refine_lm: Some(LMRefineParams::default()),
        }
    }
}

impl PnPParams {
    /// Disable the non-linear refinement step.
    pub fn without_refinement(mut self) -> Self {
        self.refine_lm = None;
        self
    }

    /// Set the refinement parameters.
    pub fn with_refinement(mut self, params: LMRefineParams) -> Self {
        self.refine_lm = Some(params);
        self
    }
}

/// Result returned by any PnP solver.
///
/// The rotation matrix maps coordinates from the **object** frame to the
/// **camera** frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PnPResult {
    /// Estimated rotation matrix.
    pub rotation: DMat3,
    /// Estimated translation vector.
    pub translation: DVec3,
    /// Rodrigues axis-angle representation of the rotation.
    pub rvec: DVec3,
    /// Root-mean-square reprojection error in pixels.
    pub reproj_rmse: f64,
    /// Number of iterations taken (if applicable).
    pub num_iterations: Option<usize>,
    /// Whether the solver converged (if applicable).
    pub converged: Option<bool>,
}

impl PnPResult {
    /// The estimated object-to-camera transform.
    pub fn camera_from_object(&self) -> RigidTransform {
        RigidTransform::new(self.rotation, self.translation)
    }
}

/// Trait for PnP solvers.
pub trait PnPSolver {
    /// Solver-specific parameters.
    type Param;

    /// Solve for the object pose given 2D-3D correspondences.
    ///
    /// # Arguments
    /// - `object` – 3-D coordinates in the object frame.
    /// - `image` – Corresponding pixel coordinates.
    /// - `intrinsics` – Camera intrinsics.
    /// - `params` – Solver-specific parameters.
    fn solve(
        object: &[DVec3],
        image: &[DVec2],
        intrinsics: &Intrinsics,
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError>;
}

/// Enumeration of the Perspective-n-Point algorithms available in this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PnPMethod {
    /// Pick the planar solver for coplanar object points and EPnP otherwise.
    #[default]
    Auto,
    /// Efficient PnP solver.
    EPnP,
    /// Homography decomposition, for coplanar object points only.
    Planar,
}

/// Dispatch function that routes to the chosen PnP solver.
pub fn solve_pnp(
    object: &[DVec3],
    image: &[DVec2],
    intrinsics: &Intrinsics,
    method: PnPMethod,
    params: &PnPParams,
) -> Result<PnPResult, PnPError> {
    match method {
        PnPMethod::EPnP => EPnP::solve(object, image, intrinsics, params),
        PnPMethod::Planar => PlanarPnP::solve(object, image, intrinsics, params),
        PnPMethod::Auto => {
            check_correspondences(object, image)?;
            match ops::classify_object_points(object, &params.tol)? {
                ops::ObjectGeometry::Planar { .. } => {
                    log::trace!("coplanar object points, using the planar solver");
                    PlanarPnP::solve(object, image, intrinsics, params)
                }
                ops::ObjectGeometry::General => EPnP::solve(object, image, intrinsics, params),
            }
        }
    }
}

/// Validate the correspondence arrays shared by every solver.
pub(crate) fn check_correspondences(object: &[DVec3], image: &[DVec2]) -> Result<(), PnPError> {
    let n = object.len();
    if n != image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "object points",
            left_len: n,
            right_name: "image points",
            right_len: image.len(),
        });
    }
    if n < MIN_CORRESPONDENCES {
        return Err(PnPError::InsufficientCorrespondences {
            required: MIN_CORRESPONDENCES,
            actual: n,
        });
    }
    if !object.iter().all(|p| p.is_finite()) || !image.iter().all(|p| p.is_finite()) {
        return Err(PnPError::DegenerateGeometry("non-finite correspondence"));
    }
    Ok(())
}

/// Apply the optional refinement and package the final result.
pub(crate) fn finalize(
    object: &[DVec3],
    image: &[DVec2],
    intrinsics: &Intrinsics,
    pose: RigidTransform,
    params: &PnPParams,
) -> Result<PnPResult, PnPError> {
    if let Some(lm_params) = &params.refine_lm {
        return refine_pose_lm(object, image, intrinsics, &pose, lm_params);
    }
    Ok(PnPResult {
        rotation: pose.rotation,
        translation: pose.translation,
        rvec: arvis_linalg::rotation::matrix_to_rotation_vector(&pose.rotation),
        reproj_rmse: crate::ops::reprojection_rmse(object, image, &pose, intrinsics),
        num_iterations: None,
        converged: Some(true),
    })
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    pub fn intrinsics() -> Intrinsics {
        Intrinsics {
            fx: 800.0,
            fy: 780.0,
            cx: 640.0,
            cy: 360.0,
            width: 1280,
            height: 720,
        }
    }

    pub fn camera_from_object() -> RigidTransform {
        RigidTransform::new(
            arvis_linalg::rotation::rotation_vector_to_matrix(DVec3::new(0.2, -0.3, 0.1)),
            DVec3::new(0.05, -0.02, 0.8),
        )
    }

    pub fn project(object: &[DVec3], pose: &RigidTransform, k: &Intrinsics) -> Vec<DVec2> {
        crate::ops::project_points(object, pose, k, None)
            .into_iter()
            .map(|p| p.unwrap_or(DVec2::NAN))
            .collect()
    }

    pub fn board_points() -> Vec<DVec3> {
        let mut pts = Vec::new();
        for j in 0..3 {
            for i in 0..4 {
                pts.push(DVec3::new(i as f64 * 0.05 - 0.075, j as f64 * 0.05 - 0.05, 0.0));
            }
        }
        pts
    }

    pub fn cube_points() -> Vec<DVec3> {
        vec![
            DVec3::new(-0.1, -0.1, -0.1),
            DVec3::new(0.1, -0.1, -0.1),
            DVec3::new(0.1, 0.1, -0.1),
            DVec3::new(-0.1, 0.1, -0.1),
            DVec3::new(-0.1, -0.1, 0.1),
            DVec3::new(0.1, -0.1, 0.1),
            DVec3::new(0.1, 0.1, 0.1),
            DVec3::new(-0.05, 0.08, 0.02),
        ]
    }
}
