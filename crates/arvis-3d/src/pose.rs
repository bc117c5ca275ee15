//! Pose estimates and the conversion between the vision and scene conventions.
//!
//! The vision convention is the camera frame of the PnP solvers: x right,
//! y down, z forward. The scene convention is the frame the rendering host
//! expects for the board content.

use arvis_linalg::RigidTransform;
use glam::{DMat3, DVec2, DVec3};

use crate::camera::Intrinsics;
use crate::pnp::{solve_pnp, PnPError, PnPMethod, PnPParams, PnPResult};

/// Axis mapping from vision to scene coordinates.
///
/// Rows: scene-X = −vision-X, scene-Y = +vision-Z, scene-Z = +vision-Y.
pub const VISION_TO_SCENE: DMat3 = DMat3::from_cols_array(&[
    -1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, //
    0.0, 1.0, 0.0,
]);

/// A solved object pose.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    camera_from_object: RigidTransform,
    /// Root-mean-square reprojection error in pixels.
    pub reproj_rmse: f64,
    /// Number of refinement iterations, if any.
    pub num_iterations: Option<usize>,
}

impl PoseEstimate {
    /// Wrap a pose with its reprojection error.
    pub fn new(camera_from_object: RigidTransform, reproj_rmse: f64) -> Self {
        Self {
            camera_from_object,
            reproj_rmse,
            num_iterations: None,
        }
    }

    /// Pose of the object in the camera frame, mapping object points to camera points.
    pub fn object_in_camera(&self) -> RigidTransform {
        self.camera_from_object
    }

    /// Pose of the camera in the object frame, the inverse of [`Self::object_in_camera`].
    pub fn camera_in_object(&self) -> RigidTransform {
        self.camera_from_object.inverse()
    }
}

impl From<PnPResult> for PoseEstimate {
    fn from(res: PnPResult) -> Self {
        Self {
            camera_from_object: res.camera_from_object(),
            reproj_rmse: res.reproj_rmse,
            num_iterations: res.num_iterations,
        }
    }
}

/// Solve the object pose with the default solver selection and refinement.
///
/// # Errors
///
/// Same as [`solve_pnp`].
pub fn solve_pose(
    object: &[DVec3],
    image: &[DVec2],
    intrinsics: &Intrinsics,
) -> Result<PoseEstimate, PnPError> {
    let res = solve_pnp(
        object,
        image,
        intrinsics,
        PnPMethod::Auto,
        &PnPParams::default(),
    )?;
    log::debug!("pose solved with rmse {:.3} px", res.reproj_rmse);
    Ok(res.into())
}

/// Express a vision-convention transform in the scene convention.
///
/// A single left multiplication by [`VISION_TO_SCENE`] of the rotation and the
/// translation.
pub fn vision_to_scene(transform: &RigidTransform) -> (DMat3, DVec3) {
    (
        VISION_TO_SCENE * transform.rotation,
        VISION_TO_SCENE * transform.translation,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_vision_to_scene_axes() {
        let t = RigidTransform::from_translation(DVec3::new(1.0, 2.0, 3.0));
        let (_, ts) = vision_to_scene(&t);
        assert_eq!(ts, DVec3::new(-1.0, 3.0, 2.0));

        assert_eq!(VISION_TO_SCENE * DVec3::X, -DVec3::X);
        assert_eq!(VISION_TO_SCENE * DVec3::Y, DVec3::Z);
        assert_eq!(VISION_TO_SCENE * DVec3::Z, DVec3::Y);
    }

    #[test]
    fn test_vision_to_scene_is_mirror_free() {
        assert_relative_eq!(VISION_TO_SCENE.determinant(), 1.0);
        let t = RigidTransform::from_rotation(DMat3::from_rotation_y(0.3));
        let (r, _) = vision_to_scene(&t);
        assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_camera_in_object_is_inverse() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        for _ in 0..10 {
            let rvec = DVec3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            );
            let t = DVec3::new(rng.random_range(-1.0..1.0), 0.2, rng.random_range(0.5..2.0));
            let pose = RigidTransform::new(
                arvis_linalg::rotation::rotation_vector_to_matrix(rvec),
                t,
            );
            let est = PoseEstimate::new(pose, 0.0);
            let composed = est.object_in_camera().compose(&est.camera_in_object());
            assert!(composed.abs_diff_eq(&RigidTransform::IDENTITY, 1e-9));
        }
    }

    #[test]
    fn test_solve_pose_board() -> Result<(), PnPError> {
        let k = Intrinsics {
            fx: 600.0,
            fy: 600.0,
            cx: 320.0,
            cy: 240.0,
            width: 640,
            height: 480,
        };
        let pose = RigidTransform::new(
            DMat3::from_rotation_x(0.3) * DMat3::from_rotation_z(0.2),
            DVec3::new(0.02, 0.01, 0.6),
        );
        let obj: Vec<DVec3> = (0..5)
            .flat_map(|j| (0..4).map(move |i| DVec3::new(i as f64 * 0.04, j as f64 * 0.04, 0.0)))
            .collect();
        let img: Vec<DVec2> = crate::ops::project_points(&obj, &pose, &k, None)
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(img.len(), obj.len());

        let est = solve_pose(&obj, &img, &k)?;
        assert!(est.object_in_camera().abs_diff_eq(&pose, 1e-6));
        assert!(est.camera_in_object().abs_diff_eq(&pose.inverse(), 1e-6));
        Ok(())
    }
}
