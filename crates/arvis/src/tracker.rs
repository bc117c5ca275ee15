//! Per-frame pose tracking of a board.
//!
//! A [`MarkerTracker`] holds the configuration fixed at start-up: the board, the
//! camera intrinsics and the render projection. The host calls
//! [`MarkerTracker::track`] once per camera frame.

use arvis_3d::camera::{projection_from_intrinsics, CameraError, Intrinsics};
use arvis_3d::pose::{solve_pose, vision_to_scene, PoseEstimate};
use arvis_image::Image;
use arvis_marker::{BoardTarget, DetectorBackend, MarkerBoard};
use glam::{DMat3, DMat4, DVec3};

/// The board pose found in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPose {
    /// The solved pose in the vision convention.
    pub pose: PoseEstimate,
    /// Rotation of the camera in the board frame, scene convention.
    pub scene_rotation: DMat3,
    /// Position of the camera in the board frame, scene convention.
    pub scene_translation: DVec3,
    /// Number of 2D-3D pairs used.
    pub num_correspondences: usize,
}

/// Tracks a board across frames.
#[derive(Debug, Clone)]
pub struct MarkerTracker {
    board: MarkerBoard,
    intrinsics: Intrinsics,
    projection: DMat4,
    max_reproj_rmse: Option<f64>,
}

impl MarkerTracker {
    /// Create a tracker for a board seen by a camera.
    ///
    /// # Arguments
    ///
    /// * `board` - The tracked board.
    /// * `intrinsics` - Intrinsics of the undistorted camera frames.
    /// * `near` - Near clip plane of the render projection.
    /// * `far` - Far clip plane of the render projection.
    pub fn new(
        board: MarkerBoard,
        intrinsics: Intrinsics,
        near: f64,
        far: f64,
    ) -> Result<Self, CameraError> {
        let projection = projection_from_intrinsics(&intrinsics, near, far)?;
        Ok(Self {
            board,
            intrinsics,
            projection,
            max_reproj_rmse: None,
        })
    }

    /// Discard poses with a reprojection RMSE above `pixels`.
    pub fn with_max_reprojection_error(mut self, pixels: f64) -> Self {
        self.max_reproj_rmse = Some(pixels);
        self
    }

    /// The tracked board.
    pub fn board(&self) -> &MarkerBoard {
        &self.board
    }

    /// The camera intrinsics.
    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    /// The render projection matching the camera.
    pub fn projection(&self) -> &DMat4 {
        &self.projection
    }

    /// Locate the board in one frame.
    ///
    /// Returns `None` when the board is not seen or the pose cannot be solved.
    /// The caller keeps its previous pose in that case.
    pub fn track(&self, frame: &Image<u8, 4>, backend: &dyn DetectorBackend) -> Option<TrackedPose> {
        let set = self.board.detect(frame, backend);
        if set.is_empty() {
            log::trace!("board not detected");
            return None;
        }

        let pose = match solve_pose(set.object_points(), set.image_points(), &self.intrinsics) {
            Ok(pose) => pose,
            Err(e) => {
                log::debug!("pose not solved from {} points: {e}", set.len());
                return None;
            }
        };

        if let Some(max) = self.max_reproj_rmse {
            if pose.reproj_rmse > max {
                log::debug!("pose discarded, rmse {:.3} px above {max}", pose.reproj_rmse);
                return None;
            }
        }

        let (scene_rotation, scene_translation) = vision_to_scene(&pose.camera_in_object());
        Some(TrackedPose {
            pose,
            scene_rotation,
            scene_translation,
            num_correspondences: set.len(),
        })
    }
}
