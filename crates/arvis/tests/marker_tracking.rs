use arvis::config::{BoardConfig, CameraCalibration};
use arvis::image::Image;
use arvis::k3d::{camera::Intrinsics, ops::project_points, pose::solve_pose, pose::VISION_TO_SCENE};
use arvis::linalg::{rotation::rotation_vector_to_matrix, RigidTransform};
use arvis::marker::{BoardTarget, DetectorBackend, MarkerBoard, MarkerDetection, MarkerDictionary};
use arvis::tracker::MarkerTracker;
use glam::{DVec2, DVec3};

/// Projects the markers of a board seen under a fixed pose.
struct SyntheticDetector {
    board: MarkerBoard,
    camera_from_board: RigidTransform,
    intrinsics: Intrinsics,
}

impl DetectorBackend for SyntheticDetector {
    fn detect_markers(&self, _frame: &Image<u8, 4>, _dictionary: MarkerDictionary) -> Vec<MarkerDetection> {
        let MarkerBoard::Fiducial(board) = &self.board else {
            return Vec::new();
        };
        board
            .marker_map()
            .iter()
            // every other marker is occluded
            .filter(|(id, _)| id % 2 == 0)
            .filter_map(|(id, corners)| {
                let img = project_points(corners, &self.camera_from_board, &self.intrinsics, None);
                let corners: Option<Vec<DVec2>> = img.into_iter().collect();
                Some(MarkerDetection {
                    id,
                    corners: corners?.try_into().ok()?,
                })
            })
            .collect()
    }
}

fn calibration() -> CameraCalibration {
    CameraCalibration {
        image_size: [640, 480],
        camera_matrix: [[520.0, 0.0, 318.0], [0.0, 515.0, 242.0], [0.0, 0.0, 1.0]],
        dist_coeffs: vec![],
    }
}

#[test]
fn tracks_fiducial_board_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("camera.json");
    calibration().save(&path)?;
    let intrinsics = CameraCalibration::from_file(&path)?.intrinsics()?;

    let board = BoardConfig::from_json_str(
        r#"{"kind": "fiducial", "cell_size_m": 0.03, "grid_width": 8, "grid_height": 5}"#,
    )?
    .build()?;

    let camera_from_board = RigidTransform::new(
        rotation_vector_to_matrix(DVec3::new(0.3, -0.2, 0.05)),
        DVec3::new(0.02, -0.01, 0.6),
    );
    let detector = SyntheticDetector {
        board: board.clone(),
        camera_from_board,
        intrinsics,
    };

    let tracker = MarkerTracker::new(board, intrinsics, 0.01, 100.0)?.with_max_reprojection_error(1.0);
    let frame = Image::from_size_val([640, 480].into(), 0u8)?;
    let tracked = tracker.track(&frame, &detector).ok_or("board not tracked")?;

    assert_eq!(tracked.num_correspondences, 4 * 20);
    assert!(tracked.pose.object_in_camera().abs_diff_eq(&camera_from_board, 1e-6));
    assert!(tracked.pose.reproj_rmse < 1e-6);

    // the scene pose is the camera in the board frame with swapped axes
    let camera_in_board = camera_from_board.inverse();
    assert!((tracked.scene_translation - VISION_TO_SCENE * camera_in_board.translation).length() < 1e-6);
    assert!((tracked.scene_rotation.determinant() - 1.0).abs() < 1e-9);
    Ok(())
}

#[test]
fn solves_single_marker_corners() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();

    let intrinsics = calibration().intrinsics()?;
    let half = 0.025;
    let square = [
        DVec3::new(-half, -half, 0.0),
        DVec3::new(half, -half, 0.0),
        DVec3::new(half, half, 0.0),
        DVec3::new(-half, half, 0.0),
    ];
    let truth = RigidTransform::new(
        rotation_vector_to_matrix(DVec3::new(-0.25, 0.15, 0.4)),
        DVec3::new(-0.03, 0.02, 0.4),
    );
    let image: Vec<DVec2> = project_points(&square, &truth, &intrinsics, None)
        .into_iter()
        .collect::<Option<_>>()
        .ok_or("point behind the camera")?;

    let pose = solve_pose(&square, &image, &intrinsics)?;
    assert!(pose.object_in_camera().abs_diff_eq(&truth, 1e-6));

    let identity = pose.object_in_camera().compose(&pose.camera_in_object());
    assert!(identity.abs_diff_eq(&RigidTransform::IDENTITY, 1e-12));
    Ok(())
}

#[test]
fn lost_board_yields_no_pose() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();

    let intrinsics = calibration().intrinsics()?;
    let board = BoardConfig::from_json_str(
        r#"{"kind": "fiducial", "cell_size_m": 0.03, "grid_width": 2, "grid_height": 2}"#,
    )?
    .build()?;
    // board behind the camera, nothing projects
    let detector = SyntheticDetector {
        board: board.clone(),
        camera_from_board: RigidTransform::from_translation(DVec3::new(0.0, 0.0, -1.0)),
        intrinsics,
    };
    let tracker = MarkerTracker::new(board, intrinsics, 0.01, 100.0)?;
    let frame = Image::from_size_val([640, 480].into(), 0u8)?;
    assert!(tracker.board().detect(&frame, &detector).is_empty());
    assert!(tracker.track(&frame, &detector).is_none());
    Ok(())
}
