//! Interactive calibration from frames showing a board.
//!
//! A session collects one view per accepted frame and solves once enough
//! views are gathered. The result converts into the persisted
//! [`CameraCalibration`] and [`StereoCalibration`] files read by the tracker
//! and the stereo pipeline.

use arvis_3d::calib::{
    calibrate_camera, calibrate_stereo, CalibrationError, CalibrationParams, CalibrationView,
    StereoView, MIN_VIEWS,
};
use arvis_3d::pnp::MIN_CORRESPONDENCES;
use arvis_image::{Image, ImageSize};
use arvis_marker::{BoardTarget, CorrespondenceSet, DetectorBackend, MarkerBoard};

use crate::config::{CameraCalibration, StereoCalibration};

/// Outcome of a single camera calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraCalibrationReport {
    /// The calibration ready to be saved.
    pub calibration: CameraCalibration,
    /// Root mean square reprojection error per point, in pixels.
    pub rms: f64,
    /// Number of views used.
    pub num_views: usize,
}

/// Outcome of a stereo calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct StereoCalibrationReport {
    /// The calibration ready to be saved.
    pub calibration: StereoCalibration,
    /// Root mean square reprojection error per point over both cameras, in pixels.
    pub rms: f64,
    /// Number of views used.
    pub num_views: usize,
}

fn not_enough_views(actual: usize) -> CalibrationError {
    CalibrationError::NotEnoughViews {
        required: MIN_VIEWS,
        actual,
    }
}

/// Frames of a session must all share the size of the first one.
fn check_frame_size(session_size: &mut Option<ImageSize>, frame_size: ImageSize) -> bool {
    match session_size {
        Some(size) if *size != frame_size => {
            log::warn!("frame of size {frame_size} ignored, the session uses {size}");
            false
        }
        Some(_) => true,
        None => {
            *session_size = Some(frame_size);
            true
        }
    }
}

/// Accumulates views of a board seen by one camera.
#[derive(Debug, Clone)]
pub struct CalibrationSession {
    board: MarkerBoard,
    image_size: Option<ImageSize>,
    views: Vec<CalibrationView>,
    min_points: usize,
}

impl CalibrationSession {
    /// Start an empty session for a board.
    pub fn new(board: MarkerBoard) -> Self {
        Self {
            board,
            image_size: None,
            views: Vec::new(),
            min_points: MIN_CORRESPONDENCES,
        }
    }

    /// Ignore frames where fewer than `n` board points are found.
    ///
    /// Values below the four points a plane pose needs are raised to four.
    pub fn with_min_points(mut self, n: usize) -> Self {
        self.min_points = n.max(MIN_CORRESPONDENCES);
        self
    }

    /// The calibrated board.
    pub fn board(&self) -> &MarkerBoard {
        &self.board
    }

    /// The views collected so far.
    pub fn views(&self) -> &[CalibrationView] {
        &self.views
    }

    /// Number of views collected so far.
    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    /// Size of the frames of the session, known after the first accepted frame.
    pub fn image_size(&self) -> Option<ImageSize> {
        self.image_size
    }

    /// Drop every collected view.
    pub fn reset(&mut self) {
        self.views.clear();
        self.image_size = None;
    }

    /// Detect the board in a frame and keep the view.
    ///
    /// Returns whether the frame was kept. Frames without enough board points
    /// or with a size different from the first frame are skipped.
    pub fn add_frame(&mut self, frame: &Image<u8, 4>, backend: &dyn DetectorBackend) -> bool {
        let set = self.board.detect(frame, backend);
        if set.len() < self.min_points {
            log::debug!("frame skipped, {} board points found", set.len());
            return false;
        }
        if !check_frame_size(&mut self.image_size, frame.size()) {
            return false;
        }
        self.views.push(CalibrationView::new(
            set.object_points().to_vec(),
            set.image_points().to_vec(),
        ));
        log::info!("calibration view {} added with {} points", self.views.len(), set.len());
        true
    }

    /// Solve the intrinsics from the collected views.
    pub fn calibrate(&self, params: &CalibrationParams) -> Result<CameraCalibrationReport, CalibrationError> {
        let size = self.image_size.ok_or_else(|| not_enough_views(0))?;
        let result = calibrate_camera(&self.views, size, params)?;
        log::info!(
            "camera calibrated from {} views, rms {:.4} px",
            self.views.len(),
            result.rms
        );
        Ok(CameraCalibrationReport {
            calibration: CameraCalibration::new(&result.intrinsics, result.dist_coeffs),
            rms: result.rms,
            num_views: self.views.len(),
        })
    }
}

/// Keep the board points found in both images, in the order of the left set.
fn common_points(left: &CorrespondenceSet, right: &CorrespondenceSet) -> StereoView {
    let mut view = StereoView::default();
    for (obj, uv_left) in left.object_points().iter().zip(left.image_points()) {
        let found = right.object_points().iter().position(|p| p == obj);
        if let Some(i) = found {
            view.object_points.push(*obj);
            view.left_points.push(*uv_left);
            view.right_points.push(right.image_points()[i]);
        }
    }
    view
}

/// Accumulates synchronized views of a board seen by a stereo pair.
#[derive(Debug, Clone)]
pub struct StereoCalibrationSession {
    board: MarkerBoard,
    image_size: Option<ImageSize>,
    views: Vec<StereoView>,
    min_points: usize,
}

impl StereoCalibrationSession {
    /// Start an empty session for a board.
    pub fn new(board: MarkerBoard) -> Self {
        Self {
            board,
            image_size: None,
            views: Vec::new(),
            min_points: MIN_CORRESPONDENCES,
        }
    }

    /// Ignore frame pairs sharing fewer than `n` board points.
    pub fn with_min_points(mut self, n: usize) -> Self {
        self.min_points = n.max(MIN_CORRESPONDENCES);
        self
    }

    /// The calibrated board.
    pub fn board(&self) -> &MarkerBoard {
        &self.board
    }

    /// The views collected so far.
    pub fn views(&self) -> &[StereoView] {
        &self.views
    }

    /// Number of views collected so far.
    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    /// Drop every collected view.
    pub fn reset(&mut self) {
        self.views.clear();
        self.image_size = None;
    }

    /// Detect the board in a synchronized pair of frames and keep the view.
    ///
    /// Only board points found in both frames are kept. Returns whether the
    /// pair was kept.
    pub fn add_frames(
        &mut self,
        left: &Image<u8, 4>,
        right: &Image<u8, 4>,
        backend: &dyn DetectorBackend,
    ) -> bool {
        if left.size() != right.size() {
            log::warn!("frame pair of sizes {} and {} ignored", left.size(), right.size());
            return false;
        }
        let view = common_points(&self.board.detect(left, backend), &self.board.detect(right, backend));
        if view.object_points.len() < self.min_points {
            log::debug!("frame pair skipped, {} common board points", view.object_points.len());
            return false;
        }
        if !check_frame_size(&mut self.image_size, left.size()) {
            return false;
        }
        log::info!(
            "stereo view {} added with {} points",
            self.views.len() + 1,
            view.object_points.len()
        );
        self.views.push(view);
        true
    }

    /// Solve both cameras and their relative pose from the collected views.
    pub fn calibrate(&self, params: &CalibrationParams) -> Result<StereoCalibrationReport, CalibrationError> {
        let size = self.image_size.ok_or_else(|| not_enough_views(0))?;
        let result = calibrate_stereo(&self.views, size, params)?;
        log::info!(
            "stereo pair calibrated from {} views, baseline {:.4} m, rms {:.4} px",
            self.views.len(),
            result.translation.length(),
            result.rms
        );
        let calibration = StereoCalibration::new(
            &result.left.intrinsics,
            result.left.dist_coeffs.clone(),
            &result.right.intrinsics,
            result.right.dist_coeffs.clone(),
            &result.rotation,
            result.translation,
        );
        Ok(StereoCalibrationReport {
            calibration,
            rms: result.rms,
            num_views: self.views.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arvis_marker::{CheckerboardBoard, PatternSize};
    use glam::{DVec2, DVec3};

    /// Returns the same corners for every frame.
    struct FixedCorners(Vec<DVec2>);
    impl DetectorBackend for FixedCorners {
        fn find_checkerboard_corners(&self, _frame: &Image<u8, 4>, _pattern: PatternSize) -> Option<Vec<DVec2>> {
            Some(self.0.clone())
        }
    }

    struct Blind;
    impl DetectorBackend for Blind {}

    fn board() -> Result<MarkerBoard, Box<dyn std::error::Error>> {
        Ok(CheckerboardBoard::new(0.03, 4, 3)?.into())
    }

    fn corners() -> FixedCorners {
        FixedCorners((0..6).map(|i| DVec2::new(100.0 + 10.0 * i as f64, 50.0 + (i / 3) as f64)).collect())
    }

    #[test]
    fn test_session_collects_views() -> Result<(), Box<dyn std::error::Error>> {
        let mut session = CalibrationSession::new(board()?);
        let frame = Image::from_size_val([64, 48].into(), 0u8)?;

        assert!(!session.add_frame(&frame, &Blind));
        assert!(session.image_size().is_none());

        assert!(session.add_frame(&frame, &corners()));
        assert_eq!(session.num_views(), 1);
        assert_eq!(session.views()[0].len(), 6);
        assert_eq!(session.image_size(), Some([64, 48].into()));

        // a different frame size is skipped
        let other = Image::from_size_val([32, 24].into(), 0u8)?;
        assert!(!session.add_frame(&other, &corners()));
        assert_eq!(session.num_views(), 1);

        session.reset();
        assert_eq!(session.num_views(), 0);
        assert!(session.add_frame(&other, &corners()));
        Ok(())
    }

    #[test]
    fn test_session_min_points() -> Result<(), Box<dyn std::error::Error>> {
        let mut session = CalibrationSession::new(board()?).with_min_points(7);
        let frame = Image::from_size_val([64, 48].into(), 0u8)?;
        assert!(!session.add_frame(&frame, &corners()));

        let session = CalibrationSession::new(board()?).with_min_points(1);
        assert_eq!(session.min_points, MIN_CORRESPONDENCES);
        Ok(())
    }

    #[test]
    fn test_session_needs_views() -> Result<(), Box<dyn std::error::Error>> {
        let params = CalibrationParams::default();
        let mut session = CalibrationSession::new(board()?);
        assert_eq!(session.calibrate(&params), Err(not_enough_views(0)));

        let frame = Image::from_size_val([64, 48].into(), 0u8)?;
        session.add_frame(&frame, &corners());
        session.add_frame(&frame, &corners());
        assert_eq!(session.calibrate(&params), Err(not_enough_views(2)));

        let stereo = StereoCalibrationSession::new(board()?);
        assert_eq!(stereo.calibrate(&params), Err(not_enough_views(0)));
        Ok(())
    }

    #[test]
    fn test_common_points() {
        let mut left = CorrespondenceSet::new();
        let mut right = CorrespondenceSet::new();
        for i in 0..5 {
            let obj = DVec3::new(i as f64, 0.0, 0.0);
            left.push(obj, DVec2::new(i as f64, 1.0));
            if i != 2 {
                right.push(obj, DVec2::new(i as f64, 2.0));
            }
        }
        // right sees one extra point the left misses
        right.push(DVec3::new(9.0, 0.0, 0.0), DVec2::ZERO);

        let view = common_points(&left, &right);
        assert_eq!(view.object_points.len(), 4);
        assert_eq!(view.object_points[2], DVec3::new(3.0, 0.0, 0.0));
        assert_eq!(view.left_points[2], DVec2::new(3.0, 1.0));
        assert_eq!(view.right_points[2], DVec2::new(3.0, 2.0));
    }

    #[test]
    fn test_stereo_session_rejects_mismatched_frames() -> Result<(), Box<dyn std::error::Error>> {
        let mut session = StereoCalibrationSession::new(board()?);
        let left = Image::from_size_val([64, 48].into(), 0u8)?;
        let right = Image::from_size_val([64, 32].into(), 0u8)?;
        assert!(!session.add_frames(&left, &right, &corners()));
        assert!(session.add_frames(&left, &left, &corners()));
        assert_eq!(session.views()[0].object_points.len(), 6);
        Ok(())
    }
}
