//! Board targets tracked in camera frames.
//!
//! A board knows its physical layout and how to turn a frame into 2D-3D
//! correspondences with the help of a [`DetectorBackend`]. The detection
//! primitives themselves are external.

use arvis_image::Image;
use glam::{DVec2, DVec3};

use crate::correspondence::{assemble_correspondences, CorrespondenceSet, MarkerDetection};
use crate::dictionary::{IdPool, MarkerDictionary};
use crate::error::MarkerError;
use crate::layout::{build_checkerboard_corners, build_marker_map, FiducialGeometry, MarkerMap};

/// Number of interior corners of a checkerboard along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternSize {
    /// Corners per row.
    pub width: usize,
    /// Corners per column.
    pub height: usize,
}

/// Detection primitives provided by the host.
///
/// Both methods default to finding nothing, so a backend only implements the
/// primitives it supports.
pub trait DetectorBackend {
    /// Detect the markers of `dictionary` in an RGBA frame.
    fn detect_markers(&self, _frame: &Image<u8, 4>, _dictionary: MarkerDictionary) -> Vec<MarkerDetection> {
        Vec::new()
    }

    /// Find the interior corners of a checkerboard in row-major order.
    ///
    /// Returns `None` when the full pattern is not visible.
    fn find_checkerboard_corners(&self, _frame: &Image<u8, 4>, _pattern: PatternSize) -> Option<Vec<DVec2>> {
        None
    }
}

/// The 3D model of a board.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardLayout {
    /// Corners of every marker of a fiducial board.
    Markers(MarkerMap),
    /// Interior corners of a checkerboard.
    Corners(Vec<DVec3>),
}

/// Capabilities shared by every board type.
pub trait BoardTarget {
    /// The 3D model of the board in meters, z = 0 on the board plane.
    fn build_layout(&self) -> BoardLayout;

    /// Correspondences between the board and a frame. Empty when the board is not seen.
    fn detect(&self, frame: &Image<u8, 4>, backend: &dyn DetectorBackend) -> CorrespondenceSet;

    /// Physical board extent in meters.
    fn board_size(&self) -> DVec2;
}

/// A grid of fiducial markers.
#[derive(Debug, Clone, PartialEq)]
pub struct FiducialBoard {
    geometry: FiducialGeometry,
    map: MarkerMap,
}

impl FiducialBoard {
    /// Lay out the board once.
    ///
    /// See [`build_marker_map`] for the arguments and errors.
    pub fn new(
        cell_size_m: f64,
        grid_w: usize,
        grid_h: usize,
        pool: &IdPool,
        geometry: FiducialGeometry,
    ) -> Result<Self, MarkerError> {
        let map = build_marker_map(cell_size_m, grid_w, grid_h, pool, &geometry)?;
        Ok(Self { geometry, map })
    }

    /// The marker corners.
    pub fn marker_map(&self) -> &MarkerMap {
        &self.map
    }

    /// The board geometry.
    pub fn geometry(&self) -> &FiducialGeometry {
        &self.geometry
    }
}

impl BoardTarget for FiducialBoard {
    fn build_layout(&self) -> BoardLayout {
        BoardLayout::Markers(self.map.clone())
    }

    fn detect(&self, frame: &Image<u8, 4>, backend: &dyn DetectorBackend) -> CorrespondenceSet {
        let detections = backend.detect_markers(frame, self.geometry.dictionary);
        assemble_correspondences(&detections, &self.map)
    }

    fn board_size(&self) -> DVec2 {
        self.map.board_size()
    }
}

/// A checkerboard of alternating squares.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckerboardBoard {
    cell_size_m: f64,
    cols: usize,
    rows: usize,
    corners: Vec<DVec3>,
}

impl CheckerboardBoard {
    /// A board with `cols × rows` squares of side `cell_size_m`.
    pub fn new(cell_size_m: f64, cols: usize, rows: usize) -> Result<Self, MarkerError> {
        let corners = build_checkerboard_corners(cell_size_m, cols, rows)?;
        Ok(Self {
            cell_size_m,
            cols,
            rows,
            corners,
        })
    }

    /// Interior corners the detector looks for.
    pub fn pattern_size(&self) -> PatternSize {
        PatternSize {
            width: self.cols - 1,
            height: self.rows - 1,
        }
    }

    /// The interior corners in row-major order.
    pub fn corners(&self) -> &[DVec3] {
        &self.corners
    }
}

impl BoardTarget for CheckerboardBoard {
    fn build_layout(&self) -> BoardLayout {
        BoardLayout::Corners(self.corners.clone())
    }

    fn detect(&self, frame: &Image<u8, 4>, backend: &dyn DetectorBackend) -> CorrespondenceSet {
        let Some(points) = backend.find_checkerboard_corners(frame, self.pattern_size()) else {
            return CorrespondenceSet::new();
        };
        if points.len() != self.corners.len() {
            log::warn!(
                "checkerboard detector returned {} corners, expected {}",
                points.len(),
                self.corners.len()
            );
            return CorrespondenceSet::new();
        }
        let mut set = CorrespondenceSet::with_capacity(points.len());
        for (obj, img) in self.corners.iter().zip(points) {
            set.push(*obj, img);
        }
        set
    }

    fn board_size(&self) -> DVec2 {
        DVec2::new(self.cols as f64, self.rows as f64) * self.cell_size_m
    }
}

/// The supported board types.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerBoard {
    /// A grid of fiducial markers.
    Fiducial(FiducialBoard),
    /// A checkerboard.
    Checkerboard(CheckerboardBoard),
}

impl BoardTarget for MarkerBoard {
    fn build_layout(&self) -> BoardLayout {
        match self {
            MarkerBoard::Fiducial(b) => b.build_layout(),
            MarkerBoard::Checkerboard(b) => b.build_layout(),
        }
    }

    fn detect(&self, frame: &Image<u8, 4>, backend: &dyn DetectorBackend) -> CorrespondenceSet {
        match self {
            MarkerBoard::Fiducial(b) => b.detect(frame, backend),
            MarkerBoard::Checkerboard(b) => b.detect(frame, backend),
        }
    }

    fn board_size(&self) -> DVec2 {
        match self {
            MarkerBoard::Fiducial(b) => b.board_size(),
            MarkerBoard::Checkerboard(b) => b.board_size(),
        }
    }
}

impl From<FiducialBoard> for MarkerBoard {
    fn from(board: FiducialBoard) -> Self {
        MarkerBoard::Fiducial(board)
    }
}

impl From<CheckerboardBoard> for MarkerBoard {
    fn from(board: CheckerboardBoard) -> Self {
        MarkerBoard::Checkerboard(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use arvis_image::ImageError;

    struct NothingFound;
    impl DetectorBackend for NothingFound {}

    struct FixedCorners(Vec<DVec2>);
    impl DetectorBackend for FixedCorners {
        fn find_checkerboard_corners(&self, _frame: &Image<u8, 4>, pattern: PatternSize) -> Option<Vec<DVec2>> {
            (pattern.width * pattern.height <= self.0.len()).then(|| self.0.clone())
        }
    }

    fn frame() -> Result<Image<u8, 4>, ImageError> {
        Image::from_size_val([8, 8].into(), 0)
    }

    #[test]
    fn test_checkerboard_detect() -> Result<(), Box<dyn std::error::Error>> {
        let board = CheckerboardBoard::new(0.02, 4, 3)?;
        assert_eq!(board.pattern_size(), PatternSize { width: 3, height: 2 });

        let points: Vec<DVec2> = (0..6).map(|i| DVec2::new(i as f64, 0.0)).collect();
        let set = board.detect(&frame()?, &FixedCorners(points));
        assert_eq!(set.len(), 6);
        assert_eq!(set.object_points(), board.corners());

        // wrong number of corners
        let set = board.detect(&frame()?, &FixedCorners(vec![DVec2::ZERO; 7]));
        assert!(set.is_empty());
        Ok(())
    }

    #[test]
    fn test_no_detection_is_empty() -> Result<(), Box<dyn std::error::Error>> {
        let boards: [MarkerBoard; 2] = [
            FiducialBoard::new(0.03, 2, 2, &IdPool::sequential(4), FiducialGeometry::default())?.into(),
            CheckerboardBoard::new(0.03, 5, 4)?.into(),
        ];
        for board in &boards {
            assert!(board.detect(&frame()?, &NothingFound).is_empty());
        }
        Ok(())
    }

    #[test]
    fn test_board_size_and_layout() -> Result<(), Box<dyn std::error::Error>> {
        let board = MarkerBoard::from(CheckerboardBoard::new(0.03, 8, 5)?);
        assert_relative_eq!(board.board_size().x, 0.24, epsilon = 1e-12);
        assert_relative_eq!(board.board_size().y, 0.15, epsilon = 1e-12);
        assert!(matches!(board.build_layout(), BoardLayout::Corners(c) if c.len() == 28));

        let fiducial = FiducialBoard::new(0.03, 8, 5, &IdPool::sequential(40), FiducialGeometry::default())?;
        let size = fiducial.board_size();
        let board = MarkerBoard::from(fiducial);
        assert_eq!(board.board_size(), size);
        assert!(matches!(board.build_layout(), BoardLayout::Markers(m) if m.len() == 40));
        Ok(())
    }
}
