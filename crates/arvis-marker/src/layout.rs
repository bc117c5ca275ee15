//! Physical layout of marker boards.
//!
//! A fiducial board is a `grid_w × grid_h` grid of markers separated by one
//! block of white space. The board is first laid out in pixels, then mapped to
//! meters centered on the board, with z = 0 on the board plane.

use std::collections::{BTreeMap, HashSet};

use glam::{DVec2, DVec3};

use crate::dictionary::{IdPool, MarkerDictionary};
use crate::error::MarkerError;

/// Pixel resolution and dictionary of a fiducial board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiducialGeometry {
    /// Dictionary of the printed markers.
    pub dictionary: MarkerDictionary,
    /// Pixels per marker block in the board image.
    pub pixels_per_block: usize,
}

impl Default for FiducialGeometry {
    fn default() -> Self {
        Self {
            dictionary: MarkerDictionary::default(),
            pixels_per_block: 16,
        }
    }
}

impl FiducialGeometry {
    /// Blocks per marker side.
    pub fn blocks_per_marker(&self) -> usize {
        self.dictionary.blocks_per_marker()
    }

    /// Board extent in pixels along one axis holding `cells` markers.
    pub fn board_pixels(&self, cells: usize) -> usize {
        self.pixels_per_block * (cells * (self.blocks_per_marker() + 1) - 1)
    }
}

/// Marker id to the 3D positions of its four corners.
///
/// Corners are ordered top-left, top-right, bottom-right, bottom-left.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerMap {
    corners: BTreeMap<u32, [DVec3; 4]>,
    // ids in row-major cell order
    layout: Vec<u32>,
    board_size: DVec2,
}

impl MarkerMap {
    /// The corners of a marker.
    pub fn corners(&self, id: u32) -> Option<&[DVec3; 4]> {
        self.corners.get(&id)
    }

    /// Whether the board carries a marker.
    pub fn contains(&self, id: u32) -> bool {
        self.corners.contains_key(&id)
    }

    /// Marker ids in row-major cell order.
    pub fn ids(&self) -> &[u32] {
        &self.layout
    }

    /// Iterate over `(id, corners)` in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[DVec3; 4])> {
        self.corners.iter().map(|(id, c)| (*id, c))
    }

    /// Number of markers.
    pub fn len(&self) -> usize {
        self.corners.len()
    }

    /// Check if the map holds no marker.
    pub fn is_empty(&self) -> bool {
        self.corners.is_empty()
    }

    /// Physical board extent in meters.
    pub fn board_size(&self) -> DVec2 {
        self.board_size
    }
}

/// Lay out a grid of markers and compute their corner positions.
///
/// # Arguments
///
/// * `cell_size_m` - Side length of one marker in meters.
/// * `grid_w` - Markers per row.
/// * `grid_h` - Markers per column.
/// * `pool` - Candidate ids, consumed in row-major order.
/// * `geometry` - Dictionary and pixel resolution of the board.
///
/// # Errors
///
/// * [`MarkerError::InvalidGrid`] for an empty grid or a non-positive cell size.
/// * [`MarkerError::InsufficientIds`] when the pool is smaller than the grid.
/// * [`MarkerError::DuplicateId`] when an id is consumed twice.
pub fn build_marker_map(
    cell_size_m: f64,
    grid_w: usize,
    grid_h: usize,
    pool: &IdPool,
    geometry: &FiducialGeometry,
) -> Result<MarkerMap, MarkerError> {
    if grid_w == 0 || grid_h == 0 {
        return Err(MarkerError::InvalidGrid("the grid has no cell"));
    }
    if !cell_size_m.is_finite() || cell_size_m <= 0.0 {
        return Err(MarkerError::InvalidGrid("the cell size must be positive"));
    }
    if geometry.pixels_per_block == 0 {
        return Err(MarkerError::InvalidGrid("pixels per block must be positive"));
    }

    let required = grid_w * grid_h;
    if pool.len() < required {
        return Err(MarkerError::InsufficientIds {
            required,
            available: pool.len(),
        });
    }

    let mut seen = HashSet::with_capacity(required);
    if let Some(&dup) = pool.as_slice()[..required].iter().find(|id| !seen.insert(**id)) {
        return Err(MarkerError::DuplicateId(dup));
    }

    let ppb = geometry.pixels_per_block;
    let bpm = geometry.blocks_per_marker();
    let marker_px = (ppb * bpm) as f64;
    let step_px = ppb * (bpm + 1);

    // meters per board pixel, identical along both axes
    let pitch = cell_size_m / marker_px;
    let board_px = DVec2::new(
        geometry.board_pixels(grid_w) as f64,
        geometry.board_pixels(grid_h) as f64,
    );
    let board_size = board_px * pitch;
    let to_object = |x: f64, y: f64| {
        let p = DVec2::new(x, y) * pitch - 0.5 * board_size;
        DVec3::new(p.x, p.y, 0.0)
    };

    let ids = pool.as_slice()[..required].to_vec();
    let mut corners = BTreeMap::new();
    for (cell, &id) in ids.iter().enumerate() {
        let (i, j) = (cell % grid_w, cell / grid_w);
        let left = (i * step_px) as f64;
        let top = (j * step_px) as f64;
        corners.insert(
            id,
            [
                to_object(left, top),
                to_object(left + marker_px, top),
                to_object(left + marker_px, top + marker_px),
                to_object(left, top + marker_px),
            ],
        );
    }

    log::debug!(
        "marker map with {required} markers of {}, board {:.4} x {:.4} m",
        geometry.dictionary,
        board_size.x,
        board_size.y
    );

    Ok(MarkerMap {
        corners,
        layout: ids,
        board_size,
    })
}

/// Interior corners of a checkerboard with `cols × rows` squares.
///
/// The `(cols − 1)·(rows − 1)` corners are returned in row-major order,
/// centered on the board, with z = 0.
pub fn build_checkerboard_corners(
    cell_size_m: f64,
    cols: usize,
    rows: usize,
) -> Result<Vec<DVec3>, MarkerError> {
    if cols < 2 || rows < 2 {
        return Err(MarkerError::InvalidGrid(
            "a checkerboard needs at least 2 squares per side",
        ));
    }
    if !cell_size_m.is_finite() || cell_size_m <= 0.0 {
        return Err(MarkerError::InvalidGrid("the cell size must be positive"));
    }

    let s = cell_size_m;
    let x0 = s * 0.5 * (cols as f64 - 2.0);
    let y0 = s * 0.5 * (rows as f64 - 2.0);
    Ok((0..rows - 1)
        .flat_map(|j| (0..cols - 1).map(move |i| DVec3::new(s * i as f64 - x0, s * j as f64 - y0, 0.0)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_marker_map_corners() -> Result<(), MarkerError> {
        let geometry = FiducialGeometry::default();
        let map = build_marker_map(0.03, 8, 5, &IdPool::sequential(250), &geometry)?;
        assert_eq!(map.len(), 40);
        assert_eq!(map.ids()[..3], [0, 1, 2]);

        // 8 markers of 8 blocks with 7 gaps of one block each
        let block = 0.03 / 8.0;
        assert_relative_eq!(map.board_size().x, block * 71.0, epsilon = 1e-12);
        assert_relative_eq!(map.board_size().y, block * 44.0, epsilon = 1e-12);

        let c = map.corners(0).ok_or(MarkerError::DuplicateId(0))?;
        assert_relative_eq!(c[0].x, -0.5 * map.board_size().x, epsilon = 1e-12);
        assert_relative_eq!(c[0].y, -0.5 * map.board_size().y, epsilon = 1e-12);
        // the marker side is exactly the cell size
        assert_relative_eq!(c[1].x - c[0].x, 0.03, epsilon = 1e-12);
        assert_relative_eq!(c[3].y - c[0].y, 0.03, epsilon = 1e-12);
        assert!(c.iter().all(|p| p.z == 0.0));

        // the last marker touches the opposite board corner
        let last = map.corners(39).ok_or(MarkerError::DuplicateId(39))?;
        assert_relative_eq!(last[2].x, 0.5 * map.board_size().x, epsilon = 1e-12);
        assert_relative_eq!(last[2].y, 0.5 * map.board_size().y, epsilon = 1e-12);

        // neighbors are one block apart
        let next = map.corners(1).ok_or(MarkerError::DuplicateId(1))?;
        assert_relative_eq!(next[0].x - c[1].x, block, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_marker_map_custom_ids_row_major() -> Result<(), MarkerError> {
        let pool = IdPool::new(vec![7, 3, 11, 5, 99]);
        let map = build_marker_map(0.05, 2, 2, &pool, &FiducialGeometry::default())?;
        assert_eq!(map.ids(), &[7, 3, 11, 5]);
        assert!(!map.contains(99));
        let first = map.corners(7).ok_or(MarkerError::DuplicateId(7))?;
        let second = map.corners(3).ok_or(MarkerError::DuplicateId(3))?;
        let third = map.corners(11).ok_or(MarkerError::DuplicateId(11))?;
        assert!(second[0].x > first[0].x);
        assert_relative_eq!(second[0].y, first[0].y);
        assert!(third[0].y > first[0].y);
        Ok(())
    }

    #[test]
    fn test_marker_map_errors() {
        let geometry = FiducialGeometry::default();
        assert_eq!(
            build_marker_map(0.03, 8, 5, &IdPool::sequential(39), &geometry),
            Err(MarkerError::InsufficientIds {
                required: 40,
                available: 39
            })
        );
        assert_eq!(
            build_marker_map(0.03, 2, 1, &IdPool::new(vec![4, 4, 5]), &geometry),
            Err(MarkerError::DuplicateId(4))
        );
        // duplicates beyond the consumed prefix are harmless
        assert!(build_marker_map(0.03, 2, 1, &IdPool::new(vec![4, 5, 5]), &geometry).is_ok());
        assert!(matches!(
            build_marker_map(0.03, 0, 5, &IdPool::sequential(10), &geometry),
            Err(MarkerError::InvalidGrid(_))
        ));
        assert!(matches!(
            build_marker_map(-1.0, 1, 1, &IdPool::sequential(10), &geometry),
            Err(MarkerError::InvalidGrid(_))
        ));
    }

    #[test]
    fn test_checkerboard_corners() -> Result<(), MarkerError> {
        let corners = build_checkerboard_corners(0.03, 8, 5)?;
        assert_eq!(corners.len(), 7 * 4);
        assert_relative_eq!(corners[0].x, -0.09, epsilon = 1e-12);
        assert_relative_eq!(corners[0].y, -0.045, epsilon = 1e-12);
        assert_relative_eq!(corners[1].x - corners[0].x, 0.03, epsilon = 1e-12);
        assert_relative_eq!(corners[7].y - corners[0].y, 0.03, epsilon = 1e-12);
        let last = corners[corners.len() - 1];
        assert_relative_eq!(last.x, 0.09, epsilon = 1e-12);
        assert_relative_eq!(last.y, 0.045, epsilon = 1e-12);
        assert!(build_checkerboard_corners(0.03, 1, 5).is_err());
        Ok(())
    }
}
