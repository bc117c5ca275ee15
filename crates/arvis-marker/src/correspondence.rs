use glam::{DVec2, DVec3};

use crate::layout::MarkerMap;

/// A marker found in an image by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerDetection {
    /// Decoded marker id.
    pub id: u32,
    /// Image corners ordered top-left, top-right, bottom-right, bottom-left.
    pub corners: [DVec2; 4],
}

/// Index-aligned 2D-3D point pairs for one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrespondenceSet {
    object_points: Vec<DVec3>,
    image_points: Vec<DVec2>,
}

impl CorrespondenceSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set with room for `n` pairs.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            object_points: Vec::with_capacity(n),
            image_points: Vec::with_capacity(n),
        }
    }

    /// Append one pair.
    pub fn push(&mut self, object: DVec3, image: DVec2) {
        self.object_points.push(object);
        self.image_points.push(image);
    }

    /// Object points in the board frame.
    pub fn object_points(&self) -> &[DVec3] {
        &self.object_points
    }

    /// Image points in pixels.
    pub fn image_points(&self) -> &[DVec2] {
        &self.image_points
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.object_points.len()
    }

    /// Check if the set holds no pair.
    pub fn is_empty(&self) -> bool {
        self.object_points.is_empty()
    }

    /// Remove every pair.
    pub fn clear(&mut self) {
        self.object_points.clear();
        self.image_points.clear();
    }
}

/// Pair the corners of every detection with the board layout.
///
/// Detections whose id is not on the board are skipped. The result is empty
/// when nothing matches.
pub fn assemble_correspondences(detections: &[MarkerDetection], map: &MarkerMap) -> CorrespondenceSet {
    let mut set = CorrespondenceSet::with_capacity(4 * detections.len());
    for det in detections {
        let Some(object) = map.corners(det.id) else {
            log::trace!("ignoring marker {} which is not on the board", det.id);
            continue;
        };
        for (obj, img) in object.iter().zip(det.corners.iter()) {
            set.push(*obj, *img);
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_marker_map, FiducialGeometry, IdPool};

    fn detection(id: u32, offset: f64) -> MarkerDetection {
        MarkerDetection {
            id,
            corners: [
                DVec2::new(offset, offset),
                DVec2::new(offset + 10.0, offset),
                DVec2::new(offset + 10.0, offset + 10.0),
                DVec2::new(offset, offset + 10.0),
            ],
        }
    }

    #[test]
    fn test_assemble_drops_unknown_ids() -> Result<(), crate::MarkerError> {
        let map = build_marker_map(0.04, 3, 2, &IdPool::sequential(6), &FiducialGeometry::default())?;
        let dets = [detection(2, 0.0), detection(42, 50.0), detection(5, 100.0)];
        let set = assemble_correspondences(&dets, &map);

        assert_eq!(set.len(), 8);
        assert_eq!(set.object_points().len(), set.image_points().len());
        assert_eq!(set.object_points()[..4], map.corners(2).copied().unwrap_or_default());
        assert_eq!(set.image_points()[4], DVec2::new(100.0, 100.0));
        Ok(())
    }

    #[test]
    fn test_assemble_empty() -> Result<(), crate::MarkerError> {
        let map = build_marker_map(0.04, 1, 1, &IdPool::sequential(1), &FiducialGeometry::default())?;
        assert!(assemble_correspondences(&[], &map).is_empty());
        assert!(assemble_correspondences(&[detection(3, 0.0)], &map).is_empty());
        Ok(())
    }
}
