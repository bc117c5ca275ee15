#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Board targets and the detector seam.
pub mod board;

/// 2D-3D correspondences assembled from detections.
pub mod correspondence;

/// Predefined marker dictionaries and id pools.
pub mod dictionary;

/// Error types for the marker module.
pub mod error;

/// Physical layout of marker grids and checkerboards.
pub mod layout;

pub use board::{
    BoardLayout, BoardTarget, CheckerboardBoard, DetectorBackend, FiducialBoard, MarkerBoard,
    PatternSize,
};
pub use correspondence::{assemble_correspondences, CorrespondenceSet, MarkerDetection};
pub use dictionary::{IdPool, MarkerDictionary};
pub use error::MarkerError;
pub use layout::{build_checkerboard_corners, build_marker_map, FiducialGeometry, MarkerMap};
