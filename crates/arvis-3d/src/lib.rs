#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Camera and stereo rig calibration from planar target views.
pub mod calib;

/// Pinhole camera model and projection matrices.
pub mod camera;

/// Operations on 3D data processing.
pub mod ops;

/// Point cloud containers.
pub mod pointcloud;

/// Perspective-n-Point (PnP) solvers.
pub mod pnp;

/// Pose estimates and coordinate conventions.
pub mod pose;

/// Stereo rectification and dense reconstruction.
pub mod stereo;
