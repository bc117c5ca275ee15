#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Error types for the linear algebra primitives.
pub mod error;

/// Rigid body transforms in 3D.
pub mod rigid;

/// Rotation parameterisations (axis-angle, quaternions).
pub mod rotation;

/// Module to calculate SVD of a 3x3 matrix
pub mod svd;

pub use error::LinalgError;
pub use rigid::{fit_rigid, RigidTransform};
