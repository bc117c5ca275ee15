#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use arvis_linalg as linalg;

#[doc(inline)]
pub use arvis_image as image;

#[doc(inline)]
pub use arvis_imgproc as imgproc;

#[doc(inline)]
pub use arvis_3d as k3d;

#[doc(inline)]
pub use arvis_marker as marker;

#[doc(inline)]
pub use arvis_icp as icp;

/// Calibration sessions collecting board views from camera frames.
pub mod calibration;

/// Calibration and board parameters loaded from JSON.
pub mod config;

/// Per-frame marker tracking.
pub mod tracker;
