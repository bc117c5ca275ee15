//! Pinhole intrinsics and OpenGL-style perspective projection matrices.
//!
//! Image space is y-down with the origin at the top-left pixel, while the
//! projection matrices follow the render convention (y-up, camera looking down
//! −z, clip-space depth in `[-1, 1]`). The y flip between both lives only in
//! [`projection_from_intrinsics`] and [`intrinsics_from_projection`].

use arvis_image::ImageSize;
use arvis_imgproc::calibration::CameraIntrinsic;
use glam::{DMat3, DMat4, DVec3};
use thiserror::Error;

/// Default near clip plane distance.
pub const DEFAULT_NEAR: f64 = 0.01;

/// Default far clip plane distance.
pub const DEFAULT_FAR: f64 = 1000.0;

/// Error types for the camera model.
#[derive(Debug, Error, PartialEq)]
pub enum CameraError {
    /// The matrix is not a perspective projection (`m[3][2] != -1`).
    #[error("Not a perspective projection matrix: m[3][2] = {0}, expected -1")]
    InvalidProjectionKind(f64),

    /// The frustum planes do not describe a valid perspective volume.
    #[error("Degenerate frustum: {0}")]
    DegenerateFrustum(&'static str),

    /// The focal lengths must be strictly positive and finite.
    #[error("Invalid focal length: fx = {fx}, fy = {fy}")]
    InvalidFocalLength {
        /// Horizontal focal length.
        fx: f64,
        /// Vertical focal length.
        fy: f64,
    },

    /// The image size must be non-zero.
    #[error("Invalid image size: {0}")]
    InvalidImageSize(ImageSize),
}

/// Pinhole camera intrinsics in pixels, together with the image size they refer to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    /// The focal length in the x direction.
    pub fx: f64,
    /// The focal length in the y direction.
    pub fy: f64,
    /// The x coordinate of the principal point.
    pub cx: f64,
    /// The y coordinate of the principal point.
    pub cy: f64,
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
}

impl Intrinsics {
    /// Create validated intrinsics.
    ///
    /// Focal lengths must be positive; a principal point outside the image is
    /// accepted but logged.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, size: ImageSize) -> Result<Self, CameraError> {
        let intrinsics = Self {
            fx,
            fy,
            cx,
            cy,
            width: size.width,
            height: size.height,
        };
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Check the hard invariants and log the soft ones.
    pub fn validate(&self) -> Result<(), CameraError> {
        if !(self.fx.is_finite() && self.fy.is_finite() && self.fx > 0.0 && self.fy > 0.0) {
            return Err(CameraError::InvalidFocalLength {
                fx: self.fx,
                fy: self.fy,
            });
        }
        if self.width == 0 || self.height == 0 {
            return Err(CameraError::InvalidImageSize(self.size()));
        }
        let (w, h) = (self.width as f64, self.height as f64);
        if !(0.0..=w).contains(&self.cx) || !(0.0..=h).contains(&self.cy) {
            log::warn!(
                "principal point ({:.2}, {:.2}) lies outside the {}x{} image",
                self.cx,
                self.cy,
                self.width,
                self.height
            );
        }
        Ok(())
    }

    /// The image size the intrinsics refer to.
    pub fn size(&self) -> ImageSize {
        ImageSize {
            width: self.width,
            height: self.height,
        }
    }

    /// The 3x3 camera matrix `K`.
    pub fn camera_matrix(&self) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(self.fx, 0.0, 0.0),
            DVec3::new(0.0, self.fy, 0.0),
            DVec3::new(self.cx, self.cy, 1.0),
        )
    }

    /// Intrinsics divided by the image size, i.e. for a unit image.
    pub fn normalized(&self) -> NormalizedIntrinsics {
        let (w, h) = (self.width as f64, self.height as f64);
        NormalizedIntrinsics {
            fx: self.fx / w,
            fy: self.fy / h,
            cx: self.cx / w,
            cy: self.cy / h,
        }
    }

    /// The same camera observed at a different image resolution.
    pub fn scaled_to(&self, size: ImageSize) -> Self {
        self.normalized().denormalize(size)
    }

    /// The intrinsics as used by the image processing routines.
    pub fn as_camera_intrinsic(&self) -> CameraIntrinsic {
        CameraIntrinsic {
            fx: self.fx,
            fy: self.fy,
            cx: self.cx,
            cy: self.cy,
        }
    }
}

/// Intrinsics expressed as fractions of the image width and height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedIntrinsics {
    /// Focal length divided by the image width.
    pub fx: f64,
    /// Focal length divided by the image height.
    pub fy: f64,
    /// Principal point x divided by the image width.
    pub cx: f64,
    /// Principal point y divided by the image height.
    pub cy: f64,
}

impl NormalizedIntrinsics {
    /// Scale back to pixels for an image of the given size.
    pub fn denormalize(&self, size: ImageSize) -> Intrinsics {
        let (w, h) = (size.width as f64, size.height as f64);
        Intrinsics {
            fx: self.fx * w,
            fy: self.fy * h,
            cx: self.cx * w,
            cy: self.cy * h,
            width: size.width,
            height: size.height,
        }
    }
}

/// The six planes of an off-axis perspective frustum.
///
/// `left`, `right`, `bottom` and `top` are measured on the near plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    /// Left plane coordinate.
    pub left: f64,
    /// Right plane coordinate.
    pub right: f64,
    /// Bottom plane coordinate.
    pub bottom: f64,
    /// Top plane coordinate.
    pub top: f64,
    /// Near plane distance.
    pub near: f64,
    /// Far plane distance.
    pub far: f64,
}

/// The axis along which to measure a field of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FovAxis {
    /// Horizontal field of view.
    Horizontal,
    /// Vertical field of view.
    Vertical,
}

#[inline]
fn at(m: &DMat4, row: usize, col: usize) -> f64 {
    m.col(col)[row]
}

/// Build a matrix from its rows.
pub(crate) fn mat4_from_rows(rows: [[f64; 4]; 4]) -> DMat4 {
    DMat4::from_cols_array_2d(&rows).transpose()
}

fn check_perspective(proj: &DMat4) -> Result<(), CameraError> {
    let m32 = at(proj, 3, 2);
    if (m32 + 1.0).abs() > 1e-12 {
        return Err(CameraError::InvalidProjectionKind(m32));
    }
    Ok(())
}

/// Compute the off-axis perspective projection matrix of a frustum.
///
/// # Errors
///
/// Returns [`CameraError::DegenerateFrustum`] unless `0 < near < far`,
/// `left != right`, `bottom != top` and every plane is finite.
///
/// # Example
///
/// ```
/// use arvis_3d::camera::{projection_from_frustum, Frustum};
///
/// let f = Frustum { left: -1.0, right: 1.0, bottom: -1.0, top: 1.0, near: 1.0, far: 10.0 };
/// let proj = projection_from_frustum(&f).unwrap();
/// assert_eq!(proj.z_axis.w, -1.0);
/// ```
pub fn projection_from_frustum(frustum: &Frustum) -> Result<DMat4, CameraError> {
    let Frustum {
        left: l,
        right: r,
        bottom: b,
        top: t,
        near: n,
        far: f,
    } = *frustum;

    if ![l, r, b, t, n, f].iter().all(|v| v.is_finite()) {
        return Err(CameraError::DegenerateFrustum("non-finite plane"));
    }
    if n <= 0.0 || f <= n {
        return Err(CameraError::DegenerateFrustum("requires 0 < near < far"));
    }
    if r == l || t == b {
        return Err(CameraError::DegenerateFrustum("zero width or height"));
    }

    Ok(mat4_from_rows([
        [2.0 * n / (r - l), 0.0, (r + l) / (r - l), 0.0],
        [0.0, 2.0 * n / (t - b), (t + b) / (t - b), 0.0],
        [0.0, 0.0, -(f + n) / (f - n), -2.0 * f * n / (f - n)],
        [0.0, 0.0, -1.0, 0.0],
    ]))
}

/// Recover the frustum planes of a perspective projection matrix.
pub fn frustum_from_projection(proj: &DMat4) -> Result<Frustum, CameraError> {
    check_perspective(proj)?;

    let (m00, m02) = (at(proj, 0, 0), at(proj, 0, 2));
    let (m11, m12) = (at(proj, 1, 1), at(proj, 1, 2));
    let (m22, m23) = (at(proj, 2, 2), at(proj, 2, 3));

    let near = m23 / (m22 - 1.0);
    let far = m23 / (m22 + 1.0);

    // width / height of the near plane window
    let x_diff = 2.0 * near / m00;
    let y_diff = 2.0 * near / m11;
    let x_plus = x_diff * m02;
    let y_plus = y_diff * m12;

    Ok(Frustum {
        left: 0.5 * (x_plus - x_diff),
        right: 0.5 * (x_plus + x_diff),
        bottom: 0.5 * (y_plus - y_diff),
        top: 0.5 * (y_plus + y_diff),
        near,
        far,
    })
}

/// Compute the projection matrix matching the pinhole intrinsics of an image.
///
/// # Arguments
///
/// * `intrinsics` - Pixel intrinsics, normalized internally by the image size.
/// * `near` - Near clip plane distance.
/// * `far` - Far clip plane distance.
pub fn projection_from_intrinsics(
    intrinsics: &Intrinsics,
    near: f64,
    far: f64,
) -> Result<DMat4, CameraError> {
    intrinsics.validate()?;
    let k = intrinsics.normalized();

    // the image y axis points down, the clip space y axis points up
    projection_from_frustum(&Frustum {
        left: -near / k.fx * k.cx,
        right: near / k.fx * (1.0 - k.cx),
        bottom: -near / k.fy * (1.0 - k.cy),
        top: near / k.fy * k.cy,
        near,
        far,
    })
}

/// Recover the normalized intrinsics (unit image) of a perspective projection matrix.
pub fn normalized_intrinsics_from_projection(
    proj: &DMat4,
) -> Result<NormalizedIntrinsics, CameraError> {
    check_perspective(proj)?;
    Ok(NormalizedIntrinsics {
        fx: 0.5 * at(proj, 0, 0),
        fy: 0.5 * at(proj, 1, 1),
        cx: 0.5 * (1.0 - at(proj, 0, 2)),
        cy: 0.5 * (1.0 + at(proj, 1, 2)),
    })
}

/// Recover pixel intrinsics from a perspective projection matrix.
///
/// # Arguments
///
/// * `proj` - A matrix produced by [`projection_from_intrinsics`] or an equivalent.
/// * `size` - The image size to express the intrinsics in.
///
/// # Errors
///
/// Returns [`CameraError::InvalidProjectionKind`] unless `proj[3][2] == -1`.
pub fn intrinsics_from_projection(proj: &DMat4, size: ImageSize) -> Result<Intrinsics, CameraError> {
    let intrinsics = normalized_intrinsics_from_projection(proj)?.denormalize(size);
    intrinsics.validate()?;
    Ok(intrinsics)
}

/// Approximate field of view of a projection matrix, in degrees.
///
/// Only exact for symmetric frustums without skew.
pub fn approximate_fov(proj: &DMat4, axis: FovAxis) -> f64 {
    let i = match axis {
        FovAxis::Horizontal => 0,
        FovAxis::Vertical => 1,
    };
    2.0 * 1.0f64.atan2(at(proj, i, i)).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};

    fn size(width: usize, height: usize) -> ImageSize {
        ImageSize { width, height }
    }

    #[test]
    fn test_projection_from_frustum_symmetric() -> Result<(), CameraError> {
        let proj = projection_from_frustum(&Frustum {
            left: -0.5,
            right: 0.5,
            bottom: -0.25,
            top: 0.25,
            near: 1.0,
            far: 100.0,
        })?;
        assert_relative_eq!(at(&proj, 0, 0), 2.0);
        assert_relative_eq!(at(&proj, 1, 1), 4.0);
        assert_relative_eq!(at(&proj, 0, 2), 0.0);
        assert_relative_eq!(at(&proj, 2, 2), -101.0 / 99.0);
        assert_relative_eq!(at(&proj, 2, 3), -200.0 / 99.0);
        assert_relative_eq!(at(&proj, 3, 2), -1.0);
        assert_relative_eq!(at(&proj, 3, 3), 0.0);
        Ok(())
    }

    #[test]
    fn test_projection_from_frustum_rejects_degenerate() {
        let base = Frustum {
            left: -1.0,
            right: 1.0,
            bottom: -1.0,
            top: 1.0,
            near: 1.0,
            far: 10.0,
        };
        for frustum in [
            Frustum { near: 0.0, ..base },
            Frustum { far: 0.5, ..base },
            Frustum { right: -1.0, ..base },
            Frustum { top: -1.0, ..base },
            Frustum {
                left: f64::NAN,
                ..base
            },
        ] {
            assert!(matches!(
                projection_from_frustum(&frustum),
                Err(CameraError::DegenerateFrustum(_))
            ));
        }
    }

    #[test]
    fn test_frustum_roundtrip() -> Result<(), CameraError> {
        let frustum = Frustum {
            left: -0.3,
            right: 0.7,
            bottom: -0.2,
            top: 0.4,
            near: 0.5,
            far: 50.0,
        };
        let back = frustum_from_projection(&projection_from_frustum(&frustum)?)?;
        assert_relative_eq!(back.left, frustum.left, epsilon = 1e-9);
        assert_relative_eq!(back.right, frustum.right, epsilon = 1e-9);
        assert_relative_eq!(back.bottom, frustum.bottom, epsilon = 1e-9);
        assert_relative_eq!(back.top, frustum.top, epsilon = 1e-9);
        assert_relative_eq!(back.near, frustum.near, epsilon = 1e-9);
        assert_relative_eq!(back.far, frustum.far, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_intrinsics_roundtrip_random() -> Result<(), CameraError> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let width = rng.random_range(64..4096);
            let height = rng.random_range(64..4096);
            let k = Intrinsics::new(
                rng.random_range(50.0..5000.0),
                rng.random_range(50.0..5000.0),
                rng.random_range(0.0..width as f64),
                rng.random_range(0.0..height as f64),
                size(width, height),
            )?;
            let near = rng.random_range(0.001..1.0);
            let far = near + rng.random_range(1.0..1000.0);

            let proj = projection_from_intrinsics(&k, near, far)?;
            let back = intrinsics_from_projection(&proj, k.size())?;

            assert_relative_eq!(back.fx, k.fx, max_relative = 1e-4);
            assert_relative_eq!(back.fy, k.fy, max_relative = 1e-4);
            assert_relative_eq!(back.cx, k.cx, max_relative = 1e-4, epsilon = 1e-6);
            assert_relative_eq!(back.cy, k.cy, max_relative = 1e-4, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_intrinsics_y_flip() -> Result<(), CameraError> {
        // principal point in the upper part of the image shifts the window down
        let k = Intrinsics::new(500.0, 500.0, 320.0, 100.0, size(640, 480))?;
        let frustum = frustum_from_projection(&projection_from_intrinsics(&k, 1.0, 10.0)?)?;
        assert!(frustum.top < -frustum.bottom);
        assert_relative_eq!(frustum.top, 100.0 / 500.0, epsilon = 1e-12);
        assert_relative_eq!(frustum.bottom, -380.0 / 500.0, epsilon = 1e-12);
        assert_relative_eq!(frustum.left, -320.0 / 500.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_intrinsics_from_projection_rejects_orthographic() {
        let ortho = DMat4::orthographic_rh_gl(-1.0, 1.0, -1.0, 1.0, 0.1, 10.0);
        assert!(matches!(
            intrinsics_from_projection(&ortho, size(640, 480)),
            Err(CameraError::InvalidProjectionKind(_))
        ));
    }

    #[test]
    fn test_invalid_focal_length() {
        let res = Intrinsics::new(0.0, 500.0, 320.0, 240.0, size(640, 480));
        assert!(matches!(res, Err(CameraError::InvalidFocalLength { .. })));
    }

    #[test]
    fn test_approximate_fov() -> Result<(), CameraError> {
        // a 90 degree horizontal field of view: fx = width / 2
        let k = Intrinsics::new(320.0, 320.0, 320.0, 240.0, size(640, 480))?;
        let proj = projection_from_intrinsics(&k, DEFAULT_NEAR, DEFAULT_FAR)?;
        assert_relative_eq!(approximate_fov(&proj, FovAxis::Horizontal), 90.0, epsilon = 1e-9);
        let expected_v = 2.0 * (240.0f64 / 320.0).atan().to_degrees();
        assert_relative_eq!(approximate_fov(&proj, FovAxis::Vertical), expected_v, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_scaled_to() -> Result<(), CameraError> {
        let k = Intrinsics::new(500.0, 400.0, 320.0, 240.0, size(640, 480))?;
        let half = k.scaled_to(size(320, 240));
        assert_relative_eq!(half.fx, 250.0);
        assert_relative_eq!(half.cy, 120.0);
        Ok(())
    }
}
