use super::CameraIntrinsic;
use crate::parallel;
use arvis_image::{Image, ImageError, ImageSize};

/// Represents the polynomial distortion parameters of a camera
///
/// Radial terms follow the rational model
/// `(1 + k1·r² + k2·r⁴ + k3·r⁶) / (1 + k4·r² + k5·r⁴ + k6·r⁶)`,
/// tangential terms are `p1` and `p2`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PolynomialDistortion {
    /// The first radial distortion coefficient
    pub k1: f64,
    /// The second radial distortion coefficient
    pub k2: f64,
    /// The third radial distortion coefficient
    pub k3: f64,
    /// The fourth radial distortion coefficient
    pub k4: f64,
    /// The fifth radial distortion coefficient
    pub k5: f64,
    /// The sixth radial distortion coefficient
    pub k6: f64,
    /// The first tangential distortion coefficient
    pub p1: f64,
    /// The second tangential distortion coefficient
    pub p2: f64,
}

impl PolynomialDistortion {
    /// Build the model from coefficients ordered `k1, k2, p1, p2[, k3[, k4, k5, k6]]`.
    ///
    /// Returns `None` for any other number of coefficients.
    pub fn from_coeffs(coeffs: &[f64]) -> Option<Self> {
        let at = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        match coeffs.len() {
            4 | 5 | 8 => Some(Self {
                k1: at(0),
                k2: at(1),
                p1: at(2),
                p2: at(3),
                k3: at(4),
                k4: at(5),
                k5: at(6),
                k6: at(7),
            }),
            _ => None,
        }
    }

    /// Whether every coefficient is zero.
    pub fn is_identity(&self) -> bool {
        [
            self.k1, self.k2, self.k3, self.k4, self.k5, self.k6, self.p1, self.p2,
        ]
        .iter()
        .all(|&k| k == 0.0)
    }
}

/// Distort a point given in normalized camera coordinates.
pub fn distort_normalized(x: f64, y: f64, distortion: &PolynomialDistortion) -> (f64, f64) {
    let (k1, k2, k3, k4, k5, k6, p1, p2) = (
        distortion.k1,
        distortion.k2,
        distortion.k3,
        distortion.k4,
        distortion.k5,
        distortion.k6,
        distortion.p1,
        distortion.p2,
    );

    // calculate the radial distance
    let r2 = x * x + y * y;

    // radial distortion
    let kr = (1.0 + k1 * r2 + k2 * r2 * r2 + k3 * r2 * r2 * r2)
        / (1.0 + k4 * r2 + k5 * r2 * r2 + k6 * r2 * r2 * r2);

    // tangential distortion
    let xd = x * kr + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
    let yd = y * kr + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

    (xd, yd)
}

/// Distort a point using polynomial distortion
///
/// # Arguments
///
/// * `x` - The x pixel coordinate of the point
/// * `y` - The y pixel coordinate of the point
/// * `intrinsic` - The intrinsic parameters of the camera
/// * `distortion` - The distortion parameters of the camera
///
/// # Returns
///
/// The distorted pixel coordinates.
pub fn distort_point_polynomial(
    x: f64,
    y: f64,
    intrinsic: &CameraIntrinsic,
    distortion: &PolynomialDistortion,
) -> (f64, f64) {
    let (fx, fy, cx, cy) = (intrinsic.fx, intrinsic.fy, intrinsic.cx, intrinsic.cy);
    let (xd, yd) = distort_normalized((x - cx) / fx, (y - cy) / fy, distortion);
    (fx * xd + cx, fy * yd + cy)
}

/// Generate the undistort and rectify maps of a camera.
///
/// Every destination pixel is back-projected with `new_intrinsic`, rotated from
/// the rectified frame into the camera frame with `rotationᵀ`, distorted and
/// projected with `intrinsic`. Rays that end up behind the camera map to
/// `(-1, -1)`, which resamples to zero.
///
/// # Arguments
///
/// * `intrinsic` - The intrinsic parameters of the source camera
/// * `distortion` - The distortion parameters of the source camera, if any
/// * `rotation` - Row-major rotation from the camera frame to the rectified frame
/// * `new_intrinsic` - The intrinsic parameters of the rectified camera
/// * `size` - The size of the rectified image
///
/// # Returns
///
/// * `map_x` - The x map for undistorting and rectifying the image
/// * `map_y` - The y map for undistorting and rectifying the image
pub fn generate_correction_map_polynomial(
    intrinsic: &CameraIntrinsic,
    distortion: Option<&PolynomialDistortion>,
    rotation: &[[f64; 3]; 3],
    new_intrinsic: &CameraIntrinsic,
    size: ImageSize,
) -> Result<(Image<f32, 1>, Image<f32, 1>), ImageError> {
    let mut maps = Image::<f32, 2>::from_size_val(size, 0.0)?;
    let r = rotation;

    parallel::par_iter_rows_indexed(&mut maps, |u, v, dst| {
        let xr = (u as f64 - new_intrinsic.cx) / new_intrinsic.fx;
        let yr = (v as f64 - new_intrinsic.cy) / new_intrinsic.fy;

        // ray in the camera frame: Rᵀ · (xr, yr, 1)
        let xc = r[0][0] * xr + r[1][0] * yr + r[2][0];
        let yc = r[0][1] * xr + r[1][1] * yr + r[2][1];
        let zc = r[0][2] * xr + r[1][2] * yr + r[2][2];

        if zc <= f64::EPSILON {
            dst[0] = -1.0;
            dst[1] = -1.0;
            return;
        }

        let (x, y) = (xc / zc, yc / zc);
        let (xd, yd) = match distortion {
            Some(d) => distort_normalized(x, y, d),
            None => (x, y),
        };

        dst[0] = (intrinsic.fx * xd + intrinsic.cx) as f32;
        dst[1] = (intrinsic.fy * yd + intrinsic.cy) as f32;
    });

    Ok((maps.channel(0)?, maps.channel(1)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: [[f64; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

    #[test]
    fn test_distort_point_polynomial_identity() {
        let intrinsic = CameraIntrinsic {
            fx: 577.5,
            fy: 652.9,
            cx: 320.0,
            cy: 240.0,
        };
        let (x, y) = distort_point_polynomial(
            100.0,
            20.0,
            &intrinsic,
            &PolynomialDistortion::default(),
        );
        approx::assert_relative_eq!(x, 100.0, epsilon = 1e-9);
        approx::assert_relative_eq!(y, 20.0, epsilon = 1e-9);
    }

    #[test]
    fn test_distort_normalized_radial() {
        let distortion = PolynomialDistortion {
            k1: 0.1,
            ..Default::default()
        };
        let (xd, yd) = distort_normalized(0.5, 0.0, &distortion);
        approx::assert_relative_eq!(xd, 0.5 * (1.0 + 0.1 * 0.25), epsilon = 1e-12);
        approx::assert_relative_eq!(yd, 0.0);
    }

    #[test]
    fn test_from_coeffs() {
        let d = PolynomialDistortion::from_coeffs(&[0.1, 0.2, 0.01, 0.02, 0.3]);
        assert_eq!(
            d,
            Some(PolynomialDistortion {
                k1: 0.1,
                k2: 0.2,
                p1: 0.01,
                p2: 0.02,
                k3: 0.3,
                ..Default::default()
            })
        );
        assert!(PolynomialDistortion::from_coeffs(&[0.1, 0.2]).is_none());
        assert!(PolynomialDistortion::default().is_identity());
    }

    #[test]
    fn test_identity_map() -> Result<(), ImageError> {
        let intrinsic = CameraIntrinsic {
            fx: 100.0,
            fy: 100.0,
            cx: 4.0,
            cy: 2.0,
        };
        let size = ImageSize {
            width: 8,
            height: 4,
        };
        let (map_x, map_y) =
            generate_correction_map_polynomial(&intrinsic, None, &IDENTITY, &intrinsic, size)?;
        assert_eq!(map_x.size(), size);
        for y in 0..4 {
            for x in 0..8 {
                approx::assert_relative_eq!(map_x.get_pixel(x, y, 0)?, x as f32, epsilon = 1e-4);
                approx::assert_relative_eq!(map_y.get_pixel(x, y, 0)?, y as f32, epsilon = 1e-4);
            }
        }
        Ok(())
    }

    #[test]
    fn test_map_behind_camera() -> Result<(), ImageError> {
        let intrinsic = CameraIntrinsic {
            fx: 1.0,
            fy: 1.0,
            cx: 0.0,
            cy: 0.0,
        };
        // half turn about the y axis sends every ray behind the camera
        let rotation = [[-1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, -1.0]];
        let (map_x, _) = generate_correction_map_polynomial(
            &intrinsic,
            None,
            &rotation,
            &intrinsic,
            [2, 2].into(),
        )?;
        assert!(map_x.as_slice().iter().all(|&v| v == -1.0));
        Ok(())
    }
}
