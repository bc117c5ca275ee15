use arvis_image::{Image, ImageDtype, ImageError, ImageSize};
use arvis_imgproc::calibration::distortion::generate_correction_map_polynomial;
use arvis_imgproc::interpolation::{remap, InterpolationMode};
use arvis_linalg::rotation::{matrix_to_rotation_vector, rotation_vector_to_matrix};
use glam::{DMat3, DMat4, DVec3};

use super::reproject::reprojection_matrix;
use super::{StereoError, StereoRig};
use crate::camera::Intrinsics;

/// Cached per-pixel lookup tables of a rectified stereo pair.
#[derive(Debug, Clone)]
pub struct RectificationMaps {
    /// Source x coordinate in the left raw image for every rectified pixel.
    pub left_x: Image<f32, 1>,
    /// Source y coordinate in the left raw image for every rectified pixel.
    pub left_y: Image<f32, 1>,
    /// Source x coordinate in the right raw image for every rectified pixel.
    pub right_x: Image<f32, 1>,
    /// Source y coordinate in the right raw image for every rectified pixel.
    pub right_y: Image<f32, 1>,
    /// Intrinsics shared by both rectified cameras.
    pub intrinsics: Intrinsics,
    /// Rotation from the left camera frame to the left rectified frame.
    pub rotation_left: DMat3,
    /// Rotation from the right camera frame to the right rectified frame.
    pub rotation_right: DMat3,
    /// x component of the right rectified camera translation.
    pub baseline: f64,
    /// Disparity-to-depth reprojection matrix.
    pub q: DMat4,
}

impl RectificationMaps {
    /// Size of the rectified images.
    pub fn size(&self) -> ImageSize {
        self.left_x.size()
    }
}

/// The rectifying rotations `(R1, R2)` and the rectified translation.
///
/// The relative rotation is split into two half rotations, then a common
/// rotation turns the baseline onto the x axis.
pub(crate) fn bouguet_rotations(rotation: &DMat3, translation: DVec3) -> (DMat3, DMat3, DVec3) {
    let om = matrix_to_rotation_vector(rotation);
    let r_r = rotation_vector_to_matrix(om * -0.5);
    let t = r_r * translation;

    let c = t.x;
    let nt = t.length();
    let uu = DVec3::new(if c > 0.0 { 1.0 } else { -1.0 }, 0.0, 0.0);

    let mut ww = t.cross(uu);
    let nw = ww.length();
    if nw > 0.0 {
        ww *= (c.abs() / nt).clamp(-1.0, 1.0).acos() / nw;
    }
    let w_r = rotation_vector_to_matrix(ww);

    let r1 = w_r * r_r.transpose();
    let r2 = w_r * r_r;
    (r1, r2, r2 * translation)
}

fn rows(m: &DMat3) -> [[f64; 3]; 3] {
    let t = m.transpose();
    [t.x_axis.to_array(), t.y_axis.to_array(), t.z_axis.to_array()]
}

/// Compute the rectification lookup tables of a stereo rig.
///
/// # Arguments
///
/// * `rig` - The calibrated stereo pair.
/// * `target_size` - Size of the rectified images.
/// * `target_focal_length` - Focal length in pixels of both rectified cameras.
///   The principal point is the center of `target_size`.
///
/// # Errors
///
/// Fails for a non-positive focal length or an empty target size.
pub fn compute_rectification_maps(
    rig: &StereoRig,
    target_size: ImageSize,
    target_focal_length: f64,
) -> Result<RectificationMaps, StereoError> {
    if !target_focal_length.is_finite() || target_focal_length <= 0.0 {
        return Err(StereoError::InvalidFocalLength(target_focal_length));
    }
    let intrinsics = Intrinsics::new(
        target_focal_length,
        target_focal_length,
        target_size.width as f64 * 0.5,
        target_size.height as f64 * 0.5,
        target_size,
    )?;

    let (r1, r2, t_new) = bouguet_rotations(&rig.rotation(), rig.translation());
    if t_new.x.abs() <= f64::EPSILON {
        return Err(StereoError::DegenerateBaseline(t_new.x));
    }

    let new_intrinsic = intrinsics.as_camera_intrinsic();
    let (left_x, left_y) = generate_correction_map_polynomial(
        &rig.left().as_camera_intrinsic(),
        rig.distortion_left(),
        &rows(&r1),
        &new_intrinsic,
        target_size,
    )?;
    let (right_x, right_y) = generate_correction_map_polynomial(
        &rig.right().as_camera_intrinsic(),
        rig.distortion_right(),
        &rows(&r2),
        &new_intrinsic,
        target_size,
    )?;

    log::debug!(
        "rectification maps {target_size} with f = {target_focal_length}, baseline {:.4}",
        t_new.x
    );

    Ok(RectificationMaps {
        left_x,
        left_y,
        right_x,
        right_y,
        q: reprojection_matrix(target_focal_length, intrinsics.cx, intrinsics.cy, t_new.x),
        intrinsics,
        rotation_left: r1,
        rotation_right: r2,
        baseline: t_new.x,
    })
}

/// Warp an image through a pair of lookup tables with bilinear sampling.
///
/// The output has the size of the maps; samples outside the source are zero.
pub fn rectify<T: ImageDtype, const C: usize>(
    src: &Image<T, C>,
    map_x: &Image<f32, 1>,
    map_y: &Image<f32, 1>,
) -> Result<Image<T, C>, ImageError> {
    let mut dst = Image::from_size_val(map_x.size(), T::default())?;
    remap(src, &mut dst, map_x, map_y, InterpolationMode::Bilinear)?;
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bouguet_parallel_rig_is_identity() {
        let (r1, r2, t) = bouguet_rotations(&DMat3::IDENTITY, DVec3::new(-0.1, 0.0, 0.0));
        assert!(r1.abs_diff_eq(DMat3::IDENTITY, 1e-12));
        assert!(r2.abs_diff_eq(DMat3::IDENTITY, 1e-12));
        assert!(t.abs_diff_eq(DVec3::new(-0.1, 0.0, 0.0), 1e-12));
    }

    #[test]
    fn test_bouguet_aligns_baseline_and_optical_axes() {
        let rotation = rotation_vector_to_matrix(DVec3::new(0.02, -0.05, 0.03));
        let translation = DVec3::new(-0.12, 0.01, 0.005);
        let (r1, r2, t) = bouguet_rotations(&rotation, translation);

        // baseline along x only
        assert_relative_eq!(t.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(t.z, 0.0, epsilon = 1e-12);
        assert_relative_eq!(t.x.abs(), translation.length(), epsilon = 1e-12);

        // both rectified frames share the orientation: R2·R = R1
        assert!((r2 * rotation).abs_diff_eq(r1, 1e-12));
        assert_relative_eq!(r1.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_maps_of_parallel_rig() -> Result<(), StereoError> {
        let rig = parallel_rig();
        let size = ImageSize {
            width: 320,
            height: 240,
        };
        let maps = compute_rectification_maps(&rig, size, 400.0)?;
        assert_eq!(maps.size(), size);
        // same intrinsics and no rotation give an identity lookup
        assert_relative_eq!(maps.left_x.get_pixel(10, 20, 0)?, 10.0, epsilon = 1e-4);
        assert_relative_eq!(maps.left_y.get_pixel(10, 20, 0)?, 20.0, epsilon = 1e-4);
        assert_relative_eq!(maps.right_x.get_pixel(300, 5, 0)?, 300.0, epsilon = 1e-4);
        assert_relative_eq!(maps.baseline, -0.1, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_maps_invalid_focal_length() {
        let res = compute_rectification_maps(&parallel_rig(), [320, 240].into(), 0.0);
        assert_eq!(res.unwrap_err(), StereoError::InvalidFocalLength(0.0));
    }

    #[test]
    fn test_rectify_identity_maps() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 4,
            height: 2,
        };
        let src = Image::<u8, 1>::new(size, (0..8).collect())?;
        let map_x = Image::new(size, vec![0.0, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0])?;
        let map_y = Image::new(size, vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0])?;
        let dst = rectify(&src, &map_x, &map_y)?;
        assert_eq!(dst.as_slice(), src.as_slice());

        let map_far = Image::from_size_val(size, 100.0f32)?;
        let dst = rectify(&src, &map_far, &map_far)?;
        assert!(dst.as_slice().iter().all(|&v| v == 0));
        Ok(())
    }
}
