use arvis_image::{Image, ImageError};
use arvis_imgproc::parallel;
use glam::{DMat4, DVec4};

use super::{DisparityMap, StereoError};
use crate::camera::mat4_from_rows;
use crate::pointcloud::PointCloudFrame;

/// Disparity-to-depth matrix of a rectified pair.
///
/// `Q = [[1,0,0,−cx],[0,1,0,−cy],[0,0,0,f],[0,0,−1/tx,0]]`, where `tx` is the
/// x translation of the right rectified camera. Both rectified cameras must
/// share the principal point, so the last entry `(cx − cx')/tx` is zero.
pub fn reprojection_matrix(f: f64, cx: f64, cy: f64, tx: f64) -> DMat4 {
    mat4_from_rows([
        [1.0, 0.0, 0.0, -cx],
        [0.0, 1.0, 0.0, -cy],
        [0.0, 0.0, 0.0, f],
        [0.0, 0.0, -1.0 / tx, 0.0],
    ])
}

/// Reproject every disparity pixel to a 3D point in the left rectified frame.
///
/// Pixels whose homogeneous weight vanishes (zero disparity) come out as
/// non-finite values and are expected to be filtered by the consumer.
pub fn reproject_to_3d(disparity: &DisparityMap, q: &DMat4) -> Result<Image<f32, 3>, ImageError> {
    let src = disparity.as_image();
    let mut dst = Image::<f32, 3>::from_size_val(src.size(), 0.0)?;
    let cols = src.cols();
    let data = src.as_slice();

    parallel::par_iter_rows_indexed(&mut dst, |x, y, pixel| {
        let d = data[y * cols + x] as f64;
        let h = *q * DVec4::new(x as f64, y as f64, d, 1.0);
        let inv_w = 1.0 / h.w;
        pixel[0] = (h.x * inv_w) as f32;
        pixel[1] = (h.y * inv_w) as f32;
        pixel[2] = (h.z * inv_w) as f32;
    });

    Ok(dst)
}

/// Collect the valid points of a reprojected image with their colors.
///
/// A point is valid when all its coordinates are finite and its depth is
/// positive. The color is taken from the same pixel of the left rectified
/// RGBA image. The frame is cleared first.
///
/// # Returns
///
/// The number of valid points, also stored in the frame.
pub fn assemble_point_cloud(
    points: &Image<f32, 3>,
    colors: &Image<u8, 4>,
    frame: &mut PointCloudFrame,
) -> Result<usize, StereoError> {
    if points.size() != colors.size() {
        return Err(ImageError::InvalidImageSize(points.size(), colors.size()).into());
    }
    if frame.capacity() < points.size().area() {
        return Err(ImageError::InvalidChannelShape(frame.capacity(), points.size().area()).into());
    }

    frame.clear();
    for (p, c) in points
        .as_slice()
        .chunks_exact(3)
        .zip(colors.as_slice().chunks_exact(4))
    {
        if p.iter().all(|v| v.is_finite()) && p[2] > 0.0 {
            frame.push([p[0], p[1], p[2]], [c[0], c[1], c[2]]);
        }
    }

    log::trace!("assembled {} of {} points", frame.len(), points.size().area());
    Ok(frame.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use arvis_image::ImageSize;

    #[test]
    fn test_reprojection_matrix_depth() {
        // right camera 0.1 m to the right: tx = -0.1
        let q = reprojection_matrix(400.0, 160.0, 120.0, -0.1);
        let h = q * DVec4::new(200.0, 120.0, 8.0, 1.0);
        let p = h.truncate() / h.w;
        // z = f·b/d
        assert_relative_eq!(p.z, 400.0 * 0.1 / 8.0, epsilon = 1e-12);
        assert_relative_eq!(p.x, 40.0 * p.z / 400.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reproject_and_assemble() -> Result<(), StereoError> {
        let size = ImageSize {
            width: 3,
            height: 2,
        };
        // zero disparity at (1, 0), negative at (2, 1)
        let disp = DisparityMap::new(Image::new(
            size,
            vec![4.0, 0.0, 4.0, 8.0, 8.0, -2.0],
        )?);
        let q = reprojection_matrix(100.0, 1.0, 1.0, -0.1);
        let xyz = reproject_to_3d(&disp, &q)?;

        let zero = xyz.pixel(1, 0).ok_or(ImageError::PixelIndexOutOfBounds(1, 0, 3, 2))?;
        assert!(!zero.iter().all(|v| v.is_finite()));
        assert_relative_eq!(xyz.get_pixel(0, 0, 2)?, 100.0 * 0.1 / 4.0, epsilon = 1e-5);

        let colors = Image::<u8, 4>::new(size, (0..24).collect())?;
        let mut frame = PointCloudFrame::with_image_size(size);
        let n = assemble_point_cloud(&xyz, &colors, &mut frame)?;
        assert_eq!(n, 4);
        assert_eq!(frame.len(), 4);
        assert!(frame.positions().iter().all(|p| p[2] > 0.0));
        assert_eq!(frame.colors()[0], [0, 1, 2]);
        assert_eq!(frame.colors()[1], [8, 9, 10]);
        Ok(())
    }

    #[test]
    fn test_assemble_size_mismatch() -> Result<(), ImageError> {
        let xyz = Image::<f32, 3>::from_size_val([2, 2].into(), 1.0)?;
        let colors = Image::<u8, 4>::from_size_val([3, 2].into(), 0)?;
        let mut frame = PointCloudFrame::with_capacity(4);
        assert!(matches!(
            assemble_point_cloud(&xyz, &colors, &mut frame),
            Err(StereoError::Image(ImageError::InvalidImageSize(_, _)))
        ));
        Ok(())
    }
}
