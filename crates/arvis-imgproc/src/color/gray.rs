use crate::parallel;
use arvis_image::{Image, ImageError};

#[inline]
fn luma_u8(r: u8, g: u8, b: u8) -> u8 {
    ((r as u16 * 77 + g as u16 * 150 + b as u16 * 29) >> 8) as u8
}

/// Convert an RGB8 image to grayscale using the formula:
///
/// Y = (77 * R + 150 * G + 29 * B) >> 8
///
/// Precondition: the input and output images must have the same size.
pub fn gray_from_rgb_u8(src: &Image<u8, 3>, dst: &mut Image<u8, 1>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(src.size(), dst.size()));
    }

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        dst_pixel[0] = luma_u8(src_pixel[0], src_pixel[1], src_pixel[2]);
    });

    Ok(())
}

/// Convert an RGBA8 image to grayscale, ignoring the alpha channel.
///
/// # Example
///
/// ```
/// use arvis_image::{Image, ImageSize};
/// use arvis_imgproc::color::gray_from_rgba_u8;
///
/// let image = Image::<u8, 4>::from_size_val(ImageSize { width: 4, height: 5 }, 255).unwrap();
/// let mut gray = Image::<u8, 1>::from_size_val(image.size(), 0).unwrap();
///
/// gray_from_rgba_u8(&image, &mut gray).unwrap();
/// assert_eq!(gray.as_slice()[0], 255);
/// ```
pub fn gray_from_rgba_u8(src: &Image<u8, 4>, dst: &mut Image<u8, 1>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(src.size(), dst.size()));
    }

    parallel::par_iter_rows(src, dst, |src_pixel, dst_pixel| {
        dst_pixel[0] = luma_u8(src_pixel[0], src_pixel[1], src_pixel[2]);
    });

    Ok(())
}
