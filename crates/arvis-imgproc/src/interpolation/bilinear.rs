use arvis_image::{Image, ImageDtype};

/// Kernel for bilinear interpolation
///
/// # Arguments
///
/// * `image` - The input image container.
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
/// * `c` - The channel of the pixel to interpolate.
///
/// PRECONDITION: `0 <= u <= cols - 1` and `0 <= v <= rows - 1`.
pub(crate) fn bilinear_interpolation<T: ImageDtype, const C: usize>(
    image: &Image<T, C>,
    u: f32,
    v: f32,
    c: usize,
) -> f32 {
    let (rows, cols) = (image.rows(), image.cols());

    let iu0 = (u.trunc() as usize).min(cols - 1);
    let iv0 = (v.trunc() as usize).min(rows - 1);

    let frac_u = u.fract();
    let frac_v = v.fract();

    let iu1 = if iu0 + 1 < cols { iu0 + 1 } else { iu0 };
    let iv1 = if iv0 + 1 < rows { iv0 + 1 } else { iv0 };

    let data = image.as_slice();
    let at = |iu: usize, iv: usize| -> f32 { data[(iv * cols + iu) * C + c].into() };

    let p00 = at(iu0, iv0);
    let p01 = at(iu1, iv0);
    let p10 = at(iu0, iv1);
    let p11 = at(iu1, iv1);

    p00 * (1.0 - frac_u) * (1.0 - frac_v)
        + p01 * frac_u * (1.0 - frac_v)
        + p10 * (1.0 - frac_u) * frac_v
        + p11 * frac_u * frac_v
}
