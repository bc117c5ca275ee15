use arvis_image::{Image, ImageDtype};

/// Kernel for nearest neighbor interpolation
///
/// PRECONDITION: `0 <= u <= cols - 1` and `0 <= v <= rows - 1`.
pub(crate) fn nearest_neighbor_interpolation<T: ImageDtype, const C: usize>(
    image: &Image<T, C>,
    u: f32,
    v: f32,
    c: usize,
) -> f32 {
    let (rows, cols) = (image.rows(), image.cols());

    let iu = (u.round() as usize).min(cols - 1);
    let iv = (v.round() as usize).min(rows - 1);

    image.as_slice()[(iv * cols + iu) * C + c].into()
}
