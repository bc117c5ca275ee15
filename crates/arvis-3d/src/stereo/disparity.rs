use arvis_image::{Image, ImageError, ImageSize};
use arvis_imgproc::parallel;

/// Fixed-point scale of raw correlator output: 4 fractional bits.
pub const DISPARITY_SCALE: f32 = 16.0;

/// A dense disparity correlator on rectified grayscale images.
///
/// Implementations return disparities in fixed point, multiplied by
/// [`DISPARITY_SCALE`], or `None` when the pair cannot be matched.
pub trait StereoCorrelator: Send + Sync {
    /// Compute the left-view fixed-point disparity of a rectified pair.
    fn compute(&self, left: &Image<u8, 1>, right: &Image<u8, 1>) -> Option<Image<i16, 1>>;

    /// Raw value the correlator writes for unmatched pixels, if it has one.
    fn invalid_disparity(&self) -> Option<i16> {
        None
    }
}

/// Disparity in pixels for every pixel of the left rectified image.
#[derive(Debug, Clone, PartialEq)]
pub struct DisparityMap(Image<f32, 1>);

impl DisparityMap {
    /// Wrap a disparity image in pixels.
    pub fn new(image: Image<f32, 1>) -> Self {
        Self(image)
    }

    /// Convert raw fixed-point correlator output to pixels.
    pub fn from_fixed_point(raw: &Image<i16, 1>) -> Result<Self, ImageError> {
        Self::from_fixed_point_masked(raw, None)
    }

    /// Convert raw fixed-point output to pixels, with pixels equal to
    /// `invalid` set to NaN.
    pub fn from_fixed_point_masked(raw: &Image<i16, 1>, invalid: Option<i16>) -> Result<Self, ImageError> {
        let data = raw
            .as_slice()
            .iter()
            .map(|&v| {
                if Some(v) == invalid {
                    f32::NAN
                } else {
                    v as f32 / DISPARITY_SCALE
                }
            })
            .collect();
        Ok(Self(Image::new(raw.size(), data)?))
    }

    /// The disparity image.
    pub fn as_image(&self) -> &Image<f32, 1> {
        &self.0
    }

    /// Consume the map into its image.
    pub fn into_image(self) -> Image<f32, 1> {
        self.0
    }

    /// Size of the map.
    pub fn size(&self) -> ImageSize {
        self.0.size()
    }

    /// Disparity at a pixel.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        self.0.pixel(x, y).map(|p| p[0])
    }
}

/// Run a correlator and convert its output to pixel disparities.
///
/// Unmatched pixels reported by [`StereoCorrelator::invalid_disparity`] become
/// NaN, so they never reproject to a point.
///
/// Returns `None` when the images differ in size or the correlator fails.
pub fn compute_disparity(
    correlator: &dyn StereoCorrelator,
    left: &Image<u8, 1>,
    right: &Image<u8, 1>,
) -> Option<DisparityMap> {
    if left.size() != right.size() {
        log::warn!(
            "rectified images differ in size: {} vs {}",
            left.size(),
            right.size()
        );
        return None;
    }
    let raw = correlator.compute(left, right)?;
    if raw.size() != left.size() {
        log::warn!("correlator output has size {}, expected {}", raw.size(), left.size());
        return None;
    }
    DisparityMap::from_fixed_point_masked(&raw, correlator.invalid_disparity()).ok()
}

/// Sum-of-absolute-differences block matcher.
///
/// A plain reference correlator: every pixel tests every disparity in
/// `[min_disparity, min_disparity + num_disparities)` over a square window.
/// Unmatched pixels get `(min_disparity − 1)·16`.
#[derive(Debug, Clone)]
pub struct BlockMatcher {
    /// Smallest disparity searched.
    pub min_disparity: i32,
    /// Number of disparities searched.
    pub num_disparities: usize,
    /// Odd window side length.
    pub block_size: usize,
    /// Margin in percent by which the best cost must beat the other candidates.
    pub uniqueness_ratio: u32,
}

impl Default for BlockMatcher {
    fn default() -> Self {
        Self {
            min_disparity: 0,
            num_disparities: 64,
            block_size: 9,
            uniqueness_ratio: 10,
        }
    }
}

impl BlockMatcher {
    /// Create a matcher searching `num_disparities` from zero.
    pub fn new(num_disparities: usize, block_size: usize) -> Self {
        Self {
            num_disparities,
            block_size: block_size | 1,
            ..Default::default()
        }
    }

    /// Fixed-point value of unmatched pixels, `None` when the searched range
    /// does not fit the output type.
    fn fixed_point_range(&self) -> Option<(i16, i16)> {
        let scale = DISPARITY_SCALE as i32;
        let max_d = self
            .min_disparity
            .checked_add(i32::try_from(self.num_disparities).ok()?)?;
        let invalid = i16::try_from(self.min_disparity.checked_sub(1)?.checked_mul(scale)?).ok()?;
        let max = i16::try_from(max_d.checked_mul(scale)?).ok()?;
        Some((invalid, max))
    }

    fn sad(left: &[u8], right: &[u8], cols: usize, x: usize, xr: usize, y: usize, half: usize) -> u32 {
        let mut acc = 0u32;
        for yy in (y - half)..=(y + half) {
            let row = yy * cols;
            let l = &left[row + x - half..=row + x + half];
            let r = &right[row + xr - half..=row + xr + half];
            acc += l
                .iter()
                .zip(r)
                .map(|(&a, &b)| (a as i32 - b as i32).unsigned_abs())
                .sum::<u32>();
        }
        acc
    }
}

impl StereoCorrelator for BlockMatcher {
    fn compute(&self, left: &Image<u8, 1>, right: &Image<u8, 1>) -> Option<Image<i16, 1>> {
        if left.size() != right.size() || self.num_disparities == 0 || self.block_size == 0 {
            return None;
        }
        let Some((invalid, _)) = self.fixed_point_range() else {
            log::warn!(
                "disparity range [{}, {}) does not fit 16 bit fixed point",
                self.min_disparity,
                self.min_disparity as i64 + self.num_disparities as i64
            );
            return None;
        };
        let mut dst = Image::<i16, 1>::from_size_val(left.size(), invalid).ok()?;

        let half = self.block_size / 2;
        let (cols, rows) = (left.cols(), left.rows());
        let (l, r) = (left.as_slice(), right.as_slice());

        parallel::par_iter_rows_indexed_init(
            &mut dst,
            || Vec::<(i32, u32)>::with_capacity(self.num_disparities),
            |costs, x, y, px| {
                if y < half || y + half >= rows || x < half || x + half >= cols {
                    return;
                }

                costs.clear();
                for k in 0..self.num_disparities as i32 {
                    let d = self.min_disparity + k;
                    let xr = x as i64 - d as i64;
                    if xr < half as i64 || xr as usize + half >= cols {
                        continue;
                    }
                    costs.push((d, Self::sad(l, r, cols, x, xr as usize, y, half)));
                }

                // uniqueness needs a candidate beyond the best and its neighbors
                if costs.len() < 3 {
                    return;
                }
                let Some(&(best_d, best)) = costs.iter().min_by_key(|(_, c)| *c) else {
                    return;
                };
                let worst = costs.iter().map(|(_, c)| *c).max().unwrap_or(best);
                if worst == best {
                    // no texture in the window
                    return;
                }

                let margin = best as u64 * (100 + self.uniqueness_ratio as u64);
                let ambiguous = costs
                    .iter()
                    .any(|&(d, c)| (d - best_d).abs() > 1 && (c as u64) * 100 <= margin);
                if ambiguous {
                    return;
                }

                // parabola through the neighboring costs
                let cost_at = |d: i32| costs.iter().find(|(dd, _)| *dd == d).map(|(_, c)| *c as f32);
                let sub = match (cost_at(best_d - 1), cost_at(best_d + 1)) {
                    (Some(cm), Some(cp)) => {
                        let denom = cm + cp - 2.0 * best as f32;
                        if denom > 0.0 {
                            (cm - cp) / (2.0 * denom)
                        } else {
                            0.0
                        }
                    }
                    _ => 0.0,
                };

                px[0] = ((best_d as f32 + sub) * DISPARITY_SCALE).round() as i16;
            },
        );

        Some(dst)
    }

    fn invalid_disparity(&self) -> Option<i16> {
        self.fixed_point_range().map(|(invalid, _)| invalid)
    }
}
