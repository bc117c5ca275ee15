use arvis_image::ImageSize;

/// A reusable point cloud buffer sized for one image.
///
/// The buffers are allocated once for `capacity` points; only the first
/// [`PointCloudFrame::len`] entries are valid after a frame was assembled.
#[derive(Debug, Clone)]
pub struct PointCloudFrame {
    // xyz positions in the left rectified camera frame.
    positions: Vec<[f32; 3]>,
    // rgb colors of the points.
    colors: Vec<[u8; 3]>,
    // number of valid entries.
    len: usize,
}

impl PointCloudFrame {
    /// Allocate a frame able to hold one point per pixel of an image of `size`.
    pub fn with_image_size(size: ImageSize) -> Self {
        Self::with_capacity(size.area())
    }

    /// Allocate a frame holding up to `capacity` points.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: vec![[0.0; 3]; capacity],
            colors: vec![[0; 3]; capacity],
            len: 0,
        }
    }

    /// Number of valid points.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the frame holds no valid point.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of points.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.positions.len()
    }

    /// The valid positions.
    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions[..self.len]
    }

    /// The valid colors.
    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors[..self.len]
    }

    /// Invalidate every point without releasing the buffers.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append a point. Returns `false` when the frame is full.
    pub fn push(&mut self, position: [f32; 3], color: [u8; 3]) -> bool {
        if self.len == self.capacity() {
            return false;
        }
        self.positions[self.len] = position;
        self.colors[self.len] = color;
        self.len += 1;
        true
    }

    /// Axis-aligned bounds of the valid points, `None` when empty.
    pub fn bounds(&self) -> Option<([f32; 3], [f32; 3])> {
        let first = *self.positions().first()?;
        Some(self.positions().iter().fold((first, first), |(lo, hi), p| {
            (
                [lo[0].min(p[0]), lo[1].min(p[1]), lo[2].min(p[2])],
                [hi[0].max(p[0]), hi[1].max(p[1]), hi[2].max(p[2])],
            )
        }))
    }
}
