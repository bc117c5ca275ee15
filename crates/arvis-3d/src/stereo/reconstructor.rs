use arvis_image::{Image, ImageSize};
use arvis_imgproc::color::gray_from_rgba_u8;

use super::{
    assemble_point_cloud, compute_disparity, compute_rectification_maps, rectify, reproject_to_3d,
    DisparityMap, RectificationMaps, StereoCorrelator, StereoError, StereoRig,
};
use crate::pointcloud::PointCloudFrame;

/// Intermediate products of one reconstructed frame pair.
#[derive(Debug, Clone)]
pub struct StereoFrame {
    /// Left rectified RGBA image.
    pub left_rectified: Image<u8, 4>,
    /// Right rectified RGBA image.
    pub right_rectified: Image<u8, 4>,
    /// Disparity of the pair, `None` when the correlator failed.
    pub disparity: Option<DisparityMap>,
}

/// Dense reconstruction of a calibrated stereo rig.
///
/// The rectification maps are built once at construction; [`Self::process_frame`]
/// runs the per-frame pipeline and fills a reusable [`PointCloudFrame`].
pub struct StereoReconstructor {
    rig: StereoRig,
    maps: RectificationMaps,
    correlator: Box<dyn StereoCorrelator>,
}

impl StereoReconstructor {
    /// Build the reconstructor and its rectification maps.
    pub fn new(
        rig: StereoRig,
        target_size: ImageSize,
        target_focal_length: f64,
        correlator: Box<dyn StereoCorrelator>,
    ) -> Result<Self, StereoError> {
        let maps = compute_rectification_maps(&rig, target_size, target_focal_length)?;
        Ok(Self {
            rig,
            maps,
            correlator,
        })
    }

    /// The calibrated rig.
    pub fn rig(&self) -> &StereoRig {
        &self.rig
    }

    /// The cached rectification maps.
    pub fn maps(&self) -> &RectificationMaps {
        &self.maps
    }

    /// Allocate a point cloud buffer matching the rectified image size.
    pub fn allocate_point_cloud(&self) -> PointCloudFrame {
        PointCloudFrame::with_image_size(self.maps.size())
    }

    /// Rectify a raw RGBA pair, compute its disparity and fill `cloud`.
    ///
    /// When the correlator yields no disparity the cloud is left empty.
    pub fn process_frame(
        &self,
        left: &Image<u8, 4>,
        right: &Image<u8, 4>,
        cloud: &mut PointCloudFrame,
    ) -> Result<StereoFrame, StereoError> {
        let expected = self.rig.image_size();
        if left.size() != expected {
            return Err(StereoError::ImageSizeMismatch(expected, left.size()));
        }
        if right.size() != expected {
            return Err(StereoError::ImageSizeMismatch(expected, right.size()));
        }

        let m = &self.maps;
        let left_rectified = rectify(left, &m.left_x, &m.left_y)?;
        let right_rectified = rectify(right, &m.right_x, &m.right_y)?;

        let mut left_gray = Image::<u8, 1>::from_size_val(m.size(), 0)?;
        let mut right_gray = Image::<u8, 1>::from_size_val(m.size(), 0)?;
        gray_from_rgba_u8(&left_rectified, &mut left_gray)?;
        gray_from_rgba_u8(&right_rectified, &mut right_gray)?;

        cloud.clear();
        let disparity = compute_disparity(self.correlator.as_ref(), &left_gray, &right_gray);
        match &disparity {
            Some(disp) => {
                let xyz = reproject_to_3d(disp, &m.q)?;
                let n = assemble_point_cloud(&xyz, &left_rectified, cloud)?;
                log::debug!("stereo frame reconstructed with {n} points");
            }
            None => log::debug!("no disparity for the current frame"),
        }

        Ok(StereoFrame {
            left_rectified,
            right_rectified,
            disparity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::super::DISPARITY_SCALE;
    use super::*;
    use approx::assert_relative_eq;

    struct ConstantCorrelator(f32);

    impl StereoCorrelator for ConstantCorrelator {
        fn compute(&self, left: &Image<u8, 1>, _right: &Image<u8, 1>) -> Option<Image<i16, 1>> {
            Image::from_size_val(left.size(), (self.0 * DISPARITY_SCALE) as i16).ok()
        }
    }

    struct FailingCorrelator;

    impl StereoCorrelator for FailingCorrelator {
        fn compute(&self, _left: &Image<u8, 1>, _right: &Image<u8, 1>) -> Option<Image<i16, 1>> {
            None
        }
    }

    #[test]
    fn test_process_frame_constant_disparity() -> Result<(), StereoError> {
        let rig = parallel_rig();
        let size = rig.image_size();
        let recon = StereoReconstructor::new(rig, size, 400.0, Box::new(ConstantCorrelator(8.0)))?;
        let mut cloud = recon.allocate_point_cloud();

        let frame = Image::<u8, 4>::from_size_val(size, 200)?;
        let out = recon.process_frame(&frame, &frame, &mut cloud)?;
        assert!(out.disparity.is_some());
        assert_eq!(cloud.len(), size.area());
        // z = f·b/d
        for p in cloud.positions() {
            assert_relative_eq!(p[2], 400.0 * 0.1 / 8.0, epsilon = 1e-4);
        }
        Ok(())
    }

    #[test]
    fn test_process_frame_without_disparity() -> Result<(), StereoError> {
        let rig = parallel_rig();
        let size = rig.image_size();
        let recon = StereoReconstructor::new(rig, size, 400.0, Box::new(FailingCorrelator))?;
        let mut cloud = recon.allocate_point_cloud();
        cloud.push([0.0, 0.0, 1.0], [0, 0, 0]);

        let frame = Image::<u8, 4>::from_size_val(size, 10)?;
        let out = recon.process_frame(&frame, &frame, &mut cloud)?;
        assert!(out.disparity.is_none());
        assert!(cloud.is_empty());
        Ok(())
    }

    #[test]
    fn test_process_frame_size_mismatch() -> Result<(), StereoError> {
        let rig = parallel_rig();
        let size = rig.image_size();
        let recon = StereoReconstructor::new(rig, size, 400.0, Box::new(FailingCorrelator))?;
        let mut cloud = recon.allocate_point_cloud();
        let left = Image::<u8, 4>::from_size_val(size, 10)?;
        let right = Image::<u8, 4>::from_size_val([10, 10].into(), 10)?;
        assert!(matches!(
            recon.process_frame(&left, &right, &mut cloud),
            Err(StereoError::ImageSizeMismatch(_, _))
        ));
        Ok(())
    }

    /// Reports every pixel as unmatched with a positive sentinel.
    struct UnmatchedCorrelator;

    impl StereoCorrelator for UnmatchedCorrelator {
        fn compute(&self, left: &Image<u8, 1>, _right: &Image<u8, 1>) -> Option<Image<i16, 1>> {
            Image::from_size_val(left.size(), 48).ok()
        }

        fn invalid_disparity(&self) -> Option<i16> {
            Some(48)
        }
    }

    #[test]
    fn test_process_frame_skips_unmatched_pixels() -> Result<(), StereoError> {
        let rig = parallel_rig();
        let size = rig.image_size();
        let recon = StereoReconstructor::new(rig, size, 400.0, Box::new(UnmatchedCorrelator))?;
        let mut cloud = recon.allocate_point_cloud();

        let frame = Image::<u8, 4>::from_size_val(size, 90)?;
        let out = recon.process_frame(&frame, &frame, &mut cloud)?;
        assert!(out.disparity.is_some());
        assert!(cloud.is_empty());
        Ok(())
    }
}
