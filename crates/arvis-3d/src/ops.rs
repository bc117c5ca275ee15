use arvis_imgproc::calibration::distortion::{distort_normalized, PolynomialDistortion};
use arvis_linalg::RigidTransform;
use glam::{DVec2, DVec3};

use crate::camera::Intrinsics;

/// Compute the centroid of a set of points.
pub fn compute_centroid(points: &[DVec3]) -> DVec3 {
    if points.is_empty() {
        return DVec3::ZERO;
    }
    points.iter().copied().sum::<DVec3>() / points.len() as f64
}

/// Project a single point given in the camera frame onto the image plane.
///
/// Returns `None` for points on or behind the camera plane.
pub fn project_point(
    point_in_camera: DVec3,
    intrinsics: &Intrinsics,
    distortion: Option<&PolynomialDistortion>,
) -> Option<DVec2> {
    if point_in_camera.z <= f64::EPSILON {
        return None;
    }
    let x = point_in_camera.x / point_in_camera.z;
    let y = point_in_camera.y / point_in_camera.z;
    let (x, y) = match distortion {
        Some(d) => distort_normalized(x, y, d),
        None => (x, y),
    };
    Some(DVec2::new(
        intrinsics.fx * x + intrinsics.cx,
        intrinsics.fy * y + intrinsics.cy,
    ))
}

/// Project 3D points expressed in an object frame onto the image plane.
///
/// # Arguments
///
/// * `points` - The points in the object frame.
/// * `camera_from_object` - The pose of the object in the camera frame.
/// * `intrinsics` - The camera intrinsics.
/// * `distortion` - Optional lens distortion.
///
/// # Returns
///
/// One entry per point, `None` when the point is behind the camera.
pub fn project_points(
    points: &[DVec3],
    camera_from_object: &RigidTransform,
    intrinsics: &Intrinsics,
    distortion: Option<&PolynomialDistortion>,
) -> Vec<Option<DVec2>> {
    points
        .iter()
        .map(|&p| project_point(camera_from_object.transform_point(p), intrinsics, distortion))
        .collect()
}

/// Root-mean-square reprojection error in pixels.
///
/// Points behind the camera count with an infinite error.
pub fn reprojection_rmse(
    object_points: &[DVec3],
    image_points: &[DVec2],
    camera_from_object: &RigidTransform,
    intrinsics: &Intrinsics,
) -> f64 {
    if object_points.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = object_points
        .iter()
        .zip(image_points)
        .map(|(&p, &uv)| {
            match project_point(camera_from_object.transform_point(p), intrinsics, None) {
                Some(proj) => proj.distance_squared(uv),
                None => f64::INFINITY,
            }
        })
        .sum();
    (sum_sq / object_points.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use arvis_image::ImageSize;
    use glam::DMat3;

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
            width: 640,
            height: 480,
        }
    }

    #[test]
    fn test_compute_centroid() {
        let pts = [
            DVec3::new(1.0, 2.0, 3.0),
            DVec3::new(4.0, 5.0, 6.0),
            DVec3::new(7.0, 8.0, 9.0),
        ];
        assert_eq!(compute_centroid(&pts), DVec3::new(4.0, 5.0, 6.0));
        assert_eq!(compute_centroid(&[]), DVec3::ZERO);
    }

    #[test]
    fn test_project_points_no_distortion() {
        let points = [DVec3::new(0.0, 0.0, 2.0), DVec3::new(0.2, -0.1, 1.0)];
        let projected = project_points(&points, &RigidTransform::IDENTITY, &intrinsics(), None);
        assert_eq!(projected[0], Some(DVec2::new(320.0, 240.0)));
        let p1 = projected[1].unwrap();
        assert_relative_eq!(p1.x, 420.0, epsilon = 1e-9);
        assert_relative_eq!(p1.y, 190.0, epsilon = 1e-9);
    }

    #[test]
    fn test_project_points_behind_camera() {
        let points = [DVec3::new(0.0, 0.0, -1.0)];
        let projected = project_points(&points, &RigidTransform::IDENTITY, &intrinsics(), None);
        assert_eq!(projected[0], None);
    }

    #[test]
    fn test_project_points_with_rotation() {
        // half turn about y brings a point behind the camera in front of it
        let pose = RigidTransform::from_rotation(DMat3::from_rotation_y(std::f64::consts::PI));
        let projected = project_points(&[DVec3::new(0.0, 0.0, -1.0)], &pose, &intrinsics(), None);
        let p = projected[0].unwrap();
        assert_relative_eq!(p.x, 320.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 240.0, epsilon = 1e-9);
    }

    #[test]
    fn test_project_points_with_distortion() {
        let distortion = PolynomialDistortion {
            k1: 0.1,
            ..Default::default()
        };
        let p = project_point(DVec3::new(0.5, 0.0, 1.0), &intrinsics(), Some(&distortion)).unwrap();
        assert_relative_eq!(p.x, 320.0 + 500.0 * 0.5 * 1.025, epsilon = 1e-9);
    }

    #[test]
    fn test_reprojection_rmse() {
        let k = Intrinsics::new(500.0, 500.0, 320.0, 240.0, ImageSize { width: 640, height: 480 })
            .unwrap();
        let pose = RigidTransform::from_translation(DVec3::new(0.0, 0.0, 2.0));
        let obj = [DVec3::ZERO, DVec3::new(0.1, 0.0, 0.0)];
        let img = [DVec2::new(323.0, 244.0), DVec2::new(345.0, 240.0)];
        // errors: 5 px and 0 px
        assert_relative_eq!(reprojection_rmse(&obj, &img, &pose, &k), (12.5f64).sqrt());
    }
}
