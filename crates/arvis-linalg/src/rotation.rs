use glam::{DMat3, DQuat, DVec3};

/// Compute the rotation matrix from an axis and angle.
///
/// # Arguments
///
/// * `axis` - The axis of rotation, it does not need to be normalized.
/// * `angle` - The angle of rotation in radians.
///
/// # Returns
///
/// The rotation matrix.
///
/// Example:
///
/// ```
/// use glam::DVec3;
/// use arvis_linalg::rotation::axis_angle_to_rotation_matrix;
///
/// let rotation = axis_angle_to_rotation_matrix(DVec3::X, std::f64::consts::FRAC_PI_2).unwrap();
/// assert!((rotation.z_axis.y + 1.0).abs() < 1e-12);
/// ```
pub fn axis_angle_to_rotation_matrix(axis: DVec3, angle: f64) -> Result<DMat3, &'static str> {
    let magnitude = axis.length();
    if magnitude < 1e-10 {
        return Err("cannot compute rotation matrix from a zero vector");
    }
    let DVec3 { x, y, z } = axis / magnitude;

    let c = angle.cos();
    let s = angle.sin();
    let t = 1.0 - c;

    let m00 = c + x * x * t;
    let m11 = c + y * y * t;
    let m22 = c + z * z * t;

    let m10 = x * y * t + z * s;
    let m01 = x * y * t - z * s;

    let m20 = x * z * t - y * s;
    let m02 = x * z * t + y * s;

    let m21 = y * z * t + x * s;
    let m12 = y * z * t - x * s;

    Ok(DMat3::from_cols(
        DVec3::new(m00, m10, m20),
        DVec3::new(m01, m11, m21),
        DVec3::new(m02, m12, m22),
    ))
}

/// Rotation matrix from a rotation vector (axis scaled by angle, aka Rodrigues vector).
///
/// The zero vector maps to the identity.
pub fn rotation_vector_to_matrix(rvec: DVec3) -> DMat3 {
    DMat3::from_quat(DQuat::from_scaled_axis(rvec))
}

/// Rotation vector (axis scaled by angle) of a rotation matrix.
///
/// The angle of the result lies in `[0, π]`.
pub fn matrix_to_rotation_vector(rotation: &DMat3) -> DVec3 {
    let q = DQuat::from_mat3(rotation).normalize();
    // keep the shortest arc representation
    let q = if q.w < 0.0 { -q } else { q };
    q.to_scaled_axis()
}

/// Skew-symmetric cross product matrix `[v]×` such that `[v]× · w = v × w`.
pub fn skew(v: DVec3) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(0.0, v.z, -v.y),
        DVec3::new(-v.z, 0.0, v.x),
        DVec3::new(v.y, -v.x, 0.0),
    )
}

/// Unit quaternion of a rotation matrix.
pub fn rotation_matrix_to_quaternion(rotation: &DMat3) -> DQuat {
    DQuat::from_mat3(rotation).normalize()
}
