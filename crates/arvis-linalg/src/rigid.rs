//! Rigid body transforms (rotation + translation).
//!
//! A [`RigidTransform`] named `dst_from_src` maps points expressed in the `src`
//! frame into the `dst` frame: `p_dst = R · p_src + t`.

use glam::{DMat3, DMat4, DQuat, DVec3, DVec4};

use crate::svd::nearest_rotation;
use crate::LinalgError;

/// A rotation matrix and a translation vector describing a proper rigid motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// Orthonormal rotation matrix with determinant +1.
    pub rotation: DMat3,
    /// Translation vector.
    pub translation: DVec3,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidTransform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rotation: DMat3::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create a transform from a rotation matrix and a translation.
    pub fn new(rotation: DMat3, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Create a pure rotation.
    pub fn from_rotation(rotation: DMat3) -> Self {
        Self::new(rotation, DVec3::ZERO)
    }

    /// Create a pure translation.
    pub fn from_translation(translation: DVec3) -> Self {
        Self::new(DMat3::IDENTITY, translation)
    }

    /// Create a transform from a unit quaternion and a translation.
    pub fn from_quat(rotation: DQuat, translation: DVec3) -> Self {
        Self::new(DMat3::from_quat(rotation), translation)
    }

    /// The algebraic inverse `(Rᵀ, −Rᵀ·t)`.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        let translation = -(rotation * self.translation);
        Self {
            rotation,
            translation,
        }
    }

    /// Compose two transforms, `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &RigidTransform) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.translation + self.rotation * other.translation,
        }
    }

    /// Apply the transform to a single point.
    #[inline]
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// Transform a set of points into `dst_points`, replacing its contents.
    ///
    /// The buffer keeps its allocation across calls.
    pub fn transform_points(&self, src_points: &[DVec3], dst_points: &mut Vec<DVec3>) {
        dst_points.clear();
        dst_points.extend(src_points.iter().map(|p| self.transform_point(*p)));
    }

    /// Homogeneous 4x4 matrix representation.
    pub fn to_mat4(&self) -> DMat4 {
        DMat4::from_cols(
            self.rotation.x_axis.extend(0.0),
            self.rotation.y_axis.extend(0.0),
            self.rotation.z_axis.extend(0.0),
            DVec4::new(self.translation.x, self.translation.y, self.translation.z, 1.0),
        )
    }

    /// Build a transform from the upper 3x4 block of a homogeneous matrix.
    ///
    /// The bottom row is ignored.
    pub fn from_mat4(m: &DMat4) -> Self {
        Self {
            rotation: DMat3::from_mat4(*m),
            translation: m.w_axis.truncate(),
        }
    }

    /// The rotation as a unit quaternion.
    pub fn quaternion(&self) -> DQuat {
        crate::rotation::rotation_matrix_to_quaternion(&self.rotation)
    }

    /// Check that the rotation block is orthonormal with determinant +1.
    pub fn is_valid(&self, tol: f64) -> bool {
        let ortho = (self.rotation.transpose() * self.rotation).abs_diff_eq(DMat3::IDENTITY, tol);
        let det = (self.rotation.determinant() - 1.0).abs() <= tol;
        ortho && det && self.translation.is_finite()
    }

    /// Element-wise comparison of rotation and translation.
    pub fn abs_diff_eq(&self, other: &RigidTransform, max_abs_diff: f64) -> bool {
        self.rotation.abs_diff_eq(other.rotation, max_abs_diff)
            && self.translation.abs_diff_eq(other.translation, max_abs_diff)
    }
}

/// Kabsch alignment without scale: the rigid transform minimizing
/// `Σ ‖dst_i − (R·src_i + t)‖²`.
///
/// # Errors
///
/// Returns [`LinalgError::MismatchedInputLengths`] for empty or mismatched
/// inputs and propagates failures of the SVD primitive.
pub fn fit_rigid(src: &[DVec3], dst: &[DVec3]) -> Result<RigidTransform, LinalgError> {
    if src.is_empty() || src.len() != dst.len() {
        return Err(LinalgError::MismatchedInputLengths(src.len(), dst.len()));
    }
    let n = src.len() as f64;
    let mu_s = src.iter().copied().sum::<DVec3>() / n;
    let mu_d = dst.iter().copied().sum::<DVec3>() / n;

    // H = Σ (dst_i − μd)(src_i − μs)ᵀ
    let mut h = DMat3::ZERO;
    for (s, d) in src.iter().zip(dst) {
        let sc = *s - mu_s;
        let dc = *d - mu_d;
        h += DMat3::from_cols(dc * sc.x, dc * sc.y, dc * sc.z);
    }

    let rotation = nearest_rotation(&h)?;
    Ok(RigidTransform::new(rotation, mu_d - rotation * mu_s))
}
