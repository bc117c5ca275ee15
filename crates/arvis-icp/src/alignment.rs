//! Closed-form rigid alignment of matched point pairs.

use arvis_linalg::{svd::svd3, RigidTransform};
use glam::{DMat3, DVec3};

/// Thresholds guarding the alignment solve.
///
/// The singular values of the cross-covariance are a cheap proxy for how well
/// the matched subsets constrain a rotation. Values outside
/// `[min_singular_value, max_singular_value]` reject the iteration. The bounds
/// are heuristic and depend on the scale of the data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcpConfig {
    /// Smallest accepted singular value magnitude.
    pub min_singular_value: f64,
    /// Largest accepted singular value magnitude.
    pub max_singular_value: f64,
    /// Minimum number of matched pairs.
    pub min_correspondences: usize,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            min_singular_value: 1e-3,
            max_singular_value: 1.0,
            min_correspondences: 3,
        }
    }
}

impl IcpConfig {
    /// Set the accepted singular value range.
    pub fn with_singular_value_range(mut self, min: f64, max: f64) -> Self {
        self.min_singular_value = min;
        self.max_singular_value = max;
        self
    }
}

/// Why an iteration did not produce a transform.
///
/// Rejection is an expected outcome for a bad frame, not an error.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum IcpRejection {
    /// Fewer matched pairs than [`IcpConfig::min_correspondences`].
    #[error("{found} correspondences, at least {required} required")]
    TooFewCorrespondences {
        /// Pairs available.
        found: usize,
        /// Pairs required.
        required: usize,
    },
    /// The matched subsets do not have the same length.
    #[error("matched subsets of different lengths {0} and {1}")]
    MismatchedLengths(usize, usize),
    /// The decomposition produced NaN or infinite singular values.
    #[error("non-finite singular values")]
    NonFiniteSingularValues,
    /// A singular value fell outside the accepted range.
    #[error("singular values {0} out of range")]
    SingularValueOutOfRange(DVec3),
}

/// A successful alignment of `B` onto `A`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcpIteration {
    /// The transform mapping points of `B` onto `A`.
    pub a_from_b: RigidTransform,
    /// Singular values of the cross-covariance, descending.
    pub singular_values: DVec3,
    /// Number of pairs used.
    pub num_correspondences: usize,
    /// Root mean squared residual of the pairs after alignment.
    pub rmse: f64,
}

/// Solve the rigid transform that best maps `b_matched` onto `a_matched`.
///
/// `a_matched[k]` and `b_matched[k]` form the k-th pair. The centroids are taken
/// over the matched subsets only.
///
/// # Returns
///
/// The transform `(R, t)` with `a ≈ R·b + t`, `t = μA − R·μB`. The rotation is
/// `V·Uᵀ` from the SVD of `H = Σ (b − μB)(a − μA)ᵀ`, with the sign of the last
/// column of `V` flipped when needed so that `det(R) = +1`.
pub fn solve_rigid_alignment(
    a_matched: &[DVec3],
    b_matched: &[DVec3],
    config: &IcpConfig,
) -> Result<IcpIteration, IcpRejection> {
    if a_matched.len() != b_matched.len() {
        return Err(IcpRejection::MismatchedLengths(
            a_matched.len(),
            b_matched.len(),
        ));
    }
    let n = a_matched.len();
    let required = config.min_correspondences.max(1);
    if n < required {
        return Err(IcpRejection::TooFewCorrespondences { found: n, required });
    }

    let mu_a = a_matched.iter().copied().sum::<DVec3>() / n as f64;
    let mu_b = b_matched.iter().copied().sum::<DVec3>() / n as f64;

    // H = Σ (b − μB)(a − μA)ᵀ, column k is (b − μB) · (a − μA)[k]
    let mut h = DMat3::ZERO;
    for (a, b) in a_matched.iter().zip(b_matched) {
        let ac = *a - mu_a;
        let bc = *b - mu_b;
        h += DMat3::from_cols(bc * ac.x, bc * ac.y, bc * ac.z);
    }

    let svd = svd3(&h).map_err(|_| IcpRejection::NonFiniteSingularValues)?;
    let s = *svd.s();
    if !s.is_finite() {
        return Err(IcpRejection::NonFiniteSingularValues);
    }
    let in_range = |v: f64| (config.min_singular_value..=config.max_singular_value).contains(&v.abs());
    if !(in_range(s.x) && in_range(s.y) && in_range(s.z)) {
        return Err(IcpRejection::SingularValueOutOfRange(s));
    }

    let u = *svd.u();
    let mut v = *svd.v();
    let mut rotation = v * u.transpose();
    if rotation.determinant() < 0.0 {
        v.z_axis = -v.z_axis;
        rotation = v * u.transpose();
    }
    let a_from_b = RigidTransform::new(rotation, mu_a - rotation * mu_b);

    let sq_sum: f64 = a_matched
        .iter()
        .zip(b_matched)
        .map(|(a, b)| a.distance_squared(a_from_b.transform_point(*b)))
        .sum();

    Ok(IcpIteration {
        a_from_b,
        singular_values: s,
        num_correspondences: n,
        rmse: (sq_sum / n as f64).sqrt(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use arvis_linalg::rotation::axis_angle_to_rotation_matrix;

    fn cube(scale: f64) -> Vec<DVec3> {
        let mut pts = Vec::new();
        for x in [-1.0, 1.0] {
            for y in [-1.0, 1.0] {
                for z in [-1.0, 1.0] {
                    pts.push(DVec3::new(x, 1.5 * y, 0.5 * z) * scale);
                }
            }
        }
        pts
    }

    #[test]
    fn test_alignment_exact() -> Result<(), Box<dyn std::error::Error>> {
        let a = cube(0.2);
        let t = RigidTransform::new(
            axis_angle_to_rotation_matrix(DVec3::new(1.0, 2.0, -0.5), 0.4)?,
            DVec3::new(0.1, -0.3, 0.05),
        );
        let b_from_a = t.inverse();
        let b: Vec<DVec3> = a.iter().map(|p| b_from_a.transform_point(*p)).collect();

        let it = solve_rigid_alignment(&a, &b, &IcpConfig::default())?;
        assert!(it.a_from_b.abs_diff_eq(&t, 1e-9));
        assert_relative_eq!(it.a_from_b.rotation.determinant(), 1.0, epsilon = 1e-12);
        assert_eq!(it.num_correspondences, 8);
        assert!(it.rmse < 1e-9);
        Ok(())
    }

    #[test]
    fn test_alignment_rejects_coplanar() {
        // all points on z = 0, the smallest singular value vanishes
        let a: Vec<DVec3> = [(0.0, 0.0), (0.3, 0.0), (0.0, 0.3), (0.3, 0.3), (0.15, 0.1)]
            .iter()
            .map(|(x, y)| DVec3::new(*x, *y, 0.0))
            .collect();
        let b: Vec<DVec3> = a.iter().map(|p| *p + DVec3::new(0.01, 0.02, 0.0)).collect();
        let res = solve_rigid_alignment(&a, &b, &IcpConfig::default());
        assert!(matches!(res, Err(IcpRejection::SingularValueOutOfRange(s)) if s.z < 1e-3));
    }

    #[test]
    fn test_alignment_rejects_collinear_and_small_sets() {
        let a: Vec<DVec3> = (0..5).map(|i| DVec3::new(0.1 * i as f64, 0.0, 0.0)).collect();
        assert!(matches!(
            solve_rigid_alignment(&a, &a, &IcpConfig::default()),
            Err(IcpRejection::SingularValueOutOfRange(_))
        ));
        assert_eq!(
            solve_rigid_alignment(&a[..2], &a[..2], &IcpConfig::default()),
            Err(IcpRejection::TooFewCorrespondences { found: 2, required: 3 })
        );
        assert_eq!(
            solve_rigid_alignment(&a[..4], &a[..3], &IcpConfig::default()),
            Err(IcpRejection::MismatchedLengths(4, 3))
        );
    }

    #[test]
    fn test_alignment_rejects_non_finite() {
        let mut a = cube(0.2);
        a[0].x = f64::NAN;
        let b = cube(0.2);
        assert_eq!(
            solve_rigid_alignment(&a, &b, &IcpConfig::default()),
            Err(IcpRejection::NonFiniteSingularValues)
        );
    }

    #[test]
    fn test_alignment_range_is_tunable() -> Result<(), IcpRejection> {
        // a large cube overflows the default upper bound
        let a = cube(2.0);
        let b: Vec<DVec3> = a.iter().map(|p| *p + DVec3::X).collect();
        assert!(matches!(
            solve_rigid_alignment(&a, &b, &IcpConfig::default()),
            Err(IcpRejection::SingularValueOutOfRange(_))
        ));
        let config = IcpConfig::default().with_singular_value_range(1e-3, 1e3);
        let it = solve_rigid_alignment(&a, &b, &config)?;
        assert!(it.a_from_b.abs_diff_eq(&RigidTransform::from_translation(-DVec3::X), 1e-9));
        Ok(())
    }

    #[test]
    fn test_rejection_propagates_as_error() {
        fn align(a: &[DVec3], b: &[DVec3]) -> Result<IcpIteration, Box<dyn std::error::Error>> {
            Ok(solve_rigid_alignment(a, b, &IcpConfig::default())?)
        }
        let a = cube(0.1);
        let err = align(&a[..2], &a[..2]).err().map(|e| e.to_string());
        assert_eq!(
            err.as_deref(),
            Some("2 correspondences, at least 3 required")
        );
    }
}
