use arvis_icp::{register, IcpConfig, IcpCriteria};
use arvis_linalg::{rotation::axis_angle_to_rotation_matrix, RigidTransform};
use glam::DVec3;
use rand::{Rng, SeedableRng};

#[test]
fn register_recovers_small_offset() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let a: Vec<DVec3> = (0..30)
        .map(|_| {
            DVec3::new(
                rng.random_range(-0.15..0.15),
                rng.random_range(-0.15..0.15),
                rng.random_range(-0.15..0.15),
            )
        })
        .collect();

    let a_from_b = RigidTransform::new(
        axis_angle_to_rotation_matrix(DVec3::new(1.0, -1.0, 0.5), 0.02)?,
        DVec3::new(0.003, 0.002, -0.004),
    );
    let b_from_a = a_from_b.inverse();
    let b: Vec<DVec3> = a.iter().map(|p| b_from_a.transform_point(*p)).collect();

    let res = register(
        &a,
        &b,
        &RigidTransform::IDENTITY,
        &IcpCriteria {
            max_iterations: 10,
            tolerance: 1e-9,
        },
        &IcpConfig::default(),
    );

    assert!(res.rejection.is_none());
    assert!(res.num_iterations >= 1);
    assert!(res.rmse < 1e-9);
    assert!(res.a_from_b.abs_diff_eq(&a_from_b, 1e-8));
    assert!(res.a_from_b.is_valid(1e-9));
    Ok(())
}

#[test]
fn register_starts_from_initial_estimate() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let a: Vec<DVec3> = (0..25)
        .map(|_| {
            DVec3::new(
                rng.random_range(-0.15..0.15),
                rng.random_range(-0.15..0.15),
                rng.random_range(-0.15..0.15),
            )
        })
        .collect();

    // too far for greedy matching alone, the initial estimate brings it close
    let a_from_b = RigidTransform::new(
        axis_angle_to_rotation_matrix(DVec3::Z, 0.8)?,
        DVec3::new(0.5, 0.0, 0.0),
    );
    let b_from_a = a_from_b.inverse();
    let b: Vec<DVec3> = a.iter().map(|p| b_from_a.transform_point(*p)).collect();

    let initial = RigidTransform::new(
        axis_angle_to_rotation_matrix(DVec3::Z, 0.79)?,
        DVec3::new(0.499, 0.001, 0.0),
    );
    let res = register(&a, &b, &initial, &IcpCriteria::default(), &IcpConfig::default());

    assert!(res.rejection.is_none());
    assert!(res.a_from_b.abs_diff_eq(&a_from_b, 1e-8));
    Ok(())
}
