use arvis_linalg::RigidTransform;
use glam::DVec3;

use crate::alignment::{solve_rigid_alignment, IcpConfig, IcpIteration, IcpRejection};
use crate::correspondence::find_greedy_correspondences;

/// Phases of a single ICP iteration.
///
/// An iteration moves `Idle → Correspond → Solve` and ends in either
/// `Converged` or `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcpState {
    /// Nothing started.
    Idle,
    /// Matching the two point sets.
    Correspond,
    /// Solving the rigid transform of the matched pairs.
    Solve,
    /// A transform was produced.
    Converged,
    /// The iteration produced no transform.
    Rejected,
}

/// Terminal result of one ICP iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IcpOutcome {
    /// The iteration produced a transform.
    Converged(IcpIteration),
    /// The iteration was rejected, the caller keeps its previous estimate.
    Rejected(IcpRejection),
}

impl IcpOutcome {
    /// The terminal state reached.
    pub fn state(&self) -> IcpState {
        match self {
            IcpOutcome::Converged(_) => IcpState::Converged,
            IcpOutcome::Rejected(_) => IcpState::Rejected,
        }
    }

    /// The iteration, if it converged.
    pub fn iteration(&self) -> Option<&IcpIteration> {
        match self {
            IcpOutcome::Converged(it) => Some(it),
            IcpOutcome::Rejected(_) => None,
        }
    }
}

impl From<Result<IcpIteration, IcpRejection>> for IcpOutcome {
    fn from(res: Result<IcpIteration, IcpRejection>) -> Self {
        match res {
            Ok(it) => IcpOutcome::Converged(it),
            Err(r) => IcpOutcome::Rejected(r),
        }
    }
}

fn transition(from: IcpState, to: IcpState) -> IcpState {
    log::trace!("icp {from:?} -> {to:?}");
    to
}

/// Run one ICP iteration aligning `b` onto `a`.
///
/// The points are matched with [`find_greedy_correspondences`] and the matched
/// pairs are aligned with [`solve_rigid_alignment`]. The returned transform is
/// the increment for this iteration. The caller composes it with its previous
/// estimate or accepts it as final.
pub fn icp_step(a: &[DVec3], b: &[DVec3], config: &IcpConfig) -> IcpOutcome {
    let mut state = transition(IcpState::Idle, IcpState::Correspond);
    let matches = find_greedy_correspondences(a, b);

    let (a_matched, b_matched): (Vec<DVec3>, Vec<DVec3>) = matches
        .iter()
        .map(|m| (a[m.index_a], b[m.index_b]))
        .unzip();

    state = transition(state, IcpState::Solve);
    let outcome = IcpOutcome::from(solve_rigid_alignment(&a_matched, &b_matched, config));
    transition(state, outcome.state());

    if let IcpOutcome::Rejected(reason) = &outcome {
        log::debug!("icp iteration rejected: {reason}");
    }
    outcome
}

/// Stopping rules of [`register`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcpCriteria {
    /// Maximum number of iterations to perform.
    pub max_iterations: usize,
    /// Convergence tolerance as the difference in RMSE between two consecutive iterations.
    pub tolerance: f64,
}

impl Default for IcpCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            tolerance: 1e-6,
        }
    }
}

/// Result of [`register`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IcpResult {
    /// The accumulated transform mapping `b` onto `a`.
    pub a_from_b: RigidTransform,
    /// The number of iterations that produced a transform.
    pub num_iterations: usize,
    /// Last computed RMSE, infinite when no iteration converged.
    pub rmse: f64,
    /// Why the loop stopped early, if an iteration was rejected.
    pub rejection: Option<IcpRejection>,
}

/// Iterate [`icp_step`] until the RMSE settles.
///
/// # Arguments
///
/// * `a` - The reference point set.
/// * `b` - The point set to move onto `a`.
/// * `initial` - Initial estimate of the transform mapping `b` onto `a`.
/// * `criteria` - Stopping rules.
/// * `config` - Thresholds of every iteration.
///
/// # Returns
///
/// The accumulated transform. A rejected iteration stops the loop and keeps
/// the estimate of the last converged one.
pub fn register(
    a: &[DVec3],
    b: &[DVec3],
    initial: &RigidTransform,
    criteria: &IcpCriteria,
    config: &IcpConfig,
) -> IcpResult {
    let mut result = IcpResult {
        a_from_b: *initial,
        num_iterations: 0,
        rmse: f64::INFINITY,
        rejection: None,
    };

    let mut current = Vec::with_capacity(b.len());
    initial.transform_points(b, &mut current);

    for i in 0..criteria.max_iterations {
        let it = match icp_step(a, &current, config) {
            IcpOutcome::Converged(it) => it,
            IcpOutcome::Rejected(reason) => {
                result.rejection = Some(reason);
                break;
            }
        };

        // accumulate: the increment applies after the previous estimate
        result.a_from_b = it.a_from_b.compose(&result.a_from_b);
        for p in current.iter_mut() {
            *p = it.a_from_b.transform_point(*p);
        }
        result.num_iterations += 1;

        log::debug!(
            "icp iteration {i}: {} pairs, rmse {:.6}",
            it.num_correspondences,
            it.rmse
        );

        let delta = (result.rmse - it.rmse).abs();
        result.rmse = it.rmse;
        if delta < criteria.tolerance {
            log::debug!("icp converged in {} iterations with rmse {}", i + 1, it.rmse);
            break;
        }
    }

    result
}
