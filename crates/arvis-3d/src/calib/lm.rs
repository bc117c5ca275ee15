//! Dense Levenberg-Marquardt with a central difference Jacobian.

use nalgebra::{DMatrix, DVector};

use super::CalibrationError;

const MAX_LAMBDA: f64 = 1e10;
const MIN_LAMBDA: f64 = 1e-12;

pub(super) struct LmSettings {
    pub max_iterations: usize,
    pub cost_tolerance: f64,
    pub initial_lambda: f64,
}

/// Minimize `‖r(x)‖²` starting from `x0`.
///
/// `residuals` returns `None` where the model is undefined, such as a point
/// behind a camera. Steps into those regions are rejected.
///
/// Returns the parameters and the residuals at the solution.
pub(super) fn minimize<F>(
    x0: DVector<f64>,
    residuals: F,
    settings: &LmSettings,
) -> Result<(DVector<f64>, DVector<f64>), CalibrationError>
where
    F: Fn(&DVector<f64>) -> Option<DVector<f64>>,
{
    let mut x = x0;
    let mut r = residuals(&x).ok_or(CalibrationError::Degenerate(
        "initial estimate puts target points behind the camera",
    ))?;
    let mut cost = r.norm_squared();
    let mut lambda = settings.initial_lambda;

    for iter in 0..settings.max_iterations {
        if cost <= f64::MIN_POSITIVE {
            break;
        }
        let j = jacobian(&x, &r, &residuals);
        let jtj = j.transpose() * &j;
        let g = j.transpose() * &r;

        let mut step = None;
        while lambda < MAX_LAMBDA {
            let mut a = jtj.clone();
            for i in 0..a.nrows() {
                a[(i, i)] += lambda * jtj[(i, i)].max(MIN_LAMBDA);
            }
            let Some(chol) = a.cholesky() else {
                lambda *= 10.0;
                continue;
            };
            let x_new = &x - chol.solve(&g);
            match residuals(&x_new) {
                Some(r_new) if r_new.norm_squared() < cost => {
                    step = Some((x_new, r_new));
                    break;
                }
                _ => lambda *= 10.0,
            }
        }

        let Some((x_new, r_new)) = step else {
            log::trace!("calibration refinement stalled at iteration {iter}");
            break;
        };
        let new_cost = r_new.norm_squared();
        let rel = (cost - new_cost) / cost;
        x = x_new;
        r = r_new;
        cost = new_cost;
        lambda = (lambda * 0.1).max(MIN_LAMBDA);

        log::trace!("calibration refinement iteration {iter}: cost {cost:.6e}");
        if rel < settings.cost_tolerance {
            break;
        }
    }
    Ok((x, r))
}

fn jacobian<F>(x: &DVector<f64>, r0: &DVector<f64>, residuals: &F) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> Option<DVector<f64>>,
{
    let mut j = DMatrix::<f64>::zeros(r0.len(), x.len());
    let mut xp = x.clone();
    for k in 0..x.len() {
        let h = 1e-6 * (1.0 + x[k].abs());
        xp[k] = x[k] + h;
        let plus = residuals(&xp);
        xp[k] = x[k] - h;
        let minus = residuals(&xp);
        xp[k] = x[k];

        let col = match (plus, minus) {
            (Some(p), Some(m)) => (p - m) / (2.0 * h),
            (Some(p), None) => (p - r0) / h,
            (None, Some(m)) => (r0 - m) / h,
            (None, None) => continue,
        };
        j.set_column(k, &col);
    }
    j
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn settings() -> LmSettings {
        LmSettings {
            max_iterations: 100,
            cost_tolerance: 1e-15,
            initial_lambda: 1e-3,
        }
    }

    #[test]
    fn test_minimize_rosenbrock() -> Result<(), CalibrationError> {
        // r = (10 (y - x²), 1 - x), minimum at (1, 1)
        let residuals = |x: &DVector<f64>| {
            Some(DVector::from_vec(vec![10.0 * (x[1] - x[0] * x[0]), 1.0 - x[0]]))
        };
        let (x, r) = minimize(DVector::from_vec(vec![-1.2, 1.0]), residuals, &settings())?;
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-6);
        assert!(r.norm() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_minimize_rejects_undefined_start() {
        let residuals = |_: &DVector<f64>| -> Option<DVector<f64>> { None };
        let res = minimize(DVector::from_vec(vec![0.0]), residuals, &settings());
        assert!(matches!(res, Err(CalibrationError::Degenerate(_))));
    }

    #[test]
    fn test_minimize_stays_in_domain() -> Result<(), CalibrationError> {
        // minimum at x = -1 lies outside the domain x > 0
        let residuals = |x: &DVector<f64>| (x[0] > 0.0).then(|| DVector::from_vec(vec![x[0] + 1.0]));
        let (x, _) = minimize(DVector::from_vec(vec![2.0]), residuals, &settings())?;
        assert!(x[0] > 0.0);
        assert!(x[0] < 2.0);
        Ok(())
    }
}
