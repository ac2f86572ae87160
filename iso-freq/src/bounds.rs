use config::{EstimatorParams, LocusOutcome};
use log::{debug, warn};
use ndarray::{Array1, ArrayView1, ArrayView2};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::core::{brent_root, optimize, Likelihood};

const MAX_TILT_DOUBLINGS: usize = 40;
const TILT_ROOT_TOL: f64 = 1e-8;
const BISECTION_TOL: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSide {
    Lower,
    Upper,
}

impl BoundSide {
    fn sign(&self) -> f64 {
        match self {
            BoundSide::Lower => -1.0,
            BoundSide::Upper => 1.0,
        }
    }
}

/// profile-likelihood interval of one transcript frequency
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceBounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// lowest log-likelihood still compatible with the optimum at level `alpha`
pub fn lhd_threshold(mle_lhd: f64, alpha: f64) -> f64 {
    let critical = ChiSquared::new(1.0)
        .map(|chi2| chi2.inverse_cdf(1.0 - alpha))
        .unwrap_or(f64::INFINITY);
    mle_lhd - critical / 2.0
}

fn uniform(n: usize) -> Array1<f64> {
    Array1::from_elem(n, 1.0 / n as f64)
}

/// optimum of the objective tilted by `sign * lambda * x_j`
fn tilted_optimum(
    problem: &Likelihood,
    j: usize,
    lambda: f64,
    side: BoundSide,
    start: &Array1<f64>,
    params: &EstimatorParams,
) -> Array1<f64> {
    let tilted = problem.tilted(j, side.sign() * lambda);
    optimize(&tilted, start.clone(), params)
}

/// Traces the Lagrangian `L(x) +/- lambda x_j` and root-finds `lambda`
/// where the untilted likelihood reaches `threshold`
fn bound_directly(
    problem: &Likelihood,
    mle: &Array1<f64>,
    j: usize,
    side: BoundSide,
    threshold: f64,
    params: &EstimatorParams,
) -> Result<f64, LocusOutcome> {
    let gap = |lambda: f64| {
        let x = tilted_optimum(problem, j, lambda, side, mle, params);
        problem.value(&x) - threshold
    };

    let mut hi = problem.total().max(1.0) * 1e-3;
    let mut found = false;
    for _ in 0..MAX_TILT_DOUBLINGS {
        let g = gap(hi);
        if !g.is_finite() {
            return Err(LocusOutcome::OptimizationFailure(format!(
                "non-finite likelihood at tilt {:e}",
                hi
            )));
        }
        if g < 0.0 {
            found = true;
            break;
        }
        hi *= 2.0;
    }

    if !found {
        // the whole range of x_j stays compatible with the data
        let x = tilted_optimum(problem, j, hi, side, mle, params);
        return Ok(x[j]);
    }

    let lambda = brent_root(gap, 0.0, hi, TILT_ROOT_TOL, params.max_bisection_iterations)
        .ok_or_else(|| {
            LocusOutcome::OptimizationFailure("tilt root not bracketed".to_string())
        })?;

    Ok(tilted_optimum(problem, j, lambda, side, mle, params)[j])
}

/// best likelihood with `x_j` fixed at `value`
fn constrained_lhd(problem: &Likelihood, j: usize, value: f64, params: &EstimatorParams) -> f64 {
    let n = problem.ncols();
    let fixed = problem.fixed(j, value);
    let phi = optimize(&fixed, uniform(n - 1), params);
    fixed.value(&phi)
}

/// Bisects on a fixed `x_j` between the optimum and the far end of the
/// simplex, re-optimizing the other coordinates at every trial value
fn bound_by_bisection(
    problem: &Likelihood,
    mle: &Array1<f64>,
    j: usize,
    side: BoundSide,
    threshold: f64,
    params: &EstimatorParams,
) -> Result<f64, LocusOutcome> {
    let n = problem.ncols();
    let far = match side {
        BoundSide::Upper => 1.0 - n as f64 * params.min_freq,
        BoundSide::Lower => params.min_freq,
    };

    if constrained_lhd(problem, j, far, params) >= threshold {
        return Ok(far);
    }

    // `inside` stays compatible with the data, `outside` does not
    let (mut inside, mut outside) = (mle[j], far);
    for _ in 0..params.max_bisection_iterations {
        if (outside - inside).abs() < BISECTION_TOL {
            return Ok(inside);
        }

        let mid = 0.5 * (inside + outside);
        let lhd = constrained_lhd(problem, j, mid, params);
        if !lhd.is_finite() {
            return Err(LocusOutcome::OptimizationFailure(format!(
                "non-finite likelihood at x_{} = {:e}",
                j, mid
            )));
        }

        if lhd >= threshold {
            inside = mid;
        } else {
            outside = mid;
        }
    }

    Err(LocusOutcome::OptimizationFailure(format!(
        "bisection for x_{} did not converge",
        j
    )))
}

/// one side of the interval; direct first, bisection as fallback
pub fn confidence_bound(
    problem: &Likelihood,
    mle: &Array1<f64>,
    j: usize,
    side: BoundSide,
    params: &EstimatorParams,
) -> Option<f64> {
    let threshold = lhd_threshold(problem.value(mle), params.alpha);

    let bound = bound_directly(problem, mle, j, side, threshold, params).or_else(|err| {
        debug!("Direct bound failed ({}), bisecting", err);
        bound_by_bisection(problem, mle, j, side, threshold, params)
    });

    match bound {
        Ok(value) => Some(match side {
            BoundSide::Lower => value.min(mle[j]),
            BoundSide::Upper => value.max(mle[j]),
        }),
        Err(err) => {
            warn!("Confidence bound for transcript {} unavailable: {}", j, err);
            None
        }
    }
}

/// Profile-likelihood bounds for every transcript
///
/// # Arguments
///
/// * `observed` - read counts per bin
/// * `expected` - bins x transcripts matrix
/// * `mle` - optimum returned by the estimator
/// * `params` - estimator constants, `alpha` sets the level
///
/// # Returns
///
/// * `Vec<ConfidenceBounds>` - one interval per column, bracketing `mle`
///
/// # Example
///
/// ```rust, ignore
/// let bounds = estimate_confidence_bounds(observed.view(), expected.view(), &mle, &params);
/// ```
pub fn estimate_confidence_bounds(
    observed: ArrayView1<f64>,
    expected: ArrayView2<f64>,
    mle: &Array1<f64>,
    params: &EstimatorParams,
) -> Vec<ConfidenceBounds> {
    let problem = Likelihood::new(observed, expected);
    if problem.ncols() == 1 {
        return vec![ConfidenceBounds {
            lower: Some(1.0),
            upper: Some(1.0),
        }];
    }

    (0..problem.ncols())
        .map(|j| ConfidenceBounds {
            lower: confidence_bound(&problem, mle, j, BoundSide::Lower, params),
            upper: confidence_bound(&problem, mle, j, BoundSide::Upper, params),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::estimate_frequencies;
    use ndarray::array;

    #[test]
    fn test_threshold_uses_chi_square_quantile() {
        let threshold = lhd_threshold(0.0, 0.05);
        assert!((threshold + 3.841458820694124 / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_bounds_bracket_estimate() {
        let expected = array![[0.5, 0.0], [0.5, 0.5], [0.0, 0.5]];
        let observed = array![150.0, 500.0, 350.0];
        let params = EstimatorParams::default();

        let mle = estimate_frequencies(observed.view(), expected.view(), &params).unwrap();
        let bounds = estimate_confidence_bounds(observed.view(), expected.view(), &mle, &params);

        assert_eq!(bounds.len(), 2);
        for (j, b) in bounds.iter().enumerate() {
            let (lo, hi) = (b.lower.unwrap(), b.upper.unwrap());
            assert!(lo <= mle[j] && mle[j] <= hi);
            assert!(hi - lo > 1e-3);
            assert!(hi - lo < 0.2);
        }
    }

    #[test]
    fn test_bisection_agrees_with_direct_bound() {
        let expected = array![[0.5, 0.0], [0.5, 0.5], [0.0, 0.5]];
        let observed = array![150.0, 500.0, 350.0];
        let params = EstimatorParams::default();

        let problem = Likelihood::new(observed.view(), expected.view());
        let mle = estimate_frequencies(observed.view(), expected.view(), &params).unwrap();
        let threshold = lhd_threshold(problem.value(&mle), params.alpha);

        let direct = bound_directly(&problem, &mle, 0, BoundSide::Upper, threshold, &params).unwrap();
        let bisect =
            bound_by_bisection(&problem, &mle, 0, BoundSide::Upper, threshold, &params).unwrap();
        assert!((direct - bisect).abs() < 1e-3);
    }

    #[test]
    fn test_unidentifiable_pair_has_wide_bounds() {
        let expected = array![[0.5, 0.5, 0.0], [0.5, 0.5, 0.5], [0.0, 0.0, 0.5]];
        let observed = array![150.0, 500.0, 350.0];
        let params = EstimatorParams::default();

        let mle = estimate_frequencies(observed.view(), expected.view(), &params).unwrap();
        let bounds = estimate_confidence_bounds(observed.view(), expected.view(), &mle, &params);

        assert!(bounds[0].lower.unwrap() < 1e-3);
        assert!(bounds[0].upper.unwrap() > 0.25);
    }
}
