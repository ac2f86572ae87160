//! Core module for estimating transcript frequencies
//! Alejandro Gonzales-Irribarren, 2025
//!
//! This module contains the constrained maximum-likelihood estimator that
//! assigns every candidate transcript of a locus a relative frequency.
//!
//! In short, the log-likelihood of the observed bin counts is maximized
//! over the probability simplex by projected-gradient ascent. Each step
//! normalizes the gradient, projects the moved point back onto the simplex
//! and walks along the resulting direction as far as a 1-D line search
//! allows without leaving the feasible region. Coordinates that collapse
//! onto the frequency floor are dropped from the active set while the
//! tolerance is tightened, and a few final passes re-optimize every
//! coordinate so no transcript is discarded too early.

use config::{EstimatorParams, LocusOutcome, INITIAL_TOLERANCE, NUM_FINAL_PASSES, TOLERANCE_DECAY};
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

const SIMPLEX_TOL: f64 = 1e-6;
const MIN_CONVERGENCE_ITERATIONS: usize = 30;
const SMALL_STEPS_TO_STOP: usize = 3;
const DOWNHILL_DECAY: f64 = 1.5;
const BRENT_TOL: f64 = 1e-12;
const BRENT_MAX_ITER: usize = 100;

/// concave objective `sum_i X_i ln(offset_i + scale (E x)_i) + tilt . x`
///
/// With zero offset, unit scale and zero tilt this is the plain
/// log-likelihood; the other terms let bounds fix or penalize one
/// coordinate while re-optimizing the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct Likelihood {
    observed: Array1<f64>,
    expected: Array2<f64>,
    offset: Array1<f64>,
    scale: f64,
    tilt: Array1<f64>,
}

impl Likelihood {
    /// rows without reads do not contribute and are dropped
    pub fn new(observed: ArrayView1<f64>, expected: ArrayView2<f64>) -> Self {
        let rows = observed
            .iter()
            .enumerate()
            .filter(|(_, x)| **x > 0.0)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();

        Self {
            observed: observed.select(Axis(0), &rows),
            expected: expected.select(Axis(0), &rows),
            offset: Array1::zeros(rows.len()),
            scale: 1.0,
            tilt: Array1::zeros(expected.ncols()),
        }
    }

    pub fn ncols(&self) -> usize {
        self.expected.ncols()
    }

    pub fn total(&self) -> f64 {
        self.observed.sum()
    }

    fn denominators(&self, x: &Array1<f64>) -> Array1<f64> {
        &self.offset + &(self.expected.dot(x) * self.scale)
    }

    pub fn value(&self, x: &Array1<f64>) -> f64 {
        let lhd = self
            .observed
            .iter()
            .zip(self.denominators(x).iter())
            .map(|(count, d)| {
                if *d > 0.0 {
                    count * d.ln()
                } else {
                    f64::NEG_INFINITY
                }
            })
            .sum::<f64>();

        lhd + self.tilt.dot(x)
    }

    pub fn gradient(&self, x: &Array1<f64>) -> Array1<f64> {
        let weights = &self.observed / &self.denominators(x);
        self.expected.t().dot(&weights) * self.scale + &self.tilt
    }

    /// same objective over a subset of the columns
    fn restrict(&self, columns: &[usize]) -> Self {
        Self {
            observed: self.observed.clone(),
            expected: self.expected.select(Axis(1), columns),
            offset: self.offset.clone(),
            scale: self.scale,
            tilt: self.tilt.select(Axis(0), columns),
        }
    }

    /// adds `lambda * x_j` to the objective
    pub fn tilted(&self, j: usize, lambda: f64) -> Self {
        let mut out = self.clone();
        out.tilt[j] += lambda;
        out
    }

    /// objective over the other coordinates once `x_j` is fixed at `value`
    ///
    /// The remaining coordinates are written as `(1 - value) * phi` with
    /// `phi` on the simplex.
    pub fn fixed(&self, j: usize, value: f64) -> Self {
        let others = (0..self.ncols()).filter(|k| *k != j).collect::<Vec<_>>();
        let column = self.expected.column(j).to_owned() * (self.scale * value);

        Self {
            observed: self.observed.clone(),
            expected: self.expected.select(Axis(1), &others),
            offset: &self.offset + &column,
            scale: self.scale * (1.0 - value),
            tilt: self.tilt.select(Axis(0), &others) * (1.0 - value),
        }
    }
}

/// log-likelihood of `freqs` for the given tables
pub fn log_lhd(freqs: &Array1<f64>, observed: ArrayView1<f64>, expected: ArrayView2<f64>) -> f64 {
    Likelihood::new(observed, expected).value(freqs)
}

/// Euclidean projection onto the simplex, floored at `min`
///
/// # Example
///
/// ```rust
/// use iso_freq::project_onto_simplex;
/// use ndarray::array;
///
/// let x = project_onto_simplex(&array![0.5, 0.8, -0.2], 1e-12);
/// assert!((x.sum() - 1.0).abs() < 1e-9);
/// ```
pub fn project_onto_simplex(x: &Array1<f64>, min: f64) -> Array1<f64> {
    if x.iter().all(|v| *v >= min) && (1.0 - x.sum()).abs() < SIMPLEX_TOL {
        return x.clone();
    }

    let mut sorted = x.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumsum = 0.0;
    let mut support_sum = 0.0;
    let mut rho = 0;
    for (k, v) in sorted.iter().enumerate() {
        cumsum += v;
        if v - (cumsum - 1.0) / (k + 1) as f64 > 0.0 {
            rho = k + 1;
            support_sum = cumsum;
        }
    }

    if rho == 0 {
        return Array1::from_elem(x.len(), 1.0 / x.len().max(1) as f64);
    }

    let theta = (support_sum - 1.0) / rho as f64;
    x.mapv(|v| (v - theta).max(min))
}

/// direction towards the projected gradient step, unit L1 norm
fn projected_direction(problem: &Likelihood, x: &Array1<f64>, min: f64) -> Option<Array1<f64>> {
    let gradient = problem.gradient(x);
    let norm = gradient.iter().map(|g| g.abs()).sum::<f64>();
    if !norm.is_finite() || norm <= 0.0 {
        return None;
    }

    let next = project_onto_simplex(&(x + &(gradient / norm)), min);
    let direction = next - x;
    let norm = direction.iter().map(|d| d.abs()).sum::<f64>();
    if !norm.is_finite() || norm <= f64::EPSILON {
        return None;
    }

    Some(direction / norm)
}

/// largest step keeping every coordinate at or above `min`
fn max_feasible_step(x: &Array1<f64>, direction: &Array1<f64>, min: f64) -> f64 {
    x.iter()
        .zip(direction.iter())
        .filter(|(_, d)| **d < 0.0)
        .map(|(v, d)| ((v - min) / -d).max(0.0))
        .fold(f64::INFINITY, f64::min)
}

/// Brent's root finder on a bracketing interval
///
/// # Arguments
///
/// * `f` - function with opposite signs at `a` and `b`
/// * `a`, `b` - bracket ends
/// * `tol` - absolute tolerance on the root
/// * `max_iter` - iteration cap
///
/// # Returns
///
/// * `Option<f64>` - the root, `None` when `[a, b]` does not bracket one
///   or the iteration cap is reached
pub fn brent_root<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, tol: f64, max_iter: usize) -> Option<f64> {
    let (mut a, mut b) = (a, b);
    let (mut fa, mut fb) = (f(a), f(b));
    if !fa.is_finite() || !fb.is_finite() || fa * fb > 0.0 {
        return None;
    }
    if fa == 0.0 {
        return Some(a);
    }
    if fb == 0.0 {
        return Some(b);
    }

    let (mut c, mut fc) = (a, fa);
    let (mut d, mut e) = (b - a, b - a);

    for _ in 0..max_iter {
        if fb * fc > 0.0 {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol1 = 2.0 * f64::EPSILON * b.abs() + 0.5 * tol;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb == 0.0 {
            return Some(b);
        }

        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // inverse quadratic interpolation, secant when a == c
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * q * (q - r) - (b - a) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();

            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol1 { d } else { tol1.copysign(xm) };
        fb = f(b);
        if !fb.is_finite() {
            return None;
        }
    }

    None
}

/// step along `direction`, 0 when no step improves the objective
fn line_search(
    problem: &Likelihood,
    x: &Array1<f64>,
    direction: &Array1<f64>,
    max_step: f64,
    fd: f64,
) -> f64 {
    let f = |alpha: f64| problem.value(&(x + &(direction * alpha)));
    let slope = |alpha: f64| f(alpha + fd) - f(alpha - fd);
    let current = f(0.0);

    let downhill = |start: f64| {
        let mut step = start;
        while step > fd && current > f(step) {
            step /= DOWNHILL_DECAY;
        }
        if step > fd {
            step
        } else {
            0.0
        }
    };

    let (min_step, max_step) = (fd, max_step - fd);
    if !max_step.is_finite() || max_step <= min_step {
        return 0.0;
    }

    if slope(max_step) >= 0.0 {
        return if f(max_step) >= current { max_step } else { 0.0 };
    }
    if slope(min_step) <= 0.0 {
        return downhill(min_step);
    }

    match brent_root(slope, min_step, max_step, BRENT_TOL, BRENT_MAX_ITER) {
        Some(step) if f(step) >= current => step,
        Some(step) => downhill(step),
        None => downhill(max_step),
    }
}

/// One projected-gradient run
///
/// Returns the full-length point (dropped coordinates at the floor) and
/// the objective after every accepted iteration.
pub(crate) fn ascend(
    problem: &Likelihood,
    x0: &Array1<f64>,
    dont_zero: bool,
    abs_tol: f64,
    params: &EstimatorParams,
) -> (Array1<f64>, Vec<f64>) {
    let min = params.min_freq;
    let n = problem.ncols();

    let mut active = (0..n).collect::<Vec<_>>();
    let mut sub = problem.clone();
    let mut x = x0.clone();
    let mut lhd = sub.value(&x);
    let mut lhds = Vec::new();
    let mut small_steps = 0;

    for i in 0..params.max_iterations {
        let alpha = match projected_direction(&sub, &x, min) {
            Some(direction) => {
                let max_step = max_feasible_step(&x, &direction, min);
                let alpha = line_search(&sub, &x, &direction, max_step, params.fd_step);
                x.scaled_add(alpha, &direction);
                alpha
            }
            None => 0.0,
        };

        if (1.0 - x.sum()).abs() > SIMPLEX_TOL {
            x = project_onto_simplex(&x, min);
            continue;
        }

        if i > MIN_CONVERGENCE_ITERATIONS && (alpha == 0.0 || sub.value(&x) - lhd < abs_tol) {
            small_steps += 1;
            if small_steps > SMALL_STEPS_TO_STOP {
                break;
            }
        } else {
            small_steps = 0;
            if !dont_zero {
                let nonzero = (0..x.len()).filter(|k| x[*k] > min).collect::<Vec<_>>();
                if !nonzero.is_empty() && nonzero.len() < x.len() {
                    active = nonzero.iter().map(|k| active[*k]).collect();
                    x = x.select(Axis(0), &nonzero);
                    sub = problem.restrict(&active);
                }
            }
        }

        lhd = sub.value(&x);
        lhds.push(lhd);
    }

    let mut full = Array1::from_elem(n, min);
    for (k, j) in active.iter().enumerate() {
        full[*j] = x[k];
    }
    (full, lhds)
}

/// tolerance schedule with zeroing, then non-zeroing polish passes
pub(crate) fn optimize(problem: &Likelihood, x0: Array1<f64>, params: &EstimatorParams) -> Array1<f64> {
    if problem.ncols() == 1 {
        return Array1::ones(1);
    }

    let mut x = x0;
    let mut eps = INITIAL_TOLERANCE;
    for _ in 0..params.max_iterations {
        let prev = problem.value(&x);
        let (next, lhds) = ascend(problem, &x, false, eps, params);
        x = next;

        let gain = (problem.value(&x) - prev) / lhds.len().max(1) as f64;
        if gain < eps {
            if eps <= params.abs_tol {
                break;
            }
            eps = (eps / TOLERANCE_DECAY).max(params.abs_tol);
        }
    }

    for _ in 0..NUM_FINAL_PASSES {
        let (next, lhds) = ascend(problem, &x, true, params.abs_tol, params);
        x = next;
        if lhds.len() < params.max_iterations {
            break;
        }
    }

    x
}

/// Estimates relative transcript frequencies
///
/// # Arguments
///
/// * `observed` - read counts per bin
/// * `expected` - bins x transcripts matrix with unit column sums
/// * `params` - estimator constants
///
/// # Returns
///
/// * `Result<Array1<f64>, LocusOutcome>` - frequencies on the simplex,
///   every one at least `params.min_freq`; `TooFewReads` without reads
///
/// # Example
///
/// ```rust
/// use config::EstimatorParams;
/// use iso_freq::estimate_frequencies;
/// use ndarray::array;
///
/// let expected = array![[0.5, 0.0], [0.5, 0.5], [0.0, 0.5]];
/// let observed = array![150.0, 500.0, 350.0];
/// let freqs = estimate_frequencies(observed.view(), expected.view(), &EstimatorParams::default()).unwrap();
/// assert!((freqs[0] - 0.3).abs() < 1e-3);
/// ```
pub fn estimate_frequencies(
    observed: ArrayView1<f64>,
    expected: ArrayView2<f64>,
    params: &EstimatorParams,
) -> Result<Array1<f64>, LocusOutcome> {
    if observed.sum() <= 0.0 {
        return Err(LocusOutcome::TooFewReads);
    }

    let n = expected.ncols();
    if n == 1 {
        return Ok(Array1::ones(1));
    }

    let problem = Likelihood::new(observed, expected);
    let freqs = optimize(&problem, Array1::from_elem(n, 1.0 / n as f64), params);

    if freqs.iter().any(|v| !v.is_finite()) {
        return Err(LocusOutcome::OptimizationFailure(
            "non-finite frequency estimate".to_string(),
        ));
    }

    debug!(
        "Estimated {} frequencies, log lhd {:.4}",
        n,
        problem.value(&freqs)
    );
    Ok(freqs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn simulate(expected: &Array2<f64>, truth: &Array1<f64>, reads: usize, seed: u64) -> Array1<f64> {
        let probs = expected.dot(truth);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut counts = Array1::zeros(probs.len());

        for _ in 0..reads {
            let mut u: f64 = rng.gen::<f64>() * probs.sum();
            for (i, p) in probs.iter().enumerate() {
                if u < *p || i + 1 == probs.len() {
                    counts[i] += 1.0;
                    break;
                }
                u -= p;
            }
        }
        counts
    }

    fn random_design() -> Array2<f64> {
        array![
            [0.4, 0.0, 0.1, 0.0],
            [0.3, 0.2, 0.1, 0.0],
            [0.1, 0.3, 0.2, 0.3],
            [0.1, 0.3, 0.0, 0.3],
            [0.1, 0.2, 0.3, 0.1],
            [0.0, 0.0, 0.3, 0.3],
        ]
    }

    #[test]
    fn test_project_onto_simplex() {
        let x = project_onto_simplex(&array![0.5, 0.8, -0.2], 1e-12);
        assert!((x[0] - 0.35).abs() < 1e-12);
        assert!((x[1] - 0.65).abs() < 1e-12);
        assert_eq!(x[2], 1e-12);

        let inside = array![0.2, 0.8];
        assert_eq!(project_onto_simplex(&inside, 1e-12), inside);
    }

    #[test]
    fn test_brent_root() {
        let root = brent_root(|x| x * x - 2.0, 0.0, 2.0, 1e-12, 100).unwrap();
        assert!((root - 2f64.sqrt()).abs() < 1e-9);
        assert!(brent_root(|x| x * x + 1.0, 0.0, 2.0, 1e-12, 100).is_none());
    }

    #[test]
    fn test_too_few_reads() {
        let expected = array![[0.5, 0.5], [0.5, 0.5]];
        let observed = array![0.0, 0.0];
        assert_eq!(
            estimate_frequencies(observed.view(), expected.view(), &EstimatorParams::default()),
            Err(LocusOutcome::TooFewReads)
        );
    }

    #[test]
    fn test_single_transcript_gets_everything() {
        let expected = array![[0.4], [0.6]];
        let observed = array![3.0, 9.0];
        let freqs =
            estimate_frequencies(observed.view(), expected.view(), &EstimatorParams::default())
                .unwrap();
        assert_eq!(freqs, array![1.0]);
    }

    #[test]
    fn test_exact_mixture_is_recovered() {
        let expected = array![[0.5, 0.0], [0.5, 0.5], [0.0, 0.5]];
        let observed = array![150.0, 500.0, 350.0];
        let freqs =
            estimate_frequencies(observed.view(), expected.view(), &EstimatorParams::default())
                .unwrap();

        assert!((freqs[0] - 0.3).abs() < 1e-3);
        assert!((freqs[1] - 0.7).abs() < 1e-3);
    }

    #[test]
    fn test_estimate_stays_on_simplex_and_beats_truth() {
        let expected = random_design();
        let truth = array![0.5, 0.3, 0.2 - 1e-6, 1e-6];
        let params = EstimatorParams::default();

        for seed in 0..3 {
            let observed = simulate(&expected, &truth, 2000, seed);
            let freqs = estimate_frequencies(observed.view(), expected.view(), &params).unwrap();

            assert!((freqs.sum() - 1.0).abs() < 1e-6);
            assert!(freqs.iter().all(|v| *v >= params.min_freq));

            let fitted = log_lhd(&freqs, observed.view(), expected.view());
            let reference = log_lhd(&truth, observed.view(), expected.view());
            assert!(fitted >= reference - 1e-6);
        }
    }

    #[test]
    fn test_likelihood_never_decreases() {
        let expected = random_design();
        let truth = array![0.4, 0.1, 0.3, 0.2];
        let observed = simulate(&expected, &truth, 1000, 7);
        let problem = Likelihood::new(observed.view(), expected.view());
        let params = EstimatorParams::default();

        let x0 = Array1::from_elem(4, 0.25);
        let (_, lhds) = ascend(&problem, &x0, true, params.abs_tol, &params);

        assert!(!lhds.is_empty());
        assert!(lhds[0] >= problem.value(&x0) - 1e-9);
        for pair in lhds.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-9);
        }
    }

    #[test]
    fn test_identical_columns_share_their_total() {
        let expected = array![[0.5, 0.5, 0.0], [0.5, 0.5, 0.5], [0.0, 0.0, 0.5]];
        let observed = array![150.0, 500.0, 350.0];
        let freqs =
            estimate_frequencies(observed.view(), expected.view(), &EstimatorParams::default())
                .unwrap();

        assert!((freqs[0] + freqs[1] - 0.3).abs() < 1e-3);
        assert!((freqs[2] - 0.7).abs() < 1e-3);
    }

    #[test]
    fn test_fixed_objective_matches_full() {
        let expected = random_design();
        let observed = array![10.0, 20.0, 30.0, 5.0, 8.0, 2.0];
        let problem = Likelihood::new(observed.view(), expected.view());

        let phi = array![0.5, 0.25, 0.25];
        let fixed = problem.fixed(1, 0.2);
        let full = array![0.4, 0.2, 0.2, 0.2];

        assert!((fixed.value(&phi) - problem.value(&full)).abs() < 1e-9);
    }
}
