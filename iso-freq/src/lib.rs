//! Frequency estimation
//!
//! Fragment length distributions, the expected/observed design matrix of a
//! locus, the constrained maximum-likelihood estimator and its
//! profile-likelihood confidence bounds.

pub mod bounds;
pub mod core;
pub mod design;
pub mod fld;

pub use crate::core::{brent_root, estimate_frequencies, log_lhd, project_onto_simplex, Likelihood};
pub use bounds::{confidence_bound, estimate_confidence_bounds, lhd_threshold, BoundSide, ConfidenceBounds};
pub use design::{build_design, pseudo_exons, read_key, BinKey, DesignMatrix, ReadClass};
pub use fld::{FlDist, FlDists};

use config::{EstimatorParams, LocusOutcome};

/// estimate attached to one input transcript
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptEstimate {
    pub frequency: Option<f64>,
    pub conf_lo: Option<f64>,
    pub conf_hi: Option<f64>,
    pub unobservable: bool,
    /// other input transcripts with the same expected column
    pub unidentifiable_with: Vec<usize>,
}

/// Runs the estimator (and optionally the bounds) over a design and maps
/// the results back onto the `n` input transcripts
///
/// # Arguments
///
/// * `design` - cleaned design matrix
/// * `n` - number of input transcripts
/// * `params` - estimator constants
/// * `with_bounds` - compute profile-likelihood bounds
///
/// # Returns
///
/// * `Result<Vec<TranscriptEstimate>, LocusOutcome>` - one entry per input
///   transcript; unobservable ones carry no frequency
pub fn quantify(
    design: &DesignMatrix,
    n: usize,
    params: &EstimatorParams,
    with_bounds: bool,
) -> Result<Vec<TranscriptEstimate>, LocusOutcome> {
    let mut estimates = vec![TranscriptEstimate::default(); n];
    for idx in design.unobservable.iter() {
        estimates[*idx].unobservable = true;
    }
    for group in design.unidentifiable.iter() {
        for idx in group {
            estimates[*idx].unidentifiable_with =
                group.iter().filter(|o| *o != idx).copied().collect();
        }
    }

    if design.num_transcripts() == 0 {
        return Err(LocusOutcome::TooFewReads);
    }

    let freqs = estimate_frequencies(design.observed.view(), design.expected.view(), params)?;
    for (col, idx) in design.columns.iter().enumerate() {
        estimates[*idx].frequency = Some(freqs[col]);
    }

    if with_bounds {
        let bounds =
            estimate_confidence_bounds(design.observed.view(), design.expected.view(), &freqs, params);
        for (col, idx) in design.columns.iter().enumerate() {
            estimates[*idx].conf_lo = bounds[col].lower;
            estimates[*idx].conf_hi = bounds[col].upper;
        }
    }

    Ok(estimates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_quantify_maps_columns_back() {
        let expected = array![
            [0.5, 0.0, 0.0],
            [0.5, 0.0, 0.5],
            [0.0, 0.0, 0.5],
        ];
        let design = DesignMatrix::new(expected, array![150.0, 500.0, 350.0]);
        let estimates = quantify(&design, 3, &EstimatorParams::default(), false).unwrap();

        assert!(estimates[1].unobservable);
        assert_eq!(estimates[1].frequency, None);
        assert!((estimates[0].frequency.unwrap() - 0.3).abs() < 1e-3);
        assert!((estimates[2].frequency.unwrap() - 0.7).abs() < 1e-3);
        assert_eq!(estimates[0].conf_lo, None);
    }

    #[test]
    fn test_quantify_reports_unidentifiable_pairs() {
        let expected = array![[0.5, 0.5, 0.0], [0.5, 0.5, 0.5], [0.0, 0.0, 0.5]];
        let design = DesignMatrix::new(expected, array![150.0, 500.0, 350.0]);
        let estimates = quantify(&design, 3, &EstimatorParams::default(), false).unwrap();

        assert_eq!(estimates[0].unidentifiable_with, vec![1]);
        assert_eq!(estimates[1].unidentifiable_with, vec![0]);
        assert!(estimates[2].unidentifiable_with.is_empty());

        let total = estimates[0].frequency.unwrap() + estimates[1].frequency.unwrap();
        assert!((total - 0.3).abs() < 1e-3);
    }

    #[test]
    fn test_quantify_all_zero_counts() {
        let expected = array![[0.5, 0.5], [0.5, 0.5]];
        let design = DesignMatrix::new(expected, array![0.0, 0.0]);
        assert_eq!(
            quantify(&design, 2, &EstimatorParams::default(), true),
            Err(LocusOutcome::TooFewReads)
        );
    }
}
