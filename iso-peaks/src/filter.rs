use config::{LocusOutcome, PeakParams, POLYA_MERGE_DISTANCE};
use hashbrown::HashMap;
use log::debug;
use packbed::LocalJunction;
use statrs::distribution::{Beta, ContinuousCDF};

use crate::core::{find_peaks, Peak};

const POLYA_FLANK: usize = 10;
const POLYA_PRE_COVERAGE: f64 = 10.0;
const POLYA_PRE_POST_RATIO: f64 = 5.0;

/// zeroes tag signal explainable by RNA-seq background alone
///
/// Each base with RNA-seq depth `k` (rounded up) keeps its tag count only
/// when it reaches `total * Beta(k + 1, total + 1).inverse_cdf(quantile)`.
/// Thresholds are cached per depth.
pub fn filter_background(tags: &mut [f64], rnaseq: &[f32], total_reads: f64, quantile: f64) {
    if total_reads <= 0.0 {
        return;
    }

    let mut thresholds: HashMap<u64, f64> = HashMap::new();
    for (tag, depth) in tags.iter_mut().zip(rnaseq.iter()) {
        let depth = (*depth as f64 + 1.0 - 1e-6).max(0.0) as u64;
        let threshold = *thresholds.entry(depth).or_insert_with(|| {
            Beta::new(depth as f64 + 1.0, total_reads + 1.0)
                .map(|dist| total_reads * dist.inverse_cdf(quantile))
                .unwrap_or(0.0)
        });

        if *tag < threshold {
            *tag = 0.0;
        }
    }
}

/// drops poly(A) peaks explained by splicing or by a plain coverage drop
///
/// Every peak but the most downstream one is tested; peaks closer than
/// `POLYA_MERGE_DISTANCE` are then merged.
pub fn filter_polya_peaks(
    mut peaks: Vec<Peak>,
    rnaseq: &[f32],
    junctions: &[LocalJunction],
) -> Vec<Peak> {
    if peaks.is_empty() {
        return peaks;
    }

    peaks.sort_by(|a, b| a.start.cmp(&b.start).then(a.stop.cmp(&b.stop)));
    let sum = |start: usize, stop: usize| -> f64 {
        let (start, stop) = (start.min(rnaseq.len()), stop.min(rnaseq.len()));
        rnaseq[start..stop].iter().map(|v| *v as f64).sum()
    };

    let last = peaks[peaks.len() - 1];
    let mut kept = peaks[..peaks.len() - 1]
        .iter()
        .filter(|peak| {
            let reach = POLYA_FLANK + peak.width();
            let near_junction = junctions
                .iter()
                .any(|jn| jn.start.abs_diff(peak.stop) <= reach);
            if near_junction {
                return false;
            }

            let pre = sum(peak.start.saturating_sub(POLYA_FLANK), peak.start);
            let post = sum(peak.stop + POLYA_FLANK, peak.stop + 2 * POLYA_FLANK);
            !(pre > POLYA_PRE_COVERAGE && pre / (post + 1.0) < POLYA_PRE_POST_RATIO)
        })
        .copied()
        .collect::<Vec<_>>();
    kept.push(last);

    let mut merged: Vec<Peak> = Vec::with_capacity(kept.len());
    for peak in kept {
        match merged.last_mut() {
            Some(prev) if peak.start < prev.stop + POLYA_MERGE_DISTANCE => {
                prev.stop = prev.stop.max(peak.stop);
                prev.score += peak.score;
            }
            _ => merged.push(peak),
        }
    }

    merged
}

/// 5' peaks from CAGE-like signal in the locus frame
pub fn call_tss_peaks(
    cage: &[f32],
    rnaseq: &[f32],
    params: &PeakParams,
    total_reads: f64,
) -> Result<Vec<Peak>, LocusOutcome> {
    let mut signal = cage.iter().map(|v| *v as f64).collect::<Vec<_>>();
    if signal.iter().all(|v| *v <= 0.0) {
        return Err(LocusOutcome::NoSignal("no 5' tag coverage".to_string()));
    }

    if params.filter_cage_background {
        filter_background(&mut signal, rnaseq, total_reads, params.cage_quantile);
    }

    let peaks = find_peaks(
        &signal,
        params.cage_window,
        params.min_cage_tags,
        params.cage_score_frac,
        params.max_num_peaks,
    );
    debug!("Called {} TSS peaks", peaks.len());

    Ok(peaks)
}

/// 3' peaks from poly(A) signal in the locus frame
pub fn call_tes_peaks(
    polya: &[f32],
    rnaseq: &[f32],
    junctions: &[LocalJunction],
    params: &PeakParams,
) -> Result<Vec<Peak>, LocusOutcome> {
    let signal = polya.iter().map(|v| *v as f64).collect::<Vec<_>>();
    if signal.iter().all(|v| *v <= 0.0) {
        return Err(LocusOutcome::NoSignal("no 3' tag coverage".to_string()));
    }

    let peaks = find_peaks(
        &signal,
        params.polya_window,
        params.min_polya_tags,
        params.polya_score_frac,
        params.max_num_peaks,
    );
    let peaks = filter_polya_peaks(peaks, rnaseq, junctions);
    debug!("Called {} TES peaks", peaks.len());

    Ok(peaks)
}
