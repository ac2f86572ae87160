//! Core module for calling transcript boundary peaks
//! Alejandro Gonzales-Irribarren, 2025
//!
//! This module contains the greedy windowed peak finder shared by 5' (CAGE)
//! and 3' (poly(A)) tag signals.
//!
//! In short, every window of fixed length is scored by its summed signal.
//! Windows are visited from best to worst; each one that does not overlap
//! an accepted peak is grown towards the side with more signal until the
//! flanks become too weak. Grown peaks that sit close together are merged,
//! and every merged peak is trimmed back to the core holding most of its
//! smoothed signal. Iteration order only depends on scores and positions,
//! so identical inputs always give identical peaks.

use config::{MAX_CAGE_FRAC, MAX_PEAK_MERGE_ROUNDS, PEAK_MERGE_RATIO};
use log::warn;

const SMOOTHING_WINDOW: usize = 3;

/// closed interval of a called peak in the locus frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub start: usize,
    pub stop: usize,
    pub score: f64,
}

impl Peak {
    pub fn new(start: usize, stop: usize, score: f64) -> Self {
        Self { start, stop, score }
    }

    pub fn coords(&self) -> (usize, usize) {
        (self.start, self.stop)
    }

    pub fn width(&self) -> usize {
        self.stop - self.start
    }
}

/// prefix sums, `cumsum[i]` holds the sum of `cov[..i]`
fn cumsum(cov: &[f64]) -> Vec<f64> {
    let mut acc = Vec::with_capacity(cov.len() + 1);
    acc.push(0.0);
    for value in cov {
        let last = acc[acc.len() - 1];
        acc.push(last + value);
    }
    acc
}

fn range_sum(cumsum: &[f64], start: usize, stop_exclusive: usize) -> f64 {
    let n = cumsum.len() - 1;
    let (start, stop) = (start.min(n), stop_exclusive.min(n));
    if stop <= start {
        return 0.0;
    }
    cumsum[stop] - cumsum[start]
}

struct PeakGrower<'a> {
    cumsum: &'a [f64],
    len: usize,
    grow_size: usize,
    min_score: f64,
    max_rounds: usize,
}

impl PeakGrower<'_> {
    fn grow(&self, mut start: usize, mut stop: usize) -> (usize, usize) {
        let width = |s: usize, e: usize| (e - s + 1) as f64;
        let max_mean_signal = range_sum(self.cumsum, start, stop + 1) / width(start, stop);
        let grow = self.grow_size as f64;

        for _ in 0..self.max_rounds {
            let curr_signal = range_sum(self.cumsum, start, stop + 1);
            if curr_signal < self.min_score {
                return (start, stop);
            }

            let upstream = range_sum(self.cumsum, start.saturating_sub(self.grow_size), start) / grow;
            let downstream = range_sum(self.cumsum, stop + 1, stop + 1 + self.grow_size) / grow;
            let best = upstream.max(downstream);

            if best < MAX_CAGE_FRAC * curr_signal / width(start, stop) {
                return (start, stop);
            }
            if best < MAX_CAGE_FRAC * max_mean_signal {
                return (start, stop);
            }

            if downstream > upstream {
                stop = (stop + self.grow_size).min(self.len - 1);
            } else {
                start = start.saturating_sub(self.grow_size);
            }
        }

        warn!(
            "Reached max peak iteration at {}-{} (signal {:.2})",
            start,
            stop,
            range_sum(self.cumsum, start, stop + 1)
        );
        (start, stop)
    }
}

/// one merge sweep, visiting peaks from the rightmost
fn merge_round(mut peaks: Vec<Peak>) -> Vec<Peak> {
    peaks.sort_by(|a, b| a.start.cmp(&b.start).then(a.stop.cmp(&b.stop)));

    let mut merged: Vec<Peak> = Vec::with_capacity(peaks.len());
    while let Some(peak) = peaks.pop() {
        match merged.last_mut() {
            Some(last) => {
                let start = peak.start.min(last.start);
                let stop = peak.stop.max(last.stop);
                let combined = (last.width() + peak.width()) as f64;

                if ((stop - start) as f64) <= PEAK_MERGE_RATIO * combined {
                    last.start = start;
                    last.stop = stop;
                    last.score += peak.score;
                } else {
                    merged.push(peak);
                }
            }
            None => merged.push(peak),
        }
    }

    merged
}

/// Finds boundary peaks in a tag signal
///
/// # Arguments
///
/// * `cov` - per-base tag signal in the locus frame
/// * `window_len` - seed window length
/// * `min_score` - absolute minimum window signal
/// * `max_score_frac` - minimum fraction of the best peak to keep a peak
/// * `max_num_peaks` - growth iteration cap per peak
///
/// # Returns
///
/// * `Vec<Peak>` - sorted, trimmed peaks
///
/// # Example
///
/// ```rust
/// use iso_peaks::find_peaks;
///
/// let mut cov = vec![0.0; 200];
/// cov[100..110].iter_mut().for_each(|v| *v = 10.0);
/// let peaks = find_peaks(&cov, 30, 5.0, 0.05, 100);
/// assert_eq!(peaks.len(), 1);
/// ```
pub fn find_peaks(
    cov: &[f64],
    window_len: usize,
    min_score: f64,
    max_score_frac: f64,
    max_num_peaks: usize,
) -> Vec<Peak> {
    if window_len == 0 || cov.len() < window_len {
        return Vec::new();
    }

    let cumsum = cumsum(cov);
    let scores = (0..=cov.len() - window_len)
        .map(|idx| cumsum[idx + window_len] - cumsum[idx])
        .collect::<Vec<_>>();

    // best first, ties broken by the rightmost window
    let mut order = (0..scores.len()).collect::<Vec<_>>();
    order.sort_by(|a, b| {
        scores[*b]
            .partial_cmp(&scores[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.cmp(a))
    });

    let best = scores[order[0]];
    let min_score = min_score.max(MAX_CAGE_FRAC * best);
    let grower = PeakGrower {
        cumsum: &cumsum,
        len: cov.len(),
        grow_size: (window_len / 4).max(1),
        min_score,
        max_rounds: max_num_peaks,
    };

    let mut peaks: Vec<Peak> = Vec::new();
    for index in order {
        let overlaps = peaks
            .iter()
            .any(|p| !(index > p.stop || index + window_len < p.start));
        if overlaps {
            continue;
        }

        let score = scores[index];
        if score < min_score {
            break;
        }
        if let Some(first) = peaks.first() {
            if score / first.score < max_score_frac {
                break;
            }
        }

        let (start, stop) = grower.grow(index, (index + window_len).min(cov.len() - 1));
        peaks.push(Peak::new(start, stop, score));
    }

    if peaks.is_empty() {
        return peaks;
    }

    let mut rounds = 0;
    loop {
        let before = peaks.len();
        peaks = merge_round(peaks);
        rounds += 1;

        if peaks.len() == before {
            break;
        }
        if rounds >= MAX_PEAK_MERGE_ROUNDS {
            warn!("Peak merging did not converge after {} rounds", rounds);
            break;
        }
    }

    let trimmed = peaks
        .into_iter()
        .map(|peak| trim_peak(&cumsum, peak, max_score_frac))
        .collect::<Vec<_>>();

    let max_score = trimmed.iter().map(|p| p.score).fold(f64::MIN, f64::max);
    let mut trimmed = trimmed
        .into_iter()
        .filter(|p| p.score >= max_score_frac * max_score && p.score > min_score)
        .collect::<Vec<_>>();

    trimmed.sort_by(|a, b| a.start.cmp(&b.start).then(a.stop.cmp(&b.stop)));
    trimmed
}

/// shrinks a peak to the bases whose smoothed signal reaches
/// `sqrt(max_score_frac)` of the peak's own maximum
fn trim_peak(cumsum: &[f64], peak: Peak, max_score_frac: f64) -> Peak {
    let n = cumsum.len() - 1;
    if n < SMOOTHING_WINDOW {
        return Peak::new(peak.start, peak.stop, range_sum(cumsum, peak.start, peak.stop + 1));
    }

    let last_window = n - SMOOTHING_WINDOW;
    let hi = peak.stop.min(last_window);
    if peak.start > hi {
        return Peak::new(peak.start, peak.stop, range_sum(cumsum, peak.start, peak.stop + 1));
    }

    let smoothed = (peak.start..=hi)
        .map(|idx| range_sum(cumsum, idx, idx + SMOOTHING_WINDOW) / SMOOTHING_WINDOW as f64)
        .collect::<Vec<_>>();
    let max_smoothed = smoothed.iter().cloned().fold(f64::MIN, f64::max);
    let cutoff = max_smoothed * max_score_frac.sqrt();

    let good = smoothed
        .iter()
        .enumerate()
        .filter(|(_, v)| **v >= cutoff)
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();

    let (first, last) = match (good.first(), good.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return peak,
    };

    let start = (peak.start + first + 1).min(n - 1);
    let stop = (peak.start + last + 2).min(n - 1).max(start);
    Peak::new(start, stop, range_sum(cumsum, start, stop + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(len: usize, blocks: &[(usize, usize, f64)]) -> Vec<f64> {
        let mut cov = vec![0.0; len];
        for (start, stop, value) in blocks {
            cov[*start..=*stop].iter_mut().for_each(|v| *v = *value);
        }
        cov
    }

    #[test]
    fn test_single_peak_is_trimmed_to_signal() {
        let cov = signal(500, &[(200, 219, 10.0)]);
        let peaks = find_peaks(&cov, 30, 5.0, 0.05, 100);

        assert_eq!(peaks.len(), 1);
        let peak = peaks[0];
        assert_eq!((peak.start, peak.stop), (201, 221));
        assert_eq!(peak.score, 190.0);
    }

    #[test]
    fn test_two_distant_peaks() {
        let cov = signal(2000, &[(200, 219, 10.0), (1500, 1519, 8.0)]);
        let peaks = find_peaks(&cov, 30, 5.0, 0.05, 100);

        assert_eq!(peaks.len(), 2);
        assert!(peaks[0].stop < 300);
        assert!(peaks[1].start > 1400);
    }

    #[test]
    fn test_weak_peak_below_fraction_is_dropped() {
        let cov = signal(2000, &[(200, 219, 100.0), (1500, 1519, 1.0)]);
        let peaks = find_peaks(&cov, 30, 5.0, 0.05, 100);

        assert_eq!(peaks.len(), 1);
        assert!(peaks[0].start < 300);
    }

    #[test]
    fn test_no_signal_no_peaks() {
        assert!(find_peaks(&vec![0.0; 400], 30, 5.0, 0.05, 100).is_empty());
        assert!(find_peaks(&vec![1.0; 10], 30, 5.0, 0.05, 100).is_empty());
    }

    #[test]
    fn test_peak_calling_is_deterministic() {
        let cov = (0..3000)
            .map(|i| ((i * 7919) % 13) as f64 * if (i / 250) % 3 == 0 { 1.0 } else { 0.0 })
            .collect::<Vec<_>>();

        let first = find_peaks(&cov, 30, 5.0, 0.05, 100);
        for _ in 0..5 {
            assert_eq!(find_peaks(&cov, 30, 5.0, 0.05, 100), first);
        }
    }

    #[test]
    fn test_merge_round_joins_close_peaks() {
        let peaks = vec![Peak::new(100, 130, 5.0), Peak::new(135, 160, 3.0)];
        let merged = merge_round(peaks);

        assert_eq!(merged.len(), 1);
        assert_eq!((merged[0].start, merged[0].stop), (100, 160));
        assert_eq!(merged[0].score, 8.0);

        let far = merge_round(vec![Peak::new(100, 110, 1.0), Peak::new(500, 510, 1.0)]);
        assert_eq!(far.len(), 2);
    }
}
