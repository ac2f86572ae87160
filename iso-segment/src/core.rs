//! Core module for segmenting contigs into candidate gene loci
//! Alejandro Gonzales-Irribarren, 2025
//!
//! This module contains the initial contig-wide segmentation and the
//! per-locus re-segmentation step.
//!
//! In short, every maximal run of essentially zero coverage longer than a
//! minimum length is considered empty; what remains are transcribed
//! regions. Regions joined by a splice junction belong to the same gene,
//! so genes are the connected components of the region/junction graph.
//! Once peaks have been called inside a locus, long empty stretches and
//! the space between a poly(A) site and the next TSS can reveal that a
//! locus actually holds several genes; `re_segment` splits it.

use config::{flatten, SegmentParams, Strand};
use log::{debug, info};
use packbed::{GeneLocus, Junction, LocalJunction};

use crate::utils::{cluster_regions, cluster_split_points, find_empty_regions, transcribed_regions};

const MIN_INTERGENIC_LEN: usize = 10;

/// Splits one contig/strand into candidate gene loci
///
/// # Arguments
///
/// * `chrom` - contig name
/// * `strand` - strand of the signal
/// * `cov` - per-base signal over the whole contig, genomic order
/// * `junctions` - filtered junctions on this contig/strand
/// * `params` - segmentation thresholds
///
/// # Returns
///
/// * `Vec<GeneLocus>` - sorted loci with pairwise disjoint regions
///
/// # Example
///
/// ```rust, ignore
/// let loci = segment_contig("chr1", Strand::Forward, &cov, &junctions, &params);
/// ```
pub fn segment_contig(
    chrom: &str,
    strand: Strand,
    cov: &[f32],
    junctions: &[Junction],
    params: &SegmentParams,
) -> Vec<GeneLocus> {
    if cov.is_empty() {
        return Vec::new();
    }

    let empty = find_empty_regions(cov, params.empty_threshold, params.min_empty_region_len);
    segment_empty_regions(chrom, strand, cov.len(), &empty, junctions, params)
}

/// `segment_contig` from the empty runs of a contig of length `len`, for
/// signals scanned in chunks with `EmptyScanner`
pub fn segment_empty_regions(
    chrom: &str,
    strand: Strand,
    len: usize,
    empty: &[(usize, usize)],
    junctions: &[Junction],
    params: &SegmentParams,
) -> Vec<GeneLocus> {
    if len == 0 {
        return Vec::new();
    }

    let regions = transcribed_regions(empty, len);
    if regions.is_empty() {
        debug!("No transcribed regions in {}:{}", chrom, strand);
        return Vec::new();
    }

    let local = junctions
        .iter()
        .map(|jn| LocalJunction::new(jn.start as usize, jn.stop as usize, jn.count))
        .collect::<Vec<_>>();

    let last = len - 1;
    let flank = params.gene_flank as usize;
    let mut loci = cluster_regions(&regions, &local)
        .into_iter()
        .map(|cluster| {
            let expanded = cluster
                .into_iter()
                .map(|(start, stop)| {
                    (start.saturating_sub(flank) as u64, (stop + flank).min(last) as u64)
                })
                .collect::<Vec<_>>();

            GeneLocus::new(chrom, strand, flatten(expanded))
        })
        .collect::<Vec<_>>();

    loci.sort_unstable_by_key(|locus| (locus.start(), locus.stop()));

    info!(
        "Found {} candidate loci in {}:{}",
        loci.len(),
        chrom,
        strand
    );
    loci
}

/// TES-to-TSS stretches not interrupted by a junction boundary
///
/// Runs from the end of each TES peak to the start of the next TSS peak,
/// provided no splice site lies strictly before that TSS.
pub fn intergenic_space(
    tss: &[(usize, usize)],
    tes: &[(usize, usize)],
    junctions: &[LocalJunction],
) -> Vec<(usize, usize)> {
    let mut tss_starts = tss.iter().map(|p| p.0).collect::<Vec<_>>();
    tss_starts.sort_unstable();

    let mut jn_cuts = junctions
        .iter()
        .flat_map(|jn| [jn.start.saturating_sub(1), jn.stop + 1])
        .collect::<Vec<_>>();
    jn_cuts.sort_unstable();

    let mut space = Vec::new();
    for (_, end) in tes.iter() {
        let next_tss = tss_starts.iter().find(|s| **s > *end);
        let next_jn = jn_cuts.iter().find(|c| **c > *end);

        match (next_tss, next_jn) {
            (Some(s), Some(c)) if c < s => continue,
            (Some(s), _) => space.push((*end, *s)),
            (None, _) => continue,
        }
    }

    space.sort_unstable();
    space.dedup();
    space
}

/// Splits a single-region locus once boundary peaks are known
///
/// Everything is in the oriented locus frame. Returns `None` when the locus
/// stays whole; otherwise the replacement loci, each strictly smaller than
/// the original, which must be queued again.
pub fn re_segment(
    locus: &GeneLocus,
    cov: &[f32],
    tss: &[(usize, usize)],
    tes: &[(usize, usize)],
    junctions: &[LocalJunction],
    params: &SegmentParams,
) -> Option<Vec<GeneLocus>> {
    if locus.regions.len() != 1 || tss.is_empty() || tes.is_empty() || cov.is_empty() {
        return None;
    }

    let mut empty = find_empty_regions(cov, params.empty_threshold, params.min_gene_length);

    for (start, stop) in intergenic_space(tss, tes, junctions) {
        if stop < start + MIN_INTERGENIC_LEN || stop > cov.len() {
            continue;
        }

        let inner = &cov[start + 1..stop];
        empty.extend(
            find_empty_regions(inner, params.empty_threshold, params.min_empty_region_len)
                .into_iter()
                .map(|(s, e)| (start + 1 + s, start + 1 + e)),
        );
    }

    if empty.is_empty() {
        return None;
    }

    let split_points = flatten(empty)
        .into_iter()
        .map(|(start, stop)| (start + stop) / 2)
        .collect::<Vec<_>>();

    let clusters = cluster_split_points(&split_points, cov.len(), junctions);
    if clusters.len() <= 1 {
        return None;
    }

    let frame = locus.frame();
    let sub_loci = clusters
        .into_iter()
        .filter(|regions| {
            let span = regions.last().map(|r| r.1).unwrap_or(0)
                - regions.first().map(|r| r.0).unwrap_or(0)
                + 1;
            span >= params.min_gene_length
        })
        .map(|regions| {
            let genomic = regions
                .into_iter()
                .map(|(start, stop)| frame.interval_to_genomic(start, stop))
                .collect::<Vec<_>>();
            GeneLocus::new(&locus.chrom, locus.strand, genomic)
        })
        .collect::<Vec<_>>();

    debug!(
        "Re-segmented {} into {} loci",
        locus.name(),
        sub_loci.len()
    );

    Some(sub_loci)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::EmptyScanner;

    fn jn(start: u64, stop: u64, count: u64) -> Junction {
        Junction {
            chrom: "chr1".into(),
            strand: Strand::Forward,
            start,
            stop,
            count,
        }
    }

    fn coverage(len: usize, covered: &[(usize, usize)]) -> Vec<f32> {
        let mut cov = vec![0.0f32; len];
        for (start, stop) in covered {
            for v in cov.iter_mut().take(stop + 1).skip(*start) {
                *v = 10.0;
            }
        }
        cov
    }

    #[test]
    fn test_segment_contig_joins_spliced_regions() {
        let params = SegmentParams::default();
        let cov = coverage(2000, &[(200, 300), (600, 800), (1500, 1700)]);
        let loci = segment_contig("chr1", Strand::Forward, &cov, &[jn(301, 599, 20)], &params);

        assert_eq!(loci.len(), 2);
        assert_eq!(loci[0].regions, vec![(190, 310), (590, 810)]);
        assert_eq!(loci[1].regions, vec![(1490, 1710)]);
    }

    #[test]
    fn test_segment_contig_regions_are_disjoint_and_sorted() {
        let params = SegmentParams::default();
        let cov = coverage(3000, &[(0, 100), (400, 500), (900, 1000), (2900, 2999)]);
        let loci = segment_contig("chr1", Strand::Reverse, &cov, &[jn(101, 899, 5)], &params);

        assert_eq!(loci.len(), 3);
        assert_eq!(loci[0].regions, vec![(0, 110), (890, 1010)]);
        for locus in loci.iter() {
            locus.regions.windows(2).for_each(|w| assert!(w[0].1 < w[1].0));
        }

        let mut all = loci.iter().flat_map(|l| l.regions.clone()).collect::<Vec<_>>();
        all.sort_unstable();
        all.windows(2).for_each(|w| assert!(w[0].1 < w[1].0));
        assert_eq!(loci.last().unwrap().regions[0].1, 2999);
    }

    #[test]
    fn test_chunked_scan_matches_whole_contig() {
        let params = SegmentParams::default();
        let cov = coverage(2000, &[(200, 300), (600, 800), (1500, 1700)]);
        let junctions = [jn(301, 599, 20)];

        let mut scanner = EmptyScanner::new(params.empty_threshold, params.min_empty_region_len);
        cov.chunks(128).for_each(|chunk| scanner.push(chunk));
        let empty = scanner.finish();

        assert_eq!(
            segment_empty_regions("chr1", Strand::Forward, cov.len(), &empty, &junctions, &params),
            segment_contig("chr1", Strand::Forward, &cov, &junctions, &params)
        );
    }

    #[test]
    fn test_segment_contig_empty_signal() {
        let params = SegmentParams::default();
        let cov = vec![0.0f32; 1000];
        assert!(segment_contig("chr1", Strand::Forward, &cov, &[], &params).is_empty());
    }

    #[test]
    fn test_re_segment_splits_at_long_gap() {
        let params = SegmentParams::default();
        let cov = coverage(1000, &[(0, 299), (700, 999)]);
        let locus = GeneLocus::new("chr1", Strand::Forward, vec![(5000, 5999)]);

        let tss = vec![(0, 20), (700, 720)];
        let tes = vec![(280, 299), (980, 999)];
        let split = re_segment(&locus, &cov, &tss, &tes, &[], &params).unwrap();

        assert_eq!(split.len(), 2);
        assert!(split.iter().all(|l| l.span() < locus.span()));
        assert_eq!(split[0].start(), 5000);
        assert_eq!(split[1].stop(), 5999);
    }

    #[test]
    fn test_re_segment_keeps_spliced_locus() {
        let params = SegmentParams::default();
        let cov = coverage(1000, &[(0, 299), (700, 999)]);
        let locus = GeneLocus::new("chr1", Strand::Forward, vec![(0, 999)]);
        let junctions = vec![LocalJunction::new(300, 699, 12)];

        let tss = vec![(0, 20)];
        let tes = vec![(980, 999)];
        assert!(re_segment(&locus, &cov, &tss, &tes, &junctions, &params).is_none());
    }

    #[test]
    fn test_intergenic_space_blocked_by_junction() {
        let tss = vec![(500, 510)];
        let tes = vec![(100, 120)];

        assert_eq!(intergenic_space(&tss, &tes, &[]), vec![(120, 500)]);

        let junctions = vec![LocalJunction::new(200, 300, 1)];
        assert!(intergenic_space(&tss, &tes, &junctions).is_empty());
    }
}
