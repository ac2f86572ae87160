use config::{SegmentParams, INTRON_COVERAGE_RATIO, INTRON_FLANK_LEN, INTRON_FLANK_OFFSET};
use hashbrown::HashMap;
use packbed::{Junction, LocalJunction};

/// contig-level junction filter
///
/// Drops junctions whose `count + 1` is a small fraction of the strongest
/// junction sharing their donor or acceptor, and junctions with implausible
/// lengths.
pub fn filter_junctions(junctions: Vec<Junction>, params: &SegmentParams) -> Vec<Junction> {
    let mut max_donor: HashMap<u64, u64> = HashMap::new();
    let mut max_acceptor: HashMap<u64, u64> = HashMap::new();

    for jn in junctions.iter() {
        let donor = max_donor.entry(jn.start).or_insert(0);
        *donor = (*donor).max(jn.count);
        let acceptor = max_acceptor.entry(jn.stop).or_insert(0);
        *acceptor = (*acceptor).max(jn.count);
    }

    let before = junctions.len();
    let kept = junctions
        .into_iter()
        .filter(|jn| {
            if jn.len() > params.max_intron_size || jn.len() < params.min_intron_size {
                return false;
            }

            let ratio = |max: u64| (jn.count + 1) as f64 / max.max(1) as f64;
            let donor = max_donor.get(&jn.start).copied().unwrap_or(0);
            let acceptor = max_acceptor.get(&jn.stop).copied().unwrap_or(0);

            ratio(donor) >= params.junction_ratio && ratio(acceptor) >= params.junction_ratio
        })
        .collect::<Vec<_>>();

    log::debug!("Junction filter kept {}/{} junctions", kept.len(), before);
    kept
}

fn window_mean(cov: &[f32], start: isize, stop: isize) -> f64 {
    let len = cov.len() as isize;
    let (start, stop) = (start.clamp(0, len), stop.clamp(0, len));
    if stop <= start {
        return 0.0;
    }

    cov[start as usize..stop as usize]
        .iter()
        .map(|v| *v as f64)
        .sum::<f64>()
        / INTRON_FLANK_LEN as f64
}

/// in-locus junction filter, everything in the oriented locus frame
///
/// A junction survives when both of its flanking exonic bases fall inside
/// `regions`, its length is admissible, and the coverage just inside either
/// end of the intron does not dwarf its read count.
pub fn filter_locus_junctions(
    junctions: &[LocalJunction],
    cov: &[f32],
    regions: &[(usize, usize)],
    params: &SegmentParams,
) -> Vec<LocalJunction> {
    let inside = |pos: usize| regions.iter().any(|(s, e)| *s <= pos && pos <= *e);
    let offset = INTRON_FLANK_OFFSET as isize;
    let flank = (INTRON_FLANK_OFFSET + INTRON_FLANK_LEN) as isize;

    junctions
        .iter()
        .filter(|jn| jn.start > 0 && jn.stop + 1 < cov.len())
        .filter(|jn| inside(jn.start - 1) && inside(jn.stop + 1))
        .filter(|jn| (jn.len() as u64) <= params.max_intron_size)
        .filter(|jn| {
            let (start, stop) = (jn.start as isize, jn.stop as isize);
            let left = window_mean(cov, start + offset, start + flank);
            let right = window_mean(cov, stop - flank, stop - offset);
            let support = (jn.count + 1) as f64 * INTRON_COVERAGE_RATIO;

            support >= left && support >= right
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Strand;

    fn jn(start: u64, stop: u64, count: u64) -> Junction {
        Junction {
            chrom: "chr1".into(),
            strand: Strand::Forward,
            start,
            stop,
            count,
        }
    }

    #[test]
    fn test_filter_junctions_ratio() {
        let params = SegmentParams::default();
        let junctions = vec![jn(100, 200, 1000), jn(100, 300, 2), jn(100, 400, 50)];
        let kept = filter_junctions(junctions, &params);

        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|j| j.count != 2));
    }

    #[test]
    fn test_filter_junctions_length() {
        let params = SegmentParams::default();
        let kept = filter_junctions(vec![jn(100, 100 + 60_000, 10), jn(10, 20, 3)], &params);

        assert_eq!(kept, vec![jn(10, 20, 3)]);
    }

    #[test]
    fn test_filter_locus_junctions_intronic_coverage() {
        let params = SegmentParams::default();
        let mut cov = vec![10.0f32; 400];
        // retained intron signal inside the first junction
        for v in cov.iter_mut().take(200).skip(100) {
            *v = 500.0;
        }
        for v in cov.iter_mut().take(350).skip(250) {
            *v = 0.0;
        }

        let junctions = vec![LocalJunction::new(100, 199, 3), LocalJunction::new(250, 349, 3)];
        let kept = filter_locus_junctions(&junctions, &cov, &[(0, 399)], &params);

        assert_eq!(kept, vec![LocalJunction::new(250, 349, 3)]);
    }

    #[test]
    fn test_filter_locus_junctions_outside_regions() {
        let params = SegmentParams::default();
        let cov = vec![1.0f32; 400];
        let junctions = vec![LocalJunction::new(100, 199, 3)];

        assert!(filter_locus_junctions(&junctions, &cov, &[(0, 98), (300, 399)], &params).is_empty());
        assert_eq!(
            filter_locus_junctions(&junctions, &cov, &[(0, 99), (200, 399)], &params).len(),
            1
        );
    }
}
