use std::collections::{BTreeMap, BTreeSet};

use packbed::{Bin, BinKind, Label, LocalJunction};

/// per-locus evidence in the oriented locus frame
#[derive(Debug, Clone, Copy)]
pub struct LocusEvidence<'a> {
    pub cov: &'a [f32],
    pub junctions: &'a [LocalJunction],
    pub tss: &'a [(usize, usize)],
    pub tes: &'a [(usize, usize)],
    pub ref_tss: &'a [usize],
    pub ref_tes: &'a [usize],
    pub empty: &'a [(usize, usize)],
}

impl<'a> LocusEvidence<'a> {
    pub fn new(cov: &'a [f32], junctions: &'a [LocalJunction]) -> Self {
        Self {
            cov,
            junctions,
            tss: &[],
            tes: &[],
            ref_tss: &[],
            ref_tes: &[],
            empty: &[],
        }
    }

    pub fn len(&self) -> usize {
        self.cov.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cov.is_empty()
    }

    pub fn mean(&self, start: usize, stop: usize) -> f64 {
        let stop = stop.min(self.cov.len().saturating_sub(1));
        if stop < start || self.cov.is_empty() {
            return 0.0;
        }

        self.cov[start..=stop].iter().map(|v| *v as f64).sum::<f64>() / (stop - start + 1) as f64
    }
}

/// labels keyed by cut; a cut at `p` separates `p - 1` from `p`
pub type Cuts = BTreeMap<usize, BTreeSet<Label>>;

pub fn collect_cuts(ev: &LocusEvidence) -> Cuts {
    let len = ev.len();
    let mut cuts: Cuts = BTreeMap::new();
    let mut add = |pos: usize, label: Label| {
        if pos <= len {
            cuts.entry(pos).or_default().insert(label);
        }
    };

    add(0, Label::GeneBoundary);
    add(len, Label::GeneBoundary);

    for jn in ev.junctions {
        if jn.start == 0 || jn.stop + 1 >= len {
            continue;
        }
        add(jn.donor_cut(), Label::DonorJunction);
        add(jn.acceptor_cut(), Label::ReceiverJunction);
    }

    for (start, _) in ev.tss {
        add(*start, Label::CagePeak);
    }
    for (_, stop) in ev.tes {
        add(stop + 1, Label::PolyaPeak);
    }
    for pos in ev.ref_tss {
        add(*pos, Label::Tss);
    }
    for pos in ev.ref_tes {
        add(pos + 1, Label::Tes);
    }
    for (start, stop) in ev.empty {
        add(*start, Label::EmptyStart);
        add(stop + 1, Label::EmptyStop);
    }

    cuts
}

/// segments between consecutive cuts, with their type and mean coverage
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSegments {
    pub bins: Vec<Bin>,
    pub empty: Vec<bool>,
}

impl LabeledSegments {
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// index of the segment starting exactly at `pos`
    pub fn starting_at(&self, pos: usize) -> Option<usize> {
        self.bins
            .binary_search_by(|bin| (bin.start as usize).cmp(&pos))
            .ok()
    }

    /// index of the segment ending exactly at `pos`
    pub fn ending_at(&self, pos: usize) -> Option<usize> {
        self.bins
            .binary_search_by(|bin| (bin.stop as usize).cmp(&pos))
            .ok()
    }
}

pub fn build_labeled_segments(ev: &LocusEvidence) -> LabeledSegments {
    let cuts = collect_cuts(ev);
    let introns = ev
        .junctions
        .iter()
        .map(|jn| (jn.start, jn.stop))
        .collect::<BTreeSet<_>>();

    let positions = cuts.iter().collect::<Vec<_>>();
    let mut bins = Vec::with_capacity(positions.len());
    let mut empty = Vec::with_capacity(positions.len());

    for pair in positions.windows(2) {
        let ((start, left), (next, right)) = (pair[0], pair[1]);
        let stop = next - 1;

        let kind = if left.contains(&Label::DonorJunction)
            && right.contains(&Label::ReceiverJunction)
            && introns.contains(&(*start, stop))
        {
            BinKind::Intron
        } else {
            BinKind::Segment
        };

        let is_empty = ev
            .empty
            .iter()
            .any(|(a, b)| *a <= *start && stop <= *b);

        bins.push(
            Bin::new(kind, *start as u64, stop as u64)
                .with_labels(left.clone(), right.clone())
                .with_expression(ev.mean(*start, stop)),
        );
        empty.push(is_empty);
    }

    LabeledSegments { bins, empty }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cuts_and_labels() {
        let cov = vec![10.0f32; 1000];
        let junctions = vec![LocalJunction::new(300, 599, 10)];
        let tss = vec![(10, 30)];
        let tes = vec![(950, 979)];
        let ev = LocusEvidence {
            tss: &tss,
            tes: &tes,
            ..LocusEvidence::new(&cov, &junctions)
        };

        let segments = build_labeled_segments(&ev);
        let coords = segments
            .bins
            .iter()
            .map(|b| (b.start, b.stop))
            .collect::<Vec<_>>();

        assert_eq!(
            coords,
            vec![(0, 9), (10, 299), (300, 599), (600, 979), (980, 999)]
        );
        assert_eq!(segments.bins[2].kind, BinKind::Intron);
        assert!(segments.bins[1].left_labels.contains(&Label::CagePeak));
        assert!(segments.bins[1].right_labels.contains(&Label::DonorJunction));
        assert!(segments.bins[3].left_labels.contains(&Label::ReceiverJunction));
        assert!(segments.bins[3].right_labels.contains(&Label::PolyaPeak));
        assert_eq!(segments.starting_at(600), Some(3));
        assert_eq!(segments.ending_at(299), Some(1));
        assert_eq!(segments.bins[1].expression, Some(10.0));
    }

    #[test]
    fn test_empty_segments_flagged() {
        let mut cov = vec![5.0f32; 600];
        cov[200..400].iter_mut().for_each(|v| *v = 0.0);
        let empty = vec![(200, 399)];
        let ev = LocusEvidence {
            empty: &empty,
            ..LocusEvidence::new(&cov, &[])
        };

        let segments = build_labeled_segments(&ev);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments.empty, vec![false, true, false]);
        assert!(segments.bins[1].left_labels.contains(&Label::EmptyStart));
        assert!(segments.bins[2].left_labels.contains(&Label::EmptyStop));
    }
}
