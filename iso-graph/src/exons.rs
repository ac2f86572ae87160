use config::GraphParams;
use hashbrown::HashSet;
use packbed::{Bin, BinKind, Label};

use crate::graph::SpliceGraph;
use crate::segments::{LabeledSegments, LocusEvidence};

fn has(labels: &std::collections::BTreeSet<Label>, f: fn(&Label) -> bool) -> bool {
    labels.iter().any(f)
}

fn is_junction(label: &Label) -> bool {
    matches!(label, Label::DonorJunction | Label::ReceiverJunction)
}

/// exon types allowed between a left and a right set of labels
fn exon_kinds(left: &Bin, right: &Bin, crossed_junction: bool) -> Vec<BinKind> {
    let starts_tss = has(&left.left_labels, Label::is_tss);
    let starts_receiver = left.left_labels.contains(&Label::ReceiverJunction);
    let stops_donor = right.right_labels.contains(&Label::DonorJunction);
    let stops_tes = has(&right.right_labels, Label::is_tes);

    let mut kinds = Vec::new();
    if starts_tss && stops_donor {
        kinds.push(BinKind::TssExon);
    }
    if starts_receiver && stops_donor {
        kinds.push(BinKind::InternalExon);
    }
    if starts_receiver && stops_tes {
        kinds.push(BinKind::TesExon);
    }
    if starts_tss && stops_tes && !crossed_junction {
        kinds.push(BinKind::SingleExonGene);
    }
    kinds
}

/// Finds every exon candidate over the nodes of a splice graph
///
/// # Arguments
///
/// * `segments` - labeled segments of the locus
/// * `graph` - splice graph built over `segments`
/// * `ev` - locus evidence, used for coverage means
///
/// # Returns
///
/// * `Vec<Bin>` - exon bins in the local frame, not yet filtered
///
/// # Example
///
/// ```rust, ignore
/// let exons = find_exons(&segments, &graph, &ev);
/// ```
pub fn find_exons(segments: &LabeledSegments, graph: &SpliceGraph, ev: &LocusEvidence) -> Vec<Bin> {
    let mut exons = Vec::new();

    for i in 0..segments.len() {
        let first = &segments.bins[i];
        if graph.node_of_segment(i).is_none() || !has(&first.left_labels, Label::starts_exon) {
            continue;
        }

        let mut crossed_junction = false;
        let mut j = i;
        while j < segments.len() && graph.node_of_segment(j).is_some() {
            let last = &segments.bins[j];
            if j > i && has(&last.left_labels, is_junction) {
                crossed_junction = true;
            }

            if has(&last.right_labels, Label::stops_exon) {
                for kind in exon_kinds(first, last, crossed_junction) {
                    let (start, stop) = (first.start, last.stop);
                    exons.push(
                        Bin::new(kind, start, stop)
                            .with_labels(first.left_labels.clone(), last.right_labels.clone())
                            .with_expression(ev.mean(start as usize, stop as usize)),
                    );
                }
            }
            j += 1;
        }
    }

    exons
}

/// true when every window of the exon body reaches the expression floor
///
/// TSS exons ignore their first `tss_bases_to_skip` bases and TES exons
/// their last `tes_bases_to_skip`; bodies shorter than one window pass.
pub fn filter_exon(exon: &Bin, ev: &LocusEvidence, params: &GraphParams) -> bool {
    let mut start = exon.start as usize;
    let mut stop = exon.stop as usize + 1;

    if matches!(exon.kind, BinKind::TssExon | BinKind::SingleExonGene) {
        start += params.tss_bases_to_skip;
    }
    if matches!(exon.kind, BinKind::TesExon | BinKind::SingleExonGene) {
        stop = stop.saturating_sub(params.tes_bases_to_skip);
    }

    if stop <= start || stop - start < params.filter_window {
        return true;
    }

    let len = stop - start;
    let n_div = (len / params.filter_window.max(1)).max(1);
    let step = len / n_div;

    (0..n_div).all(|k| {
        let w_start = start + k * step;
        let w_stop = if k + 1 == n_div { stop } else { w_start + step };
        ev.mean(w_start, w_stop - 1) >= params.min_exon_bpkm
    })
}

/// filtered, deduplicated exons ordered by type and position
pub fn materialize_exons(
    segments: &LabeledSegments,
    graph: &SpliceGraph,
    ev: &LocusEvidence,
    params: &GraphParams,
) -> Vec<Bin> {
    let mut seen = HashSet::new();
    let mut exons = find_exons(segments, graph, ev)
        .into_iter()
        .filter(|exon| filter_exon(exon, ev, params))
        .filter(|exon| seen.insert((exon.kind, exon.start, exon.stop)))
        .collect::<Vec<_>>();

    exons.sort_by(|a, b| (a.kind, a.start, a.stop).cmp(&(b.kind, b.start, b.stop)));
    exons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segments::build_labeled_segments;
    use packbed::LocalJunction;

    fn coords(exons: &[Bin], kind: BinKind) -> Vec<(u64, u64)> {
        exons
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| (e.start, e.stop))
            .collect()
    }

    #[test]
    fn test_exon_types_from_labels() {
        let mut cov = vec![10.0f32; 1000];
        cov[300..600].iter_mut().for_each(|v| *v = 0.0);
        let junctions = vec![LocalJunction::new(300, 599, 25)];
        let tss = vec![(0, 20)];
        let tes = vec![(979, 999)];
        let empty = vec![(300, 599)];
        let ev = LocusEvidence {
            tss: &tss,
            tes: &tes,
            empty: &empty,
            ..LocusEvidence::new(&cov, &junctions)
        };

        let segments = build_labeled_segments(&ev);
        let params = GraphParams::default();
        let graph = SpliceGraph::build(&segments, &ev, &params);
        let exons = materialize_exons(&segments, &graph, &ev, &params);

        assert_eq!(coords(&exons, BinKind::TssExon), vec![(0, 299)]);
        assert_eq!(coords(&exons, BinKind::TesExon), vec![(600, 999)]);
        assert!(coords(&exons, BinKind::InternalExon).is_empty());
        assert!(coords(&exons, BinKind::SingleExonGene).is_empty());
    }

    #[test]
    fn test_single_exon_gene() {
        let cov = vec![4.0f32; 800];
        let tss = vec![(0, 30)];
        let tes = vec![(770, 799)];
        let ev = LocusEvidence {
            tss: &tss,
            tes: &tes,
            ..LocusEvidence::new(&cov, &[])
        };

        let segments = build_labeled_segments(&ev);
        let params = GraphParams::default();
        let graph = SpliceGraph::build(&segments, &ev, &params);
        let exons = materialize_exons(&segments, &graph, &ev, &params);

        assert_eq!(exons.len(), 1);
        assert_eq!(exons[0].kind, BinKind::SingleExonGene);
        assert_eq!(exons[0].coords(), (0, 799));
    }

    #[test]
    fn test_filter_exon_rejects_gapped_body() {
        let mut cov = vec![10.0f32; 2000];
        cov[800..950].iter_mut().for_each(|v| *v = 0.0);
        let ev = LocusEvidence::new(&cov, &[]);
        let params = GraphParams::default();

        let internal = Bin::new(BinKind::InternalExon, 500, 1499);
        assert!(!filter_exon(&internal, &ev, &params));

        let short = Bin::new(BinKind::InternalExon, 820, 900);
        assert!(filter_exon(&short, &ev, &params));

        let tes = Bin::new(BinKind::TesExon, 600, 1200);
        assert!(!filter_exon(&tes, &ev, &params));
        // gap inside the skipped 3' tail
        let tes = Bin::new(BinKind::TesExon, 400, 1000);
        assert!(filter_exon(&tes, &ev, &params));
    }
}
