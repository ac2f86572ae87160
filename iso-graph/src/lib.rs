//! Core module for building splice graphs and transcript models
//! Alejandro Gonzales-Irribarren, 2025
//!
//! This module turns the evidence gathered for one gene locus (coverage,
//! filtered junctions, called 5'/3' peaks, reference boundaries and empty
//! regions) into typed elements and candidate transcript models.
//!
//! In short, every evidence coordinate becomes a labeled cut. Consecutive
//! cuts define segments, which are kept as graph nodes when they are
//! expressed enough and are not introns. Nodes are joined by adjacency and
//! splice edges, TSS/TES pseudo-nodes hang from segments carrying boundary
//! labels, and every TSS to TES walk is a candidate transcript. Exons are
//! read directly from the labels, filtered on coverage gaps, and used to
//! discard paths built from weak exons. Enumeration stops at a fixed
//! ceiling and reports the locus instead of exhausting memory.

pub mod exons;
pub mod graph;
pub mod segments;
pub mod transcripts;

pub use exons::{filter_exon, find_exons, materialize_exons};
pub use graph::{passes_floor, CandidatePath, EdgeKind, NodeKind, SpliceGraph};
pub use segments::{build_labeled_segments, collect_cuts, LabeledSegments, LocusEvidence};
pub use transcripts::{assemble_transcripts, to_genomic_transcripts, LocalTranscript};

use config::{GraphParams, LocusOutcome};
use log::{debug, warn};
use packbed::{Bin, BinKind};

/// local-frame output of the graph stage for one locus
#[derive(Debug, Clone, PartialEq)]
pub struct LocusModels {
    pub elements: Vec<Bin>,
    pub transcripts: Vec<LocalTranscript>,
    pub outcome: Option<LocusOutcome>,
}

/// non-exon elements: introns, promoters and poly(A) sites
fn evidence_elements(ev: &LocusEvidence) -> Vec<Bin> {
    let introns = ev.junctions.iter().map(|jn| {
        Bin::new(BinKind::Intron, jn.start as u64, jn.stop as u64).with_score(jn.count)
    });
    let promoters = ev
        .tss
        .iter()
        .map(|(start, stop)| Bin::new(BinKind::Promoter, *start as u64, *stop as u64));
    let polyas = ev
        .tes
        .iter()
        .map(|(start, stop)| Bin::new(BinKind::Polya, *start as u64, *stop as u64));

    introns.chain(promoters).chain(polyas).collect()
}

/// Builds elements and candidate transcripts for one locus
///
/// # Arguments
///
/// * `ev` - evidence in the oriented locus frame
/// * `params` - graph thresholds
///
/// # Returns
///
/// * `LocusModels` - local elements, local transcripts and, when the
///   enumeration ceiling was hit, the corresponding outcome
///
/// # Example
///
/// ```rust, ignore
/// let models = build_models(&ev, &config.graph);
/// ```
pub fn build_models(ev: &LocusEvidence, params: &GraphParams) -> LocusModels {
    let segments = build_labeled_segments(ev);
    let graph = SpliceGraph::build(&segments, ev, params);
    let exons = materialize_exons(&segments, &graph, ev, params);

    let mut elements = evidence_elements(ev);
    elements.extend(exons.iter().cloned());

    match graph.enumerate_paths(params.max_candidate_transcripts) {
        Ok(paths) => {
            let transcripts = assemble_transcripts(&paths, &segments, &exons, ev);
            debug!(
                "{} segments, {} paths, {} transcripts",
                segments.len(),
                paths.len(),
                transcripts.len()
            );

            LocusModels {
                elements,
                transcripts,
                outcome: None,
            }
        }
        Err(outcome) => {
            warn!("{}", outcome);
            LocusModels {
                elements,
                transcripts: Vec::new(),
                outcome: Some(outcome),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packbed::LocalJunction;

    #[test]
    fn test_two_exon_locus_yields_single_model() {
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

        let models = build_models(&ev, &GraphParams::default());
        assert!(models.outcome.is_none());
        assert_eq!(models.transcripts.len(), 1);

        let tx = &models.transcripts[0];
        assert_eq!(tx.exons, vec![(0, 299), (600, 999)]);
        assert_eq!(tx.promoter, Some((0, 20)));
        assert_eq!(tx.polya, Some((979, 999)));

        let kinds = models.elements.iter().map(|e| e.kind).collect::<Vec<_>>();
        for kind in [
            BinKind::Intron,
            BinKind::Promoter,
            BinKind::Polya,
            BinKind::TssExon,
            BinKind::TesExon,
        ] {
            assert!(kinds.contains(&kind), "missing {}", kind);
        }
        let intron = models
            .elements
            .iter()
            .find(|e| e.kind == BinKind::Intron)
            .map(|e| e.score);
        assert_eq!(intron, Some(25));
    }

    #[test]
    fn test_too_many_candidates_keeps_elements() {
        let cov = vec![10.0f32; 2000];
        let junctions = vec![
            LocalJunction::new(200, 399, 5),
            LocalJunction::new(200, 799, 5),
            LocalJunction::new(500, 799, 5),
            LocalJunction::new(500, 1199, 5),
            LocalJunction::new(900, 1199, 5),
        ];
        let tss = vec![(0, 10)];
        let tes = vec![(1980, 1999)];
        let ev = LocusEvidence {
            tss: &tss,
            tes: &tes,
            ..LocusEvidence::new(&cov, &junctions)
        };

        let params = GraphParams {
            max_candidate_transcripts: 1,
            ..GraphParams::default()
        };
        let models = build_models(&ev, &params);

        assert!(matches!(
            models.outcome,
            Some(LocusOutcome::TooManyCandidates(2, 1))
        ));
        assert!(models.transcripts.is_empty());
        assert!(!models.elements.is_empty());
    }

    #[test]
    fn test_covered_intron_is_never_an_exon() {
        let cov = vec![10.0f32; 1000];
        let junctions = vec![LocalJunction::new(300, 599, 25)];
        let tss = vec![(0, 20)];
        let tes = vec![(979, 999)];
        let ev = LocusEvidence {
            tss: &tss,
            tes: &tes,
            ..LocusEvidence::new(&cov, &junctions)
        };

        let models = build_models(&ev, &GraphParams::default());
        let structures = models
            .transcripts
            .iter()
            .map(|t| t.exons.clone())
            .collect::<Vec<_>>();

        assert_eq!(structures, vec![vec![(0, 299), (600, 999)]]);
        assert!(!models
            .elements
            .iter()
            .any(|e| e.kind == BinKind::SingleExonGene));
    }
}
