use std::collections::BTreeSet;

use hashbrown::HashSet;
use log::debug;
use packbed::{Bin, BinKind, GeneLocus, Transcript};

use crate::graph::CandidatePath;
use crate::segments::{LabeledSegments, LocusEvidence};

/// transcript model in the oriented locus frame, exons 5' to 3'
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalTranscript {
    pub exons: Vec<(usize, usize)>,
    pub promoter: Option<(usize, usize)>,
    pub polya: Option<(usize, usize)>,
}

impl LocalTranscript {
    pub fn new(exons: Vec<(usize, usize)>, ev: &LocusEvidence) -> Self {
        let first = exons.first().map(|e| e.0);
        let last = exons.last().map(|e| e.1);

        let promoter = ev
            .tss
            .iter()
            .find(|(start, _)| Some(*start) == first)
            .copied();
        let polya = ev.tes.iter().find(|(_, stop)| Some(*stop) == last).copied();

        Self {
            exons,
            promoter,
            polya,
        }
    }

    pub fn is_single_exon(&self) -> bool {
        self.exons.len() == 1
    }
}

fn exon_set(exons: &[Bin], kind: BinKind) -> HashSet<(usize, usize)> {
    exons
        .iter()
        .filter(|e| e.kind == kind)
        .map(|e| (e.start as usize, e.stop as usize))
        .collect()
}

/// Keeps the spliced paths whose exons all survived filtering and adds
/// one transcript per single-exon gene
///
/// # Arguments
///
/// * `paths` - enumerated TSS to TES paths
/// * `segments` - segments the paths walk over
/// * `exons` - materialized and filtered exon bins
/// * `ev` - locus evidence, for promoter and poly(A) matching
///
/// # Returns
///
/// * `Vec<LocalTranscript>` - sorted, deduplicated local models
pub fn assemble_transcripts(
    paths: &[CandidatePath],
    segments: &LabeledSegments,
    exons: &[Bin],
    ev: &LocusEvidence,
) -> Vec<LocalTranscript> {
    let tss_exons = exon_set(exons, BinKind::TssExon);
    let internal_exons = exon_set(exons, BinKind::InternalExon);
    let tes_exons = exon_set(exons, BinKind::TesExon);

    let mut models: BTreeSet<LocalTranscript> = BTreeSet::new();
    let mut rejected = 0;

    for path in paths.iter().filter(|p| p.is_spliced()) {
        let structure = path.exons(segments);
        let (Some(first), Some(last)) = (structure.first(), structure.last()) else {
            continue;
        };

        let inner = &structure[1..structure.len() - 1];
        if tss_exons.contains(first)
            && tes_exons.contains(last)
            && inner.iter().all(|e| internal_exons.contains(e))
        {
            models.insert(LocalTranscript::new(structure, ev));
        } else {
            rejected += 1;
        }
    }

    for exon in exons.iter().filter(|e| e.kind == BinKind::SingleExonGene) {
        let structure = vec![(exon.start as usize, exon.stop as usize)];
        models.insert(LocalTranscript::new(structure, ev));
    }

    debug!(
        "Assembled {} transcripts ({} paths with filtered exons)",
        models.len(),
        rejected
    );
    models.into_iter().collect()
}

/// Maps local models onto the genome and names them `<gene_id>_<n>`
///
/// Transcripts are numbered from 1 after sorting by genomic structure.
pub fn to_genomic_transcripts(locus: &GeneLocus, models: &[LocalTranscript]) -> Vec<Transcript> {
    let frame = locus.frame();

    let mut genomic = models
        .iter()
        .map(|model| {
            let mut exons = model
                .exons
                .iter()
                .map(|(start, stop)| frame.interval_to_genomic(*start, *stop))
                .collect::<Vec<_>>();
            exons.sort_unstable();

            let promoter = model.promoter.map(|(s, e)| frame.interval_to_genomic(s, e));
            let polya = model.polya.map(|(s, e)| frame.interval_to_genomic(s, e));
            (exons, promoter, polya)
        })
        .collect::<Vec<_>>();
    genomic.sort();

    genomic
        .into_iter()
        .enumerate()
        .map(|(idx, (exons, promoter, polya))| {
            let mut tx = Transcript::new(format!("{}_{}", locus.id, idx + 1), locus, exons);
            tx.promoter = promoter;
            tx.polya = polya;
            tx
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Strand;

    #[test]
    fn test_promoter_and_polya_matching() {
        let cov = vec![1.0f32; 500];
        let tss = vec![(0, 20), (100, 120)];
        let tes = vec![(480, 499)];
        let ev = LocusEvidence {
            tss: &tss,
            tes: &tes,
            ..LocusEvidence::new(&cov, &[])
        };

        let tx = LocalTranscript::new(vec![(100, 200), (300, 499)], &ev);
        assert_eq!(tx.promoter, Some((100, 120)));
        assert_eq!(tx.polya, Some((480, 499)));

        let tx = LocalTranscript::new(vec![(50, 499)], &ev);
        assert_eq!(tx.promoter, None);
        assert!(tx.is_single_exon());
    }

    #[test]
    fn test_genomic_transcripts_on_minus_strand() {
        let locus = GeneLocus::new("chr2", Strand::Reverse, vec![(1000, 1999)]);
        let models = vec![LocalTranscript {
            exons: vec![(0, 99), (500, 999)],
            promoter: Some((0, 20)),
            polya: Some((980, 999)),
        }];

        let txs = to_genomic_transcripts(&locus, &models);
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].id, "chr2_m_1000_1999_1");
        assert_eq!(txs[0].exons, vec![(1000, 1499), (1900, 1999)]);
        assert_eq!(txs[0].promoter, Some((1979, 1999)));
        assert_eq!(txs[0].polya, Some((1000, 1019)));
    }
}
