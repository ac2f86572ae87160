use config::Strand;
use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;

use crate::record::Junction;

/// evidence observed at a segment edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Label {
    GeneBoundary,
    DonorJunction,
    ReceiverJunction,
    Tss,
    Tes,
    CagePeak,
    PolyaPeak,
    EmptyStart,
    EmptyStop,
}

impl Label {
    /// labels that may open an exon
    pub fn starts_exon(&self) -> bool {
        matches!(
            self,
            Label::Tss | Label::CagePeak | Label::ReceiverJunction
        )
    }

    /// labels that may close an exon
    pub fn stops_exon(&self) -> bool {
        matches!(self, Label::Tes | Label::PolyaPeak | Label::DonorJunction)
    }

    pub fn is_tss(&self) -> bool {
        matches!(self, Label::Tss | Label::CagePeak)
    }

    pub fn is_tes(&self) -> bool {
        matches!(self, Label::Tes | Label::PolyaPeak)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BinKind {
    Segment,
    Intron,
    TssExon,
    InternalExon,
    TesExon,
    SingleExonGene,
    Gene,
    Promoter,
    Polya,
}

impl BinKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinKind::Segment => "segment",
            BinKind::Intron => "intron",
            BinKind::TssExon => "tss_exon",
            BinKind::InternalExon => "internal_exon",
            BinKind::TesExon => "tes_exon",
            BinKind::SingleExonGene => "single_exon_gene",
            BinKind::Gene => "gene",
            BinKind::Promoter => "promoter",
            BinKind::Polya => "polya",
        }
    }

    pub fn is_exon(&self) -> bool {
        matches!(
            self,
            BinKind::TssExon | BinKind::InternalExon | BinKind::TesExon | BinKind::SingleExonGene
        )
    }
}

impl std::fmt::Display for BinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BinKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "segment" => BinKind::Segment,
            "intron" => BinKind::Intron,
            "tss_exon" => BinKind::TssExon,
            "internal_exon" => BinKind::InternalExon,
            "tes_exon" => BinKind::TesExon,
            "single_exon_gene" => BinKind::SingleExonGene,
            "gene" => BinKind::Gene,
            "promoter" => BinKind::Promoter,
            "polya" => BinKind::Polya,
            _ => return Err(format!("ERROR: unknown element type {:?}", s)),
        };

        Ok(kind)
    }
}

/// typed closed interval with edge labels
///
/// Coordinates are either genomic or local to a locus frame, depending on
/// the stage holding the bin; [`LocusFrame`] converts between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    pub kind: BinKind,
    pub start: u64,
    pub stop: u64,
    pub left_labels: BTreeSet<Label>,
    pub right_labels: BTreeSet<Label>,
    pub expression: Option<f64>,
    pub score: u64,
}

impl Bin {
    pub fn new(kind: BinKind, start: u64, stop: u64) -> Self {
        Self {
            kind,
            start,
            stop,
            left_labels: BTreeSet::new(),
            right_labels: BTreeSet::new(),
            expression: None,
            score: 0,
        }
    }

    pub fn with_labels(mut self, left: BTreeSet<Label>, right: BTreeSet<Label>) -> Self {
        self.left_labels = left;
        self.right_labels = right;
        self
    }

    pub fn with_score(mut self, score: u64) -> Self {
        self.score = score;
        self
    }

    pub fn with_expression(mut self, expression: f64) -> Self {
        self.expression = Some(expression);
        self
    }

    pub fn len(&self) -> u64 {
        self.stop - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn coords(&self) -> (u64, u64) {
        (self.start, self.stop)
    }
}

/// maps positions of a locus span into a 5'-oriented local frame
///
/// Local position 0 is the first transcribed base: the span start on `+`
/// and the span end on `-`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocusFrame {
    pub start: u64,
    pub stop: u64,
    pub strand: Strand,
}

impl LocusFrame {
    pub fn new(start: u64, stop: u64, strand: Strand) -> Self {
        Self {
            start,
            stop,
            strand,
        }
    }

    pub fn len(&self) -> usize {
        (self.stop - self.start + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, pos: u64) -> bool {
        pos >= self.start && pos <= self.stop
    }

    pub fn to_local(&self, pos: u64) -> usize {
        match self.strand {
            Strand::Forward => (pos - self.start) as usize,
            Strand::Reverse => (self.stop - pos) as usize,
        }
    }

    pub fn to_genomic(&self, pos: usize) -> u64 {
        match self.strand {
            Strand::Forward => self.start + pos as u64,
            Strand::Reverse => self.stop - pos as u64,
        }
    }

    /// closed genomic interval into a closed local one, endpoints ordered
    pub fn interval_to_local(&self, start: u64, stop: u64) -> (usize, usize) {
        let (a, b) = (self.to_local(start), self.to_local(stop));
        (a.min(b), a.max(b))
    }

    pub fn interval_to_genomic(&self, start: usize, stop: usize) -> (u64, u64) {
        let (a, b) = (self.to_genomic(start), self.to_genomic(stop));
        (a.min(b), a.max(b))
    }

    /// local bin into genomic coordinates, labels keep their 5'/3' meaning
    pub fn bin_to_genomic(&self, bin: &Bin) -> Bin {
        let (start, stop) = self.interval_to_genomic(bin.start as usize, bin.stop as usize);
        let mut out = bin.clone();
        out.start = start;
        out.stop = stop;
        out
    }

    pub fn junction_to_local(&self, jn: &Junction) -> LocalJunction {
        let (start, stop) = self.interval_to_local(jn.start, jn.stop);
        LocalJunction {
            start,
            stop,
            count: jn.count,
        }
    }

    pub fn junction_to_genomic(&self, chrom: &str, jn: &LocalJunction) -> Junction {
        let (start, stop) = self.interval_to_genomic(jn.start, jn.stop);
        Junction {
            chrom: chrom.to_string(),
            strand: self.strand,
            start,
            stop,
            count: jn.count,
        }
    }

    /// orients a genomic per-base array into the local frame
    pub fn orient<T: Clone>(&self, values: &[T]) -> Vec<T> {
        match self.strand {
            Strand::Forward => values.to_vec(),
            Strand::Reverse => values.iter().rev().cloned().collect(),
        }
    }
}

/// junction in a locus frame, `start`/`stop` are the 5'/3' intronic bases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalJunction {
    pub start: usize,
    pub stop: usize,
    pub count: u64,
}

impl LocalJunction {
    pub fn new(start: usize, stop: usize, count: u64) -> Self {
        Self { start, stop, count }
    }

    /// cut between the donor exon and the intron
    pub fn donor_cut(&self) -> usize {
        self.start
    }

    /// cut after the intron
    pub fn acceptor_cut(&self) -> usize {
        self.stop + 1
    }

    pub fn len(&self) -> usize {
        self.stop - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// candidate gene: disjoint same-strand regions and everything found in them
#[derive(Debug, Clone, PartialEq)]
pub struct GeneLocus {
    pub id: String,
    pub chrom: String,
    pub strand: Strand,
    pub regions: Vec<(u64, u64)>,
    pub elements: Vec<Bin>,
    pub transcripts: Vec<Transcript>,
}

impl GeneLocus {
    pub fn new(chrom: &str, strand: Strand, mut regions: Vec<(u64, u64)>) -> Self {
        regions.sort_unstable();
        let start = regions.first().map(|r| r.0).unwrap_or(0);
        let stop = regions.last().map(|r| r.1).unwrap_or(0);

        Self {
            id: format!("{}_{}_{}_{}", chrom, strand.tag(), start, stop),
            chrom: chrom.to_string(),
            strand,
            regions,
            elements: Vec::new(),
            transcripts: Vec::new(),
        }
    }

    pub fn start(&self) -> u64 {
        self.regions.first().map(|r| r.0).unwrap_or(0)
    }

    pub fn stop(&self) -> u64 {
        self.regions.last().map(|r| r.1).unwrap_or(0)
    }

    /// total span, gaps between regions included
    pub fn span(&self) -> u64 {
        self.stop() - self.start() + 1
    }

    pub fn frame(&self) -> LocusFrame {
        LocusFrame::new(self.start(), self.stop(), self.strand)
    }

    /// `chrom:strand:start-stop`, used in logs
    pub fn name(&self) -> String {
        format!("{}:{}:{}-{}", self.chrom, self.strand, self.start(), self.stop())
    }

    pub fn gene_bin(&self) -> Bin {
        Bin::new(BinKind::Gene, self.start(), self.stop()).with_score(1000)
    }
}

/// inferred transcript model in genomic coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    pub gene_id: String,
    pub chrom: String,
    pub strand: Strand,
    pub exons: Vec<(u64, u64)>,
    pub promoter: Option<(u64, u64)>,
    pub polya: Option<(u64, u64)>,
    pub frequency: Option<f64>,
    pub conf_lo: Option<f64>,
    pub conf_hi: Option<f64>,
    pub unobservable: bool,
    pub unidentifiable_with: Vec<String>,
}

impl Transcript {
    pub fn new(id: String, locus: &GeneLocus, mut exons: Vec<(u64, u64)>) -> Self {
        exons.sort_unstable();
        Self {
            id,
            gene_id: locus.id.clone(),
            chrom: locus.chrom.clone(),
            strand: locus.strand,
            exons,
            promoter: None,
            polya: None,
            frequency: None,
            conf_lo: None,
            conf_hi: None,
            unobservable: false,
            unidentifiable_with: Vec::new(),
        }
    }

    pub fn start(&self) -> u64 {
        self.exons.first().map(|e| e.0).unwrap_or(0)
    }

    pub fn stop(&self) -> u64 {
        self.exons.last().map(|e| e.1).unwrap_or(0)
    }

    /// spliced length
    pub fn len(&self) -> u64 {
        self.exons.iter().map(|(s, e)| e - s + 1).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.exons.is_empty()
    }

    pub fn introns(&self) -> Vec<(u64, u64)> {
        self.exons
            .windows(2)
            .map(|w| (w[0].1 + 1, w[1].0 - 1))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_minus_strand() {
        let frame = LocusFrame::new(100, 199, Strand::Reverse);
        assert_eq!(frame.to_local(199), 0);
        assert_eq!(frame.to_local(100), 99);
        assert_eq!(frame.to_genomic(0), 199);
        assert_eq!(frame.interval_to_local(150, 160), (39, 49));
        assert_eq!(frame.interval_to_genomic(39, 49), (150, 160));
        assert_eq!(frame.orient(&[1, 2, 3]), vec![3, 2, 1]);
    }

    #[test]
    fn test_locus_id_and_span() {
        let locus = GeneLocus::new("chr1", Strand::Forward, vec![(500, 900), (100, 300)]);
        assert_eq!(locus.id, "chr1_p_100_900");
        assert_eq!(locus.span(), 801);
        assert_eq!(locus.regions[0], (100, 300));
        assert_eq!(locus.name(), "chr1:+:100-900");
    }

    #[test]
    fn test_transcript_introns() {
        let locus = GeneLocus::new("chr1", Strand::Forward, vec![(0, 100)]);
        let tx = Transcript::new("t".into(), &locus, vec![(60, 80), (0, 10), (30, 40)]);
        assert_eq!(tx.introns(), vec![(11, 29), (41, 59)]);
        assert_eq!(tx.len(), 11 + 11 + 21);
    }

    #[test]
    fn test_labels_open_and_close_exons() {
        assert!(Label::CagePeak.starts_exon());
        assert!(Label::ReceiverJunction.starts_exon());
        assert!(!Label::DonorJunction.starts_exon());
        assert!(Label::PolyaPeak.stops_exon());
        assert!(!Label::GeneBoundary.stops_exon());
        assert_eq!("tes_exon".parse::<BinKind>().unwrap(), BinKind::TesExon);
    }
}
