use config::{Strand, MIN_BED_FIELDS};
use hashbrown::HashMap;

use crate::bins::{Bin, BinKind, GeneLocus};

lazy_static::lazy_static! {
    static ref FEATURE_COLORS: HashMap<BinKind, &'static str> = {
        let mut m = HashMap::new();
        m.insert(BinKind::Gene, "200,200,200");
        m.insert(BinKind::Promoter, "153,255,000");
        m.insert(BinKind::SingleExonGene, "000,000,200");
        m.insert(BinKind::TssExon, "140,195,59");
        m.insert(BinKind::InternalExon, "000,000,000");
        m.insert(BinKind::TesExon, "255,51,255");
        m.insert(BinKind::Intron, "100,100,100");
        m.insert(BinKind::Polya, "255,0,0");
        m.insert(BinKind::Segment, "0,0,0");
        m
    };
}

/// one typed interval read back from an elements file
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementRecord {
    pub chrom: String,
    pub kind: BinKind,
    pub strand: Strand,
    pub start: u64,
    pub stop: u64,
    pub score: u64,
}

pub fn elements_header(name: &str) -> String {
    format!(
        "track name=\"{}\" visibility=2 itemRgb=\"On\" useScore=1",
        name
    )
}

pub fn feature_color(kind: BinKind) -> &'static str {
    FEATURE_COLORS.get(&kind).copied().unwrap_or("0,0,0")
}

/// BED12 line for a single-block element in genomic coordinates
pub fn element_line(chrom: &str, strand: Strand, bin: &Bin) -> String {
    let score = match bin.kind {
        BinKind::Intron => bin.score,
        _ => 1000,
    };

    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t1\t{},\t0,",
        chrom,
        bin.start,
        bin.stop + 1,
        bin.kind,
        score,
        strand,
        bin.start,
        bin.stop + 1,
        feature_color(bin.kind),
        bin.len(),
    )
}

/// gene record, one block per region
pub fn gene_line(locus: &GeneLocus) -> String {
    let (start, stop) = (locus.start(), locus.stop());
    let sizes = locus
        .regions
        .iter()
        .map(|(s, e)| (e - s + 1).to_string())
        .collect::<Vec<_>>()
        .join(",");
    let offsets = locus
        .regions
        .iter()
        .map(|(s, _)| (s - start).to_string())
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "{}\t{}\t{}\t{}\t1000\t{}\t{}\t{}\t{}\t{}\t{},\t{},",
        locus.chrom,
        start,
        stop + 1,
        BinKind::Gene,
        locus.strand,
        start,
        stop + 1,
        feature_color(BinKind::Gene),
        locus.regions.len(),
        sizes,
        offsets,
    )
}

/// all element lines of a finished locus, gene record first
pub fn locus_lines(locus: &GeneLocus) -> Vec<String> {
    let mut elements = locus.elements.iter().collect::<Vec<_>>();
    elements.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(a.stop.cmp(&b.stop))
            .then(a.kind.cmp(&b.kind))
    });

    std::iter::once(gene_line(locus))
        .chain(
            elements
                .into_iter()
                .filter(|bin| bin.kind != BinKind::Segment && bin.kind != BinKind::Gene)
                .map(|bin| element_line(&locus.chrom, locus.strand, bin)),
        )
        .collect()
}

pub fn parse_element(line: &str) -> Result<ElementRecord, &'static str> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < MIN_BED_FIELDS {
        return Err("Line has less than 12 fields");
    }

    let start = fields[1].parse::<u64>().map_err(|_| "Cannot parse start")?;
    let end = fields[2].parse::<u64>().map_err(|_| "Cannot parse end")?;
    if end <= start {
        return Err("ERROR: element end is not greater than start");
    }

    Ok(ElementRecord {
        chrom: fields[0].to_string(),
        kind: fields[3]
            .parse::<BinKind>()
            .map_err(|_| "Cannot parse element type")?,
        strand: fields[5]
            .parse::<Strand>()
            .map_err(|_| "ERROR: Strand is not + or -")?,
        start,
        stop: end - 1,
        score: fields[4].parse::<u64>().map_err(|_| "Cannot parse score")?,
    })
}

/// parses an elements file, skipping track and comment lines
pub fn parse_elements(contents: &str) -> Vec<ElementRecord> {
    contents
        .lines()
        .filter(|line| !line.starts_with("track") && !line.starts_with('#'))
        .filter_map(|line| parse_element(line).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;

    #[test]
    fn test_elements_round_trip() {
        let mut locus = GeneLocus::new("chr2", Strand::Reverse, vec![(100, 400), (600, 900)]);
        locus.elements = vec![
            Bin::new(BinKind::TesExon, 100, 250),
            Bin::new(BinKind::Intron, 251, 649).with_score(12),
            Bin::new(BinKind::TssExon, 650, 900),
            Bin::new(BinKind::Promoter, 870, 900),
            Bin::new(BinKind::Polya, 100, 120),
        ];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elements.bed");
        let mut lines = vec![elements_header("elements.bed")];
        lines.extend(locus_lines(&locus));
        config::write_collection(&lines, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed = parse_elements(&contents)
            .into_iter()
            .collect::<BTreeSet<_>>();

        let expected = locus
            .elements
            .iter()
            .map(|bin| ElementRecord {
                chrom: "chr2".into(),
                kind: bin.kind,
                strand: Strand::Reverse,
                start: bin.start,
                stop: bin.stop,
                score: if bin.kind == BinKind::Intron { 12 } else { 1000 },
            })
            .chain(std::iter::once(ElementRecord {
                chrom: "chr2".into(),
                kind: BinKind::Gene,
                strand: Strand::Reverse,
                start: 100,
                stop: 900,
                score: 1000,
            }))
            .collect::<BTreeSet<_>>();

        assert_eq!(parsed, expected);
        assert!(contents.starts_with("track name=\"elements.bed\""));
    }

    #[test]
    fn test_gene_line_blocks() {
        let locus = GeneLocus::new("chr1", Strand::Forward, vec![(10, 19), (30, 39)]);
        let line = gene_line(&locus);
        let fields = line.split('\t').collect::<Vec<_>>();

        assert_eq!(fields[1], "10");
        assert_eq!(fields[2], "40");
        assert_eq!(fields[9], "2");
        assert_eq!(fields[10], "10,10,");
        assert_eq!(fields[11], "0,20,");
        assert_eq!(fields[8], "200,200,200");
    }
}
