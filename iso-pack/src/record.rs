use config::{Strand, DEFAULT_READ_GROUP, MIN_BED6_FIELDS, MIN_BED_FIELDS};
use serde::{Deserialize, Serialize};

use std::collections::BTreeSet;

#[derive(Debug, PartialEq, Clone)]
pub struct Bed12 {
    data: GenePred,
}

/// annotated transcript, exons and introns are closed 0-based intervals
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct GenePred {
    pub name: String,
    pub chrom: String,
    pub strand: Strand,
    pub start: u64,
    pub end: u64,
    pub exons: Vec<(u64, u64)>,
    pub introns: Vec<(u64, u64)>,
    pub exon_count: usize,
}

/// observed or annotated splice junction
///
/// `start` is the first intronic base and `stop` the last one.
#[derive(Debug, PartialEq, Eq, Clone, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Junction {
    pub chrom: String,
    pub strand: Strand,
    pub start: u64,
    pub stop: u64,
    pub count: u64,
}

/// one aligned mate as read from a BED12 line
#[derive(Debug, PartialEq, Clone)]
pub struct ReadMate {
    pub name: String,
    pub mate: u8,
    pub chrom: String,
    pub strand: Strand,
    pub blocks: Vec<(u64, u64)>,
    pub read_group: String,
}

/// a sequenced fragment: one or two mates sharing a read name
#[derive(Debug, PartialEq, Clone)]
pub struct ReadPair {
    pub chrom: String,
    pub strand: Strand,
    pub read_group: String,
    pub read_len: usize,
    pub mates: Vec<Vec<(u64, u64)>>,
}

impl Bed12 {
    #[inline(always)]
    pub fn read(line: &str) -> Result<GenePred, &'static str> {
        if line.is_empty() {
            return Err("Empty line");
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < MIN_BED_FIELDS {
            return Err("Line has less than 12 fields");
        }

        let (chrom, tx_start, tx_end, name, strand, exon_sizes, exon_starts) = (
            fields[0],
            fields[1],
            fields[2],
            fields[3],
            fields[5],
            fields[10],
            fields[11],
        );

        let get = |field: &str| field.parse::<u64>().map_err(|_| "Cannot parse field");
        let (tx_start, tx_end) = (get(tx_start)?, get(tx_end)?);
        if tx_end <= tx_start {
            return Err("ERROR: BED12 end is not greater than start");
        }

        let exons = get_coords(exon_starts, exon_sizes, tx_start)?;
        let introns = gapper(&exons);
        let exon_count = exons.len();

        let strand = strand
            .parse::<Strand>()
            .map_err(|_| "ERROR: Strand is not + or -")?;

        Ok(GenePred {
            name: name.into(),
            chrom: chrom.into(),
            strand,
            start: tx_start,
            end: tx_end - 1,
            exons,
            introns,
            exon_count,
        })
    }

    pub fn parse(line: &str) -> Result<Self, &'static str> {
        let data = Bed12::read(line)?;
        Ok(Bed12 { data })
    }

    pub fn into_inner(self) -> GenePred {
        self.data
    }
}

/// block starts/sizes into closed absolute exons
#[inline(always)]
fn get_coords(starts: &str, sizes: &str, tx_start: u64) -> Result<Vec<(u64, u64)>, &'static str> {
    let starts = starts
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().map_err(|_| "Cannot parse block start"))
        .collect::<Result<Vec<_>, _>>()?;
    let sizes = sizes
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().map_err(|_| "Cannot parse block size"))
        .collect::<Result<Vec<_>, _>>()?;

    if starts.len() != sizes.len() || starts.is_empty() {
        return Err("Block starts and sizes do not match");
    }

    let mut exons = starts
        .iter()
        .zip(sizes.iter())
        .filter(|(_, size)| **size > 0)
        .map(|(start, size)| (tx_start + start, tx_start + start + size - 1))
        .collect::<Vec<_>>();
    exons.sort_unstable();

    if exons.is_empty() {
        return Err("All blocks are empty");
    }

    Ok(exons)
}

#[inline(always)]
fn gapper(exons: &[(u64, u64)]) -> Vec<(u64, u64)> {
    exons
        .windows(2)
        .filter(|w| w[1].0 > w[0].1 + 1)
        .map(|w| (w[0].1 + 1, w[1].0 - 1))
        .collect()
}

impl GenePred {
    pub fn name(&self) -> &String {
        &self.name
    }

    #[inline(always)]
    pub fn get_first_exon(&self) -> (u64, u64) {
        match self.strand {
            Strand::Forward => self.exons[0],
            Strand::Reverse => self.exons[self.exons.len() - 1],
        }
    }

    #[inline(always)]
    pub fn get_last_exon(&self) -> (u64, u64) {
        match self.strand {
            Strand::Forward => self.exons[self.exons.len() - 1],
            Strand::Reverse => self.exons[0],
        }
    }

    #[inline(always)]
    pub fn get_introns(&self) -> BTreeSet<(u64, u64)> {
        self.introns.iter().cloned().collect()
    }

    /// `size` bases at the transcript 5' end
    pub fn promoter(&self, size: u64) -> (u64, u64) {
        match self.strand {
            Strand::Forward => (self.start, (self.start + size - 1).min(self.end)),
            Strand::Reverse => (self.end.saturating_sub(size - 1).max(self.start), self.end),
        }
    }

    /// `size` bases at the transcript 3' end
    pub fn polya_site(&self, size: u64) -> (u64, u64) {
        match self.strand {
            Strand::Forward => (self.end.saturating_sub(size - 1).max(self.start), self.end),
            Strand::Reverse => (self.start, (self.start + size - 1).min(self.end)),
        }
    }
}

impl Junction {
    /// reads a BED6 junction line: `chrom start end name count strand`
    #[inline(always)]
    pub fn read(line: &str) -> Result<Junction, &'static str> {
        if line.is_empty() {
            return Err("Empty line");
        }

        let mut fields = line.split('\t');
        let (chrom, start, end, _, count, strand) = (
            fields.next().ok_or("Cannot parse chrom")?,
            fields.next().ok_or("Cannot parse start")?,
            fields.next().ok_or("Cannot parse end")?,
            fields.next().ok_or("Cannot parse name")?,
            fields.next().ok_or("Cannot parse count")?,
            fields.next().ok_or("Cannot parse strand")?,
        );

        let start = start.parse::<u64>().map_err(|_| "Cannot parse start")?;
        let end = end.parse::<u64>().map_err(|_| "Cannot parse end")?;
        let count = match count.parse::<u64>() {
            Ok(c) => c,
            Err(_) => count
                .parse::<f64>()
                .map_err(|_| "Cannot parse count")?
                .max(0.0)
                .round() as u64,
        };
        let strand = strand
            .parse::<Strand>()
            .map_err(|_| "ERROR: Strand is not + or -")?;

        // closed interval with stop > start
        if end < start + 2 {
            return Err("ERROR: Junction is shorter than 2 bases");
        }

        Ok(Junction {
            chrom: chrom.into(),
            strand,
            start,
            stop: end - 1,
            count,
        })
    }

    pub fn len(&self) -> u64 {
        self.stop - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// last exonic base before the intron
    pub fn donor(&self) -> u64 {
        self.start.saturating_sub(1)
    }

    /// first exonic base after the intron
    pub fn acceptor(&self) -> u64 {
        self.stop + 1
    }

    pub fn fmt(&self) -> String {
        format!(
            "{}\t{}\t{}\tjunction\t{}\t{}",
            self.chrom,
            self.start,
            self.stop + 1,
            self.count,
            self.strand
        )
    }
}

impl ReadMate {
    /// reads a BED12 mate, read names may end in `/1` or `/2`; an optional
    /// 13th column carries the read group
    pub fn read(line: &str) -> Result<ReadMate, &'static str> {
        let data = Bed12::read(line)?;
        if line.split('\t').count() < MIN_BED6_FIELDS {
            return Err("Line has less than 6 fields");
        }

        let read_group = line
            .split('\t')
            .nth(MIN_BED_FIELDS)
            .filter(|rg| !rg.is_empty())
            .unwrap_or(DEFAULT_READ_GROUP)
            .to_string();

        let (name, mate) = match data.name.rsplit_once('/') {
            Some((base, "1")) => (base.to_string(), 1),
            Some((base, "2")) => (base.to_string(), 2),
            _ => (data.name.clone(), 0),
        };

        Ok(ReadMate {
            name,
            mate,
            chrom: data.chrom,
            strand: data.strand,
            blocks: data.exons,
            read_group,
        })
    }

    pub fn len(&self) -> usize {
        self.blocks
            .iter()
            .map(|(start, stop)| (stop - start + 1) as usize)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl ReadPair {
    /// Joins the mates of one fragment
    ///
    /// The fragment takes the strand of its first mate. With
    /// `opposite_strands`, a second mate on the same strand as the first is
    /// rejected; without it, one on the other strand is.
    pub fn from_mates(mut mates: Vec<ReadMate>, opposite_strands: bool) -> Option<ReadPair> {
        mates.sort_by_key(|m| m.mate);
        let first = mates.first()?;

        let (chrom, strand, read_group) =
            (first.chrom.clone(), first.strand, first.read_group.clone());
        let read_len = mates.iter().map(|m| m.len()).max().unwrap_or(0);

        let expected = |m: &ReadMate| {
            if opposite_strands {
                m.strand != strand
            } else {
                m.strand == strand
            }
        };
        if mates.iter().any(|m| m.chrom != chrom)
            || mates.iter().skip(1).any(|m| !expected(m))
        {
            return None;
        }

        Some(ReadPair {
            chrom,
            strand,
            read_group,
            read_len,
            mates: mates.into_iter().take(2).map(|m| m.blocks).collect(),
        })
    }

    pub fn start(&self) -> u64 {
        self.mates
            .iter()
            .filter_map(|m| m.first().map(|b| b.0))
            .min()
            .unwrap_or(0)
    }

    pub fn stop(&self) -> u64 {
        self.mates
            .iter()
            .filter_map(|m| m.last().map(|b| b.1))
            .max()
            .unwrap_or(0)
    }

    pub fn is_paired(&self) -> bool {
        self.mates.len() == 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bed12_read_exons_and_introns() {
        let line = "chr1\t10\t60\ttx1\t0\t+\t10\t60\t0\t2\t10,10,\t0,40,";
        let tx = Bed12::read(line).unwrap();

        assert_eq!(tx.exons, vec![(10, 19), (50, 59)]);
        assert_eq!(tx.introns, vec![(20, 49)]);
        assert_eq!(tx.start, 10);
        assert_eq!(tx.end, 59);
        assert_eq!(tx.exon_count, 2);
    }

    #[test]
    fn test_bed12_promoter_and_polya_minus() {
        let line = "chr1\t100\t400\ttx1\t0\t-\t100\t400\t0\t1\t300,\t0,";
        let tx = Bed12::read(line).unwrap();

        assert_eq!(tx.promoter(50), (350, 399));
        assert_eq!(tx.polya_site(50), (100, 149));
        assert_eq!(tx.get_first_exon(), (100, 399));
    }

    #[test]
    fn test_junction_read() {
        let jn = Junction::read("chr1\t100\t200\tjn\t7\t-").unwrap();
        assert_eq!(jn.start, 100);
        assert_eq!(jn.stop, 199);
        assert_eq!(jn.count, 7);
        assert_eq!(jn.donor(), 99);
        assert_eq!(jn.acceptor(), 200);
        assert_eq!(Junction::read(&jn.fmt()).unwrap(), jn);

        assert!(Junction::read("chr1\t100\t101\tjn\t7\t+").is_err());
        assert!(Junction::read("chr1\t100\t300\tjn\t7\t.").is_err());
    }

    #[test]
    fn test_read_pair_from_mates() {
        let m1 = ReadMate::read("chr1\t0\t50\tr1/1\t0\t+\t0\t50\t0\t1\t50,\t0,").unwrap();
        let m2 =
            ReadMate::read("chr1\t150\t200\tr1/2\t0\t+\t150\t200\t0\t1\t50,\t0,\trg1").unwrap();

        assert_eq!(m1.name, "r1");
        assert_eq!(m2.mate, 2);
        assert_eq!(m2.read_group, "rg1");
        assert_eq!(m1.read_group, DEFAULT_READ_GROUP);

        let pair = ReadPair::from_mates(vec![m2.clone(), m1.clone()], false).unwrap();
        assert!(pair.is_paired());
        assert_eq!(pair.start(), 0);
        assert_eq!(pair.stop(), 199);
        assert_eq!(pair.read_len, 50);
        assert_eq!(pair.mates[0], vec![(0, 49)]);

        assert!(ReadPair::from_mates(vec![m1, m2], true).is_none());
    }

    #[test]
    fn test_opposite_strand_mates_follow_first_mate() {
        let m1 = ReadMate::read("chr1\t150\t200\tr1/1\t0\t-\t150\t200\t0\t1\t50,\t0,").unwrap();
        let m2 = ReadMate::read("chr1\t0\t50\tr1/2\t0\t+\t0\t50\t0\t1\t50,\t0,").unwrap();

        let pair = ReadPair::from_mates(vec![m2.clone(), m1.clone()], true).unwrap();
        assert_eq!(pair.strand, Strand::Reverse);
        assert!(pair.is_paired());
        assert_eq!(pair.start(), 0);
        assert_eq!(pair.stop(), 199);

        assert!(ReadPair::from_mates(vec![m1, m2], false).is_none());
    }
}
