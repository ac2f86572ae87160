use std::collections::{BTreeMap, BTreeSet};

use config::{LocusOutcome, UnionFind, ROW_CLUSTER_TOL};
use hashbrown::HashMap;
use log::debug;
use ndarray::{Array1, Array2, Axis};
use packbed::ReadPair;
use rayon::prelude::*;

use crate::fld::{FlDist, FlDists};

/// pseudo-exon ids covered by each mate, the smaller set first
pub type BinKey = (Vec<usize>, Vec<usize>);

fn bin_key(a: Vec<usize>, b: Vec<usize>) -> BinKey {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// fragments sharing read length, read group and pairing
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReadClass {
    pub read_len: usize,
    pub read_group: String,
    pub paired: bool,
}

impl ReadClass {
    pub fn of(pair: &ReadPair) -> Self {
        Self {
            read_len: pair.read_len,
            read_group: pair.read_group.clone(),
            paired: pair.is_paired(),
        }
    }
}

/// intervals between all distinct exon boundaries that lie inside an exon
pub fn pseudo_exons(transcripts: &[Vec<(u64, u64)>]) -> Vec<(u64, u64)> {
    let boundaries = transcripts
        .iter()
        .flatten()
        .flat_map(|(start, stop)| [*start, stop + 1])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();

    boundaries
        .windows(2)
        .map(|w| (w[0], w[1] - 1))
        .filter(|(start, _)| {
            transcripts
                .iter()
                .flatten()
                .any(|(s, e)| s <= start && start <= e)
        })
        .collect()
}

/// a transcript written as consecutive pseudo-exons
#[derive(Debug, Clone)]
struct TxLayout {
    pes: Vec<usize>,
    ends: Vec<usize>,
}

impl TxLayout {
    fn new(exons: &[(u64, u64)], pseudo: &[(u64, u64)]) -> Self {
        let mut pes = Vec::new();
        let mut ends = Vec::new();
        let mut acc = 0;

        for (idx, (start, stop)) in pseudo.iter().enumerate() {
            if exons.iter().any(|(s, e)| s <= start && stop <= e) {
                acc += (stop - start + 1) as usize;
                pes.push(idx);
                ends.push(acc);
            }
        }

        Self { pes, ends }
    }

    fn len(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    fn pe_at(&self, pos: usize) -> usize {
        self.ends.partition_point(|end| *end <= pos)
    }

    /// local pseudo-exon range covered by `[start, stop)`
    fn window(&self, start: usize, stop: usize) -> (usize, usize) {
        (self.pe_at(start), self.pe_at(stop - 1))
    }

    fn ids(&self, range: (usize, usize)) -> Vec<usize> {
        self.pes[range.0..=range.1].to_vec()
    }

    /// expected fragment mass per bin for one read class
    fn expected(&self, class: &ReadClass, fl: &FlDist) -> HashMap<BinKey, f64> {
        let len = self.len();
        let rl = class.read_len;
        let mut local: HashMap<((usize, usize), Option<(usize, usize)>), f64> = HashMap::new();

        if rl == 0 || len < rl {
            return HashMap::new();
        }

        if class.paired {
            for (fl, density) in fl.support() {
                if fl < rl || fl > len {
                    continue;
                }
                for start in 0..=len - fl {
                    let first = self.window(start, start + rl);
                    let second = self.window(start + fl - rl, start + fl);
                    *local.entry((first, Some(second))).or_insert(0.0) += density;
                }
            }
        } else {
            for start in 0..=len - rl {
                let mate = self.window(start, start + rl);
                *local.entry((mate, None)).or_insert(0.0) += 1.0;
            }
        }

        let mut bins: HashMap<BinKey, f64> = HashMap::new();
        for ((first, second), mass) in local {
            let key = match second {
                Some(second) => bin_key(self.ids(first), self.ids(second)),
                None => bin_key(self.ids(first), Vec::new()),
            };
            *bins.entry(key).or_insert(0.0) += mass;
        }
        bins
    }
}

/// pseudo-exons touched by a mate, `None` when a block leaves them
fn mate_pes(blocks: &[(u64, u64)], pseudo: &[(u64, u64)]) -> Option<Vec<usize>> {
    let mut ids = BTreeSet::new();

    for (start, stop) in blocks {
        let first = pseudo.partition_point(|(_, e)| e < start);
        let mut covered = 0;

        for (idx, (ps, pe)) in pseudo.iter().enumerate().skip(first) {
            if ps > stop {
                break;
            }
            ids.insert(idx);
            covered += stop.min(pe) - start.max(ps) + 1;
        }

        if covered != stop - start + 1 {
            return None;
        }
    }

    Some(ids.into_iter().collect())
}

pub fn read_key(pair: &ReadPair, pseudo: &[(u64, u64)]) -> Option<BinKey> {
    let mut mates = pair.mates.iter().map(|m| mate_pes(m, pseudo));
    let first = mates.next()??;
    let second = match mates.next() {
        Some(mate) => mate?,
        None => Vec::new(),
    };
    Some(bin_key(first, second))
}

/// expected/observed tables for one locus
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    /// bins x kept transcripts, columns sum to one
    pub expected: Array2<f64>,
    pub observed: Array1<f64>,
    /// input transcript index of every column
    pub columns: Vec<usize>,
    /// input transcripts with an all-zero column
    pub unobservable: Vec<usize>,
    /// groups of input transcripts with identical columns
    pub unidentifiable: Vec<Vec<usize>>,
}

impl DesignMatrix {
    /// Cleans raw tables: drops and reports all-zero columns, normalises
    /// columns, merges rows with matching profiles and groups identical
    /// columns
    ///
    /// # Arguments
    ///
    /// * `expected` - raw bins x transcripts expected mass
    /// * `observed` - read counts per bin
    ///
    /// # Returns
    ///
    /// * `DesignMatrix` - cleaned tables
    ///
    /// # Example
    ///
    /// ```rust
    /// use iso_freq::DesignMatrix;
    /// use ndarray::array;
    ///
    /// let design = DesignMatrix::new(array![[1.0, 0.0], [1.0, 0.0]], array![3.0, 1.0]);
    /// assert_eq!(design.unobservable, vec![1]);
    /// assert_eq!(design.expected.nrows(), 1);
    /// ```
    pub fn new(expected: Array2<f64>, observed: Array1<f64>) -> Self {
        let sums = expected.sum_axis(Axis(0));
        let (columns, unobservable): (Vec<usize>, Vec<usize>) =
            (0..expected.ncols()).partition(|j| sums[*j] > 0.0);

        let mut kept = expected.select(Axis(1), &columns);
        for (j, mut col) in kept.axis_iter_mut(Axis(1)).enumerate() {
            col /= sums[columns[j]];
        }

        let (kept, observed) = merge_rows(kept, observed);
        let unidentifiable = identical_columns(&kept)
            .into_iter()
            .map(|group| group.into_iter().map(|j| columns[j]).collect())
            .collect();

        Self {
            expected: kept,
            observed,
            columns,
            unobservable,
            unidentifiable,
        }
    }

    pub fn total_reads(&self) -> f64 {
        self.observed.sum()
    }

    pub fn num_transcripts(&self) -> usize {
        self.columns.len()
    }
}

/// merges rows whose normalised profiles agree within `ROW_CLUSTER_TOL`
fn merge_rows(expected: Array2<f64>, observed: Array1<f64>) -> (Array2<f64>, Array1<f64>) {
    let ncols = expected.ncols();
    let mut profiles: Vec<Array1<f64>> = Vec::new();
    let mut rows: Vec<Array1<f64>> = Vec::new();
    let mut counts: Vec<f64> = Vec::new();

    for (row, count) in expected.axis_iter(Axis(0)).zip(observed.iter()) {
        let total = row.sum();
        if total <= 0.0 {
            continue;
        }
        let profile = row.mapv(|v| v / total);

        let hit = profiles.iter().position(|p| {
            p.iter()
                .zip(profile.iter())
                .map(|(a, b)| (a - b).abs())
                .sum::<f64>()
                < ROW_CLUSTER_TOL
        });

        match hit {
            Some(idx) => {
                rows[idx] += &row;
                counts[idx] += count;
            }
            None => {
                profiles.push(profile);
                rows.push(row.to_owned());
                counts.push(*count);
            }
        }
    }

    let mut merged = Array2::zeros((rows.len(), ncols));
    for (idx, row) in rows.iter().enumerate() {
        merged.row_mut(idx).assign(row);
    }
    (merged, Array1::from(counts))
}

/// groups (size > 1) of columns that agree within `ROW_CLUSTER_TOL`
fn identical_columns(expected: &Array2<f64>) -> Vec<Vec<usize>> {
    let n = expected.ncols();
    let mut uf = UnionFind::new(n);

    for a in 0..n {
        for b in a + 1..n {
            let diff = expected
                .column(a)
                .iter()
                .zip(expected.column(b).iter())
                .map(|(x, y)| (x - y).abs())
                .sum::<f64>();
            if diff < ROW_CLUSTER_TOL {
                uf.union(a, b);
            }
        }
    }

    uf.components()
        .into_iter()
        .filter(|group| group.len() > 1)
        .collect()
}

/// Builds the design matrix of a locus from transcript structures and reads
///
/// # Arguments
///
/// * `transcripts` - genomic exons of every candidate transcript
/// * `reads` - fragments overlapping the locus
/// * `fl_dists` - fragment length distributions per read group
///
/// # Returns
///
/// * `Result<DesignMatrix, LocusOutcome>` - the cleaned design, or
///   `TooFewReads` when no fragment is explained by any transcript
///
/// # Example
///
/// ```rust, ignore
/// let design = build_design(&exons, &reads, &FlDists::from_normal(200.0, 40.0))?;
/// ```
pub fn build_design(
    transcripts: &[Vec<(u64, u64)>],
    reads: &[ReadPair],
    fl_dists: &FlDists,
) -> Result<DesignMatrix, LocusOutcome> {
    let pseudo = pseudo_exons(transcripts);
    let layouts = transcripts
        .iter()
        .map(|exons| TxLayout::new(exons, &pseudo))
        .collect::<Vec<_>>();

    let mut observed: BTreeMap<ReadClass, HashMap<BinKey, f64>> = BTreeMap::new();
    let mut unmapped = 0;
    for pair in reads {
        match read_key(pair, &pseudo) {
            Some(key) => {
                *observed
                    .entry(ReadClass::of(pair))
                    .or_default()
                    .entry(key)
                    .or_insert(0.0) += 1.0;
            }
            None => unmapped += 1,
        }
    }

    let mut class_rows: Vec<(f64, Vec<Vec<f64>>, Vec<f64>)> = Vec::new();
    for (class, counts) in observed.iter() {
        let Some(fl) = fl_dists.get(&class.read_group) else {
            continue;
        };

        let expected = layouts
            .par_iter()
            .map(|layout| layout.expected(class, fl))
            .collect::<Vec<_>>();

        let keys = expected
            .iter()
            .flat_map(|bins| bins.keys().cloned())
            .collect::<BTreeSet<_>>();
        let matched = keys
            .iter()
            .map(|key| counts.get(key).copied().unwrap_or(0.0))
            .collect::<Vec<_>>();
        let n_class = matched.iter().sum::<f64>();
        if n_class <= 0.0 {
            continue;
        }

        let col_sums = expected
            .iter()
            .map(|bins| bins.values().sum::<f64>())
            .collect::<Vec<_>>();
        let rows = keys
            .iter()
            .map(|key| {
                expected
                    .iter()
                    .zip(col_sums.iter())
                    .map(|(bins, sum)| match bins.get(key) {
                        Some(mass) if *sum > 0.0 => mass / sum,
                        _ => 0.0,
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        class_rows.push((n_class, rows, matched));
    }

    let total = class_rows.iter().map(|(n, _, _)| n).sum::<f64>();
    if total <= 0.0 {
        return Err(LocusOutcome::TooFewReads);
    }

    let nrows = class_rows.iter().map(|(_, rows, _)| rows.len()).sum::<usize>();
    let mut expected = Array2::zeros((nrows, transcripts.len()));
    let mut counts = Array1::zeros(nrows);

    let mut idx = 0;
    for (n_class, rows, matched) in class_rows {
        let weight = n_class / total;
        for (row, count) in rows.into_iter().zip(matched) {
            for (j, value) in row.into_iter().enumerate() {
                expected[[idx, j]] = value * weight;
            }
            counts[idx] = count;
            idx += 1;
        }
    }

    debug!(
        "Design: {} bins, {} transcripts, {} reads ({} unexplained)",
        nrows,
        transcripts.len(),
        total,
        unmapped
    );

    Ok(DesignMatrix::new(expected, counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::Strand;
    use ndarray::array;

    fn pair(mates: Vec<Vec<(u64, u64)>>) -> ReadPair {
        ReadPair {
            chrom: "chr1".into(),
            strand: Strand::Forward,
            read_group: "mean".into(),
            read_len: 50,
            mates,
        }
    }

    #[test]
    fn test_pseudo_exons_split_at_every_boundary() {
        let txs = vec![vec![(0, 99), (200, 299)], vec![(0, 149), (200, 299)]];
        assert_eq!(
            pseudo_exons(&txs),
            vec![(0, 99), (100, 149), (200, 299)]
        );
    }

    #[test]
    fn test_read_keys() {
        let pseudo = vec![(0, 99), (100, 149), (200, 299)];

        let spliced = pair(vec![vec![(80, 99), (200, 229)], vec![(250, 299)]]);
        assert_eq!(read_key(&spliced, &pseudo), Some((vec![0, 2], vec![2])));

        let single = pair(vec![vec![(90, 139)]]);
        assert_eq!(read_key(&single, &pseudo), Some((vec![], vec![0, 1])));

        let intronic = pair(vec![vec![(160, 209)]]);
        assert_eq!(read_key(&intronic, &pseudo), None);
    }

    #[test]
    fn test_expected_bins_cover_transcript() {
        let pseudo = vec![(0, 99), (200, 299)];
        let layout = TxLayout::new(&[(0, 99), (200, 299)], &pseudo);
        assert_eq!(layout.len(), 200);

        let class = ReadClass {
            read_len: 50,
            read_group: "mean".into(),
            paired: false,
        };
        let bins = layout.expected(&class, &FlDist::from_normal(100.0, 10.0));

        assert_eq!(bins.values().sum::<f64>(), 151.0);
        assert_eq!(bins.get(&(vec![], vec![0])), Some(&51.0));
        assert_eq!(bins.get(&(vec![], vec![0, 1])), Some(&49.0));
    }

    #[test]
    fn test_design_reports_unobservable_and_identical_columns() {
        let expected = array![
            [0.5, 0.5, 0.0, 0.2],
            [0.5, 0.5, 0.0, 0.8],
        ];
        let design = DesignMatrix::new(expected, array![10.0, 10.0]);

        assert_eq!(design.columns, vec![0, 1, 3]);
        assert_eq!(design.unobservable, vec![2]);
        assert_eq!(design.unidentifiable, vec![vec![0, 1]]);
        for col in design.expected.axis_iter(Axis(1)) {
            assert!((col.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_build_design_without_reads_is_too_few() {
        let txs = vec![vec![(0, 999)]];
        let fl = FlDists::from_normal(200.0, 20.0);
        assert_eq!(build_design(&txs, &[], &fl), Err(LocusOutcome::TooFewReads));
    }

    #[test]
    fn test_build_design_from_paired_reads() {
        let txs = vec![vec![(0, 299), (600, 999)], vec![(0, 999)]];
        let fl = FlDists::from_normal(200.0, 20.0);
        let reads = vec![
            pair(vec![vec![(100, 149)], vec![(250, 299)]]),
            pair(vec![vec![(280, 299), (600, 629)], vec![(700, 749)]]),
            pair(vec![vec![(400, 449)], vec![(520, 569)]]),
        ];

        let design = build_design(&txs, &reads, &fl).unwrap();
        assert_eq!(design.num_transcripts(), 2);
        assert_eq!(design.total_reads(), 3.0);
        assert!(design.unobservable.is_empty());
        assert!(design.unidentifiable.is_empty());
    }
}
