use anyhow::anyhow;
use bigtools::BigWigRead;
use config::Strand;
use hashbrown::HashMap;

use std::path::{Path, PathBuf};

/// per-worker handle over one signal track
pub trait SignalReader {
    /// per-base values over the closed genomic interval `[start, stop]`,
    /// missing values as zero
    fn values(&mut self, chrom: &str, start: u64, stop: u64) -> anyhow::Result<Vec<f32>>;
}

impl<F> SignalReader for F
where
    F: FnMut(&str, u64, u64) -> anyhow::Result<Vec<f32>>,
{
    fn values(&mut self, chrom: &str, start: u64, stop: u64) -> anyhow::Result<Vec<f32>> {
        self(chrom, start, stop)
    }
}

/// a signal track shared by all workers; every worker opens its own reader
pub trait SignalSource: Send + Sync {
    fn contigs(&self) -> Vec<(String, u64)>;
    fn open(&self) -> anyhow::Result<Box<dyn SignalReader + '_>>;
}

/// BigWig coverage file
#[derive(Debug, Clone)]
pub struct BigWigSource {
    path: PathBuf,
    contigs: Vec<(String, u64)>,
}

impl BigWigSource {
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bwread = BigWigRead::open_file(&path)
            .map_err(|e| anyhow!("Cannot open BigWig {:?}: {:?}", path, e))?;

        let contigs = bwread
            .chroms()
            .iter()
            .map(|chr| (chr.name.clone(), chr.length as u64))
            .collect();

        Ok(Self { path, contigs })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SignalSource for BigWigSource {
    fn contigs(&self) -> Vec<(String, u64)> {
        self.contigs.clone()
    }

    fn open(&self) -> anyhow::Result<Box<dyn SignalReader + '_>> {
        let mut bwread = BigWigRead::open_file(&self.path)
            .map_err(|e| anyhow!("Cannot re-open BigWig {:?}: {:?}", self.path, e))?;
        let lengths = self.contigs.iter().cloned().collect::<HashMap<_, _>>();

        let reader = move |chrom: &str, start: u64, stop: u64| -> anyhow::Result<Vec<f32>> {
            let n = (stop - start + 1) as usize;
            let Some(length) = lengths.get(chrom).copied() else {
                return Ok(vec![0.0; n]);
            };

            // bigtools reads half-open intervals clipped to the contig
            let end = (stop + 1).min(length);
            let mut values = if start < end {
                bwread
                    .values(chrom, start as u32, end as u32)
                    .map_err(|e| anyhow!("Cannot read values from BigWig: {:?}", e))?
            } else {
                Vec::new()
            };

            values.iter_mut().for_each(|v| {
                if !v.is_finite() {
                    *v = 0.0;
                }
            });
            values.resize(n, 0.0);
            Ok(values)
        };

        Ok(Box::new(reader))
    }
}

/// in-memory per-base track, contigs sorted by name
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tracks: HashMap<String, Vec<f32>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contig(mut self, chrom: &str, values: Vec<f32>) -> Self {
        self.tracks.insert(chrom.to_string(), values);
        self
    }
}

impl SignalSource for MemorySource {
    fn contigs(&self) -> Vec<(String, u64)> {
        let mut contigs = self
            .tracks
            .iter()
            .map(|(chrom, values)| (chrom.clone(), values.len() as u64))
            .collect::<Vec<_>>();
        contigs.sort();
        contigs
    }

    fn open(&self) -> anyhow::Result<Box<dyn SignalReader + '_>> {
        let reader = move |chrom: &str, start: u64, stop: u64| -> anyhow::Result<Vec<f32>> {
            let n = (stop - start + 1) as usize;
            let mut values = vec![0.0; n];

            if let Some(track) = self.tracks.get(chrom) {
                for (idx, pos) in (start..=stop).enumerate() {
                    if let Some(v) = track.get(pos as usize) {
                        values[idx] = if v.is_finite() { *v } else { 0.0 };
                    }
                }
            }

            Ok(values)
        };

        Ok(Box::new(reader))
    }
}

/// one source per strand
pub struct Stranded {
    pub plus: Box<dyn SignalSource>,
    pub minus: Box<dyn SignalSource>,
}

impl Stranded {
    pub fn new(plus: Box<dyn SignalSource>, minus: Box<dyn SignalSource>) -> Self {
        Self { plus, minus }
    }

    pub fn bigwig<P: AsRef<Path>>(plus: P, minus: P) -> anyhow::Result<Self> {
        Ok(Self::new(
            Box::new(BigWigSource::new(plus)?),
            Box::new(BigWigSource::new(minus)?),
        ))
    }

    pub fn get(&self, strand: Strand) -> &dyn SignalSource {
        match strand {
            Strand::Forward => self.plus.as_ref(),
            Strand::Reverse => self.minus.as_ref(),
        }
    }

    /// union of both strands' contigs, longest length kept
    pub fn contigs(&self) -> Vec<(String, u64)> {
        let mut lengths: HashMap<String, u64> = HashMap::new();
        for (chrom, len) in self.plus.contigs().into_iter().chain(self.minus.contigs()) {
            let entry = lengths.entry(chrom).or_insert(0);
            *entry = (*entry).max(len);
        }

        let mut contigs = lengths.into_iter().collect::<Vec<_>>();
        contigs.sort();
        contigs
    }
}

/// every signal of a run
pub struct SignalSet {
    pub rnaseq: Stranded,
    pub cage: Option<Stranded>,
    pub polya: Option<Stranded>,
}

/// readers opened by one worker
pub struct SignalReaders<'a> {
    rnaseq: [Box<dyn SignalReader + 'a>; 2],
    cage: Option<[Box<dyn SignalReader + 'a>; 2]>,
    polya: Option<[Box<dyn SignalReader + 'a>; 2]>,
}

fn open_pair(signal: &Stranded) -> anyhow::Result<[Box<dyn SignalReader + '_>; 2]> {
    Ok([signal.plus.open()?, signal.minus.open()?])
}

fn strand_idx(strand: Strand) -> usize {
    match strand {
        Strand::Forward => 0,
        Strand::Reverse => 1,
    }
}

impl SignalSet {
    pub fn open(&self) -> anyhow::Result<SignalReaders<'_>> {
        Ok(SignalReaders {
            rnaseq: open_pair(&self.rnaseq)?,
            cage: self.cage.as_ref().map(open_pair).transpose()?,
            polya: self.polya.as_ref().map(open_pair).transpose()?,
        })
    }
}

impl<'a> SignalReaders<'a> {
    pub fn rnaseq(
        &mut self,
        chrom: &str,
        strand: Strand,
        start: u64,
        stop: u64,
    ) -> anyhow::Result<Vec<f32>> {
        self.rnaseq[strand_idx(strand)].values(chrom, start, stop)
    }

    pub fn cage(
        &mut self,
        chrom: &str,
        strand: Strand,
        start: u64,
        stop: u64,
    ) -> anyhow::Result<Option<Vec<f32>>> {
        match self.cage.as_mut() {
            Some(readers) => readers[strand_idx(strand)]
                .values(chrom, start, stop)
                .map(Some),
            None => Ok(None),
        }
    }

    pub fn polya(
        &mut self,
        chrom: &str,
        strand: Strand,
        start: u64,
        stop: u64,
    ) -> anyhow::Result<Option<Vec<f32>>> {
        match self.polya.as_mut() {
            Some(readers) => readers[strand_idx(strand)]
                .values(chrom, start, stop)
                .map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_pads_and_zeroes() {
        let source = MemorySource::new().with_contig("chr1", vec![1.0, f32::NAN, 3.0]);
        let mut reader = source.open().unwrap();

        assert_eq!(reader.values("chr1", 1, 4).unwrap(), vec![0.0, 3.0, 0.0, 0.0]);
        assert_eq!(reader.values("chrX", 0, 1).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_stranded_contigs_are_merged() {
        let signal = Stranded::new(
            Box::new(MemorySource::new().with_contig("chr1", vec![0.0; 10])),
            Box::new(
                MemorySource::new()
                    .with_contig("chr1", vec![0.0; 12])
                    .with_contig("chr2", vec![0.0; 5]),
            ),
        );

        assert_eq!(
            signal.contigs(),
            vec![("chr1".to_string(), 12), ("chr2".to_string(), 5)]
        );
    }

    #[test]
    fn test_readers_follow_strand() {
        let set = SignalSet {
            rnaseq: Stranded::new(
                Box::new(MemorySource::new().with_contig("chr1", vec![1.0; 4])),
                Box::new(MemorySource::new().with_contig("chr1", vec![2.0; 4])),
            ),
            cage: None,
            polya: None,
        };
        let mut readers = set.open().unwrap();

        assert_eq!(readers.rnaseq("chr1", Strand::Reverse, 0, 1).unwrap(), vec![2.0, 2.0]);
        assert_eq!(readers.cage("chr1", Strand::Forward, 0, 1).unwrap(), None);
    }
}
