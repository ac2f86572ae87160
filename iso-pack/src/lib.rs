use std::fmt::Debug;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use config::{get_progress_bar, Strand, PAIRS_ARE_OPP_STRAND};
use hashbrown::HashMap;
use log::info;
use rayon::prelude::*;

pub mod bins;
pub mod elements;
pub mod gtf;
pub mod record;

pub use bins::{Bin, BinKind, GeneLocus, Label, LocalJunction, LocusFrame, Transcript};
pub use record::{Bed12, GenePred, Junction, ReadMate, ReadPair};

pub type GenePredMap = HashMap<String, Vec<GenePred>>;
pub type JunctionMap = HashMap<(String, Strand), Vec<Junction>>;
pub type ReadMap = HashMap<(String, Strand), Vec<ReadPair>>;

fn reader<P: AsRef<Path> + Debug>(file: P) -> Result<String, anyhow::Error> {
    let mut handle = File::open(&file).with_context(|| format!("Cannot open {:?}", file))?;
    let mut contents = String::new();
    handle.read_to_string(&mut contents)?;
    Ok(contents)
}

pub fn par_reader<P: AsRef<Path> + Debug + Sync + Send>(
    files: Vec<P>,
) -> Result<String, anyhow::Error> {
    let contents = files
        .par_iter()
        .map(reader)
        .collect::<Result<Vec<String>, _>>()?;

    Ok(contents.concat())
}

/// BED6 junctions grouped by contig/strand, duplicates summed and sorted
pub fn unpack_junctions<P: AsRef<Path> + Debug + Sync + Send>(
    files: Vec<P>,
) -> Result<JunctionMap, anyhow::Error> {
    let contents = par_reader(files)?;
    Ok(parse_junctions(&contents))
}

pub fn parse_junctions(contents: &str) -> JunctionMap {
    let pb = get_progress_bar(contents.lines().count() as u64, "Parsing junctions");
    let raw = contents
        .par_lines()
        .filter(|x| !x.starts_with('#') && !x.starts_with("track"))
        .filter_map(|x| Junction::read(x).ok())
        .fold(
            HashMap::new,
            |mut acc: JunctionMap, record| {
                acc.entry((record.chrom.clone(), record.strand))
                    .or_default()
                    .push(record);
                pb.inc(1);
                acc
            },
        )
        .reduce(HashMap::new, |mut acc, map| {
            for (k, v) in map {
                acc.entry(k).or_default().extend(v);
            }
            acc
        });

    let junctions = raw
        .into_par_iter()
        .map(|(key, records)| (key, collapse(records)))
        .collect::<JunctionMap>();

    pb.finish_and_clear();
    info!("Junctions parsed: {}", junctions.values().flatten().count());

    junctions
}

/// sums counts of identical introns and sorts by (start, stop)
fn collapse(records: Vec<Junction>) -> Vec<Junction> {
    let mut counts: HashMap<(u64, u64), Junction> = HashMap::new();
    for jn in records {
        counts
            .entry((jn.start, jn.stop))
            .and_modify(|acc| acc.count += jn.count)
            .or_insert(jn);
    }

    let mut junctions = counts.into_values().collect::<Vec<_>>();
    junctions.sort_unstable_by(|a, b| a.start.cmp(&b.start).then(a.stop.cmp(&b.stop)));
    junctions
}

/// adds `extra` junctions to `base`; counts of shared introns are summed
pub fn combine(base: JunctionMap, extra: JunctionMap) -> JunctionMap {
    info!("Combining junction tables...");
    let mut tracks = base;

    for (key, records) in extra {
        tracks.entry(key).or_default().extend(records);
    }

    tracks
        .into_par_iter()
        .map(|(key, records)| (key, collapse(records)))
        .collect()
}

/// BED12 mates paired by read name and grouped by contig/strand
pub fn unpack_reads<P: AsRef<Path> + Debug + Sync + Send>(
    files: Vec<P>,
) -> Result<ReadMap, anyhow::Error> {
    let contents = par_reader(files)?;
    Ok(parse_reads(&contents))
}

fn singles(mates: Vec<ReadMate>) -> Vec<ReadPair> {
    mates
        .into_iter()
        .filter_map(|m| ReadPair::from_mates(vec![m], PAIRS_ARE_OPP_STRAND))
        .collect()
}

pub fn parse_reads(contents: &str) -> ReadMap {
    let pb = get_progress_bar(contents.lines().count() as u64, "Parsing read mates");
    let mates = contents
        .par_lines()
        .filter(|x| !x.starts_with('#') && !x.starts_with("track"))
        .filter_map(|x| ReadMate::read(x).ok())
        .fold(
            HashMap::new,
            |mut acc: HashMap<(String, String), Vec<ReadMate>>, mate| {
                acc.entry((mate.chrom.clone(), mate.name.clone()))
                    .or_default()
                    .push(mate);
                pb.inc(1);
                acc
            },
        )
        .reduce(HashMap::new, |mut acc, map| {
            for (k, v) in map {
                acc.entry(k).or_default().extend(v);
            }
            acc
        });
    pb.finish_and_clear();

    let mut reads: ReadMap = HashMap::new();
    for (_, group) in mates {
        // a name seen more than twice, or mates that do not agree, are not a
        // pair; keep each mate on its own
        let pairs = match group.len() {
            1 | 2 => match ReadPair::from_mates(group.clone(), PAIRS_ARE_OPP_STRAND) {
                Some(pair) => vec![pair],
                None => singles(group),
            },
            _ => singles(group),
        };

        for pair in pairs {
            reads
                .entry((pair.chrom.clone(), pair.strand))
                .or_default()
                .push(pair);
        }
    }

    reads.par_iter_mut().for_each(|(_, v)| {
        v.par_sort_unstable_by(|a, b| a.start().cmp(&b.start()).then(a.stop().cmp(&b.stop())));
    });

    info!("Read pairs parsed: {}", reads.values().flatten().count());
    reads
}

/// reference transcripts grouped by contig
pub fn unpack_reference<P: AsRef<Path> + Debug + Sync + Send>(
    files: Vec<P>,
) -> Result<GenePredMap, anyhow::Error> {
    let contents = par_reader(files)?;
    Ok(parse_tracks(&contents))
}

pub fn parse_tracks(contents: &str) -> GenePredMap {
    let pb = get_progress_bar(contents.lines().count() as u64, "Parsing BED12 files");
    let mut tracks = contents
        .par_lines()
        .filter(|x| !x.starts_with('#') && !x.starts_with("track"))
        .filter_map(|x| Bed12::parse(x).ok())
        .map(Bed12::into_inner)
        .fold(
            HashMap::new,
            |mut acc: GenePredMap, record| {
                acc.entry(record.chrom.clone()).or_default().push(record);
                pb.inc(1);
                acc
            },
        )
        .reduce(HashMap::new, |mut acc, map| {
            for (k, v) in map {
                acc.entry(k).or_default().extend(v);
            }
            acc
        });

    // sort by start asc, end desc
    tracks.par_iter_mut().for_each(|(_, v)| {
        v.par_sort_unstable_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
    });

    pb.finish_and_clear();
    info!("Records parsed: {}", tracks.values().flatten().count());

    tracks
}

/// annotated introns as zero-count junctions, used for connectivity only
pub fn reference_junctions(tracks: &GenePredMap) -> JunctionMap {
    let mut junctions: JunctionMap = HashMap::new();

    for (chrom, records) in tracks {
        for tx in records {
            let acc = junctions.entry((chrom.clone(), tx.strand)).or_default();
            acc.extend(
                tx.introns
                    .iter()
                    .filter(|(start, stop)| stop > start)
                    .map(|(start, stop)| Junction {
                        chrom: chrom.clone(),
                        strand: tx.strand,
                        start: *start,
                        stop: *stop,
                        count: 0,
                    }),
            );
        }
    }

    junctions
        .into_iter()
        .map(|(key, records)| (key, collapse(records)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn test_parse_junctions_collapses_duplicates() {
        let contents = "chr1\t100\t200\tj\t3\t+\nchr1\t100\t200\tj\t4\t+\nchr1\t50\t90\tj\t1\t+\nchr1\t100\t200\tj\t9\t-\n";
        let junctions = parse_junctions(contents);

        let plus = &junctions[&("chr1".to_string(), Strand::Forward)];
        assert_eq!(plus.len(), 2);
        assert_eq!(plus[0].start, 50);
        assert_eq!(plus[1].count, 7);
        assert_eq!(junctions[&("chr1".to_string(), Strand::Reverse)][0].count, 9);
    }

    #[test]
    fn test_combine_keeps_zero_count_connectivity() {
        let base = parse_junctions("chr1\t100\t200\tj\t3\t+\n");
        let extra = parse_junctions("chr1\t100\t200\tj\t0\t+\nchr1\t300\t400\tj\t0\t+\n");
        let combined = combine(base, extra);

        let plus = &combined[&("chr1".to_string(), Strand::Forward)];
        assert_eq!(plus.len(), 2);
        assert_eq!(plus[0].count, 3);
        assert_eq!(plus[1].count, 0);
    }

    #[test]
    fn test_unpack_reads_pairs_mates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.bed");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "chr1\t0\t50\tr1/1\t0\t+\t0\t50\t0\t1\t50,\t0,").unwrap();
        writeln!(file, "chr1\t150\t200\tr1/2\t0\t-\t150\t200\t0\t1\t50,\t0,").unwrap();
        writeln!(file, "chr1\t10\t60\tr2\t0\t+\t10\t60\t0\t1\t50,\t0,").unwrap();
        drop(file);

        let reads = unpack_reads(vec![&path]).unwrap();
        let plus = &reads[&("chr1".to_string(), Strand::Forward)];

        assert_eq!(plus.len(), 2);
        assert!(plus[0].is_paired());
        assert_eq!(plus[0].stop(), 199);
        assert!(!plus[1].is_paired());
        assert!(!reads.contains_key(&("chr1".to_string(), Strand::Reverse)));
    }

    #[test]
    fn test_same_strand_mates_are_kept_as_singles() {
        let contents = "chr1\t0\t50\tr1/1\t0\t+\t0\t50\t0\t1\t50,\t0,\nchr1\t150\t200\tr1/2\t0\t+\t150\t200\t0\t1\t50,\t0,\n";
        let reads = parse_reads(contents);
        let plus = &reads[&("chr1".to_string(), Strand::Forward)];

        assert_eq!(plus.len(), 2);
        assert!(plus.iter().all(|pair| !pair.is_paired()));
    }

    #[test]
    fn test_reference_junctions() {
        let tracks = parse_tracks("chr1\t10\t60\ttx1\t0\t+\t10\t60\t0\t2\t10,10,\t0,40,\n");
        let junctions = reference_junctions(&tracks);
        let plus = &junctions[&("chr1".to_string(), Strand::Forward)];

        assert_eq!(plus.len(), 1);
        assert_eq!((plus[0].start, plus[0].stop, plus[0].count), (20, 49, 0));
    }
}
