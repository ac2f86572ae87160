//! Core module for inferring transcript models from RNA-seq evidence
//! Alejandro Gonzales-Irribarren, 2025
//!
//! This module wires the two phases of a run together and owns the
//! output files.
//!
//! In short, phase one scans the RNA-seq coverage of every contig and
//! strand in parallel, one chunk at a time, filters the junction table
//! and cuts the contigs into candidate gene loci (or takes them from the
//! reference annotation). Phase two hands those loci to the worker pool,
//! where each one is turned into elements and quantified transcripts that
//! are streamed to `elements.bed` and `transcripts.gtf`.

pub mod cli;
pub mod locus;
pub mod pool;
pub mod source;

use config::{
    get_progress_bar, write_collection, ArgCheck, Config, Strand, COVERAGE_CHUNK, ELEMENTS,
    RUN_CONFIG, SEGMENTS, TRANSCRIPTS,
};
use hashbrown::HashMap;
use iso_freq::FlDists;
use iso_segment::{filter_junctions, reference_loci, segment_empty_regions, EmptyScanner};
use log::{info, warn};
use packbed::{
    combine, elements::elements_header, elements::gene_line, reference_junctions,
    unpack_junctions, unpack_reads, unpack_reference, GeneLocus, GenePredMap, JunctionMap,
    ReadMap,
};
use rayon::prelude::*;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::cli::{RunArgs, SegmentArgs};
use crate::locus::{process_locus, LocusContext};
use crate::pool::{Coordinator, Outputs, PoolSummary};
use crate::source::{SignalReader, SignalSet, Stranded};

/// output of the contig-wide phase
#[derive(Debug, Clone, Default)]
pub struct Segmentation {
    pub loci: Vec<GeneLocus>,
    /// filtered junctions, reference introns included when requested
    pub junctions: JunctionMap,
    /// summed RNA-seq coverage over every scanned contig/strand
    pub total_coverage: f64,
}

/// Phase one: junction filtering and locus discovery per contig/strand
///
/// # Arguments
///
/// * `rnaseq` - stranded RNA-seq coverage
/// * `junctions` - raw junction table
/// * `reference` - parsed annotation, when given
/// * `config` - run configuration
///
/// # Returns
///
/// * `anyhow::Result<Segmentation>` - loci restricted to `config.region`,
///   sorted by contig, strand and position
///
/// # Example
///
/// ```rust, ignore
/// let phase = segment_genome(&signals.rnaseq, junctions, None, &config)?;
/// ```
pub fn segment_genome(
    rnaseq: &Stranded,
    junctions: JunctionMap,
    reference: Option<&GenePredMap>,
    config: &Config,
) -> anyhow::Result<Segmentation> {
    let tasks = rnaseq
        .contigs()
        .into_iter()
        .filter(|(chrom, len)| {
            *len > 0
                && config
                    .region
                    .as_ref()
                    .map_or(true, |region| &region.chrom == chrom)
        })
        .flat_map(|(chrom, len)| Strand::both().map(|strand| (chrom.clone(), len, strand)))
        .collect::<Vec<_>>();

    let filtered = junctions
        .into_par_iter()
        .map(|(key, records)| (key, filter_junctions(records, &config.segment)))
        .collect::<JunctionMap>();
    let junctions = match reference {
        Some(tracks) if config.use_reference_junctions => {
            combine(filtered, reference_junctions(tracks))
        }
        _ => filtered,
    };

    let pb = get_progress_bar(tasks.len() as u64, "Segmenting contigs");
    let per_task = tasks
        .par_iter()
        .map(|(chrom, len, strand)| -> anyhow::Result<(Vec<GeneLocus>, f64)> {
            let mut reader = rnaseq.get(*strand).open()?;
            let mut scanner = EmptyScanner::new(
                config.segment.empty_threshold,
                config.segment.min_empty_region_len,
            );
            let mut total = 0.0;

            // one chunk in memory per task
            let mut start = 0;
            while start < *len {
                let stop = (start + COVERAGE_CHUNK).min(*len) - 1;
                let values = reader.values(chrom, start, stop)?;
                total += values.iter().map(|v| *v as f64).sum::<f64>();
                scanner.push(&values);
                start = stop + 1;
            }

            let loci = match reference {
                Some(tracks) if config.use_reference_genes => {
                    reference_loci(tracks, chrom, *strand, *len, &config.segment)
                }
                _ => {
                    let jns = junctions
                        .get(&(chrom.clone(), *strand))
                        .map(|v| v.as_slice())
                        .unwrap_or(&[]);
                    let empty = scanner.finish();
                    segment_empty_regions(
                        chrom,
                        *strand,
                        *len as usize,
                        &empty,
                        jns,
                        &config.segment,
                    )
                }
            };

            pb.inc(1);
            Ok((loci, total))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    pb.finish_and_clear();

    let mut phase = Segmentation {
        junctions,
        ..Default::default()
    };
    for (loci, total) in per_task {
        phase.total_coverage += total;
        phase.loci.extend(loci.into_iter().filter(|locus| {
            config.region.as_ref().map_or(true, |region| {
                region.contains(&locus.chrom, locus.start(), locus.stop())
            })
        }));
    }

    info!("Candidate loci: {}", phase.loci.len());
    Ok(phase)
}

/// library size used by the 5' background filter
fn total_reads(config: &Config, total_coverage: f64) -> f64 {
    config.peaks.total_mapped_reads.unwrap_or_else(|| {
        total_coverage / config.estimator.read_len.max(1) as f64
    })
}

/// Both phases over already opened inputs, streaming into `outputs`
///
/// # Arguments
///
/// * `signals` - coverage and tag tracks
/// * `junctions` - raw junction table
/// * `reads` - read pairs, when frequencies are wanted
/// * `reference` - parsed annotation, when given
/// * `config` - run configuration
/// * `outputs` - element and transcript streams
///
/// # Returns
///
/// * `anyhow::Result<PoolSummary>` - per-locus fates of the run
pub fn infer<E, T>(
    signals: &SignalSet,
    junctions: JunctionMap,
    reads: Option<&ReadMap>,
    reference: Option<&GenePredMap>,
    config: &Config,
    outputs: &Outputs<E, T>,
) -> anyhow::Result<PoolSummary>
where
    E: Write + Send,
    T: Write + Send,
{
    let phase = segment_genome(&signals.rnaseq, junctions, reference, config)?;
    let fl_dists = FlDists::from_normal(config.estimator.fl_mean, config.estimator.fl_sd);

    let ctx = LocusContext {
        config,
        junctions: &phase.junctions,
        reads,
        reference,
        fl_dists: &fl_dists,
        total_reads: total_reads(config, phase.total_coverage),
    };

    Coordinator::new(config.threads).run(
        phase.loci,
        || signals.open(),
        |locus, readers| process_locus(locus, &ctx, readers),
        outputs,
    )
}

type FileOutputs = Outputs<BufWriter<File>, BufWriter<File>>;

/// creates the output files, the elements track header included
pub fn open_outputs<P: AsRef<Path>>(outdir: P) -> anyhow::Result<FileOutputs> {
    let outdir = outdir.as_ref();
    std::fs::create_dir_all(outdir)?;

    let mut elements = BufWriter::new(File::create(outdir.join(ELEMENTS))?);
    writeln!(elements, "{}", elements_header(ELEMENTS))?;
    let transcripts = BufWriter::new(File::create(outdir.join(TRANSCRIPTS))?);

    Ok(Outputs::new(elements, transcripts))
}

fn write_config<P: AsRef<Path>>(config: &Config, outdir: P) -> anyhow::Result<()> {
    let json = config.to_json()?;
    std::fs::write(outdir.as_ref().join(RUN_CONFIG), json)?;
    Ok(())
}

fn parse_inputs(
    args: &SegmentArgs,
    config: &Config,
) -> anyhow::Result<(JunctionMap, Option<GenePredMap>)> {
    let junctions = unpack_junctions(args.junctions.clone())?;
    let reference = match args.reference.as_ref() {
        Some(path) if config.uses_reference() => Some(unpack_reference(vec![path.clone()])?),
        _ => None,
    };
    Ok((junctions, reference))
}

/// `run` subcommand: both phases, writing elements, transcripts and the
/// effective configuration
pub fn run(args: RunArgs) -> anyhow::Result<PoolSummary> {
    args.check()?;
    let config = args.to_config()?;
    let outdir = &args.common.outdir;
    info!("Running with {} threads", config.threads);

    let stranded = |plus: &Option<PathBuf>, minus: &Option<PathBuf>| match (plus, minus) {
        (Some(plus), Some(minus)) => Stranded::bigwig(plus, minus).map(Some),
        _ => Ok(None),
    };
    let signals = SignalSet {
        rnaseq: Stranded::bigwig(&args.common.rnaseq_plus, &args.common.rnaseq_minus)?,
        cage: stranded(&args.cage_plus, &args.cage_minus)?,
        polya: stranded(&args.polya_plus, &args.polya_minus)?,
    };
    if signals.cage.is_none() && !config.use_reference_promoters && !config.use_reference_tss {
        warn!("No 5' evidence given, no transcript can start");
    }

    let (junctions, reference) = parse_inputs(&args.common, &config)?;
    let reads = if args.reads.is_empty() {
        warn!("No reads given, transcript frequencies will not be estimated");
        None
    } else {
        Some(unpack_reads(args.reads.clone())?)
    };

    let outputs = open_outputs(outdir)?;
    write_config(&config, outdir)?;

    let summary = infer(
        &signals,
        junctions,
        reads.as_ref(),
        reference.as_ref(),
        &config,
        &outputs,
    )?;

    let (mut elements, mut transcripts) = outputs.into_inner()?;
    elements.flush()?;
    transcripts.flush()?;

    info!("Results written to {:?}", outdir);
    Ok(summary)
}

/// `segment` subcommand: phase one only, loci written as gene records
pub fn segment(args: SegmentArgs) -> anyhow::Result<usize> {
    args.check()?;
    let config = args.to_config();
    let rnaseq = Stranded::bigwig(&args.rnaseq_plus, &args.rnaseq_minus)?;
    let (junctions, reference) = parse_inputs(&args, &config)?;

    let phase = segment_genome(&rnaseq, junctions, reference.as_ref(), &config)?;
    let mut counts = loci_per_strand(&phase.loci).into_iter().collect::<Vec<_>>();
    counts.sort();
    for ((chrom, strand), n) in counts {
        info!("{}:{} -> {} loci", chrom, strand, n);
    }
    let lines = segment_lines(&phase.loci);

    std::fs::create_dir_all(&args.outdir)?;
    write_collection(&lines, args.outdir.join(SEGMENTS))?;
    write_config(&config, &args.outdir)?;

    Ok(phase.loci.len())
}

/// one gene record per locus under a track header
pub fn segment_lines(loci: &[GeneLocus]) -> Vec<String> {
    let mut sorted = loci.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| {
        a.chrom
            .cmp(&b.chrom)
            .then(a.start().cmp(&b.start()))
            .then(a.strand.tag().cmp(&b.strand.tag()))
    });

    std::iter::once(elements_header(SEGMENTS))
        .chain(sorted.into_iter().map(gene_line))
        .collect()
}

/// loci per contig/strand, used in logs and tests
pub fn loci_per_strand(loci: &[GeneLocus]) -> HashMap<(String, Strand), usize> {
    let mut counts = HashMap::new();
    for locus in loci {
        *counts.entry((locus.chrom.clone(), locus.strand)).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use config::Region;
    use packbed::{gtf::parse_gtf, Junction, ReadPair};

    const CONTIG_LEN: usize = 6000;

    // two-exon gene on + at [1000, 1199] / [1500, 1799], nothing on -
    fn signals() -> SignalSet {
        let mut rnaseq = vec![0.0f32; CONTIG_LEN];
        rnaseq[1000..1200].iter_mut().for_each(|v| *v = 10.0);
        rnaseq[1500..1800].iter_mut().for_each(|v| *v = 10.0);
        let mut cage = vec![0.0f32; CONTIG_LEN];
        cage[1000..1010].iter_mut().for_each(|v| *v = 200.0);
        let mut polya = vec![0.0f32; CONTIG_LEN];
        polya[1790..1800].iter_mut().for_each(|v| *v = 200.0);

        let track = |values: Vec<f32>| Box::new(MemorySource::new().with_contig("chr1", values));
        SignalSet {
            rnaseq: Stranded::new(track(rnaseq), track(vec![0.0; CONTIG_LEN])),
            cage: Some(Stranded::new(track(cage), track(vec![0.0; CONTIG_LEN]))),
            polya: Some(Stranded::new(track(polya), track(vec![0.0; CONTIG_LEN]))),
        }
    }

    fn junctions() -> JunctionMap {
        let mut table = JunctionMap::new();
        table.insert(
            ("chr1".to_string(), Strand::Forward),
            vec![Junction {
                chrom: "chr1".to_string(),
                strand: Strand::Forward,
                start: 1200,
                stop: 1499,
                count: 40,
            }],
        );
        table
    }

    fn reads() -> ReadMap {
        let pairs = (0..20)
            .map(|i| ReadPair {
                chrom: "chr1".to_string(),
                strand: Strand::Forward,
                read_group: config::DEFAULT_READ_GROUP.to_string(),
                read_len: 76,
                mates: vec![vec![(1550 + i * 5, 1625 + i * 5)]],
            })
            .collect::<Vec<_>>();

        let mut map = ReadMap::new();
        map.insert(("chr1".to_string(), Strand::Forward), pairs);
        map
    }

    fn config() -> Config {
        Config {
            threads: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_segment_genome_finds_one_locus() {
        let phase = segment_genome(&signals().rnaseq, junctions(), None, &config()).unwrap();

        assert_eq!(phase.loci.len(), 1);
        assert_eq!(phase.loci[0].strand, Strand::Forward);
        assert_eq!(phase.loci[0].start(), 990);
        assert_eq!(phase.loci[0].stop(), 1809);
        assert_eq!(phase.total_coverage, 5000.0);

        let counts = loci_per_strand(&phase.loci);
        assert_eq!(counts.get(&("chr1".to_string(), Strand::Forward)), Some(&1));
    }

    #[test]
    fn test_region_outside_gene_yields_nothing() {
        let mut config = config();
        config.region = Some(Region {
            chrom: "chr1".to_string(),
            start: Some(3000),
            stop: Some(4000),
        });

        let phase = segment_genome(&signals().rnaseq, junctions(), None, &config).unwrap();
        assert!(phase.loci.is_empty());
    }

    #[test]
    fn test_infer_end_to_end() {
        let reads = reads();
        let outputs = Outputs::new(Vec::new(), Vec::new());
        let summary = infer(
            &signals(),
            junctions(),
            Some(&reads),
            None,
            &config(),
            &outputs,
        )
        .unwrap();

        assert_eq!(summary.written, 1);
        assert_eq!(summary.failed, 0);

        let (elements, gtf) = outputs.into_inner().unwrap();
        let elements = String::from_utf8(elements).unwrap();
        let gtf = String::from_utf8(gtf).unwrap();

        assert!(elements.lines().next().unwrap().contains("\tgene\t"));
        assert!(elements.contains("\tintron\t40\t"));

        let transcripts = parse_gtf(&gtf).unwrap();
        assert_eq!(transcripts.len(), 1);
        assert_eq!(transcripts[0].exons.len(), 2);
        assert_eq!(transcripts[0].frequency, Some(1.0));
    }

    #[test]
    fn test_output_files_are_created_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let outputs = open_outputs(dir.path()).unwrap();
        let (mut elements, mut transcripts) = outputs.into_inner().unwrap();
        elements.flush().unwrap();
        transcripts.flush().unwrap();

        let contents = std::fs::read_to_string(dir.path().join(ELEMENTS)).unwrap();
        assert!(contents.starts_with("track name=\"elements.bed\""));
        assert!(dir.path().join(TRANSCRIPTS).exists());

        write_config(&config(), dir.path()).unwrap();
        let json = std::fs::read_to_string(dir.path().join(RUN_CONFIG)).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.threads, 2);
    }

    #[test]
    fn test_segment_lines_start_with_header() {
        let loci = vec![
            GeneLocus::new("chr2", Strand::Forward, vec![(10, 99)]),
            GeneLocus::new("chr1", Strand::Reverse, vec![(500, 599)]),
        ];
        let lines = segment_lines(&loci);

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("track"));
        assert!(lines[1].starts_with("chr1\t500\t600"));
        assert!(lines[2].starts_with("chr2\t10\t100"));
    }
}
