//! Core module for running the per-locus pipeline
//! Alejandro Gonzales-Irribarren, 2025
//!
//! This module takes one candidate gene locus from the queue and runs
//! boundary calling, re-segmentation, splice graph construction and
//! frequency estimation on it.
//!
//! In short, the locus signal is read from the worker's own readers,
//! masked to the locus regions and oriented 5' to 3'. Junctions are
//! filtered against that coverage, 5'/3' peaks are called and merged with
//! reference boundaries, and the locus is either handed back split into
//! smaller loci or turned into typed elements and transcript models.
//! Models are finally quantified from the read pairs falling inside the
//! locus.

use config::{Config, LocusOutcome, REFERENCE_PEAK_SIZE};
use iso_freq::{build_design, quantify, FlDists};
use iso_graph::{build_models, to_genomic_transcripts, LocusEvidence};
use iso_peaks::{call_tes_peaks, call_tss_peaks, Peak};
use iso_segment::{filter_locus_junctions, find_empty_regions, re_segment};
use log::{debug, warn};
use packbed::{
    elements::locus_lines, gtf::transcript_lines, Bin, BinKind, GeneLocus, GenePredMap,
    JunctionMap, LocalJunction, LocusFrame, ReadMap, ReadPair, Transcript,
};

use crate::source::SignalReaders;

/// read-only inputs shared by every worker
pub struct LocusContext<'a> {
    pub config: &'a Config,
    pub junctions: &'a JunctionMap,
    pub reads: Option<&'a ReadMap>,
    pub reference: Option<&'a GenePredMap>,
    pub fl_dists: &'a FlDists,
    pub total_reads: f64,
}

/// what a worker does with a locus once it is processed
#[derive(Debug, Clone, PartialEq)]
pub enum LocusResult {
    /// elements and transcripts are final; `outcome` is set when a stage
    /// stopped early
    Done {
        locus: GeneLocus,
        outcome: Option<LocusOutcome>,
    },
    /// replacement loci to be queued again
    Split(Vec<GeneLocus>),
}

impl LocusResult {
    /// elements and GTF lines of a finished locus
    pub fn lines(&self) -> (Vec<String>, Vec<String>) {
        match self {
            LocusResult::Done { locus, .. } => (
                locus_lines(locus),
                locus.transcripts.iter().flat_map(transcript_lines).collect(),
            ),
            LocusResult::Split(_) => (Vec::new(), Vec::new()),
        }
    }
}

/// zeroes genomic positions of `values` that fall between locus regions
fn mask_to_regions(values: &mut [f32], locus: &GeneLocus) {
    let start = locus.start();
    for (idx, v) in values.iter_mut().enumerate() {
        let pos = start + idx as u64;
        if !locus.regions.iter().any(|(s, e)| *s <= pos && pos <= *e) {
            *v = 0.0;
        }
    }
}

/// annotated boundaries of the transcripts inside a locus
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceBoundaries {
    pub promoters: Vec<(usize, usize)>,
    pub polyas: Vec<(usize, usize)>,
    pub tss: Vec<usize>,
    pub tes: Vec<usize>,
    /// TSS/TES exons, genomic
    pub exons: Vec<Bin>,
}

/// Collects annotated promoters, poly(A) sites and terminal exons of
/// reference transcripts contained in the locus, as requested by `config`
pub fn reference_boundaries(
    locus: &GeneLocus,
    tracks: &GenePredMap,
    config: &Config,
) -> ReferenceBoundaries {
    let frame = locus.frame();
    let mut bounds = ReferenceBoundaries::default();

    let Some(records) = tracks.get(&locus.chrom) else {
        return bounds;
    };

    for tx in records.iter().filter(|tx| {
        tx.strand == locus.strand
            && !tx.exons.is_empty()
            && frame.contains(tx.start)
            && frame.contains(tx.end)
    }) {
        if config.use_reference_promoters {
            let (s, e) = tx.promoter(REFERENCE_PEAK_SIZE);
            bounds.promoters.push(frame.interval_to_local(s, e));
        }
        if config.use_reference_polya {
            let (s, e) = tx.polya_site(REFERENCE_PEAK_SIZE);
            bounds.polyas.push(frame.interval_to_local(s, e));
        }
        if config.use_reference_tss {
            let (s, e) = tx.get_first_exon();
            bounds.tss.push(frame.to_local(tx.promoter(1).0));
            bounds.exons.push(Bin::new(BinKind::TssExon, s, e));
        }
        if config.use_reference_tes {
            let (s, e) = tx.get_last_exon();
            bounds.tes.push(frame.to_local(tx.polya_site(1).0));
            bounds.exons.push(Bin::new(BinKind::TesExon, s, e));
        }
    }

    for v in [&mut bounds.promoters, &mut bounds.polyas] {
        v.sort_unstable();
        v.dedup();
    }
    for v in [&mut bounds.tss, &mut bounds.tes] {
        v.sort_unstable();
        v.dedup();
    }
    bounds.exons.sort_by_key(|b| (b.start, b.stop, b.kind));
    bounds.exons.dedup_by_key(|b| (b.start, b.stop, b.kind));

    bounds
}

/// junctions of the contig/strand lying inside the locus span, local frame
fn local_junctions(
    locus: &GeneLocus,
    frame: &LocusFrame,
    table: &JunctionMap,
) -> Vec<LocalJunction> {
    let mut local = table
        .get(&(locus.chrom.clone(), locus.strand))
        .map(|jns| {
            jns.iter()
                .filter(|jn| frame.contains(jn.start) && frame.contains(jn.stop))
                .map(|jn| frame.junction_to_local(jn))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    local.sort_unstable_by_key(|jn| (jn.start, jn.stop));
    local
}

/// fragments entirely inside the locus span
fn locus_reads(locus: &GeneLocus, reads: &ReadMap) -> Vec<ReadPair> {
    let Some(pairs) = reads.get(&(locus.chrom.clone(), locus.strand)) else {
        return Vec::new();
    };

    // pairs are sorted by start
    let first = pairs.partition_point(|pair| pair.start() < locus.start());
    pairs[first..]
        .iter()
        .take_while(|pair| pair.start() <= locus.stop())
        .filter(|pair| pair.stop() <= locus.stop())
        .cloned()
        .collect()
}

fn peak_intervals(
    peaks: Result<Vec<Peak>, LocusOutcome>,
    locus: &GeneLocus,
) -> Vec<(usize, usize)> {
    match peaks {
        Ok(peaks) => peaks.iter().map(Peak::coords).collect(),
        Err(outcome) => {
            debug!("{}: {}", locus.name(), outcome);
            Vec::new()
        }
    }
}

fn merge_intervals(
    mut called: Vec<(usize, usize)>,
    extra: &[(usize, usize)],
) -> Vec<(usize, usize)> {
    called.extend_from_slice(extra);
    called.sort_unstable();
    called.dedup();
    called
}

/// Attaches frequency estimates to the transcripts of a locus
///
/// Returns the outcome when quantification stops early; transcripts are
/// then left without frequencies, and dropped by the caller on too few
/// reads.
fn quantify_transcripts(
    transcripts: &mut [Transcript],
    reads: &[ReadPair],
    ctx: &LocusContext,
) -> Option<LocusOutcome> {
    let structures = transcripts
        .iter()
        .map(|tx| tx.exons.clone())
        .collect::<Vec<_>>();

    let estimates = build_design(&structures, reads, ctx.fl_dists).and_then(|design| {
        quantify(
            &design,
            transcripts.len(),
            &ctx.config.estimator,
            ctx.config.estimate_confidence_bounds,
        )
    });

    match estimates {
        Ok(estimates) => {
            let ids = transcripts.iter().map(|tx| tx.id.clone()).collect::<Vec<_>>();
            for (tx, estimate) in transcripts.iter_mut().zip(estimates) {
                tx.frequency = estimate.frequency;
                tx.conf_lo = estimate.conf_lo;
                tx.conf_hi = estimate.conf_hi;
                tx.unobservable = estimate.unobservable;
                tx.unidentifiable_with = estimate
                    .unidentifiable_with
                    .iter()
                    .map(|idx| ids[*idx].clone())
                    .collect();
            }
            None
        }
        Err(outcome) => Some(outcome),
    }
}

/// Runs boundary calling, re-segmentation, model building and
/// quantification on one locus
///
/// # Arguments
///
/// * `locus` - candidate gene locus, genomic coordinates
/// * `ctx` - shared tables and configuration
/// * `readers` - the calling worker's signal readers
///
/// # Returns
///
/// * `anyhow::Result<LocusResult>` - a finished locus or its replacement
///   loci; errors only come from the signal readers
///
/// # Example
///
/// ```rust, ignore
/// let mut readers = signals.open()?;
/// match process_locus(locus, &ctx, &mut readers)? {
///     LocusResult::Done { locus, .. } => write(locus),
///     LocusResult::Split(loci) => queue.extend(loci),
/// }
/// ```
pub fn process_locus(
    mut locus: GeneLocus,
    ctx: &LocusContext,
    readers: &mut SignalReaders,
) -> anyhow::Result<LocusResult> {
    let config = ctx.config;
    let frame = locus.frame();
    let (chrom, strand) = (locus.chrom.clone(), locus.strand);

    let mut rnaseq = readers.rnaseq(&chrom, strand, locus.start(), locus.stop())?;
    mask_to_regions(&mut rnaseq, &locus);
    let cov = frame.orient(&rnaseq);

    let mut regions = locus
        .regions
        .iter()
        .map(|(s, e)| frame.interval_to_local(*s, *e))
        .collect::<Vec<_>>();
    regions.sort_unstable();

    let junctions = filter_locus_junctions(
        &local_junctions(&locus, &frame, ctx.junctions),
        &cov,
        &regions,
        &config.segment,
    );

    let reference = match ctx.reference {
        Some(tracks) if config.uses_reference() => reference_boundaries(&locus, tracks, config),
        _ => ReferenceBoundaries::default(),
    };

    let tss_called = match readers.cage(&chrom, strand, locus.start(), locus.stop())? {
        Some(mut cage) => {
            mask_to_regions(&mut cage, &locus);
            let cage = frame.orient(&cage);
            peak_intervals(
                call_tss_peaks(&cage, &cov, &config.peaks, ctx.total_reads),
                &locus,
            )
        }
        None => Vec::new(),
    };
    let tes_called = match readers.polya(&chrom, strand, locus.start(), locus.stop())? {
        Some(mut polya) => {
            mask_to_regions(&mut polya, &locus);
            let polya = frame.orient(&polya);
            peak_intervals(
                call_tes_peaks(&polya, &cov, &junctions, &config.peaks),
                &locus,
            )
        }
        None => Vec::new(),
    };

    let tss = merge_intervals(tss_called, &reference.promoters);
    let tes = merge_intervals(tes_called, &reference.polyas);

    if config.allow_resegmentation() {
        if let Some(sub_loci) = re_segment(&locus, &cov, &tss, &tes, &junctions, &config.segment) {
            debug!("{} split into {} loci", locus.name(), sub_loci.len());
            return Ok(LocusResult::Split(sub_loci));
        }
    }

    let empty = find_empty_regions(
        &cov,
        config.segment.empty_threshold,
        config.segment.min_empty_region_len,
    );
    let ev = LocusEvidence {
        tss: &tss,
        tes: &tes,
        ref_tss: &reference.tss,
        ref_tes: &reference.tes,
        empty: &empty,
        ..LocusEvidence::new(&cov, &junctions)
    };

    let models = build_models(&ev, &config.graph);
    locus.elements = models
        .elements
        .iter()
        .map(|bin| frame.bin_to_genomic(bin))
        .chain(reference.exons.iter().cloned())
        .collect();

    if let Some(outcome) = models.outcome {
        warn!("{}: {}", locus.name(), outcome);
        return Ok(LocusResult::Done {
            locus,
            outcome: Some(outcome),
        });
    }

    let mut transcripts = to_genomic_transcripts(&locus, &models.transcripts);
    let mut outcome = None;
    if !transcripts.is_empty() {
        match ctx.reads {
            Some(reads) => {
                let pairs = locus_reads(&locus, reads);
                outcome = quantify_transcripts(&mut transcripts, &pairs, ctx);
                if let Some(outcome) = outcome.as_ref() {
                    warn!("{}: {}", locus.name(), outcome);
                }
                // structural elements only
                if outcome == Some(LocusOutcome::TooFewReads) {
                    transcripts.clear();
                }
            }
            None => debug!("{}: no reads, frequencies skipped", locus.name()),
        }
    }

    debug!(
        "{}: {} elements, {} transcripts",
        locus.name(),
        locus.elements.len(),
        transcripts.len()
    );
    locus.transcripts = transcripts;

    Ok(LocusResult::Done { locus, outcome })
}
