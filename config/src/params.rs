//! Immutable run configuration
//!
//! A single [`Config`] is built once from the command line and handed by
//! reference to every stage. Numeric thresholds are grouped per stage so
//! each component only sees the knobs it uses.

use serde::{Deserialize, Serialize};

use crate::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub threads: usize,
    pub region: Option<Region>,
    pub use_reference_genes: bool,
    pub use_reference_junctions: bool,
    pub use_reference_tss: bool,
    pub use_reference_tes: bool,
    pub use_reference_promoters: bool,
    pub use_reference_polya: bool,
    pub estimate_confidence_bounds: bool,
    pub segment: SegmentParams,
    pub peaks: PeakParams,
    pub graph: GraphParams,
    pub estimator: EstimatorParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().max(MIN_THREADS),
            region: None,
            use_reference_genes: false,
            use_reference_junctions: false,
            use_reference_tss: false,
            use_reference_tes: false,
            use_reference_promoters: false,
            use_reference_polya: false,
            estimate_confidence_bounds: true,
            segment: SegmentParams::default(),
            peaks: PeakParams::default(),
            graph: GraphParams::default(),
            estimator: EstimatorParams::default(),
        }
    }
}

impl Config {
    /// true when any reference element is requested
    pub fn uses_reference(&self) -> bool {
        self.use_reference_genes
            || self.use_reference_junctions
            || self.use_reference_tss
            || self.use_reference_tes
            || self.use_reference_promoters
            || self.use_reference_polya
    }

    /// re-segmentation is only meaningful for de novo gene boundaries
    pub fn allow_resegmentation(&self) -> bool {
        !self.use_reference_genes
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// region restriction: a contig, optionally a closed 0-based window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub chrom: String,
    pub start: Option<u64>,
    pub stop: Option<u64>,
}

impl Region {
    pub fn contains(&self, chrom: &str, start: u64, stop: u64) -> bool {
        if self.chrom != chrom {
            return false;
        }

        let lo = self.start.unwrap_or(0);
        let hi = self.stop.unwrap_or(u64::MAX);
        start <= hi && stop >= lo
    }
}

impl std::str::FromStr for Region {
    type Err = CliError;

    /// parses `chr1` or `chr1:1000-2000` (1-based, inclusive, as typed by users)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || CliError::InvalidInput(format!("ERROR: Cannot parse region {:?}", s));

        match s.split_once(':') {
            None if !s.is_empty() => Ok(Region {
                chrom: s.to_string(),
                start: None,
                stop: None,
            }),
            None => Err(bad()),
            Some((chrom, span)) => {
                let (start, stop) = span.split_once('-').ok_or_else(bad)?;
                let start = start.replace(',', "").parse::<u64>().map_err(|_| bad())?;
                let stop = stop.replace(',', "").parse::<u64>().map_err(|_| bad())?;

                if start == 0 || stop < start || chrom.is_empty() {
                    return Err(bad());
                }

                Ok(Region {
                    chrom: chrom.to_string(),
                    start: Some(start - 1),
                    stop: Some(stop - 1),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentParams {
    pub empty_threshold: f32,
    pub min_empty_region_len: usize,
    pub min_gene_length: usize,
    pub gene_flank: u64,
    pub max_gene_expansion: u64,
    pub max_intron_size: u64,
    pub min_intron_size: u64,
    pub junction_ratio: f64,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            empty_threshold: EMPTY_COVERAGE_THRESHOLD,
            min_empty_region_len: MIN_EMPTY_REGION_LEN,
            min_gene_length: MIN_GENE_LENGTH,
            gene_flank: GENE_FLANK,
            max_gene_expansion: MAX_GENE_EXPANSION,
            max_intron_size: MAX_INTRON_SIZE,
            min_intron_size: MIN_INTRON_SIZE,
            junction_ratio: JUNCTION_RATIO_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakParams {
    pub max_cage_frac: f64,
    pub cage_window: usize,
    pub min_cage_tags: f64,
    pub cage_score_frac: f64,
    pub polya_window: usize,
    pub min_polya_tags: f64,
    pub polya_score_frac: f64,
    pub max_num_peaks: usize,
    pub cage_quantile: f64,
    pub filter_cage_background: bool,
    pub total_mapped_reads: Option<f64>,
}

impl Default for PeakParams {
    fn default() -> Self {
        Self {
            max_cage_frac: MAX_CAGE_FRAC,
            cage_window: CAGE_WINDOW,
            min_cage_tags: MIN_NUM_CAGE_TAGS,
            cage_score_frac: MAX_CAGE_FRAC,
            polya_window: POLYA_WINDOW,
            min_polya_tags: MIN_NUM_POLYA_TAGS,
            polya_score_frac: MAX_CAGE_FRAC,
            max_num_peaks: MAX_NUM_PEAKS,
            cage_quantile: CAGE_FILTER_QUANTILE,
            filter_cage_background: true,
            total_mapped_reads: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphParams {
    pub min_exon_bpkm: f64,
    pub exon_ext_cvg_ratio: f64,
    pub min_ext_len_for_ratio: usize,
    pub tss_bases_to_skip: usize,
    pub tes_bases_to_skip: usize,
    pub filter_window: usize,
    pub max_candidate_transcripts: usize,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            min_exon_bpkm: MIN_EXON_BPKM,
            exon_ext_cvg_ratio: EXON_EXT_CVG_RATIO,
            min_ext_len_for_ratio: MIN_EXT_LEN_FOR_RATIO,
            tss_bases_to_skip: NUM_TSS_BASES_TO_SKIP,
            tes_bases_to_skip: NUM_TES_BASES_TO_SKIP,
            filter_window: MIN_EMPTY_REGION_LEN,
            max_candidate_transcripts: MAX_CANDIDATE_TRANSCRIPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorParams {
    pub min_freq: f64,
    pub fd_step: f64,
    pub abs_tol: f64,
    pub max_iterations: usize,
    pub alpha: f64,
    pub max_bisection_iterations: usize,
    pub fl_mean: f64,
    pub fl_sd: f64,
    pub read_len: usize,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            min_freq: MIN_TRANSCRIPT_FREQ,
            fd_step: FD_STEP,
            abs_tol: ABS_TOL,
            max_iterations: MAX_ITERATIONS,
            alpha: CONFIDENCE_ALPHA,
            max_bisection_iterations: MAX_BISECTION_ITERATIONS,
            fl_mean: FL_MEAN,
            fl_sd: FL_SD,
            read_len: READ_LEN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_parse() {
        let region: Region = "chr2:1,001-2000".parse().unwrap();
        assert_eq!(region.chrom, "chr2");
        assert_eq!(region.start, Some(1000));
        assert_eq!(region.stop, Some(1999));

        assert!(region.contains("chr2", 1999, 3000));
        assert!(!region.contains("chr2", 2000, 3000));
        assert!(!region.contains("chr1", 1500, 1600));

        let whole: Region = "chrX".parse().unwrap();
        assert!(whole.contains("chrX", 0, 10));
        assert!("chr1:20-10".parse::<Region>().is_err());
    }

    #[test]
    fn test_config_json() {
        let config = Config {
            threads: 2,
            ..Default::default()
        };

        let json = config.to_json().unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert!(!back.uses_reference());
        assert!(back.allow_resegmentation());
    }
}
