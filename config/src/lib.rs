use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod fns;
pub mod params;

pub use fns::*;
pub use params::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const SOURCE: &str = "isoinfer";

// numeric values
pub const MIN_THREADS: usize = 1;
pub const MIN_BED_FIELDS: usize = 12;
pub const MIN_BED6_FIELDS: usize = 6;
pub const EMPTY_COVERAGE_THRESHOLD: f32 = 1e-6;
pub const MIN_EMPTY_REGION_LEN: usize = 100;
pub const MIN_GENE_LENGTH: usize = 200;
pub const GENE_FLANK: u64 = 10;
pub const MAX_GENE_EXPANSION: u64 = 1000;
pub const COVERAGE_CHUNK: u64 = 1 << 20;
pub const MAX_INTRON_SIZE: u64 = 50_000;
pub const MIN_INTRON_SIZE: u64 = 0;
pub const JUNCTION_RATIO_THRESHOLD: f64 = 0.01;
pub const INTRON_FLANK_OFFSET: usize = 10;
pub const INTRON_FLANK_LEN: usize = 20;
pub const INTRON_COVERAGE_RATIO: f64 = 10.0;

pub const MAX_CAGE_FRAC: f64 = 0.05;
pub const CAGE_WINDOW: usize = 30;
pub const MIN_NUM_CAGE_TAGS: f64 = 5.0;
pub const POLYA_WINDOW: usize = 30;
pub const MIN_NUM_POLYA_TAGS: f64 = 5.0;
pub const MAX_NUM_PEAKS: usize = 100;
pub const PEAK_MERGE_RATIO: f64 = 1.5;
pub const MAX_PEAK_MERGE_ROUNDS: usize = 99;
pub const CAGE_FILTER_QUANTILE: f64 = 0.999;
pub const POLYA_MERGE_DISTANCE: usize = 20;
pub const REFERENCE_PEAK_SIZE: u64 = 50;

pub const MIN_EXON_BPKM: f64 = 0.01;
pub const EXON_EXT_CVG_RATIO: f64 = 5.0;
pub const MIN_EXT_LEN_FOR_RATIO: usize = 20;
pub const NUM_TSS_BASES_TO_SKIP: usize = 200;
pub const NUM_TES_BASES_TO_SKIP: usize = 300;
pub const MAX_CANDIDATE_TRANSCRIPTS: usize = 1000;

pub const MIN_TRANSCRIPT_FREQ: f64 = 1e-12;
pub const FD_STEP: f64 = 1e-8;
pub const ABS_TOL: f64 = 1e-5;
pub const MAX_ITERATIONS: usize = 500;
pub const NUM_FINAL_PASSES: usize = 5;
pub const INITIAL_TOLERANCE: f64 = 10.0;
pub const TOLERANCE_DECAY: f64 = 5.0;
pub const CONFIDENCE_ALPHA: f64 = 0.025;
pub const MAX_BISECTION_ITERATIONS: usize = 100;
pub const ROW_CLUSTER_TOL: f64 = 1e-6;

pub const FL_MEAN: f64 = 200.0;
pub const FL_SD: f64 = 40.0;
pub const READ_LEN: usize = 76;
pub const DEFAULT_READ_GROUP: &str = "mean";
pub const PAIRS_ARE_OPP_STRAND: bool = true;

// file names
pub const ELEMENTS: &str = "elements.bed";
pub const TRANSCRIPTS: &str = "transcripts.gtf";
pub const SEGMENTS: &str = "segments.bed";
pub const RUN_CONFIG: &str = "config.json";

/// transcription strand of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub fn both() -> [Strand; 2] {
        [Strand::Forward, Strand::Reverse]
    }

    /// short tag used in gene ids
    pub fn tag(&self) -> char {
        match self {
            Strand::Forward => 'p',
            Strand::Reverse => 'm',
        }
    }
}

impl std::fmt::Display for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Strand::Forward => write!(f, "+"),
            Strand::Reverse => write!(f, "-"),
        }
    }
}

impl std::str::FromStr for Strand {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "+" => Ok(Strand::Forward),
            "-" => Ok(Strand::Reverse),
            _ => Err(CliError::InvalidInput(format!(
                "ERROR: Strand {:?} is not + or -",
                s
            ))),
        }
    }
}

/// non-fatal per-locus outcomes
///
/// Every variant means the locus produced less output than a full
/// model; none of them stop the worker pool.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LocusOutcome {
    #[error("Too few reads to estimate transcript frequencies")]
    TooFewReads,
    #[error("Too many candidate transcripts ({0} > {1})")]
    TooManyCandidates(usize, usize),
    #[error("No signal: {0}")]
    NoSignal(String),
    #[error("Optimization failure: {0}")]
    OptimizationFailure(String),
}

impl LocusOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            LocusOutcome::TooFewReads => "too_few_reads",
            LocusOutcome::TooManyCandidates(_, _) => "too_many_candidates",
            LocusOutcome::NoSignal(_) => "no_signal",
            LocusOutcome::OptimizationFailure(_) => "optimization_failure",
        }
    }
}

/// error handling for CLI
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Missing reference: {0}")]
    MissingReference(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strand_round_trip() {
        for strand in Strand::both() {
            let parsed: Strand = strand.to_string().parse().unwrap();
            assert_eq!(parsed, strand);
        }

        assert!("x".parse::<Strand>().is_err());
    }

    #[test]
    fn test_outcome_kind() {
        assert_eq!(LocusOutcome::TooFewReads.kind(), "too_few_reads");
        assert_eq!(
            LocusOutcome::TooManyCandidates(10, 5).to_string(),
            "Too many candidate transcripts (10 > 5)"
        );
    }
}
