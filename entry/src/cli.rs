use clap::{ArgAction, Parser, Subcommand};
use config::{
    ArgCheck, CliError, Config, Region, CONFIDENCE_ALPHA, FL_MEAN, FL_SD,
    MAX_CANDIDATE_TRANSCRIPTS, READ_LEN,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: SubArgs,
}

#[derive(Debug, Subcommand)]
pub enum SubArgs {
    #[command(name = "run")]
    Run {
        #[command(flatten)]
        args: RunArgs,
    },

    #[command(name = "segment")]
    Segment {
        #[command(flatten)]
        args: SegmentArgs,
    },
}

impl SubArgs {
    pub fn verbose(&self) -> bool {
        match self {
            SubArgs::Run { args } => args.common.verbose,
            SubArgs::Segment { args } => args.verbose,
        }
    }

    pub fn threads(&self) -> usize {
        match self {
            SubArgs::Run { args } => args.common.threads,
            SubArgs::Segment { args } => args.threads,
        }
    }
}

/// inputs shared by `segment` and `run`
#[derive(Debug, Parser, Clone)]
pub struct SegmentArgs {
    #[arg(
        long = "rnaseq-plus",
        required = true,
        value_name = "PATH",
        num_args = 1,
        help = "Path to RNA-seq coverage BigWig of the + strand"
    )]
    pub rnaseq_plus: PathBuf,

    #[arg(
        long = "rnaseq-minus",
        required = true,
        value_name = "PATH",
        num_args = 1,
        help = "Path to RNA-seq coverage BigWig of the - strand"
    )]
    pub rnaseq_minus: PathBuf,

    #[arg(
        short = 'j',
        long = "junctions",
        required = true,
        value_name = "PATHS",
        value_delimiter = ',',
        num_args = 1..,
        help = "Path to BED6 splice junction files"
    )]
    pub junctions: Vec<PathBuf>,

    #[arg(
        long = "reference",
        required = false,
        value_name = "PATH",
        num_args = 1,
        help = "Path to reference BED12 annotation"
    )]
    pub reference: Option<PathBuf>,

    #[arg(
        long = "use-reference-genes",
        required = false,
        value_name = "FLAG",
        help = "Use annotated gene extents instead of coverage to define loci",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub use_reference_genes: bool,

    #[arg(
        long = "use-reference-junctions",
        required = false,
        value_name = "FLAG",
        help = "Add annotated introns to the junction table",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub use_reference_junctions: bool,

    #[arg(
        long = "region",
        required = false,
        value_name = "REGION",
        help = "Restrict the run to chr or chr:start-stop (1-based, inclusive)"
    )]
    pub region: Option<Region>,

    #[arg(
        short = 't',
        long = "threads",
        help = "Number of threads",
        value_name = "THREADS",
        default_value_t = num_cpus::get()
    )]
    pub threads: usize,

    #[arg(
        long = "outdir",
        short = 'o',
        required = false,
        value_name = "PATH",
        num_args = 1,
        help = "Path to output directory",
        default_value = "."
    )]
    pub outdir: PathBuf,

    #[arg(
        short = 'v',
        long = "verbose",
        required = false,
        value_name = "FLAG",
        help = "Log debug messages",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub verbose: bool,
}

impl SegmentArgs {
    pub fn to_config(&self) -> Config {
        Config {
            threads: self.threads.max(config::MIN_THREADS),
            region: self.region.clone(),
            use_reference_genes: self.use_reference_genes,
            use_reference_junctions: self.use_reference_junctions,
            ..Default::default()
        }
    }
}

impl ArgCheck for SegmentArgs {
    fn get_signal(&self) -> Vec<&PathBuf> {
        vec![&self.rnaseq_plus, &self.rnaseq_minus]
    }

    fn get_tracks(&self) -> Vec<&PathBuf> {
        self.junctions.iter().collect()
    }

    fn get_reference(&self) -> Option<&PathBuf> {
        self.reference.as_ref()
    }

    fn reference_requested(&self) -> bool {
        self.use_reference_genes || self.use_reference_junctions
    }
}

#[derive(Debug, Parser, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: SegmentArgs,

    #[arg(
        long = "cage-plus",
        required = false,
        value_name = "PATH",
        num_args = 1,
        requires = "cage_minus",
        help = "Path to 5' tag (CAGE) BigWig of the + strand"
    )]
    pub cage_plus: Option<PathBuf>,

    #[arg(
        long = "cage-minus",
        required = false,
        value_name = "PATH",
        num_args = 1,
        requires = "cage_plus",
        help = "Path to 5' tag (CAGE) BigWig of the - strand"
    )]
    pub cage_minus: Option<PathBuf>,

    #[arg(
        long = "polya-plus",
        required = false,
        value_name = "PATH",
        num_args = 1,
        requires = "polya_minus",
        help = "Path to 3' tag (poly(A)) BigWig of the + strand"
    )]
    pub polya_plus: Option<PathBuf>,

    #[arg(
        long = "polya-minus",
        required = false,
        value_name = "PATH",
        num_args = 1,
        requires = "polya_plus",
        help = "Path to 3' tag (poly(A)) BigWig of the - strand"
    )]
    pub polya_minus: Option<PathBuf>,

    #[arg(
        short = 'r',
        long = "reads",
        required = false,
        value_name = "PATHS",
        value_delimiter = ',',
        num_args = 1..,
        help = "Path to BED12 read mates (names ending in /1 and /2)"
    )]
    pub reads: Vec<PathBuf>,

    #[arg(
        long = "use-reference-tss",
        required = false,
        value_name = "FLAG",
        help = "Add annotated 5' exons and their starts",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub use_reference_tss: bool,

    #[arg(
        long = "use-reference-tes",
        required = false,
        value_name = "FLAG",
        help = "Add annotated 3' exons and their ends",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub use_reference_tes: bool,

    #[arg(
        long = "use-reference-promoters",
        required = false,
        value_name = "FLAG",
        help = "Add annotated promoters as TSS peaks",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub use_reference_promoters: bool,

    #[arg(
        long = "use-reference-polya",
        required = false,
        value_name = "FLAG",
        help = "Add annotated poly(A) sites as TES peaks",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub use_reference_polya: bool,

    #[arg(
        long = "no-bounds",
        required = false,
        value_name = "FLAG",
        help = "Skip profile-likelihood confidence bounds",
        default_missing_value("true"),
        default_value("false"),
        num_args(0..=1),
        require_equals(true),
        action = ArgAction::Set,
    )]
    pub no_bounds: bool,

    #[arg(
        long = "alpha",
        help = "Significance level of the confidence bounds",
        value_name = "VALUE",
        default_value_t = CONFIDENCE_ALPHA
    )]
    pub alpha: f64,

    #[arg(
        long = "fl-mean",
        help = "Mean fragment length",
        value_name = "VALUE",
        default_value_t = FL_MEAN
    )]
    pub fl_mean: f64,

    #[arg(
        long = "fl-sd",
        help = "Standard deviation of the fragment length",
        value_name = "VALUE",
        default_value_t = FL_SD
    )]
    pub fl_sd: f64,

    #[arg(
        long = "read-len",
        help = "Read length used to estimate library size from coverage",
        value_name = "VALUE",
        default_value_t = READ_LEN
    )]
    pub read_len: usize,

    #[arg(
        long = "total-mapped-reads",
        required = false,
        value_name = "VALUE",
        help = "Number of mapped RNA-seq reads, estimated from coverage when absent"
    )]
    pub total_mapped_reads: Option<f64>,

    #[arg(
        long = "max-candidates",
        help = "Maximum number of candidate transcripts per locus",
        value_name = "VALUE",
        default_value_t = MAX_CANDIDATE_TRANSCRIPTS
    )]
    pub max_candidates: usize,
}

impl RunArgs {
    pub fn to_config(&self) -> Result<Config, CliError> {
        if self.fl_mean <= 0.0 || self.fl_sd <= 0.0 {
            return Err(CliError::InvalidInput(format!(
                "ERROR: fragment length mean and sd must be positive, got {} and {}",
                self.fl_mean, self.fl_sd
            )));
        }
        if self.alpha <= 0.0 || self.alpha >= 1.0 {
            return Err(CliError::InvalidInput(format!(
                "ERROR: alpha must lie in (0, 1), got {}",
                self.alpha
            )));
        }
        if self.max_candidates == 0 || self.read_len == 0 {
            return Err(CliError::InvalidInput(
                "ERROR: --max-candidates and --read-len must be positive".to_string(),
            ));
        }

        let mut config = self.common.to_config();
        config.use_reference_tss = self.use_reference_tss;
        config.use_reference_tes = self.use_reference_tes;
        config.use_reference_promoters = self.use_reference_promoters;
        config.use_reference_polya = self.use_reference_polya;
        config.estimate_confidence_bounds = !self.no_bounds;

        config.peaks.total_mapped_reads = self.total_mapped_reads;
        config.graph.max_candidate_transcripts = self.max_candidates;
        config.estimator.alpha = self.alpha;
        config.estimator.fl_mean = self.fl_mean;
        config.estimator.fl_sd = self.fl_sd;
        config.estimator.read_len = self.read_len;

        Ok(config)
    }
}

impl ArgCheck for RunArgs {
    fn get_signal(&self) -> Vec<&PathBuf> {
        let mut signal = self.common.get_signal();
        signal.extend(
            [
                &self.cage_plus,
                &self.cage_minus,
                &self.polya_plus,
                &self.polya_minus,
            ]
            .into_iter()
            .flatten(),
        );
        signal
    }

    fn get_tracks(&self) -> Vec<&PathBuf> {
        let mut tracks = self.common.get_tracks();
        tracks.extend(self.reads.iter());
        tracks
    }

    fn get_reference(&self) -> Option<&PathBuf> {
        self.common.reference.as_ref()
    }

    fn reference_requested(&self) -> bool {
        self.common.reference_requested()
            || self.use_reference_tss
            || self.use_reference_tes
            || self.use_reference_promoters
            || self.use_reference_polya
    }
}
