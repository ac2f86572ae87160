//! isoinfer: transcript model inference from RNA-seq, 5' and 3' tag data
//! Alejandro Gonzales-Irribarren, 2025
//!
//! This is the entry point for the isoinfer CLI. It parses the
//! arguments, sets up logging and the thread pool, and runs one of two
//! subcommands:
//!
//! - run: segments the genome into gene loci and infers elements,
//!   transcripts and their frequencies
//! - segment: only segments the genome and writes the loci
//!
//! To get help on the subcommands, you can run:
//!
//! ```shell
//! isoinfer run --help
//! ```

use clap::Parser;
use log::{error, info, Level};
use simple_logger::init_with_level;

use isoinfer::{
    cli::{Args, SubArgs},
    run, segment,
};

fn main() {
    let start = std::time::Instant::now();
    let args: Args = Args::parse();

    let level = if args.command.verbose() {
        Level::Debug
    } else {
        Level::Info
    };
    init_with_level(level).unwrap_or_else(|e| {
        eprintln!("ERROR: Cannot initialize logger: {}", e);
    });

    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(args.command.threads().max(config::MIN_THREADS))
        .build_global()
    {
        error!("Cannot configure thread pool: {}", e);
    }

    match args.command {
        SubArgs::Run { args } => {
            let summary = run(args).unwrap_or_else(|e| {
                error!("{:#}", e);
                std::process::exit(1);
            });

            info!(
                "Done: {} loci written, {} failed",
                summary.written, summary.failed
            );
        }
        SubArgs::Segment { args } => {
            let n = segment(args).unwrap_or_else(|e| {
                error!("{:#}", e);
                std::process::exit(1);
            });

            info!("Done: {} loci written", n);
        }
    }

    let elapsed = start.elapsed();
    info!("Elapsed time: {:.3?}", elapsed);
}
