//! Command-line driver: evidence tables in, evolutionary tree as JSON out

use clap::{Parser, ValueEnum};
use clonetree_rs::{
    events::LogSink,
    input::{read_binary_calls, read_driver_genes, read_read_counts},
    output::write_inference,
    solver::Solver,
    utils::{check_report_path, default_threads},
    validate_config, ErrorModel, InferenceConfig, TreeError, TreeResult, DEFAULT_TIME_LIMIT_SECS,
};
use env_logger::Env;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Maximum compatible tree over the observed patterns
    Simple,
    /// Maximum-likelihood tree with putative false calls corrected
    MaxLh,
}

impl From<Mode> for Solver {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Simple => Solver::Simple,
            Mode::MaxLh => Solver::MaxLikelihood,
        }
    }
}

#[derive(Parser)]
#[command(name = "clonetree")]
#[command(about = "clonetree - Clonal evolution tree inference from multi-sample variant data")]
#[command(long_about = "
clonetree reconstructs the evolutionary history of a tumor from variants observed
across several samples of the same patient.

Input is either a pair of tab-separated tables with mutant read counts and coverage,
or a single table with binary presence calls. Each table starts with the columns
Chromosome, Position, Change (REF>ALT) and optionally Gene, followed by one column
per sample. Tables may be gzip-compressed.

Two modes are available:
- simple: the largest set of compatible mutation patterns forms the tree, variants
  of conflicting patterns are ignored
- max-lh: variants may be moved to one of their most likely alternative patterns,
  correcting putative false-positive and false-negative calls

The tree is written as JSON (gzip-compressed if the output ends in .gz).
")]
struct Args {
    /// Table with the number of mutant reads per variant and sample
    #[arg(long, value_name = "FILE", requires = "coverage", conflicts_with = "calls")]
    mut_reads: Option<PathBuf>,

    /// Table with the coverage per variant and sample
    #[arg(long, value_name = "FILE", requires = "mut_reads")]
    coverage: Option<PathBuf>,

    /// Table with binary presence calls per variant and sample
    #[arg(long, value_name = "FILE", required_unless_present = "mut_reads")]
    calls: Option<PathBuf>,

    /// Known driver genes, one per line
    #[arg(long, value_name = "FILE")]
    drivers: Option<PathBuf>,

    /// Path to the output JSON file
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Conflict resolution mode
    #[arg(long, value_enum, default_value_t = Mode::MaxLh)]
    mode: Mode,

    /// Time limit per solve in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = DEFAULT_TIME_LIMIT_SECS)]
    time_limit: u64,

    /// Number of most likely patterns explored per variant
    #[arg(long)]
    max_no_mps: Option<usize>,

    /// Probability that a mutation was lost again along a lineage
    #[arg(long, default_value = "0.0")]
    loh_frequency: f64,

    /// Allow samples to be split into two subclones
    #[arg(long)]
    subclone_detection: bool,

    /// Number of best solutions used to estimate edge support
    #[arg(long, default_value = "0")]
    pool_size: usize,

    /// Number of bootstrap replicates used to estimate edge support
    #[arg(long, default_value = "0")]
    bootstrap: usize,

    /// Sequencing error rate
    #[arg(long, default_value = "0.005")]
    seq_error_rate: f64,

    /// Prior probability that a variant is absent in a sample
    #[arg(long, default_value = "0.5")]
    absent_prior: f64,

    /// Coverage below which an absent call is considered ambiguous
    #[arg(long, default_value = "10")]
    min_absent_coverage: u32,

    /// Log-likelihood cost of splitting a sample into subclones
    #[arg(long, default_value = "3.0")]
    split_penalty: f64,

    /// Number of threads for bootstrap replicates
    #[arg(long, default_value_t = default_threads())]
    threads: usize,

    /// Random seed for bootstrap resampling
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output file if it exists
    #[arg(short, long)]
    force: bool,
}

fn run() -> TreeResult<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting clonetree");
    log::info!("Output: {:?}", args.output);
    log::info!("Mode: {:?}", args.mode);

    check_report_path(&args.output, args.force)?;

    let config = InferenceConfig {
        time_limit: Duration::from_secs(args.time_limit),
        max_no_mps: args.max_no_mps,
        loh_frequency: args.loh_frequency,
        subclone_detection: args.subclone_detection,
        pool_size: args.pool_size,
        no_bootstrap_samples: args.bootstrap,
        error_model: ErrorModel {
            seq_error_rate: args.seq_error_rate,
            absent_prior: args.absent_prior,
            min_absent_coverage: args.min_absent_coverage,
            ..ErrorModel::default()
        },
        subclone_split_penalty: args.split_penalty,
        threads: args.threads,
        seed: args.seed,
        ..InferenceConfig::default()
    };
    validate_config(&config)?;
    log::info!(
        "Configuration: max_no_mps={:?}, loh_frequency={}, subclones={}, pool={}, bootstrap={}",
        config.max_no_mps,
        config.loh_frequency,
        config.subclone_detection,
        config.pool_size,
        config.no_bootstrap_samples
    );

    let start = Instant::now();
    let dataset = match (&args.mut_reads, &args.coverage, &args.calls) {
        (Some(mut_reads), Some(coverage), _) => read_read_counts(mut_reads, coverage)?,
        (_, _, Some(calls)) => read_binary_calls(calls)?,
        _ => {
            return Err(TreeError::InvalidInput(
                "either --mut-reads with --coverage or --calls is required".to_string(),
            ))
        }
    };
    let dataset = match &args.drivers {
        Some(path) => dataset.with_drivers(read_driver_genes(path)?),
        None => dataset,
    };
    log::info!(
        "Read {} variants in {} samples in {:.2?}: {}",
        dataset.no_variants(),
        dataset.no_samples(),
        start.elapsed(),
        dataset.samples().join(", ")
    );

    let start = Instant::now();
    let solver = Solver::from(args.mode);
    let inference = solver.infer(&dataset, &config, &LogSink)?;
    log::info!("Inferred {} tree in {:.2?}", solver, start.elapsed());

    write_inference(&inference, &dataset, &args.output)?;

    log::info!("Analysis completed successfully");
    log::info!("Tree written to: {:?}", args.output);

    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: TreeError) -> ! {
    match error {
        TreeError::FileNotFound(path) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
        }
        TreeError::InvalidInput(msg) => {
            eprintln!("Error: Invalid input data: {}", msg);
            eprintln!(
                "Please check that your tables start with Chromosome, Position and Change columns."
            );
        }
        TreeError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
            eprintln!("Please check your model parameters.");
        }
        TreeError::Infeasible(msg) | TreeError::NoSolution(msg) => {
            eprintln!("Error: No evolutionary tree has been created: {}", msg);
            eprintln!("Consider a longer --time-limit or a larger --max-no-mps.");
        }
        TreeError::InvalidTree(msg) => {
            eprintln!("Error: Inconsistent tree: {}", msg);
            eprintln!("This is unexpected. Please report this issue.");
        }
        TreeError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        TreeError::Csv(ref e) => {
            eprintln!("Error: Table parsing error: {}", e);
            eprintln!(
                "Please check that your tables are tab-separated with one column per sample."
            );
        }
        TreeError::Json(ref e) => {
            eprintln!("Error: JSON serialization error: {}", e);
        }
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}
