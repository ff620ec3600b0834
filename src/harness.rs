//! Command-line entry point for benchmark binaries.
//!
//! A benchmark binary builds a [`Registry`] and hands it to [`bench_main`],
//! which also serves as the forked worker when re-executed by the supervisor.

use crate::config::RunOptions;
use crate::fork;
use crate::registry::Registry;
use crate::report::{ConsoleReporter, JsonReporter, Reporter};
use crate::runner::Runner;
use crate::unit::{Mode, TimeUnit};
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Progress and result table on stderr
    Human,
    /// Run summary as JSON on stdout
    Json,
}

#[derive(Debug, Parser)]
#[command(
    about = "Run registered microbenchmarks",
    long_about = "
Runs every registered benchmark through warmup and measurement iterations,
each fork in a fresh process, and prints a result table.

Example:
    deadcode                          # Run everything with defaults
    deadcode measure                  # Only units whose name contains 'measure'
    deadcode -f 2 --wi 3 -i 10        # 2 forks, 3 warmup, 10 measurement iterations
    deadcode --bm thrpt --tu s        # Report throughput in ops/s
    deadcode --list                   # List registered benchmarks
"
)]
pub struct BenchArgs {
    // ========================================================================
    // Selection
    // ========================================================================
    /// Only run benchmarks matching this substring or `*` glob
    pub include: Option<String>,

    /// List registered benchmarks without running them
    #[arg(long)]
    pub list: bool,

    // ========================================================================
    // Iterations
    // ========================================================================
    /// Forked processes per benchmark (0 runs in this process)
    #[arg(long, short = 'f')]
    pub forks: Option<usize>,

    /// Warmup iterations (discarded)
    #[arg(long = "wi")]
    pub warmup_iterations: Option<usize>,

    /// Measurement iterations
    #[arg(short = 'i', long = "iterations")]
    pub measurement_iterations: Option<usize>,

    /// Warmup iteration length in milliseconds
    #[arg(long)]
    pub warmup_ms: Option<u64>,

    /// Measurement iteration length in milliseconds
    #[arg(long)]
    pub measurement_ms: Option<u64>,

    /// Fixed invocations per iteration instead of a time target
    #[arg(long)]
    pub batch_size: Option<u64>,

    /// Worker threads per fork
    #[arg(long, short = 't')]
    pub threads: Option<usize>,

    /// Fail a benchmark that runs longer than this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    // ========================================================================
    // Reporting
    // ========================================================================
    /// Override each benchmark's mode
    #[arg(long = "bm", value_enum)]
    pub mode: Option<Mode>,

    /// Override each benchmark's time unit
    #[arg(long = "tu", value_enum)]
    pub time_unit: Option<TimeUnit>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,

    /// Output directory for JSON results
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Quiet mode (minimal output, only errors)
    #[arg(long, short = 'q', conflicts_with = "verbose")]
    pub quiet: bool,
}

impl BenchArgs {
    /// Apply command-line overrides on top of `base`.
    pub fn apply(&self, base: RunOptions) -> RunOptions {
        let mut opts = base;
        if let Some(f) = &self.include {
            opts.include = Some(f.clone());
        }
        if let Some(n) = self.forks {
            opts.forks = n;
        }
        if let Some(n) = self.warmup_iterations {
            opts.warmup_iterations = n;
        }
        if let Some(n) = self.measurement_iterations {
            opts.measurement_iterations = n;
        }
        if let Some(ms) = self.warmup_ms {
            opts.warmup_time = Duration::from_millis(ms);
        }
        if let Some(ms) = self.measurement_ms {
            opts.measurement_time = Duration::from_millis(ms);
        }
        if let Some(n) = self.batch_size {
            opts.batch_size = Some(n);
        }
        if let Some(n) = self.threads {
            opts.threads = n;
        }
        if let Some(secs) = self.timeout_secs {
            opts.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(m) = self.mode {
            opts.mode = Some(m);
        }
        if let Some(u) = self.time_unit {
            opts.time_unit = Some(u);
        }
        if let Some(dir) = &self.output_dir {
            opts.output_dir = dir.clone();
        }
        if self.verbose {
            opts.verbose = true;
        }
        if self.quiet {
            opts.verbose = false;
        }
        opts
    }
}

/// Entry point for a benchmark binary.
///
/// Parses the command line, runs the selected benchmarks and fails if any of
/// them failed. When started as a forked worker it serves the supervisor
/// instead and exits.
pub fn bench_main(registry: Registry) -> Result<()> {
    if fork::is_worker_process() {
        init_logging(false, true);
        std::process::exit(fork::worker::serve(&registry));
    }
    let args = BenchArgs::parse();
    init_logging(args.verbose, args.quiet);
    run_with_args(registry, &args)
}

/// Run with already-parsed arguments.
pub fn run_with_args(registry: Registry, args: &BenchArgs) -> Result<()> {
    if args.list {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let options = args.apply(RunOptions::from_env());
    let mut reporters: Vec<Box<dyn Reporter>> =
        vec![Box::new(JsonReporter::new(options.output_dir.clone()))];
    if options.verbose && args.format == OutputFormat::Human {
        reporters.insert(0, Box::new(ConsoleReporter::new()));
    }

    let mut runner = Runner::new(registry);
    runner.reporters(reporters);
    let summary = runner.run(&options).context("benchmark run aborted")?;

    match args.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&summary)
                .context("failed to serialize run summary")?;
            println!("{json}");
        }
        OutputFormat::Human if !options.verbose => {
            print!("{}", ConsoleReporter::render_table(&summary));
        }
        OutputFormat::Human => {}
    }

    let failed = summary.failures().len();
    if failed > 0 {
        bail!("{failed} of {} benchmark(s) failed", summary.outcomes.len());
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "cntryl_microbench=debug"
    } else if quiet {
        "cntryl_microbench=warn"
    } else {
        "cntryl_microbench=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout belongs to results and, in workers, to the frame protocol
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
