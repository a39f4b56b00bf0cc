//! gputune Command Line Interface
//!
//! Usage:
//!   gputune <STRATEGY> [OPTIONS] --generate <CMD> --build <CMD> --run <CMD>
//!   gputune --help
//!
//! Examples:
//!   gputune ga --generate "ppcg kernel.c" --build "make bench" --run ./bench
//!   gputune random --population 50 ...
//!   gputune annealing --cooling-steps 5 --target cuda ...

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, error, info};

use gputune::prelude::*;
use gputune::report::print_timing;

/// gputune - Autotuning search engine for GPU code generators
#[derive(Parser, Debug)]
#[command(name = "gputune")]
#[command(version)]
#[command(about = "Tunes GPU code-generator compiler flags", long_about = None)]
struct Cli {
    #[command(subcommand)]
    strategy: StrategyArg,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum StrategyArg {
    /// Genetic algorithm with adaptive per-kernel size tuning
    Ga(GaArgs),
    /// Uniform random sampling
    Random(RandomArgs),
    /// Simulated annealing
    Annealing(AnnealingArgs),
}

/// Options shared by every strategy.
#[derive(Args, Debug)]
struct CommonArgs {
    /// Code generator command; flags are appended to it
    #[arg(long, value_name = "CMD")]
    generate: String,

    /// Backend build command; flags arrive in GPUTUNE_*_FLAGS variables
    #[arg(long, value_name = "CMD")]
    build: String,

    /// Run command for the built binary
    #[arg(long, value_name = "CMD")]
    run: String,

    /// Code generation target
    #[arg(long, default_value = "opencl")]
    target: TargetArg,

    /// Timed runs per candidate
    #[arg(long, default_value = "5")]
    runs: u32,

    /// The binary prints its execution time on stdout instead of being
    /// wall-clocked
    #[arg(long)]
    time_from_binary: bool,

    /// Also tune the host C/C++ compiler flag sets
    #[arg(long)]
    tune_host_flags: bool,

    /// Inclusive tile size range, e.g. 1-64
    #[arg(long, value_name = "LOW-HIGH", default_value = "1-64", value_parser = parse_range)]
    tile_range: (i64, i64),

    /// Inclusive block size range, e.g. 1-1024
    #[arg(long, value_name = "LOW-HIGH", default_value = "1-1024", value_parser = parse_range)]
    block_range: (i64, i64),

    /// Inclusive grid size range, e.g. 1-32768
    #[arg(long, value_name = "LOW-HIGH", default_value = "1-32768", value_parser = parse_range)]
    grid_range: (i64, i64),

    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Write the machine-readable outcome as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GaArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Individuals per generation
    #[arg(long, default_value = "10")]
    population: usize,

    /// Number of generations, including the initial random one
    #[arg(long, default_value = "10")]
    generations: usize,

    /// Probability that a child is mutated
    #[arg(long, default_value = "0.015")]
    mutation_rate: f64,

    /// Probability that selected parents are crossed
    #[arg(long, default_value = "0.8")]
    crossover_rate: f64,

    /// Crossover operator
    #[arg(long, default_value = "two-point")]
    crossover: CrossoverArg,

    /// Do not clone the fittest individual into the next generation
    #[arg(long)]
    no_elitism: bool,

    /// Seed each generation with one fresh random individual
    #[arg(long)]
    inject_random: bool,

    /// Never switch to per-kernel size tuning
    #[arg(long)]
    no_size_tuning: bool,
}

#[derive(Args, Debug)]
struct RandomArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Samples per pass
    #[arg(long, default_value = "10")]
    population: usize,

    /// Number of sampling passes; one pass over the population by default
    #[arg(long, default_value = "1")]
    generations: usize,
}

#[derive(Args, Debug)]
struct AnnealingArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Starting temperature
    #[arg(long, default_value = "1.0")]
    initial_temperature: f64,

    /// Temperature multiplier per cooling step
    #[arg(long, default_value = "0.8")]
    cooling: f64,

    /// Number of cooling steps
    #[arg(long, default_value = "10")]
    cooling_steps: usize,

    /// Iterations per temperature level
    #[arg(long, default_value = "100")]
    temperature_steps: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetArg {
    /// CUDA kernels (also tunes the CUDA compiler's flags)
    Cuda,
    /// OpenCL kernels
    Opencl,
}

impl TargetArg {
    fn name(self) -> &'static str {
        match self {
            TargetArg::Cuda => "cuda",
            TargetArg::Opencl => "opencl",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CrossoverArg {
    /// Single cut point
    OnePoint,
    /// Two cut points
    TwoPoint,
}

impl From<CrossoverArg> for CrossoverKind {
    fn from(arg: CrossoverArg) -> Self {
        match arg {
            CrossoverArg::OnePoint => CrossoverKind::OnePoint,
            CrossoverArg::TwoPoint => CrossoverKind::TwoPoint,
        }
    }
}

/// Parses an inclusive "low-high" integer range.
fn parse_range(s: &str) -> Result<(i64, i64), String> {
    let (low, high) = s
        .split_once('-')
        .ok_or_else(|| format!("expected LOW-HIGH, got '{}'", s))?;
    let low: i64 = low.trim().parse().map_err(|_| format!("bad lower bound '{}'", low))?;
    let high: i64 = high.trim().parse().map_err(|_| format!("bad upper bound '{}'", high))?;
    if low < 1 || high < low {
        return Err(format!("range {}-{} is empty or starts below 1", low, high));
    }
    Ok((low, high))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("gputune v{}", gputune::VERSION);

    match drive(cli.strategy) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn drive(strategy: StrategyArg) -> Result<()> {
    let (mut strategy, report_path): (Box<dyn SearchStrategy>, Option<PathBuf>) = match strategy {
        StrategyArg::Ga(args) => {
            let mut cfg = resolve_common(&args.common);
            cfg.population = args.population;
            cfg.generations = args.generations;
            cfg.mutation_rate = args.mutation_rate;
            cfg.crossover_rate = args.crossover_rate;
            cfg.crossover = args.crossover.into();
            cfg.elitism = !args.no_elitism;
            cfg.inject_random = args.inject_random;
            cfg.tune_kernel_sizes = !args.no_size_tuning;
            (Box::new(GeneticSearch::new(cfg)), args.common.report)
        }
        StrategyArg::Random(args) => {
            let mut cfg = resolve_common(&args.common);
            cfg.population = args.population;
            cfg.generations = args.generations;
            // Random sampling has no size flags to specialize mid-run.
            cfg.tune_kernel_sizes = false;
            (Box::new(RandomSearch::new(cfg)), args.common.report)
        }
        StrategyArg::Annealing(args) => {
            let mut cfg = resolve_common(&args.common);
            cfg.initial_temperature = args.initial_temperature;
            cfg.cooling = args.cooling;
            cfg.cooling_steps = args.cooling_steps;
            cfg.temperature_steps = args.temperature_steps;
            cfg.tune_kernel_sizes = false;
            (Box::new(SimulatedAnnealing::new(cfg)), args.common.report)
        }
    };

    let stop = StopFlag::new();
    let handler_flag = stop.clone();
    // Ctrl-C raises the flag; the evaluation in flight finishes and the
    // strategy winds down with whatever it has measured.
    ctrlc::set_handler(move || handler_flag.raise())
        .context("installing the interrupt handler")?;

    let mut evaluator = ToolchainEvaluator::new();
    info!("starting {} search", strategy.name());
    let outcome = strategy.run(&mut evaluator, &stop);

    // Timing and whatever summaries exist are printed even after a fatal
    // toolchain error.
    let report = strategy.report();
    report.print_summary();
    print_timing(&evaluator.ledger);
    if let Some(path) = &report_path {
        report.write_json(path)?;
        info!("report written to {}", path.display());
    }

    outcome?;
    Ok(())
}

fn resolve_common(args: &CommonArgs) -> SearchConfiguration {
    // CLI ranges are inclusive; the flag domains are half-open.
    let tile = (args.tile_range.0, args.tile_range.1 + 1);
    let block = (args.block_range.0, args.block_range.1 + 1);
    let grid = (args.grid_range.0, args.grid_range.1 + 1);

    let mut flags = FlagSpace {
        codegen: registry::codegen_flags(registry::SHARED_MEMORY_SIZES, tile),
        ..Default::default()
    };
    if matches!(args.target, TargetArg::Cuda) {
        flags.nvcc = registry::nvcc_flags();
    }
    if args.tune_host_flags {
        flags.cc = registry::host_compiler_flags();
        flags.cxx = registry::host_compiler_flags();
    }
    debug!("{} active flags", flags.len());

    let mut cfg = SearchConfiguration::new(flags)
        .commands(&args.generate, &args.build, &args.run)
        .runs(args.runs)
        .seed(args.seed);
    cfg.target = args.target.name().to_string();
    cfg.timing =
        if args.time_from_binary { TimingMode::FromBinary } else { TimingMode::WallClock };
    cfg.size_ranges = SizeRanges { tile, block, grid };
    cfg
}
