//! Search configuration.
//!
//! Everything the search loop needs is resolved into one
//! [`SearchConfiguration`] before the loop starts; nothing re-reads
//! command-line or file input mid-run. The struct is immutable once built —
//! the single legitimate mid-run change, unlocking per-kernel size tuning,
//! returns a new configuration instead of mutating shared state.

use std::collections::BTreeMap;

use crate::flags::{registry, Flag, FlagSpace, SizeSpace, SizesDomain, SizesValue};

/// Which crossover operator the genetic algorithm applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossoverKind {
    /// Single cut point; child is mother before the cut, father after.
    OnePoint,
    /// Two cut points; child is mother, father, mother segments in order.
    TwoPoint,
}

/// How a candidate's execution time is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingMode {
    /// Wall clock around each run invocation.
    WallClock,
    /// The binary prints its own execution time on stdout.
    FromBinary,
}

/// Per-category size ranges used when specializing size flags, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRanges {
    /// Tile size range.
    pub tile: (i64, i64),
    /// Block size range.
    pub block: (i64, i64),
    /// Grid size range.
    pub grid: (i64, i64),
}

impl Default for SizeRanges {
    fn default() -> Self {
        Self { tile: (1, 65), block: (1, 1025), grid: (1, 32769) }
    }
}

/// The fully resolved parameters of one search run.
#[derive(Debug, Clone)]
pub struct SearchConfiguration {
    /// Active flags per group.
    pub flags: FlagSpace,
    /// Code generation target passed to the generator (`cuda` or `opencl`).
    pub target: String,
    /// How to invoke the code generator.
    pub generate_cmd: String,
    /// How to build the generated artifact.
    pub build_cmd: String,
    /// How to run the built binary.
    pub run_cmd: String,
    /// Number of timed runs per candidate.
    pub runs: u32,
    /// How execution time is measured.
    pub timing: TimingMode,
    /// Population size (and random-search sample count).
    pub population: usize,
    /// Total number of generations, including the initial random one.
    pub generations: usize,
    /// Probability that a freshly created child is mutated.
    pub mutation_rate: f64,
    /// Probability that selected parents are crossed rather than cloned.
    pub crossover_rate: f64,
    /// Crossover operator.
    pub crossover: CrossoverKind,
    /// Clone the fittest individual into each new generation.
    pub elitism: bool,
    /// Seed each new generation with one fresh random individual.
    pub inject_random: bool,
    /// Allow the one-time switch to per-kernel size tuning.
    pub tune_kernel_sizes: bool,
    /// Size ranges used when kernel size flags are created.
    pub size_ranges: SizeRanges,
    /// Simulated annealing: starting temperature.
    pub initial_temperature: f64,
    /// Simulated annealing: temperature multiplier per cooling step, < 1.
    pub cooling: f64,
    /// Simulated annealing: number of cooling steps.
    pub cooling_steps: usize,
    /// Simulated annealing: iterations per temperature level.
    pub temperature_steps: usize,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for SearchConfiguration {
    fn default() -> Self {
        Self {
            flags: FlagSpace::default(),
            target: "opencl".to_string(),
            generate_cmd: String::new(),
            build_cmd: String::new(),
            run_cmd: String::new(),
            runs: 5,
            timing: TimingMode::WallClock,
            population: 10,
            generations: 10,
            mutation_rate: 0.015,
            crossover_rate: 0.8,
            crossover: CrossoverKind::TwoPoint,
            elitism: true,
            inject_random: false,
            tune_kernel_sizes: true,
            size_ranges: SizeRanges::default(),
            initial_temperature: 1.0,
            cooling: 0.8,
            cooling_steps: 10,
            temperature_steps: 100,
            seed: 42,
        }
    }
}

impl SearchConfiguration {
    /// A default configuration over the given flag space.
    pub fn new(flags: FlagSpace) -> Self {
        Self { flags, ..Default::default() }
    }

    /// Set the toolchain commands.
    pub fn commands(mut self, generate: &str, build: &str, run: &str) -> Self {
        self.generate_cmd = generate.to_string();
        self.build_cmd = build.to_string();
        self.run_cmd = run.to_string();
        self
    }

    /// Set the number of timed runs per candidate.
    pub fn runs(mut self, runs: u32) -> Self {
        assert!(runs > 0, "at least one run per candidate");
        self.runs = runs;
        self
    }

    /// Set the timing mode.
    pub fn timing(mut self, timing: TimingMode) -> Self {
        self.timing = timing;
        self
    }

    /// Set population size.
    pub fn population(mut self, population: usize) -> Self {
        self.population = population;
        self
    }

    /// Set generation count.
    pub fn generations(mut self, generations: usize) -> Self {
        self.generations = generations;
        self
    }

    /// Set the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The per-kernel expansion: returns a new configuration in which the
    /// global tile-size flag is replaced by one size flag per kernel, each
    /// locked to the dimensionalities the generator actually realized.
    pub fn with_kernel_sizes(&self, seeds: &BTreeMap<String, SizesValue>) -> SearchConfiguration {
        let mut next = self.clone();
        next.flags.codegen.retain(|f| f.name != registry::TILE_SIZE);
        for (kernel, sizes) in seeds {
            let dims = |v: &Vec<i64>| v.len().max(1);
            let domain = SizesDomain {
                kernel: Some(kernel.clone()),
                tile: SizeSpace::fixed_dims(dims(&sizes.tile), self.size_ranges.tile),
                block: SizeSpace::fixed_dims(dims(&sizes.block), self.size_ranges.block),
                grid: SizeSpace::fixed_dims(dims(&sizes.grid), self.size_ranges.grid),
            };
            next.flags.codegen.push(Flag::sizes(registry::SIZES, domain));
        }
        next
    }
}
