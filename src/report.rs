//! Human- and machine-readable output of a finished (or interrupted) search.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;

use crate::candidate::Candidate;
use crate::evaluate::TimingLedger;
use crate::flags::SizesValue;

/// The best configuration a search (or one generation) found.
#[derive(Debug, Clone, Serialize)]
pub struct BestReport {
    /// Candidate identifier.
    pub id: u64,
    /// Mean execution time in seconds.
    pub execution_time: f64,
    /// Fitness at selection time.
    pub fitness: f64,
    /// The generator argument string that produced it.
    pub generator_args: Option<String>,
    /// The kernel sizes the generator reported for it.
    pub kernel_sizes: BTreeMap<String, SizesValue>,
}

impl BestReport {
    /// Snapshot of a candidate.
    pub fn from_candidate(cand: &Candidate) -> Self {
        Self {
            id: cand.id,
            execution_time: cand.execution_time,
            fitness: cand.fitness,
            generator_args: cand.generator_args.clone(),
            kernel_sizes: cand.kernel_sizes.clone(),
        }
    }
}

/// Outcome of one generation (or annealing level, or sampling pass).
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    /// Zero-based generation index.
    pub index: usize,
    /// Candidates evaluated in this generation.
    pub evaluated: usize,
    /// How many of them passed.
    pub passed: usize,
    /// The generation's best, if anything passed.
    pub best: Option<BestReport>,
}

/// Counts of the variation operators a genetic search applied.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OperatorCounters {
    /// Parent pairs actually crossed (not passed through).
    pub crossovers: u64,
    /// Children that went through mutation.
    pub mutations: u64,
}

/// The full outcome of a search run.
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    /// Strategy name.
    pub strategy: &'static str,
    /// Per-generation outcomes, in order.
    pub generations: Vec<GenerationReport>,
    /// The overall best configuration.
    pub best: Option<BestReport>,
    /// Operator counts, for strategies that breed.
    pub counters: Option<OperatorCounters>,
    /// Whether the search was cut short by an interrupt.
    pub interrupted: bool,
}

impl SearchReport {
    /// Prints the end-of-run summary to stdout.
    pub fn print_summary(&self) {
        println!("=== {} search summary ===", self.strategy);
        if self.interrupted {
            println!("search was interrupted; results cover the completed part only");
        }
        for gen in &self.generations {
            match &gen.best {
                Some(best) => println!(
                    "generation {}: {}/{} passed, best {:.6}s (candidate {})",
                    gen.index, gen.passed, gen.evaluated, best.execution_time, best.id
                ),
                None => println!(
                    "generation {}: {}/{} passed, no successful candidate",
                    gen.index, gen.passed, gen.evaluated
                ),
            }
        }
        if let Some(counters) = &self.counters {
            println!(
                "{} crossovers, {} mutations",
                counters.crossovers, counters.mutations
            );
        }
        match &self.best {
            Some(best) => {
                println!("best candidate: {} ({:.6}s)", best.id, best.execution_time);
                if let Some(args) = &best.generator_args {
                    println!("generator arguments: {}", args);
                }
                for (kernel, sizes) in &best.kernel_sizes {
                    println!("kernel {}: {:?}", kernel, sizes);
                }
            }
            None => println!("no candidate completed successfully"),
        }
    }

    /// Writes the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path)
            .with_context(|| format!("creating report file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("writing report to {}", path.display()))?;
        Ok(())
    }
}

/// Prints the per-stage time accounting to stdout.
pub fn print_timing(ledger: &TimingLedger) {
    println!("time spent generating code: {:.2}s", ledger.generate);
    println!("time spent building:        {:.2}s", ledger.build);
    println!("time spent running:         {:.2}s", ledger.run);
    println!("total toolchain time:       {:.2}s", ledger.total());
}
