//! # gputune - Autotuning Search Engine for GPU Code Generators
//!
//! Searches the compiler-flag space of a GPU source-to-source code
//! generator for the configuration that makes a fixed input program run
//! fastest. Each candidate configuration is realized through an external
//! generate → build → run toolchain and its measured execution time drives
//! the search.
//!
//! ## Architecture
//!
//! ```text
//! FlagSpace → Strategy → Candidate → Evaluator → toolchain → fitness
//!                 ↑__________________________________________|
//! ```
//!
//! Three interchangeable strategies are provided: a genetic algorithm with
//! an adaptive per-kernel size expansion, uniform random sampling, and
//! simulated annealing.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gputune::prelude::*;
//!
//! let flags = FlagSpace {
//!     codegen: registry::codegen_flags(registry::SHARED_MEMORY_SIZES, (1, 65)),
//!     ..Default::default()
//! };
//! let cfg = SearchConfiguration::new(flags)
//!     .commands("ppcg kernel.c", "make bench", "./bench")
//!     .generations(10);
//!
//! let mut strategy = GeneticSearch::new(cfg);
//! let mut evaluator = ToolchainEvaluator::new();
//! strategy.run(&mut evaluator, &StopFlag::new())?;
//! strategy.report().print_summary();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod candidate;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod flags;
pub mod report;
pub mod search;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::candidate::{fittest, Candidate, GeneMap, Status};
    pub use crate::config::{CrossoverKind, SearchConfiguration, SizeRanges, TimingMode};
    pub use crate::error::{FatalError, NoFittest};
    pub use crate::evaluate::{Evaluate, TimingLedger, ToolchainEvaluator};
    pub use crate::flags::{
        registry, Flag, FlagDomain, FlagGroup, FlagSpace, FlagValue, GeneValue, SizesDomain,
        SizesValue,
    };
    pub use crate::report::SearchReport;
    pub use crate::search::{
        GeneticSearch, RandomSearch, SearchStrategy, SimulatedAnnealing, StopFlag,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
