//! Error types for the autotuner.
//!
//! Two families, deliberately kept apart: fatal toolchain errors that abort
//! the whole search, and expected-but-rare conditions that the strategies
//! absorb locally.

use thiserror::Error;

/// Unrecoverable errors raised by the external toolchain.
///
/// Any of these terminates the search before the next evaluation: a broken
/// code generator or build command cannot produce anything worth timing, and
/// a broken timing protocol invalidates every future measurement, not just
/// the current candidate's.
#[derive(Error, Debug)]
pub enum FatalError {
    /// The code generator exited with a non-zero status.
    #[error("code generation failed: '{cmd}'")]
    Generate {
        /// The command that failed.
        cmd: String,
    },

    /// The backend build command exited with a non-zero status.
    #[error("backend build failed: '{cmd}'")]
    Build {
        /// The command that failed.
        cmd: String,
    },

    /// Kernel size parsing was requested but the generator's diagnostic
    /// output contained no size information at all.
    #[error("no kernel size information found in the code generator's output")]
    DumpSizes,

    /// The binary was expected to report its execution time on stdout and
    /// did not.
    #[error("expected the binary to report its execution time, found '{found}'")]
    TimingProtocol {
        /// What stdout actually contained (trimmed).
        found: String,
    },

    /// Failed to launch an external command at all.
    #[error("failed to launch external command: {0}")]
    Io(#[from] std::io::Error),
}

/// Every candidate in a population failed, so there is no fittest
/// individual to select, clone, or report.
///
/// This is a recoverable condition: strategies skip elitism and summaries
/// print a placeholder instead of crashing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no individual in this population completed successfully")]
pub struct NoFittest;
