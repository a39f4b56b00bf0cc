//! Candidate evaluation through the external toolchain.
//!
//! Evaluation runs three user-supplied shell commands per candidate:
//! generate, build, and run. The code generator's flags travel on the
//! generate command line (and in an environment variable for wrapper
//! scripts); the backend compiler flags travel in environment variables the
//! build command is expected to splice in. The run command is invoked a
//! fixed number of times and the candidate's execution time is the mean
//! over all of them.

use std::process::Command;
use std::time::Instant;

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::candidate::{Candidate, Status};
use crate::config::{SearchConfiguration, TimingMode};
use crate::error::FatalError;
use crate::flags::{render_args, FlagGroup};

/// Environment variable carrying the rendered code-generator flags.
pub const GENERATOR_FLAGS_ENV: &str = "GPUTUNE_GENERATOR_FLAGS";
/// Environment variable carrying the rendered host C compiler flags.
pub const CC_FLAGS_ENV: &str = "GPUTUNE_CC_FLAGS";
/// Environment variable carrying the rendered host C++ compiler flags.
pub const CXX_FLAGS_ENV: &str = "GPUTUNE_CXX_FLAGS";
/// Environment variable carrying the rendered CUDA compiler flags.
pub const NVCC_FLAGS_ENV: &str = "GPUTUNE_NVCC_FLAGS";

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d*\.\d+|\d+)$").expect("timing regex"));

/// Wall-clock seconds spent in each toolchain stage, accumulated over the
/// whole search.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimingLedger {
    /// Seconds spent in the code generator.
    pub generate: f64,
    /// Seconds spent in the backend build.
    pub build: f64,
    /// Seconds spent running candidate binaries.
    pub run: f64,
}

impl TimingLedger {
    /// Total seconds across all stages.
    pub fn total(&self) -> f64 {
        self.generate + self.build + self.run
    }
}

/// Anything that can measure a candidate.
///
/// The search strategies only see this trait; tests drive them with
/// scripted implementations instead of a real toolchain.
pub trait Evaluate {
    /// Evaluates `candidate` in place: sets status, execution time and
    /// fitness, and records generator arguments and reported kernel sizes.
    fn evaluate(
        &mut self,
        cfg: &SearchConfiguration,
        candidate: &mut Candidate,
    ) -> Result<(), FatalError>;
}

/// The real evaluator: shells out to the configured commands.
#[derive(Debug, Default)]
pub struct ToolchainEvaluator {
    /// Per-stage time accounting.
    pub ledger: TimingLedger,
}

impl ToolchainEvaluator {
    /// A fresh evaluator with an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn shell(cmd: &str, env: &[(&str, &str)]) -> Result<std::process::Output, FatalError> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(cmd);
        for (key, value) in env {
            command.env(key, value);
        }
        Ok(command.output()?)
    }

    fn generate(
        &mut self,
        cfg: &SearchConfiguration,
        candidate: &mut Candidate,
    ) -> Result<(), FatalError> {
        let rendered = render_args(&cfg.flags.codegen, &candidate.genes.codegen);
        let mut args = format!("--target={}", cfg.target);
        if cfg.tune_kernel_sizes {
            args.push_str(" --dump-sizes");
        }
        if !rendered.is_empty() {
            args.push(' ');
            args.push_str(&rendered);
        }
        candidate.generator_args = Some(args.clone());

        let cmd = format!("{} {}", cfg.generate_cmd, args);
        debug!("generate: {}", cmd);
        let start = Instant::now();
        let output = Self::shell(&cmd, &[(GENERATOR_FLAGS_ENV, args.as_str())])?;
        self.ledger.generate += start.elapsed().as_secs_f64();

        if !output.status.success() {
            return Err(FatalError::Generate { cmd });
        }
        if cfg.tune_kernel_sizes {
            let stderr = String::from_utf8_lossy(&output.stderr);
            candidate.kernel_sizes = crate::flags::parse_dump_sizes(&stderr)?;
        }
        Ok(())
    }

    fn build(
        &mut self,
        cfg: &SearchConfiguration,
        candidate: &Candidate,
    ) -> Result<(), FatalError> {
        let cc = render_args(cfg.flags.group(FlagGroup::Cc), candidate.genes.group(FlagGroup::Cc));
        let cxx =
            render_args(cfg.flags.group(FlagGroup::Cxx), candidate.genes.group(FlagGroup::Cxx));
        let nvcc =
            render_args(cfg.flags.group(FlagGroup::Nvcc), candidate.genes.group(FlagGroup::Nvcc));

        debug!("build: {}", cfg.build_cmd);
        let start = Instant::now();
        let output = Self::shell(
            &cfg.build_cmd,
            &[
                (CC_FLAGS_ENV, cc.as_str()),
                (CXX_FLAGS_ENV, cxx.as_str()),
                (NVCC_FLAGS_ENV, nvcc.as_str()),
            ],
        )?;
        self.ledger.build += start.elapsed().as_secs_f64();

        if !output.status.success() {
            return Err(FatalError::Build { cmd: cfg.build_cmd.clone() });
        }
        Ok(())
    }

    /// One timed run. `Ok(Some(secs))` on success, `Ok(None)` when the run
    /// exited non-zero (a candidate-level failure, not a toolchain one).
    fn run_once(&mut self, cfg: &SearchConfiguration) -> Result<Option<f64>, FatalError> {
        let start = Instant::now();
        let output = Self::shell(&cfg.run_cmd, &[])?;
        let wall = start.elapsed().as_secs_f64();
        self.ledger.run += wall;

        if !output.status.success() {
            return Ok(None);
        }
        match cfg.timing {
            TimingMode::WallClock => Ok(Some(wall)),
            TimingMode::FromBinary => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                for line in stdout.lines() {
                    let line = line.trim();
                    if TIME_RE.is_match(line) {
                        if let Ok(secs) = line.parse::<f64>() {
                            return Ok(Some(secs));
                        }
                    }
                }
                Err(FatalError::TimingProtocol { found: stdout.trim().to_string() })
            }
        }
    }
}

impl Evaluate for ToolchainEvaluator {
    fn evaluate(
        &mut self,
        cfg: &SearchConfiguration,
        candidate: &mut Candidate,
    ) -> Result<(), FatalError> {
        self.generate(cfg, candidate)?;
        self.build(cfg, candidate)?;

        let mut total = 0.0;
        let mut failed = false;
        for run in 0..cfg.runs {
            match self.run_once(cfg)? {
                Some(secs) => total += secs,
                None => {
                    warn!(
                        "candidate {}: run {}/{} exited non-zero",
                        candidate.id,
                        run + 1,
                        cfg.runs
                    );
                    failed = true;
                }
            }
        }

        // The mean is taken over the configured run count even when some
        // runs failed, so failed candidates still carry a comparable time.
        candidate.execution_time = total / cfg.runs as f64;
        if failed {
            candidate.status = Status::Failed;
            candidate.fitness = 0.0;
        } else {
            candidate.status = Status::Passed;
            candidate.fitness = 1.0 / candidate.execution_time;
        }
        info!(
            "candidate {}: {:?}, {:.6}s mean over {} runs",
            candidate.id, candidate.status, candidate.execution_time, cfg.runs
        );
        Ok(())
    }
}
