//! Candidates: one point in the configuration space plus its measurement.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

use crate::error::NoFittest;
use crate::flags::{FlagGroup, FlagSpace, GeneValue, SizesValue};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Evaluation status of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not evaluated yet.
    Unevaluated,
    /// Generated, built, and every timed run exited cleanly.
    Passed,
    /// At least one timed run failed.
    Failed,
}

/// A candidate's gene vectors, one per flag group, each parallel to the
/// corresponding list in the active [`FlagSpace`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneMap {
    /// Genes for the code-generator flags.
    pub codegen: Vec<GeneValue>,
    /// Genes for the host C compiler flags.
    pub cc: Vec<GeneValue>,
    /// Genes for the host C++ compiler flags.
    pub cxx: Vec<GeneValue>,
    /// Genes for the CUDA compiler flags.
    pub nvcc: Vec<GeneValue>,
}

impl GeneMap {
    /// The gene vector of one group.
    pub fn group(&self, group: FlagGroup) -> &[GeneValue] {
        match group {
            FlagGroup::Codegen => &self.codegen,
            FlagGroup::Cc => &self.cc,
            FlagGroup::Cxx => &self.cxx,
            FlagGroup::Nvcc => &self.nvcc,
        }
    }

    /// Mutable gene vector of one group.
    pub fn group_mut(&mut self, group: FlagGroup) -> &mut Vec<GeneValue> {
        match group {
            FlagGroup::Codegen => &mut self.codegen,
            FlagGroup::Cc => &mut self.cc,
            FlagGroup::Cxx => &mut self.cxx,
            FlagGroup::Nvcc => &mut self.nvcc,
        }
    }

    /// The gene at flat position `idx`, counting across groups in genome
    /// order.
    pub fn flat_get(&self, idx: usize) -> Option<&GeneValue> {
        self.codegen
            .iter()
            .chain(&self.cc)
            .chain(&self.cxx)
            .chain(&self.nvcc)
            .nth(idx)
    }

    /// Mutable access to the gene at flat position `idx`.
    pub fn flat_get_mut(&mut self, idx: usize) -> Option<&mut GeneValue> {
        self.codegen
            .iter_mut()
            .chain(&mut self.cc)
            .chain(&mut self.cxx)
            .chain(&mut self.nvcc)
            .nth(idx)
    }

    /// Total gene count across all groups.
    pub fn len(&self) -> usize {
        self.codegen.len() + self.cc.len() + self.cxx.len() + self.nvcc.len()
    }

    /// Whether the genome is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One individual: a full flag assignment plus the outcome of measuring it.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Unique identifier, never reused within a process.
    pub id: u64,
    /// The flag assignment.
    pub genes: GeneMap,
    /// Evaluation outcome.
    pub status: Status,
    /// `1 / execution_time` when passed, `0` otherwise.
    pub fitness: f64,
    /// Mean execution time over all timed runs, in seconds.
    pub execution_time: f64,
    /// The rendered generator argument string, recorded at evaluation time.
    pub generator_args: Option<String>,
    /// The sizes the generator reported it actually realized.
    pub kernel_sizes: BTreeMap<String, SizesValue>,
}

impl Candidate {
    /// A candidate with the given genes and no measurement yet.
    pub fn new(genes: GeneMap) -> Self {
        Self {
            id: next_id(),
            genes,
            status: Status::Unevaluated,
            fitness: 0.0,
            execution_time: 0.0,
            generator_args: None,
            kernel_sizes: BTreeMap::new(),
        }
    }

    /// A candidate sampled uniformly from the flag space.
    pub fn random(space: &FlagSpace, rng: &mut impl Rng) -> Self {
        let mut genes = GeneMap::default();
        for group in FlagGroup::ALL {
            *genes.group_mut(group) =
                space.group(group).iter().map(|f| f.random_value(rng)).collect();
        }
        Self::new(genes)
    }

    /// A fresh, unevaluated candidate with the same genes. Survivors carried
    /// into a new generation go through this so the new generation's
    /// measurements never alias the old one's.
    pub fn reborn(&self) -> Self {
        Self::new(self.genes.clone())
    }

    /// Whether the candidate completed every timed run successfully.
    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }
}

/// The fittest candidate of a population. Ties go to the earliest
/// candidate in population order.
pub fn fittest(population: &[Candidate]) -> Result<&Candidate, NoFittest> {
    let mut best: Option<&Candidate> = None;
    for cand in population.iter().filter(|c| c.passed()) {
        match best {
            Some(b) if cand.fitness <= b.fitness => {}
            _ => best = Some(cand),
        }
    }
    best.ok_or(NoFittest)
}
