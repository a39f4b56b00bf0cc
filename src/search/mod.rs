//! Search strategies over the flag space.
//!
//! Each strategy owns its population state and drives an [`Evaluate`]
//! implementation; the strategies never talk to the toolchain directly.
//! A shared stop flag is polled between evaluations so an interrupt
//! finishes the measurement in flight and then winds the search down.

pub mod annealing;
pub mod genetic;
pub mod random;

pub use annealing::SimulatedAnnealing;
pub use genetic::GeneticSearch;
pub use random::RandomSearch;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::candidate::Candidate;
use crate::error::FatalError;
use crate::evaluate::Evaluate;
use crate::report::SearchReport;

/// A search strategy: explores the flag space and remembers the best
/// configuration it measured.
pub trait SearchStrategy {
    /// Strategy name for logs and reports.
    fn name(&self) -> &'static str;

    /// Runs the search to completion, or until `stop` is raised or the
    /// toolchain fails fatally.
    fn run(&mut self, evaluator: &mut dyn Evaluate, stop: &StopFlag) -> Result<(), FatalError>;

    /// The structured outcome of the search so far. Valid after `run`
    /// returns, including the fatal-error and interrupted cases.
    fn report(&self) -> SearchReport;
}

/// Cooperative interrupt flag shared between a signal handler and the
/// search loop.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    /// A lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag; the search stops after the evaluation in flight.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the flag has been raised.
    pub fn raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builds the per-generation report entry for an evaluated population.
pub(crate) fn generation_report(index: usize, population: &[Candidate]) -> crate::report::GenerationReport {
    crate::report::GenerationReport {
        index,
        evaluated: population.len(),
        passed: population.iter().filter(|c| c.passed()).count(),
        best: crate::candidate::fittest(population)
            .ok()
            .map(crate::report::BestReport::from_candidate),
    }
}

/// Replaces `best` when `challenger` is strictly faster. Ties keep the
/// incumbent, so the earliest measurement of a given quality wins.
/// Comparison is on execution time, which survives fitness normalization.
pub(crate) fn update_best(best: &mut Option<Candidate>, challenger: &Candidate) {
    if !challenger.passed() {
        return;
    }
    match best {
        Some(b) if challenger.execution_time >= b.execution_time => {}
        _ => *best = Some(challenger.clone()),
    }
}

/// Rescales the population's fitnesses to sum to one.
///
/// Returns `false` without touching anything when no candidate passed;
/// callers fall back to uniform parent selection in that case.
pub fn normalize_fitnesses(population: &mut [Candidate]) -> bool {
    let total: f64 = population.iter().map(|c| c.fitness).sum();
    if total <= 0.0 {
        return false;
    }
    for cand in population.iter_mut() {
        cand.fitness /= total;
    }
    true
}

/// Fitness-proportionate selection over a fixed weight vector.
pub struct RouletteWheel {
    cumulative: Vec<f64>,
}

impl RouletteWheel {
    /// Builds a wheel over the given weights. `None` when the weights
    /// cannot form a distribution (empty, or summing to zero).
    pub fn build(weights: &[f64]) -> Option<Self> {
        let total: f64 = weights.iter().sum();
        if weights.is_empty() || total <= 0.0 {
            return None;
        }
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut acc = 0.0;
        for w in weights {
            acc += w / total;
            cumulative.push(acc);
        }
        // Rounding slack lands on the last slot that carries weight, so
        // zero-weight entries sorted behind it are never selectable.
        if let Some(idx) = weights.iter().rposition(|&w| w > 0.0) {
            cumulative[idx] = 1.0;
        }
        Some(Self { cumulative })
    }

    /// The slot a uniform draw `u` in `[0, 1)` lands in.
    pub fn index_for(&self, u: f64) -> usize {
        self.cumulative
            .iter()
            .position(|&edge| u < edge)
            .unwrap_or(self.cumulative.len() - 1)
    }

    /// Spins the wheel.
    pub fn spin(&self, rng: &mut impl Rng) -> usize {
        self.index_for(rng.gen::<f64>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{Candidate, GeneMap, Status};

    fn passed(fitness: f64) -> Candidate {
        let mut c = Candidate::new(GeneMap::default());
        c.status = Status::Passed;
        c.fitness = fitness;
        c
    }

    #[test]
    fn normalization_produces_a_distribution() {
        let mut pop = vec![passed(1.0), passed(3.0)];
        assert!(normalize_fitnesses(&mut pop));
        assert!((pop[0].fitness - 0.25).abs() < 1e-12);
        assert!((pop[1].fitness - 0.75).abs() < 1e-12);
    }

    #[test]
    fn normalization_refuses_all_failed_populations() {
        let mut pop = vec![Candidate::new(GeneMap::default())];
        assert!(!normalize_fitnesses(&mut pop));
        assert_eq!(pop[0].fitness, 0.0);
    }

    #[test]
    fn wheel_slots_are_proportional_to_weight() {
        let wheel = RouletteWheel::build(&[0.5, 0.3, 0.2]).unwrap();
        assert_eq!(wheel.index_for(0.0), 0);
        assert_eq!(wheel.index_for(0.49), 0);
        assert_eq!(wheel.index_for(0.5), 1);
        assert_eq!(wheel.index_for(0.79), 1);
        assert_eq!(wheel.index_for(0.8), 2);
        assert_eq!(wheel.index_for(0.999), 2);
    }

    #[test]
    fn zero_weight_slots_never_absorb_rounding_slack() {
        // Failed candidates sort last with fitness 0; a draw arbitrarily
        // close to 1 must still land on the last weighted slot.
        let wheel = RouletteWheel::build(&[0.7, 0.3, 0.0, 0.0]).unwrap();
        assert_eq!(wheel.index_for(1.0 - 1e-15), 1);
        assert_eq!(wheel.index_for(0.9999), 1);
        for step in 0..1000 {
            let u = f64::from(step) / 1000.0;
            assert!(wheel.index_for(u) < 2);
        }
    }

    #[test]
    fn wheel_rejects_degenerate_weights() {
        assert!(RouletteWheel::build(&[]).is_none());
        assert!(RouletteWheel::build(&[0.0, 0.0]).is_none());
    }

    #[test]
    fn stop_flag_is_shared_between_clones() {
        let stop = StopFlag::new();
        let other = stop.clone();
        assert!(!other.raised());
        stop.raise();
        assert!(other.raised());
    }
}
