//! Simulated annealing over the flag space.
//!
//! A single incumbent walks the space: each step flips about half of the
//! flags to a neighboring value and the Metropolis criterion decides whether
//! the walk moves. Early, hot levels accept most regressions; as the
//! temperature cools the walk settles into a local optimum.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{generation_report, update_best, SearchStrategy, StopFlag};
use crate::candidate::Candidate;
use crate::config::SearchConfiguration;
use crate::error::FatalError;
use crate::evaluate::Evaluate;
use crate::flags::FlagGroup;
use crate::report::{BestReport, GenerationReport, SearchReport};

/// Probability that one step touches any individual flag.
const FLAG_STEP_PROBABILITY: f64 = 0.5;

/// Metropolis acceptance for a move from `current_time` to `new_time`
/// (lower is better) at the given temperature: certain when the move
/// improves, exponentially damped when it regresses.
pub fn acceptance_probability(current_time: f64, new_time: f64, temperature: f64) -> f64 {
    if new_time < current_time {
        1.0
    } else {
        ((current_time - new_time) / temperature).exp()
    }
}

/// The simulated annealing strategy.
pub struct SimulatedAnnealing {
    cfg: SearchConfiguration,
    rng: StdRng,
    generations: Vec<GenerationReport>,
    best: Option<Candidate>,
    interrupted: bool,
}

impl SimulatedAnnealing {
    /// A new search over the configuration's flag space.
    pub fn new(cfg: SearchConfiguration) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self { cfg, rng, generations: Vec::new(), best: None, interrupted: false }
    }

    /// A neighbor of the incumbent: each flag independently steps to an
    /// adjacent value with probability one half.
    fn neighbor(&mut self, incumbent: &Candidate) -> Candidate {
        let mut genes = incumbent.genes.clone();
        for group in FlagGroup::ALL {
            let flags = self.cfg.flags.group(group).to_vec();
            let dst = genes.group_mut(group);
            for (flag, gene) in flags.iter().zip(dst.iter_mut()) {
                if self.rng.gen::<f64>() < FLAG_STEP_PROBABILITY {
                    *gene = flag.step(gene, &mut self.rng);
                }
            }
        }
        Candidate::new(genes)
    }
}

impl SearchStrategy for SimulatedAnnealing {
    fn name(&self) -> &'static str {
        "annealing"
    }

    fn run(&mut self, evaluator: &mut dyn Evaluate, stop: &StopFlag) -> Result<(), FatalError> {
        if stop.raised() {
            self.interrupted = true;
            return Ok(());
        }
        let mut incumbent = Candidate::random(&self.cfg.flags, &mut self.rng);
        evaluator.evaluate(&self.cfg, &mut incumbent)?;
        update_best(&mut self.best, &incumbent);
        // A failed starting point offers nothing to preserve, so the first
        // passing neighbor is always accepted.
        let mut incumbent_time =
            if incumbent.passed() { incumbent.execution_time } else { f64::INFINITY };

        let mut temperature = self.cfg.initial_temperature;
        for level in 0..self.cfg.cooling_steps {
            let mut evaluated = Vec::with_capacity(self.cfg.temperature_steps);
            for _ in 0..self.cfg.temperature_steps {
                if stop.raised() {
                    self.interrupted = true;
                    if !evaluated.is_empty() {
                        self.generations.push(generation_report(level, &evaluated));
                    }
                    return Ok(());
                }
                let mut neighbor = self.neighbor(&incumbent);
                evaluator.evaluate(&self.cfg, &mut neighbor)?;
                update_best(&mut self.best, &neighbor);

                if neighbor.passed() {
                    let p = acceptance_probability(
                        incumbent_time,
                        neighbor.execution_time,
                        temperature,
                    );
                    if self.rng.gen::<f64>() < p {
                        debug!(
                            "accepted candidate {} at {:.6}s (p = {:.3})",
                            neighbor.id, neighbor.execution_time, p
                        );
                        incumbent_time = neighbor.execution_time;
                        incumbent = neighbor.clone();
                    }
                }
                evaluated.push(neighbor);
            }
            info!(
                "temperature level {} done (T = {:.4}), incumbent {:.6}s",
                level, temperature, incumbent_time
            );
            self.generations.push(generation_report(level, &evaluated));
            temperature *= self.cfg.cooling;
        }
        Ok(())
    }

    fn report(&self) -> SearchReport {
        SearchReport {
            strategy: self.name(),
            generations: self.generations.clone(),
            best: self.best.as_ref().map(BestReport::from_candidate),
            counters: None,
            interrupted: self.interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Status;
    use crate::flags::{Flag, FlagSpace};

    #[test]
    fn improving_moves_are_always_accepted() {
        assert_eq!(acceptance_probability(2.0, 1.0, 1e-9), 1.0);
        assert_eq!(acceptance_probability(2.0, 1.0, 100.0), 1.0);
    }

    #[test]
    fn regressions_are_damped_by_temperature() {
        let hot = acceptance_probability(1.0, 2.0, 10.0);
        let cold = acceptance_probability(1.0, 2.0, 0.1);
        assert!(hot > cold);
        assert!((0.0..1.0).contains(&cold));
        assert!((acceptance_probability(1.0, 2.0, 1.0) - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn a_failed_start_yields_to_the_first_passing_neighbor() {
        struct FailFirstEvaluator {
            calls: u32,
        }
        impl Evaluate for FailFirstEvaluator {
            fn evaluate(
                &mut self,
                _cfg: &SearchConfiguration,
                cand: &mut Candidate,
            ) -> Result<(), FatalError> {
                self.calls += 1;
                if self.calls == 1 {
                    cand.status = Status::Failed;
                    cand.fitness = 0.0;
                } else {
                    cand.status = Status::Passed;
                    cand.execution_time = 3.0;
                    cand.fitness = 1.0 / 3.0;
                }
                Ok(())
            }
        }

        let flags =
            FlagSpace { codegen: vec![Flag::boolean("--no-wrap")], ..Default::default() };
        let mut cfg = SearchConfiguration::new(flags).seed(13);
        cfg.cooling_steps = 1;
        cfg.temperature_steps = 1;

        let mut search = SimulatedAnnealing::new(cfg);
        let mut eval = FailFirstEvaluator { calls: 0 };
        search.run(&mut eval, &StopFlag::new()).unwrap();

        assert_eq!(eval.calls, 2);
        let report = search.report();
        assert_eq!(report.best.unwrap().execution_time, 3.0);
        assert_eq!(report.generations.len(), 1);
        assert_eq!(report.generations[0].passed, 1);
    }

    #[test]
    fn failed_neighbors_never_become_the_incumbent() {
        struct Evaluations {
            calls: u32,
        }
        impl Evaluate for Evaluations {
            fn evaluate(
                &mut self,
                _cfg: &SearchConfiguration,
                cand: &mut Candidate,
            ) -> Result<(), FatalError> {
                self.calls += 1;
                if self.calls == 1 {
                    cand.status = Status::Passed;
                    cand.execution_time = 1.0;
                    cand.fitness = 1.0;
                } else {
                    cand.status = Status::Failed;
                    cand.fitness = 0.0;
                }
                Ok(())
            }
        }

        let flags =
            FlagSpace { codegen: vec![Flag::boolean("--no-wrap")], ..Default::default() };
        let mut cfg = SearchConfiguration::new(flags).seed(29);
        cfg.cooling_steps = 2;
        cfg.temperature_steps = 3;

        let mut search = SimulatedAnnealing::new(cfg);
        let mut eval = Evaluations { calls: 0 };
        search.run(&mut eval, &StopFlag::new()).unwrap();

        // 1 initial + 2 * 3 neighbors.
        assert_eq!(eval.calls, 7);
        let report = search.report();
        assert_eq!(report.best.unwrap().execution_time, 1.0);
        assert!(report.generations.iter().all(|g| g.passed == 0));
    }
}
