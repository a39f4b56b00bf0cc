//! Uniform random sampling of the flag space, the baseline the other
//! strategies are judged against.

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{generation_report, update_best, SearchStrategy, StopFlag};
use crate::candidate::Candidate;
use crate::config::SearchConfiguration;
use crate::error::FatalError;
use crate::evaluate::Evaluate;
use crate::report::{BestReport, GenerationReport, SearchReport};

/// Draws `population` independent samples per generation and keeps the
/// fastest candidate seen overall.
pub struct RandomSearch {
    cfg: SearchConfiguration,
    rng: StdRng,
    generations: Vec<GenerationReport>,
    best: Option<Candidate>,
    interrupted: bool,
}

impl RandomSearch {
    /// A new search over the configuration's flag space.
    pub fn new(cfg: SearchConfiguration) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self { cfg, rng, generations: Vec::new(), best: None, interrupted: false }
    }
}

impl SearchStrategy for RandomSearch {
    fn name(&self) -> &'static str {
        "random"
    }

    fn run(&mut self, evaluator: &mut dyn Evaluate, stop: &StopFlag) -> Result<(), FatalError> {
        'generations: for index in 0..self.cfg.generations {
            let mut population = Vec::with_capacity(self.cfg.population);
            for _ in 0..self.cfg.population {
                if stop.raised() {
                    self.interrupted = true;
                    // Samples are independent, so the partial generation
                    // still counts.
                    if !population.is_empty() {
                        self.generations.push(generation_report(index, &population));
                    }
                    break 'generations;
                }
                let mut cand = Candidate::random(&self.cfg.flags, &mut self.rng);
                evaluator.evaluate(&self.cfg, &mut cand)?;
                update_best(&mut self.best, &cand);
                population.push(cand);
            }
            if population.len() == self.cfg.population {
                info!(
                    "random generation {}: {} candidates evaluated",
                    index,
                    population.len()
                );
                self.generations.push(generation_report(index, &population));
            }
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

    struct CountingEvaluator {
        calls: u32,
    }

    impl Evaluate for CountingEvaluator {
        fn evaluate(
            &mut self,
            _cfg: &SearchConfiguration,
            cand: &mut Candidate,
        ) -> Result<(), FatalError> {
            self.calls += 1;
            cand.status = Status::Passed;
            cand.execution_time = f64::from(self.calls);
            cand.fitness = 1.0 / cand.execution_time;
            Ok(())
        }
    }

    fn small_config() -> SearchConfiguration {
        let flags =
            FlagSpace { codegen: vec![Flag::boolean("--no-wrap")], ..Default::default() };
        SearchConfiguration::new(flags).population(3).generations(2)
    }

    #[test]
    fn evaluates_population_times_generations_candidates() {
        let mut search = RandomSearch::new(small_config());
        let mut eval = CountingEvaluator { calls: 0 };
        search.run(&mut eval, &StopFlag::new()).unwrap();
        assert_eq!(eval.calls, 6);
        let report = search.report();
        assert_eq!(report.generations.len(), 2);
        // The first evaluation got the lowest time.
        assert_eq!(report.best.unwrap().execution_time, 1.0);
    }

    #[test]
    fn a_raised_stop_flag_halts_before_the_next_evaluation() {
        let mut search = RandomSearch::new(small_config());
        let mut eval = CountingEvaluator { calls: 0 };
        let stop = StopFlag::new();
        stop.raise();
        search.run(&mut eval, &stop).unwrap();
        assert_eq!(eval.calls, 0);
        let report = search.report();
        assert!(report.interrupted);
        assert!(report.generations.is_empty());
        assert!(report.best.is_none());
    }
}
