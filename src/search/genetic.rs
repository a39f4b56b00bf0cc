//! Genetic algorithm over the flag space.
//!
//! Generations move through a small state machine: the first is sampled
//! uniformly, every later one is bred from its predecessor, and at most once
//! the search switches from a single global tile-size flag to one size flag
//! per kernel. The switch fires when the best time stops improving between
//! consecutive generations, which is when the scalar flags have largely
//! settled and the remaining headroom sits in the size parameters.

use std::mem;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::{
    generation_report, normalize_fitnesses, update_best, RouletteWheel, SearchStrategy, StopFlag,
};
use crate::candidate::{fittest, Candidate, GeneMap};
use crate::config::{CrossoverKind, SearchConfiguration};
use crate::error::FatalError;
use crate::evaluate::Evaluate;
use crate::flags::{registry, FlagGroup, FlagValue, GeneValue};
use crate::report::{BestReport, GenerationReport, OperatorCounters, SearchReport};

/// Relative improvement between consecutive generations below which the
/// per-kernel size expansion fires.
const SIZES_TRANSITION_THRESHOLD: f64 = 0.10;

/// Probability that a triggered mutation touches any individual gene.
const GENE_MUTATION_PROBABILITY: f64 = 0.5;

/// The genetic search strategy.
pub struct GeneticSearch {
    cfg: SearchConfiguration,
    rng: StdRng,
    population: Vec<Candidate>,
    generations: Vec<GenerationReport>,
    /// Best time of each completed generation, indexed like `generations`.
    best_times: Vec<Option<f64>>,
    best: Option<Candidate>,
    counters: OperatorCounters,
    sizes_done: bool,
    interrupted: bool,
}

impl GeneticSearch {
    /// A new search over the configuration's flag space.
    pub fn new(cfg: SearchConfiguration) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self {
            cfg,
            rng,
            population: Vec::new(),
            generations: Vec::new(),
            best_times: Vec::new(),
            best: None,
            counters: OperatorCounters::default(),
            sizes_done: false,
            interrupted: false,
        }
    }

    /// Whether the one-shot per-kernel expansion already happened.
    pub fn sizes_expanded(&self) -> bool {
        self.sizes_done
    }

    /// The configuration the next generation will be bred against. Changes
    /// exactly once, at the per-kernel expansion.
    pub fn configuration(&self) -> &SearchConfiguration {
        &self.cfg
    }

    /// The first generation: uniform random individuals, with the global
    /// tile-size gene overwritten by draws without replacement from its
    /// domain so the early generations cover distinct tile sizes.
    fn random_population(&mut self) -> Vec<Candidate> {
        let mut population: Vec<Candidate> = (0..self.cfg.population)
            .map(|_| Candidate::random(&self.cfg.flags, &mut self.rng))
            .collect();

        let tile_idx =
            self.cfg.flags.codegen.iter().position(|f| f.name == registry::TILE_SIZE);
        if let Some(idx) = tile_idx {
            if let crate::flags::FlagDomain::Enumerated(values) =
                &self.cfg.flags.codegen[idx].domain
            {
                let mut pool: Vec<FlagValue> = Vec::new();
                for cand in &mut population {
                    if pool.is_empty() {
                        pool = values.clone();
                        pool.shuffle(&mut self.rng);
                    }
                    if let Some(value) = pool.pop() {
                        cand.genes.codegen[idx] = GeneValue::Enum(value);
                    }
                }
            }
        }
        population
    }

    /// Whether the best times of the last two completed generations are
    /// close enough to trigger the per-kernel expansion.
    fn should_expand_sizes(&self) -> bool {
        if self.sizes_done || !self.cfg.tune_kernel_sizes || self.best_times.len() < 2 {
            return false;
        }
        let cur = self.best_times[self.best_times.len() - 1];
        let prev = self.best_times[self.best_times.len() - 2];
        match (cur, prev) {
            (Some(cur), Some(prev)) if cur > 0.0 => {
                (cur - prev).abs() / cur < SIZES_TRANSITION_THRESHOLD
            }
            _ => false,
        }
    }

    /// The one-shot per-kernel expansion: swap the flag space, then fill the
    /// next generation with permuted clones of the fittest individual.
    fn sizes_population(&mut self) -> Option<Vec<Candidate>> {
        let elite = fittest(&self.population).ok()?.clone();
        self.sizes_done = true;
        if elite.kernel_sizes.is_empty() {
            // The generator reported no kernels; there is nothing to
            // specialize, so evolution continues over the unchanged space.
            debug!("per-kernel expansion skipped: no kernel sizes reported");
            return None;
        }
        info!(
            "expanding to per-kernel size flags for {} kernels",
            elite.kernel_sizes.len()
        );

        let next_cfg = self.cfg.with_kernel_sizes(&elite.kernel_sizes);

        // Template genome over the new space: the elite's genes with the
        // tile-size position dropped and one seeded size gene per kernel.
        let mut codegen = Vec::with_capacity(next_cfg.flags.codegen.len());
        for (flag, gene) in self.cfg.flags.codegen.iter().zip(&elite.genes.codegen) {
            if flag.name != registry::TILE_SIZE {
                codegen.push(gene.clone());
            }
        }
        for sizes in elite.kernel_sizes.values() {
            codegen.push(GeneValue::Sizes(sizes.clone()));
        }
        let template = GeneMap {
            codegen,
            cc: elite.genes.cc.clone(),
            cxx: elite.genes.cxx.clone(),
            nvcc: elite.genes.nvcc.clone(),
        };

        self.cfg = next_cfg;
        let population = (0..self.cfg.population)
            .map(|_| {
                let mut genes = template.clone();
                for (flag, gene) in self.cfg.flags.codegen.iter().zip(&mut genes.codegen) {
                    if flag.is_sizes() {
                        *gene = flag.mutate(gene, &mut self.rng);
                    }
                }
                Candidate::new(genes)
            })
            .collect();
        Some(population)
    }

    /// Breeds the next generation from the current one.
    fn bred_population(&mut self) -> Vec<Candidate> {
        let mut pool = mem::take(&mut self.population);
        let elite = fittest(&pool).ok().cloned();

        // Selection pressure comes from the wheel; an all-failed generation
        // degenerates to uniform selection.
        let wheel = if normalize_fitnesses(&mut pool) {
            pool.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
            RouletteWheel::build(&pool.iter().map(|c| c.fitness).collect::<Vec<_>>())
        } else {
            None
        };

        let mut next = Vec::with_capacity(self.cfg.population);
        if self.cfg.elitism {
            if let Some(elite) = &elite {
                next.push(elite.reborn());
            }
        }
        if self.cfg.inject_random && next.len() < self.cfg.population {
            next.push(Candidate::random(&self.cfg.flags, &mut self.rng));
        }

        while next.len() < self.cfg.population {
            let mother = self.select(&pool, wheel.as_ref());
            let father = self.select(&pool, wheel.as_ref());
            let remaining = self.cfg.population - next.len();

            if self.rng.gen::<f64>() < self.cfg.crossover_rate {
                self.counters.crossovers += 1;
                let (first, second) = self.crossover(&pool[mother], &pool[father]);
                next.push(self.maybe_mutated(first));
                if remaining >= 2 {
                    next.push(self.maybe_mutated(second));
                }
            } else if remaining >= 2 {
                next.push(self.maybe_mutated(pool[mother].reborn()));
                next.push(self.maybe_mutated(pool[father].reborn()));
            } else {
                let survivor = if self.rng.gen_bool(0.5) { mother } else { father };
                next.push(self.maybe_mutated(pool[survivor].reborn()));
            }
        }
        next
    }

    fn select(&mut self, pool: &[Candidate], wheel: Option<&RouletteWheel>) -> usize {
        match wheel {
            Some(wheel) => wheel.spin(&mut self.rng),
            None => self.rng.gen_range(0..pool.len()),
        }
    }

    /// Both crossover children for one parent pair. Scalar genes follow the
    /// cut mask; size genes are never sliced and always come from the
    /// child's dominant parent (the one supplying its base genome).
    fn crossover(&mut self, mother: &Candidate, father: &Candidate) -> (Candidate, Candidate) {
        let n = self.cfg.flags.len();
        let mask = match self.cfg.crossover {
            CrossoverKind::OnePoint => {
                let cut = self.rng.gen_range(0..n);
                (0..n).map(|i| i >= cut).collect::<Vec<_>>()
            }
            CrossoverKind::TwoPoint => {
                let a = self.rng.gen_range(0..=n);
                let b = self.rng.gen_range(a..=n);
                (0..n).map(|i| a <= i && i < b).collect::<Vec<_>>()
            }
        };
        (self.crossed(mother, father, &mask), self.crossed(father, mother, &mask))
    }

    fn crossed(&self, base: &Candidate, other: &Candidate, mask: &[bool]) -> Candidate {
        let mut genes = base.genes.clone();
        let mut idx = 0;
        for group in FlagGroup::ALL {
            let flags = self.cfg.flags.group(group);
            let src = other.genes.group(group);
            let dst = genes.group_mut(group);
            for (i, flag) in flags.iter().enumerate() {
                if mask[idx] && !flag.is_sizes() {
                    dst[i] = src[i].clone();
                }
                idx += 1;
            }
        }
        Candidate::new(genes)
    }

    fn maybe_mutated(&mut self, mut child: Candidate) -> Candidate {
        if self.rng.gen::<f64>() >= self.cfg.mutation_rate {
            return child;
        }
        self.counters.mutations += 1;
        for group in FlagGroup::ALL {
            let flags = self.cfg.flags.group(group).to_vec();
            let genes = child.genes.group_mut(group);
            for (flag, gene) in flags.iter().zip(genes.iter_mut()) {
                if self.rng.gen::<f64>() < GENE_MUTATION_PROBABILITY {
                    *gene = flag.mutate(gene, &mut self.rng);
                }
            }
        }
        child
    }
}

impl SearchStrategy for GeneticSearch {
    fn name(&self) -> &'static str {
        "genetic"
    }

    fn run(&mut self, evaluator: &mut dyn Evaluate, stop: &StopFlag) -> Result<(), FatalError> {
        for index in 0..self.cfg.generations {
            let mut population = if index == 0 {
                self.random_population()
            } else if self.should_expand_sizes() {
                match self.sizes_population() {
                    Some(population) => population,
                    None => self.bred_population(),
                }
            } else {
                self.bred_population()
            };

            for cand in &mut population {
                if stop.raised() {
                    // A half-evaluated generation is never summarized.
                    self.interrupted = true;
                    return Ok(());
                }
                evaluator.evaluate(&self.cfg, cand)?;
                update_best(&mut self.best, cand);
            }

            let best_time = fittest(&population).ok().map(|c| c.execution_time);
            match best_time {
                Some(time) => info!("generation {}: best {:.6}s", index, time),
                None => info!("generation {}: no successful candidate", index),
            }
            self.generations.push(generation_report(index, &population));
            self.best_times.push(best_time);
            self.population = population;
        }
        Ok(())
    }

    fn report(&self) -> SearchReport {
        SearchReport {
            strategy: self.name(),
            generations: self.generations.clone(),
            best: self.best.as_ref().map(BestReport::from_candidate),
            counters: Some(self.counters),
            interrupted: self.interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Status;
    use crate::flags::{Flag, FlagSpace, FlagValue};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;
    use std::collections::HashMap;

    /// Marks every candidate passed with a scripted time per distinct
    /// genome, falling back to a default.
    struct ScriptedEvaluator {
        times: HashMap<String, f64>,
        default: f64,
        calls: u32,
    }

    impl ScriptedEvaluator {
        fn uniform(default: f64) -> Self {
            Self { times: HashMap::new(), default, calls: 0 }
        }
    }

    impl Evaluate for ScriptedEvaluator {
        fn evaluate(
            &mut self,
            cfg: &SearchConfiguration,
            cand: &mut Candidate,
        ) -> Result<(), FatalError> {
            self.calls += 1;
            let key = crate::flags::render_args(&cfg.flags.codegen, &cand.genes.codegen);
            let time = *self.times.get(&key).unwrap_or(&self.default);
            cand.status = Status::Passed;
            cand.execution_time = time;
            cand.fitness = 1.0 / time;
            Ok(())
        }
    }

    fn space() -> FlagSpace {
        FlagSpace {
            codegen: vec![
                Flag::boolean("--no-wrap"),
                Flag::enumerated(
                    "--isl-schedule-fuse",
                    vec![FlagValue::Str("max".into()), FlagValue::Str("min".into())],
                ),
                Flag::int_range(registry::TILE_SIZE, 1, 9),
            ],
            ..Default::default()
        }
    }

    fn genome_key(cfg: &SearchConfiguration, cand: &Candidate) -> String {
        crate::flags::render_args(&cfg.flags.codegen, &cand.genes.codegen)
    }

    #[test]
    fn initial_population_spreads_tile_sizes() {
        let cfg = SearchConfiguration::new(space())
            .population(8)
            .generations(1)
            .seed(9);
        let mut search = GeneticSearch::new(cfg);
        let population = search.random_population();
        let tiles: Vec<_> = population
            .iter()
            .map(|c| match &c.genes.codegen[2] {
                GeneValue::Enum(FlagValue::Int(t)) => *t,
                other => panic!("unexpected tile gene {:?}", other),
            })
            .collect();
        // Eight individuals over a domain of eight values: all distinct.
        let mut sorted = tiles.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 8);
    }

    #[test]
    fn disabled_operators_reselect_the_previous_generation() {
        let mut cfg = SearchConfiguration::new(space())
            .population(4)
            .generations(2)
            .seed(3);
        cfg.crossover_rate = 0.0;
        cfg.mutation_rate = 0.0;
        cfg.elitism = true;
        cfg.tune_kernel_sizes = false;

        let mut search = GeneticSearch::new(cfg);
        let mut rng = StdRng::seed_from_u64(31);
        let mut parents = Vec::new();
        for time in [1.0, 2.0, 4.0, 8.0] {
            let mut cand = Candidate::random(&search.cfg.flags, &mut rng);
            cand.status = Status::Passed;
            cand.execution_time = time;
            cand.fitness = 1.0 / time;
            parents.push(cand);
        }
        let parent_keys: Vec<String> =
            parents.iter().map(|c| genome_key(&search.cfg, c)).collect();
        let elite_key = parent_keys[0].clone();
        search.population = parents;

        let next = search.bred_population();
        assert_eq!(next.len(), 4);
        // With both operators disabled every child is a re-selected parent,
        // and the elite clone is guaranteed a slot.
        let next_keys: Vec<String> =
            next.iter().map(|c| genome_key(&search.cfg, c)).collect();
        assert!(next_keys.iter().all(|k| parent_keys.contains(k)));
        assert_eq!(next_keys[0], elite_key);
        assert_eq!(search.counters.crossovers, 0);
        assert_eq!(search.counters.mutations, 0);
        // Children are fresh, unevaluated individuals.
        assert!(next.iter().all(|c| c.status == Status::Unevaluated));
    }

    #[test]
    fn crossover_children_are_interleavings_of_their_parents() {
        let cfg = SearchConfiguration::new(space()).population(2).seed(17);
        let mut search = GeneticSearch::new(cfg);
        let mut rng = StdRng::seed_from_u64(99);
        let mother = Candidate::random(&search.cfg.flags, &mut rng);
        let father = Candidate::random(&search.cfg.flags, &mut rng);

        for _ in 0..50 {
            let (a, b) = search.crossover(&mother, &father);
            for child in [&a, &b] {
                for idx in 0..search.cfg.flags.len() {
                    let gene = child.genes.flat_get(idx).unwrap();
                    let from_mother = mother.genes.flat_get(idx).unwrap() == gene;
                    let from_father = father.genes.flat_get(idx).unwrap() == gene;
                    assert!(from_mother || from_father);
                }
            }
        }
    }

    #[test]
    fn sizes_transition_fires_once_below_the_threshold() {
        let mut cfg = SearchConfiguration::new(space())
            .population(3)
            .generations(4)
            .seed(5);
        cfg.tune_kernel_sizes = true;

        struct PlateauEvaluator {
            sizes_generations: u32,
        }
        impl Evaluate for PlateauEvaluator {
            fn evaluate(
                &mut self,
                cfg: &SearchConfiguration,
                cand: &mut Candidate,
            ) -> Result<(), FatalError> {
                if cfg.flags.codegen.iter().any(|f| f.is_sizes()) {
                    self.sizes_generations += 1;
                }
                cand.status = Status::Passed;
                cand.execution_time = 1.0;
                cand.fitness = 1.0;
                let mut sizes = BTreeMap::new();
                sizes.insert(
                    "0".to_string(),
                    crate::flags::SizesValue {
                        tile: vec![16, 16],
                        block: vec![8, 8],
                        grid: vec![64],
                    },
                );
                cand.kernel_sizes = sizes;
                Ok(())
            }
        }

        let mut search = GeneticSearch::new(cfg);
        let mut eval = PlateauEvaluator { sizes_generations: 0 };
        search.run(&mut eval, &StopFlag::new()).unwrap();

        // Identical times plateau immediately: generation 2 is the sizes
        // generation, and the expansion never repeats.
        assert!(search.sizes_expanded());
        let cfg = search.configuration();
        assert!(cfg.flags.codegen.iter().all(|f| f.name != registry::TILE_SIZE));
        assert_eq!(cfg.flags.codegen.iter().filter(|f| f.is_sizes()).count(), 1);
        // Generations 2 and 3 both ran over the expanded space.
        assert_eq!(eval.sizes_generations, 6);
    }

    #[test]
    fn interrupt_discards_the_partial_generation() {
        let cfg = SearchConfiguration::new(space())
            .population(3)
            .generations(5)
            .seed(21);
        let mut search = GeneticSearch::new(cfg);
        let stop = StopFlag::new();
        stop.raise();
        let mut eval = ScriptedEvaluator::uniform(1.0);
        search.run(&mut eval, &stop).unwrap();

        let report = search.report();
        assert!(report.interrupted);
        assert!(report.generations.is_empty());
        assert_eq!(eval.calls, 0);
    }
}
