//! Generational genetic search over patterns.
//!
//! One call to [`GeneticEngine::step`] breeds a full generation: parents are
//! selected, recombined and mutated into offspring, the offspring are scored
//! (in parallel when configured), and the best distinct individuals of
//! parents and offspring together survive.

use crate::fitness::{Evaluator, Fitness};
use crate::pattern::Pattern;
use crate::search::config::SearchConfig;
use crate::search::individual::{Individual, Population};
use crate::search::operators::{Mutation, Operators};
use priority_queue::PriorityQueue;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;
use tracing::{debug, warn};

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    /// Generations bred after the initial one.
    pub generations: usize,
    /// Patterns actually scored; cached re-evaluations are not counted.
    pub evaluations: usize,
    pub crossovers: usize,
    pub mutations: usize,
    /// Operator applications that failed and were retried or abandoned.
    pub discarded: usize,
}

/// Summary of one generation, handed to observers.
#[derive(Debug, Clone)]
pub struct GenerationSnapshot {
    pub generation: usize,
    pub best_fitness: Fitness,
    pub mean_fitness: f64,
    pub worst_fitness: Fitness,
    pub best_pattern: Pattern,
    /// Patterns scored while producing this generation.
    pub evaluations: usize,
}

type Survivors = PriorityQueue<Individual, Fitness, BuildHasherDefault<FxHasher>>;

/// The genetic search state for one run.
pub struct GeneticEngine<'e> {
    config: &'e SearchConfig,
    evaluator: &'e Evaluator,
    operators: Operators<'e>,
    rng: StdRng,
    population: Population,
    generation: usize,
    stats: SearchStats,
}

impl<'e> GeneticEngine<'e> {
    pub fn new(config: &'e SearchConfig, evaluator: &'e Evaluator) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random::<u64>);
        GeneticEngine {
            config,
            evaluator,
            operators: Operators::new(evaluator.positives(), config.placeholder_kinds),
            rng: StdRng::seed_from_u64(seed),
            population: Population::default(),
            generation: 0,
            stats: SearchStats::default(),
        }
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn best(&self) -> Option<&Individual> {
        self.population.best()
    }

    /// Generations bred so far; the initial population is generation 0.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    pub fn into_parts(self) -> (Population, SearchStats) {
        (self.population, self.stats)
    }

    /// Seed generation 0: every positive example as the model sees it, then
    /// randomly generalized copies of them until the population is full.
    pub fn initialize(&mut self) -> GenerationSnapshot {
        let size = self.config.population_size;
        let evaluator = self.evaluator;
        let positives = evaluator.positives();
        let examples = positives.roots();
        let mut seeds: Vec<Individual> = examples
            .iter()
            .take(size)
            .map(|root| Individual::new(Pattern::new(positives.pattern_of(root))))
            .collect();

        let constrain = self.config.placeholder_kinds.constrains();
        let max_steps = self.config.initial_generalizations.max(1);
        while seeds.len() < size && !examples.is_empty() {
            let root = &examples[self.rng.random_range(0..examples.len())];
            let mut pattern = Pattern::new(positives.pattern_of(root));
            for _ in 0..self.rng.random_range(1..=max_steps) {
                let concrete: Vec<usize> = pattern
                    .nodes()
                    .enumerate()
                    .filter(|(_, n)| !n.is_placeholder())
                    .map(|(i, _)| i)
                    .collect();
                if concrete.is_empty() {
                    break;
                }
                let index = concrete[self.rng.random_range(0..concrete.len())];
                let Some(path) = pattern.path_of(index) else {
                    break;
                };
                match pattern.generalize_at(&path, constrain) {
                    Ok(next) => pattern = next,
                    Err(err) => {
                        self.stats.discarded += 1;
                        debug!(%err, "initial generalization discarded");
                    }
                }
            }
            seeds.push(Individual::new(pattern));
        }

        let (scored, evaluations) = self.score(seeds);
        self.population = self.survivors(Vec::new(), scored);
        self.snapshot(evaluations)
    }

    /// Breed, score and replace one generation.
    pub fn step(&mut self) -> GenerationSnapshot {
        let size = self.config.population_size;
        let mut offspring: Vec<Individual> = Vec::with_capacity(size + 1);

        while offspring.len() < size {
            let Some((a, b)) = self.parents() else {
                break;
            };
            let (a, b) = if self.rng.random_bool(self.config.crossover_probability) {
                self.stats.crossovers += 1;
                match self.operators.crossover(a.pattern(), b.pattern(), &mut self.rng) {
                    Ok((c, d)) => (Individual::new(c), Individual::new(d)),
                    Err(err) => {
                        self.stats.discarded += 1;
                        debug!(%err, "crossover kept parents");
                        (a, b)
                    }
                }
            } else {
                (a, b)
            };
            for child in [a, b] {
                let child = if self.rng.random_bool(self.config.mutation_probability) {
                    self.mutate(child)
                } else {
                    child
                };
                offspring.push(child);
            }
        }
        offspring.truncate(size);

        let (scored, evaluations) = self.score(offspring);
        let parents = std::mem::take(&mut self.population).into_vec();
        self.population = self.survivors(parents, scored);
        self.generation += 1;
        self.stats.generations += 1;
        self.snapshot(evaluations)
    }

    fn parents(&mut self) -> Option<(Individual, Individual)> {
        let pool = self.population.as_slice();
        let a = self.config.selection.select(pool, &mut self.rng)?.clone();
        let b = self.config.selection.select(pool, &mut self.rng)?.clone();
        Some((a, b))
    }

    /// Mutate with a fresh operator choice per attempt; after
    /// `operator_retries` failures the unchanged individual is kept.
    fn mutate(&mut self, individual: Individual) -> Individual {
        for _ in 0..=self.config.operator_retries {
            let mutation = Mutation::random(&mut self.rng);
            match self.operators.mutate(mutation, individual.pattern(), &mut self.rng) {
                Ok(pattern) => {
                    self.stats.mutations += 1;
                    return Individual::new(pattern);
                }
                Err(err) => {
                    self.stats.discarded += 1;
                    debug!(%mutation, %err, "mutation discarded");
                }
            }
        }
        individual
    }

    /// Evaluate everything not yet scored. Individuals whose evaluation
    /// fails are dropped. Returns the survivors and the number scored.
    fn score(&mut self, individuals: Vec<Individual>) -> (Vec<Individual>, usize) {
        let fresh = individuals.iter().filter(|i| !i.is_evaluated()).count();
        let evaluator = self.evaluator;
        let keep = |ind: Individual| match ind.evaluate(evaluator) {
            Ok(_) => Some(ind),
            Err(err) => {
                warn!(pattern = %ind.pattern(), %err, "discarding malformed individual");
                None
            }
        };
        let scored: Vec<Individual> = if self.config.parallel {
            individuals.into_par_iter().filter_map(keep).collect()
        } else {
            individuals.into_iter().filter_map(keep).collect()
        };
        self.stats.evaluations += fresh;
        (scored, fresh)
    }

    /// Elitist replacement: the best `population_size` distinct individuals
    /// of parents and offspring. Padded with copies of the best when fewer
    /// distinct individuals exist.
    fn survivors(&self, parents: Vec<Individual>, offspring: Vec<Individual>) -> Population {
        let size = self.config.population_size;
        let mut queue = Survivors::with_hasher(BuildHasherDefault::default());
        for ind in parents.into_iter().chain(offspring) {
            let fitness = ind.fitness();
            queue.push(ind, fitness);
        }

        let mut next: Vec<Individual> = Vec::with_capacity(size);
        while next.len() < size {
            match queue.pop() {
                Some((ind, _)) => next.push(ind),
                None => break,
            }
        }
        let distinct = next.len();
        for i in 0..size.saturating_sub(distinct) {
            if distinct == 0 {
                break;
            }
            next.push(next[i % distinct].clone());
        }
        Population::new(next)
    }

    fn snapshot(&self, evaluations: usize) -> GenerationSnapshot {
        let best = self.population.best();
        let snapshot = GenerationSnapshot {
            generation: self.generation,
            best_fitness: best.map_or_else(Fitness::worst, Individual::fitness),
            mean_fitness: self.population.mean_score(),
            worst_fitness: self.population.worst().map_or_else(Fitness::worst, Individual::fitness),
            best_pattern: best.map(|b| b.pattern().clone()).unwrap_or_else(|| Pattern::placeholder(0, None)),
            evaluations,
        };
        debug!(
            generation = snapshot.generation,
            best = %snapshot.best_fitness,
            mean = snapshot.mean_fitness,
            worst = %snapshot.worst_fitness,
            evaluations,
            "generation scored"
        );
        snapshot
    }
}
