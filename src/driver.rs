//! Search sessions: building the example models once and running the
//! generational loop to a termination condition.

use crate::facts::IndexOptions;
use crate::fitness::{Evaluator, FitnessConfig};
use crate::model::PartialModel;
use crate::pattern::Pattern;
use crate::search::{
    GenerationSnapshot, GeneticEngine, Individual, PlaceholderKinds, SearchConfig, SearchError,
    SearchStats, Selection,
};
use crate::syntax::SyntaxNode;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Cooperative cancellation flag, checked between generations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Receives a snapshot after every scored generation, including generation 0.
pub trait SearchObserver {
    fn on_generation(&mut self, snapshot: &GenerationSnapshot);
}

impl<F: FnMut(&GenerationSnapshot)> SearchObserver for F {
    fn on_generation(&mut self, snapshot: &GenerationSnapshot) {
        self(snapshot)
    }
}

/// Forwards snapshots to `tracing` at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl SearchObserver for TracingObserver {
    fn on_generation(&mut self, snapshot: &GenerationSnapshot) {
        info!(
            generation = snapshot.generation,
            best = %snapshot.best_fitness,
            mean = snapshot.mean_fitness,
            pattern = %snapshot.best_pattern,
            "generation"
        );
    }
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    BudgetExhausted,
    Stagnation,
    PerfectScore,
    Cancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::BudgetExhausted => "generation budget exhausted",
            TerminationReason::Stagnation => "no improvement",
            TerminationReason::PerfectScore => "perfect score",
            TerminationReason::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Best distinct individuals, best first.
    pub best: Vec<Individual>,
    pub reason: TerminationReason,
    /// Generations bred after the initial population.
    pub generations: usize,
    pub stats: SearchStats,
}

impl SearchOutcome {
    pub fn best_pattern(&self) -> Option<&Pattern> {
        self.best.first().map(Individual::pattern)
    }
}

/// Builder for search sessions.
#[derive(Debug, Clone, Default)]
pub struct SearchBuilder {
    config: SearchConfig,
    index_options: IndexOptions,
    positives: Vec<SyntaxNode>,
    negatives: Vec<SyntaxNode>,
}

impl SearchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the configuration with one read from JSON.
    pub fn config_json(mut self, json: &str) -> Result<Self, SearchError> {
        self.config = SearchConfig::from_json_str(json)?;
        Ok(self)
    }

    pub fn population_size(mut self, n: usize) -> Self {
        self.config.population_size = n;
        self
    }

    pub fn max_generations(mut self, n: usize) -> Self {
        self.config.max_generations = n;
        self
    }

    pub fn stagnation_limit(mut self, n: usize) -> Self {
        self.config.stagnation_limit = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn selection(mut self, selection: Selection) -> Self {
        self.config.selection = selection;
        self
    }

    pub fn fitness(mut self, fitness: FitnessConfig) -> Self {
        self.config.fitness = fitness;
        self
    }

    pub fn placeholder_kinds(mut self, kinds: PlaceholderKinds) -> Self {
        self.config.placeholder_kinds = kinds;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    pub fn deadline(mut self, limit: Duration) -> Self {
        self.config.deadline_ms = Some(limit.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn index_options(mut self, options: IndexOptions) -> Self {
        self.index_options = options;
        self
    }

    pub fn positive(mut self, node: SyntaxNode) -> Self {
        self.positives.push(node);
        self
    }

    pub fn positives(mut self, nodes: impl IntoIterator<Item = SyntaxNode>) -> Self {
        self.positives.extend(nodes);
        self
    }

    pub fn negative(mut self, node: SyntaxNode) -> Self {
        self.negatives.push(node);
        self
    }

    pub fn negatives(mut self, nodes: impl IntoIterator<Item = SyntaxNode>) -> Self {
        self.negatives.extend(nodes);
        self
    }

    /// Validate and index the examples.
    pub fn build(self) -> Result<SearchSession, SearchError> {
        if self.positives.is_empty() {
            return Err(SearchError::EmptyExampleSet);
        }
        self.config.validate()?;

        let mut positives = PartialModel::with_options(self.index_options.clone());
        positives.add_subtrees(self.positives);
        let mut negatives = PartialModel::with_options(self.index_options);
        negatives.add_subtrees(self.negatives);
        debug!(
            positives = positives.len(),
            negatives = negatives.len(),
            facts = positives.facts().len() + negatives.facts().len(),
            "example models built"
        );

        let policy = self.config.fitness.policy();
        Ok(SearchSession {
            config: self.config,
            evaluator: Evaluator::new(positives, negatives, policy),
        })
    }
}

/// Indexed examples plus configuration. Each run starts from scratch.
#[derive(Debug)]
pub struct SearchSession {
    config: SearchConfig,
    evaluator: Evaluator,
}

impl SearchSession {
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Run to completion without observation or cancellation.
    pub fn run(&self) -> SearchOutcome {
        self.run_with(&CancelToken::new(), &mut |_: &GenerationSnapshot| {})
    }

    pub fn run_with<O: SearchObserver + ?Sized>(&self, cancel: &CancelToken, observer: &mut O) -> SearchOutcome {
        let config = &self.config;
        let started = Instant::now();
        let deadline = config.deadline_ms.map(Duration::from_millis);
        info!(
            positives = self.evaluator.positives().len(),
            negatives = self.evaluator.negatives().len(),
            population = config.population_size,
            policy = self.evaluator.policy().name(),
            seed = ?config.seed,
            "search started"
        );

        let mut engine = GeneticEngine::new(config, &self.evaluator);
        let initial = engine.initialize();
        let mut best = initial.best_fitness;
        let mut stale = 0;
        observer.on_generation(&initial);

        let reason = loop {
            if engine.best().is_some_and(Individual::is_perfect) {
                break TerminationReason::PerfectScore;
            }
            if cancel.is_cancelled() || deadline.is_some_and(|limit| started.elapsed() >= limit) {
                break TerminationReason::Cancelled;
            }
            if engine.generation() >= config.max_generations {
                break TerminationReason::BudgetExhausted;
            }
            if config.stagnation_limit > 0 && stale >= config.stagnation_limit {
                break TerminationReason::Stagnation;
            }

            let snapshot = engine.step();
            if snapshot.best_fitness > best {
                best = snapshot.best_fitness;
                stale = 0;
            } else {
                stale += 1;
            }
            observer.on_generation(&snapshot);
        };

        let generations = engine.generation();
        let (population, stats) = engine.into_parts();
        let outcome = SearchOutcome {
            best: population.top_distinct(config.report_top),
            reason,
            generations,
            stats,
        };
        info!(
            %reason,
            generations,
            evaluations = outcome.stats.evaluations,
            best = %best,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;
    use crate::notation::parse_tree;
    use crate::syntax::NodeFactory;

    fn trees(nodes: &mut NodeFactory, sources: &[&str]) -> Vec<SyntaxNode> {
        sources.iter().map(|src| parse_tree(src, nodes).unwrap()).collect()
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    #[test]
    fn test_guard_then_return_converges() {
        init_tracing();
        let mut nodes = NodeFactory::new();
        let positives = trees(
            &mut nodes,
            &[
                "if(gt(ident{name: x}, lit{value: 0}), return(ident{name: x}))",
                "if(gt(ident{name: count}, lit{value: 0}), return(ident{name: count}))",
                "if(gt(ident{name: n}, lit{value: 0}), return(ident{name: n}))",
            ],
        );
        let negatives = trees(
            &mut nodes,
            &[
                "if(gt(ident{name: x}, lit{value: 0}), return(lit{value: 0}))",
                "if(lt(ident{name: x}, lit{value: 0}), return(ident{name: x}))",
                "if(gt(ident{name: x}, lit{value: 0}), block(call(ident{name: log}, ident{name: x})))",
                "return(ident{name: x})",
            ],
        );

        let session = SearchBuilder::new()
            .population_size(50)
            .max_generations(50)
            .stagnation_limit(0)
            .seed(17)
            .positives(positives.clone())
            .negatives(negatives.clone())
            .build()
            .unwrap();
        let mut generations_seen = 0;
        let outcome = session.run_with(&CancelToken::new(), &mut |_: &GenerationSnapshot| generations_seen += 1);

        assert_eq!(outcome.reason, TerminationReason::PerfectScore);
        assert!(outcome.generations <= 50);
        assert_eq!(generations_seen, outcome.generations + 1);

        let best = outcome.best_pattern().unwrap();
        let matcher = Matcher::new(best).unwrap();
        for p in &positives {
            assert!(matcher.in_tree(p).next().is_some(), "{} misses {}", best, p);
        }
        for n in &negatives {
            assert!(matcher.in_tree(n).next().is_none(), "{} matches {}", best, n);
        }
    }

    #[test]
    fn test_empty_positive_set() {
        let mut nodes = NodeFactory::new();
        let result = SearchBuilder::new()
            .negatives(trees(&mut nodes, &["return(x)"]))
            .build();
        assert!(matches!(result, Err(SearchError::EmptyExampleSet)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut nodes = NodeFactory::new();
        let result = SearchBuilder::new()
            .population_size(0)
            .positives(trees(&mut nodes, &["return(x)"]))
            .build();
        assert!(matches!(result, Err(SearchError::InvalidConfig(_))));
    }

    #[test]
    fn test_cancel_returns_best_so_far() {
        let mut nodes = NodeFactory::new();
        // The negative is identical to the positive, so no pattern is perfect.
        let same = "call(ident{name: log}, lit{value: 1})";
        let session = SearchBuilder::new()
            .population_size(10)
            .max_generations(100)
            .stagnation_limit(0)
            .seed(3)
            .positives(trees(&mut nodes, &[same]))
            .negatives(trees(&mut nodes, &[same]))
            .build()
            .unwrap();

        let cancel = CancelToken::new();
        let mut seen: Vec<usize> = Vec::new();
        let outcome = session.run_with(&cancel, &mut |s: &GenerationSnapshot| {
            seen.push(s.generation);
            if s.generation == 2 {
                cancel.cancel();
            }
        });

        assert_eq!(outcome.reason, TerminationReason::Cancelled);
        assert_eq!(outcome.generations, 2);
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(!outcome.best.is_empty());
    }

    #[test]
    fn test_budget_and_stagnation() {
        let mut nodes = NodeFactory::new();
        let same = trees(&mut nodes, &["f(a)", "f(a)"]);
        let session = SearchBuilder::new()
            .population_size(6)
            .max_generations(4)
            .stagnation_limit(0)
            .seed(1)
            .positive(same[0].clone())
            .negative(same[1].clone())
            .build()
            .unwrap();
        let outcome = session.run();
        assert_eq!(outcome.reason, TerminationReason::BudgetExhausted);
        assert_eq!(outcome.generations, 4);

        let session = SearchBuilder::new()
            .population_size(6)
            .max_generations(100)
            .stagnation_limit(3)
            .seed(1)
            .positive(same[0].clone())
            .negative(same[1].clone())
            .build()
            .unwrap();
        let outcome = session.run();
        // best can only improve by shrinking, so the run stalls quickly
        assert_eq!(outcome.reason, TerminationReason::Stagnation);
        assert!(outcome.generations >= 3 && outcome.generations < 100);
    }

    #[test]
    fn test_runs_are_independent() {
        let mut nodes = NodeFactory::new();
        let session = SearchBuilder::new()
            .population_size(8)
            .max_generations(5)
            .seed(12)
            .parallel(false)
            .positives(trees(&mut nodes, &["f(a, b)", "f(c, b)"]))
            .negatives(trees(&mut nodes, &["f(a, a)"]))
            .build()
            .unwrap();
        let first = session.run();
        let second = session.run();
        let show = |o: &SearchOutcome| o.best.iter().map(|i| i.pattern().to_string()).collect::<Vec<_>>();
        assert_eq!(show(&first), show(&second));
        assert_eq!(first.reason, second.reason);
        assert_eq!(first.stats, second.stats);
    }

    #[test]
    fn test_deadline_cancels() {
        let mut nodes = NodeFactory::new();
        let same = "f(a)";
        let session = SearchBuilder::new()
            .population_size(4)
            .max_generations(1_000_000)
            .stagnation_limit(0)
            .deadline(Duration::from_millis(0))
            .positives(trees(&mut nodes, &[same]))
            .negatives(trees(&mut nodes, &[same]))
            .build()
            .unwrap();
        let outcome = session.run_with(&CancelToken::new(), &mut TracingObserver);
        assert_eq!(outcome.reason, TerminationReason::Cancelled);
        assert_eq!(outcome.generations, 0);
    }

    #[test]
    fn test_deep_example_search() {
        let mut nodes = NodeFactory::new();
        let mut deep = nodes.leaf("x");
        for _ in 0..20_000 {
            deep = nodes.node("wrap", vec![deep]);
        }
        let config = SearchConfig {
            population_size: 4,
            max_generations: 1,
            crossover_probability: 0.0,
            parallel: false,
            seed: Some(2),
            ..SearchConfig::default()
        };
        let session = SearchBuilder::new()
            .config(config)
            .positive(deep.clone())
            .negatives(trees(&mut nodes, &["wrap(y)"]))
            .build()
            .unwrap();
        let outcome = session.run();

        assert!(outcome.generations <= 1);
        let best = outcome.best_pattern().unwrap();
        assert!(Matcher::new(best).unwrap().at(&deep).is_some());
        assert!(best.to_string().starts_with("wrap("));
    }

    #[test]
    fn test_unindexed_attributes_do_not_split_examples() {
        let mut nodes = NodeFactory::new();
        let positives = trees(
            &mut nodes,
            &["call(ident{name: log, type: fn1}, lit{value: 1})", "call(ident{name: log, type: fn2}, lit{value: 1})"],
        );
        let session = SearchBuilder::new()
            .population_size(4)
            .max_generations(3)
            .seed(5)
            .index_options(IndexOptions {
                include_attributes: true,
                attribute_keys: Some(vec!["name".into(), "value".into()]),
            })
            .positives(positives)
            .negatives(trees(&mut nodes, &["call(ident{name: warn, type: fn1}, lit{value: 1})"]))
            .build()
            .unwrap();
        let outcome = session.run();

        // Either positive alone already separates the sets once `type` is hidden.
        assert_eq!(outcome.reason, TerminationReason::PerfectScore);
        assert_eq!(outcome.generations, 0);
        assert!(outcome.best.iter().all(|i| !i.pattern().to_string().contains("type")));
    }
}
