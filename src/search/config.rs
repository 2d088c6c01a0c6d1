//! Search configuration.

use crate::fitness::FitnessConfig;
use crate::search::selection::Selection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced before any generation runs.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("at least one positive example is required")]
    EmptyExampleSet,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("malformed configuration: {0}")]
    ConfigFormat(#[from] serde_json::Error),
}

/// Whether placeholders introduced by generalization remember the kind of
/// the node they replaced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderKinds {
    /// `$n:kind`: the placeholder only matches nodes of the replaced kind.
    #[default]
    Constrained,
    /// `$n`: the placeholder matches any subtree.
    Unconstrained,
}

impl PlaceholderKinds {
    pub fn constrains(self) -> bool {
        self == PlaceholderKinds::Constrained
    }
}

/// Configuration for a search session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Individuals kept per generation.
    pub population_size: usize,
    /// Generations bred after the initial population.
    pub max_generations: usize,
    /// Stop after this many generations without improvement (0 = never).
    pub stagnation_limit: usize,
    pub mutation_probability: f64,
    pub crossover_probability: f64,
    pub placeholder_kinds: PlaceholderKinds,
    pub selection: Selection,
    pub fitness: FitnessConfig,
    /// Fresh operator attempts before an offspring falls back to its parent.
    pub operator_retries: usize,
    /// Upper bound on random generalizations per seeded individual.
    pub initial_generalizations: usize,
    /// Distinct individuals reported in the outcome.
    pub report_top: usize,
    /// Score each generation on the rayon pool.
    pub parallel: bool,
    /// RNG seed; drawn at random when absent.
    pub seed: Option<u64>,
    /// Wall-clock limit, checked between generations.
    pub deadline_ms: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            population_size: 50,
            max_generations: 100,
            stagnation_limit: 25,
            mutation_probability: 0.8,
            crossover_probability: 0.5,
            placeholder_kinds: PlaceholderKinds::default(),
            selection: Selection::default(),
            fitness: FitnessConfig::default(),
            operator_retries: 5,
            initial_generalizations: 3,
            report_top: 5,
            parallel: true,
            seed: None,
            deadline_ms: None,
        }
    }
}

impl SearchConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, SearchError> {
        let config: SearchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, SearchError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        let invalid = |msg: &str| -> Result<(), SearchError> { Err(SearchError::InvalidConfig(msg.to_string())) };
        if self.population_size == 0 {
            return invalid("population_size must be at least 1");
        }
        if self.max_generations == 0 {
            return invalid("max_generations must be at least 1");
        }
        for (name, p) in [
            ("mutation_probability", self.mutation_probability),
            ("crossover_probability", self.crossover_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(SearchError::InvalidConfig(format!("{} must lie in [0, 1], got {}", name, p)));
            }
        }
        if self.report_top == 0 {
            return invalid("report_top must be at least 1");
        }
        if let Selection::Tournament { size: 0 } = self.selection {
            return invalid("tournament size must be at least 1");
        }
        self.fitness.check().map_err(SearchError::InvalidConfig)
    }
}
