//! Individuals and populations.

use crate::fitness::{Evaluation, Evaluator, Fitness};
use crate::pattern::{Pattern, PatternError};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// A candidate pattern with its lazily computed evaluation.
///
/// Identity is the canonical form of the pattern, so alpha-equivalent
/// patterns are the same individual. Cloning keeps the cached evaluation;
/// any edit goes through [`Individual::new`] and starts unevaluated.
#[derive(Clone, Debug)]
pub struct Individual {
    pattern: Pattern,
    canonical: Pattern,
    evaluation: OnceLock<Evaluation>,
}

impl Individual {
    pub fn new(pattern: Pattern) -> Self {
        let canonical = pattern.canonicalize();
        Individual {
            pattern,
            canonical,
            evaluation: OnceLock::new(),
        }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn canonical(&self) -> &Pattern {
        &self.canonical
    }

    pub fn into_pattern(self) -> Pattern {
        self.pattern
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluation.get().is_some()
    }

    pub fn evaluation(&self) -> Option<&Evaluation> {
        self.evaluation.get()
    }

    /// Cached fitness; unevaluated individuals rank last.
    pub fn fitness(&self) -> Fitness {
        self.evaluation
            .get()
            .map_or_else(Fitness::worst, |e| e.fitness)
    }

    pub fn is_perfect(&self) -> bool {
        self.evaluation.get().is_some_and(Evaluation::is_perfect)
    }

    /// Evaluate once; later calls return the cached result.
    pub fn evaluate(&self, evaluator: &Evaluator) -> Result<&Evaluation, PatternError> {
        if let Some(done) = self.evaluation.get() {
            return Ok(done);
        }
        let evaluation = evaluator.evaluate(&self.pattern)?;
        Ok(self.evaluation.get_or_init(|| evaluation))
    }

    #[cfg(test)]
    pub(crate) fn set_evaluation(&self, evaluation: Evaluation) {
        let _ = self.evaluation.set(evaluation);
    }
}

impl PartialEq for Individual {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Individual {}

impl Hash for Individual {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for Individual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.evaluation.get() {
            Some(e) => write!(f, "{}  [{}]", self.pattern, e.fitness),
            None => write!(f, "{}  [unevaluated]", self.pattern),
        }
    }
}

/// A generation of individuals ordered best first.
#[derive(Clone, Debug, Default)]
pub struct Population {
    individuals: Vec<Individual>,
}

impl Population {
    /// Sort `individuals` best first. The sort is stable, so equally fit
    /// individuals keep their relative order.
    pub fn new(mut individuals: Vec<Individual>) -> Self {
        individuals.sort_by(|a, b| b.fitness().cmp(&a.fitness()));
        Population { individuals }
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn best(&self) -> Option<&Individual> {
        self.individuals.first()
    }

    pub fn worst(&self) -> Option<&Individual> {
        self.individuals.last()
    }

    pub fn as_slice(&self) -> &[Individual] {
        &self.individuals
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Individual> {
        self.individuals.iter()
    }

    pub fn mean_score(&self) -> f64 {
        if self.individuals.is_empty() {
            return 0.0;
        }
        let total: f64 = self.individuals.iter().map(|i| i.fitness().score()).sum();
        total / self.individuals.len() as f64
    }

    /// The best `n` structurally distinct individuals.
    pub fn top_distinct(&self, n: usize) -> Vec<Individual> {
        let mut out: Vec<Individual> = Vec::with_capacity(n);
        for ind in &self.individuals {
            if out.len() == n {
                break;
            }
            if !out.contains(ind) {
                out.push(ind.clone());
            }
        }
        out
    }

    pub fn into_vec(self) -> Vec<Individual> {
        self.individuals
    }
}

impl<'a> IntoIterator for &'a Population {
    type Item = &'a Individual;
    type IntoIter = std::slice::Iter<'a, Individual>;

    fn into_iter(self) -> Self::IntoIter {
        self.individuals.iter()
    }
}
