//! Parent selection.

use crate::search::individual::Individual;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How parents are drawn from the current population.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Selection {
    /// Best of `size` individuals drawn uniformly with replacement.
    Tournament { size: usize },
    /// Probability proportional to score.
    Roulette,
}

impl Default for Selection {
    fn default() -> Self {
        Selection::Tournament { size: 3 }
    }
}

impl Selection {
    /// Draw one parent; `None` only for an empty population.
    pub fn select<'p, R: Rng>(&self, population: &'p [Individual], rng: &mut R) -> Option<&'p Individual> {
        if population.is_empty() {
            return None;
        }
        match *self {
            Selection::Tournament { size } => (0..size.max(1))
                .map(|_| &population[rng.random_range(0..population.len())])
                .max_by_key(|ind| ind.fitness()),
            Selection::Roulette => {
                let total: f64 = population.iter().map(|ind| ind.fitness().score()).sum();
                if total <= 0.0 {
                    return population.get(rng.random_range(0..population.len()));
                }
                let mut spin = rng.random_range(0.0..total);
                for ind in population {
                    let score = ind.fitness().score();
                    if spin < score {
                        return Some(ind);
                    }
                    spin -= score;
                }
                population.last()
            }
        }
    }
}
