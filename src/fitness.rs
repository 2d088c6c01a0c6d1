//! Fitness policies and pattern evaluation.
//!
//! A pattern is scored by how many positive example roots it matches and how
//! many negative example roots it avoids. The policy turning those counts
//! into a number is pluggable; every policy stays within `[0, 1]`, rises with
//! positive hits and falls with negative hits.

use crate::matcher::Matcher;
use crate::model::PartialModel;
use crate::pattern::{Pattern, PatternError};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Debug};

/// How many example roots of each polarity a pattern matches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MatchCounts {
    pub positives_matched: usize,
    pub positives_total: usize,
    pub negatives_matched: usize,
    pub negatives_total: usize,
}

impl MatchCounts {
    /// Fraction of positives matched; zero when there are none.
    pub fn positive_rate(&self) -> f64 {
        ratio(self.positives_matched, self.positives_total)
    }

    /// Fraction of negatives matched; zero when there are none.
    pub fn negative_rate(&self) -> f64 {
        ratio(self.negatives_matched, self.negatives_total)
    }

    /// Every positive matched and no negative matched.
    pub fn is_perfect(&self) -> bool {
        self.positives_matched == self.positives_total && self.negatives_matched == 0
    }
}

fn ratio(n: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        n as f64 / total as f64
    }
}

/// Turns match counts into a score in `[0, 1]`.
pub trait FitnessPolicy: Debug + Send + Sync {
    fn score(&self, counts: &MatchCounts) -> f64;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Weighted accuracy: `(wp * recall + wn * (1 - false positive rate)) / (wp + wn)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Weighted {
    pub positive: f64,
    pub negative: f64,
}

impl Default for Weighted {
    fn default() -> Self {
        Weighted {
            positive: 1.0,
            negative: 1.0,
        }
    }
}

impl FitnessPolicy for Weighted {
    fn score(&self, counts: &MatchCounts) -> f64 {
        let total = self.positive + self.negative;
        if total <= 0.0 {
            return 0.0;
        }
        let hit = self.positive * counts.positive_rate();
        let avoided = self.negative * (1.0 - counts.negative_rate());
        ((hit + avoided) / total).clamp(0.0, 1.0)
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

/// F-beta score with matched positives as true positives and matched
/// negatives as false positives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FScore {
    pub beta: f64,
}

impl Default for FScore {
    fn default() -> Self {
        FScore { beta: 1.0 }
    }
}

impl FitnessPolicy for FScore {
    fn score(&self, counts: &MatchCounts) -> f64 {
        let tp = counts.positives_matched as f64;
        let fp = counts.negatives_matched as f64;
        if tp == 0.0 {
            return 0.0;
        }
        let precision = tp / (tp + fp);
        let recall = counts.positive_rate();
        let b2 = self.beta * self.beta;
        let denom = b2 * precision + recall;
        if denom == 0.0 {
            0.0
        } else {
            ((1.0 + b2) * precision * recall / denom).clamp(0.0, 1.0)
        }
    }

    fn name(&self) -> &'static str {
        "f-score"
    }
}

/// Serializable choice of policy.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FitnessConfig {
    Weighted { positive: f64, negative: f64 },
    FScore { beta: f64 },
}

impl Default for FitnessConfig {
    fn default() -> Self {
        let w = Weighted::default();
        FitnessConfig::Weighted {
            positive: w.positive,
            negative: w.negative,
        }
    }
}

impl FitnessConfig {
    /// Describe why the parameters are unusable, if they are.
    pub fn check(&self) -> Result<(), String> {
        match *self {
            FitnessConfig::Weighted { positive, negative } => {
                if !(positive.is_finite() && negative.is_finite()) || positive < 0.0 || negative < 0.0 {
                    return Err("fitness weights must be finite and non-negative".to_string());
                }
                if positive + negative <= 0.0 {
                    return Err("fitness weights must not both be zero".to_string());
                }
                Ok(())
            }
            FitnessConfig::FScore { beta } => {
                if beta.is_finite() && beta > 0.0 {
                    Ok(())
                } else {
                    Err("f-score beta must be finite and positive".to_string())
                }
            }
        }
    }

    pub fn policy(&self) -> Box<dyn FitnessPolicy> {
        match *self {
            FitnessConfig::Weighted { positive, negative } => Box::new(Weighted { positive, negative }),
            FitnessConfig::FScore { beta } => Box::new(FScore { beta }),
        }
    }
}

/// Score of one pattern. Greater is better: a higher score wins, and
/// between equal scores the smaller pattern wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fitness {
    score: OrderedFloat<f64>,
    size: usize,
}

impl Fitness {
    pub fn new(score: f64, size: usize) -> Self {
        Fitness {
            score: OrderedFloat(score),
            size,
        }
    }

    /// The lowest possible fitness, used for discarded candidates.
    pub fn worst() -> Self {
        Fitness {
            score: OrderedFloat(0.0),
            size: usize::MAX,
        }
    }

    pub fn score(&self) -> f64 {
        self.score.into_inner()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Ord for Fitness {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.size.cmp(&self.size))
    }
}

impl PartialOrd for Fitness {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Fitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} (size {})", self.score(), self.size)
    }
}

/// Fitness together with the counts it was computed from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    pub fitness: Fitness,
    pub counts: MatchCounts,
}

impl Evaluation {
    pub fn is_perfect(&self) -> bool {
        self.counts.is_perfect()
    }
}

/// Scores patterns against a fixed pair of example models.
#[derive(Debug)]
pub struct Evaluator {
    positives: PartialModel,
    negatives: PartialModel,
    policy: Box<dyn FitnessPolicy>,
}

impl Evaluator {
    pub fn new(positives: PartialModel, negatives: PartialModel, policy: Box<dyn FitnessPolicy>) -> Self {
        Evaluator {
            positives,
            negatives,
            policy,
        }
    }

    pub fn positives(&self) -> &PartialModel {
        &self.positives
    }

    pub fn negatives(&self) -> &PartialModel {
        &self.negatives
    }

    pub fn policy(&self) -> &dyn FitnessPolicy {
        self.policy.as_ref()
    }

    /// Match counts of `pattern`; malformed patterns are an error.
    pub fn counts(&self, pattern: &Pattern) -> Result<MatchCounts, PatternError> {
        let matcher = Matcher::new(pattern)?;
        Ok(MatchCounts {
            positives_matched: matcher.count_matching_roots(&self.positives),
            positives_total: self.positives.len(),
            negatives_matched: matcher.count_matching_roots(&self.negatives),
            negatives_total: self.negatives.len(),
        })
    }

    pub fn evaluate(&self, pattern: &Pattern) -> Result<Evaluation, PatternError> {
        let counts = self.counts(pattern)?;
        let score = self.policy.score(&counts);
        Ok(Evaluation {
            fitness: Fitness::new(score, pattern.size()),
            counts,
        })
    }
}
