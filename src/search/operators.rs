//! Mutation and crossover.
//!
//! Operators never mutate in place; each returns a new pattern. An operator
//! that finds nothing to act on, or that would produce a malformed pattern,
//! reports an error so the engine can retry with another operator.

use crate::matcher::Matcher;
use crate::model::PartialModel;
use crate::pattern::{Pattern, PatternError, PatternNode, PlaceholderId};
use crate::search::config::PlaceholderKinds;
use crate::syntax::{SyntaxNode, Value};
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The kinds of point mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mutation {
    /// Replace a concrete subtree with a fresh placeholder.
    Generalize,
    /// Replace a placeholder with a subtree taken from a positive example.
    Specialize,
    /// Drop, add or replace a required attribute.
    SwapAttribute,
    /// Give two placeholders the same id, so they must bind equal subtrees.
    MergePlaceholders,
    /// Add or remove a placeholder's kind constraint.
    ToggleConstraint,
}

impl Mutation {
    pub const ALL: [Mutation; 5] = [
        Mutation::Generalize,
        Mutation::Specialize,
        Mutation::SwapAttribute,
        Mutation::MergePlaceholders,
        Mutation::ToggleConstraint,
    ];

    pub fn random<R: Rng>(rng: &mut R) -> Mutation {
        Mutation::ALL[rng.random_range(0..Mutation::ALL.len())]
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mutation::Generalize => "generalize",
            Mutation::Specialize => "specialize",
            Mutation::SwapAttribute => "swap-attribute",
            Mutation::MergePlaceholders => "merge-placeholders",
            Mutation::ToggleConstraint => "toggle-constraint",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperatorError {
    #[error("{0} has nothing to act on")]
    NotApplicable(Mutation),
    #[error("no kind-compatible crossover point")]
    NoCrossoverPoint,
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Variation operators bound to the pool of positive examples.
#[derive(Clone, Copy, Debug)]
pub struct Operators<'m> {
    pool: &'m PartialModel,
    kinds: PlaceholderKinds,
}

impl<'m> Operators<'m> {
    pub fn new(pool: &'m PartialModel, kinds: PlaceholderKinds) -> Self {
        Operators { pool, kinds }
    }

    /// Apply one specific mutation.
    pub fn mutate<R: Rng>(
        &self,
        mutation: Mutation,
        pattern: &Pattern,
        rng: &mut R,
    ) -> Result<Pattern, OperatorError> {
        let mutant = match mutation {
            Mutation::Generalize => self.generalize(pattern, rng)?,
            Mutation::Specialize => self.specialize(pattern, rng)?,
            Mutation::SwapAttribute => self.swap_attribute(pattern, rng)?,
            Mutation::MergePlaceholders => self.merge_placeholders(pattern, rng)?,
            Mutation::ToggleConstraint => self.toggle_constraint(pattern, rng)?,
        };
        mutant.validate()?;
        Ok(mutant)
    }

    fn generalize<R: Rng>(&self, pattern: &Pattern, rng: &mut R) -> Result<Pattern, OperatorError> {
        let not_applicable = OperatorError::NotApplicable(Mutation::Generalize);
        let concrete: Vec<usize> = positions(pattern, |n| !n.is_placeholder());
        let &index = pick(&concrete, rng).ok_or(not_applicable.clone())?;
        let path = pattern.path_of(index).ok_or(not_applicable)?;
        Ok(pattern.generalize_at(&path, self.kinds.constrains())?)
    }

    fn specialize<R: Rng>(&self, pattern: &Pattern, rng: &mut R) -> Result<Pattern, OperatorError> {
        let not_applicable = OperatorError::NotApplicable(Mutation::Specialize);
        let paths = pattern.placeholder_paths();
        let path = pick(&paths, rng).ok_or(not_applicable.clone())?;
        let donors: Vec<&SyntaxNode> = match pattern.get(path).and_then(PatternNode::kind) {
            Some(kind) => self.pool.nodes_of_kind_anywhere(kind).collect(),
            None => self.pool.all_nodes().collect(),
        };
        let donor = pick(&donors, rng).ok_or(not_applicable)?;

        // Either the whole donor subtree or just its root with fresh
        // placeholders for children.
        let replacement = if donor.is_leaf() || rng.random_bool(0.5) {
            self.pool.pattern_of(donor)
        } else {
            let first = pattern.next_placeholder_id();
            let children = donor
                .children()
                .iter()
                .zip(first..)
                .map(|(child, id)| {
                    let kind = self.kinds.constrains().then(|| child.kind_tag().clone());
                    PatternNode::placeholder(id, kind)
                })
                .collect();
            let attributes = self
                .pool
                .attributes_of(donor)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            PatternNode::concrete(donor.kind_tag().clone(), attributes, children)
        };
        Ok(pattern.specialize_at(path, replacement)?)
    }

    fn swap_attribute<R: Rng>(&self, pattern: &Pattern, rng: &mut R) -> Result<Pattern, OperatorError> {
        let nodes: Vec<&PatternNode> = pattern.nodes().collect();
        let mut concrete: Vec<usize> = (0..nodes.len()).filter(|&i| !nodes[i].is_placeholder()).collect();
        concrete.shuffle(rng);
        // Indexed attribute values seen in the pool, per kind.
        let mut seen: FxHashMap<&str, Vec<(&Arc<str>, &Value)>> = FxHashMap::default();
        for index in concrete {
            let PatternNode::Concrete { kind, attributes, .. } = nodes[index] else {
                continue;
            };
            let values = seen.entry(&**kind).or_insert_with(|| {
                let mut values: Vec<(&Arc<str>, &Value)> = self
                    .pool
                    .nodes_of_kind_anywhere(kind)
                    .flat_map(|n| self.pool.attributes_of(n))
                    .collect();
                values.sort();
                values.dedup();
                values
            });
            let observed: Vec<(&Arc<str>, &Value)> = values
                .iter()
                .copied()
                .filter(|(key, value)| attributes.get(*key) != Some(*value))
                .collect();

            let can_drop = !attributes.is_empty();
            let can_set = !observed.is_empty();
            let drop = match (can_drop, can_set) {
                (false, false) => continue,
                (true, false) => true,
                (false, true) => false,
                (true, true) => rng.random_bool(0.5),
            };

            let path = pattern
                .path_of(index)
                .ok_or(OperatorError::NotApplicable(Mutation::SwapAttribute))?;
            return if drop {
                let keys: Vec<&Arc<str>> = attributes.keys().collect();
                let key = keys[rng.random_range(0..keys.len())];
                Ok(pattern.without_attribute(&path, key)?)
            } else {
                let (key, value) = observed[rng.random_range(0..observed.len())];
                Ok(pattern.with_attribute(&path, key.clone(), value.clone())?)
            };
        }
        Err(OperatorError::NotApplicable(Mutation::SwapAttribute))
    }

    fn merge_placeholders<R: Rng>(&self, pattern: &Pattern, rng: &mut R) -> Result<Pattern, OperatorError> {
        let placeholders = pattern.placeholders()?;
        let ids: Vec<(&PlaceholderId, &Option<Arc<str>>)> = placeholders.iter().collect();
        let mut pairs: Vec<(PlaceholderId, PlaceholderId)> = Vec::new();
        for (i, (a, ka)) in ids.iter().enumerate() {
            for (b, kb) in &ids[i + 1..] {
                if ka == kb {
                    pairs.push((**a, **b));
                }
            }
        }
        let &(into, from) = pick(&pairs, rng).ok_or(OperatorError::NotApplicable(Mutation::MergePlaceholders))?;
        Ok(pattern.merge_placeholders(into, from)?)
    }

    fn toggle_constraint<R: Rng>(&self, pattern: &Pattern, rng: &mut R) -> Result<Pattern, OperatorError> {
        let placeholders = pattern.placeholders()?;
        let ids: Vec<(&PlaceholderId, &Option<Arc<str>>)> = placeholders.iter().collect();
        let &(&id, kind) = pick(&ids, rng).ok_or(OperatorError::NotApplicable(Mutation::ToggleConstraint))?;

        if kind.is_some() {
            return Ok(pattern.constrain_placeholder(id, None));
        }
        // Prefer the kind the placeholder actually binds in an example, so
        // the constraint keeps at least that example matching.
        let bound = Matcher::new(pattern)?
            .in_model(self.pool)
            .find_map(|(_, _, binding)| binding.get(id).map(|n| n.kind_tag().clone()));
        let kind = match bound {
            Some(kind) => kind,
            None => {
                let kinds = self.pool.kinds();
                pick(&kinds, rng)
                    .cloned()
                    .ok_or(OperatorError::NotApplicable(Mutation::ToggleConstraint))?
            }
        };
        Ok(pattern.constrain_placeholder(id, Some(kind)))
    }

    /// Swap one pair of kind-compatible subtrees between two parents.
    ///
    /// A position of `a` is drawn among those with at least one partner in
    /// `b`, then a partner uniformly among its compatible positions. The two
    /// roots never pair with each other, and a draw of two equal subtrees is
    /// redrawn a bounded number of times. Placeholders carried into a child
    /// are renumbered past that child's own ids, so both children are well
    /// formed whenever the parents are.
    pub fn crossover<R: Rng>(
        &self,
        a: &Pattern,
        b: &Pattern,
        rng: &mut R,
    ) -> Result<(Pattern, Pattern), OperatorError> {
        let a_nodes: Vec<&PatternNode> = a.nodes().collect();
        let b_nodes: Vec<&PatternNode> = b.nodes().collect();

        // Positions of `b` grouped by kind; unconstrained placeholders pair
        // with anything.
        let mut by_kind: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
        let mut open: Vec<usize> = Vec::new();
        for (j, node) in b_nodes.iter().enumerate() {
            match node.kind() {
                Some(kind) => by_kind.entry(kind).or_default().push(j),
                None => open.push(j),
            }
        }
        let all: Vec<usize> = (0..b_nodes.len()).collect();
        let partners = |i: usize| -> Vec<usize> {
            let mut js: Vec<usize> = match a_nodes[i].kind() {
                None => all.clone(),
                Some(kind) => {
                    let mut js = by_kind.get(kind).cloned().unwrap_or_default();
                    js.extend(&open);
                    js
                }
            };
            if i == 0 {
                js.retain(|&j| j != 0);
            }
            js
        };

        let candidates: Vec<usize> = (0..a_nodes.len())
            .filter(|&i| match a_nodes[i].kind() {
                None => b_nodes.len() > usize::from(i == 0),
                Some(kind) => {
                    let same = by_kind.get(kind).map_or(0, Vec::len) + open.len();
                    let root_pair = i == 0 && compatible(a_nodes[0], b_nodes[0]);
                    same > usize::from(root_pair)
                }
            })
            .collect();

        for _ in 0..CROSSOVER_DRAWS {
            let Some(&i) = pick(&candidates, rng) else {
                break;
            };
            let js = partners(i);
            let Some(&j) = pick(&js, rng) else {
                continue;
            };
            let (na, nb) = (a_nodes[i], b_nodes[j]);
            if na == nb {
                continue;
            }
            let (Some(pa), Some(pb)) = (a.path_of(i), b.path_of(j)) else {
                continue;
            };

            let into_a = Pattern::new(nb.clone()).rename_placeholders(a.next_placeholder_id());
            let into_b = Pattern::new(na.clone()).rename_placeholders(b.next_placeholder_id());
            let child_a = a.replace_at(&pa, into_a.into_root())?;
            let child_b = b.replace_at(&pb, into_b.into_root())?;
            child_a.validate()?;
            child_b.validate()?;
            return Ok((child_a, child_b));
        }
        Err(OperatorError::NoCrossoverPoint)
    }
}

/// Attempts at drawing a pair of distinct crossover points.
const CROSSOVER_DRAWS: usize = 8;

/// Two positions can trade places if they agree on kind, or if either is an
/// unconstrained placeholder.
fn compatible(a: &PatternNode, b: &PatternNode) -> bool {
    match (a.kind(), b.kind()) {
        (Some(ka), Some(kb)) => ka == kb,
        (None, _) | (_, None) => true,
    }
}

/// Pre-order indices of the nodes satisfying `keep`.
fn positions(pattern: &Pattern, keep: impl Fn(&PatternNode) -> bool) -> Vec<usize> {
    pattern
        .nodes()
        .enumerate()
        .filter(|(_, n)| keep(n))
        .map(|(i, _)| i)
        .collect()
}

fn pick<'a, T, R: Rng>(items: &'a [T], rng: &mut R) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        Some(&items[rng.random_range(0..items.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notation::{parse_pattern, parse_tree};
    use crate::syntax::NodeFactory;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pool(sources: &[&str]) -> PartialModel {
        let mut nodes = NodeFactory::new();
        let mut model = PartialModel::new();
        for src in sources {
            model.add_subtree(parse_tree(src, &mut nodes).unwrap());
        }
        model
    }

    const GUARD: &str = "if(gt(ident{name: x}, lit{value: 0}), return(ident{name: x}))";

    #[test]
    fn test_generalize_adds_placeholder() {
        let model = pool(&[GUARD]);
        let ops = Operators::new(&model, PlaceholderKinds::Constrained);
        let mut rng = StdRng::seed_from_u64(11);
        let p = parse_pattern(GUARD).unwrap();
        for _ in 0..20 {
            let g = ops.mutate(Mutation::Generalize, &p, &mut rng).unwrap();
            assert_eq!(g.placeholder_ids().len(), 1);
            let path = &g.placeholder_paths()[0];
            assert_eq!(g.get(path).and_then(PatternNode::kind), p.get(path).and_then(PatternNode::kind));
        }
        let unconstrained = Operators::new(&model, PlaceholderKinds::Unconstrained);
        let g = unconstrained.mutate(Mutation::Generalize, &p, &mut rng).unwrap();
        assert_eq!(g.placeholders().unwrap().values().next(), Some(&None));
    }

    #[test]
    fn test_specialize_respects_constraint() {
        let model = pool(&[GUARD]);
        let ops = Operators::new(&model, PlaceholderKinds::Constrained);
        let mut rng = StdRng::seed_from_u64(5);
        let p = parse_pattern("if($0:gt, $1:return)").unwrap();
        for _ in 0..20 {
            let s = ops.mutate(Mutation::Specialize, &p, &mut rng).unwrap();
            assert_eq!(s.get(&[0]).and_then(PatternNode::kind), Some("gt"));
            assert_eq!(s.get(&[1]).and_then(PatternNode::kind), Some("return"));
            assert!(s.placeholder_ids().len() < 2 || s.size() > p.size());
        }
        let ground = parse_pattern(GUARD).unwrap();
        assert_eq!(
            ops.mutate(Mutation::Specialize, &ground, &mut rng),
            Err(OperatorError::NotApplicable(Mutation::Specialize))
        );
    }

    #[test]
    fn test_swap_attribute_uses_observed_values() {
        let model = pool(&["ident{name: x}", "ident{name: y}"]);
        let ops = Operators::new(&model, PlaceholderKinds::Constrained);
        let mut rng = StdRng::seed_from_u64(2);
        let p = parse_pattern("ident{name: x}").unwrap();
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..40 {
            let s = ops.mutate(Mutation::SwapAttribute, &p, &mut rng).unwrap();
            seen.insert(s.to_string());
        }
        let expected: std::collections::BTreeSet<String> =
            ["ident", "ident{name: y}"].iter().map(|s| s.to_string()).collect();
        assert_eq!(seen, expected);

        let bare = parse_pattern("call").unwrap();
        assert!(ops.mutate(Mutation::SwapAttribute, &bare, &mut rng).is_err());
    }

    #[test]
    fn test_swap_attribute_skips_unindexed_keys() {
        let mut nodes = NodeFactory::new();
        let mut model = PartialModel::with_options(crate::facts::IndexOptions {
            include_attributes: true,
            attribute_keys: Some(vec!["name".into()]),
        });
        model.add_subtree(parse_tree("ident{name: x, type: int}", &mut nodes).unwrap());
        model.add_subtree(parse_tree("ident{name: y, type: bool}", &mut nodes).unwrap());
        let ops = Operators::new(&model, PlaceholderKinds::Constrained);
        let mut rng = StdRng::seed_from_u64(6);

        let p = Pattern::new(model.pattern_of(&model.roots()[0]));
        assert_eq!(p.to_string(), "ident{name: x}");
        for _ in 0..40 {
            let s = ops.mutate(Mutation::SwapAttribute, &p, &mut rng).unwrap();
            assert!(!s.to_string().contains("type"), "{}", s);
        }
    }

    #[test]
    fn test_merge_introduces_unification() {
        let model = pool(&[GUARD]);
        let ops = Operators::new(&model, PlaceholderKinds::Constrained);
        let mut rng = StdRng::seed_from_u64(8);
        let p = parse_pattern("if(gt($0:ident, $1:lit), return($2:ident))").unwrap();
        let merged = ops.mutate(Mutation::MergePlaceholders, &p, &mut rng).unwrap();
        assert_eq!(merged.to_string(), "if(gt($0:ident, $1:lit), return($0:ident))");

        let lone = parse_pattern("f($0:a, $1:b)").unwrap();
        assert!(ops.mutate(Mutation::MergePlaceholders, &lone, &mut rng).is_err());
    }

    #[test]
    fn test_toggle_constraint() {
        let model = pool(&[GUARD]);
        let ops = Operators::new(&model, PlaceholderKinds::Constrained);
        let mut rng = StdRng::seed_from_u64(4);

        let loose = parse_pattern("if($0, return($1))").unwrap();
        let tight = ops.mutate(Mutation::ToggleConstraint, &loose, &mut rng).unwrap();
        let kinds: Vec<_> = tight.placeholders().unwrap().into_values().flatten().collect();
        assert_eq!(kinds.len(), 1);
        assert!(kinds[0].as_ref() == "gt" || kinds[0].as_ref() == "ident");

        let back = ops.mutate(Mutation::ToggleConstraint, &parse_pattern("f($0:a)").unwrap(), &mut rng).unwrap();
        assert_eq!(back.to_string(), "f($0)");
    }

    #[test]
    fn test_crossover_swaps_compatible_subtrees() {
        let model = pool(&[GUARD]);
        let ops = Operators::new(&model, PlaceholderKinds::Constrained);
        let mut rng = StdRng::seed_from_u64(21);
        let a = parse_pattern("if(gt($0:ident, lit{value: 0}), return($0:ident))").unwrap();
        let b = parse_pattern("if(gt(ident{name: x}, $0:lit), $1:return)").unwrap();
        for _ in 0..20 {
            let (c, d) = ops.crossover(&a, &b, &mut rng).unwrap();
            assert_eq!(c.root().kind(), Some("if"));
            assert_eq!(d.root().kind(), Some("if"));
            assert!(c.validate().is_ok() && d.validate().is_ok());
            assert!(c != a || d != b);
        }
    }

    #[test]
    fn test_crossover_without_point() {
        let model = pool(&[GUARD]);
        let ops = Operators::new(&model, PlaceholderKinds::Constrained);
        let mut rng = StdRng::seed_from_u64(1);
        let a = parse_pattern("f").unwrap();
        let b = parse_pattern("g").unwrap();
        assert_eq!(ops.crossover(&a, &b, &mut rng), Err(OperatorError::NoCrossoverPoint));
    }

    #[test]
    fn test_crossover_on_deep_parents() {
        let mut nodes = NodeFactory::new();
        let mut node = nodes.leaf("x");
        for _ in 0..20_000 {
            node = nodes.node("wrap", vec![node]);
        }
        let mut model = PartialModel::new();
        model.add_subtree(node.clone());
        let ops = Operators::new(&model, PlaceholderKinds::Constrained);
        let mut rng = StdRng::seed_from_u64(9);

        let a = Pattern::from_node(&node);
        let b = a.generalize_at(&a.path_of(15_000).unwrap(), true).unwrap();
        let (c, d) = ops.crossover(&a, &b, &mut rng).unwrap();
        assert_eq!(c.size() + d.size(), a.size() + b.size());
        assert!(c.validate().is_ok() && d.validate().is_ok());
    }
}
