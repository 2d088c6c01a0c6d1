//! Property tests for indexing, matching and the search operators.
//!
//! Random syntax trees are drawn over a small kind alphabet so that
//! structurally equal subtrees are common.

use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::BTreeSet;

use snippet_search::fitness::FitnessConfig;
use snippet_search::search::{GeneticEngine, Operators};
use snippet_search::{
    attributes, index, Evaluator, Matcher, NodeFactory, PartialModel, Pattern, PatternNode, PlaceholderKinds,
    SearchConfig, SyntaxNode, Value,
};

#[derive(Clone, Debug)]
struct Shape {
    kind: &'static str,
    attr: Option<i64>,
    children: Vec<Shape>,
}

fn arb_shape() -> impl Strategy<Value = Shape> {
    // Leaves always carry `v` and inner nodes never do, so a ground pattern
    // matches a node exactly when the two subtrees are equal.
    let leaf = (prop::sample::select(vec!["a", "b", "c"]), 0i64..3).prop_map(|(kind, v)| Shape {
        kind,
        attr: Some(v),
        children: Vec::new(),
    });
    leaf.prop_recursive(4, 24, 3, |inner| {
        (prop::sample::select(vec!["f", "g"]), prop::collection::vec(inner, 1..=3)).prop_map(|(kind, children)| Shape {
            kind,
            attr: None,
            children,
        })
    })
}

fn build(shape: &Shape, nodes: &mut NodeFactory) -> SyntaxNode {
    let children = shape.children.iter().map(|c| build(c, nodes)).collect();
    let attrs = match shape.attr {
        Some(v) => attributes([("v", Value::int(v))]),
        None => Default::default(),
    };
    nodes.node_with(shape.kind, attrs, children)
}

/// Apply up to `picks.len()` generalizations, each at a chosen concrete path.
fn generalize(pattern: &Pattern, picks: &[Index], constrain: bool) -> Pattern {
    let mut out = pattern.clone();
    for pick in picks {
        let paths = out.concrete_paths();
        if paths.is_empty() {
            break;
        }
        out = out.generalize_at(pick.get::<Vec<usize>>(&paths), constrain).unwrap();
    }
    out
}

fn kinds_of(pattern: &Pattern) -> BTreeSet<String> {
    pattern
        .walk()
        .filter_map(|(_, n)| n.kind().map(str::to_string))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn add_subtree_is_idempotent(shape in arb_shape()) {
        let mut nodes = NodeFactory::new();
        let tree = build(&shape, &mut nodes);
        let mut model = PartialModel::new();
        prop_assert!(model.add_subtree(tree.clone()));
        let facts = model.facts().clone();
        prop_assert!(!model.add_subtree(tree.clone()));
        prop_assert_eq!(model.facts(), &facts);
        prop_assert_eq!(model.len(), 1);
    }

    #[test]
    fn index_is_deterministic_modulo_ids(shape in arb_shape(), offset in 1u64..1_000_000) {
        let a = build(&shape, &mut NodeFactory::new());
        let b = build(&shape, &mut NodeFactory::starting_at(offset));
        prop_assert_eq!(index(&a).canonical(a.id()), index(&b).canonical(b.id()));
        prop_assert_eq!(index(&a).len(), index(&b).len());
    }

    #[test]
    fn ground_patterns_match_exactly_equal_subtrees(shape in arb_shape(), at in any::<Index>()) {
        let tree = build(&shape, &mut NodeFactory::new());
        let all: Vec<&SyntaxNode> = tree.descendants().collect();
        let target = *at.get(&all);
        let pattern = Pattern::from_node(target);
        let matcher = Matcher::new(&pattern).unwrap();
        for node in &all {
            prop_assert_eq!(matcher.at(node).is_some(), node.same_shape(target));
        }
        prop_assert!(matcher.at(target).is_some());
    }

    #[test]
    fn generalizing_never_loses_matches(
        shape in arb_shape(),
        at in any::<Index>(),
        picks in prop::collection::vec(any::<Index>(), 1..4),
        constrain in any::<bool>(),
    ) {
        let tree = build(&shape, &mut NodeFactory::new());
        let all: Vec<&SyntaxNode> = tree.descendants().collect();
        let ground = Pattern::from_node(*at.get(&all));
        let general = generalize(&ground, &picks, constrain);

        let specific = Matcher::new(&ground).unwrap();
        let broad = Matcher::new(&general).unwrap();
        for node in &all {
            if specific.at(node).is_some() {
                prop_assert!(broad.at(node).is_some(), "{} lost a match of {}", general, ground);
            }
        }
    }

    #[test]
    fn bindings_are_consistent(
        shape in arb_shape(),
        picks in prop::collection::vec(any::<Index>(), 2..5),
        merge in any::<(Index, Index)>(),
    ) {
        let tree = build(&shape, &mut NodeFactory::new());
        let mut pattern = generalize(&Pattern::from_node(&tree), &picks, true);
        let ids: Vec<_> = pattern.placeholder_ids().into_iter().collect();
        if ids.len() >= 2 {
            let (into, from) = (*merge.0.get(&ids), *merge.1.get(&ids));
            if let Ok(merged) = pattern.merge_placeholders(into, from) {
                pattern = merged;
            }
        }

        let matcher = Matcher::new(&pattern).unwrap();
        for (node, binding) in matcher.in_tree(&tree) {
            let instance = binding.instantiate(&pattern);
            prop_assert!(instance.is_ground());
            prop_assert!(Matcher::new(&instance).unwrap().at(node).is_some());
        }
    }

    #[test]
    fn crossover_is_closed(
        left in arb_shape(),
        right in arb_shape(),
        left_picks in prop::collection::vec(any::<Index>(), 0..3),
        right_picks in prop::collection::vec(any::<Index>(), 0..3),
        seed in any::<u64>(),
    ) {
        use rand::SeedableRng;
        let mut nodes = NodeFactory::new();
        let l = build(&left, &mut nodes);
        let r = build(&right, &mut nodes);
        let mut pool = PartialModel::new();
        pool.add_subtree(l.clone());
        pool.add_subtree(r.clone());

        let a = generalize(&Pattern::from_node(&l), &left_picks, true);
        let b = generalize(&Pattern::from_node(&r), &right_picks, true);
        let ops = Operators::new(&pool, PlaceholderKinds::Constrained);
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

        if let Ok((c, d)) = ops.crossover(&a, &b, &mut rng) {
            prop_assert!(c.validate().is_ok());
            prop_assert!(d.validate().is_ok());
            let parents: BTreeSet<String> = kinds_of(&a).union(&kinds_of(&b)).cloned().collect();
            prop_assert!(kinds_of(&c).is_subset(&parents));
            prop_assert!(kinds_of(&d).is_subset(&parents));
            prop_assert_eq!(c.size() + d.size(), a.size() + b.size());
        }
    }

    #[test]
    fn placeholders_never_carry_children(shape in arb_shape(), picks in prop::collection::vec(any::<Index>(), 1..4)) {
        let tree = build(&shape, &mut NodeFactory::new());
        let pattern = generalize(&Pattern::from_node(&tree), &picks, false);
        for (_, node) in pattern.walk() {
            if let PatternNode::Placeholder { .. } = node {
                prop_assert!(node.children().is_empty());
            }
        }
        prop_assert_eq!(pattern.canonicalize().canonicalize(), pattern.canonicalize());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn best_fitness_is_monotone(positive in arb_shape(), negative in arb_shape(), seed in any::<u64>()) {
        let mut nodes = NodeFactory::new();
        let mut positives = PartialModel::new();
        let mut negatives = PartialModel::new();
        positives.add_subtree(build(&positive, &mut nodes));
        negatives.add_subtree(build(&negative, &mut nodes));
        let evaluator = Evaluator::new(positives, negatives, FitnessConfig::default().policy());

        let config = SearchConfig {
            population_size: 8,
            seed: Some(seed),
            parallel: false,
            ..SearchConfig::default()
        };
        let mut engine = GeneticEngine::new(&config, &evaluator);
        let mut best = engine.initialize().best_fitness;
        for _ in 0..6 {
            let snapshot = engine.step();
            prop_assert!(snapshot.best_fitness >= best);
            prop_assert!(snapshot.best_fitness >= snapshot.worst_fitness);
            best = snapshot.best_fitness;
        }
    }
}
