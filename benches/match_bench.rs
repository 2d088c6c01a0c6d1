//! Benchmarks for indexing, matching and fitness evaluation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use snippet_search::fitness::FitnessConfig;
use snippet_search::{
    index, parse_pattern, parse_tree, Evaluator, Matcher, NodeFactory, PartialModel, Pattern, SyntaxNode,
};

const GUARD: &str = "if(gt(ident{name: x}, lit{value: 0}), return(ident{name: x}))";

fn create_deep_tree(nodes: &mut NodeFactory, depth: usize) -> SyntaxNode {
    let mut node = nodes.leaf("x");
    for _ in 0..depth {
        node = nodes.node("wrap", vec![node]);
    }
    node
}

/// A block of `n` statements, every fourth one a guarded return.
fn create_block(nodes: &mut NodeFactory, n: usize) -> SyntaxNode {
    let stmts = (0..n)
        .map(|i| {
            let src = if i % 4 == 0 {
                format!("if(gt(ident{{name: v{}}}, lit{{value: 0}}), return(ident{{name: v{}}}))", i, i)
            } else {
                format!("call(ident{{name: log}}, lit{{value: {}}})", i)
            };
            parse_tree(&src, nodes).unwrap()
        })
        .collect();
    nodes.node("block", stmts)
}

fn bench_match_ground(c: &mut Criterion) {
    let mut nodes = NodeFactory::new();
    let tree = parse_tree(GUARD, &mut nodes).unwrap();
    let pattern = Pattern::from_node(&tree);
    let matcher = Matcher::new(&pattern).unwrap();

    c.bench_function("match_ground_guard", |b| b.iter(|| matcher.at(black_box(&tree))));
}

fn bench_match_unify(c: &mut Criterion) {
    let mut nodes = NodeFactory::new();
    let tree = parse_tree(GUARD, &mut nodes).unwrap();
    let pattern = parse_pattern("if(gt($0:ident, $1), return($0:ident))").unwrap();
    let matcher = Matcher::new(&pattern).unwrap();

    c.bench_function("match_unify_guard", |b| b.iter(|| matcher.at(black_box(&tree))));
}

fn bench_match_deep(c: &mut Criterion) {
    let mut nodes = NodeFactory::new();
    let tree = create_deep_tree(&mut nodes, 1000);
    let pattern = parse_pattern("wrap(wrap($0))").unwrap();
    let matcher = Matcher::new(&pattern).unwrap();

    c.bench_function("match_deep_1000", |b| b.iter(|| matcher.in_tree(black_box(&tree)).count()));
}

fn bench_match_model(c: &mut Criterion) {
    let mut nodes = NodeFactory::new();
    let mut model = PartialModel::new();
    model.add_subtrees((0..16).map(|_| create_block(&mut nodes, 64)).collect::<Vec<_>>());
    let pattern = parse_pattern("if(gt($0:ident, lit), return($0:ident))").unwrap();
    let matcher = Matcher::new(&pattern).unwrap();

    c.bench_function("match_model_16x64", |b| b.iter(|| matcher.in_model(black_box(&model)).count()));
}

fn bench_index(c: &mut Criterion) {
    let mut nodes = NodeFactory::new();
    let block = create_block(&mut nodes, 64);

    c.bench_function("index_block_64", |b| b.iter(|| index(black_box(&block))));
}

fn bench_canonicalize(c: &mut Criterion) {
    let pattern = parse_pattern("f($5, g($10, $5), $15, h($10))").unwrap();

    c.bench_function("canonicalize", |b| b.iter(|| black_box(&pattern).canonicalize()));
}

fn bench_evaluate(c: &mut Criterion) {
    let mut nodes = NodeFactory::new();
    let mut positives = PartialModel::new();
    let mut negatives = PartialModel::new();
    positives.add_subtrees((0..8).map(|_| create_block(&mut nodes, 32)).collect::<Vec<_>>());
    negatives.add_subtrees((0..8).map(|_| create_block(&mut nodes, 3)).collect::<Vec<_>>());
    let evaluator = Evaluator::new(positives, negatives, FitnessConfig::default().policy());
    let pattern = parse_pattern("if(gt($0:ident, lit), return($0:ident))").unwrap();

    c.bench_function("evaluate_8x32", |b| b.iter(|| evaluator.evaluate(black_box(&pattern))));
}

criterion_group!(
    benches,
    bench_match_ground,
    bench_match_unify,
    bench_match_deep,
    bench_match_model,
    bench_index,
    bench_canonicalize,
    bench_evaluate,
);
criterion_main!(benches);
