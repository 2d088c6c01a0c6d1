//! Snippet search: genetic search for structural code patterns.
//!
//! Given positive and negative example syntax subtrees, evolve patterns with
//! placeholders that match every positive example and none of the negatives.
//!
//! This crate provides:
//! - Syntax trees with stable node identity and a textual notation
//! - Relational facts derived from subtrees
//! - A partial model indexing only the injected example subtrees
//! - Patterns with (optionally kind-constrained) placeholders
//! - Matching with unification of repeated placeholders
//! - Pluggable fitness policies
//! - A genetic search engine and a session driver with cancellation
//!
//! # Example
//!
//! ```rust
//! use snippet_search::{parse_tree, NodeFactory, SearchBuilder};
//!
//! let mut nodes = NodeFactory::new();
//! let session = SearchBuilder::new()
//!     .seed(7)
//!     .population_size(20)
//!     .max_generations(20)
//!     .positive(parse_tree("call(ident{name: log}, lit{value: 1})", &mut nodes).unwrap())
//!     .positive(parse_tree("call(ident{name: log}, lit{value: 2})", &mut nodes).unwrap())
//!     .negative(parse_tree("call(ident{name: warn}, lit{value: 1})", &mut nodes).unwrap())
//!     .build()
//!     .unwrap();
//!
//! let outcome = session.run();
//! assert!(outcome.best_pattern().is_some());
//! assert!(outcome.generations <= 20);
//! println!("{} ({})", outcome.best_pattern().unwrap(), outcome.reason);
//! ```

pub mod driver;
pub mod facts;
pub mod fitness;
pub mod matcher;
pub mod model;
pub mod notation;
pub mod pattern;
pub mod search;
pub mod syntax;

// Re-exports for convenience
pub use driver::{CancelToken, SearchBuilder, SearchObserver, SearchOutcome, SearchSession, TerminationReason, TracingObserver};
pub use facts::{index, index_with, Fact, FactSet, IndexOptions};
pub use fitness::{Evaluation, Evaluator, FScore, Fitness, FitnessConfig, FitnessPolicy, MatchCounts, Weighted};
pub use matcher::{count_matching_roots, match_at, match_model, match_node, matches_anywhere, Binding, Matcher, Matches};
pub use model::{ModelStats, PartialModel};
pub use notation::{parse_pattern, parse_tree, ParseError};
pub use pattern::{Nodes, Path, Pattern, PatternError, PatternNode, PlaceholderId};
pub use search::{
    GenerationSnapshot, Individual, Mutation, PlaceholderKinds, Population, SearchConfig, SearchError, SearchStats,
    Selection,
};
pub use syntax::{attributes, Attributes, NodeFactory, NodeId, SyntaxNode, Value};
