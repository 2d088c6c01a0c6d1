//! Genetic search over structural patterns.
//!
//! - `config`: session configuration and its errors
//! - `individual`: scored candidates and populations
//! - `selection`: parent selection schemes
//! - `operators`: mutation and crossover
//! - `engine`: the generational loop body

pub mod config;
pub mod engine;
pub mod individual;
pub mod operators;
pub mod selection;

pub use config::{PlaceholderKinds, SearchConfig, SearchError};
pub use engine::{GenerationSnapshot, GeneticEngine, SearchStats};
pub use individual::{Individual, Population};
pub use operators::{Mutation, OperatorError, Operators};
pub use selection::Selection;
