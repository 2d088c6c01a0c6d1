//! Partial model: a fact index scoped to injected subtrees.
//!
//! Instead of indexing a whole project, the model holds only the subtrees
//! handed to it for a search session. Each root keeps its own fact set and a
//! per-kind node index so the matching engine can restrict its candidates.

use crate::facts::{self, FactSet, IndexOptions};
use crate::pattern::PatternNode;
use crate::syntax::{NodeId, SyntaxNode, Value};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::trace;

/// Everything the model knows about one injected root.
#[derive(Debug)]
struct RootEntry {
    facts: FactSet,
    /// Nodes under the root in pre-order.
    nodes: Vec<SyntaxNode>,
    /// Kind -> positions in `nodes`.
    by_kind: FxHashMap<Arc<str>, Vec<usize>>,
}

impl RootEntry {
    fn new(root: &SyntaxNode, facts: FactSet) -> Self {
        let nodes: Vec<SyntaxNode> = root.descendants().cloned().collect();
        let mut by_kind: FxHashMap<Arc<str>, Vec<usize>> = FxHashMap::default();
        for (i, node) in nodes.iter().enumerate() {
            by_kind.entry(node.kind_tag().clone()).or_default().push(i);
        }
        RootEntry {
            facts,
            nodes,
            by_kind,
        }
    }
}

/// An append-only structural index over a set of example subtrees.
#[derive(Debug, Default)]
pub struct PartialModel {
    options: IndexOptions,
    entries: Vec<RootEntry>,
    roots: Vec<SyntaxNode>,
    /// Root id -> position in `entries`.
    root_index: FxHashMap<NodeId, usize>,
    /// Every node reachable from any root.
    node_index: FxHashMap<NodeId, SyntaxNode>,
    /// Union of all root fact sets.
    facts: FactSet,
}

impl PartialModel {
    /// Create an empty model.
    pub fn new() -> Self {
        Self::with_options(IndexOptions::default())
    }

    pub fn with_options(options: IndexOptions) -> Self {
        PartialModel {
            options,
            entries: Vec::new(),
            roots: Vec::new(),
            root_index: FxHashMap::default(),
            node_index: FxHashMap::default(),
            facts: FactSet::new(),
        }
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// Number of injected roots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index `node` and add it as a root. Adding the same root again is a
    /// no-op; returns whether the root was new.
    pub fn add_subtree(&mut self, node: SyntaxNode) -> bool {
        if self.root_index.contains_key(&node.id()) {
            return false;
        }
        let facts = facts::index_with(&node, &self.options);
        self.insert_entry(node, facts);
        true
    }

    /// Add several roots, indexing them in parallel. Returns how many were new.
    pub fn add_subtrees(&mut self, nodes: impl IntoIterator<Item = SyntaxNode>) -> usize {
        let mut fresh: Vec<SyntaxNode> = Vec::new();
        for node in nodes {
            let seen = self.root_index.contains_key(&node.id())
                || fresh.iter().any(|n| n.id() == node.id());
            if !seen {
                fresh.push(node);
            }
        }

        let fact_sets = facts::index_all(&fresh, &self.options);
        let added = fresh.len();
        for (node, facts) in fresh.into_iter().zip(fact_sets) {
            self.insert_entry(node, facts);
        }
        added
    }

    fn insert_entry(&mut self, node: SyntaxNode, facts: FactSet) {
        let new_facts = self.facts.union_with(&facts);
        let entry = RootEntry::new(&node, facts);
        for n in &entry.nodes {
            self.node_index.entry(n.id()).or_insert_with(|| n.clone());
        }
        trace!(
            root = node.id(),
            kind = node.kind(),
            nodes = entry.nodes.len(),
            new_facts,
            "indexed subtree"
        );
        self.root_index.insert(node.id(), self.entries.len());
        self.roots.push(node);
        self.entries.push(entry);
    }

    /// Roots in insertion order.
    pub fn roots(&self) -> &[SyntaxNode] {
        &self.roots
    }

    pub fn contains_root(&self, root: &SyntaxNode) -> bool {
        self.root_index.contains_key(&root.id())
    }

    fn entry(&self, root: &SyntaxNode) -> Option<&RootEntry> {
        self.root_index.get(&root.id()).map(|&i| &self.entries[i])
    }

    /// Facts produced by `root`.
    pub fn facts_of(&self, root: &SyntaxNode) -> Option<&FactSet> {
        self.entry(root).map(|e| &e.facts)
    }

    /// Union of the facts of all roots.
    pub fn facts(&self) -> &FactSet {
        &self.facts
    }

    /// Whether attributes under `key` are part of this model.
    pub fn keeps_attribute(&self, key: &str) -> bool {
        self.options.keeps(key)
    }

    /// The attributes of `node` this model indexes; filtered-out keys are
    /// invisible to matching and to the search operators.
    pub fn attributes_of<'a>(&'a self, node: &'a SyntaxNode) -> impl Iterator<Item = (&'a Arc<str>, &'a Value)> + 'a {
        node.attributes()
            .iter()
            .filter(move |(key, _)| self.options.keeps(key))
    }

    /// The fully concrete pattern of `node` as this model sees it.
    pub fn pattern_of(&self, node: &SyntaxNode) -> PatternNode {
        PatternNode::from_node_by(node, |key| self.options.keeps(key))
    }

    /// Look up any indexed node by identity.
    pub fn node(&self, id: NodeId) -> Option<&SyntaxNode> {
        self.node_index.get(&id)
    }

    /// Nodes under `root` in pre-order, the root first.
    pub fn nodes_under(&self, root: &SyntaxNode) -> &[SyntaxNode] {
        self.entry(root).map(|e| e.nodes.as_slice()).unwrap_or(&[])
    }

    /// Nodes of the given kind under `root`, in pre-order.
    pub fn nodes_of_kind<'a>(
        &'a self,
        root: &SyntaxNode,
        kind: &str,
    ) -> impl Iterator<Item = &'a SyntaxNode> + 'a {
        let hits = self
            .entry(root)
            .and_then(|e| e.by_kind.get(kind).map(|positions| (e, positions)));
        hits.into_iter()
            .flat_map(|(e, positions)| positions.iter().map(move |&i| &e.nodes[i]))
    }

    /// Nodes of the given kind under any root.
    pub fn nodes_of_kind_anywhere<'a>(
        &'a self,
        kind: &'a str,
    ) -> impl Iterator<Item = &'a SyntaxNode> + 'a {
        self.entries.iter().flat_map(move |e| {
            e.by_kind
                .get(kind)
                .into_iter()
                .flat_map(move |positions| positions.iter().map(move |&i| &e.nodes[i]))
        })
    }

    /// Every node under every root, root by root in pre-order.
    pub fn all_nodes(&self) -> impl Iterator<Item = &SyntaxNode> {
        self.entries.iter().flat_map(|e| e.nodes.iter())
    }

    /// Distinct node kinds seen in the model, sorted.
    pub fn kinds(&self) -> Vec<Arc<str>> {
        let mut kinds: Vec<Arc<str>> = self
            .entries
            .iter()
            .flat_map(|e| e.by_kind.keys().cloned())
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn stats(&self) -> ModelStats {
        ModelStats {
            num_roots: self.entries.len(),
            num_nodes: self.node_index.len(),
            num_facts: self.facts.len(),
            num_kinds: self.kinds().len(),
        }
    }
}

/// Size summary of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStats {
    pub num_roots: usize,
    pub num_nodes: usize,
    pub num_facts: usize,
    pub num_kinds: usize,
}
