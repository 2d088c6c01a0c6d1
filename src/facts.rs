//! Relational facts derived from syntax trees.
//!
//! A subtree is flattened into three relations: the kind of every node,
//! the ordered parent/child edges, and the attribute values. Indexing is a
//! pure fold over the subtree, so independent subtrees can be indexed on
//! different threads.

use crate::syntax::{NodeId, SyntaxNode, Value};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::btree_set;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One structural aspect of a syntax tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Fact {
    NodeKind {
        node: NodeId,
        kind: Arc<str>,
    },
    Child {
        parent: NodeId,
        index: usize,
        child: NodeId,
    },
    Attribute {
        node: NodeId,
        key: Arc<str>,
        value: Value,
    },
}

impl Fact {
    /// The node this fact is about (the parent for edges).
    pub fn subject(&self) -> NodeId {
        match self {
            Fact::NodeKind { node, .. } => *node,
            Fact::Child { parent, .. } => *parent,
            Fact::Attribute { node, .. } => *node,
        }
    }

    fn renumber(&self, ids: &FxHashMap<NodeId, NodeId>) -> Option<Fact> {
        Some(match self {
            Fact::NodeKind { node, kind } => Fact::NodeKind {
                node: *ids.get(node)?,
                kind: kind.clone(),
            },
            Fact::Child {
                parent,
                index,
                child,
            } => Fact::Child {
                parent: *ids.get(parent)?,
                index: *index,
                child: *ids.get(child)?,
            },
            Fact::Attribute { node, key, value } => Fact::Attribute {
                node: *ids.get(node)?,
                key: key.clone(),
                value: value.clone(),
            },
        })
    }
}

/// Controls which facts are emitted for a subtree.
#[derive(Clone, Debug)]
pub struct IndexOptions {
    /// Emit `Attribute` facts at all.
    pub include_attributes: bool,
    /// When set, only these attribute keys are emitted.
    pub attribute_keys: Option<Vec<Arc<str>>>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        IndexOptions {
            include_attributes: true,
            attribute_keys: None,
        }
    }
}

impl IndexOptions {
    /// Structure only: kinds and edges.
    pub fn structural() -> Self {
        IndexOptions {
            include_attributes: false,
            attribute_keys: None,
        }
    }

    /// Whether attributes under `key` are indexed.
    pub fn keeps(&self, key: &str) -> bool {
        self.include_attributes
            && self
                .attribute_keys
                .as_ref()
                .map_or(true, |keys| keys.iter().any(|k| &**k == key))
    }
}

/// An ordered set of facts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FactSet {
    facts: BTreeSet<Fact>,
}

impl FactSet {
    pub fn new() -> Self {
        FactSet {
            facts: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn contains(&self, fact: &Fact) -> bool {
        self.facts.contains(fact)
    }

    /// Insert a fact, returning whether it was new.
    pub fn insert(&mut self, fact: Fact) -> bool {
        self.facts.insert(fact)
    }

    /// Union `other` into this set, returning the number of new facts.
    pub fn union_with(&mut self, other: &FactSet) -> usize {
        let before = self.facts.len();
        self.facts.extend(other.facts.iter().cloned());
        self.facts.len() - before
    }

    pub fn iter(&self) -> btree_set::Iter<'_, Fact> {
        self.facts.iter()
    }

    /// The kind recorded for `node`.
    pub fn kind_of(&self, node: NodeId) -> Option<&Arc<str>> {
        let from = Fact::NodeKind {
            node,
            kind: Arc::from(""),
        };
        match self.facts.range(from..).next() {
            Some(Fact::NodeKind { node: n, kind }) if *n == node => Some(kind),
            _ => None,
        }
    }

    /// Children of `node` in index order.
    pub fn children_of(&self, node: NodeId) -> Vec<NodeId> {
        let from = Fact::Child {
            parent: node,
            index: 0,
            child: 0,
        };
        self.facts
            .range(from..)
            .map_while(|fact| match fact {
                Fact::Child { parent, child, .. } if *parent == node => Some(*child),
                _ => None,
            })
            .collect()
    }

    /// Attribute facts of `node`, ordered by key.
    pub fn attributes_of(&self, node: NodeId) -> Vec<(&Arc<str>, &Value)> {
        let from = Fact::Attribute {
            node,
            key: Arc::from(""),
            value: Value::Int(i64::MIN),
        };
        self.facts
            .range(from..)
            .map_while(|fact| match fact {
                Fact::Attribute { node: n, key, value } if *n == node => Some((key, value)),
                _ => None,
            })
            .collect()
    }

    /// All nodes that have a recorded kind.
    pub fn nodes(&self) -> BTreeSet<NodeId> {
        self.facts
            .iter()
            .filter_map(|fact| match fact {
                Fact::NodeKind { node, .. } => Some(*node),
                _ => None,
            })
            .collect()
    }

    /// Renumber the subtree reachable from `root` in pre-order starting at 0.
    ///
    /// Facts about nodes outside that subtree are dropped. Two structurally
    /// identical subtrees have equal canonical fact sets.
    pub fn canonical(&self, root: NodeId) -> FactSet {
        let mut ids: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if ids.contains_key(&node) {
                continue;
            }
            let next = ids.len() as NodeId;
            ids.insert(node, next);
            stack.extend(self.children_of(node).into_iter().rev());
        }

        FactSet {
            facts: self.facts.iter().filter_map(|f| f.renumber(&ids)).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a FactSet {
    type Item = &'a Fact;
    type IntoIter = btree_set::Iter<'a, Fact>;

    fn into_iter(self) -> Self::IntoIter {
        self.facts.iter()
    }
}

impl FromIterator<Fact> for FactSet {
    fn from_iter<I: IntoIterator<Item = Fact>>(iter: I) -> Self {
        FactSet {
            facts: iter.into_iter().collect(),
        }
    }
}

/// Facts contributed by a single node (not its descendants).
fn local_facts(node: &SyntaxNode, options: &IndexOptions, out: &mut FactSet) {
    let id = node.id();
    out.insert(Fact::NodeKind {
        node: id,
        kind: node.kind_tag().clone(),
    });
    for (index, child) in node.children().iter().enumerate() {
        out.insert(Fact::Child {
            parent: id,
            index,
            child: child.id(),
        });
    }
    for (key, value) in node.attributes() {
        if options.keeps(key) {
            out.insert(Fact::Attribute {
                node: id,
                key: key.clone(),
                value: value.clone(),
            });
        }
    }
}

/// Index a subtree with default options.
pub fn index(node: &SyntaxNode) -> FactSet {
    index_with(node, &IndexOptions::default())
}

/// Index a subtree.
pub fn index_with(node: &SyntaxNode, options: &IndexOptions) -> FactSet {
    node.descendants().fold(FactSet::new(), |mut facts, n| {
        local_facts(n, options, &mut facts);
        facts
    })
}

/// Index independent subtrees in parallel, preserving input order.
pub fn index_all(nodes: &[SyntaxNode], options: &IndexOptions) -> Vec<FactSet> {
    nodes.par_iter().map(|n| index_with(n, options)).collect()
}
