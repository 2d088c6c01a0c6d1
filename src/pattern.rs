//! Structural patterns over syntax trees.
//!
//! A pattern mirrors the shape of a syntax tree, but any position may be a
//! placeholder that stands for an arbitrary (optionally kind-constrained)
//! subtree. Patterns are immutable: every edit returns a new pattern that
//! shares untouched subtrees with the original.

use crate::syntax::{push_children, write_attributes, write_name, Attributes, Piece, SyntaxNode, Value};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;

/// Identifier of a placeholder within one pattern.
pub type PlaceholderId = u32;

/// Child indices leading from the root to a position.
pub type Path = Vec<usize>;

/// Malformed or inapplicable pattern edits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("placeholder ${0} appears with conflicting kind constraints")]
    ConflictingPlaceholder(PlaceholderId),
    #[error("placeholder ${0} cannot have children")]
    PlaceholderWithChildren(PlaceholderId),
    #[error("no pattern node at path {0:?}")]
    InvalidPath(Path),
    #[error("node at path {0:?} is not a placeholder")]
    NotAPlaceholder(Path),
    #[error("node at path {0:?} is already a placeholder")]
    NotConcrete(Path),
    #[error("placeholder requires kind {expected}, found {found}")]
    KindMismatch { expected: Arc<str>, found: Arc<str> },
}

/// A single position in a pattern.
///
/// Comparison, hashing, printing and dropping all run on explicit stacks, so
/// patterns lifted from very deep examples are as safe as the examples.
#[derive(Clone)]
pub enum PatternNode {
    /// Must match a node of exactly this kind, carrying at least these
    /// attributes, with matching children.
    Concrete {
        kind: Arc<str>,
        attributes: Arc<Attributes>,
        children: Arc<[PatternNode]>,
    },
    /// Matches any subtree whose root satisfies the kind constraint.
    Placeholder {
        id: PlaceholderId,
        kind: Option<Arc<str>>,
    },
}

impl PatternNode {
    pub fn concrete(
        kind: impl Into<Arc<str>>,
        attributes: Attributes,
        children: Vec<PatternNode>,
    ) -> Self {
        PatternNode::Concrete {
            kind: kind.into(),
            attributes: Arc::new(attributes),
            children: children.into(),
        }
    }

    pub fn placeholder(id: PlaceholderId, kind: Option<Arc<str>>) -> Self {
        PatternNode::Placeholder { id, kind }
    }

    /// Lift a syntax subtree into a fully concrete pattern.
    pub fn from_node(node: &SyntaxNode) -> Self {
        Self::from_node_by(node, |_| true)
    }

    /// Lift a syntax subtree, keeping only the attributes whose key passes
    /// `keep`.
    pub fn from_node_by(node: &SyntaxNode, keep: impl Fn(&str) -> bool) -> Self {
        let lift = |n: &SyntaxNode, children: Vec<PatternNode>| {
            let attributes: Attributes = n
                .attributes()
                .iter()
                .filter(|(key, _)| keep(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            PatternNode::Concrete {
                kind: n.kind_tag().clone(),
                attributes: Arc::new(attributes),
                children: children.into(),
            }
        };

        // Finished subtrees collect in `built`; once the stack drains it holds
        // exactly the root's children in order.
        let mut stack: Vec<(&SyntaxNode, bool)> = node.children().iter().rev().map(|c| (c, false)).collect();
        let mut built: Vec<PatternNode> = Vec::new();
        while let Some((n, expanded)) = stack.pop() {
            if expanded {
                let start = built.len() - n.arity();
                let children: Vec<PatternNode> = built.drain(start..).collect();
                built.push(lift(n, children));
            } else {
                stack.push((n, true));
                for child in n.children().iter().rev() {
                    stack.push((child, false));
                }
            }
        }
        lift(node, built)
    }

    /// Kind of a concrete node, or the constraint of a placeholder.
    pub fn kind(&self) -> Option<&str> {
        self.kind_tag().map(|k| &**k)
    }

    pub fn kind_tag(&self) -> Option<&Arc<str>> {
        match self {
            PatternNode::Concrete { kind, .. } => Some(kind),
            PatternNode::Placeholder { kind, .. } => kind.as_ref(),
        }
    }

    pub fn children(&self) -> &[PatternNode] {
        match self {
            PatternNode::Concrete { children, .. } => children,
            PatternNode::Placeholder { .. } => &[],
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            PatternNode::Concrete { attributes, .. } => Some(attributes),
            PatternNode::Placeholder { .. } => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, PatternNode::Placeholder { .. })
    }

    pub fn as_placeholder(&self) -> Option<PlaceholderId> {
        match self {
            PatternNode::Placeholder { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Number of pattern nodes in this subtree.
    pub fn size(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children());
        }
        count
    }

    fn with_child(&self, index: usize, child: PatternNode) -> PatternNode {
        match self {
            PatternNode::Concrete {
                kind,
                attributes,
                children,
            } => {
                let mut children = children.to_vec();
                children[index] = child;
                PatternNode::Concrete {
                    kind: kind.clone(),
                    attributes: attributes.clone(),
                    children: children.into(),
                }
            }
            PatternNode::Placeholder { .. } => self.clone(),
        }
    }

    /// Rebuild this subtree with every placeholder passed through `f`.
    /// Placeholder-free subtrees are shared with the original.
    fn map_placeholders(
        &self,
        f: &mut impl FnMut(PlaceholderId, &Option<Arc<str>>) -> PatternNode,
    ) -> PatternNode {
        // Rebuilt subtrees collect in `built`, flagged when they differ from
        // the original.
        let mut stack: Vec<(&PatternNode, bool)> = vec![(self, false)];
        let mut built: Vec<(PatternNode, bool)> = Vec::new();
        while let Some((node, expanded)) = stack.pop() {
            match node {
                PatternNode::Placeholder { id, kind } => built.push((f(*id, kind), true)),
                PatternNode::Concrete { children, .. } if !expanded => {
                    stack.push((node, true));
                    stack.extend(children.iter().rev().map(|c| (c, false)));
                }
                PatternNode::Concrete {
                    kind,
                    attributes,
                    children,
                } => {
                    let start = built.len() - children.len();
                    let rebuilt: Vec<(PatternNode, bool)> = built.drain(start..).collect();
                    if rebuilt.iter().any(|(_, changed)| *changed) {
                        let children: Vec<PatternNode> = rebuilt.into_iter().map(|(n, _)| n).collect();
                        let node = PatternNode::Concrete {
                            kind: kind.clone(),
                            attributes: attributes.clone(),
                            children: children.into(),
                        };
                        built.push((node, true));
                    } else {
                        built.push((node.clone(), false));
                    }
                }
            }
        }
        built.pop().map_or_else(|| self.clone(), |(node, _)| node)
    }
}

/// Move the children out of a uniquely owned child list, leaving bare
/// placeholders behind. Shared lists are left to their other owners.
fn take_children(children: &mut Arc<[PatternNode]>) -> Vec<PatternNode> {
    if children.iter().all(PatternNode::is_placeholder) {
        return Vec::new();
    }
    match Arc::get_mut(children) {
        Some(slots) => slots
            .iter_mut()
            .map(|slot| std::mem::replace(slot, PatternNode::placeholder(0, None)))
            .collect(),
        None => Vec::new(),
    }
}

impl Drop for PatternNode {
    fn drop(&mut self) {
        let PatternNode::Concrete { children, .. } = self else {
            return;
        };
        let mut stack = take_children(children);
        while let Some(mut node) = stack.pop() {
            if let PatternNode::Concrete { children, .. } = &mut node {
                stack.extend(take_children(children));
            }
        }
    }
}

impl PartialEq for PatternNode {
    fn eq(&self, other: &Self) -> bool {
        let mut stack = vec![(self, other)];
        while let Some(pair) = stack.pop() {
            match pair {
                (
                    PatternNode::Placeholder { id: a, kind: ka },
                    PatternNode::Placeholder { id: b, kind: kb },
                ) => {
                    if a != b || ka != kb {
                        return false;
                    }
                }
                (
                    PatternNode::Concrete {
                        kind: ka,
                        attributes: aa,
                        children: ca,
                    },
                    PatternNode::Concrete {
                        kind: kb,
                        attributes: ab,
                        children: cb,
                    },
                ) => {
                    if ka != kb || ca.len() != cb.len() || aa != ab {
                        return false;
                    }
                    if !Arc::ptr_eq(ca, cb) {
                        stack.extend(ca.iter().zip(cb.iter()));
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

impl Eq for PatternNode {}

impl Hash for PatternNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                PatternNode::Placeholder { id, kind } => {
                    0u8.hash(state);
                    id.hash(state);
                    kind.hash(state);
                }
                PatternNode::Concrete {
                    kind,
                    attributes,
                    children,
                } => {
                    1u8.hash(state);
                    kind.hash(state);
                    attributes.hash(state);
                    children.len().hash(state);
                    stack.extend(children.iter().rev());
                }
            }
        }
    }
}

impl fmt::Display for PatternNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stack = vec![Piece::Node(self)];
        while let Some(piece) = stack.pop() {
            let node = match piece {
                Piece::Text(text) => {
                    f.write_str(text)?;
                    continue;
                }
                Piece::Node(node) => node,
            };
            match node {
                PatternNode::Placeholder { id, kind } => {
                    write!(f, "${}", id)?;
                    if let Some(k) = kind {
                        f.write_str(":")?;
                        write_name(f, k)?;
                    }
                }
                PatternNode::Concrete {
                    kind,
                    attributes,
                    children,
                } => {
                    write_name(f, kind)?;
                    write_attributes(f, attributes)?;
                    if !children.is_empty() {
                        f.write_str("(")?;
                        push_children(&mut stack, children);
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PatternNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A structural template over syntax trees.
///
/// Equality is structural: two patterns are equal iff their trees are
/// identical including placeholder ids. Use [`Pattern::canonicalize`] to
/// compare modulo placeholder renaming.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pattern {
    root: PatternNode,
}

impl Pattern {
    pub fn new(root: PatternNode) -> Self {
        Pattern { root }
    }

    pub fn leaf(kind: impl Into<Arc<str>>, attributes: Attributes) -> Self {
        Pattern::new(PatternNode::concrete(kind, attributes, Vec::new()))
    }

    pub fn placeholder(id: PlaceholderId, kind: Option<Arc<str>>) -> Self {
        Pattern::new(PatternNode::placeholder(id, kind))
    }

    pub fn compose(
        kind: impl Into<Arc<str>>,
        attributes: Attributes,
        children: Vec<Pattern>,
    ) -> Self {
        Pattern::new(PatternNode::concrete(
            kind,
            attributes,
            children.into_iter().map(|p| p.root).collect(),
        ))
    }

    /// The fully concrete pattern of a syntax subtree.
    pub fn from_node(node: &SyntaxNode) -> Self {
        Pattern::new(PatternNode::from_node(node))
    }

    pub fn root(&self) -> &PatternNode {
        &self.root
    }

    pub fn into_root(self) -> PatternNode {
        self.root
    }

    pub fn size(&self) -> usize {
        self.root.size()
    }

    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(&self.root, 1usize)];
        while let Some((node, d)) = stack.pop() {
            max = max.max(d);
            stack.extend(node.children().iter().map(|c| (c, d + 1)));
        }
        max
    }

    /// Node at `path`, if any.
    pub fn get(&self, path: &[usize]) -> Option<&PatternNode> {
        let mut node = &self.root;
        for &i in path {
            node = node.children().get(i)?;
        }
        Some(node)
    }

    /// Pre-order iterator over the nodes; position `i` here is the index
    /// [`Pattern::path_of`] resolves.
    pub fn nodes(&self) -> Nodes<'_> {
        Nodes {
            stack: vec![&self.root],
        }
    }

    /// Pre-order traversal yielding each position with its own path. Every
    /// step copies a path, so prefer [`Pattern::nodes`] on deep patterns.
    pub fn walk(&self) -> PatternWalk<'_> {
        PatternWalk {
            stack: vec![(Vec::new(), &self.root)],
        }
    }

    /// Pre-order visit with the current path; stops once `visit` returns
    /// false.
    fn visit(&self, mut visit: impl FnMut(&[usize], &PatternNode) -> bool) {
        if !visit(&[], &self.root) {
            return;
        }
        let mut frames: Vec<(&PatternNode, usize)> = vec![(&self.root, 0)];
        let mut path: Path = Vec::new();
        while let Some(frame) = frames.last_mut() {
            let node: &PatternNode = frame.0;
            match node.children().get(frame.1) {
                Some(child) => {
                    path.push(frame.1);
                    frame.1 += 1;
                    if !visit(&path, child) {
                        return;
                    }
                    frames.push((child, 0));
                }
                None => {
                    frames.pop();
                    path.pop();
                }
            }
        }
    }

    /// Path of the `index`-th node in pre-order.
    pub fn path_of(&self, index: usize) -> Option<Path> {
        let mut seen = 0;
        let mut found = None;
        self.visit(|path, _| {
            if seen == index {
                found = Some(path.to_vec());
                return false;
            }
            seen += 1;
            true
        });
        found
    }

    fn paths_where(&self, keep: impl Fn(&PatternNode) -> bool) -> Vec<Path> {
        let mut out = Vec::new();
        self.visit(|path, node| {
            if keep(node) {
                out.push(path.to_vec());
            }
            true
        });
        out
    }

    /// All paths in pre-order, the root (empty path) first.
    pub fn paths(&self) -> Vec<Path> {
        self.paths_where(|_| true)
    }

    pub fn concrete_paths(&self) -> Vec<Path> {
        self.paths_where(|n| !n.is_placeholder())
    }

    pub fn placeholder_paths(&self) -> Vec<Path> {
        self.paths_where(PatternNode::is_placeholder)
    }

    pub fn is_ground(&self) -> bool {
        self.nodes().all(|n| !n.is_placeholder())
    }

    /// Distinct placeholder ids.
    pub fn placeholder_ids(&self) -> BTreeSet<PlaceholderId> {
        self.nodes().filter_map(PatternNode::as_placeholder).collect()
    }

    /// Placeholder ids with their kind constraints; fails if an id is used
    /// with two different constraints.
    pub fn placeholders(&self) -> Result<BTreeMap<PlaceholderId, Option<Arc<str>>>, PatternError> {
        let mut seen: BTreeMap<PlaceholderId, Option<Arc<str>>> = BTreeMap::new();
        for node in self.nodes() {
            if let PatternNode::Placeholder { id, kind } = node {
                match seen.get(id) {
                    Some(existing) if existing != kind => {
                        return Err(PatternError::ConflictingPlaceholder(*id));
                    }
                    Some(_) => {}
                    None => {
                        seen.insert(*id, kind.clone());
                    }
                }
            }
        }
        Ok(seen)
    }

    /// Check the pattern is well formed.
    pub fn validate(&self) -> Result<(), PatternError> {
        self.placeholders().map(|_| ())
    }

    /// Smallest id not used by any placeholder.
    pub fn next_placeholder_id(&self) -> PlaceholderId {
        self.placeholder_ids()
            .iter()
            .next_back()
            .map_or(0, |max| max + 1)
    }

    /// Replace the subtree at `path`, sharing every untouched sibling.
    pub fn replace_at(&self, path: &[usize], replacement: PatternNode) -> Result<Pattern, PatternError> {
        let mut spine: Vec<&PatternNode> = Vec::with_capacity(path.len());
        let mut current = &self.root;
        for &i in path {
            let child = current
                .children()
                .get(i)
                .ok_or_else(|| PatternError::InvalidPath(path.to_vec()))?;
            spine.push(current);
            current = child;
        }

        let mut node = replacement;
        for (&i, parent) in path.iter().zip(spine).rev() {
            node = parent.with_child(i, node);
        }
        Ok(Pattern::new(node))
    }

    /// Replace the concrete subtree at `path` with a fresh placeholder. When
    /// `constrain` is set the placeholder keeps the kind of the replaced node.
    pub fn generalize_at(&self, path: &[usize], constrain: bool) -> Result<Pattern, PatternError> {
        let target = self
            .get(path)
            .ok_or_else(|| PatternError::InvalidPath(path.to_vec()))?;
        if target.is_placeholder() {
            return Err(PatternError::NotConcrete(path.to_vec()));
        }
        let kind = if constrain { target.kind_tag().cloned() } else { None };
        let fresh = PatternNode::placeholder(self.next_placeholder_id(), kind);
        self.replace_at(path, fresh)
    }

    /// Substitute `replacement` for the placeholder at `path`.
    pub fn specialize_at(&self, path: &[usize], replacement: PatternNode) -> Result<Pattern, PatternError> {
        let target = self
            .get(path)
            .ok_or_else(|| PatternError::InvalidPath(path.to_vec()))?;
        let PatternNode::Placeholder { kind, .. } = target else {
            return Err(PatternError::NotAPlaceholder(path.to_vec()));
        };
        if let Some(expected) = kind {
            match replacement.kind_tag() {
                Some(found) if found == expected => {}
                Some(found) => {
                    return Err(PatternError::KindMismatch {
                        expected: expected.clone(),
                        found: found.clone(),
                    })
                }
                None => {
                    return Err(PatternError::KindMismatch {
                        expected: expected.clone(),
                        found: Arc::from("_"),
                    })
                }
            }
        }
        let result = self.replace_at(path, replacement)?;
        result.validate()?;
        Ok(result)
    }

    /// Set (or overwrite) a required attribute on the concrete node at `path`.
    pub fn with_attribute(
        &self,
        path: &[usize],
        key: impl Into<Arc<str>>,
        value: Value,
    ) -> Result<Pattern, PatternError> {
        self.edit_attributes(path, |attrs| {
            attrs.insert(key.into(), value);
        })
    }

    /// Drop a required attribute from the concrete node at `path`.
    pub fn without_attribute(&self, path: &[usize], key: &str) -> Result<Pattern, PatternError> {
        self.edit_attributes(path, |attrs| {
            attrs.remove(key);
        })
    }

    fn edit_attributes(
        &self,
        path: &[usize],
        edit: impl FnOnce(&mut Attributes),
    ) -> Result<Pattern, PatternError> {
        match self.get(path) {
            Some(PatternNode::Concrete {
                kind,
                attributes,
                children,
            }) => {
                let mut attrs = Attributes::clone(attributes);
                edit(&mut attrs);
                let node = PatternNode::Concrete {
                    kind: kind.clone(),
                    attributes: Arc::new(attrs),
                    children: children.clone(),
                };
                self.replace_at(path, node)
            }
            Some(PatternNode::Placeholder { .. }) => Err(PatternError::NotConcrete(path.to_vec())),
            None => Err(PatternError::InvalidPath(path.to_vec())),
        }
    }

    /// Rename every occurrence of placeholder `from` to `into`, so both
    /// positions must bind equal subtrees. Fails if the two carry
    /// different kind constraints.
    pub fn merge_placeholders(&self, into: PlaceholderId, from: PlaceholderId) -> Result<Pattern, PatternError> {
        let merged = Pattern::new(self.root.map_placeholders(&mut |id, kind| {
            let id = if id == from { into } else { id };
            PatternNode::placeholder(id, kind.clone())
        }));
        merged.validate()?;
        Ok(merged)
    }

    /// Set the kind constraint of every occurrence of placeholder `target`.
    pub fn constrain_placeholder(&self, target: PlaceholderId, constraint: Option<Arc<str>>) -> Pattern {
        Pattern::new(self.root.map_placeholders(&mut |id, kind| {
            let kind = if id == target { constraint.clone() } else { kind.clone() };
            PatternNode::placeholder(id, kind)
        }))
    }

    /// Shift every placeholder id by `offset`.
    pub fn rename_placeholders(&self, offset: PlaceholderId) -> Pattern {
        Pattern::new(
            self.root
                .map_placeholders(&mut |id, kind| PatternNode::placeholder(id + offset, kind.clone())),
        )
    }

    /// Renumber placeholders in order of first occurrence.
    pub fn canonicalize(&self) -> Pattern {
        let mut ids: FxHashMap<PlaceholderId, PlaceholderId> = FxHashMap::default();
        for node in self.nodes() {
            if let Some(id) = node.as_placeholder() {
                let next = ids.len() as PlaceholderId;
                ids.entry(id).or_insert(next);
            }
        }
        Pattern::new(
            self.root
                .map_placeholders(&mut |id, kind| PatternNode::placeholder(ids[&id], kind.clone())),
        )
    }
}

impl From<PatternNode> for Pattern {
    fn from(root: PatternNode) -> Self {
        Pattern::new(root)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

/// Pre-order iterator over pattern nodes.
pub struct Nodes<'a> {
    stack: Vec<&'a PatternNode>,
}

impl<'a> Iterator for Nodes<'a> {
    type Item = &'a PatternNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev());
        Some(node)
    }
}

/// Pre-order walk over a pattern with explicit paths.
pub struct PatternWalk<'a> {
    stack: Vec<(Path, &'a PatternNode)>,
}

impl<'a> Iterator for PatternWalk<'a> {
    type Item = (Path, &'a PatternNode);

    fn next(&mut self) -> Option<Self::Item> {
        let (path, node) = self.stack.pop()?;
        for (i, child) in node.children().iter().enumerate().rev() {
            let mut child_path = path.clone();
            child_path.push(i);
            self.stack.push((child_path, child));
        }
        Some((path, node))
    }
}
