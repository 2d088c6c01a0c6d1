//! Structural matching of patterns against syntax trees.
//!
//! Matching is one-way unification: placeholders in the pattern bind to
//! subtrees of the syntax tree, and a placeholder that occurs more than once
//! must bind structurally equal subtrees every time.

use crate::facts::IndexOptions;
use crate::model::PartialModel;
use crate::pattern::{Pattern, PatternError, PatternNode, PlaceholderId};
use crate::syntax::SyntaxNode;
use rustc_hash::FxHashMap;
use std::fmt;

/// Placeholder bindings produced by one successful match.
#[derive(Clone, Debug, Default)]
pub struct Binding {
    bindings: FxHashMap<PlaceholderId, SyntaxNode>,
}

impl Binding {
    pub fn new() -> Self {
        Binding {
            bindings: FxHashMap::default(),
        }
    }

    pub fn get(&self, id: PlaceholderId) -> Option<&SyntaxNode> {
        self.bindings.get(&id)
    }

    pub fn is_bound(&self, id: PlaceholderId) -> bool {
        self.bindings.contains_key(&id)
    }

    pub fn bind(&mut self, id: PlaceholderId, node: SyntaxNode) {
        self.bindings.insert(id, node);
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PlaceholderId, &SyntaxNode)> {
        self.bindings.iter()
    }

    /// Bind `id` to `node`, or check consistency with an existing binding.
    fn unify(&mut self, id: PlaceholderId, node: &SyntaxNode, view: View<'_>) -> bool {
        match self.bindings.get(&id) {
            Some(bound) => bound.same_shape_by(node, |key| view.shows(key)),
            None => {
                self.bindings.insert(id, node.clone());
                true
            }
        }
    }

    /// Replace every bound placeholder in `pattern` with the concrete
    /// pattern of its binding.
    pub fn instantiate(&self, pattern: &Pattern) -> Pattern {
        let mut result = pattern.clone();
        for path in pattern.placeholder_paths() {
            let bound = pattern
                .get(&path)
                .and_then(|n| n.as_placeholder())
                .and_then(|id| self.bindings.get(&id));
            if let Some(node) = bound {
                if let Ok(next) = result.replace_at(&path, PatternNode::from_node(node)) {
                    result = next;
                }
            }
        }
        result
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.bindings.iter().collect();
        entries.sort_by_key(|(id, _)| **id);
        write!(f, "{{")?;
        for (i, (id, node)) in entries.into_iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "${} -> {}", id, node)?;
        }
        write!(f, "}}")
    }
}

/// Which attributes a match may look at: all of them when matching a bare
/// tree, only the indexed ones when matching through a model.
#[derive(Clone, Copy, Debug)]
struct View<'a>(Option<&'a IndexOptions>);

impl View<'_> {
    fn shows(&self, key: &str) -> bool {
        self.0.map_or(true, |options| options.keeps(key))
    }
}

/// Anchored match of `pattern` at exactly `node`, without validation.
/// Pattern attributes the view hides are not required.
fn match_here(pattern: &PatternNode, node: &SyntaxNode, view: View<'_>) -> Option<Binding> {
    let mut binding = Binding::new();
    let mut stack = vec![(pattern, node)];
    while let Some((p, n)) = stack.pop() {
        match p {
            PatternNode::Placeholder { id, kind } => {
                if kind.as_ref().is_some_and(|k| **k != *n.kind()) {
                    return None;
                }
                if !binding.unify(*id, n, view) {
                    return None;
                }
            }
            PatternNode::Concrete {
                kind,
                attributes,
                children,
            } => {
                if **kind != *n.kind() || children.len() != n.arity() {
                    return None;
                }
                let attrs_ok = attributes
                    .iter()
                    .all(|(key, value)| !view.shows(key) || n.attribute(key) == Some(value));
                if !attrs_ok {
                    return None;
                }
                stack.extend(children.iter().zip(n.children()).rev());
            }
        }
    }
    Some(binding)
}

/// A validated pattern ready to be matched many times.
#[derive(Clone, Copy, Debug)]
pub struct Matcher<'p> {
    pattern: &'p Pattern,
}

impl<'p> Matcher<'p> {
    /// Validate `pattern`; malformed patterns are rejected here rather than
    /// silently failing to match.
    pub fn new(pattern: &'p Pattern) -> Result<Self, PatternError> {
        pattern.validate()?;
        Ok(Matcher { pattern })
    }

    pub fn pattern(&self) -> &'p Pattern {
        self.pattern
    }

    /// Match anchored at `node`. This is the plain `match(pattern, node)`:
    /// it succeeds for a ground pattern exactly when `node` has the same
    /// shape.
    pub fn at(&self, node: &SyntaxNode) -> Option<Binding> {
        match_here(self.pattern.root(), node, View(None))
    }

    /// Every position under `root` (pre-order) where the pattern matches.
    pub fn in_tree<'a>(&self, root: &'a SyntaxNode) -> Matches<'a>
    where
        'p: 'a,
    {
        Matches {
            pattern: self.pattern.root(),
            view: View(None),
            candidates: Box::new(root.descendants()),
        }
    }

    /// Candidate positions under one model root, pruned by the kind index.
    fn candidates<'a>(
        &self,
        model: &'a PartialModel,
        root: &SyntaxNode,
    ) -> Box<dyn Iterator<Item = &'a SyntaxNode> + 'a>
    where
        'p: 'a,
    {
        match self.pattern.root().kind() {
            Some(kind) => Box::new(model.nodes_of_kind(root, kind)),
            None => Box::new(model.nodes_under(root).iter()),
        }
    }

    /// Matches under one model root. Only the attributes the model indexes
    /// take part.
    pub fn in_model_root<'a>(&self, model: &'a PartialModel, root: &SyntaxNode) -> Matches<'a>
    where
        'p: 'a,
    {
        Matches {
            pattern: self.pattern.root(),
            view: View(Some(model.options())),
            candidates: self.candidates(model, root),
        }
    }

    /// Matches under every model root, tagged with their root.
    pub fn in_model<'a>(
        &self,
        model: &'a PartialModel,
    ) -> impl Iterator<Item = (&'a SyntaxNode, &'a SyntaxNode, Binding)> + 'a
    where
        'p: 'a,
    {
        let pattern: &'a Pattern = self.pattern;
        model.roots().iter().flat_map(move |root| {
            Matcher { pattern }
                .in_model_root(model, root)
                .map(move |(node, binding)| (root, node, binding))
        })
    }

    /// Does the pattern match anywhere under this model root?
    pub fn matches_root(&self, model: &PartialModel, root: &SyntaxNode) -> bool {
        self.in_model_root(model, root).next().is_some()
    }

    /// Number of model roots with at least one match.
    pub fn count_matching_roots(&self, model: &PartialModel) -> usize {
        model
            .roots()
            .iter()
            .filter(|root| self.matches_root(model, root))
            .count()
    }
}

/// Lazy sequence of matches; stop early for existence checks.
pub struct Matches<'a> {
    pattern: &'a PatternNode,
    view: View<'a>,
    candidates: Box<dyn Iterator<Item = &'a SyntaxNode> + 'a>,
}

impl<'a> Iterator for Matches<'a> {
    type Item = (&'a SyntaxNode, Binding);

    fn next(&mut self) -> Option<Self::Item> {
        for node in self.candidates.by_ref() {
            if let Some(binding) = match_here(self.pattern, node, self.view) {
                return Some((node, binding));
            }
        }
        None
    }
}

/// Convenience function: all matches of `pattern` at `root` or any of its
/// descendants. Use [`match_at`] for the anchored match.
pub fn match_node<'a>(pattern: &'a Pattern, root: &'a SyntaxNode) -> Result<Matches<'a>, PatternError> {
    Ok(Matcher::new(pattern)?.in_tree(root))
}

/// Convenience function: all matches of `pattern` in every root of `model`.
pub fn match_model<'a>(
    pattern: &'a Pattern,
    model: &'a PartialModel,
) -> Result<Vec<(&'a SyntaxNode, &'a SyntaxNode, Binding)>, PatternError> {
    Ok(Matcher::new(pattern)?.in_model(model).collect())
}

/// Anchored match of `pattern` at `node` only: `match(pattern, node)`.
pub fn match_at(pattern: &Pattern, node: &SyntaxNode) -> Result<Option<Binding>, PatternError> {
    Ok(Matcher::new(pattern)?.at(node))
}

/// Does `pattern` match anywhere under `root`? Stops at the first hit.
pub fn matches_anywhere(pattern: &Pattern, root: &SyntaxNode) -> Result<bool, PatternError> {
    Ok(Matcher::new(pattern)?.in_tree(root).next().is_some())
}

/// Number of roots in `model` with at least one match.
pub fn count_matching_roots(pattern: &Pattern, model: &PartialModel) -> Result<usize, PatternError> {
    Ok(Matcher::new(pattern)?.count_matching_roots(model))
}
