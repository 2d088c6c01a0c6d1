//! Syntax tree representation handed in by the parsing front end.
//!
//! Nodes carry an identity, an open-ended kind tag, an ordered list of
//! children and a sorted attribute map. They are immutable once built and
//! cheap to clone, so the same tree can be shared between the fact model,
//! the matching engine and worker threads.

use ordered_float::OrderedFloat;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Unique identifier for syntax nodes.
pub type NodeId = u64;

/// Attribute map attached to a node, ordered by key.
pub type Attributes = BTreeMap<Arc<str>, Value>;

/// Atomic attribute values.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(Arc<str>),
    Bool(bool),
    /// Bare identifier, e.g. a variable name or a resolved type.
    Symbol(Arc<str>),
}

impl Value {
    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    pub fn float(f: f64) -> Self {
        Value::Float(OrderedFloat(f))
    }

    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn symbol(s: impl Into<Arc<str>>) -> Self {
        Value::Symbol(s.into())
    }

    pub fn bool(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x.into_inner()),
            Value::Str(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")
            }
            Value::Bool(b) => write!(f, "{}", b),
            Value::Symbol(s) => write_name(f, s),
        }
    }
}

/// Build an attribute map from key/value pairs.
pub fn attributes<K, I>(pairs: I) -> Attributes
where
    K: Into<Arc<str>>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

struct NodeData {
    id: NodeId,
    kind: Arc<str>,
    attributes: Attributes,
    children: Vec<SyntaxNode>,
}

// Tear down uniquely owned subtrees iteratively so dropping a very deep tree
// cannot exhaust the stack.
impl Drop for NodeData {
    fn drop(&mut self) {
        let mut stack = std::mem::take(&mut self.children);
        while let Some(child) = stack.pop() {
            if let Ok(mut data) = Arc::try_unwrap(child.0) {
                stack.append(&mut data.children);
            }
        }
    }
}

/// A node in an already-parsed syntax tree.
///
/// Equality and hashing use the node identity; use [`SyntaxNode::same_shape`]
/// for structural comparison.
#[derive(Clone)]
pub struct SyntaxNode(Arc<NodeData>);

impl SyntaxNode {
    pub fn new(
        id: NodeId,
        kind: impl Into<Arc<str>>,
        attributes: Attributes,
        children: Vec<SyntaxNode>,
    ) -> Self {
        SyntaxNode(Arc::new(NodeData {
            id,
            kind: kind.into(),
            attributes,
            children,
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn kind(&self) -> &str {
        &self.0.kind
    }

    /// The shared kind tag.
    pub fn kind_tag(&self) -> &Arc<str> {
        &self.0.kind
    }

    pub fn attributes(&self) -> &Attributes {
        &self.0.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.0.attributes.get(key)
    }

    pub fn children(&self) -> &[SyntaxNode] {
        &self.0.children
    }

    pub fn child(&self, index: usize) -> Option<&SyntaxNode> {
        self.0.children.get(index)
    }

    pub fn arity(&self) -> usize {
        self.0.children.len()
    }

    pub fn is_leaf(&self) -> bool {
        self.0.children.is_empty()
    }

    /// Number of nodes in this subtree.
    pub fn size(&self) -> usize {
        self.descendants().count()
    }

    /// Height of this subtree (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self, 1usize)];
        while let Some((node, d)) = stack.pop() {
            max = max.max(d);
            for child in node.children() {
                stack.push((child, d + 1));
            }
        }
        max
    }

    /// Pre-order iterator over this node and all of its descendants.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    /// Structural equality: same kind, attributes and children shape,
    /// ignoring node identity.
    pub fn same_shape(&self, other: &SyntaxNode) -> bool {
        self.same_shape_by(other, |_| true)
    }

    /// Structural equality that only compares attributes whose key passes
    /// `keep`.
    pub fn same_shape_by(&self, other: &SyntaxNode, keep: impl Fn(&str) -> bool) -> bool {
        let mut stack = vec![(self, other)];
        while let Some((a, b)) = stack.pop() {
            if Arc::ptr_eq(&a.0, &b.0) {
                continue;
            }
            if a.kind() != b.kind() || a.arity() != b.arity() {
                return false;
            }
            let agree = a
                .attributes()
                .iter()
                .filter(|(k, _)| keep(k))
                .eq(b.attributes().iter().filter(|(k, _)| keep(k)));
            if !agree {
                return false;
            }
            stack.extend(a.children().iter().zip(b.children()));
        }
        true
    }
}

impl PartialEq for SyntaxNode {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for SyntaxNode {}

impl Hash for SyntaxNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Display for SyntaxNode {
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
            write_name(f, node.kind())?;
            write_attributes(f, node.attributes())?;
            if !node.is_leaf() {
                f.write_str("(")?;
                push_children(&mut stack, node.children());
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SyntaxNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id(), self)
    }
}

/// Pending output of an iterative tree printer.
pub(crate) enum Piece<'a, T> {
    Node(&'a T),
    Text(&'static str),
}

/// Schedule `children` as a parenthesized, comma separated list; the
/// opening parenthesis must already be written.
pub(crate) fn push_children<'a, T>(stack: &mut Vec<Piece<'a, T>>, children: &'a [T]) {
    stack.push(Piece::Text(")"));
    for (i, child) in children.iter().enumerate().rev() {
        stack.push(Piece::Node(child));
        if i > 0 {
            stack.push(Piece::Text(", "));
        }
    }
}

/// Pre-order traversal driven by an explicit stack.
pub struct Descendants<'a> {
    stack: Vec<&'a SyntaxNode>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a SyntaxNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev());
        Some(node)
    }
}

/// Hands out fresh node identities while building trees.
#[derive(Debug, Default)]
pub struct NodeFactory {
    next_id: NodeId,
}

impl NodeFactory {
    pub fn new() -> Self {
        NodeFactory { next_id: 0 }
    }

    /// Start numbering at `id`, e.g. to keep two example sets disjoint.
    pub fn starting_at(id: NodeId) -> Self {
        NodeFactory { next_id: id }
    }

    pub fn fresh_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn leaf(&mut self, kind: impl Into<Arc<str>>) -> SyntaxNode {
        self.node_with(kind, Attributes::new(), Vec::new())
    }

    pub fn node(&mut self, kind: impl Into<Arc<str>>, children: Vec<SyntaxNode>) -> SyntaxNode {
        self.node_with(kind, Attributes::new(), children)
    }

    pub fn node_with(
        &mut self,
        kind: impl Into<Arc<str>>,
        attributes: Attributes,
        children: Vec<SyntaxNode>,
    ) -> SyntaxNode {
        SyntaxNode::new(self.fresh_id(), kind, attributes, children)
    }
}

pub(crate) fn is_plain_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s != "true" && s != "false" && chars.all(|c| c.is_alphanumeric() || c == '_')
}

pub(crate) fn write_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if is_plain_name(name) {
        return write!(f, "{}", name);
    }
    write!(f, "'")?;
    for c in name.chars() {
        match c {
            '\'' => write!(f, "\\'")?,
            '\\' => write!(f, "\\\\")?,
            c => write!(f, "{}", c)?,
        }
    }
    write!(f, "'")
}

pub(crate) fn write_attributes(f: &mut fmt::Formatter<'_>, attrs: &Attributes) -> fmt::Result {
    if attrs.is_empty() {
        return Ok(());
    }
    write!(f, "{{")?;
    for (i, (key, value)) in attrs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_name(f, key)?;
        write!(f, ": {}", value)?;
    }
    write!(f, "}}")
}
