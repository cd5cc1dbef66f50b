//! Tree data model: span-anchored leaves under labeled internal nodes.
//!
//! All nodes live in a single arena (`Vec<Node>`) owned by the tree and are
//! addressed by [`NodeId`], a stable index assigned at creation. Nodes hold
//! only forward references (parent to children); the build is strictly
//! bottom-up, so no cyclic structure can ever be created. Where a
//! child-to-parent lookup is needed (validation), it is derived on the fly
//! rather than stored.

mod validate;

pub use validate::{HealthReport, Validator};

use core::fmt;

use serde::{Deserialize, Serialize};

/// Stable identity of a node within one tree.
///
/// Leaves are numbered `0..leaf_count` in document order; internal nodes
/// follow in creation order, which is bottom-up, so a parent's id is always
/// greater than all of its children's ids.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub usize);

impl NodeId {
    /// Index into the tree's node arena.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A finalized, non-overlapping span of the original text.
///
/// The atomic unit of ground truth: `text` is always a verbatim copy of
/// `document[start..end]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafNode {
    /// Node identity.
    pub id: NodeId,
    /// Absolute start offset (inclusive).
    pub start: usize,
    /// Absolute end offset (exclusive).
    pub end: usize,
    /// Verbatim text of the span.
    pub text: String,
    /// Short label; `None` until the labeling stage runs.
    pub label: Option<String>,
}

impl LeafNode {
    /// Span length in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the span is empty. Never true for reconciled leaves.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// A labeled grouping of 2..=`max_children` child nodes whose spans are
/// contiguous and cover this node's span exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalNode {
    /// Node identity.
    pub id: NodeId,
    /// Short label; `None` until the labeling stage runs.
    pub label: Option<String>,
    /// Children in document order. Each child is owned by exactly one parent.
    pub children: Vec<NodeId>,
}

/// A node in the tree: either a text span or a grouping of children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    /// Span-anchored leaf.
    Leaf(LeafNode),
    /// Grouping node.
    Internal(InternalNode),
}

impl Node {
    /// Node identity.
    pub fn id(&self) -> NodeId {
        match self {
            Node::Leaf(leaf) => leaf.id,
            Node::Internal(node) => node.id,
        }
    }

    /// Whether this is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// The leaf payload, if this is a leaf.
    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Internal(_) => None,
        }
    }

    /// The internal payload, if this is an internal node.
    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Leaf(_) => None,
            Node::Internal(node) => Some(node),
        }
    }

    /// Child ids, empty for leaves.
    pub fn children(&self) -> &[NodeId] {
        match self {
            Node::Leaf(_) => &[],
            Node::Internal(node) => &node.children,
        }
    }

    /// The node's label, if assigned.
    pub fn label(&self) -> Option<&str> {
        match self {
            Node::Leaf(leaf) => leaf.label.as_deref(),
            Node::Internal(node) => node.label.as_deref(),
        }
    }
}

/// An immutable tree of labeled spans over one document.
///
/// Built once by the pipeline; consumers only read. The root is an internal
/// node, or a lone leaf when the document was too short to cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanTree {
    nodes: Vec<Node>,
    root: NodeId,
    text: String,
}

impl SpanTree {
    pub(crate) fn new(nodes: Vec<Node>, root: NodeId, text: String) -> Self {
        Self { nodes, root, text }
    }

    /// The full source document, for span dereferencing.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Root node id.
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Root node.
    pub fn root(&self) -> &Node {
        &self.nodes[self.root.index()]
    }

    /// Look up a node by id.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub(crate) fn set_label(&mut self, id: NodeId, label: String) {
        match &mut self.nodes[id.index()] {
            Node::Leaf(leaf) => leaf.label = Some(label),
            Node::Internal(node) => node.label = Some(label),
        }
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: a tree contains at least one leaf.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all nodes in id order (leaves first, then internal nodes
    /// bottom-up).
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// All leaves in document order (depth-first traversal from the root).
    pub fn leaves(&self) -> Vec<&LeafNode> {
        let mut out = Vec::new();
        self.collect_leaves(self.root, &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, id: NodeId, out: &mut Vec<&'a LeafNode>) {
        match &self.nodes[id.index()] {
            Node::Leaf(leaf) => out.push(leaf),
            Node::Internal(node) => {
                for &child in &node.children {
                    self.collect_leaves(child, out);
                }
            }
        }
    }

    /// Number of leaves.
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// The `[start, end)` span covered by a node: a leaf's own offsets, or
    /// the union of an internal node's children.
    pub fn span(&self, id: NodeId) -> Option<(usize, usize)> {
        match self.get(id)? {
            Node::Leaf(leaf) => Some((leaf.start, leaf.end)),
            Node::Internal(node) => {
                let (first, last) = (*node.children.first()?, *node.children.last()?);
                Some((self.span(first)?.0, self.span(last)?.1))
            }
        }
    }

    /// Maximum root-to-leaf depth in edges. A lone leaf has depth 0.
    pub fn depth(&self) -> usize {
        self.depth_below(self.root)
    }

    fn depth_below(&self, id: NodeId) -> usize {
        match &self.nodes[id.index()] {
            Node::Leaf(_) => 0,
            Node::Internal(node) => {
                1 + node
                    .children
                    .iter()
                    .map(|&c| self.depth_below(c))
                    .max()
                    .unwrap_or(0)
            }
        }
    }
}
