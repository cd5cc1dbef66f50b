//! Structural validation and health reporting for finished trees.
//!
//! Validation is a hard gate: the pipeline refuses to hand out a tree that
//! violates coverage, ordering, containment, or shape. The checks only read
//! the tree, so validation is idempotent and callers may re-run it on any
//! tree they receive.

use core::fmt;

use tracing::debug;

use crate::cluster::required_levels;
use crate::config::TreeConfig;
use crate::error::{Result, ValidationError};
use crate::reconcile::{coverage_stats, CoverageStats, FILLER_LABEL};
use crate::tree::{Node, NodeId, SpanTree};

/// Checks a finished tree against the structural invariants.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_children: usize,
    max_depth: usize,
}

impl Validator {
    /// Create a validator for the given configuration's bounds.
    pub fn new(config: &TreeConfig) -> Self {
        Self {
            max_children: config.max_children,
            max_depth: config.max_depth,
        }
    }

    /// Verify every structural invariant, returning the first violation.
    ///
    /// Checks, in order: every node is reachable from the root exactly once;
    /// leaves tile `[0, text.len())` in order without gaps or overlaps; each
    /// leaf's text matches the document slice at its offsets; every internal
    /// node's children are contiguous and abut; internal fanout is within
    /// `2..=max_children`; depth does not exceed the effective bound.
    pub fn validate(&self, tree: &SpanTree) -> Result<()> {
        self.check_reachability(tree)?;
        self.check_leaf_sequence(tree)?;
        self.check_containment(tree, tree.root_id())?;
        self.check_shape(tree)?;
        debug!(
            nodes = tree.len(),
            leaves = tree.leaf_count(),
            depth = tree.depth(),
            "tree validated"
        );
        Ok(())
    }

    /// Every arena slot must be reachable from the root, and no node may be
    /// claimed by two parents.
    fn check_reachability(&self, tree: &SpanTree) -> Result<()> {
        let mut seen = vec![false; tree.len()];
        let mut stack = vec![tree.root_id()];
        while let Some(id) = stack.pop() {
            let node = tree
                .get(id)
                .ok_or(ValidationError::Shape {
                    node: id,
                    message: "child id outside node arena".to_string(),
                })?;
            if seen[id.index()] {
                return Err(ValidationError::DuplicateNodeId { node: id }.into());
            }
            seen[id.index()] = true;
            stack.extend(node.children().iter().copied());
        }
        if let Some(index) = seen.iter().position(|&s| !s) {
            return Err(ValidationError::Shape {
                node: NodeId(index),
                message: "node not reachable from root".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// The leaves, in document order, must tile the document exactly, and
    /// each leaf must hold the verbatim text of its span.
    fn check_leaf_sequence(&self, tree: &SpanTree) -> Result<()> {
        let leaves = tree.leaves();
        let text = tree.text();
        let mut prev_start = 0;
        let mut prev_end = 0;

        for (i, leaf) in leaves.iter().enumerate() {
            if i > 0 && leaf.start < prev_start {
                return Err(ValidationError::OrderViolation {
                    leaf: leaf.id,
                    start: leaf.start,
                    prev_start,
                }
                .into());
            }
            if leaf.start < prev_end {
                let prev = leaves[i - 1].id;
                return Err(ValidationError::LeafOverlap {
                    left: prev,
                    right: leaf.id,
                    offset: leaf.start,
                }
                .into());
            }
            if leaf.start > prev_end {
                return Err(ValidationError::CoverageGap {
                    start: prev_end,
                    end: leaf.start,
                }
                .into());
            }
            if leaf.is_empty() {
                return Err(ValidationError::Shape {
                    node: leaf.id,
                    message: "empty leaf span".to_string(),
                }
                .into());
            }
            if text.get(leaf.start..leaf.end) != Some(leaf.text.as_str()) {
                return Err(ValidationError::Shape {
                    node: leaf.id,
                    message: format!(
                        "leaf text does not match document slice {}..{}",
                        leaf.start, leaf.end
                    ),
                }
                .into());
            }
            prev_start = leaf.start;
            prev_end = leaf.end;
        }

        if prev_end != text.len() {
            return Err(ValidationError::CoverageGap {
                start: prev_end,
                end: text.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Each internal node's children must abut: child `k+1` starts exactly
    /// where child `k` ends, so the parent's span is the seamless union.
    fn check_containment(&self, tree: &SpanTree, id: NodeId) -> Result<()> {
        let Some(node) = tree.get(id).and_then(Node::as_internal) else {
            return Ok(());
        };
        let mut prev_end = None;
        for &child in &node.children {
            let (start, end) = tree.span(child).ok_or(ValidationError::Shape {
                node: id,
                message: "child without a span".to_string(),
            })?;
            if let Some(prev) = prev_end {
                if start != prev {
                    return Err(ValidationError::Containment {
                        node: id,
                        offset: prev,
                    }
                    .into());
                }
            }
            prev_end = Some(end);
            self.check_containment(tree, child)?;
        }
        Ok(())
    }

    /// Fanout and depth bounds.
    ///
    /// The depth bound is effective, not literal: when the document has more
    /// leaves than `max_children^max_depth` can hold, the minimum feasible
    /// depth becomes the bound instead.
    fn check_shape(&self, tree: &SpanTree) -> Result<()> {
        for node in tree.iter() {
            if let Node::Internal(internal) = node {
                let fanout = internal.children.len();
                if fanout < 2 || fanout > self.max_children {
                    return Err(ValidationError::Shape {
                        node: internal.id,
                        message: format!(
                            "fanout {fanout} outside 2..={}",
                            self.max_children
                        ),
                    }
                    .into());
                }
            }
        }

        let bound = self
            .max_depth
            .max(required_levels(tree.leaf_count(), self.max_children));
        let depth = tree.depth();
        if depth > bound {
            return Err(ValidationError::Shape {
                node: tree.root_id(),
                message: format!("depth {depth} exceeds bound {bound}"),
            }
            .into());
        }
        Ok(())
    }

    /// Produce a diagnostic report without failing. Structural violations
    /// surface as warnings here; use [`Validator::validate`] to enforce them.
    pub fn health_check(&self, tree: &SpanTree) -> HealthReport {
        let leaves = tree.leaves();
        let spans: Vec<(usize, usize)> = leaves.iter().map(|l| (l.start, l.end)).collect();
        let coverage = coverage_stats(&spans, tree.text().len());

        let mut warnings = Vec::new();
        if let Err(err) = self.validate(tree) {
            warnings.push(format!("structural violation: {err}"));
        }
        for leaf in &leaves {
            if tree.text().get(leaf.start..leaf.end) != Some(leaf.text.as_str()) {
                warnings.push(format!("leaf {} text diverges from document", leaf.id));
            }
        }
        let tiny = leaves.iter().filter(|l| l.len() < 40).count();
        if tiny > 0 {
            warnings.push(format!("{tiny} leaves shorter than 40 bytes"));
        }
        let unlabeled = tree.iter().filter(|n| n.label().is_none()).count();
        if unlabeled > 0 {
            warnings.push(format!("{unlabeled} nodes without labels"));
        }
        let filler = leaves
            .iter()
            .filter(|l| l.label.as_deref() == Some(FILLER_LABEL))
            .count();
        if filler > 0 {
            warnings.push(format!("{filler} filler leaves from unextracted ranges"));
        }

        let internal_count = tree.len() - leaves.len();
        let child_total: usize = tree.iter().map(|n| n.children().len()).sum();
        let avg_branching_factor = if internal_count == 0 {
            0.0
        } else {
            child_total as f64 / internal_count as f64
        };

        HealthReport {
            node_count: tree.len(),
            leaf_count: leaves.len(),
            max_depth: tree.depth(),
            avg_branching_factor,
            coverage,
            warnings,
        }
    }
}

/// Diagnostic summary of a tree, produced by [`Validator::health_check`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Total nodes in the tree.
    pub node_count: usize,
    /// Leaves in the tree.
    pub leaf_count: usize,
    /// Root-to-leaf depth in edges.
    pub max_depth: usize,
    /// Mean children per internal node.
    pub avg_branching_factor: f64,
    /// Leaf coverage over the document.
    pub coverage: CoverageStats,
    /// Non-fatal observations, empty for a pristine tree.
    pub warnings: Vec<String>,
}

impl HealthReport {
    /// Whether the tree is structurally sound with full coverage and no
    /// warnings.
    pub fn is_healthy(&self) -> bool {
        self.warnings.is_empty()
            && self.coverage.gaps.is_empty()
            && self.coverage.overlaps.is_empty()
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} nodes ({} leaves), depth {}, avg branching {:.2}, coverage {:.1}%",
            self.node_count,
            self.leaf_count,
            self.max_depth,
            self.avg_branching_factor,
            self.coverage.coverage_percent
        )?;
        for warning in &self.warnings {
            writeln!(f, "  warning: {warning}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::tree::{InternalNode, LeafNode};

    fn leaf(id: usize, start: usize, end: usize, text: &str) -> Node {
        Node::Leaf(LeafNode {
            id: NodeId(id),
            start,
            end,
            text: text.to_string(),
            label: Some("l".to_string()),
        })
    }

    fn internal(id: usize, children: Vec<usize>) -> Node {
        Node::Internal(InternalNode {
            id: NodeId(id),
            label: Some("s".to_string()),
            children: children.into_iter().map(NodeId).collect(),
        })
    }

    fn validator() -> Validator {
        Validator::new(&TreeConfig::default())
    }

    fn valid_tree() -> SpanTree {
        let text = "abcdefghij";
        let nodes = vec![
            leaf(0, 0, 4, "abcd"),
            leaf(1, 4, 7, "efg"),
            leaf(2, 7, 10, "hij"),
            internal(3, vec![0, 1, 2]),
        ];
        SpanTree::new(nodes, NodeId(3), text.to_string())
    }

    fn expect_validation(result: crate::error::Result<()>) -> ValidationError {
        match result {
            Err(Error::Validation(err)) => err,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_a_well_formed_tree() {
        assert!(validator().validate(&valid_tree()).is_ok());
    }

    #[test]
    fn validation_is_idempotent() {
        let tree = valid_tree();
        let v = validator();
        assert!(v.validate(&tree).is_ok());
        assert!(v.validate(&tree).is_ok());
    }

    #[test]
    fn rejects_a_coverage_gap() {
        let nodes = vec![
            leaf(0, 0, 4, "abcd"),
            leaf(1, 6, 10, "ghij"),
            internal(2, vec![0, 1]),
        ];
        let tree = SpanTree::new(nodes, NodeId(2), "abcdefghij".to_string());
        let err = expect_validation(validator().validate(&tree));
        assert!(matches!(err, ValidationError::CoverageGap { start: 4, end: 6 }));
    }

    #[test]
    fn rejects_a_trailing_gap() {
        let nodes = vec![
            leaf(0, 0, 4, "abcd"),
            leaf(1, 4, 8, "efgh"),
            internal(2, vec![0, 1]),
        ];
        let tree = SpanTree::new(nodes, NodeId(2), "abcdefghij".to_string());
        let err = expect_validation(validator().validate(&tree));
        assert!(matches!(err, ValidationError::CoverageGap { start: 8, end: 10 }));
    }

    #[test]
    fn rejects_overlapping_leaves() {
        let nodes = vec![
            leaf(0, 0, 6, "abcdef"),
            leaf(1, 4, 10, "efghij"),
            internal(2, vec![0, 1]),
        ];
        let tree = SpanTree::new(nodes, NodeId(2), "abcdefghij".to_string());
        let err = expect_validation(validator().validate(&tree));
        assert!(matches!(err, ValidationError::LeafOverlap { offset: 4, .. }));
    }

    #[test]
    fn rejects_leaf_text_mismatch() {
        let nodes = vec![
            leaf(0, 0, 4, "WRONG"),
            leaf(1, 4, 10, "efghij"),
            internal(2, vec![0, 1]),
        ];
        let tree = SpanTree::new(nodes, NodeId(2), "abcdefghij".to_string());
        let err = expect_validation(validator().validate(&tree));
        assert!(matches!(err, ValidationError::Shape { node: NodeId(0), .. }));
    }

    #[test]
    fn rejects_single_child_internal_node() {
        let nodes = vec![
            leaf(0, 0, 10, "abcdefghij"),
            internal(1, vec![0]),
        ];
        let tree = SpanTree::new(nodes, NodeId(1), "abcdefghij".to_string());
        let err = expect_validation(validator().validate(&tree));
        assert!(matches!(err, ValidationError::Shape { node: NodeId(1), .. }));
    }

    #[test]
    fn rejects_fanout_above_bound() {
        let config = TreeConfig::default().with_max_children(2);
        let tree = valid_tree(); // root has 3 children
        let err = expect_validation(Validator::new(&config).validate(&tree));
        assert!(matches!(err, ValidationError::Shape { node: NodeId(3), .. }));
    }

    #[test]
    fn rejects_node_claimed_by_two_parents() {
        let nodes = vec![
            leaf(0, 0, 4, "abcd"),
            leaf(1, 4, 10, "efghij"),
            internal(2, vec![0, 1]),
            internal(3, vec![2, 1]),
        ];
        let tree = SpanTree::new(nodes, NodeId(3), "abcdefghij".to_string());
        let err = expect_validation(validator().validate(&tree));
        assert!(matches!(err, ValidationError::DuplicateNodeId { node: NodeId(1) }));
    }

    #[test]
    fn rejects_unreachable_node() {
        let nodes = vec![
            leaf(0, 0, 4, "abcd"),
            leaf(1, 4, 10, "efghij"),
            internal(2, vec![0, 1]),
            leaf(3, 0, 4, "abcd"),
        ];
        let tree = SpanTree::new(nodes, NodeId(2), "abcdefghij".to_string());
        let err = expect_validation(validator().validate(&tree));
        assert!(matches!(err, ValidationError::Shape { node: NodeId(3), .. }));
    }

    #[test]
    fn depth_bound_relaxes_for_many_leaves() {
        // 8 leaves with max_children 2 need depth 3; max_depth 1 is
        // infeasible so the effective bound takes over.
        let config = TreeConfig::default().with_max_children(2).with_max_depth(1);
        let text = "abcdefgh";
        let mut nodes: Vec<Node> = (0..8)
            .map(|i| leaf(i, i, i + 1, &text[i..i + 1]))
            .collect();
        for (id, (a, b)) in [(8, (0, 1)), (9, (2, 3)), (10, (4, 5)), (11, (6, 7))] {
            nodes.push(internal(id, vec![a, b]));
        }
        nodes.push(internal(12, vec![8, 9]));
        nodes.push(internal(13, vec![10, 11]));
        nodes.push(internal(14, vec![12, 13]));
        let tree = SpanTree::new(nodes, NodeId(14), text.to_string());
        assert_eq!(tree.depth(), 3);
        assert!(Validator::new(&config).validate(&tree).is_ok());
    }

    #[test]
    fn health_report_on_a_clean_tree() {
        let report = validator().health_check(&valid_tree());
        assert_eq!(report.leaf_count, 3);
        assert_eq!(report.max_depth, 1);
        assert!((report.avg_branching_factor - 3.0).abs() < f64::EPSILON);
        assert!(report.coverage.gaps.is_empty());
        // Tiny-leaf warning fires for this synthetic tree.
        assert!(!report.is_healthy());
    }

    #[test]
    fn health_report_flags_missing_labels() {
        let nodes = vec![
            Node::Leaf(LeafNode {
                id: NodeId(0),
                start: 0,
                end: 4,
                text: "abcd".to_string(),
                label: None,
            }),
            leaf(1, 4, 10, "efghij"),
            internal(2, vec![0, 1]),
        ];
        let tree = SpanTree::new(nodes, NodeId(2), "abcdefghij".to_string());
        let report = validator().health_check(&tree);
        assert!(report.warnings.iter().any(|w| w.contains("without labels")));
    }
}
