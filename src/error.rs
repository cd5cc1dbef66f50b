use core::fmt;

use crate::tree::NodeId;

/// Result alias for `spantree`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the tree-construction pipeline.
///
/// Localized extraction, embedding, and labeling failures never appear here:
/// they are logged and degraded in place (filler leaf, fallback vector,
/// synthesized label). An `Error` always terminates the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Input document was empty or whitespace-only.
    EmptyInput,

    /// Invalid configuration value, caught before any external call.
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: String,
    },

    /// A structural invariant of the finished tree was broken.
    ///
    /// This indicates a defect in the pipeline itself, not a retryable
    /// condition; the pipeline never returns a tree that fails validation.
    Validation(ValidationError),

    /// The run was cancelled between stages.
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyInput => write!(f, "input document is empty"),
            Error::InvalidParameter { name, message } => {
                write!(f, "invalid parameter '{name}': {message}")
            }
            Error::Validation(err) => write!(f, "tree validation failed: {err}"),
            Error::Cancelled => write!(f, "pipeline run was cancelled"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

/// Structural invariant violations, one variant per check.
///
/// Every variant carries the offending offsets or ids so a failure can be
/// diagnosed without re-running the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Union of leaf spans does not cover the document: `[start, end)` is
    /// claimed by no leaf.
    CoverageGap {
        /// Gap start offset.
        start: usize,
        /// Gap end offset.
        end: usize,
    },

    /// Two leaves share at least one offset.
    LeafOverlap {
        /// Leaf appearing earlier in document order.
        left: NodeId,
        /// Leaf appearing later in document order.
        right: NodeId,
        /// First shared offset.
        offset: usize,
    },

    /// Leaves are not sorted by `start` in the serialized sequence.
    OrderViolation {
        /// Leaf that appears out of order.
        leaf: NodeId,
        /// Its start offset.
        start: usize,
        /// The preceding leaf's start offset.
        prev_start: usize,
    },

    /// An internal node's span is not the contiguous union of its children.
    Containment {
        /// Offending internal node.
        node: NodeId,
        /// Offset where contiguity breaks.
        offset: usize,
    },

    /// An internal node's child count is outside `2..=max_children`, or the
    /// tree is deeper than `max_depth`.
    Shape {
        /// Offending node (root for depth violations).
        node: NodeId,
        /// Description of the violated bound.
        message: String,
    },

    /// The same `NodeId` appears more than once, or a node is reachable
    /// through more than one parent.
    DuplicateNodeId {
        /// The duplicated id.
        node: NodeId,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::CoverageGap { start, end } => {
                write!(f, "coverage gap at [{start}, {end})")
            }
            ValidationError::LeafOverlap {
                left,
                right,
                offset,
            } => write!(f, "leaves {left} and {right} overlap at offset {offset}"),
            ValidationError::OrderViolation {
                leaf,
                start,
                prev_start,
            } => write!(
                f,
                "leaf {leaf} at start {start} follows a leaf at start {prev_start}"
            ),
            ValidationError::Containment { node, offset } => {
                write!(f, "node {node} span is not contiguous at offset {offset}")
            }
            ValidationError::Shape { node, message } => {
                write!(f, "shape violation at node {node}: {message}")
            }
            ValidationError::DuplicateNodeId { node } => {
                write!(f, "duplicate node id {node}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}
