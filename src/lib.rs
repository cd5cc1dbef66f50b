//! # spantree
//!
//! Information trees over plain text: overlapping windows feed an external
//! span extractor, the resulting candidates are reconciled into a gapless
//! non-overlapping leaf sequence, and leaves are clustered bottom-up into a
//! labeled, validated hierarchy that covers every byte of the document.
//!
//! Extraction, embedding, and labeling are seams ([`Extractor`],
//! [`Embedder`], [`Labeler`]); the crate orchestrates, reconciles, clusters,
//! and validates, but never calls a model itself.

pub mod cluster;
pub mod config;
pub mod embed;
/// Error types used across `spantree`.
pub mod error;
pub mod extract;
pub mod label;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod tree;
pub mod window;


pub use cluster::{cosine_similarity, ClusterBuilder};
pub use config::TreeConfig;
pub use embed::{Embedder, FnEmbedder};
pub use error::{Error, Result, ValidationError};
pub use extract::{Extractor, FnExtractor};
pub use label::{FnLabeler, Labeler};
pub use pipeline::{CancelToken, TreeAssembler};
pub use reconcile::{
    coverage_stats, iou, CandidateSpan, CoverageStats, DedupPolicy, SpanReconciler, FILLER_LABEL,
};
pub use retry::RetryPolicy;
pub use tree::{
    HealthReport, InternalNode, LeafNode, Node, NodeId, SpanTree, Validator,
};
pub use window::{window_count, windows, Window};
