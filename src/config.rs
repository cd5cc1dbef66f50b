//! Pipeline configuration.
//!
//! All knobs consumed by the core live in [`TreeConfig`]. The configuration
//! is validated once, before any external call is made; invalid combinations
//! fail fast with [`Error::InvalidParameter`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reconcile::DedupPolicy;

/// Configuration for building a span tree.
///
/// Defaults are tuned for prose documents a few thousand to a few hundred
/// thousand characters long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Window size in bytes of UTF-8 text.
    pub window_chars: usize,
    /// Overlap between consecutive windows. Must be less than `window_chars`.
    pub overlap_chars: usize,
    /// Soft minimum leaf size; shorter leaves are merged into a neighbor.
    pub min_node_chars: usize,
    /// Soft maximum leaf size; longer leaves are split at a text boundary.
    pub max_node_chars: usize,
    /// IoU above which two candidate spans count as the same underlying unit.
    pub iou_threshold: f64,
    /// Maximum children per internal node. At least 2.
    pub max_children: usize,
    /// Maximum root-to-leaf depth of the finished tree. At least 1.
    pub max_depth: usize,
    /// Adjacent pairs with cosine similarity below this floor are never
    /// merged. The default of -1.0 disables the floor.
    pub similarity_floor: f32,
    /// Which candidate wins when two spans exceed the IoU threshold.
    pub dedup_policy: DedupPolicy,
    /// Retries per external call (extraction, embedding, labeling).
    pub max_retries: usize,
    /// Initial backoff delay; doubles per attempt.
    pub retry_initial_delay: Duration,
    /// Backoff delay ceiling.
    pub retry_max_delay: Duration,
    /// Leaves per embedding request.
    pub embedding_batch_size: usize,
    /// Dimension of the neutral fallback vector, used only when every
    /// embedding batch fails and no dimension can be inferred.
    pub fallback_embedding_dim: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            window_chars: 6000,
            overlap_chars: 800,
            min_node_chars: 300,
            max_node_chars: 1200,
            iou_threshold: 0.85,
            max_children: 10,
            max_depth: 4,
            similarity_floor: -1.0,
            dedup_policy: DedupPolicy::LongerSpanWins,
            max_retries: 3,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            embedding_batch_size: 100,
            fallback_embedding_dim: 1536,
        }
    }
}

impl TreeConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set window size.
    pub fn with_window_chars(mut self, chars: usize) -> Self {
        self.window_chars = chars;
        self
    }

    /// Set window overlap.
    pub fn with_overlap_chars(mut self, chars: usize) -> Self {
        self.overlap_chars = chars;
        self
    }

    /// Set the soft leaf size bounds.
    pub fn with_node_chars(mut self, min: usize, max: usize) -> Self {
        self.min_node_chars = min;
        self.max_node_chars = max;
        self
    }

    /// Set the deduplication IoU threshold.
    pub fn with_iou_threshold(mut self, threshold: f64) -> Self {
        self.iou_threshold = threshold;
        self
    }

    /// Set maximum children per internal node.
    pub fn with_max_children(mut self, n: usize) -> Self {
        self.max_children = n;
        self
    }

    /// Set maximum tree depth.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the merge similarity floor.
    pub fn with_similarity_floor(mut self, floor: f32) -> Self {
        self.similarity_floor = floor;
        self
    }

    /// Set the dedup tie-break policy.
    pub fn with_dedup_policy(mut self, policy: DedupPolicy) -> Self {
        self.dedup_policy = policy;
        self
    }

    /// Set the retry budget for external calls.
    pub fn with_retries(mut self, max_retries: usize, initial_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_initial_delay = initial_delay;
        self
    }

    /// Set the embedding batch size.
    pub fn with_embedding_batch_size(mut self, size: usize) -> Self {
        self.embedding_batch_size = size;
        self
    }

    /// Check all parameter combinations, failing fast on the first bad one.
    pub fn validate(&self) -> Result<()> {
        if self.window_chars == 0 {
            return Err(Error::InvalidParameter {
                name: "window_chars",
                message: "must be greater than zero".into(),
            });
        }
        if self.overlap_chars >= self.window_chars {
            return Err(Error::InvalidParameter {
                name: "overlap_chars",
                message: format!(
                    "overlap {} must be less than window size {}",
                    self.overlap_chars, self.window_chars
                ),
            });
        }
        if self.min_node_chars == 0 {
            return Err(Error::InvalidParameter {
                name: "min_node_chars",
                message: "must be greater than zero".into(),
            });
        }
        if self.min_node_chars > self.max_node_chars {
            return Err(Error::InvalidParameter {
                name: "min_node_chars",
                message: format!(
                    "minimum {} exceeds maximum {}",
                    self.min_node_chars, self.max_node_chars
                ),
            });
        }
        if !(self.iou_threshold > 0.0 && self.iou_threshold <= 1.0) {
            return Err(Error::InvalidParameter {
                name: "iou_threshold",
                message: format!("{} is outside (0, 1]", self.iou_threshold),
            });
        }
        if self.max_children < 2 {
            return Err(Error::InvalidParameter {
                name: "max_children",
                message: "must be at least 2".into(),
            });
        }
        if self.max_depth < 1 {
            return Err(Error::InvalidParameter {
                name: "max_depth",
                message: "must be at least 1".into(),
            });
        }
        if self.embedding_batch_size == 0 {
            return Err(Error::InvalidParameter {
                name: "embedding_batch_size",
                message: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}
