//! End-to-end orchestration: document in, validated span tree out.
//!
//! The assembler runs the stages in a fixed order: window, extract,
//! reconcile, embed, cluster, label, validate. External calls (extraction,
//! embedding, labeling) are retried with backoff and degrade locally on
//! exhaustion; only empty input, invalid configuration, cancellation, and a
//! failed final validation abort the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::cluster::ClusterBuilder;
use crate::config::TreeConfig;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::extract::Extractor;
use crate::label::{label_tree, Labeler};
use crate::reconcile::{coverage_stats, CandidateSpan, SpanReconciler};
use crate::retry::RetryPolicy;
use crate::tree::{LeafNode, SpanTree, Validator};
use crate::window::{windows, Window};

/// Cooperative cancellation handle, checked between pipeline stages.
///
/// Cancelling never interrupts an in-flight external call; the run stops at
/// the next stage boundary with [`Error::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Builds span trees from documents.
///
/// Holds configuration only; one assembler can build any number of trees,
/// each build independent of the others.
#[derive(Debug, Clone)]
pub struct TreeAssembler {
    config: TreeConfig,
    retry: RetryPolicy,
}

impl TreeAssembler {
    /// Create an assembler, validating the configuration up front.
    pub fn new(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let retry = RetryPolicy::from_config(&config);
        Ok(Self { config, retry })
    }

    /// The configuration this assembler was built with.
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Build a tree over `text` using the given external collaborators.
    pub fn build(
        &self,
        text: &str,
        extractor: &dyn Extractor,
        embedder: &dyn Embedder,
        labeler: &dyn Labeler,
    ) -> Result<SpanTree> {
        self.build_with_cancel(text, extractor, embedder, labeler, &CancelToken::new())
    }

    /// Build a tree, checking `cancel` between stages.
    pub fn build_with_cancel(
        &self,
        text: &str,
        extractor: &dyn Extractor,
        embedder: &dyn Embedder,
        labeler: &dyn Labeler,
        cancel: &CancelToken,
    ) -> Result<SpanTree> {
        if text.trim().is_empty() {
            return Err(Error::EmptyInput);
        }

        let windows = windows(text.len(), self.config.window_chars, self.config.overlap_chars)?;
        info!(doc_len = text.len(), windows = windows.len(), "starting tree build");
        cancel.checkpoint()?;

        let candidates = self.extract_all(text, &windows, extractor);
        let stats = coverage_stats(
            &candidates.iter().map(|c| (c.start, c.end)).collect::<Vec<_>>(),
            text.len(),
        );
        info!(
            candidates = candidates.len(),
            coverage = format!("{:.1}%", stats.coverage_percent),
            gaps = stats.gaps.len(),
            "extraction complete"
        );
        cancel.checkpoint()?;

        let leaves = SpanReconciler::new(&self.config).reconcile(text, candidates)?;
        info!(leaves = leaves.len(), "reconciliation complete");
        cancel.checkpoint()?;

        let vectors = self.embed_leaves(&leaves, embedder);
        cancel.checkpoint()?;

        let mut tree = ClusterBuilder::new(&self.config).build(text, leaves, &vectors)?;
        info!(nodes = tree.len(), depth = tree.depth(), "clustering complete");
        cancel.checkpoint()?;

        label_tree(&mut tree, labeler, &self.retry);
        cancel.checkpoint()?;

        Validator::new(&self.config).validate(&tree)?;
        info!("tree build complete");
        Ok(tree)
    }

    /// Run extraction over all windows in parallel. A window whose extractor
    /// fails every retry contributes nothing; gap fill recovers its range.
    fn extract_all(
        &self,
        text: &str,
        windows: &[Window],
        extractor: &dyn Extractor,
    ) -> Vec<CandidateSpan> {
        windows
            .par_iter()
            .flat_map_iter(|window| {
                let (window, slice) = snap_window(text, window);
                let result = self.retry.run("extraction", || {
                    extractor.extract(&window, slice)
                });
                match result {
                    Ok(mut spans) => {
                        for span in &mut spans {
                            span.window_start = window.start;
                        }
                        spans
                    }
                    Err(err) => {
                        warn!(
                            window = window.wid,
                            error = %err,
                            "window extraction failed, range will be filled"
                        );
                        Vec::new()
                    }
                }
            })
            .collect()
    }

    /// Embed leaf texts in batches, in parallel. A batch that fails every
    /// retry, or returns the wrong count, degrades to zero vectors at the
    /// dimension inferred from the surviving batches.
    fn embed_leaves(&self, leaves: &[LeafNode], embedder: &dyn Embedder) -> Vec<Vec<f32>> {
        let batches: Vec<Option<Vec<Vec<f32>>>> = leaves
            .par_chunks(self.config.embedding_batch_size)
            .map(|batch| {
                let texts: Vec<&str> = batch.iter().map(|l| l.text.as_str()).collect();
                match self.retry.run("embedding", || embedder.embed(&texts)) {
                    Ok(vectors) if vectors.len() == batch.len() => Some(vectors),
                    Ok(vectors) => {
                        warn!(
                            expected = batch.len(),
                            got = vectors.len(),
                            "embedder returned wrong batch size, degrading to zero vectors"
                        );
                        None
                    }
                    Err(err) => {
                        warn!(error = %err, "embedding batch failed, degrading to zero vectors");
                        None
                    }
                }
            })
            .collect();

        let dim = batches
            .iter()
            .flatten()
            .filter_map(|vectors| vectors.first())
            .map(Vec::len)
            .next()
            .unwrap_or(self.config.fallback_embedding_dim);

        let mut out = Vec::with_capacity(leaves.len());
        for (batch, result) in leaves
            .chunks(self.config.embedding_batch_size)
            .zip(batches)
        {
            match result {
                Some(vectors) => out.extend(vectors),
                None => out.extend(std::iter::repeat(vec![0.0; dim]).take(batch.len())),
            }
        }
        out
    }
}

/// Snap a window to char boundaries, widening both offsets forward, and
/// return it with the matching document slice. The extractor sees offsets
/// that agree exactly with the text it is given, so `window.start +
/// relative_offset` arithmetic stays sound; the few bytes a forward-widened
/// start skips are covered by the preceding window's forward-widened end.
fn snap_window<'a>(text: &'a str, window: &Window) -> (Window, &'a str) {
    let mut start = window.start.min(text.len());
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let mut end = window.end.min(text.len()).max(start);
    while !text.is_char_boundary(end) {
        end += 1;
    }
    let snapped = Window {
        wid: window.wid,
        start,
        end,
    };
    (snapped, &text[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let config = TreeConfig::default().with_max_children(1);
        assert!(matches!(
            TreeAssembler::new(config),
            Err(Error::InvalidParameter { name: "max_children", .. })
        ));
    }

    #[test]
    fn snapped_window_offsets_match_its_slice() {
        let text = "aé€b";
        // 'é' spans bytes 1..3, '€' spans 3..6.
        let raw = Window { wid: 0, start: 2, end: 4 };
        let (window, slice) = snap_window(text, &raw);
        assert_eq!((window.start, window.end), (3, 6));
        assert_eq!(slice, "€");
        assert_eq!(&text[window.start..window.end], slice);
    }
}
