//! The embedding seam: turns leaf text into vectors for clustering.
//!
//! Implementations must be deterministic for identical input text and model
//! configuration. Calls are batched; the core treats results as a simple
//! leaf-to-vector mapping. A batch that fails every retry degrades to
//! neutral all-zero vectors — the affected leaves still participate in
//! clustering, since dropping them would break the coverage invariant.

/// Produces one fixed-length vector per input text.
pub trait Embedder: Sync {
    /// Embed a batch of texts, returning vectors in input order. The
    /// returned length must equal `texts.len()`.
    fn embed(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, String>;
}

/// A function-based embedder.
#[derive(Clone)]
pub struct FnEmbedder<F> {
    f: F,
}

impl<F> FnEmbedder<F>
where
    F: Fn(&[&str]) -> std::result::Result<Vec<Vec<f32>>, String> + Sync,
{
    /// Create an embedder from a function.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Embedder for FnEmbedder<F>
where
    F: Fn(&[&str]) -> std::result::Result<Vec<Vec<f32>>, String> + Sync,
{
    fn embed(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, String> {
        (self.f)(texts)
    }
}
