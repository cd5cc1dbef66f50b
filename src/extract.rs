//! The extraction seam: proposes candidate spans per window.
//!
//! The actual extraction logic (typically a language-model call) lives
//! outside this crate; implementors plug in via [`Extractor`]. The core only
//! assumes the contract below and defends against its violation: candidates
//! are re-validated against the document during reconciliation, and a window
//! whose extractor fails every retry simply contributes nothing, its range
//! recovered by filler leaves.

use crate::reconcile::CandidateSpan;
use crate::window::Window;

/// Proposes candidate leaf spans for one window.
///
/// Offsets in returned candidates are **document-relative**, not
/// window-relative. Spans may overshoot the window slightly; anything
/// outside document bounds is clamped or dropped downstream. Errors are
/// plain strings: the pipeline retries and then degrades, it never inspects
/// the failure.
pub trait Extractor: Sync {
    /// Extract zero or more candidate spans from `window_text`, the document
    /// slice at the window's offsets.
    fn extract(
        &self,
        window: &Window,
        window_text: &str,
    ) -> std::result::Result<Vec<CandidateSpan>, String>;
}

/// A function-based extractor.
#[derive(Clone)]
pub struct FnExtractor<F> {
    f: F,
}

impl<F> FnExtractor<F>
where
    F: Fn(&Window, &str) -> std::result::Result<Vec<CandidateSpan>, String> + Sync,
{
    /// Create an extractor from a function.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Extractor for FnExtractor<F>
where
    F: Fn(&Window, &str) -> std::result::Result<Vec<CandidateSpan>, String> + Sync,
{
    fn extract(
        &self,
        window: &Window,
        window_text: &str,
    ) -> std::result::Result<Vec<CandidateSpan>, String> {
        (self.f)(window, window_text)
    }
}
