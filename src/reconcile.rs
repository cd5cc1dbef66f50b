//! Span reconciliation: candidate spans in, canonical leaf sequence out.
//!
//! Extraction runs per window, so its output is locally plausible but
//! globally inconsistent: spans from neighboring windows overlap, disagree,
//! or miss stretches of text entirely. The reconciler turns that raw pile
//! into the one sequence every later stage relies on, guaranteeing two
//! global invariants:
//!
//! - **Coverage**: the union of leaf spans equals `[0, doc_len)` exactly.
//! - **No overlap**: `leaf[i].end == leaf[i+1].start` for all adjacent pairs.
//!
//! The steps, in order: validate candidates against the document text, sort,
//! deduplicate by IoU, clip residual partial overlaps, fill gaps with filler
//! leaves, then enforce the soft size bounds. This is the only component
//! allowed to synthesize leaf content not traceable to an extractor, and a
//! single bad window never poisons the document: invalid candidates are
//! dropped with a logged warning, and their range is recovered by gap fill.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::TreeConfig;
use crate::error::{Error, Result};
use crate::tree::{LeafNode, NodeId};

/// Label attached to filler leaves that cover text no extractor claimed.
pub const FILLER_LABEL: &str = "[unextracted]";

/// Raw extractor output: a proposed leaf boundary with an optional label.
///
/// Offsets are absolute (document-relative, not window-relative). `text`
/// must equal `document[start..end]`; the reconciler enforces this rather
/// than trusting it. Transient: consumed entirely by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSpan {
    /// Absolute start offset (inclusive).
    pub start: usize,
    /// Absolute end offset (exclusive).
    pub end: usize,
    /// Claimed verbatim text at `[start, end)`.
    pub text: String,
    /// Optional extractor-proposed label.
    pub label: Option<String>,
    /// Start offset of the window that produced this candidate. Stamped by
    /// the pipeline; used only as a dedup tie-break.
    pub window_start: usize,
}

impl CandidateSpan {
    /// Create a candidate with no window provenance.
    pub fn new(start: usize, end: usize, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            label: None,
            window_start: 0,
        }
    }

    /// Attach a label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Which of two same-unit candidates (IoU at or above threshold) survives.
///
/// The precise rule is not forced by the data, so it is a policy knob; both
/// variants are fully deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupPolicy {
    /// Longer span wins; ties go to the earlier window, then to the
    /// lexicographically smaller label.
    LongerSpanWins,
    /// Earlier window wins; ties go to the longer span, then to the
    /// lexicographically smaller label.
    EarlierWindowWins,
}

impl DedupPolicy {
    /// True if `challenger` should replace `incumbent`.
    fn beats(self, challenger: &Span, incumbent: &Span) -> bool {
        let (a, b) = (challenger, incumbent);
        let ord = match self {
            DedupPolicy::LongerSpanWins => a
                .len()
                .cmp(&b.len())
                .then(b.window_start.cmp(&a.window_start))
                .then(b.label.cmp(&a.label)),
            DedupPolicy::EarlierWindowWins => b
                .window_start
                .cmp(&a.window_start)
                .then(a.len().cmp(&b.len()))
                .then(b.label.cmp(&a.label)),
        };
        ord == std::cmp::Ordering::Greater
    }
}

/// Intersection over Union of two `[start, end)` ranges.
///
/// Returns a value in `[0, 1]`; 0 when the union is empty.
pub fn iou(a_start: usize, a_end: usize, b_start: usize, b_end: usize) -> f64 {
    let inter_start = a_start.max(b_start);
    let inter_end = a_end.min(b_end);
    let intersection = inter_end.saturating_sub(inter_start);

    let union = a_end.max(b_end) - a_start.min(b_start);
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Internal working representation during reconciliation.
#[derive(Debug, Clone)]
struct Span {
    start: usize,
    end: usize,
    label: Option<String>,
    window_start: usize,
}

impl Span {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn filler(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            label: Some(FILLER_LABEL.to_string()),
            window_start: usize::MAX,
        }
    }
}

/// Merges per-window candidate spans into the canonical leaf sequence.
#[derive(Debug, Clone)]
pub struct SpanReconciler {
    iou_threshold: f64,
    dedup_policy: DedupPolicy,
    min_node_chars: usize,
    max_node_chars: usize,
}

impl SpanReconciler {
    /// Create a reconciler from pipeline configuration.
    pub fn new(config: &TreeConfig) -> Self {
        Self {
            iou_threshold: config.iou_threshold,
            dedup_policy: config.dedup_policy,
            min_node_chars: config.min_node_chars,
            max_node_chars: config.max_node_chars,
        }
    }

    /// Reconcile candidates into leaves covering `[0, doc.len())` exactly.
    ///
    /// Leaf ids are assigned `0..n` in document order once the sequence is
    /// final, so identical inputs always yield identical id assignment.
    pub fn reconcile(&self, doc: &str, candidates: Vec<CandidateSpan>) -> Result<Vec<LeafNode>> {
        if doc.is_empty() {
            return Err(Error::EmptyInput);
        }

        let mut spans = self.validate_candidates(doc, candidates);

        // Deterministic processing order: by start, longer spans first.
        spans.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(b.len().cmp(&a.len()))
                .then(a.window_start.cmp(&b.window_start))
                .then(a.label.cmp(&b.label))
        });

        let spans = self.deduplicate(spans);
        let spans = clip_overlaps(spans);
        let spans = fill_gaps(spans, doc.len());
        let spans = self.merge_short(spans);
        let spans = self.split_long(doc, spans);

        debug_assert!(spans.first().is_some_and(|s| s.start == 0));
        debug_assert!(spans.last().is_some_and(|s| s.end == doc.len()));
        debug_assert!(spans.windows(2).all(|w| w[0].end == w[1].start));

        Ok(spans
            .into_iter()
            .enumerate()
            .map(|(i, s)| LeafNode {
                id: NodeId(i),
                start: s.start,
                end: s.end,
                text: doc[s.start..s.end].to_string(),
                label: s.label,
            })
            .collect())
    }

    /// Clamp candidates to document bounds and drop any whose text does not
    /// match the document slice at its offsets. Dropping is a localized
    /// failure: the lost range is recovered later by gap fill.
    fn validate_candidates(&self, doc: &str, candidates: Vec<CandidateSpan>) -> Vec<Span> {
        let doc_len = doc.len();
        let mut out = Vec::with_capacity(candidates.len());

        for c in candidates {
            let start = c.start.min(doc_len);
            let end = c.end.min(doc_len);

            if start >= end {
                warn!(start = c.start, end = c.end, "dropping empty candidate span");
                continue;
            }
            if !doc.is_char_boundary(start) || !doc.is_char_boundary(end) {
                warn!(start, end, "dropping candidate not on a char boundary");
                continue;
            }
            if doc[start..end] != c.text {
                warn!(
                    start,
                    end,
                    window_start = c.window_start,
                    "dropping candidate whose text does not match the document"
                );
                continue;
            }
            out.push(Span {
                start,
                end,
                label: c.label,
                window_start: c.window_start,
            });
        }
        out
    }

    /// Collapse groups of candidates whose IoU meets the threshold, keeping
    /// one representative per group according to the dedup policy.
    fn deduplicate(&self, spans: Vec<Span>) -> Vec<Span> {
        let mut kept: Vec<Span> = Vec::with_capacity(spans.len());
        let mut skip = vec![false; spans.len()];

        for i in 0..spans.len() {
            if skip[i] {
                continue;
            }
            let mut best = i;
            for j in (i + 1)..spans.len() {
                if skip[j] {
                    continue;
                }
                // Sorted by start: once j clears the group leader, no later
                // span can overlap it either.
                if spans[j].start >= spans[i].end {
                    break;
                }
                let overlap = iou(spans[i].start, spans[i].end, spans[j].start, spans[j].end);
                if overlap >= self.iou_threshold {
                    skip[j] = true;
                    if self.dedup_policy.beats(&spans[j], &spans[best]) {
                        best = j;
                    }
                }
            }
            kept.push(spans[best].clone());
        }

        // Group representatives can land out of order; restore it.
        kept.sort_by_key(|s| (s.start, s.end));
        debug!(survivors = kept.len(), "deduplicated candidate spans");
        kept
    }

    /// Merge spans shorter than `min_node_chars` into a neighbor, preferring
    /// the merge that yields the shorter result. Soft constraint: a document
    /// shorter than the minimum stays a single span.
    fn merge_short(&self, mut spans: Vec<Span>) -> Vec<Span> {
        while spans.len() > 1 {
            let shortest = spans
                .iter()
                .enumerate()
                .filter(|(_, s)| s.len() < self.min_node_chars)
                .min_by_key(|(_, s)| s.len())
                .map(|(i, _)| i);
            let Some(i) = shortest else { break };

            let into_prev = if i == 0 {
                false
            } else if i + 1 == spans.len() {
                true
            } else {
                spans[i - 1].len() <= spans[i + 1].len()
            };

            if into_prev {
                let short = spans.remove(i);
                let prev = spans[i - 1].clone();
                spans[i - 1] = merge_pair(prev, short);
            } else {
                let next = spans.remove(i + 1);
                let short = spans[i].clone();
                spans[i] = merge_pair(short, next);
            }
        }
        spans
    }

    /// Split spans longer than `max_node_chars` at whitespace boundaries,
    /// falling back to a hard cut when none exists within the tolerance
    /// window.
    fn split_long(&self, doc: &str, spans: Vec<Span>) -> Vec<Span> {
        let tolerance = (self.max_node_chars / 8).max(16);
        let mut out = Vec::with_capacity(spans.len());

        for s in spans {
            if s.len() <= self.max_node_chars {
                out.push(s);
                continue;
            }
            let mut piece_start = s.start;
            let mut first = true;
            while s.end - piece_start > self.max_node_chars {
                let cut = split_point(doc, piece_start, piece_start + self.max_node_chars, tolerance);
                if cut >= s.end {
                    break;
                }
                out.push(Span {
                    start: piece_start,
                    end: cut,
                    label: if first { s.label.clone() } else { None },
                    window_start: s.window_start,
                });
                first = false;
                piece_start = cut;
            }
            out.push(Span {
                start: piece_start,
                end: s.end,
                label: if first { s.label } else { None },
                window_start: s.window_start,
            });
        }
        out
    }
}

/// Resolve residual partial overlaps between dedup survivors by moving the
/// trailing span's start forward to the leading span's end. Spans swallowed
/// whole are dropped.
fn clip_overlaps(spans: Vec<Span>) -> Vec<Span> {
    let mut out: Vec<Span> = Vec::with_capacity(spans.len());
    for mut s in spans {
        if let Some(prev) = out.last() {
            if s.start < prev.end {
                if s.end <= prev.end {
                    debug!(start = s.start, end = s.end, "dropping fully-contained span");
                    continue;
                }
                s.start = prev.end;
            }
        }
        out.push(s);
    }
    out
}

/// Close every gap (interior, leading, trailing) with a filler span. With no
/// input spans at all, one filler covers the whole document.
fn fill_gaps(spans: Vec<Span>, doc_len: usize) -> Vec<Span> {
    let mut out = Vec::with_capacity(spans.len());
    let mut cursor = 0;

    for s in spans {
        if s.start > cursor {
            warn!(start = cursor, end = s.start, "no candidate covers range, inserting filler");
            out.push(Span::filler(cursor, s.start));
        }
        cursor = s.end;
        out.push(s);
    }
    if cursor < doc_len {
        warn!(start = cursor, end = doc_len, "no candidate covers range, inserting filler");
        out.push(Span::filler(cursor, doc_len));
    }
    out
}

/// Merge two adjacent spans; the longer constituent contributes the label
/// and provenance (ties favor the earlier span).
fn merge_pair(a: Span, b: Span) -> Span {
    debug_assert_eq!(a.end, b.start);
    let (label, window_start) = if b.len() > a.len() {
        (b.label, b.window_start)
    } else {
        (a.label, a.window_start)
    };
    Span {
        start: a.start,
        end: b.end,
        label,
        window_start,
    }
}

/// Find a cut position at or below `ideal`: the nearest position following a
/// whitespace character within `tolerance` bytes, else a hard cut at the
/// nearest char boundary. The returned cut is always a char boundary leaving
/// a non-empty head (`cut > floor`); when no boundary exists at or below
/// `ideal`, the next one above is used, so a size cap smaller than one
/// multibyte character overshoots rather than cutting mid-char.
fn split_point(doc: &str, floor: usize, ideal: usize, tolerance: usize) -> usize {
    let lo = ideal.saturating_sub(tolerance).max(floor + 1);
    let mut cut = ideal;
    while cut >= lo {
        if doc.is_char_boundary(cut)
            && doc[..cut].chars().next_back().is_some_and(char::is_whitespace)
        {
            return cut;
        }
        cut -= 1;
    }

    let mut hard = ideal;
    while hard > floor + 1 && !doc.is_char_boundary(hard) {
        hard -= 1;
    }
    while !doc.is_char_boundary(hard) {
        hard += 1;
    }
    hard
}

/// Coverage diagnostics over a span sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageStats {
    /// Number of document bytes covered by at least one span.
    pub covered_chars: usize,
    /// Covered fraction as a percentage of the document.
    pub coverage_percent: f64,
    /// Uncovered `[start, end)` ranges.
    pub gaps: Vec<(usize, usize)>,
    /// Doubly-claimed `[start, end)` ranges.
    pub overlaps: Vec<(usize, usize)>,
}

/// Compute coverage statistics for `(start, end)` spans over `doc_len` bytes.
///
/// Purely diagnostic: the reconciler's output always reports 100% coverage
/// with no gaps or overlaps, but raw candidate sets usually do not.
pub fn coverage_stats(spans: &[(usize, usize)], doc_len: usize) -> CoverageStats {
    let mut sorted: Vec<(usize, usize)> = spans.to_vec();
    sorted.sort_unstable();

    let mut covered = 0;
    let mut gaps = Vec::new();
    let mut overlaps = Vec::new();
    let mut prev_end = 0;

    for &(start, end) in &sorted {
        if start > prev_end {
            gaps.push((prev_end, start));
        }
        if start < prev_end {
            overlaps.push((start, prev_end.min(end)));
        }
        covered += end.saturating_sub(start.max(prev_end));
        prev_end = prev_end.max(end);
    }
    if prev_end < doc_len {
        gaps.push((prev_end, doc_len));
    }

    let coverage_percent = if doc_len == 0 {
        0.0
    } else {
        covered as f64 / doc_len as f64 * 100.0
    };

    CoverageStats {
        covered_chars: covered,
        coverage_percent,
        gaps,
        overlaps,
    }
}
