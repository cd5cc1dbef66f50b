//! Windowing: splitting a document into overlapping analysis ranges.
//!
//! Windows are the unit of external extraction. They are produced in
//! increasing-`start` order with a fixed stride of `window_chars -
//! overlap_chars`, and together they cover every offset of the document; the
//! final window is clamped to end exactly at the document length.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A contiguous byte range of the source document, analyzed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Window index, increasing with `start`.
    pub wid: usize,
    /// Absolute start offset (inclusive).
    pub start: usize,
    /// Absolute end offset (exclusive). Always `<= doc_len`.
    pub end: usize,
}

impl Window {
    /// Window length in bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the window is empty. Never true for produced windows.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Split `doc_len` bytes into overlapping windows.
///
/// Every offset in `[0, doc_len)` is contained in at least one window, and
/// the last window ends exactly at `doc_len`. An empty document produces no
/// windows. Pure function; fails only on invalid parameters.
pub fn windows(doc_len: usize, window_chars: usize, overlap_chars: usize) -> Result<Vec<Window>> {
    check_params(window_chars, overlap_chars)?;

    if doc_len == 0 {
        return Ok(Vec::new());
    }

    let mut out = Vec::with_capacity(window_count(doc_len, window_chars, overlap_chars));
    let mut start = 0;
    let mut wid = 0;

    loop {
        let end = (start + window_chars).min(doc_len);
        out.push(Window { wid, start, end });
        if end >= doc_len {
            break;
        }
        start = end - overlap_chars;
        wid += 1;
    }

    Ok(out)
}

/// Number of windows [`windows`] will produce, without allocating them.
pub fn window_count(doc_len: usize, window_chars: usize, overlap_chars: usize) -> usize {
    if doc_len == 0 || window_chars == 0 {
        return 0;
    }
    if doc_len <= window_chars {
        return 1;
    }
    let step = window_chars.saturating_sub(overlap_chars);
    if step == 0 {
        return 1;
    }
    1 + (doc_len - window_chars).div_ceil(step)
}

fn check_params(window_chars: usize, overlap_chars: usize) -> Result<()> {
    if window_chars == 0 {
        return Err(Error::InvalidParameter {
            name: "window_chars",
            message: "must be greater than zero".into(),
        });
    }
    if overlap_chars >= window_chars {
        return Err(Error::InvalidParameter {
            name: "overlap_chars",
            message: format!("overlap {overlap_chars} must be less than window size {window_chars}"),
        });
    }
    Ok(())
}
