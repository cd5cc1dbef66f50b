//! The labeling seam and its adapter.
//!
//! Leaf labels are deterministic (the span's first words). Internal node
//! labels come from the external [`Labeler`], fed short snippets of its
//! children; labeling is strictly best-effort, and any failure falls back to
//! a synthesized label naming the covered offsets so the tree stays usable.

use tracing::warn;

use crate::retry::RetryPolicy;
use crate::tree::{Node, NodeId, SpanTree};

const LEAF_LABEL_WORDS: usize = 8;
const LEAF_LABEL_MAX_CHARS: usize = 60;
const SNIPPET_MAX_CHARS: usize = 200;
const SNIPPET_CHILD_LIMIT: usize = 10;

/// Produces a short label summarizing a group of child snippets.
pub trait Labeler: Sync {
    /// Label a section given representative snippets of its children.
    fn label(&self, snippets: &[String]) -> std::result::Result<String, String>;
}

/// A function-based labeler.
#[derive(Clone)]
pub struct FnLabeler<F> {
    f: F,
}

impl<F> FnLabeler<F>
where
    F: Fn(&[String]) -> std::result::Result<String, String> + Sync,
{
    /// Create a labeler from a function.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> Labeler for FnLabeler<F>
where
    F: Fn(&[String]) -> std::result::Result<String, String> + Sync,
{
    fn label(&self, snippets: &[String]) -> std::result::Result<String, String> {
        (self.f)(snippets)
    }
}

/// Label every node bottom-up: leaves deterministically, internal nodes via
/// the external labeler with retry and fallback.
///
/// Node ids are assigned bottom-up at construction, so walking them in
/// ascending order always labels children before their parents.
pub(crate) fn label_tree(tree: &mut SpanTree, labeler: &dyn Labeler, retry: &RetryPolicy) {
    for index in 0..tree.len() {
        let id = NodeId(index);
        let label = match tree.get(id).expect("id within arena") {
            Node::Leaf(leaf) => {
                if leaf.label.is_some() {
                    continue;
                }
                leaf_label(&leaf.text)
            }
            Node::Internal(node) => {
                let snippets = child_snippets(tree, &node.children);
                let (start, end) = tree.span(id).expect("internal node has children");
                match retry.run("labeling", || labeler.label(&snippets)) {
                    Ok(label) => clean_label(label),
                    Err(err) => {
                        warn!(node = %id, error = %err, "labeling failed, synthesizing label");
                        format!("Sections covering offsets {start}-{end}")
                    }
                }
            }
        };
        tree.set_label(id, label);
    }
}

/// Deterministic leaf label: the first few words of the span.
fn leaf_label(text: &str) -> String {
    let joined = text
        .split_whitespace()
        .take(LEAF_LABEL_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    truncate(&joined, LEAF_LABEL_MAX_CHARS)
}

/// Representative snippets for an internal node's children: leaf text
/// truncated, already-labeled sections by reference.
fn child_snippets(tree: &SpanTree, children: &[NodeId]) -> Vec<String> {
    children
        .iter()
        .take(SNIPPET_CHILD_LIMIT)
        .filter_map(|&child| match tree.get(child)? {
            Node::Leaf(leaf) => Some(truncate(&leaf.text, SNIPPET_MAX_CHARS)),
            Node::Internal(node) => {
                let label = node.label.as_deref()?;
                Some(format!("[Section: {label}]"))
            }
        })
        .collect()
}

fn clean_label(label: String) -> String {
    let trimmed = label.trim().trim_matches(['"', '\'']).to_string();
    truncate(&trimmed, 80)
}

/// Char-count truncation with a trailing ellipsis, safe on multibyte text.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{head}...")
}
