//! Order-aware bottom-up clustering of leaves into a bounded tree.
//!
//! Classic agglomerative clustering considers all pairs; this builder only
//! ever merges *adjacent* nodes in the working sequence. That restriction is
//! deliberate: every node's position reflects the document order of its
//! span, so the resulting hierarchy reads in order, internal spans stay
//! contiguous by construction, and each level costs linear rather than
//! quadratic work.
//!
//! Each level greedily merges the most similar adjacent pair (cosine over
//! representative vectors; an internal node's vector is the mean of its
//! children's) until no eligible pair remains, then closes the level. The
//! tree is bounded by `max_children` per node and `max_depth` levels; if the
//! sequence has not collapsed when the depth budget runs out, the remainder
//! is chunked evenly under a synthetic root.

use tracing::{debug, warn};

use crate::config::TreeConfig;
use crate::error::{Error, Result};
use crate::tree::{InternalNode, LeafNode, Node, NodeId, SpanTree};

/// Cosine similarity of two vectors. Zero when either has zero norm, so
/// fallback (all-zero) embedding vectors are neutral rather than poisonous.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

/// Smallest number of levels that can collapse `len` nodes to one with at
/// most `fanout` children per node. Zero for a single node.
pub(crate) fn required_levels(len: usize, fanout: usize) -> usize {
    let mut levels = 0;
    let mut remaining = len;
    while remaining > 1 {
        remaining = remaining.div_ceil(fanout);
        levels += 1;
    }
    levels
}

/// A node in the current working sequence, with its representative vector.
#[derive(Debug, Clone)]
struct Entry {
    node: NodeId,
    vec: Vec<f32>,
}

/// A run of current-level nodes accruing under one prospective parent.
#[derive(Debug, Clone)]
struct Group {
    members: Vec<Entry>,
}

impl Group {
    fn representative(&self) -> Vec<f32> {
        mean_vector(self.members.iter().map(|e| e.vec.as_slice()))
    }
}

fn mean_vector<'a>(vecs: impl Iterator<Item = &'a [f32]>) -> Vec<f32> {
    let mut sum: Vec<f32> = Vec::new();
    let mut count = 0usize;
    for v in vecs {
        if sum.is_empty() {
            sum = v.to_vec();
        } else {
            for (s, x) in sum.iter_mut().zip(v.iter()) {
                *s += *x;
            }
        }
        count += 1;
    }
    if count > 1 {
        let inv = 1.0 / count as f32;
        for s in &mut sum {
            *s *= inv;
        }
    }
    sum
}

/// Builds the tree skeleton over a reconciled leaf sequence.
#[derive(Debug, Clone)]
pub struct ClusterBuilder {
    max_children: usize,
    max_depth: usize,
    similarity_floor: f32,
}

impl ClusterBuilder {
    /// Create a builder from pipeline configuration.
    pub fn new(config: &TreeConfig) -> Self {
        Self {
            max_children: config.max_children,
            max_depth: config.max_depth,
            similarity_floor: config.similarity_floor,
        }
    }

    /// Build the hierarchy over `leaves`, one vector per leaf, in document
    /// order. A single leaf yields a tree that is just that leaf.
    ///
    /// Deterministic: identical leaves and vectors always produce an
    /// identical structure and id assignment (internal ids are assigned
    /// bottom-up in creation order, continuing after the leaf ids).
    pub fn build(&self, text: &str, leaves: Vec<LeafNode>, vectors: &[Vec<f32>]) -> Result<SpanTree> {
        if leaves.is_empty() {
            return Err(Error::EmptyInput);
        }
        if vectors.len() != leaves.len() {
            return Err(Error::InvalidParameter {
                name: "embeddings",
                message: format!("{} vectors for {} leaves", vectors.len(), leaves.len()),
            });
        }

        let n_leaves = leaves.len();
        let mut level: Vec<Entry> = leaves
            .iter()
            .zip(vectors.iter())
            .map(|(leaf, vec)| Entry {
                node: leaf.id,
                vec: vec.clone(),
            })
            .collect();

        let mut nodes: Vec<Node> = leaves.into_iter().map(Node::Leaf).collect();

        if n_leaves == 1 {
            return Ok(SpanTree::new(nodes, NodeId(0), text.to_string()));
        }

        // Depth budget. A document can produce more leaves than
        // max_children^max_depth can hold; in that case the minimal feasible
        // depth wins over the configured bound (children stay bounded).
        let budget = self
            .max_depth
            .max(required_levels(n_leaves, self.max_children));
        if budget > self.max_depth {
            warn!(
                n_leaves,
                max_children = self.max_children,
                max_depth = self.max_depth,
                effective_depth = budget,
                "leaf count exceeds max_children^max_depth, deepening tree"
            );
        }

        // Similarity-driven levels, leaving room to finish structurally.
        let mut levels_built = 0;
        while level.len() > 1
            && levels_built + required_levels(level.len(), self.max_children) < budget
        {
            let before = level.len();
            level = self.merge_level(level, &mut nodes);
            if level.len() == before {
                // Nothing cleared the similarity floor; grouping from here
                // on is structural.
                break;
            }
            levels_built += 1;
            debug!(level = levels_built, nodes = level.len(), "closed cluster level");
        }

        // Structural collapse: chunk evenly until one root remains.
        while level.len() > self.max_children {
            level = self.chunk_evenly(level, &mut nodes);
        }
        if level.len() > 1 {
            let root = push_internal(&mut nodes, level.iter().map(|e| e.node).collect());
            level = vec![Entry {
                node: root,
                vec: mean_vector(level.iter().map(|e| e.vec.as_slice())),
            }];
        }

        let root = level[0].node;
        Ok(SpanTree::new(nodes, root, text.to_string()))
    }

    /// One agglomerative pass: greedily merge the most similar adjacent pair
    /// of groups until no pair is eligible, then emit one node per group.
    /// Groups that end the pass with a single member pass through unwrapped.
    fn merge_level(&self, level: Vec<Entry>, nodes: &mut Vec<Node>) -> Vec<Entry> {
        let mut groups: Vec<Group> = level
            .into_iter()
            .map(|e| Group { members: vec![e] })
            .collect();
        let mut reps: Vec<Vec<f32>> = groups.iter().map(Group::representative).collect();

        loop {
            let mut best: Option<(usize, f32)> = None;
            for i in 0..groups.len().saturating_sub(1) {
                if groups[i].members.len() + groups[i + 1].members.len() > self.max_children {
                    continue;
                }
                let sim = cosine_similarity(&reps[i], &reps[i + 1]);
                if sim < self.similarity_floor {
                    continue;
                }
                // Strict comparison keeps ties deterministic: leftmost wins.
                if best.map_or(true, |(_, s)| sim > s) {
                    best = Some((i, sim));
                }
            }
            let Some((i, _)) = best else { break };

            let right = groups.remove(i + 1);
            groups[i].members.extend(right.members);
            reps.remove(i + 1);
            reps[i] = groups[i].representative();
        }

        groups
            .into_iter()
            .zip(reps)
            .map(|(group, rep)| {
                if group.members.len() == 1 {
                    group.members.into_iter().next().expect("one member")
                } else {
                    let node =
                        push_internal(nodes, group.members.iter().map(|e| e.node).collect());
                    Entry { node, vec: rep }
                }
            })
            .collect()
    }

    /// Split the sequence into `ceil(len / max_children)` contiguous chunks
    /// of near-equal size, wrapping each multi-member chunk in an internal
    /// node. Chunk sizes never fall below 2 while the sequence is longer
    /// than `max_children`.
    fn chunk_evenly(&self, level: Vec<Entry>, nodes: &mut Vec<Node>) -> Vec<Entry> {
        let len = level.len();
        let n_chunks = len.div_ceil(self.max_children);
        let base = len / n_chunks;
        let remainder = len % n_chunks;

        let mut out = Vec::with_capacity(n_chunks);
        let mut iter = level.into_iter();
        for c in 0..n_chunks {
            let size = if c < remainder { base + 1 } else { base };
            let members: Vec<Entry> = iter.by_ref().take(size).collect();
            if members.len() == 1 {
                out.extend(members);
            } else {
                let rep = mean_vector(members.iter().map(|e| e.vec.as_slice()));
                let node = push_internal(nodes, members.iter().map(|e| e.node).collect());
                out.push(Entry { node, vec: rep });
            }
        }
        out
    }
}

fn push_internal(nodes: &mut Vec<Node>, children: Vec<NodeId>) -> NodeId {
    let id = NodeId(nodes.len());
    nodes.push(Node::Internal(InternalNode {
        id,
        label: None,
        children,
    }));
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves_with_vectors(vecs: Vec<Vec<f32>>) -> (String, Vec<LeafNode>, Vec<Vec<f32>>) {
        // Ten-char spans laid out back to back.
        let n = vecs.len();
        let text = "abcdefghij".repeat(n);
        let leaves = (0..n)
            .map(|i| LeafNode {
                id: NodeId(i),
                start: i * 10,
                end: (i + 1) * 10,
                text: "abcdefghij".to_string(),
                label: None,
            })
            .collect();
        (text, leaves, vecs)
    }

    fn builder(max_children: usize, max_depth: usize) -> ClusterBuilder {
        ClusterBuilder::new(
            &TreeConfig::default()
                .with_max_children(max_children)
                .with_max_depth(max_depth),
        )
    }

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let sim = cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn required_levels_bounds() {
        assert_eq!(required_levels(1, 10), 0);
        assert_eq!(required_levels(2, 10), 1);
        assert_eq!(required_levels(10, 10), 1);
        assert_eq!(required_levels(11, 10), 2);
        assert_eq!(required_levels(100, 3), 5);
    }

    #[test]
    fn single_leaf_is_its_own_tree() {
        let (text, leaves, vecs) = leaves_with_vectors(vec![vec![1.0, 0.0]]);
        let tree = builder(10, 4).build(&text, leaves, &vecs).unwrap();
        assert!(tree.root().is_leaf());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn similar_adjacent_leaves_group_together() {
        // Two tight clusters in sequence: [a, a, b, b].
        let (text, leaves, vecs) = leaves_with_vectors(vec![
            vec![1.0, 0.0],
            vec![0.99, 0.01],
            vec![0.0, 1.0],
            vec![0.01, 0.99],
        ]);
        let tree = builder(2, 4).build(&text, leaves, &vecs).unwrap();

        let root = tree.root().as_internal().expect("internal root");
        assert_eq!(root.children.len(), 2);
        let left = tree.get(root.children[0]).unwrap();
        let right = tree.get(root.children[1]).unwrap();
        assert_eq!(left.children(), &[NodeId(0), NodeId(1)]);
        assert_eq!(right.children(), &[NodeId(2), NodeId(3)]);
    }

    #[test]
    fn max_children_is_respected_for_identical_embeddings() {
        // 10 near-identical leaves, max_children 3.
        let (text, leaves, vecs) =
            leaves_with_vectors(vec![vec![1.0, 0.0, 0.5]; 10]);
        let tree = builder(3, 4).build(&text, leaves, &vecs).unwrap();

        for node in tree.iter() {
            if let Some(internal) = node.as_internal() {
                assert!(
                    (2..=3).contains(&internal.children.len()),
                    "node {} has {} children",
                    internal.id,
                    internal.children.len()
                );
            }
        }
        assert!(tree.depth() <= 4);
    }

    #[test]
    fn document_order_is_preserved() {
        let (text, leaves, vecs) = leaves_with_vectors(vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![1.0, 0.0],
        ]);
        let tree = builder(3, 4).build(&text, leaves, &vecs).unwrap();
        let starts: Vec<usize> = tree.leaves().iter().map(|l| l.start).collect();
        assert_eq!(starts, vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn similarity_floor_forces_structural_grouping() {
        // Orthogonal vectors with a floor above zero: no similarity merge
        // is eligible, yet a single root must still emerge.
        let (text, leaves, vecs) = leaves_with_vectors(vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ]);
        let config = TreeConfig::default()
            .with_max_children(10)
            .with_similarity_floor(0.5);
        let tree = ClusterBuilder::new(&config)
            .build(&text, leaves, &vecs)
            .unwrap();
        let root = tree.root().as_internal().expect("internal root");
        assert_eq!(root.children.len(), 3);
        assert_eq!(tree.depth(), 1);
    }

    #[test]
    fn deep_sequences_stay_within_depth_budget() {
        let (text, leaves, vecs) = leaves_with_vectors(vec![vec![1.0, 0.5]; 50]);
        let tree = builder(4, 5).build(&text, leaves, &vecs).unwrap();
        assert!(tree.depth() <= 5, "depth {} exceeds budget", tree.depth());
        for node in tree.iter() {
            if let Some(internal) = node.as_internal() {
                assert!((2..=4).contains(&internal.children.len()));
            }
        }
    }

    #[test]
    fn infeasible_bounds_deepen_rather_than_widen() {
        // 30 leaves cannot fit under max_children=2, max_depth=2; the
        // children bound must hold and depth grows to the minimum feasible.
        let (text, leaves, vecs) = leaves_with_vectors(vec![vec![1.0]; 30]);
        let tree = builder(2, 2).build(&text, leaves, &vecs).unwrap();
        for node in tree.iter() {
            if let Some(internal) = node.as_internal() {
                assert_eq!(internal.children.len(), 2);
            }
        }
        assert_eq!(tree.depth(), required_levels(30, 2));
    }

    #[test]
    fn build_is_deterministic() {
        let vecs: Vec<Vec<f32>> = (0..12)
            .map(|i| vec![(i as f32).sin(), (i as f32).cos()])
            .collect();
        let (text, leaves, vectors) = leaves_with_vectors(vecs);
        let a = builder(4, 3)
            .build(&text, leaves.clone(), &vectors)
            .unwrap();
        let b = builder(4, 3).build(&text, leaves, &vectors).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn vector_count_mismatch_is_rejected() {
        let (text, leaves, _) = leaves_with_vectors(vec![vec![1.0]; 3]);
        let err = builder(4, 3).build(&text, leaves, &[vec![1.0]]);
        assert!(matches!(err, Err(Error::InvalidParameter { .. })));
    }
}
