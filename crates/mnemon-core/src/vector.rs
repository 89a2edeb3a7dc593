//! Ephemeral approximate-nearest-neighbor vector index.
//!
//! The index is a single-layer proximity graph built incrementally: each
//! insertion runs a greedy beam search over the existing graph and
//! connects the new node to its nearest neighbors up to a fixed degree
//! bound. Insertion cost stays bounded, at the cost of approximate (not
//! exact) recall, an explicit trade-off for context retrieval.
//!
//! Queries walk the graph best-first from a fixed entry point with a
//! bounded beam (`ef_search`), then filter by minimum cosine similarity.
//!
//! Removal drops the node and all edges touching it. Edges are not
//! redistributed among surviving neighbors, so recall near a deleted
//! region may degrade until neighboring nodes are re-inserted; `len()`
//! always reflects the live node count exactly.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::IndexError;
use crate::models::cosine_similarity;

/// Default degree bound for graph nodes.
pub const DEFAULT_MAX_DEGREE: usize = 16;
/// Default beam width for graph traversal.
pub const DEFAULT_EF_SEARCH: usize = 64;

/// A search hit: document id plus cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub score: f32,
}

struct Node {
    id: String,
    vector: Vec<f32>,
    /// Monotonic insertion order, used for deterministic tie-breaking.
    order: u64,
    edges: Vec<usize>,
}

/// Beam-search candidate ordered by similarity, ties broken by earlier
/// insertion order.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    sim: f32,
    order: u64,
    slot: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sim
            .partial_cmp(&other.sim)
            .unwrap_or(Ordering::Equal)
            // On equal similarity the earlier-inserted node ranks higher.
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Incremental proximity-graph ANN index over fixed-dimensionality
/// embedding vectors.
///
/// Dimensionality is fixed at construction; `add` and `search` reject
/// vectors of any other length with [`IndexError::DimensionMismatch`].
pub struct VectorIndex {
    dims: usize,
    max_degree: usize,
    ef_search: usize,
    nodes: Vec<Option<Node>>,
    ids: HashMap<String, usize>,
    free: Vec<usize>,
    entry: Option<usize>,
    next_order: u64,
}

impl VectorIndex {
    /// Create an index with default graph parameters.
    pub fn new(dims: usize) -> Self {
        Self::with_params(dims, DEFAULT_MAX_DEGREE, DEFAULT_EF_SEARCH)
    }

    /// Create an index with explicit degree bound and beam width.
    pub fn with_params(dims: usize, max_degree: usize, ef_search: usize) -> Self {
        Self {
            dims,
            max_degree: max_degree.max(1),
            ef_search: ef_search.max(1),
            nodes: Vec::new(),
            ids: HashMap::new(),
            free: Vec::new(),
            entry: None,
            next_order: 0,
        }
    }

    /// Configured vector dimensionality.
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Number of live vectors in the index.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Insert a vector under the given document id.
    ///
    /// Re-adding an existing id replaces the prior vector. Fails with
    /// [`IndexError::DimensionMismatch`] if the vector length differs
    /// from the configured dimensionality; the index is unmodified in
    /// that case.
    pub fn add(&mut self, id: impl Into<String>, vector: Vec<f32>) -> Result<(), IndexError> {
        if vector.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }

        let id = id.into();
        if self.ids.contains_key(&id) {
            self.remove(&id);
        }

        // Find neighbors before allocating the new node so the beam
        // search never visits it.
        let neighbors: Vec<usize> = if self.entry.is_some() {
            self.beam_search(&vector, self.ef_search.max(self.max_degree))
                .into_iter()
                .take(self.max_degree)
                .map(|c| c.slot)
                .collect()
        } else {
            Vec::new()
        };

        let order = self.next_order;
        self.next_order += 1;

        let node = Node {
            id: id.clone(),
            vector,
            order,
            edges: neighbors.clone(),
        };

        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.ids.insert(id, slot);

        for &n in &neighbors {
            self.link(n, slot);
        }

        if self.entry.is_none() {
            self.entry = Some(slot);
        }

        Ok(())
    }

    /// Remove a vector by document id. Returns whether it was present.
    ///
    /// Surviving neighbors simply lose their edge to the removed node;
    /// the graph is not re-linked.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(slot) = self.ids.remove(id) else {
            return false;
        };

        let edges = match self.nodes[slot].take() {
            Some(node) => node.edges,
            None => Vec::new(),
        };
        for e in edges {
            if let Some(n) = self.nodes[e].as_mut() {
                n.edges.retain(|&s| s != slot);
            }
        }
        self.free.push(slot);

        if self.entry == Some(slot) {
            // Reseed the entry point with the earliest-inserted live node.
            self.entry = self
                .nodes
                .iter()
                .enumerate()
                .filter_map(|(i, n)| n.as_ref().map(|n| (n.order, i)))
                .min()
                .map(|(_, i)| i);
        }

        true
    }

    /// Top-k cosine similarity search.
    ///
    /// Returns at most `k` hits with similarity ≥ `min_score`, ordered by
    /// descending similarity; equal scores rank the earlier-inserted
    /// document first.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
    ) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }
        if self.ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut candidates = self.beam_search(query, self.ef_search.max(k));
        candidates.retain(|c| c.sim >= min_score);
        candidates.truncate(k);

        Ok(candidates
            .into_iter()
            .filter_map(|c| {
                self.nodes[c.slot].as_ref().map(|n| Neighbor {
                    id: n.id.clone(),
                    score: c.sim,
                })
            })
            .collect())
    }

    /// Drop all vectors and reset the graph.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.ids.clear();
        self.free.clear();
        self.entry = None;
    }

    /// Add a directed edge `from → to`, pruning the weakest edge if the
    /// degree bound is exceeded.
    fn link(&mut self, from: usize, to: usize) {
        let Some(node) = self.nodes[from].as_ref() else {
            return;
        };
        if node.edges.contains(&to) {
            return;
        }

        self.nodes[from].as_mut().unwrap().edges.push(to);

        let node = self.nodes[from].as_ref().unwrap();
        if node.edges.len() <= self.max_degree {
            return;
        }

        // Over the degree bound: drop the least similar edge and its
        // backlink so the graph stays symmetric.
        let from_vec = node.vector.clone();
        let worst = node
            .edges
            .iter()
            .copied()
            .min_by(|&a, &b| {
                let sa = self.slot_sim(&from_vec, a);
                let sb = self.slot_sim(&from_vec, b);
                sa.partial_cmp(&sb).unwrap_or(Ordering::Equal)
            })
            .unwrap();

        self.nodes[from]
            .as_mut()
            .unwrap()
            .edges
            .retain(|&s| s != worst);
        if let Some(n) = self.nodes[worst].as_mut() {
            n.edges.retain(|&s| s != from);
        }
    }

    fn slot_sim(&self, query: &[f32], slot: usize) -> f32 {
        self.nodes[slot]
            .as_ref()
            .map(|n| cosine_similarity(query, &n.vector))
            .unwrap_or(f32::NEG_INFINITY)
    }

    /// Greedy best-first traversal from the entry point, keeping a beam
    /// of the `ef` best candidates seen. Returns candidates in
    /// descending order (ties by insertion order).
    fn beam_search(&self, query: &[f32], ef: usize) -> Vec<Candidate> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };

        let mut visited: HashSet<usize> = HashSet::new();
        // Frontier of nodes whose edges are yet to be expanded (max-heap).
        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::new();
        // The ef best candidates seen so far (min-heap for cheap worst
        // lookup).
        let mut best: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();

        let seed = Candidate {
            sim: self.slot_sim(query, entry),
            order: self.nodes[entry].as_ref().map(|n| n.order).unwrap_or(0),
            slot: entry,
        };
        visited.insert(entry);
        frontier.push(seed);
        best.push(Reverse(seed));

        while let Some(current) = frontier.pop() {
            if best.len() >= ef {
                let worst = best.peek().unwrap().0;
                if current < worst {
                    break;
                }
            }

            let edges = match self.nodes[current.slot].as_ref() {
                Some(n) => n.edges.clone(),
                None => continue,
            };
            for e in edges {
                if !visited.insert(e) {
                    continue;
                }
                let Some(n) = self.nodes[e].as_ref() else {
                    continue;
                };
                let cand = Candidate {
                    sim: cosine_similarity(query, &n.vector),
                    order: n.order,
                    slot: e,
                };
                frontier.push(cand);
                best.push(Reverse(cand));
                if best.len() > ef {
                    best.pop();
                }
            }
        }

        let mut out: Vec<Candidate> = best.into_iter().map(|r| r.0).collect();
        out.sort_by(|a, b| b.cmp(a));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(x: f32, y: f32, z: f32) -> Vec<f32> {
        let norm = (x * x + y * y + z * z).sqrt();
        vec![x / norm, y / norm, z / norm]
    }

    #[test]
    fn test_len_tracks_inserts() {
        let mut index = VectorIndex::new(3);
        for i in 0..25 {
            index
                .add(format!("doc-{i}"), unit(i as f32 + 1.0, 1.0, 0.5))
                .unwrap();
        }
        assert_eq!(index.len(), 25);
    }

    #[test]
    fn test_dimension_mismatch_on_add() {
        let mut index = VectorIndex::new(3);
        let err = index.add("doc", vec![1.0, 0.0]).unwrap_err();
        assert_eq!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        );
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_dimension_mismatch_on_search() {
        let index = VectorIndex::new(3);
        assert!(index.search(&[1.0], 5, 0.0).is_err());
    }

    #[test]
    fn test_search_bounds_and_threshold() {
        let mut index = VectorIndex::new(3);
        index.add("a", unit(1.0, 0.0, 0.0)).unwrap();
        index.add("b", unit(0.9, 0.1, 0.0)).unwrap();
        index.add("c", unit(0.0, 1.0, 0.0)).unwrap();
        index.add("d", unit(0.0, 0.0, 1.0)).unwrap();

        let query = unit(1.0, 0.0, 0.0);
        let hits = index.search(&query, 2, 0.5).unwrap();
        assert!(hits.len() <= 2);
        assert!(hits.iter().all(|h| h.score >= 0.5));
        assert_eq!(hits[0].id, "a");
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_tie_break_by_insertion_order() {
        let mut index = VectorIndex::new(3);
        let v = unit(1.0, 1.0, 0.0);
        index.add("first", v.clone()).unwrap();
        index.add("second", v.clone()).unwrap();

        let hits = index.search(&v, 2, 0.0).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "first");
        assert_eq!(hits[1].id, "second");
    }

    #[test]
    fn test_remove_keeps_len_accurate() {
        let mut index = VectorIndex::new(3);
        index.add("a", unit(1.0, 0.0, 0.0)).unwrap();
        index.add("b", unit(0.0, 1.0, 0.0)).unwrap();
        index.add("c", unit(0.0, 0.0, 1.0)).unwrap();

        assert!(index.remove("b"));
        assert!(!index.remove("b"));
        assert_eq!(index.len(), 2);

        let hits = index.search(&unit(0.0, 1.0, 0.0), 3, -1.0).unwrap();
        assert!(hits.iter().all(|h| h.id != "b"));
    }

    #[test]
    fn test_remove_entry_point_then_search() {
        let mut index = VectorIndex::new(3);
        index.add("a", unit(1.0, 0.0, 0.0)).unwrap();
        index.add("b", unit(0.8, 0.2, 0.0)).unwrap();
        index.add("c", unit(0.7, 0.3, 0.0)).unwrap();

        // "a" is the entry point; removal must reseed traversal.
        assert!(index.remove("a"));
        let hits = index.search(&unit(1.0, 0.0, 0.0), 3, 0.0).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn test_re_add_replaces() {
        let mut index = VectorIndex::new(3);
        index.add("a", unit(1.0, 0.0, 0.0)).unwrap();
        index.add("a", unit(0.0, 1.0, 0.0)).unwrap();
        assert_eq!(index.len(), 1);

        let hits = index.search(&unit(0.0, 1.0, 0.0), 1, 0.9).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = VectorIndex::new(4);
        assert!(index.search(&[0.5; 4], 10, 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_clear() {
        let mut index = VectorIndex::new(3);
        index.add("a", unit(1.0, 0.0, 0.0)).unwrap();
        index.clear();
        assert!(index.is_empty());
        assert!(index.search(&unit(1.0, 0.0, 0.0), 1, 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_recall_on_larger_graph() {
        // With ef_search well above the corpus size the walk visits the
        // whole connected graph, so the nearest vector must surface.
        let mut index = VectorIndex::with_params(3, 4, 64);
        for i in 0..40 {
            let angle = i as f32 * 0.07;
            index
                .add(format!("doc-{i}"), unit(angle.cos(), angle.sin(), 0.3))
                .unwrap();
        }
        let target = unit((20.0 * 0.07f32).cos(), (20.0 * 0.07f32).sin(), 0.3);
        let hits = index.search(&target, 1, 0.0).unwrap();
        assert_eq!(hits[0].id, "doc-20");
    }
}
