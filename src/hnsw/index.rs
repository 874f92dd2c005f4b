//! HNSW index.
//!
//! Multi-layer proximity graph for approximate nearest-neighbor search.
//!
//! **Insert**: draw a random top level, greedily descend from the entry
//! point to one level above it, then wire bidirectional edges on every layer
//! from the top level down to 0 using a bounded best-first search.
//!
//! **Search**: greedy descent to layer 1, then one bounded best-first pass
//! on layer 0 with `ef` capacity.
//!
//! **Delete**: lazy. Removed ids are tombstoned and filtered from results
//! but stay in the graph as routing vertices, so connectivity never
//! degrades.
//!
//! Equal distances everywhere break toward the smaller internal id, which
//! keeps searches, rebuilds, and the serialized form deterministic.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::node::Node;
use super::visited::VisitedGuard;
use crate::distance::Metric;
use crate::error::{Error, Result};

/// Fixed level-assignment seed so freshly built graphs are reproducible.
const DEFAULT_SEED: u64 = 42;

/// Frontier entry (min-heap by distance, then id).
#[derive(Clone, Copy)]
struct Candidate {
    distance: f32,
    id: i64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap pops the smallest (distance, id) first.
        // total_cmp orders NaN after every finite distance.
        other
            .distance
            .total_cmp(&self.distance)
            .then(other.id.cmp(&self.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Result-set entry (max-heap: the worst of the best `ef` sits on top).
#[derive(Clone, Copy)]
struct SearchResult {
    distance: f32,
    id: i64,
}

impl PartialEq for SearchResult {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchResult {}

impl Ord for SearchResult {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for SearchResult {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Hierarchical navigable small world graph over internal ids.
#[derive(Debug)]
pub struct HnswIndex {
    pub(crate) dim: usize,
    pub(crate) metric: Metric,

    /// Max neighbors per node on layers ≥ 1.
    pub(crate) m: usize,
    /// Max neighbors on layer 0 (2·M).
    pub(crate) m_max0: usize,
    /// Frontier capacity while wiring a new node.
    pub(crate) ef_construction: usize,
    /// Level multiplier 1/ln(M) for the exponential layer distribution.
    level_mult: f64,

    /// Graph nodes, addressed by internal id.
    pub(crate) nodes: HashMap<i64, Node>,
    /// Vector for every node ever inserted, live or tombstoned.
    pub(crate) vectors: HashMap<i64, Vec<f32>>,
    /// Tombstoned internal ids.
    pub(crate) deleted: HashSet<i64>,

    /// Node at the highest layer; `None` while the graph is empty.
    pub(crate) entry_point: Option<i64>,
    pub(crate) max_level: i32,

    rng: StdRng,
}

impl HnswIndex {
    /// Create an empty index with the fixed default seed.
    pub fn new(dim: usize, metric: Metric, m: usize, ef_construction: usize) -> Result<Self> {
        Self::with_seed(dim, metric, m, ef_construction, DEFAULT_SEED)
    }

    /// Create an empty index with an explicit level-assignment seed.
    pub fn with_seed(
        dim: usize,
        metric: Metric,
        m: usize,
        ef_construction: usize,
        seed: u64,
    ) -> Result<Self> {
        if dim < 1 {
            return Err(Error::InvalidArgument(format!(
                "dimension must be >= 1, got {dim}"
            )));
        }
        if m < 1 {
            return Err(Error::InvalidArgument(format!("M must be >= 1, got {m}")));
        }
        if ef_construction < 1 {
            return Err(Error::InvalidArgument(format!(
                "ef_construction must be >= 1, got {ef_construction}"
            )));
        }

        // ln(1) = 0: with M = 1 every node stays on layer 0.
        let level_mult = if m > 1 { 1.0 / (m as f64).ln() } else { 0.0 };

        Ok(Self {
            dim,
            metric,
            m,
            m_max0: m * 2,
            ef_construction,
            level_mult,
            nodes: HashMap::new(),
            vectors: HashMap::new(),
            deleted: HashSet::new(),
            entry_point: None,
            max_level: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Reassemble an index from its serialized parts.
    pub(crate) fn from_parts(
        dim: usize,
        metric: Metric,
        m: usize,
        ef_construction: usize,
        nodes: HashMap<i64, Node>,
        vectors: HashMap<i64, Vec<f32>>,
        deleted: HashSet<i64>,
        entry_point: Option<i64>,
        max_level: i32,
    ) -> Result<Self> {
        let mut index = Self::new(dim, metric, m, ef_construction)?;
        index.nodes = nodes;
        index.vectors = vectors;
        index.deleted = deleted;
        index.entry_point = entry_point;
        index.max_level = max_level;
        Ok(index)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn ef_construction(&self) -> usize {
        self.ef_construction
    }

    /// Number of live (non-tombstoned) nodes.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn distance_to(&self, query: &[f32], id: i64) -> f32 {
        self.metric.distance(query, &self.vectors[&id])
    }

    /// Draw a top level from the exponential distribution: ⌊−ln(U)/ln(M)⌋
    /// with U uniform on (0, 1].
    fn random_level(&mut self) -> i32 {
        let u: f64 = 1.0 - self.rng.gen::<f64>();
        let level = (-u.ln() * self.level_mult).floor() as i32;
        level.max(0)
    }

    /// Insert a vector under a never-before-seen internal id.
    pub fn add(&mut self, id: i64, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        // Internal ids are never reused, tombstoned or not.
        if self.nodes.contains_key(&id) {
            return Err(Error::DuplicateId(id as u64));
        }

        let level = self.random_level();
        let mut node = Node::new(id, level);
        self.vectors.insert(id, vector);
        let query = self.vectors[&id].clone();

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            self.nodes.insert(id, node);
            return Ok(());
        };

        // Phase 1: greedy descent through the layers above the new node.
        let mut curr = entry;
        let mut l = self.max_level;
        while l > level {
            curr = self.greedy_step(&query, curr, l);
            l -= 1;
        }

        // Phase 2: wire edges from min(level, max_level) down to layer 0.
        let start = level.min(self.max_level);
        for l in (0..=start).rev() {
            let cap = if l == 0 { self.m_max0 } else { self.m };

            let candidates = self.search_layer(&query, curr, self.ef_construction, l);
            let selected: Vec<i64> = candidates.iter().take(cap).map(|&(n, _)| n).collect();

            for &neighbor in &selected {
                node.add_neighbor(l, neighbor);
            }

            // Reciprocal edges, pruning any neighbor pushed past its cap.
            for &neighbor in &selected {
                let mut over = false;
                if let Some(n) = self.nodes.get_mut(&neighbor) {
                    n.add_neighbor(l, id);
                    over = n.neighbors(l).len() > cap;
                }
                if over {
                    self.prune_neighbors(neighbor, l, cap);
                }
            }

            if let Some(&(closest, _)) = candidates.first() {
                curr = closest;
            }
        }

        self.nodes.insert(id, node);

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }

        Ok(())
    }

    /// Rebuild `node_id`'s adjacency at `level`, keeping the `cap` closest.
    fn prune_neighbors(&mut self, node_id: i64, level: i32, cap: usize) {
        let base = self.vectors[&node_id].clone();
        let current = self.nodes[&node_id].neighbors(level).to_vec();

        let mut ranked: Vec<(f32, i64)> = current
            .iter()
            .map(|&n| (self.metric.distance(&base, &self.vectors[&n]), n))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let kept: Vec<i64> = ranked.into_iter().take(cap).map(|(_, n)| n).collect();
        if let Some(neighbors) = self
            .nodes
            .get_mut(&node_id)
            .and_then(|n| n.neighbors_mut(level))
        {
            *neighbors = kept;
        }
    }

    /// One greedy best-improvement walk at `level`: repeatedly move to the
    /// closest neighbor of the current node until no neighbor is strictly
    /// closer.
    fn greedy_step(&self, query: &[f32], entry: i64, level: i32) -> i64 {
        let mut best = entry;
        let mut best_dist = self.distance_to(query, best);

        loop {
            let mut next = best;
            let mut next_dist = best_dist;
            for &n in self.nodes[&best].neighbors(level) {
                let d = self.distance_to(query, n);
                if d.total_cmp(&next_dist).then(n.cmp(&next)) == Ordering::Less {
                    next = n;
                    next_dist = d;
                }
            }
            if next_dist.total_cmp(&best_dist) == Ordering::Less {
                best = next;
                best_dist = next_dist;
            } else {
                return best;
            }
        }
    }

    /// Bounded best-first search at one layer: up to `ef` nearest nodes to
    /// `query`, ascending by (distance, id). Tombstones are not filtered
    /// here; the graph must stay navigable through deleted nodes.
    fn search_layer(&self, query: &[f32], entry: i64, ef: usize, level: i32) -> Vec<(i64, f32)> {
        let mut visited = VisitedGuard::new(self.nodes.len().max(1));

        let mut frontier: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef);
        let mut results: BinaryHeap<SearchResult> = BinaryHeap::with_capacity(ef + 1);

        let d = self.distance_to(query, entry);
        visited.visit(entry);
        frontier.push(Candidate { distance: d, id: entry });
        results.push(SearchResult { distance: d, id: entry });

        while let Some(current) = frontier.pop() {
            if let Some(worst) = results.peek() {
                if current.distance.total_cmp(&worst.distance) == Ordering::Greater {
                    break;
                }
            }

            for &neighbor in self.nodes[&current.id].neighbors(level) {
                if visited.is_visited(neighbor) {
                    continue;
                }
                visited.visit(neighbor);

                let d = self.distance_to(query, neighbor);
                let admit = match results.peek() {
                    Some(worst) if results.len() >= ef => {
                        d.total_cmp(&worst.distance) == Ordering::Less
                    }
                    _ => true,
                };
                if admit {
                    frontier.push(Candidate { distance: d, id: neighbor });
                    results.push(SearchResult { distance: d, id: neighbor });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<(i64, f32)> = results
            .into_iter()
            .map(|r| (r.id, r.distance))
            .collect();
        out.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        out
    }

    /// k-nearest live nodes to `query`, ascending by distance.
    ///
    /// `ef_search` is clamped up to at least `k`. Returns an empty vec when
    /// the graph has no live nodes.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<(i64, f32)>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if k < 1 {
            return Err(Error::InvalidArgument(format!("k must be >= 1, got {k}")));
        }

        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };
        if self.len() == 0 {
            return Ok(Vec::new());
        }

        let mut curr = entry;
        let mut l = self.max_level;
        while l > 0 {
            curr = self.greedy_step(query, curr, l);
            l -= 1;
        }

        let candidates = self.search_layer(query, curr, ef_search.max(k), 0);

        Ok(candidates
            .into_iter()
            .filter(|(id, _)| !self.deleted.contains(id))
            .take(k)
            .collect())
    }

    /// Tombstone an id. Returns `true` iff it was live before the call.
    pub fn remove(&mut self, id: i64) -> bool {
        if !self.nodes.contains_key(&id) || self.deleted.contains(&id) {
            return false;
        }
        self.deleted.insert(id);
        true
    }
}
