//! Named collection of vectors.
//!
//! A collection owns one HNSW index and the bijection between caller-chosen
//! user ids and the monotonically assigned internal ids the index runs on.
//! It also retains every inserted vector verbatim, so [`Collection::get`]
//! returns exactly the bytes the caller passed in regardless of anything
//! the index does internally.

use std::collections::HashMap;

use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::hnsw::HnswIndex;

/// Default per-query search capacity. Clamped up to at least `k` at query
/// time.
pub const DEFAULT_EF_SEARCH: usize = 50;

/// HNSW construction parameters.
///
/// `m` caps neighbors per node per level (layer 0 allows `2·m`);
/// `ef_construction` is the candidate-list capacity while wiring a new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HnswParams {
    pub m: usize,
    pub ef_construction: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
        }
    }
}

/// A named set of same-dimension vectors with k-NN search.
#[derive(Debug)]
pub struct Collection {
    name: String,
    dim: usize,
    metric: Metric,

    index: HnswIndex,

    user_to_internal: HashMap<u64, i64>,
    internal_to_user: HashMap<i64, u64>,
    /// Original vectors, keyed by user id.
    vectors: HashMap<u64, Vec<f32>>,
    next_internal_id: i64,
}

impl Collection {
    /// Create an empty collection.
    pub fn new(name: &str, dim: usize, metric: Metric, params: HnswParams) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "collection name cannot be empty".into(),
            ));
        }
        let index = HnswIndex::new(dim, metric, params.m, params.ef_construction)?;
        Ok(Self {
            name: name.to_string(),
            dim,
            metric,
            index,
            user_to_internal: HashMap::new(),
            internal_to_user: HashMap::new(),
            vectors: HashMap::new(),
            next_internal_id: 0,
        })
    }

    /// Reassemble a collection from persisted state.
    pub(crate) fn from_parts(
        name: String,
        index: HnswIndex,
        user_to_internal: HashMap<u64, i64>,
        internal_to_user: HashMap<i64, u64>,
        vectors: HashMap<u64, Vec<f32>>,
        next_internal_id: i64,
    ) -> Self {
        Self {
            name,
            dim: index.dim(),
            metric: index.metric(),
            index,
            user_to_internal,
            internal_to_user,
            vectors,
            next_internal_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            m: self.index.m(),
            ef_construction: self.index.ef_construction(),
        }
    }

    pub(crate) fn index(&self) -> &HnswIndex {
        &self.index
    }

    pub(crate) fn id_map(&self) -> &HashMap<u64, i64> {
        &self.user_to_internal
    }

    pub(crate) fn stored_vectors(&self) -> &HashMap<u64, Vec<f32>> {
        &self.vectors
    }

    pub(crate) fn next_internal_id(&self) -> i64 {
        self.next_internal_id
    }

    /// Insert a vector under a caller-chosen user id.
    ///
    /// Rejects a live duplicate id; updating requires `delete` + `insert`,
    /// which assigns a fresh internal id.
    pub fn insert(&mut self, user_id: u64, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if self.user_to_internal.contains_key(&user_id) {
            return Err(Error::DuplicateId(user_id));
        }

        let internal_id = self.next_internal_id;
        self.index.add(internal_id, vector.clone())?;
        self.next_internal_id += 1;

        self.user_to_internal.insert(user_id, internal_id);
        self.internal_to_user.insert(internal_id, user_id);
        self.vectors.insert(user_id, vector);
        Ok(())
    }

    /// k-nearest neighbors of `query`, as `(user_id, distance)` pairs sorted
    /// by ascending distance.
    pub fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }

        let hits = self.index.search(query, k, ef_search)?;
        Ok(hits
            .into_iter()
            .filter_map(|(internal_id, dist)| {
                self.internal_to_user.get(&internal_id).map(|&u| (u, dist))
            })
            .collect())
    }

    /// The vector inserted under `user_id`, exactly as it was passed in.
    pub fn get(&self, user_id: u64) -> Option<&[f32]> {
        self.vectors.get(&user_id).map(|v| v.as_slice())
    }

    /// Remove a vector. Returns `false` if the id was not present.
    pub fn delete(&mut self, user_id: u64) -> bool {
        let Some(internal_id) = self.user_to_internal.remove(&user_id) else {
            return false;
        };
        self.internal_to_user.remove(&internal_id);
        self.vectors.remove(&user_id);
        self.index.remove(internal_id);
        true
    }

    pub fn contains(&self, user_id: u64) -> bool {
        self.user_to_internal.contains_key(&user_id)
    }

    /// Number of live vectors.
    pub fn count(&self) -> usize {
        self.user_to_internal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_to_internal.is_empty()
    }
}
