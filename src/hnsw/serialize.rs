//! Binary codec for the HNSW index.
//!
//! Self-describing, versioned, little-endian. Layout:
//!
//! ```text
//! Header:
//!   version:         u32  (= 1)
//!   dim:             u64
//!   metric_len:      u32
//!   metric:          UTF-8 bytes ("l2" | "cosine" | "dot")
//!   M:               u64
//!   ef_construction: u64
//!   entry_point:     i64  (-1 when the graph is empty)
//!   max_level:       i32
//!   node_count:      u64
//! Per node, in ascending internal-id order:
//!   id:              i64
//!   top_level:       i32
//!   vector:          dim × f32
//!   tombstone:       u8   (1 = deleted)
//!   per level 0..=top_level:
//!     neighbor_count: u32
//!     neighbors:      neighbor_count × i64
//! ```
//!
//! Sorted emission makes identical indexes byte-identical; the deserialized
//! index answers every query exactly as the original did.

use std::collections::{HashMap, HashSet};

use super::index::HnswIndex;
use super::node::Node;
use crate::error::{Error, Result};

const CODEC_VERSION: u32 = 1;

/// Cursor over serialized bytes; every read checks remaining length.
struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::corrupt("unexpected end of index data"))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

impl HnswIndex {
    /// Serialize the full index state, tombstones included.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(&CODEC_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dim as u64).to_le_bytes());

        let metric = self.metric.name().as_bytes();
        out.extend_from_slice(&(metric.len() as u32).to_le_bytes());
        out.extend_from_slice(metric);

        out.extend_from_slice(&(self.m as u64).to_le_bytes());
        out.extend_from_slice(&(self.ef_construction as u64).to_le_bytes());
        out.extend_from_slice(&self.entry_point.unwrap_or(-1).to_le_bytes());
        out.extend_from_slice(&self.max_level.to_le_bytes());
        out.extend_from_slice(&(self.nodes.len() as u64).to_le_bytes());

        let mut ids: Vec<i64> = self.nodes.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            let node = &self.nodes[&id];
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&node.top_level().to_le_bytes());
            for &v in &self.vectors[&id] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            out.push(u8::from(self.deleted.contains(&id)));
            for neighbors in &node.layers {
                out.extend_from_slice(&(neighbors.len() as u32).to_le_bytes());
                for &n in neighbors {
                    out.extend_from_slice(&n.to_le_bytes());
                }
            }
        }

        out
    }

    /// Rebuild an index from [`serialize`](Self::serialize) output.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(data);

        let version = r.read_u32()?;
        if version != CODEC_VERSION {
            return Err(Error::corrupt(format!(
                "unsupported index format version {version}"
            )));
        }

        let dim = r.read_u64()? as usize;
        if dim < 1 {
            return Err(Error::corrupt("index dimension must be >= 1"));
        }

        let metric_len = r.read_u32()? as usize;
        let metric_bytes = r.take(metric_len)?;
        let metric_name = std::str::from_utf8(metric_bytes)
            .map_err(|_| Error::corrupt("metric name is not valid UTF-8"))?;
        let metric = metric_name
            .parse()
            .map_err(|_| Error::corrupt(format!("unknown metric '{metric_name}'")))?;

        let m = r.read_u64()? as usize;
        let ef_construction = r.read_u64()? as usize;
        if m < 1 || ef_construction < 1 {
            return Err(Error::corrupt("index parameters must be >= 1"));
        }

        let entry_raw = r.read_i64()?;
        let entry_point = (entry_raw >= 0).then_some(entry_raw);
        let max_level = r.read_i32()?;
        let node_count = r.read_u64()? as usize;

        let mut nodes: HashMap<i64, Node> = HashMap::with_capacity(node_count);
        let mut vectors: HashMap<i64, Vec<f32>> = HashMap::with_capacity(node_count);
        let mut deleted: HashSet<i64> = HashSet::new();

        for _ in 0..node_count {
            let id = r.read_i64()?;
            let top_level = r.read_i32()?;
            if top_level < 0 {
                return Err(Error::corrupt(format!("node {id} has negative level")));
            }

            let mut vector = Vec::with_capacity(dim);
            for _ in 0..dim {
                vector.push(r.read_f32()?);
            }

            let tombstone = r.read_u8()?;

            let mut layers = Vec::with_capacity(top_level as usize + 1);
            for _ in 0..=top_level {
                let count = r.read_u32()? as usize;
                let mut neighbors = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    neighbors.push(r.read_i64()?);
                }
                layers.push(neighbors);
            }

            if nodes.insert(id, Node { id, layers }).is_some() {
                return Err(Error::corrupt(format!("duplicate node id {id}")));
            }
            vectors.insert(id, vector);
            if tombstone != 0 {
                deleted.insert(id);
            }
        }

        // Cross-check referential integrity so graph walks cannot hit a
        // missing node later.
        if let Some(ep) = entry_point {
            if !nodes.contains_key(&ep) {
                return Err(Error::corrupt(format!("entry point {ep} is not a node")));
            }
        } else if !nodes.is_empty() {
            return Err(Error::corrupt("non-empty index without entry point"));
        }
        for node in nodes.values() {
            for neighbors in &node.layers {
                for n in neighbors {
                    if !nodes.contains_key(n) {
                        return Err(Error::corrupt(format!(
                            "node {} references unknown neighbor {n}",
                            node.id
                        )));
                    }
                }
            }
        }

        HnswIndex::from_parts(
            dim,
            metric,
            m,
            ef_construction,
            nodes,
            vectors,
            deleted,
            entry_point,
            max_level,
        )
        .map_err(|e| Error::corrupt(format!("invalid index configuration: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Metric;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sample_index() -> HnswIndex {
        let mut rng = StdRng::seed_from_u64(31);
        let mut index = HnswIndex::new(8, Metric::Cosine, 8, 50).unwrap();
        for i in 0..60 {
            let v: Vec<f32> = (0..8).map(|_| rng.gen::<f32>() - 0.5).collect();
            index.add(i, v).unwrap();
        }
        for i in (0..60).step_by(7) {
            index.remove(i);
        }
        index
    }

    #[test]
    fn round_trip_answers_identically() {
        let index = sample_index();
        let restored = HnswIndex::deserialize(&index.serialize()).unwrap();

        assert_eq!(restored.len(), index.len());
        assert_eq!(restored.dim(), index.dim());
        assert_eq!(restored.metric(), index.metric());
        assert_eq!(restored.m(), index.m());

        let mut rng = StdRng::seed_from_u64(32);
        for _ in 0..10 {
            let q: Vec<f32> = (0..8).map(|_| rng.gen::<f32>() - 0.5).collect();
            assert_eq!(
                index.search(&q, 10, 50).unwrap(),
                restored.search(&q, 10, 50).unwrap()
            );
        }
    }

    #[test]
    fn serialization_is_byte_deterministic() {
        let index = sample_index();
        let bytes = index.serialize();
        let restored = HnswIndex::deserialize(&bytes).unwrap();
        assert_eq!(bytes, restored.serialize());
    }

    #[test]
    fn empty_index_round_trips() {
        let index = HnswIndex::new(3, Metric::L2, 16, 200).unwrap();
        let restored = HnswIndex::deserialize(&index.serialize()).unwrap();
        assert_eq!(restored.len(), 0);
        assert!(restored.search(&[0.0; 3], 1, 10).unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = sample_index().serialize();
        bytes[0] = 2;
        assert!(matches!(
            HnswIndex::deserialize(&bytes),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn rejects_unknown_metric() {
        let index = HnswIndex::new(2, Metric::L2, 4, 10).unwrap();
        let mut bytes = index.serialize();
        // metric_len stays 2; overwrite the name itself.
        bytes[16] = b'x';
        bytes[17] = b'y';
        assert!(matches!(
            HnswIndex::deserialize(&bytes),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn rejects_truncation_at_every_offset() {
        let bytes = sample_index().serialize();
        for len in 0..bytes.len() {
            assert!(
                HnswIndex::deserialize(&bytes[..len]).is_err(),
                "truncation to {len} bytes was accepted"
            );
        }
    }

    #[test]
    fn tombstones_survive_round_trip() {
        let mut index = HnswIndex::new(2, Metric::L2, 4, 10).unwrap();
        index.add(0, vec![0.0, 0.0]).unwrap();
        index.add(1, vec![1.0, 0.0]).unwrap();
        index.remove(0);

        let restored = HnswIndex::deserialize(&index.serialize()).unwrap();
        assert_eq!(restored.len(), 1);
        let results = restored.search(&[0.0, 0.0], 2, 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 1);
    }
}
