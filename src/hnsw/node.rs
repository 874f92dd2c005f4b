//! Node representation in the HNSW graph.

/// A node in the HNSW graph.
///
/// Every node lives on layer 0; a node whose top level is `n` additionally
/// appears on layers `1..=n`. `layers[l]` holds the internal ids of its
/// neighbors at layer `l`, and may only reference nodes whose own top level
/// is at least `l`.
#[derive(Debug, Clone)]
pub struct Node {
    /// Internal id assigned by the collection.
    pub id: i64,

    /// Neighbor lists, one per layer from 0 to the node's top level.
    pub layers: Vec<Vec<i64>>,
}

impl Node {
    /// Create a node that spans layers `0..=top_level` with empty adjacency.
    pub fn new(id: i64, top_level: i32) -> Self {
        Self {
            id,
            layers: vec![Vec::new(); top_level as usize + 1],
        }
    }

    /// The highest layer this node appears on.
    pub fn top_level(&self) -> i32 {
        self.layers.len() as i32 - 1
    }

    /// Neighbors at `level`, empty if the node does not reach that layer.
    pub fn neighbors(&self, level: i32) -> &[i64] {
        self.layers
            .get(level as usize)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Mutable neighbor list at `level`.
    pub fn neighbors_mut(&mut self, level: i32) -> Option<&mut Vec<i64>> {
        self.layers.get_mut(level as usize)
    }

    /// Append a neighbor at `level`, ignoring duplicates.
    pub fn add_neighbor(&mut self, level: i32, neighbor: i64) {
        if let Some(neighbors) = self.layers.get_mut(level as usize) {
            if !neighbors.contains(&neighbor) {
                neighbors.push(neighbor);
            }
        }
    }
}
