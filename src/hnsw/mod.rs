//! Hierarchical Navigable Small World index.

mod index;
mod node;
mod serialize;
mod visited;

pub use index::HnswIndex;
pub(crate) use node::Node;
