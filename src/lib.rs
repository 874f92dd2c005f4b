//! quiver: an embeddable vector database.
//!
//! Fixed-dimension `f32` vectors live in named collections; approximate
//! k-nearest-neighbor queries run against a per-collection HNSW graph;
//! everything persists to a directory of atomically written files, so a
//! reopened database resumes with identical behavior.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  Database: registry, open/save/close                    │
//! ├─────────────────────────────────────────────────────────┤
//! │  Collection: user↔internal id bijection, verbatim       │
//! │  vector retention, validation                           │
//! ├─────────────────────────────────────────────────────────┤
//! │  HnswIndex: layered graph, lazy deletes, binary codec   │
//! ├─────────────────────────────────────────────────────────┤
//! │  distance/simd: L2 · cosine · dot kernels               │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use quiver::{Database, Metric};
//!
//! # fn main() -> quiver::Result<()> {
//! let mut db = Database::open("./my_database")?;
//! let docs = db.create_collection("docs", 4, Metric::Cosine, None)?;
//!
//! docs.insert(1001, vec![0.1, 0.2, 0.3, 0.4])?;
//! docs.insert(1002, vec![0.4, 0.3, 0.2, 0.1])?;
//!
//! for (id, distance) in docs.search(&[0.1, 0.2, 0.3, 0.4], 5, 50)? {
//!     println!("{id}: {distance}");
//! }
//!
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod db;
pub mod distance;
pub mod error;
pub mod hnsw;
pub mod persistence;
pub mod simd;

pub use collection::{Collection, HnswParams, DEFAULT_EF_SEARCH};
pub use db::Database;
pub use distance::Metric;
pub use error::{Error, Result};
pub use hnsw::HnswIndex;
pub use persistence::Persistence;
