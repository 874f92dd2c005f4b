//! Database handle.
//!
//! Owns the collection registry and the persistence root. Opening a
//! directory rehydrates every collection persisted there; [`Database::save`]
//! commits all of them back, one atomic file at a time; [`Database::close`]
//! is save-then-drop for callers that want an explicit end of session.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;

use crate::collection::{Collection, HnswParams};
use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::persistence::Persistence;

/// An embedded vector database rooted at one directory.
///
/// A directory must be owned by a single `Database` instance at a time;
/// concurrent opens from multiple processes are undefined behavior (the last
/// rename wins per file, which can break cross-file consistency).
pub struct Database {
    persistence: Persistence,
    collections: BTreeMap<String, Collection>,
}

impl Database {
    /// Open a database directory, creating it if needed and loading every
    /// collection persisted there.
    ///
    /// A collection whose files fail to deserialize is skipped with a
    /// warning, as if it did not exist; its files are left untouched.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let persistence = Persistence::new(path)?;

        let mut collections = BTreeMap::new();
        for name in persistence.list_collections()? {
            match persistence.load_collection(&name) {
                Ok(Some(collection)) => {
                    collections.insert(name, collection);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(collection = %name, "skipping unloadable collection: {e}");
                }
            }
        }

        Ok(Self {
            persistence,
            collections,
        })
    }

    /// Create a new collection.
    pub fn create_collection(
        &mut self,
        name: &str,
        dimension: usize,
        metric: Metric,
        params: Option<HnswParams>,
    ) -> Result<&mut Collection> {
        if self.collections.contains_key(name) {
            return Err(Error::CollectionExists(name.to_string()));
        }

        let collection = Collection::new(name, dimension, metric, params.unwrap_or_default())?;
        Ok(self
            .collections
            .entry(name.to_string())
            .or_insert(collection))
    }

    /// Borrow an existing collection.
    pub fn collection(&self, name: &str) -> Result<&Collection> {
        self.collections
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Mutably borrow an existing collection.
    pub fn collection_mut(&mut self, name: &str) -> Result<&mut Collection> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Drop a collection and its persisted files. Returns `true` if it
    /// existed in memory or on disk.
    pub fn delete_collection(&mut self, name: &str) -> Result<bool> {
        let existed = self.collections.remove(name).is_some();
        let files_existed = self.persistence.delete_collection(name)?;
        Ok(existed || files_existed)
    }

    /// Sorted collection names.
    pub fn list_collections(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    /// Number of collections.
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Persist every collection. Each file commits atomically; a collection
    /// that was already saved stays committed even if a later one fails.
    pub fn save(&self) -> Result<()> {
        self.persistence.save_metadata(self.list_collections())?;
        for collection in self.collections.values() {
            self.persistence.save_collection(collection)?;
        }
        Ok(())
    }

    /// Save and release the handle.
    pub fn close(self) -> Result<()> {
        self.save()
    }
}
