//! On-disk layout and crash-safe persistence.
//!
//! ```text
//! <root>/
//!   metadata.json            database-level metadata
//!   collections/
//!     <name>.meta            collection configuration (JSON)
//!     <name>.hnsw            serialized index (hnsw codec)
//!     <name>.vectors         id mappings + original vectors (binary)
//! ```
//!
//! Every file is committed by writing a sibling `<file>.tmp`, fsyncing it,
//! and renaming over the target; the rename is the commit point. After any
//! interruption a collection is therefore either its previous snapshot or
//! its replacement, never a mixture of the two.
//!
//! Two processes opening the same root is undefined behavior: the last
//! rename wins per file, which can break cross-file consistency. No lock is
//! taken to detect it.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collection::Collection;
use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::hnsw::HnswIndex;

/// Version stamped into `metadata.json`, `.meta`, and `.vectors`.
const FILE_FORMAT_VERSION: u32 = 1;

/// `.vectors` header: u32 version + u64 count + u32 dim.
const VECTORS_HEADER_SIZE: usize = 16;

/// Database-level metadata, stored as `metadata.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DbMetadata {
    pub version: u32,
    pub collections: Vec<String>,
}

/// Per-collection configuration, stored as `<name>.meta`.
#[derive(Debug, Serialize, Deserialize)]
struct CollectionMeta {
    version: u32,
    name: String,
    dimension: usize,
    metric: Metric,
    count: usize,
    next_internal_id: i64,
    m: usize,
    ef_construction: usize,
}

/// Handle to a database directory.
pub struct Persistence {
    root: PathBuf,
    collections_dir: PathBuf,
}

impl Persistence {
    /// Open (creating if needed) the directory layout under `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let collections_dir = root.join("collections");
        fs::create_dir_all(&collections_dir)?;
        Ok(Self {
            root,
            collections_dir,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.collections_dir.join(format!("{name}.meta"))
    }

    fn hnsw_path(&self, name: &str) -> PathBuf {
        self.collections_dir.join(format!("{name}.hnsw"))
    }

    fn vectors_path(&self, name: &str) -> PathBuf {
        self.collections_dir.join(format!("{name}.vectors"))
    }

    /// Write all three files for one collection, each atomically.
    pub fn save_collection(&self, collection: &Collection) -> Result<()> {
        let name = collection.name();

        let hnsw_bytes = collection.index().serialize();
        atomic_write(&self.hnsw_path(name), &hnsw_bytes)?;

        let params = collection.hnsw_params();
        let meta = CollectionMeta {
            version: FILE_FORMAT_VERSION,
            name: name.to_string(),
            dimension: collection.dimension(),
            metric: collection.metric(),
            count: collection.count(),
            next_internal_id: collection.next_internal_id(),
            m: params.m,
            ef_construction: params.ef_construction,
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta).map_err(std::io::Error::from)?;
        atomic_write(&self.meta_path(name), &meta_bytes)?;

        let vectors_bytes = encode_vectors(collection);
        atomic_write(&self.vectors_path(name), &vectors_bytes)?;

        debug!(
            collection = name,
            count = collection.count(),
            "collection saved"
        );
        Ok(())
    }

    /// Load one collection. `Ok(None)` when the file triple is absent;
    /// `Error::Deserialization` when any file is corrupt or inconsistent.
    pub fn load_collection(&self, name: &str) -> Result<Option<Collection>> {
        let meta_path = self.meta_path(name);
        let hnsw_path = self.hnsw_path(name);
        let vectors_path = self.vectors_path(name);

        if !meta_path.exists() || !hnsw_path.exists() || !vectors_path.exists() {
            return Ok(None);
        }

        let meta: CollectionMeta = serde_json::from_slice(&fs::read(&meta_path)?)
            .map_err(|e| Error::corrupt(format!("metadata for '{name}': {e}")))?;
        if meta.version != FILE_FORMAT_VERSION {
            return Err(Error::corrupt(format!(
                "metadata for '{name}' has unsupported version {}",
                meta.version
            )));
        }

        let index = HnswIndex::deserialize(&fs::read(&hnsw_path)?)?;

        let (user_to_internal, internal_to_user, vectors) =
            decode_vectors(&fs::read(&vectors_path)?, meta.dimension)?;

        // The three files commit independently; make sure this triple is one
        // consistent snapshot before handing it out.
        if index.dim() != meta.dimension {
            return Err(Error::corrupt(format!(
                "index dimension {} disagrees with metadata {}",
                index.dim(),
                meta.dimension
            )));
        }
        if index.metric() != meta.metric {
            return Err(Error::corrupt(format!(
                "index metric {} disagrees with metadata {}",
                index.metric(),
                meta.metric
            )));
        }
        if user_to_internal.len() != meta.count || index.len() != meta.count {
            return Err(Error::corrupt(format!(
                "live-count mismatch for '{name}': meta {}, vectors {}, index {}",
                meta.count,
                user_to_internal.len(),
                index.len()
            )));
        }

        info!(
            collection = name,
            count = meta.count,
            metric = %meta.metric,
            "collection loaded"
        );
        Ok(Some(Collection::from_parts(
            meta.name,
            index,
            user_to_internal,
            internal_to_user,
            vectors,
            meta.next_internal_id,
        )))
    }

    /// Remove the file triple. Returns `false` if nothing existed.
    pub fn delete_collection(&self, name: &str) -> Result<bool> {
        let mut deleted_any = false;
        for path in [
            self.meta_path(name),
            self.hnsw_path(name),
            self.vectors_path(name),
        ] {
            if path.exists() {
                fs::remove_file(&path)?;
                deleted_any = true;
            }
        }
        if deleted_any {
            debug!(collection = name, "collection files removed");
        }
        Ok(deleted_any)
    }

    /// Names of all persisted collections, sorted.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        if self.collections_dir.exists() {
            for entry in fs::read_dir(&self.collections_dir)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "meta") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Atomically write `metadata.json`.
    pub fn save_metadata(&self, collections: Vec<String>) -> Result<()> {
        let meta = DbMetadata {
            version: FILE_FORMAT_VERSION,
            collections,
        };
        let bytes = serde_json::to_vec_pretty(&meta).map_err(std::io::Error::from)?;
        atomic_write(&self.root.join("metadata.json"), &bytes)
    }

    /// Read `metadata.json`; `None` when absent or unreadable.
    pub fn load_metadata(&self) -> Option<DbMetadata> {
        let path = self.root.join("metadata.json");
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("ignoring unreadable metadata.json: {e}");
                None
            }
        }
    }
}

/// Write-to-tmp, fsync, rename. The rename is the commit point.
fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)?;
    if let Some(dir) = path.parent() {
        sync_dir(dir)?;
    }
    Ok(())
}

fn sync_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(path)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Pack id mappings and original vectors:
/// `{u32 version, u64 count, u32 dim}` then per record
/// `{u64 user_id, u64 internal_id, dim × f32}`, ascending user id.
fn encode_vectors(collection: &Collection) -> Vec<u8> {
    let dim = collection.dimension();
    let stored = collection.stored_vectors();
    let ids = collection.id_map();

    let mut user_ids: Vec<u64> = stored.keys().copied().collect();
    user_ids.sort_unstable();

    let mut out =
        Vec::with_capacity(VECTORS_HEADER_SIZE + user_ids.len() * (16 + dim * 4));
    out.extend_from_slice(&FILE_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(user_ids.len() as u64).to_le_bytes());
    out.extend_from_slice(&(dim as u32).to_le_bytes());

    for user_id in user_ids {
        out.extend_from_slice(&user_id.to_le_bytes());
        out.extend_from_slice(&(ids[&user_id] as u64).to_le_bytes());
        for &v in &stored[&user_id] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    out
}

type VectorsState = (HashMap<u64, i64>, HashMap<i64, u64>, HashMap<u64, Vec<f32>>);

fn decode_vectors(data: &[u8], expected_dim: usize) -> Result<VectorsState> {
    if data.len() < VECTORS_HEADER_SIZE {
        return Err(Error::corrupt("vectors file too small for header"));
    }

    let version = u32::from_le_bytes(data[0..4].try_into().unwrap());
    if version != FILE_FORMAT_VERSION {
        return Err(Error::corrupt(format!(
            "vectors file has unsupported version {version}"
        )));
    }
    let count = u64::from_le_bytes(data[4..12].try_into().unwrap()) as usize;
    let dim = u32::from_le_bytes(data[12..16].try_into().unwrap()) as usize;
    if dim != expected_dim {
        return Err(Error::corrupt(format!(
            "vectors file dimension {dim} disagrees with metadata {expected_dim}"
        )));
    }

    let record_size = 16 + dim * 4;
    let expected_size = VECTORS_HEADER_SIZE + count * record_size;
    if data.len() < expected_size {
        return Err(Error::corrupt(format!(
            "vectors file truncated: expected {expected_size} bytes, got {}",
            data.len()
        )));
    }

    let mut user_to_internal = HashMap::with_capacity(count);
    let mut internal_to_user = HashMap::with_capacity(count);
    let mut vectors = HashMap::with_capacity(count);

    let mut offset = VECTORS_HEADER_SIZE;
    for _ in 0..count {
        let user_id = u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap());
        let internal_id =
            u64::from_le_bytes(data[offset + 8..offset + 16].try_into().unwrap()) as i64;
        offset += 16;

        let mut vector = Vec::with_capacity(dim);
        for i in 0..dim {
            let at = offset + i * 4;
            vector.push(f32::from_le_bytes(data[at..at + 4].try_into().unwrap()));
        }
        offset += dim * 4;

        if user_to_internal.insert(user_id, internal_id).is_some() {
            return Err(Error::corrupt(format!("duplicate user id {user_id}")));
        }
        if internal_to_user.insert(internal_id, user_id).is_some() {
            return Err(Error::corrupt(format!(
                "duplicate internal id {internal_id}"
            )));
        }
        vectors.insert(user_id, vector);
    }

    Ok((user_to_internal, internal_to_user, vectors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::HnswParams;
    use tempfile::tempdir;

    fn sample_collection() -> Collection {
        let mut c = Collection::new("docs", 3, Metric::L2, HnswParams::default()).unwrap();
        c.insert(10, vec![1.0, 0.0, 0.0]).unwrap();
        c.insert(20, vec![0.0, 1.0, 0.0]).unwrap();
        c.insert(30, vec![0.0, 0.0, 1.0]).unwrap();
        c.delete(20);
        c
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let p = Persistence::new(dir.path()).unwrap();

        let original = sample_collection();
        p.save_collection(&original).unwrap();

        let loaded = p.load_collection("docs").unwrap().unwrap();
        assert_eq!(loaded.count(), 2);
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.metric(), Metric::L2);
        assert_eq!(loaded.next_internal_id(), original.next_internal_id());
        assert_eq!(loaded.get(10), Some(&[1.0f32, 0.0, 0.0][..]));
        assert_eq!(loaded.get(20), None);

        let before = original.search(&[0.9, 0.1, 0.0], 2, 50).unwrap();
        let after = loaded.search(&[0.9, 0.1, 0.0], 2, 50).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn missing_collection_is_none() {
        let dir = tempdir().unwrap();
        let p = Persistence::new(dir.path()).unwrap();
        assert!(p.load_collection("nope").unwrap().is_none());
    }

    #[test]
    fn partial_triple_is_none() {
        let dir = tempdir().unwrap();
        let p = Persistence::new(dir.path()).unwrap();
        p.save_collection(&sample_collection()).unwrap();

        fs::remove_file(dir.path().join("collections/docs.vectors")).unwrap();
        assert!(p.load_collection("docs").unwrap().is_none());
    }

    #[test]
    fn corrupt_meta_is_deserialization_error() {
        let dir = tempdir().unwrap();
        let p = Persistence::new(dir.path()).unwrap();
        p.save_collection(&sample_collection()).unwrap();

        fs::write(dir.path().join("collections/docs.meta"), b"not json").unwrap();
        assert!(matches!(
            p.load_collection("docs"),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn truncated_vectors_is_deserialization_error() {
        let dir = tempdir().unwrap();
        let p = Persistence::new(dir.path()).unwrap();
        p.save_collection(&sample_collection()).unwrap();

        let path = dir.path().join("collections/docs.vectors");
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();
        assert!(matches!(
            p.load_collection("docs"),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn unknown_vectors_version_rejected() {
        let dir = tempdir().unwrap();
        let p = Persistence::new(dir.path()).unwrap();
        p.save_collection(&sample_collection()).unwrap();

        let path = dir.path().join("collections/docs.vectors");
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] = 9;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            p.load_collection("docs"),
            Err(Error::Deserialization(_))
        ));
    }

    #[test]
    fn delete_collection_removes_triple() {
        let dir = tempdir().unwrap();
        let p = Persistence::new(dir.path()).unwrap();
        p.save_collection(&sample_collection()).unwrap();

        assert!(p.delete_collection("docs").unwrap());
        assert!(p.load_collection("docs").unwrap().is_none());
        assert!(!p.delete_collection("docs").unwrap());
    }

    #[test]
    fn list_scans_meta_files() {
        let dir = tempdir().unwrap();
        let p = Persistence::new(dir.path()).unwrap();

        let b = Collection::new("beta", 2, Metric::Dot, HnswParams::default()).unwrap();
        let a = Collection::new("alpha", 2, Metric::L2, HnswParams::default()).unwrap();
        p.save_collection(&b).unwrap();
        p.save_collection(&a).unwrap();

        assert_eq!(p.list_collections().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn metadata_round_trips() {
        let dir = tempdir().unwrap();
        let p = Persistence::new(dir.path()).unwrap();

        assert!(p.load_metadata().is_none());
        p.save_metadata(vec!["a".into(), "b".into()]).unwrap();

        let meta = p.load_metadata().unwrap();
        assert_eq!(meta.version, 1);
        assert_eq!(meta.collections, vec!["a", "b"]);
    }

    #[test]
    fn no_tmp_files_left_behind() {
        let dir = tempdir().unwrap();
        let p = Persistence::new(dir.path()).unwrap();
        p.save_collection(&sample_collection()).unwrap();
        p.save_metadata(vec!["docs".into()]).unwrap();

        for entry in fs::read_dir(dir.path().join("collections")).unwrap() {
            let path = entry.unwrap().path();
            assert_ne!(path.extension().unwrap(), "tmp", "leftover {path:?}");
        }
    }
}
