//! Chunk storage backends.
//!
//! Provides the ChunkStore trait and two implementations:
//! - MemoryChunkStore: in-memory storage using a HashMap
//! - FileSystemChunkStore: persistent storage using the filesystem
//!
//! Chunks are opaque byte runs keyed by their content hash; `put` is
//! idempotent, so concurrent writers need no coordination. Dataset heads live
//! in a separate root table serialized by compare-and-set.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{CoreError, CoreResult};
use crate::hash::Hash;

/// Protocol for chunk storage backends.
///
/// The core assumes persistence is durable on successful return. Storing an
/// existing hash is a no-op by the hash-equality contract.
pub trait ChunkStore: Send + Sync {
    /// Store a chunk under its hash. Idempotent.
    fn put(&self, hash: &Hash, data: &[u8]) -> CoreResult<()>;

    /// Retrieve a chunk by hash. Returns None if not present.
    fn get(&self, hash: &Hash) -> CoreResult<Option<Arc<[u8]>>>;

    /// Whether a chunk is present.
    fn has(&self, hash: &Hash) -> CoreResult<bool> {
        Ok(self.get(hash)?.is_some())
    }

    /// Iterate over all chunk hashes in the store.
    fn list_chunks(&self) -> CoreResult<Vec<Hash>>;

    /// Delete a chunk. Returns true if it was present.
    fn delete(&self, hash: &Hash) -> CoreResult<bool>;

    /// Total number of chunks in storage.
    fn chunk_count(&self) -> CoreResult<usize>;

    /// Read a dataset head.
    fn get_root(&self, name: &str) -> CoreResult<Option<Hash>>;

    /// Atomically update a dataset head, conditioned on its prior value.
    ///
    /// # Errors
    ///
    /// [`CoreError::Conflict`] when the stored head no longer matches
    /// `expected`.
    fn cas_root(&self, name: &str, expected: Option<Hash>, new: Hash) -> CoreResult<()>;

    /// List all dataset heads.
    fn list_roots(&self) -> CoreResult<Vec<(String, Hash)>>;
}

/// In-memory chunk storage using a HashMap.
#[derive(Debug, Clone, Default)]
pub struct MemoryChunkStore {
    chunks: Arc<Mutex<HashMap<Hash, Arc<[u8]>>>>,
    roots: Arc<Mutex<HashMap<String, Hash>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put(&self, hash: &Hash, data: &[u8]) -> CoreResult<()> {
        let mut chunks = self.chunks.lock()?;
        chunks.entry(*hash).or_insert_with(|| Arc::from(data));
        Ok(())
    }

    fn get(&self, hash: &Hash) -> CoreResult<Option<Arc<[u8]>>> {
        let chunks = self.chunks.lock()?;
        Ok(chunks.get(hash).cloned())
    }

    fn list_chunks(&self) -> CoreResult<Vec<Hash>> {
        let chunks = self.chunks.lock()?;
        Ok(chunks.keys().copied().collect())
    }

    fn delete(&self, hash: &Hash) -> CoreResult<bool> {
        let mut chunks = self.chunks.lock()?;
        Ok(chunks.remove(hash).is_some())
    }

    fn chunk_count(&self) -> CoreResult<usize> {
        let chunks = self.chunks.lock()?;
        Ok(chunks.len())
    }

    fn get_root(&self, name: &str) -> CoreResult<Option<Hash>> {
        let roots = self.roots.lock()?;
        Ok(roots.get(name).copied())
    }

    fn cas_root(&self, name: &str, expected: Option<Hash>, new: Hash) -> CoreResult<()> {
        let mut roots = self.roots.lock()?;
        let actual = roots.get(name).copied();
        if actual != expected {
            return Err(CoreError::Conflict {
                dataset: name.to_string(),
                expected,
                actual,
            });
        }
        roots.insert(name.to_string(), new);
        Ok(())
    }

    fn list_roots(&self) -> CoreResult<Vec<(String, Hash)>> {
        let roots = self.roots.lock()?;
        Ok(roots.iter().map(|(n, h)| (n.clone(), *h)).collect())
    }
}

/// On-disk layout of the dataset head table.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RootsFile {
    roots: HashMap<String, String>,
}

/// Filesystem-based chunk storage.
///
/// Chunks live under `<base>/chunks/<xx>/<base32>` where `xx` is the first
/// two characters of the printable hash, for filesystem-friendly fan-out.
/// Dataset heads live in `<base>/roots.json`; head updates hold a process
/// lock so compare-and-set is atomic within the process.
pub struct FileSystemChunkStore {
    base_path: PathBuf,
    roots_path: PathBuf,
    roots_lock: Mutex<()>,
}

impl FileSystemChunkStore {
    /// Initialize filesystem storage under `base_path`, creating it if
    /// needed.
    pub fn new(base_path: impl AsRef<Path>) -> CoreResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(base_path.join("chunks"))?;
        Ok(FileSystemChunkStore {
            roots_path: base_path.join("roots.json"),
            base_path,
            roots_lock: Mutex::new(()),
        })
    }

    fn chunk_path(&self, hash: &Hash) -> PathBuf {
        let name = hash.to_base32();
        self.base_path.join("chunks").join(&name[..2]).join(name)
    }

    fn read_roots(&self) -> CoreResult<RootsFile> {
        if !self.roots_path.exists() {
            return Ok(RootsFile::default());
        }
        let data = fs::read(&self.roots_path)?;
        serde_json::from_slice(&data)
            .map_err(|e| CoreError::Io(format!("corrupt roots file: {}", e)))
    }

    fn write_roots(&self, roots: &RootsFile) -> CoreResult<()> {
        let data = serde_json::to_vec_pretty(roots)
            .map_err(|e| CoreError::Io(format!("serialize roots file: {}", e)))?;
        let tmp = self.roots_path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.roots_path)?;
        Ok(())
    }
}

impl ChunkStore for FileSystemChunkStore {
    fn put(&self, hash: &Hash, data: &[u8]) -> CoreResult<()> {
        let path = self.chunk_path(hash);
        if path.exists() {
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, data)?;
        Ok(())
    }

    fn get(&self, hash: &Hash) -> CoreResult<Option<Arc<[u8]>>> {
        let path = self.chunk_path(hash);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        Ok(Some(Arc::from(data.as_slice())))
    }

    fn list_chunks(&self) -> CoreResult<Vec<Hash>> {
        let mut hashes = Vec::new();
        let chunks_dir = self.base_path.join("chunks");
        for entry in fs::read_dir(&chunks_dir)? {
            let subdir = entry?.path();
            if !subdir.is_dir() {
                continue;
            }
            for file in fs::read_dir(&subdir)? {
                let path = file?.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if let Ok(hash) = format!("sha1-{}", name).parse() {
                    hashes.push(hash);
                }
            }
        }
        Ok(hashes)
    }

    fn delete(&self, hash: &Hash) -> CoreResult<bool> {
        let path = self.chunk_path(hash);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn chunk_count(&self) -> CoreResult<usize> {
        Ok(self.list_chunks()?.len())
    }

    fn get_root(&self, name: &str) -> CoreResult<Option<Hash>> {
        let _guard = self.roots_lock.lock()?;
        let file = self.read_roots()?;
        match file.roots.get(name) {
            Some(s) => Ok(Some(s.parse()?)),
            None => Ok(None),
        }
    }

    fn cas_root(&self, name: &str, expected: Option<Hash>, new: Hash) -> CoreResult<()> {
        let _guard = self.roots_lock.lock()?;
        let mut file = self.read_roots()?;
        let actual = match file.roots.get(name) {
            Some(s) => Some(s.parse()?),
            None => None,
        };
        if actual != expected {
            return Err(CoreError::Conflict {
                dataset: name.to_string(),
                expected,
                actual,
            });
        }
        file.roots.insert(name.to_string(), new.to_string());
        self.write_roots(&file)
    }

    fn list_roots(&self) -> CoreResult<Vec<(String, Hash)>> {
        let _guard = self.roots_lock.lock()?;
        let file = self.read_roots()?;
        let mut out = Vec::with_capacity(file.roots.len());
        for (name, hash) in file.roots {
            out.push((name, hash.parse()?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn exercise_store(store: &dyn ChunkStore) {
        let data = b"chunk payload";
        let hash = Hash::of(data);

        store.put(&hash, data).unwrap();
        // idempotent
        store.put(&hash, data).unwrap();
        assert_eq!(store.chunk_count().unwrap(), 1);
        assert_eq!(store.get(&hash).unwrap().unwrap().as_ref(), data);
        assert!(store.has(&hash).unwrap());

        let absent = Hash::of(b"absent");
        assert!(store.get(&absent).unwrap().is_none());

        assert!(store.delete(&hash).unwrap());
        assert!(!store.delete(&hash).unwrap());
        assert_eq!(store.chunk_count().unwrap(), 0);
    }

    fn exercise_roots(store: &dyn ChunkStore) {
        let h1 = Hash::of(b"commit-1");
        let h2 = Hash::of(b"commit-2");

        assert!(store.get_root("main").unwrap().is_none());

        store.cas_root("main", None, h1).unwrap();
        assert_eq!(store.get_root("main").unwrap(), Some(h1));

        // stale expectation loses
        let err = store.cas_root("main", None, h2).unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));

        store.cas_root("main", Some(h1), h2).unwrap();
        assert_eq!(store.get_root("main").unwrap(), Some(h2));

        let roots = store.list_roots().unwrap();
        assert_eq!(roots, vec![("main".to_string(), h2)]);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryChunkStore::new();
        exercise_store(&store);
        exercise_roots(&store);
    }

    #[test]
    fn test_filesystem_store() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemChunkStore::new(dir.path()).unwrap();
        exercise_store(&store);
        exercise_roots(&store);
    }

    #[test]
    fn test_filesystem_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let data = b"durable";
        let hash = Hash::of(data);
        {
            let store = FileSystemChunkStore::new(dir.path()).unwrap();
            store.put(&hash, data).unwrap();
            store.cas_root("main", None, hash).unwrap();
        }
        let store = FileSystemChunkStore::new(dir.path()).unwrap();
        assert_eq!(store.get(&hash).unwrap().unwrap().as_ref(), data);
        assert_eq!(store.get_root("main").unwrap(), Some(hash));
        assert_eq!(store.list_chunks().unwrap(), vec![hash]);
    }
}
