//! Staging namespace for chunks of uploads that have not been merged yet

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use chunkyard_core::{ChunkIndex, UploadId};
use tracing::{debug, trace};

/// Keyed store of chunk payloads, one namespace per upload.
///
/// A namespace exists exactly when [`ChunkStore::has_session`] reports it; there is
/// no separate metadata record. Implementations only need to be safe for concurrent
/// writes to distinct `(upload, index)` slots. Mutual exclusion between writes and
/// merges is the caller's concern (see [`crate::SessionRegistry`]).
pub trait ChunkStore: Send + Sync {
    /// Write `payload` into the slot, creating the namespace if needed.
    /// An existing payload at the same slot is replaced.
    fn put_chunk(&self, upload: &UploadId, index: ChunkIndex, payload: &[u8]) -> io::Result<()>;

    fn has_session(&self, upload: &UploadId) -> io::Result<bool>;

    /// Snapshot of the indices present, in no particular order.
    /// Fails with `NotFound` if the namespace does not exist.
    fn list_chunks(&self, upload: &UploadId) -> io::Result<Vec<ChunkIndex>>;

    /// Open one chunk for streaming reads
    fn open_chunk(&self, upload: &UploadId, index: ChunkIndex) -> io::Result<Box<dyn Read + Send>>;

    /// Delete the namespace and everything in it. Absent namespaces are not an error.
    fn remove_session(&self, upload: &UploadId) -> io::Result<()>;
}

/// Directory-backed store: `<root>/<upload>/<index>.chunk`
pub struct FsChunkStore {
    root: PathBuf,
}

impl FsChunkStore {
    /// Open a store rooted at `root`, creating the directory if necessary
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FsChunkStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, upload: &UploadId) -> PathBuf {
        self.root.join(upload.as_str())
    }

    fn slot_path(&self, upload: &UploadId, index: ChunkIndex) -> PathBuf {
        self.session_dir(upload).join(index.file_name())
    }
}

impl ChunkStore for FsChunkStore {
    fn put_chunk(&self, upload: &UploadId, index: ChunkIndex, payload: &[u8]) -> io::Result<()> {
        let dir = self.session_dir(upload);
        fs::create_dir_all(&dir)?;

        // Write beside the slot and rename over it, so an interrupted write never
        // shows up as chunk data and racing writers resolve last-rename-wins.
        let partial = dir.join(format!("{}.{}.part", index, ulid::Ulid::new()));
        let result = write_synced(&partial, payload)
            .and_then(|()| fs::rename(&partial, self.slot_path(upload, index)));

        match &result {
            Ok(()) => trace!(upload_id = %upload, chunk_index = %index, bytes = payload.len(), "chunk written"),
            Err(_) => {
                let _ = fs::remove_file(&partial);
            }
        }
        result
    }

    fn has_session(&self, upload: &UploadId) -> io::Result<bool> {
        match fs::metadata(self.session_dir(upload)) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn list_chunks(&self, upload: &UploadId) -> io::Result<Vec<ChunkIndex>> {
        let mut indices = Vec::new();

        for entry in fs::read_dir(self.session_dir(upload))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let name = entry.file_name();
            match name.to_str().and_then(ChunkIndex::from_file_name) {
                Some(index) => indices.push(index),
                None => debug!(upload_id = %upload, entry = ?name, "skipping non-chunk entry"),
            }
        }

        Ok(indices)
    }

    fn open_chunk(&self, upload: &UploadId, index: ChunkIndex) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(self.slot_path(upload, index))?;
        Ok(Box::new(file))
    }

    fn remove_session(&self, upload: &UploadId) -> io::Result<()> {
        match fs::remove_dir_all(self.session_dir(upload)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

fn write_synced(path: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(payload)?;
    file.sync_all()
}

/// In-memory store, mainly for tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryChunkStore {
    sessions: RwLock<HashMap<UploadId, BTreeMap<ChunkIndex, Vec<u8>>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of namespaces currently held
    pub fn session_count(&self) -> usize {
        self.read().map(|s| s.len()).unwrap_or(0)
    }

    fn read(&self) -> io::Result<RwLockReadGuard<'_, HashMap<UploadId, BTreeMap<ChunkIndex, Vec<u8>>>>> {
        self.sessions
            .read()
            .map_err(|_| io::Error::other("memory store lock poisoned"))
    }

    fn write(&self) -> io::Result<RwLockWriteGuard<'_, HashMap<UploadId, BTreeMap<ChunkIndex, Vec<u8>>>>> {
        self.sessions
            .write()
            .map_err(|_| io::Error::other("memory store lock poisoned"))
    }
}

impl ChunkStore for MemoryChunkStore {
    fn put_chunk(&self, upload: &UploadId, index: ChunkIndex, payload: &[u8]) -> io::Result<()> {
        self.write()?
            .entry(upload.clone())
            .or_default()
            .insert(index, payload.to_vec());
        Ok(())
    }

    fn has_session(&self, upload: &UploadId) -> io::Result<bool> {
        Ok(self.read()?.contains_key(upload))
    }

    fn list_chunks(&self, upload: &UploadId) -> io::Result<Vec<ChunkIndex>> {
        self.read()?
            .get(upload)
            .map(|chunks| chunks.keys().copied().collect())
            .ok_or_else(|| not_found(upload))
    }

    fn open_chunk(&self, upload: &UploadId, index: ChunkIndex) -> io::Result<Box<dyn Read + Send>> {
        let sessions = self.read()?;
        let payload = sessions
            .get(upload)
            .and_then(|chunks| chunks.get(&index))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{}/{}", upload, index.file_name())))?;
        Ok(Box::new(Cursor::new(payload.clone())))
    }

    fn remove_session(&self, upload: &UploadId) -> io::Result<()> {
        self.write()?.remove(upload);
        Ok(())
    }
}

fn not_found(upload: &UploadId) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no staging namespace for {}", upload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> UploadId {
        UploadId::new(s).unwrap()
    }

    fn read_all(store: &dyn ChunkStore, upload: &UploadId, index: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        store
            .open_chunk(upload, ChunkIndex::new(index))
            .unwrap()
            .read_to_end(&mut buf)
            .unwrap();
        buf
    }

    fn exercise_store(store: &dyn ChunkStore) {
        let upload = id("abc123");
        assert!(!store.has_session(&upload).unwrap());
        assert_eq!(store.list_chunks(&upload).unwrap_err().kind(), io::ErrorKind::NotFound);

        store.put_chunk(&upload, ChunkIndex::new(1), b"World").unwrap();
        store.put_chunk(&upload, ChunkIndex::new(0), b"Hello ").unwrap();
        store.put_chunk(&upload, ChunkIndex::new(2), b"").unwrap();
        assert!(store.has_session(&upload).unwrap());

        let mut indices = store.list_chunks(&upload).unwrap();
        indices.sort();
        assert_eq!(indices, vec![ChunkIndex::new(0), ChunkIndex::new(1), ChunkIndex::new(2)]);
        assert_eq!(read_all(store, &upload, 1), b"World");
        assert_eq!(read_all(store, &upload, 2), b"");

        // Last write wins
        store.put_chunk(&upload, ChunkIndex::new(1), b"Rust").unwrap();
        assert_eq!(read_all(store, &upload, 1), b"Rust");
        assert_eq!(store.list_chunks(&upload).unwrap().len(), 3);

        // Namespaces are disjoint
        let other = id("other");
        store.put_chunk(&other, ChunkIndex::new(0), b"x").unwrap();
        store.remove_session(&upload).unwrap();
        assert!(!store.has_session(&upload).unwrap());
        assert!(store.has_session(&other).unwrap());

        // Removing twice is fine
        store.remove_session(&upload).unwrap();
    }

    #[test]
    fn test_fs_store_contract() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsChunkStore::new(temp.path().join("staging")).unwrap();
        exercise_store(&store);
    }

    #[test]
    fn test_memory_store_contract() {
        let store = MemoryChunkStore::new();
        exercise_store(&store);
        assert_eq!(store.session_count(), 1);
    }

    #[test]
    fn test_fs_store_layout() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsChunkStore::new(temp.path()).unwrap();
        let upload = id("abc123");

        store.put_chunk(&upload, ChunkIndex::new(10), b"ten").unwrap();
        let slot = temp.path().join("abc123").join("10.chunk");
        assert_eq!(fs::read(&slot).unwrap(), b"ten");

        // Only the committed slot remains; no partial files linger
        let entries: Vec<_> = fs::read_dir(temp.path().join("abc123")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_fs_store_ignores_foreign_entries() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsChunkStore::new(temp.path()).unwrap();
        let upload = id("abc123");

        store.put_chunk(&upload, ChunkIndex::new(3), b"c").unwrap();
        let dir = temp.path().join("abc123");
        fs::write(dir.join("notes.txt"), b"ignore me").unwrap();
        fs::write(dir.join("4.01HX.part"), b"half written").unwrap();
        fs::create_dir(dir.join("5.chunk")).unwrap();

        assert_eq!(store.list_chunks(&upload).unwrap(), vec![ChunkIndex::new(3)]);
    }

    #[test]
    fn test_fs_store_ignores_zero_padded_names() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsChunkStore::new(temp.path()).unwrap();
        let upload = id("pad");

        store.put_chunk(&upload, ChunkIndex::new(0), b"zero").unwrap();
        store.put_chunk(&upload, ChunkIndex::new(7), b"seven").unwrap();
        let dir = temp.path().join("pad");
        fs::write(dir.join("007.chunk"), b"padded").unwrap();
        fs::write(dir.join("00.chunk"), b"padded").unwrap();

        let mut indices = store.list_chunks(&upload).unwrap();
        indices.sort();
        assert_eq!(indices, vec![ChunkIndex::new(0), ChunkIndex::new(7)]);
        for index in indices {
            store.open_chunk(&upload, index).unwrap();
        }
    }
}
