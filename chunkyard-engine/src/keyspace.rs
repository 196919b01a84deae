//! Staging store backed by an embedded fjall keyspace

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::io::{self, Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use chunkyard_core::{ChunkIndex, UploadId};
use crate::ChunkStore;

const STAGING_PARTITION: &str = "staging";

/// Chunks stored in one partition under `<upload>/<index>.chunk`.
///
/// The bare `<upload>/` key marks the namespace, so an upload exists even
/// before its first chunk is readable and after its last chunk is overwritten.
#[derive(Clone)]
pub struct KeyspaceChunkStore {
    keyspace: Arc<Keyspace>,
    partition: PartitionHandle,
}

impl KeyspaceChunkStore {
    /// Open or create a keyspace at `path`
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let keyspace = Arc::new(Config::new(path).open().map_err(backend)?);
        let partition = keyspace
            .open_partition(STAGING_PARTITION, PartitionCreateOptions::default())
            .map_err(backend)?;

        Ok(KeyspaceChunkStore { keyspace, partition })
    }

    /// Create a store in a fresh temporary directory
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> io::Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let store = Self::open(temp_dir.path())?;
        Ok((store, temp_dir))
    }

    fn persist(&self) -> io::Result<()> {
        self.keyspace.persist(PersistMode::SyncAll).map_err(backend)
    }

    // Helper methods for key formatting
    fn namespace_key(&self, upload: &UploadId) -> String {
        format!("{}/", upload.as_str())
    }

    fn chunk_key(&self, upload: &UploadId, index: ChunkIndex) -> String {
        format!("{}/{}", upload.as_str(), index.file_name())
    }
}

impl ChunkStore for KeyspaceChunkStore {
    fn put_chunk(&self, upload: &UploadId, index: ChunkIndex, payload: &[u8]) -> io::Result<()> {
        let namespace = self.namespace_key(upload);
        if !self.partition.contains_key(namespace.as_bytes()).map_err(backend)? {
            self.partition
                .insert(namespace.as_bytes(), Vec::<u8>::new())
                .map_err(backend)?;
        }

        self.partition
            .insert(self.chunk_key(upload, index).as_bytes(), payload)
            .map_err(backend)?;

        self.persist()
    }

    fn has_session(&self, upload: &UploadId) -> io::Result<bool> {
        self.partition
            .contains_key(self.namespace_key(upload).as_bytes())
            .map_err(backend)
    }

    fn list_chunks(&self, upload: &UploadId) -> io::Result<Vec<ChunkIndex>> {
        if !self.has_session(upload)? {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no staging namespace for {}", upload),
            ));
        }

        let namespace = self.namespace_key(upload);
        let mut indices = Vec::new();

        for item in self.partition.prefix(namespace.as_bytes()) {
            let (key, _value) = item.map_err(backend)?;
            let slot = std::str::from_utf8(&key[namespace.len()..]).ok();
            if let Some(index) = slot.and_then(ChunkIndex::from_file_name) {
                indices.push(index);
            }
        }

        Ok(indices)
    }

    fn open_chunk(&self, upload: &UploadId, index: ChunkIndex) -> io::Result<Box<dyn Read + Send>> {
        let key = self.chunk_key(upload, index);
        match self.partition.get(key.as_bytes()).map_err(backend)? {
            Some(value) => Ok(Box::new(Cursor::new(value.to_vec()))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, key)),
        }
    }

    fn remove_session(&self, upload: &UploadId) -> io::Result<()> {
        let namespace = self.namespace_key(upload);

        let mut keys = Vec::new();
        for item in self.partition.prefix(namespace.as_bytes()) {
            let (key, _value) = item.map_err(backend)?;
            keys.push(key);
        }

        if keys.is_empty() {
            return Ok(());
        }

        // One atomic batch, so a crash never leaves chunk keys without their marker
        let mut batch = self.keyspace.batch();
        for key in keys {
            batch.remove(&self.partition, key);
        }
        batch.commit().map_err(backend)?;

        self.persist()
    }
}

fn backend(e: fjall::Error) -> io::Error {
    io::Error::other(format!("keyspace: {}", e))
}
