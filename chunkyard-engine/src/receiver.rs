//! Chunk receiver: persists one chunk per call

use std::sync::Arc;
use chunkyard_core::*;
use tracing::{debug, error};
use crate::{ChunkStore, SessionRegistry};

/// Accepts chunks in any order and stores them by `(upload, index)`
#[derive(Clone)]
pub struct ChunkReceiver {
    store: Arc<dyn ChunkStore>,
    registry: Arc<SessionRegistry>,
}

impl ChunkReceiver {
    pub fn new(store: Arc<dyn ChunkStore>, registry: Arc<SessionRegistry>) -> Self {
        ChunkReceiver { store, registry }
    }

    /// Validate raw request parameters, then store the chunk.
    ///
    /// The identifier is checked before the index, so a request missing both
    /// reports `MissingIdentifier`.
    pub fn receive(
        &self,
        upload_id: Option<&str>,
        chunk_index: Option<&str>,
        payload: &[u8],
    ) -> Result<ChunkReceipt> {
        let upload = UploadId::parse(upload_id)?;
        let index = ChunkIndex::parse(chunk_index)?;
        self.receive_chunk(&upload, index, payload)
    }

    /// Store a chunk for an already validated key
    pub fn receive_chunk(
        &self,
        upload: &UploadId,
        index: ChunkIndex,
        payload: &[u8],
    ) -> Result<ChunkReceipt> {
        let _guard = self.registry.begin_write(upload)?;

        self.store.put_chunk(upload, index, payload).map_err(|source| {
            error!(upload_id = %upload, chunk_index = %index, error = %source, "chunk write failed");
            ChunkyardError::StorageFailure {
                upload_id: upload.to_string(),
                source,
            }
        })?;

        debug!(upload_id = %upload, chunk_index = %index, bytes = payload.len(), "chunk stored");
        Ok(ChunkReceipt::new(upload, index, payload.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryChunkStore;
    use std::io;

    fn receiver() -> (ChunkReceiver, Arc<MemoryChunkStore>, Arc<SessionRegistry>) {
        let store = Arc::new(MemoryChunkStore::new());
        let registry = Arc::new(SessionRegistry::new());
        (ChunkReceiver::new(store.clone(), registry.clone()), store, registry)
    }

    #[test]
    fn test_receive_validates_inputs() {
        let (receiver, store, _) = receiver();

        assert!(matches!(
            receiver.receive(None, Some("0"), b"x"),
            Err(ChunkyardError::MissingIdentifier)
        ));
        assert!(matches!(
            receiver.receive(Some(""), Some("0"), b"x"),
            Err(ChunkyardError::MissingIdentifier)
        ));
        assert!(matches!(
            receiver.receive(None, None, b"x"),
            Err(ChunkyardError::MissingIdentifier)
        ));
        assert!(matches!(
            receiver.receive(Some("abc123"), None, b"x"),
            Err(ChunkyardError::MissingIndex(_))
        ));
        assert!(matches!(
            receiver.receive(Some("abc123"), Some("first"), b"x"),
            Err(ChunkyardError::MissingIndex(_))
        ));
        assert!(matches!(
            receiver.receive(Some("../escape"), Some("0"), b"x"),
            Err(ChunkyardError::InvalidIdentifier(_))
        ));

        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_receive_stores_and_echoes() {
        let (receiver, store, registry) = receiver();

        let receipt = receiver.receive(Some("abc123"), Some("1"), b"World").unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.file_id, "abc123");
        assert_eq!(receipt.chunk_index, 1);
        assert_eq!(receipt.size, 5);

        let upload = UploadId::new("abc123").unwrap();
        assert!(store.has_session(&upload).unwrap());
        assert_eq!(registry.writers(&upload), 0);
    }

    #[test]
    fn test_receive_accepts_empty_payload() {
        let (receiver, store, _) = receiver();
        receiver.receive(Some("abc123"), Some("0"), b"").unwrap();

        let upload = UploadId::new("abc123").unwrap();
        assert_eq!(store.list_chunks(&upload).unwrap(), vec![ChunkIndex::new(0)]);
    }

    #[test]
    fn test_receive_refused_during_merge() {
        let (receiver, store, registry) = receiver();
        let upload = UploadId::new("abc123").unwrap();

        let _close = registry.begin_close(&upload).unwrap();
        let err = receiver.receive_chunk(&upload, ChunkIndex::new(0), b"late").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!store.has_session(&upload).unwrap());
    }

    struct FailingStore;

    impl ChunkStore for FailingStore {
        fn put_chunk(&self, _: &UploadId, _: ChunkIndex, _: &[u8]) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }
        fn has_session(&self, _: &UploadId) -> io::Result<bool> {
            Ok(false)
        }
        fn list_chunks(&self, _: &UploadId) -> io::Result<Vec<ChunkIndex>> {
            Ok(Vec::new())
        }
        fn open_chunk(&self, _: &UploadId, _: ChunkIndex) -> io::Result<Box<dyn io::Read + Send>> {
            Err(io::Error::other("disk full"))
        }
        fn remove_session(&self, _: &UploadId) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_storage_failure_is_reported_and_releases_writer() {
        let registry = Arc::new(SessionRegistry::new());
        let receiver = ChunkReceiver::new(Arc::new(FailingStore), registry.clone());

        let err = receiver.receive(Some("abc123"), Some("0"), b"x").unwrap_err();
        assert!(matches!(err, ChunkyardError::StorageFailure { .. }));
        assert_eq!(err.kind(), ErrorKind::Io);

        let upload = UploadId::new("abc123").unwrap();
        assert_eq!(registry.writers(&upload), 0);
        assert!(registry.begin_close(&upload).is_ok());
    }
}
