//! Chunk staging and merge engine

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use chunkyard_core::*;

pub mod artifact;
pub mod keyspace;
pub mod merge;
pub mod receiver;
pub mod session;
pub mod staging;

pub use artifact::*;
pub use keyspace::*;
pub use merge::*;
pub use receiver::*;
pub use session::*;
pub use staging::*;

/// Which [`ChunkStore`] implementation holds staged chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StagingBackend {
    /// One directory per upload, one file per chunk
    #[default]
    Fs,
    /// Embedded fjall keyspace
    Keyspace,
    /// Process memory; lost on restart
    Memory,
}

/// Open the staging store for `backend` rooted at `path`
pub fn open_staging(backend: StagingBackend, path: impl AsRef<Path>) -> io::Result<Arc<dyn ChunkStore>> {
    let store: Arc<dyn ChunkStore> = match backend {
        StagingBackend::Fs => Arc::new(FsChunkStore::new(path.as_ref())?),
        StagingBackend::Keyspace => Arc::new(KeyspaceChunkStore::open(path)?),
        StagingBackend::Memory => Arc::new(MemoryChunkStore::new()),
    };
    Ok(store)
}

/// Receiver and merge engine wired to one store, one registry and one artifact directory
#[derive(Clone)]
pub struct Chunkyard {
    store: Arc<dyn ChunkStore>,
    registry: Arc<SessionRegistry>,
    receiver: ChunkReceiver,
    merger: MergeEngine,
}

impl Chunkyard {
    pub fn new(store: Arc<dyn ChunkStore>, artifacts: ArtifactStore) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let artifacts = Arc::new(artifacts);

        Chunkyard {
            receiver: ChunkReceiver::new(store.clone(), registry.clone()),
            merger: MergeEngine::new(store.clone(), registry.clone(), artifacts),
            store,
            registry,
        }
    }

    /// Open with the given backend, creating directories as needed
    pub fn open(
        backend: StagingBackend,
        staging_dir: impl AsRef<Path>,
        artifact_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let store = open_staging(backend, staging_dir)?;
        let artifacts = ArtifactStore::new(artifact_dir.as_ref())?;
        Ok(Self::new(store, artifacts))
    }

    /// Filesystem-backed instance in a fresh temporary directory
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let chunkyard = Self::open(
            StagingBackend::Fs,
            temp_dir.path().join("staging"),
            temp_dir.path().join("files"),
        )?;
        Ok((chunkyard, temp_dir))
    }

    /// Store one chunk from raw request parameters
    pub fn receive(
        &self,
        upload_id: Option<&str>,
        chunk_index: Option<&str>,
        payload: &[u8],
    ) -> Result<ChunkReceipt> {
        self.receiver.receive(upload_id, chunk_index, payload)
    }

    /// Merge from raw request parameters
    pub fn merge(
        &self,
        upload_id: Option<&str>,
        file_name: Option<&str>,
        expected_chunks: Option<u64>,
    ) -> Result<MergedArtifact> {
        let upload = UploadId::parse(upload_id)?;
        let file_name = FileName::parse(file_name)?;
        self.merger.merge(&upload, &file_name, expected_chunks)
    }

    pub fn abandon(&self, upload_id: &str) -> Result<()> {
        self.merger.abandon(&UploadId::new(upload_id)?)
    }

    pub fn fetch(&self, file_name: &str) -> Result<(File, u64)> {
        self.merger.fetch(&FileName::new(file_name)?)
    }

    /// Current lifecycle state, or `None` for an id never seen
    pub fn session_state(&self, upload: &UploadId) -> Result<Option<SessionState>> {
        match self.registry.state(upload) {
            Some(SessionState::Merging) => Ok(Some(SessionState::Merging)),
            recorded => {
                if self.store.has_session(upload)? {
                    Ok(Some(SessionState::Open))
                } else {
                    Ok(recorded.filter(|s| *s == SessionState::Closed))
                }
            }
        }
    }

    pub fn receiver(&self) -> &ChunkReceiver {
        &self.receiver
    }

    pub fn merger(&self) -> &MergeEngine {
        &self.merger
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }
}
