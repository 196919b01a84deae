//! Merge engine: ordered, streamed reassembly of a session's chunks

use std::collections::BTreeSet;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use chunkyard_core::*;
use tracing::{debug, error, info, warn};
use crate::{ArtifactStore, ChunkStore, SessionRegistry};

/// A completed merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedArtifact {
    pub upload_id: UploadId,
    pub file_name: FileName,
    pub path: PathBuf,
    pub chunk_count: u64,
    pub bytes_written: u64,
}

/// Reassembles staged chunks into artifacts
#[derive(Clone)]
pub struct MergeEngine {
    store: Arc<dyn ChunkStore>,
    registry: Arc<SessionRegistry>,
    artifacts: Arc<ArtifactStore>,
}

impl MergeEngine {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        registry: Arc<SessionRegistry>,
        artifacts: Arc<ArtifactStore>,
    ) -> Self {
        MergeEngine { store, registry, artifacts }
    }

    /// Concatenate every chunk of `upload` in ascending index order into `file_name`.
    ///
    /// Without `expected_chunks`, whatever indices are present get merged and gaps
    /// are not detected. With it, exactly `0..expected_chunks` must be present.
    ///
    /// On any failure the staging namespace is left untouched so the merge can be
    /// retried. On success it is deleted.
    pub fn merge(
        &self,
        upload: &UploadId,
        file_name: &FileName,
        expected_chunks: Option<u64>,
    ) -> Result<MergedArtifact> {
        let close = self.registry.begin_close(upload)?;

        if !self.store.has_session(upload).map_err(|e| self.merge_failure(upload, file_name, e))? {
            return Err(ChunkyardError::SessionNotFound { upload_id: upload.to_string() });
        }

        let mut indices = match self.store.list_chunks(upload) {
            Ok(indices) => indices,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ChunkyardError::SessionNotFound { upload_id: upload.to_string() });
            }
            Err(e) => return Err(self.merge_failure(upload, file_name, e)),
        };
        indices.sort_unstable();

        if let Some(expected) = expected_chunks {
            check_complete(upload, &indices, expected)?;
        }

        debug!(upload_id = %upload, file_name = %file_name, chunks = indices.len(), "merging");

        let mut pending = self
            .artifacts
            .begin(file_name)
            .map_err(|e| self.merge_failure(upload, file_name, e))?;

        for index in &indices {
            let mut chunk = self
                .store
                .open_chunk(upload, *index)
                .map_err(|e| self.merge_failure(upload, file_name, e))?;
            io::copy(&mut chunk, &mut pending)
                .map_err(|e| self.merge_failure(upload, file_name, e))?;
        }

        let bytes_written = pending.bytes_written();
        let path = pending
            .commit()
            .map_err(|e| self.merge_failure(upload, file_name, e))?;

        // The artifact is complete at this point; a cleanup failure only leaks staging space
        if let Err(e) = self.store.remove_session(upload) {
            warn!(upload_id = %upload, error = %e, "merged artifact committed but staging cleanup failed");
        }
        close.complete();

        info!(
            upload_id = %upload,
            file_name = %file_name,
            chunks = indices.len(),
            bytes = bytes_written,
            "merge complete"
        );

        Ok(MergedArtifact {
            upload_id: upload.clone(),
            file_name: file_name.clone(),
            path,
            chunk_count: indices.len() as u64,
            bytes_written,
        })
    }

    /// Discard a session without merging it
    pub fn abandon(&self, upload: &UploadId) -> Result<()> {
        let close = self.registry.begin_close(upload)?;

        let exists = self.store.has_session(upload).map_err(|source| {
            ChunkyardError::StorageFailure { upload_id: upload.to_string(), source }
        })?;
        if !exists {
            return Err(ChunkyardError::SessionNotFound { upload_id: upload.to_string() });
        }

        self.store.remove_session(upload).map_err(|source| {
            error!(upload_id = %upload, error = %source, "failed to abandon session");
            ChunkyardError::StorageFailure { upload_id: upload.to_string(), source }
        })?;
        close.complete();

        info!(upload_id = %upload, "session abandoned");
        Ok(())
    }

    /// Open a previously merged artifact
    pub fn fetch(&self, file_name: &FileName) -> Result<(File, u64)> {
        self.artifacts
            .open(file_name)?
            .ok_or_else(|| ChunkyardError::ArtifactNotFound { file_name: file_name.to_string() })
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    fn merge_failure(&self, upload: &UploadId, file_name: &FileName, source: io::Error) -> ChunkyardError {
        error!(upload_id = %upload, file_name = %file_name, error = %source, "merge failed");
        ChunkyardError::MergeIoFailure {
            upload_id: upload.to_string(),
            file_name: file_name.to_string(),
            source,
        }
    }
}

/// Require exactly the indices `0..expected`
fn check_complete(upload: &UploadId, sorted: &[ChunkIndex], expected: u64) -> Result<()> {
    let present: BTreeSet<u64> = sorted.iter().map(|i| i.value()).collect();
    let missing: Vec<u64> = (0..expected).filter(|i| !present.contains(i)).collect();
    let found = sorted.len() as u64;

    if missing.is_empty() && found == expected {
        return Ok(());
    }

    Err(ChunkyardError::IncompleteUpload {
        upload_id: upload.to_string(),
        expected,
        found,
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> UploadId {
        UploadId::new(s).unwrap()
    }

    #[test]
    fn test_check_complete() {
        let upload = id("abc123");
        let idx = |v: &[u64]| v.iter().copied().map(ChunkIndex::new).collect::<Vec<_>>();

        assert!(check_complete(&upload, &idx(&[0, 1, 2]), 3).is_ok());
        assert!(check_complete(&upload, &[], 0).is_ok());

        match check_complete(&upload, &idx(&[0, 1, 3]), 4) {
            Err(ChunkyardError::IncompleteUpload { missing, found, .. }) => {
                assert_eq!(missing, vec![2]);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Extra chunks beyond the expected range are also a mismatch
        assert!(check_complete(&upload, &idx(&[0, 1, 2, 3]), 3).is_err());
    }
}
