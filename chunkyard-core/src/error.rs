//! Error types for chunkyard

use crate::SessionState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkyardError {
    #[error("Missing upload identifier")]
    MissingIdentifier,

    #[error("Invalid upload identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Missing or malformed chunk index: {0}")]
    MissingIndex(String),

    #[error("Missing file name")]
    MissingFileName,

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Upload session not found: {upload_id}")]
    SessionNotFound { upload_id: String },

    #[error("Upload session {upload_id} is busy ({state})")]
    SessionBusy { upload_id: String, state: SessionState },

    #[error("Upload {upload_id} is incomplete: expected {expected} chunks, found {found}, missing {missing:?}")]
    IncompleteUpload {
        upload_id: String,
        expected: u64,
        found: u64,
        missing: Vec<u64>,
    },

    #[error("Failed to store chunk for {upload_id}: {source}")]
    StorageFailure {
        upload_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to merge {upload_id} into {file_name}: {source}")]
    MergeIoFailure {
        upload_id: String,
        file_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact not found: {file_name}")]
    ArtifactNotFound { file_name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse failure category used by request layers to pick a response class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed caller input
    Validation,
    /// Unknown session or artifact
    NotFound,
    /// Operation conflicts with the session's current lifecycle state
    Conflict,
    /// Server-side storage failure
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Io => "io",
        }
    }
}

impl ChunkyardError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChunkyardError::MissingIdentifier
            | ChunkyardError::InvalidIdentifier(_)
            | ChunkyardError::MissingIndex(_)
            | ChunkyardError::MissingFileName
            | ChunkyardError::InvalidFileName(_)
            | ChunkyardError::IncompleteUpload { .. } => ErrorKind::Validation,
            ChunkyardError::SessionNotFound { .. } | ChunkyardError::ArtifactNotFound { .. } => {
                ErrorKind::NotFound
            }
            ChunkyardError::SessionBusy { .. } => ErrorKind::Conflict,
            ChunkyardError::StorageFailure { .. }
            | ChunkyardError::MergeIoFailure { .. }
            | ChunkyardError::Io(_) => ErrorKind::Io,
        }
    }
}
