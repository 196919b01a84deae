//! Core data types for chunkyard

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Suffix marking an entry in a staging namespace as chunk data
pub const CHUNK_SUFFIX: &str = ".chunk";

const MAX_UPLOAD_ID_LEN: usize = 128;
const MAX_FILE_NAME_LEN: usize = 255;

/// Caller-chosen key grouping all chunks of one logical upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadId(String);

impl UploadId {
    /// Create a new upload ID with validation
    pub fn new(id: &str) -> crate::Result<Self> {
        if id.is_empty() {
            return Err(crate::ChunkyardError::MissingIdentifier);
        }

        if id.len() > MAX_UPLOAD_ID_LEN {
            return Err(crate::ChunkyardError::InvalidIdentifier(format!(
                "longer than {} bytes",
                MAX_UPLOAD_ID_LEN
            )));
        }

        // Used verbatim as a directory name, so keep to a portable charset
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(crate::ChunkyardError::InvalidIdentifier(format!(
                "invalid characters in '{}'",
                id
            )));
        }

        Ok(UploadId(id.to_string()))
    }

    /// Parse an optional raw parameter
    pub fn parse(raw: Option<&str>) -> crate::Result<Self> {
        match raw {
            Some(id) => Self::new(id.trim()),
            None => Err(crate::ChunkyardError::MissingIdentifier),
        }
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a chunk within its upload; ordering is numeric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkIndex(u64);

impl ChunkIndex {
    pub fn new(index: u64) -> Self {
        ChunkIndex(index)
    }

    /// Parse an optional textual index
    pub fn parse(raw: Option<&str>) -> crate::Result<Self> {
        match raw {
            Some(text) => text.parse(),
            None => Err(crate::ChunkyardError::MissingIndex("absent".to_string())),
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Name of the slot this chunk occupies in a staging namespace
    pub fn file_name(&self) -> String {
        format!("{}{}", self.0, CHUNK_SUFFIX)
    }

    /// Recover the index from a slot name, ignoring anything that is not chunk data.
    ///
    /// Only the canonical spelling written by [`ChunkIndex::file_name`] is accepted,
    /// so `007.chunk` is not a slot.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let digits = name.strip_suffix(CHUNK_SUFFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return None;
        }
        digits.parse().ok().map(ChunkIndex)
    }
}

impl FromStr for ChunkIndex {
    type Err = crate::ChunkyardError;

    fn from_str(s: &str) -> crate::Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(crate::ChunkyardError::MissingIndex("empty".to_string()));
        }
        // u64 parsing would accept a leading '+'
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(crate::ChunkyardError::MissingIndex(format!(
                "'{}' is not a non-negative integer",
                trimmed
            )));
        }
        trimmed
            .parse::<u64>()
            .map(ChunkIndex)
            .map_err(|e| crate::ChunkyardError::MissingIndex(format!("'{}': {}", trimmed, e)))
    }
}

impl std::fmt::Display for ChunkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a merged artifact in the public namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileName(String);

impl FileName {
    /// Create a new file name with validation
    pub fn new(name: &str) -> crate::Result<Self> {
        if name.is_empty() {
            return Err(crate::ChunkyardError::MissingFileName);
        }

        if name.len() > MAX_FILE_NAME_LEN {
            return Err(crate::ChunkyardError::InvalidFileName(format!(
                "longer than {} bytes",
                MAX_FILE_NAME_LEN
            )));
        }

        if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
            return Err(crate::ChunkyardError::InvalidFileName(format!(
                "path separators and control characters not allowed in '{}'",
                name.escape_default()
            )));
        }

        // Dot-prefixed names are reserved for in-progress artifacts and staging
        if name.starts_with('.') {
            return Err(crate::ChunkyardError::InvalidFileName(format!(
                "'{}' must not start with '.'",
                name
            )));
        }

        Ok(FileName(name.to_string()))
    }

    /// Parse an optional raw parameter
    pub fn parse(raw: Option<&str>) -> crate::Result<Self> {
        match raw {
            Some(name) => Self::new(name),
            None => Err(crate::ChunkyardError::MissingFileName),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Accepting chunks
    Open,
    /// A merge is reading the namespace; writes are refused
    Merging,
    /// Merged or abandoned; the namespace no longer exists
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Open => "open",
            SessionState::Merging => "merging",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Acknowledgement returned for a stored chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub success: bool,
    pub file_id: String,
    pub chunk_index: u64,
    pub size: u64,
    pub message: String,
}

impl ChunkReceipt {
    pub fn new(upload_id: &UploadId, index: ChunkIndex, size: u64) -> Self {
        ChunkReceipt {
            success: true,
            file_id: upload_id.to_string(),
            chunk_index: index.value(),
            size,
            message: format!("chunk {} stored", index),
        }
    }
}

/// Body of a merge request; fields stay optional so absence is reported precisely
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    /// When set, the merge requires exactly indices `0..expected_chunks`
    #[serde(default)]
    pub expected_chunks: Option<u64>,
}

/// Result of a successful merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub success: bool,
    pub url: String,
    pub file_name: String,
    pub file_id: String,
    pub chunk_count: u64,
    pub bytes_written: u64,
}

/// JSON error payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

impl From<&crate::ChunkyardError> for ErrorBody {
    fn from(err: &crate::ChunkyardError) -> Self {
        ErrorBody {
            error: err.to_string(),
            kind: err.kind().as_str().to_string(),
        }
    }
}
