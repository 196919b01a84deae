//! Core data models and types for chunkyard

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;

/// Result type alias for chunkyard operations
pub type Result<T> = std::result::Result<T, ChunkyardError>;
