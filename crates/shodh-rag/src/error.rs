//! Component-boundary error types.
//!
//! Orchestration code (synchronizer, pipeline, retriever) uses `anyhow`
//! throughout, same as the teacher. These enums exist at the handful of
//! boundaries where callers need to match on failure kind rather than just
//! log a message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SparseIndexError {
    #[error("sparse index io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sparse index snapshot is corrupt: {0}")]
    CorruptFormat(String),

    #[error("sparse index snapshot has unsupported version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
}

#[derive(Debug, Error)]
pub enum MetaStoreError {
    #[error("document {0} not found")]
    DocumentNotFound(i64),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

/// Surfaced to the retrieval-path caller when a second concurrent stream
/// is attempted on a conversation already in flight (spec §5, P9).
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("a response is already streaming for this conversation; try again shortly")]
    Busy,

    #[error("generation failed: {0}")]
    Failed(#[from] anyhow::Error),
}
