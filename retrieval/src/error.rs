//! Error types for multimodal retrieval.

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur while building or transporting vector queries.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Embedding service or image preprocessing error.
    #[error("embedding error: {0}")]
    Embedding(#[from] multimodal_embeddings::EmbeddingError),

    /// Stored embedding is corrupt.
    #[error("codec error: {0}")]
    Codec(#[from] multimodal_embeddings::CodecError),

    /// Query construction or transport error.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by query objects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The operation is the search engine's job, not ours.
    #[error("{0} is not supported")]
    Unsupported(&'static str),

    /// The binary stream ended before the value was complete.
    #[error("unexpected end of stream reading {0}")]
    UnexpectedEof(&'static str),

    /// The binary stream holds something we cannot interpret.
    #[error("invalid stream data: {0}")]
    InvalidData(String),
}
