//! Error types for the embeddings system.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Boxed cause carried by service errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The image could not be decoded, or its size is out of range.
    ///
    /// Raised before any request reaches the inference service.
    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    /// IO failure while reading or re-encoding an image.
    #[error("failed to read an image: {0}")]
    ImageIo(#[from] std::io::Error),

    /// Transport failure, non-success status or malformed response from the
    /// inference service.
    #[error("embedding service error: {message}")]
    Service {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Stored embedding could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl EmbeddingError {
    /// Create a service error without an underlying cause.
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
            source: None,
        }
    }

    /// Create a service error wrapping `source`.
    pub fn service_with(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Service {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Whether this error was raised while preprocessing an image.
    pub fn is_image_error(&self) -> bool {
        matches!(self, Self::ImageDecode(_) | Self::ImageIo(_))
    }

    /// Whether this error came from the inference service exchange.
    pub fn is_service_error(&self) -> bool {
        matches!(self, Self::Service { .. })
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        Self::service_with("clip server failed to generate an embedding", err)
    }
}

/// Errors raised by the embedding codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The stored value is not valid base64.
    #[error("invalid base64 embedding: {0}")]
    Base64(#[from] base64::DecodeError),
}
