//! Compact string representation of embeddings.
//!
//! Vectors are stored in document fields as base64 of their big-endian
//! IEEE-754 bytes. The dimension is not encoded; it comes from deployment
//! configuration.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::Embedding;
use crate::error::CodecError;

const FLOAT_BYTES: usize = std::mem::size_of::<f32>();

/// Encode a vector into its stored string form.
///
/// An empty vector encodes to an empty string.
pub fn encode(vector: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(vector.len() * FLOAT_BYTES);
    for value in vector {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode a stored string back into a vector.
///
/// A trailing group shorter than four bytes is dropped rather than reported;
/// stored data written by older producers relies on this.
pub fn decode(encoded: &str) -> Result<Embedding, CodecError> {
    let bytes = STANDARD.decode(encoded)?;
    Ok(bytes
        .chunks_exact(FLOAT_BYTES)
        .map(|chunk| f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
