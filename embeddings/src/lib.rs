//! # Multimodal embeddings
//!
//! This crate turns images and free text into embedding vectors through an
//! external CLIP-as-a-Service inference server, and converts vectors to and
//! from the string form stored in document fields.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  image bytes ──► preprocess ──► CasClient ──► Embedding         │
//! │  text ─────────────────────────►    │            │              │
//! │                                     ▼            ▼              │
//! │                               POST /post      codec (base64)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod preprocess;

pub use client::{CasClient, EmbeddingInput, EmbeddingRequest, EmbeddingService};
pub use codec::{decode, encode};
pub use error::{CodecError, EmbeddingError, Result};
pub use preprocess::ImagePreprocessingSpec;

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
