//! Shared fakes for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use multimodal_embeddings::{Embedding, EmbeddingError, EmbeddingService};

/// Embedding service answering every request with the same vector, or
/// failing every request when built with [`StaticEmbeddings::failing`].
#[derive(Debug, Default)]
pub struct StaticEmbeddings {
    vector: Option<Embedding>,
    calls: AtomicUsize,
}

impl StaticEmbeddings {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector: Some(vector),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self) -> multimodal_embeddings::Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.vector
            .clone()
            .ok_or_else(|| EmbeddingError::service("clip server returned 503"))
    }
}

#[async_trait]
impl EmbeddingService for StaticEmbeddings {
    fn name(&self) -> &str {
        "static"
    }

    async fn image_embedding(&self, _image: &[u8]) -> multimodal_embeddings::Result<Embedding> {
        self.answer()
    }

    async fn text_embedding(&self, _text: &str) -> multimodal_embeddings::Result<Embedding> {
        self.answer()
    }
}
