//! Crawl-time extraction with image embeddings.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use multimodal_embeddings::{EmbeddingService, encode};
use tracing::{debug, warn};

use crate::error::Result;

/// Metadata key under which the encoded image embedding is stored.
pub const EMBEDDING_METADATA_KEY: &str = "X-FESS-Embedding";

/// Text and metadata extracted from one crawled resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractData {
    pub content: String,
    metadata: BTreeMap<String, Vec<String>>,
}

impl ExtractData {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Replace all values of `key` with `value`.
    pub fn put_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), vec![value.into()]);
    }

    /// Append `value` to the values of `key`.
    pub fn add_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.entry(key.into()).or_default().push(value.into());
    }

    pub fn values(&self, key: &str) -> Option<&[String]> {
        self.metadata.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.metadata.keys().map(String::as_str)
    }

    pub fn metadata(&self) -> &BTreeMap<String, Vec<String>> {
        &self.metadata
    }
}

/// Turns raw resource bytes into [`ExtractData`].
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, input: &[u8], params: &HashMap<String, String>) -> Result<ExtractData>;

    /// Priority among extractors registered for the same content type.
    /// Higher wins.
    fn weight(&self) -> u32 {
        1
    }
}

/// Extractor that also embeds the resource as an image.
///
/// The wrapped extractor produces content and metadata. The image embedding
/// is added under [`EMBEDDING_METADATA_KEY`]. When the image cannot be
/// embedded, the failure is logged and the wrapped result is returned
/// without an embedding.
pub struct CasExtractor<E> {
    inner: E,
    service: Arc<dyn EmbeddingService>,
}

impl<E: Extractor> CasExtractor<E> {
    pub fn new(inner: E, service: Arc<dyn EmbeddingService>) -> Self {
        Self { inner, service }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: Extractor> Extractor for CasExtractor<E> {
    async fn extract(&self, input: &[u8], params: &HashMap<String, String>) -> Result<ExtractData> {
        let mut data = self.inner.extract(input, params).await?;
        match self.service.image_embedding(input).await {
            Ok(vector) => {
                debug!(dimension = vector.len(), "embedded image with {}", self.service.name());
                data.put_value(EMBEDDING_METADATA_KEY, encode(&vector));
            }
            Err(e) => warn!("Failed to convert an image to a vector: {e}"),
        }
        Ok(data)
    }

    fn weight(&self) -> u32 {
        10
    }
}
