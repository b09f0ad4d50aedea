//! KNN queries from free text.

use multimodal_embeddings::EmbeddingService;
use tracing::debug;

use crate::error::Result;
use crate::knn::{DEFAULT_K, KnnQuery};

/// A text query waiting to be embedded.
///
/// Build one with [`TextVectorQuery::builder`], then call
/// [`TextVectorQuery::to_query`] to obtain the [`KnnQuery`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextVectorQuery {
    field: String,
    query: String,
    k: u32,
    min_score: Option<f32>,
}

impl TextVectorQuery {
    pub fn builder() -> TextVectorQueryBuilder {
        TextVectorQueryBuilder::default()
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn min_score(&self) -> Option<f32> {
        self.min_score
    }

    /// Embed the text with `service` and build the KNN query.
    ///
    /// Service failures are returned unchanged.
    pub async fn to_query(&self, service: &dyn EmbeddingService) -> Result<KnnQuery> {
        let vector = service.text_embedding(&self.query).await?;
        debug!(
            field = %self.field,
            dimension = vector.len(),
            "embedded text query with {}",
            service.name()
        );
        Ok(KnnQuery::builder()
            .field(self.field.as_str())
            .vector(vector)
            .k(self.k)
            .min_score(self.min_score)
            .build())
    }
}

/// Builder for [`TextVectorQuery`].
#[derive(Debug, Clone)]
pub struct TextVectorQueryBuilder {
    field: String,
    query: String,
    k: u32,
    min_score: Option<f32>,
}

impl Default for TextVectorQueryBuilder {
    fn default() -> Self {
        Self {
            field: String::new(),
            query: String::new(),
            k: DEFAULT_K,
            min_score: None,
        }
    }
}

impl TextVectorQueryBuilder {
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn k(mut self, k: u32) -> Self {
        self.k = k;
        self
    }

    pub fn min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn build(self) -> TextVectorQuery {
        TextVectorQuery {
            field: self.field,
            query: self.query,
            k: self.k,
            min_score: self.min_score,
        }
    }
}
