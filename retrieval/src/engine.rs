//! Wiring of the multimodal search components.

use std::path::PathBuf;
use std::sync::Arc;

use multimodal_embeddings::EmbeddingService;
use tracing::info;

use crate::config::{ConfigHandle, MultiModalConfig};
use crate::context::SearchContextCoordinator;
use crate::error::Result;
use crate::extractor::{CasExtractor, Extractor};
use crate::ingester::EmbeddingIngester;
use crate::knn::KnnQuery;
use crate::rewrite::{QueryRewriter, VectorQueryRewriter};
use crate::searcher::{MultiModalSearcher, Searcher};
use crate::text_query::TextVectorQuery;

/// Shared configuration, embedding service and context coordinator, plus
/// factories for the adapters the host plugs in.
///
/// Every adapter created here reads the same configuration handle, so a
/// reload is visible to all of them at once.
#[derive(Clone)]
pub struct MultiModalSearch {
    config: ConfigHandle,
    service: Arc<dyn EmbeddingService>,
    coordinator: SearchContextCoordinator,
}

impl MultiModalSearch {
    /// Create a new builder.
    pub fn builder() -> MultiModalSearchBuilder {
        MultiModalSearchBuilder::new()
    }

    pub fn new(config: ConfigHandle, service: Arc<dyn EmbeddingService>) -> Self {
        let coordinator = SearchContextCoordinator::new(config.clone());
        Self {
            config,
            service,
            coordinator,
        }
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn service(&self) -> &Arc<dyn EmbeddingService> {
        &self.service
    }

    pub fn coordinator(&self) -> &SearchContextCoordinator {
        &self.coordinator
    }

    /// Wrap a crawl extractor so it also stores image embeddings.
    pub fn extractor<E: Extractor>(&self, inner: E) -> CasExtractor<E> {
        CasExtractor::new(inner, Arc::clone(&self.service))
    }

    pub fn ingester(&self) -> EmbeddingIngester {
        EmbeddingIngester::new(self.config.clone())
    }

    /// Wrap a searcher so its requests run as vector searches.
    pub fn searcher<S: Searcher>(&self, inner: S) -> MultiModalSearcher<S> {
        MultiModalSearcher::new(inner, self.coordinator.clone())
    }

    /// Query rewriter producing KNN queries, deferring to `fallback` outside
    /// vector searches.
    pub fn query_rewriter(&self, fallback: Arc<dyn QueryRewriter>) -> VectorQueryRewriter {
        VectorQueryRewriter::new(self.coordinator.clone(), Arc::clone(&self.service), fallback)
    }

    /// KNN query for `text` on the configured vector field and threshold.
    pub async fn knn_query(&self, text: &str, k: u32) -> Result<KnnQuery> {
        let config = self.config.snapshot();
        TextVectorQuery::builder()
            .field(config.vector_field.as_str())
            .query(text)
            .k(k)
            .min_score(config.min_score)
            .build()
            .to_query(self.service.as_ref())
            .await
    }

    /// Enable KNN in index settings.
    pub fn rewrite_document_settings(&self, settings: &str) -> String {
        self.config.snapshot().rewrite_document_settings(settings)
    }

    /// Add the vector field to a document mapping.
    pub fn rewrite_document_mapping(&self, mapping: &str) -> String {
        self.config.snapshot().rewrite_document_mapping(mapping)
    }
}

impl std::fmt::Debug for MultiModalSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiModalSearch")
            .field("config", &self.config.snapshot().summary())
            .field("service", &self.service.name())
            .finish()
    }
}

/// Builder for [`MultiModalSearch`].
pub struct MultiModalSearchBuilder {
    config: MultiModalConfig,
    config_file: Option<PathBuf>,
    env_overrides: bool,
    service: Option<Arc<dyn EmbeddingService>>,
}

impl MultiModalSearchBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: MultiModalConfig::default(),
            config_file: None,
            env_overrides: false,
            service: None,
        }
    }

    /// Start from `config`.
    pub fn with_config(mut self, config: MultiModalConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a TOML file. Takes precedence over
    /// [`Self::with_config`].
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Apply `CLIP_*` and `MULTIMODAL_*` environment variables on top, also
    /// after every [`ConfigHandle::reload_from`].
    pub fn with_env_overrides(mut self, enabled: bool) -> Self {
        self.env_overrides = enabled;
        self
    }

    /// Use `service` instead of a client for the configured endpoint.
    pub fn with_service(mut self, service: Arc<dyn EmbeddingService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Build the search wiring.
    pub async fn build(self) -> Result<MultiModalSearch> {
        let config = match &self.config_file {
            Some(path) => MultiModalConfig::load(path).await?,
            None => self.config,
        };
        let mut handle = ConfigHandle::new(config);
        if self.env_overrides {
            handle = handle.with_env_overrides();
        }

        let config = handle.snapshot();
        let service = match self.service {
            Some(service) => service,
            None => Arc::new(config.client()),
        };
        info!(
            "Initialized multimodal search with {}: {}",
            service.name(),
            config.summary()
        );
        Ok(MultiModalSearch::new(handle, service))
    }
}

impl Default for MultiModalSearchBuilder {
    fn default() -> Self {
        Self::new()
    }
}
