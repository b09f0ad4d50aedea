//! # Multimodal retrieval
//!
//! Vector search over image and text content on top of a lexical search
//! engine:
//!
//! - **Ingest**: crawled images are embedded and stored as an encoded field,
//!   then decoded back into vectors before indexing.
//! - **Query**: while a request runs as a vector search, default-field terms
//!   and phrases are rewritten into KNN queries.
//! - **Configuration**: one immutable snapshot shared by every component and
//!   replaced atomically on reload.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Multimodal Search                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ingest:  bytes ──► CasExtractor ──► metadata ──► Ingester       │
//! │                          │                              │        │
//! │                          ▼                              ▼        │
//! │                   EmbeddingService               Vec<f32> field  │
//! │                          ▲                                       │
//! │  query:   Searcher ──► SearchContext ──► VectorQueryRewriter     │
//! │                          (RequestScope)          │               │
//! │                                                  ▼               │
//! │                                              KnnQuery            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use multimodal_retrieval::{MultiModalSearch, RequestScope};
//!
//! let search = MultiModalSearch::builder()
//!     .with_config_file("multimodal.toml")
//!     .with_env_overrides(true)
//!     .build()
//!     .await?;
//!
//! let searcher = search.searcher(engine_searcher);
//! let scope = RequestScope::new();
//! let results = searcher.search("red car", params, None, &scope).await?;
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod ingester;
pub mod knn;
pub mod params;
pub mod rewrite;
pub mod searcher;
pub mod stream;
pub mod text_query;

#[cfg(test)]
mod test_support;

pub use config::{ConfigHandle, MultiModalConfig};
pub use context::{ContextGuard, RequestScope, SearchContext, SearchContextCoordinator, UserInfo};
pub use engine::{MultiModalSearch, MultiModalSearchBuilder};
pub use error::{QueryError, Result, RetrievalError};
pub use extractor::{CasExtractor, EMBEDDING_METADATA_KEY, ExtractData, Extractor};
pub use ingester::{Document, EmbeddingIngester, FieldValue, Ingester, MappingType, MetadataMapping};
pub use knn::{KnnQuery, KnnQueryBuilder, MAX_NESTING_DEPTH, QueryNode};
pub use params::{RequestParams, SearchRequestParams, VectorSearchParams};
pub use rewrite::{
    DEFAULT_FIELD, LexicalQuery, LexicalRewriter, QueryContext, QueryRewriter, VectorQueryRewriter,
    rewrite_phrase_query,
};
pub use searcher::{MultiModalSearcher, SearchHit, SearchResult, Searcher};
pub use text_query::{TextVectorQuery, TextVectorQueryBuilder};

// Re-export the embeddings crate for convenience
pub use multimodal_embeddings;
