//! Search entry point that runs a request as a vector search.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{RequestScope, SearchContextCoordinator, UserInfo};
use crate::error::Result;
use crate::ingester::Document;
use crate::params::SearchRequestParams;

/// One matching document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub fields: Document,
}

/// A page of search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub total_hits: u64,
    /// Whether the engine stopped counting before reaching the real total.
    pub partial: bool,
}

/// Executes a search request.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(
        &self,
        query: &str,
        params: Arc<dyn SearchRequestParams>,
        user: Option<&UserInfo>,
        scope: &RequestScope,
    ) -> Result<SearchResult>;
}

/// Runs the wrapped searcher inside a vector search context.
///
/// The wrapped searcher receives the context's parameters, and query
/// rewriters called while it runs see the context in `scope`. The context is
/// closed when the search finishes, fails, or is dropped.
pub struct MultiModalSearcher<S> {
    inner: S,
    coordinator: SearchContextCoordinator,
}

impl<S: Searcher> MultiModalSearcher<S> {
    pub fn new(inner: S, coordinator: SearchContextCoordinator) -> Self {
        Self { inner, coordinator }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn coordinator(&self) -> &SearchContextCoordinator {
        &self.coordinator
    }
}

#[async_trait]
impl<S: Searcher> Searcher for MultiModalSearcher<S> {
    async fn search(
        &self,
        query: &str,
        params: Arc<dyn SearchRequestParams>,
        user: Option<&UserInfo>,
        scope: &RequestScope,
    ) -> Result<SearchResult> {
        let guard = self
            .coordinator
            .enter(scope, query, params, user.cloned());
        let context = Arc::clone(guard.context());
        debug!("{context}");

        let params: Arc<dyn SearchRequestParams> = context.params().clone();
        self.inner.search(query, params, user, scope).await
    }
}
