//! Per-request vector search context.
//!
//! A [`RequestScope`] is the execution unit of one search request and is
//! passed explicitly through the call chain. While a vector search is
//! running, the scope holds a [`SearchContext`], which query rewriters use to
//! discover that they should produce KNN queries.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ConfigHandle;
use crate::params::{SearchRequestParams, VectorSearchParams};

/// Identity of the user issuing a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: String,
    pub roles: Vec<String>,
}

/// State of an active vector search.
#[derive(Debug, Clone)]
pub struct SearchContext {
    vector_field: String,
    query: String,
    params: Arc<VectorSearchParams>,
    user: Option<UserInfo>,
}

impl SearchContext {
    pub fn new(
        vector_field: impl Into<String>,
        query: impl Into<String>,
        params: VectorSearchParams,
        user: Option<UserInfo>,
    ) -> Self {
        Self {
            vector_field: vector_field.into(),
            query: query.into(),
            params: Arc::new(params),
            user,
        }
    }

    /// The field holding document vectors.
    pub fn vector_field(&self) -> &str {
        &self.vector_field
    }

    /// The free-text query as the user typed it.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Request parameters as seen by the vector search.
    pub fn params(&self) -> &Arc<VectorSearchParams> {
        &self.params
    }

    pub fn user(&self) -> Option<&UserInfo> {
        self.user.as_ref()
    }
}

impl fmt::Display for SearchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SearchContext [query={}, vector_field={}, min_score={:?}, user={}]",
            self.query,
            self.vector_field,
            self.params.min_score(),
            self.user.as_ref().map_or("-", |u| u.user_id.as_str())
        )
    }
}

/// Execution unit of one request.
///
/// Holds at most one [`SearchContext`]. A scope belongs to a single request;
/// share it by reference along that request's call chain only.
#[derive(Debug, Default)]
pub struct RequestScope {
    context: Mutex<Option<Arc<SearchContext>>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<SearchContext>>> {
        // A panic elsewhere in the request cannot leave the slot half-written.
        self.context
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Creates, exposes and clears search contexts.
#[derive(Debug, Clone)]
pub struct SearchContextCoordinator {
    config: ConfigHandle,
}

impl SearchContextCoordinator {
    pub fn new(config: ConfigHandle) -> Self {
        Self { config }
    }

    /// Start a vector search in `scope`.
    ///
    /// A context left behind in the scope is discarded with a warning.
    pub fn create_context(
        &self,
        scope: &RequestScope,
        query: &str,
        params: Arc<dyn SearchRequestParams>,
        user: Option<UserInfo>,
    ) -> Arc<SearchContext> {
        let config = self.config.snapshot();
        let context = Arc::new(SearchContext::new(
            config.vector_field.as_str(),
            query,
            VectorSearchParams::new(params, config.min_score),
            user,
        ));

        let mut slot = scope.slot();
        if let Some(stale) = slot.take() {
            warn!("The context exists: {stale}");
        }
        *slot = Some(Arc::clone(&context));
        context
    }

    /// The active context of `scope`, if any.
    pub fn get_context(&self, scope: &RequestScope) -> Option<Arc<SearchContext>> {
        scope.slot().clone()
    }

    /// End the vector search in `scope`. Safe to call when none is active.
    pub fn close_context(&self, scope: &RequestScope) {
        if scope.slot().take().is_none() {
            warn!("The context does not exist.");
        }
    }

    /// Create a context that is closed when the returned guard drops.
    pub fn enter<'a>(
        &'a self,
        scope: &'a RequestScope,
        query: &str,
        params: Arc<dyn SearchRequestParams>,
        user: Option<UserInfo>,
    ) -> ContextGuard<'a> {
        let context = self.create_context(scope, query, params, user);
        ContextGuard {
            coordinator: self,
            scope,
            context,
        }
    }
}

/// Closes its context on drop, on every exit path.
pub struct ContextGuard<'a> {
    coordinator: &'a SearchContextCoordinator,
    scope: &'a RequestScope,
    context: Arc<SearchContext>,
}

impl ContextGuard<'_> {
    pub fn context(&self) -> &Arc<SearchContext> {
        &self.context
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.close_context(self.scope);
    }
}
