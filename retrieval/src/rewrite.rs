//! Bridge from parsed lexical queries to vector queries.
//!
//! The host query parser hands every term and phrase it meets to a
//! [`QueryRewriter`]. [`VectorQueryRewriter`] answers with a KNN query when
//! the query targets the default field and a vector search is active in the
//! request scope; in every other case it defers to the lexical rewriter it
//! wraps.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use multimodal_embeddings::EmbeddingService;
use tracing::{debug, warn};

use crate::context::{RequestScope, SearchContextCoordinator};
use crate::error::Result;
use crate::knn::{DEFAULT_K, QueryNode};
use crate::params::SearchRequestParams;
use crate::text_query::TextVectorQuery;

/// Name the parser gives to unqualified query text.
pub const DEFAULT_FIELD: &str = "_default";

/// A parsed lexical query clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexicalQuery {
    /// A single bare word.
    Term { field: String, text: String },
    /// A quoted sequence of words.
    Phrase { field: String, texts: Vec<String> },
}

impl LexicalQuery {
    pub fn term(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Term {
            field: field.into(),
            text: text.into(),
        }
    }

    pub fn phrase<I, S>(field: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Phrase {
            field: field.into(),
            texts: texts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Self::Term { field, .. } | Self::Phrase { field, .. } => field,
        }
    }

    /// The query text. Phrase words are joined with single spaces.
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Self::Term { text, .. } => Cow::Borrowed(text),
            Self::Phrase { texts, .. } => Cow::Owned(texts.join(" ")),
        }
    }
}

/// Side information collected while converting one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryContext {
    field_logs: BTreeMap<String, Vec<String>>,
    highlighted_queries: Vec<String>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `text` was searched on `field`.
    pub fn add_field_log(&mut self, field: &str, text: &str) {
        self.field_logs
            .entry(field.to_string())
            .or_default()
            .push(text.to_string());
    }

    /// Record text to highlight in results.
    pub fn add_highlighted_query(&mut self, text: &str) {
        self.highlighted_queries.push(text.to_string());
    }

    pub fn field_logs(&self) -> &BTreeMap<String, Vec<String>> {
        &self.field_logs
    }

    pub fn highlighted_queries(&self) -> &[String] {
        &self.highlighted_queries
    }
}

/// Converts a parsed clause into an engine query fragment.
#[async_trait]
pub trait QueryRewriter: Send + Sync {
    async fn convert(
        &self,
        query: &LexicalQuery,
        context: &mut QueryContext,
        scope: &RequestScope,
    ) -> Result<QueryNode>;
}

/// Plain lexical conversion.
///
/// Default-field clauses expand to a `should` over the configured search
/// fields; qualified clauses target their own field.
#[derive(Debug, Clone)]
pub struct LexicalRewriter {
    search_fields: Vec<String>,
}

impl LexicalRewriter {
    pub fn new<I, S>(search_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            search_fields: search_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn search_fields(&self) -> &[String] {
        &self.search_fields
    }

    fn node(query: &LexicalQuery, field: &str, text: &str) -> QueryNode {
        match query {
            LexicalQuery::Term { .. } => QueryNode::Match {
                field: field.to_string(),
                query: text.to_string(),
            },
            LexicalQuery::Phrase { .. } => QueryNode::MatchPhrase {
                field: field.to_string(),
                query: text.to_string(),
            },
        }
    }
}

#[async_trait]
impl QueryRewriter for LexicalRewriter {
    async fn convert(
        &self,
        query: &LexicalQuery,
        context: &mut QueryContext,
        _scope: &RequestScope,
    ) -> Result<QueryNode> {
        let text = query.text();
        context.add_field_log(query.field(), &text);
        context.add_highlighted_query(&text);

        if query.field() != DEFAULT_FIELD {
            return Ok(Self::node(query, query.field(), &text));
        }
        Ok(QueryNode::Bool {
            must: Vec::new(),
            should: self
                .search_fields
                .iter()
                .map(|field| Self::node(query, field, &text))
                .collect(),
            filter: Vec::new(),
            must_not: Vec::new(),
        })
    }
}

/// Rewrites default-field clauses into KNN queries during a vector search.
pub struct VectorQueryRewriter {
    coordinator: SearchContextCoordinator,
    service: Arc<dyn EmbeddingService>,
    fallback: Arc<dyn QueryRewriter>,
}

impl VectorQueryRewriter {
    pub fn new(
        coordinator: SearchContextCoordinator,
        service: Arc<dyn EmbeddingService>,
        fallback: Arc<dyn QueryRewriter>,
    ) -> Self {
        Self {
            coordinator,
            service,
            fallback,
        }
    }
}

/// Neighbors to request for a page of `page_size` results.
fn k_for_page(page_size: usize) -> u32 {
    match page_size {
        0 => DEFAULT_K,
        n => u32::try_from(n).unwrap_or(u32::MAX),
    }
}

#[async_trait]
impl QueryRewriter for VectorQueryRewriter {
    async fn convert(
        &self,
        query: &LexicalQuery,
        context: &mut QueryContext,
        scope: &RequestScope,
    ) -> Result<QueryNode> {
        let search_context = match self.coordinator.get_context(scope) {
            Some(search_context) if query.field() == DEFAULT_FIELD => search_context,
            _ => return self.fallback.convert(query, context, scope).await,
        };

        let text = query.text();
        let params = search_context.params();
        let knn = TextVectorQuery::builder()
            .field(search_context.vector_field())
            .query(&*text)
            .k(k_for_page(params.page_size()))
            .min_score(params.min_score())
            .build()
            .to_query(self.service.as_ref())
            .await;

        match knn {
            Ok(knn) => {
                context.add_field_log(query.field(), &text);
                context.add_highlighted_query(&text);
                debug!("KnnQuery: {knn}");
                Ok(knn.into())
            }
            Err(e) => {
                warn!("Failed to convert a query to a vector, falling back to lexical search: {e}");
                self.fallback.convert(query, context, scope).await
            }
        }
    }
}

/// Quote a multi-word free-text query so it is parsed as a phrase.
///
/// Blank queries, queries holding a double quote, and single words are
/// returned as is. So is any query containing `field:` for one of
/// `search_fields`, checked as a plain substring.
pub fn rewrite_phrase_query<'a, S: AsRef<str>>(query: &'a str, search_fields: &[S]) -> Cow<'a, str> {
    if query.trim().is_empty() || query.contains('"') || !query.contains(char::is_whitespace) {
        return Cow::Borrowed(query);
    }
    if search_fields
        .iter()
        .any(|field| query.contains(&format!("{}:", field.as_ref())))
    {
        return Cow::Borrowed(query);
    }
    Cow::Owned(format!("\"{query}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigHandle, MultiModalConfig};
    use crate::knn::KnnQuery;
    use crate::params::RequestParams;
    use crate::test_support::StaticEmbeddings;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    const FIELDS: [&str; 2] = ["title", "content"];

    struct Fixture {
        coordinator: SearchContextCoordinator,
        service: Arc<StaticEmbeddings>,
        rewriter: VectorQueryRewriter,
    }

    fn fixture(service: StaticEmbeddings) -> Fixture {
        let coordinator = SearchContextCoordinator::new(ConfigHandle::new(MultiModalConfig {
            min_score: Some(0.5),
            ..Default::default()
        }));
        let service = Arc::new(service);
        let rewriter = VectorQueryRewriter::new(
            coordinator.clone(),
            service.clone(),
            Arc::new(LexicalRewriter::new(FIELDS)),
        );
        Fixture {
            coordinator,
            service,
            rewriter,
        }
    }

    fn page(size: usize) -> Arc<RequestParams> {
        Arc::new(RequestParams {
            page_size: size,
            ..RequestParams::new("red car")
        })
    }

    fn lexical_default(texts: &[&str], phrase: bool) -> QueryNode {
        let text = texts.join(" ");
        QueryNode::Bool {
            must: Vec::new(),
            should: FIELDS
                .iter()
                .map(|field| {
                    if phrase {
                        QueryNode::MatchPhrase {
                            field: field.to_string(),
                            query: text.clone(),
                        }
                    } else {
                        QueryNode::Match {
                            field: field.to_string(),
                            query: text.clone(),
                        }
                    }
                })
                .collect(),
            filter: Vec::new(),
            must_not: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_phrase_becomes_knn_inside_vector_search() {
        let f = fixture(StaticEmbeddings::new(vec![1.0, 0.0]));
        let scope = RequestScope::new();
        let _guard = f.coordinator.enter(&scope, "red car", page(20), None);

        let mut context = QueryContext::new();
        let node = f
            .rewriter
            .convert(&LexicalQuery::phrase(DEFAULT_FIELD, ["red", "car"]), &mut context, &scope)
            .await
            .unwrap();

        let expected = KnnQuery::builder()
            .field("content_vector")
            .vector(vec![1.0, 0.0])
            .k(20)
            .min_score(Some(0.5))
            .build();
        assert_eq!(node, QueryNode::from(expected));
        assert_eq!(
            context.field_logs().get(DEFAULT_FIELD),
            Some(&vec!["red car".to_string()])
        );
        assert_eq!(context.highlighted_queries(), ["red car".to_string()]);
        assert_eq!(f.service.calls(), 1);
    }

    #[tokio::test]
    async fn test_term_uses_default_k_for_empty_page() {
        let f = fixture(StaticEmbeddings::new(vec![0.25]));
        let scope = RequestScope::new();
        let _guard = f.coordinator.enter(&scope, "car", page(0), None);

        let node = f
            .rewriter
            .convert(&LexicalQuery::term(DEFAULT_FIELD, "car"), &mut QueryContext::new(), &scope)
            .await
            .unwrap();

        match node {
            QueryNode::Knn(knn) => assert_eq!(knn.k(), DEFAULT_K),
            other => panic!("expected a knn query, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_context_falls_back() {
        let f = fixture(StaticEmbeddings::new(vec![1.0]));
        let scope = RequestScope::new();

        let node = f
            .rewriter
            .convert(&LexicalQuery::term(DEFAULT_FIELD, "car"), &mut QueryContext::new(), &scope)
            .await
            .unwrap();

        assert_eq!(node, lexical_default(&["car"], false));
        assert_eq!(f.service.calls(), 0);
    }

    #[tokio::test]
    async fn test_qualified_field_falls_back() {
        let f = fixture(StaticEmbeddings::new(vec![1.0]));
        let scope = RequestScope::new();
        let _guard = f.coordinator.enter(&scope, "title:car", page(10), None);

        let node = f
            .rewriter
            .convert(&LexicalQuery::term("title", "car"), &mut QueryContext::new(), &scope)
            .await
            .unwrap();

        assert_eq!(
            node,
            QueryNode::Match {
                field: "title".to_string(),
                query: "car".to_string(),
            }
        );
        assert_eq!(f.service.calls(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_service_failure_falls_back() {
        let f = fixture(StaticEmbeddings::failing());
        let scope = RequestScope::new();
        let _guard = f.coordinator.enter(&scope, "red car", page(10), None);

        let mut context = QueryContext::new();
        let node = f
            .rewriter
            .convert(&LexicalQuery::phrase(DEFAULT_FIELD, ["red", "car"]), &mut context, &scope)
            .await
            .unwrap();

        assert_eq!(node, lexical_default(&["red", "car"], true));
        assert_eq!(context.highlighted_queries(), ["red car".to_string()]);
        assert!(logs_contain("falling back to lexical search"));
    }

    #[test]
    fn test_rewrite_phrase_query() {
        let fields = ["title", "content"];
        assert_eq!(rewrite_phrase_query("red car", &fields), "\"red car\"");
        assert_eq!(rewrite_phrase_query("car", &fields), "car");
        assert_eq!(rewrite_phrase_query("", &fields), "");
        assert_eq!(rewrite_phrase_query("   ", &fields), "   ");
        assert_eq!(rewrite_phrase_query("\"red car\" blue", &fields), "\"red car\" blue");
        assert_eq!(rewrite_phrase_query("title:car red", &fields), "title:car red");
        assert_eq!(rewrite_phrase_query("label:car red", &fields), "\"label:car red\"");
    }

    #[test]
    fn test_rewrite_phrase_query_matches_field_substrings() {
        // `subtitle:` contains `title:`; the check is a plain substring test.
        assert_eq!(rewrite_phrase_query("subtitle:x y", &["title"]), "subtitle:x y");
        assert!(matches!(
            rewrite_phrase_query("a b", &["title"]),
            Cow::Owned(_)
        ));
    }
}
