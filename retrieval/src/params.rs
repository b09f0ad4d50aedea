//! Search request parameters.
//!
//! The host search layer reads request parameters through
//! [`SearchRequestParams`]. Vector search wraps the incoming parameters in
//! [`VectorSearchParams`], which overrides the minimum score and hides
//! sub-requests that mean nothing for similarity ranking.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Geographic filter of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub field: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance: String,
}

/// Facet sub-request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetInfo {
    pub fields: Vec<String>,
    pub queries: Vec<String>,
    pub size: Option<usize>,
}

/// Highlighting sub-request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightInfo {
    pub fragment_size: usize,
    pub number_of_fragments: usize,
}

/// Where a search request came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchRequestType {
    #[default]
    Search,
    Json,
    Gsa,
    Admin,
    Suggest,
}

/// Read access to the parameters of one search request.
pub trait SearchRequestParams: Send + Sync + std::fmt::Debug {
    fn query(&self) -> &str;
    fn fields(&self) -> &HashMap<String, Vec<String>>;
    fn conditions(&self) -> &HashMap<String, Vec<String>>;
    fn languages(&self) -> &[String];
    fn geo_info(&self) -> Option<&GeoInfo>;
    fn facet_info(&self) -> Option<&FacetInfo>;
    fn highlight_info(&self) -> Option<&HighlightInfo>;
    fn sort(&self) -> Option<&str>;
    fn start_position(&self) -> usize;
    fn page_size(&self) -> usize;
    fn offset(&self) -> usize;
    fn extra_queries(&self) -> &[String];
    fn attribute(&self, name: &str) -> Option<&serde_json::Value>;
    fn locale(&self) -> Option<&str>;
    fn request_type(&self) -> SearchRequestType;
    fn similar_doc_hash(&self) -> Option<&str>;
    fn min_score(&self) -> Option<f32>;
}

/// Plain parameter values, as the host builds them from an incoming request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestParams {
    pub query: String,
    pub fields: HashMap<String, Vec<String>>,
    pub conditions: HashMap<String, Vec<String>>,
    pub languages: Vec<String>,
    pub geo_info: Option<GeoInfo>,
    pub facet_info: Option<FacetInfo>,
    pub highlight_info: Option<HighlightInfo>,
    pub sort: Option<String>,
    pub start_position: usize,
    pub page_size: usize,
    pub offset: usize,
    pub extra_queries: Vec<String>,
    pub attributes: HashMap<String, serde_json::Value>,
    pub locale: Option<String>,
    pub request_type: SearchRequestType,
    pub similar_doc_hash: Option<String>,
    pub min_score: Option<f32>,
}

impl RequestParams {
    /// Parameters for a query with default paging.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            page_size: 20,
            ..Default::default()
        }
    }
}

impl SearchRequestParams for RequestParams {
    fn query(&self) -> &str {
        &self.query
    }

    fn fields(&self) -> &HashMap<String, Vec<String>> {
        &self.fields
    }

    fn conditions(&self) -> &HashMap<String, Vec<String>> {
        &self.conditions
    }

    fn languages(&self) -> &[String] {
        &self.languages
    }

    fn geo_info(&self) -> Option<&GeoInfo> {
        self.geo_info.as_ref()
    }

    fn facet_info(&self) -> Option<&FacetInfo> {
        self.facet_info.as_ref()
    }

    fn highlight_info(&self) -> Option<&HighlightInfo> {
        self.highlight_info.as_ref()
    }

    fn sort(&self) -> Option<&str> {
        self.sort.as_deref()
    }

    fn start_position(&self) -> usize {
        self.start_position
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    fn offset(&self) -> usize {
        self.offset
    }

    fn extra_queries(&self) -> &[String] {
        &self.extra_queries
    }

    fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    fn request_type(&self) -> SearchRequestType {
        self.request_type
    }

    fn similar_doc_hash(&self) -> Option<&str> {
        self.similar_doc_hash.as_deref()
    }

    fn min_score(&self) -> Option<f32> {
        self.min_score
    }
}

/// Parameter view used while a vector search is active.
///
/// The minimum score comes from configuration; geo, facet and highlight
/// sub-requests are hidden; everything else is read from the wrapped
/// parameters.
#[derive(Debug, Clone)]
pub struct VectorSearchParams {
    parent: Arc<dyn SearchRequestParams>,
    min_score: Option<f32>,
}

impl VectorSearchParams {
    pub fn new(parent: Arc<dyn SearchRequestParams>, min_score: Option<f32>) -> Self {
        Self { parent, min_score }
    }

    /// The wrapped parameters.
    pub fn parent(&self) -> &Arc<dyn SearchRequestParams> {
        &self.parent
    }
}

impl SearchRequestParams for VectorSearchParams {
    fn query(&self) -> &str {
        self.parent.query()
    }

    fn fields(&self) -> &HashMap<String, Vec<String>> {
        self.parent.fields()
    }

    fn conditions(&self) -> &HashMap<String, Vec<String>> {
        self.parent.conditions()
    }

    fn languages(&self) -> &[String] {
        self.parent.languages()
    }

    fn geo_info(&self) -> Option<&GeoInfo> {
        None
    }

    fn facet_info(&self) -> Option<&FacetInfo> {
        None
    }

    fn highlight_info(&self) -> Option<&HighlightInfo> {
        None
    }

    fn sort(&self) -> Option<&str> {
        self.parent.sort()
    }

    fn start_position(&self) -> usize {
        self.parent.start_position()
    }

    fn page_size(&self) -> usize {
        self.parent.page_size()
    }

    fn offset(&self) -> usize {
        self.parent.offset()
    }

    fn extra_queries(&self) -> &[String] {
        self.parent.extra_queries()
    }

    fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.parent.attribute(name)
    }

    fn locale(&self) -> Option<&str> {
        self.parent.locale()
    }

    fn request_type(&self) -> SearchRequestType {
        self.parent.request_type()
    }

    fn similar_doc_hash(&self) -> Option<&str> {
        self.parent.similar_doc_hash()
    }

    fn min_score(&self) -> Option<f32> {
        self.min_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn full_params() -> RequestParams {
        RequestParams {
            query: "red car".to_string(),
            fields: HashMap::from([("label".to_string(), vec!["photos".to_string()])]),
            conditions: HashMap::from([("occurrence".to_string(), vec!["title".to_string()])]),
            languages: vec!["en".to_string()],
            geo_info: Some(GeoInfo {
                field: "location".to_string(),
                latitude: 35.6,
                longitude: 139.7,
                distance: "10km".to_string(),
            }),
            facet_info: Some(FacetInfo {
                fields: vec!["label".to_string()],
                ..Default::default()
            }),
            highlight_info: Some(HighlightInfo {
                fragment_size: 100,
                number_of_fragments: 2,
            }),
            sort: Some("score.desc".to_string()),
            start_position: 20,
            page_size: 10,
            offset: 3,
            extra_queries: vec!["filetype:png".to_string()],
            attributes: HashMap::from([("ip".to_string(), serde_json::json!("10.0.0.1"))]),
            locale: Some("en-US".to_string()),
            request_type: SearchRequestType::Json,
            similar_doc_hash: Some("abc".to_string()),
            min_score: Some(0.1),
        }
    }

    #[test]
    fn test_wrapper_overrides_and_suppresses() {
        let parent = Arc::new(full_params());
        let wrapped = VectorSearchParams::new(parent.clone(), Some(0.6));

        assert_eq!(wrapped.min_score(), Some(0.6));
        assert!(wrapped.geo_info().is_none());
        assert!(wrapped.facet_info().is_none());
        assert!(wrapped.highlight_info().is_none());

        assert_eq!(wrapped.query(), "red car");
        assert_eq!(wrapped.fields(), &parent.fields);
        assert_eq!(wrapped.conditions(), &parent.conditions);
        assert_eq!(wrapped.languages(), ["en".to_string()]);
        assert_eq!(wrapped.sort(), Some("score.desc"));
        assert_eq!(wrapped.start_position(), 20);
        assert_eq!(wrapped.page_size(), 10);
        assert_eq!(wrapped.offset(), 3);
        assert_eq!(wrapped.extra_queries(), ["filetype:png".to_string()]);
        assert_eq!(
            wrapped.attribute("ip"),
            Some(&serde_json::json!("10.0.0.1"))
        );
        assert_eq!(wrapped.attribute("missing"), None);
        assert_eq!(wrapped.locale(), Some("en-US"));
        assert_eq!(wrapped.request_type(), SearchRequestType::Json);
        assert_eq!(wrapped.similar_doc_hash(), Some("abc"));
    }

    #[test]
    fn test_wrapper_clears_min_score_when_unconfigured() {
        let wrapped = VectorSearchParams::new(Arc::new(full_params()), None);
        assert_eq!(wrapped.min_score(), None);
    }
}
