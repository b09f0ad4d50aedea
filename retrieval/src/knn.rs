//! KNN query construction.
//!
//! [`KnnQuery`] is an immutable description of a vector similarity query.
//! It renders to the engine's query DSL and to a compact binary stream for
//! transport between nodes, but never executes: execution belongs to the
//! search engine.

use std::convert::Infallible;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::{Buf, BufMut};
use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::stream::{StreamRead, StreamWrite};

/// Number of neighbors requested when none is given.
pub const DEFAULT_K: u32 = 10;

/// Boost applied when none is given.
pub const DEFAULT_BOOST: f32 = 1.0;

/// Deepest filter nesting accepted when reading from a stream.
pub const MAX_NESTING_DEPTH: usize = 32;

/// A fragment of the engine query tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryNode {
    /// Exact value on a field.
    Term { field: String, value: String },
    /// Any of several exact values on a field.
    Terms { field: String, values: Vec<String> },
    /// Analyzed full-text match.
    Match { field: String, query: String },
    /// Analyzed phrase match.
    MatchPhrase { field: String, query: String },
    /// Boolean combination.
    Bool {
        must: Vec<QueryNode>,
        should: Vec<QueryNode>,
        filter: Vec<QueryNode>,
        must_not: Vec<QueryNode>,
    },
    /// Vector similarity.
    Knn(Box<KnnQuery>),
}

impl QueryNode {
    /// Name the node is registered under, in the DSL and on the stream.
    pub fn writeable_name(&self) -> &'static str {
        match self {
            QueryNode::Term { .. } => "term",
            QueryNode::Terms { .. } => "terms",
            QueryNode::Match { .. } => "match",
            QueryNode::MatchPhrase { .. } => "match_phrase",
            QueryNode::Bool { .. } => "bool",
            QueryNode::Knn(_) => KnnQuery::NAME,
        }
    }

    /// Render as engine query DSL.
    pub fn to_dsl(&self) -> Value {
        let body = match self {
            QueryNode::Term { field, value } => single(field, Value::from(value.as_str())),
            QueryNode::Terms { field, values } => single(field, Value::from(values.clone())),
            QueryNode::Match { field, query } | QueryNode::MatchPhrase { field, query } => {
                single(field, Value::from(query.as_str()))
            }
            QueryNode::Bool {
                must,
                should,
                filter,
                must_not,
            } => {
                let mut clauses = Map::new();
                for (name, nodes) in [
                    ("must", must),
                    ("should", should),
                    ("filter", filter),
                    ("must_not", must_not),
                ] {
                    if !nodes.is_empty() {
                        clauses.insert(
                            name.to_string(),
                            Value::Array(nodes.iter().map(QueryNode::to_dsl).collect()),
                        );
                    }
                }
                Value::Object(clauses)
            }
            QueryNode::Knn(knn) => return knn.to_dsl(),
        };
        single(self.writeable_name(), body)
    }

    /// Write as a named value: the name, then the body.
    pub fn write_to(&self, out: &mut impl BufMut) {
        out.write_string(self.writeable_name());
        match self {
            QueryNode::Term { field, value } => {
                out.write_string(field);
                out.write_string(value);
            }
            QueryNode::Terms { field, values } => {
                out.write_string(field);
                out.write_string_array(values);
            }
            QueryNode::Match { field, query } | QueryNode::MatchPhrase { field, query } => {
                out.write_string(field);
                out.write_string(query);
            }
            QueryNode::Bool {
                must,
                should,
                filter,
                must_not,
            } => {
                for nodes in [must, should, filter, must_not] {
                    out.write_vint(nodes.len() as u32);
                    for node in nodes {
                        node.write_to(out);
                    }
                }
            }
            QueryNode::Knn(knn) => knn.write_to(out),
        }
    }

    /// Read a named value written by [`QueryNode::write_to`].
    ///
    /// Fails with [`QueryError::InvalidData`] when queries are nested deeper
    /// than [`MAX_NESTING_DEPTH`].
    pub fn read_from(input: &mut impl Buf) -> Result<Self, QueryError> {
        Self::read_nested(input, 0)
    }

    fn read_nested(input: &mut impl Buf, depth: usize) -> Result<Self, QueryError> {
        if depth > MAX_NESTING_DEPTH {
            return Err(QueryError::InvalidData(format!(
                "query nested deeper than {MAX_NESTING_DEPTH}"
            )));
        }
        let name = input.read_string()?;
        let node = match name.as_str() {
            "term" => QueryNode::Term {
                field: input.read_string()?,
                value: input.read_string()?,
            },
            "terms" => QueryNode::Terms {
                field: input.read_string()?,
                values: input.read_string_array()?,
            },
            "match" => QueryNode::Match {
                field: input.read_string()?,
                query: input.read_string()?,
            },
            "match_phrase" => QueryNode::MatchPhrase {
                field: input.read_string()?,
                query: input.read_string()?,
            },
            "bool" => QueryNode::Bool {
                must: read_nodes(input, depth + 1)?,
                should: read_nodes(input, depth + 1)?,
                filter: read_nodes(input, depth + 1)?,
                must_not: read_nodes(input, depth + 1)?,
            },
            KnnQuery::NAME => QueryNode::Knn(Box::new(KnnQuery::read_nested(input, depth)?)),
            other => {
                return Err(QueryError::InvalidData(format!(
                    "unknown query type [{other}]"
                )));
            }
        };
        Ok(node)
    }
}

impl From<KnnQuery> for QueryNode {
    fn from(query: KnnQuery) -> Self {
        QueryNode::Knn(Box::new(query))
    }
}

fn read_nodes(input: &mut impl Buf, depth: usize) -> Result<Vec<QueryNode>, QueryError> {
    let len = input.read_vint()?;
    (0..len).map(|_| QueryNode::read_nested(input, depth)).collect()
}

/// Bit pattern used for equality and hashing. Signed zeros differ; every NaN
/// collapses to one pattern.
fn float_bits(value: f32) -> u32 {
    if value.is_nan() {
        f32::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

/// Render an f32 the way it prints, rather than its widened f64 value.
/// Non-finite values have no JSON form and become `null`.
fn float_value(value: f32) -> Value {
    value
        .to_string()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

/// Vector similarity query against one field.
#[derive(Debug, Clone)]
pub struct KnnQuery {
    field: String,
    vector: Vec<f32>,
    k: u32,
    filter: Option<Box<QueryNode>>,
    ignore_unmapped: bool,
    max_distance: Option<f32>,
    min_score: Option<f32>,
    boost: f32,
    query_name: Option<String>,
}

impl KnnQuery {
    /// DSL and stream name of the query type.
    pub const NAME: &'static str = "knn";

    /// Start building a query.
    pub fn builder() -> KnnQueryBuilder {
        KnnQueryBuilder::default()
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn filter(&self) -> Option<&QueryNode> {
        self.filter.as_deref()
    }

    pub fn ignore_unmapped(&self) -> bool {
        self.ignore_unmapped
    }

    pub fn max_distance(&self) -> Option<f32> {
        self.max_distance
    }

    pub fn min_score(&self) -> Option<f32> {
        self.min_score
    }

    pub fn boost(&self) -> f32 {
        self.boost
    }

    pub fn query_name(&self) -> Option<&str> {
        self.query_name.as_deref()
    }

    /// Render as engine query DSL:
    /// `{"knn": {<field>: {"vector": [...], "k": n, ...}}}`.
    pub fn to_dsl(&self) -> Value {
        let mut body = Map::new();
        body.insert(
            "vector".to_string(),
            Value::Array(self.vector.iter().copied().map(float_value).collect()),
        );
        body.insert("k".to_string(), Value::from(self.k));
        if let Some(filter) = &self.filter {
            body.insert("filter".to_string(), filter.to_dsl());
        }
        body.insert(
            "ignore_unmapped".to_string(),
            Value::Bool(self.ignore_unmapped),
        );
        if let Some(max_distance) = self.max_distance {
            body.insert("max_distance".to_string(), float_value(max_distance));
        }
        if let Some(min_score) = self.min_score {
            body.insert("min_score".to_string(), float_value(min_score));
        }
        body.insert("boost".to_string(), float_value(self.boost));
        if let Some(name) = &self.query_name {
            body.insert("_name".to_string(), Value::from(name.as_str()));
        }
        single(Self::NAME, single(&self.field, Value::Object(body)))
    }

    /// Write to a binary stream.
    ///
    /// Order: boost, query name, field, vector, k, filter, ignore-unmapped,
    /// max distance, min score.
    pub fn write_to(&self, out: &mut impl BufMut) {
        out.write_float(self.boost);
        out.write_optional_string(self.query_name.as_deref());
        out.write_string(&self.field);
        out.write_float_array(&self.vector);
        out.put_u32(self.k);
        out.write_bool(self.filter.is_some());
        if let Some(filter) = &self.filter {
            filter.write_to(out);
        }
        out.write_bool(self.ignore_unmapped);
        out.write_optional_float(self.max_distance);
        out.write_optional_float(self.min_score);
    }

    /// Read a query written by [`KnnQuery::write_to`].
    pub fn read_from(input: &mut impl Buf) -> Result<Self, QueryError> {
        Self::read_nested(input, 0)
    }

    fn read_nested(input: &mut impl Buf, depth: usize) -> Result<Self, QueryError> {
        let boost = input.read_float()?;
        let query_name = input.read_optional_string()?;
        let field = input.read_string()?;
        let vector = input.read_float_array()?;
        let k = input.read_u32()?;
        let filter = if input.read_bool()? {
            Some(Box::new(QueryNode::read_nested(input, depth + 1)?))
        } else {
            None
        };
        Ok(Self {
            field,
            vector,
            k,
            filter,
            ignore_unmapped: input.read_bool()?,
            max_distance: input.read_optional_float()?,
            min_score: input.read_optional_float()?,
            boost,
            query_name,
        })
    }

    /// Convert into an executable engine query.
    ///
    /// Always fails: execution is the search engine's responsibility.
    pub fn to_query(&self) -> Result<Infallible, QueryError> {
        Err(QueryError::Unsupported("to_query"))
    }
}

impl PartialEq for KnnQuery {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field
            && self.vector.len() == other.vector.len()
            && self
                .vector
                .iter()
                .zip(&other.vector)
                .all(|(a, b)| float_bits(*a) == float_bits(*b))
            && self.k == other.k
            && self.filter == other.filter
            && self.ignore_unmapped == other.ignore_unmapped
            && self.max_distance.map(float_bits) == other.max_distance.map(float_bits)
            && self.min_score.map(float_bits) == other.min_score.map(float_bits)
            && float_bits(self.boost) == float_bits(other.boost)
            && self.query_name == other.query_name
    }
}

impl Eq for KnnQuery {}

impl Hash for KnnQuery {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.field.hash(state);
        self.vector.len().hash(state);
        for value in &self.vector {
            float_bits(*value).hash(state);
        }
        self.k.hash(state);
        self.filter.hash(state);
        self.ignore_unmapped.hash(state);
        self.max_distance.map(float_bits).hash(state);
        self.min_score.map(float_bits).hash(state);
        float_bits(self.boost).hash(state);
        self.query_name.hash(state);
    }
}

impl fmt::Display for KnnQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_dsl())
    }
}

/// Builder for [`KnnQuery`].
#[derive(Debug, Clone)]
pub struct KnnQueryBuilder {
    field: String,
    vector: Vec<f32>,
    k: u32,
    filter: Option<QueryNode>,
    ignore_unmapped: bool,
    max_distance: Option<f32>,
    min_score: Option<f32>,
    boost: f32,
    query_name: Option<String>,
}

impl Default for KnnQueryBuilder {
    fn default() -> Self {
        Self {
            field: String::new(),
            vector: Vec::new(),
            k: DEFAULT_K,
            filter: None,
            ignore_unmapped: false,
            max_distance: None,
            min_score: None,
            boost: DEFAULT_BOOST,
            query_name: None,
        }
    }
}

impl KnnQueryBuilder {
    /// Set the vector field to search.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Set the query vector.
    pub fn vector(mut self, vector: impl Into<Vec<f32>>) -> Self {
        self.vector = vector.into();
        self
    }

    /// Set the number of neighbors.
    pub fn k(mut self, k: u32) -> Self {
        self.k = k;
        self
    }

    /// Restrict candidates with a filter query.
    pub fn filter(mut self, filter: QueryNode) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn ignore_unmapped(mut self, ignore_unmapped: bool) -> Self {
        self.ignore_unmapped = ignore_unmapped;
        self
    }

    pub fn max_distance(mut self, max_distance: Option<f32>) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }

    pub fn query_name(mut self, name: impl Into<String>) -> Self {
        self.query_name = Some(name.into());
        self
    }

    /// Build the immutable query.
    pub fn build(self) -> KnnQuery {
        KnnQuery {
            field: self.field,
            vector: self.vector,
            k: self.k,
            filter: self.filter.map(Box::new),
            ignore_unmapped: self.ignore_unmapped,
            max_distance: self.max_distance,
            min_score: self.min_score,
            boost: self.boost,
            query_name: self.query_name,
        }
    }
}
