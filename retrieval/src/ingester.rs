//! Index-time conversion of stored embeddings back to vectors.

use std::collections::BTreeMap;

use multimodal_embeddings::decode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ConfigHandle;
use crate::error::Result;
use crate::extractor::{EMBEDDING_METADATA_KEY, ExtractData};

/// A document on its way to the index.
pub type Document = BTreeMap<String, FieldValue>;

/// Value of one document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    TextList(Vec<String>),
    Vector(Vec<f32>),
    Json(serde_json::Value),
}

/// How metadata values are copied into a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    /// First value only, as text.
    String,
    /// All values, as a text list.
    Array,
}

/// Copies one extracted metadata entry into a document field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataMapping {
    pub metadata_name: String,
    pub field: String,
    pub mapping_type: MappingType,
}

impl MetadataMapping {
    /// Copy the mapped values of `data` into `doc`. Absent metadata is a no-op.
    pub fn apply(&self, data: &ExtractData, doc: &mut Document) {
        let Some(values) = data.values(&self.metadata_name) else {
            return;
        };
        let value = match self.mapping_type {
            MappingType::Array => FieldValue::TextList(values.to_vec()),
            MappingType::String => match values.first() {
                Some(first) => FieldValue::Text(first.clone()),
                None => return,
            },
        };
        doc.insert(self.field.clone(), value);
    }
}

/// Transforms documents before they are indexed.
pub trait Ingester: Send + Sync {
    fn transform(&self, doc: Document) -> Result<Document>;
}

/// Decodes the stored embedding in the vector field into a float vector.
///
/// The field must hold a text list; its first element is decoded. Any other
/// shape is logged and left alone. Corrupt base64 is returned as an error.
#[derive(Debug, Clone)]
pub struct EmbeddingIngester {
    config: ConfigHandle,
}

impl EmbeddingIngester {
    pub fn new(config: ConfigHandle) -> Self {
        Self { config }
    }

    /// Mapping from the extractor's embedding metadata to the vector field.
    pub fn metadata_mapping(&self) -> MetadataMapping {
        MetadataMapping {
            metadata_name: EMBEDDING_METADATA_KEY.to_string(),
            field: self.config.snapshot().vector_field.clone(),
            mapping_type: MappingType::Array,
        }
    }
}

impl Ingester for EmbeddingIngester {
    fn transform(&self, mut doc: Document) -> Result<Document> {
        let config = self.config.snapshot();
        let field = config.vector_field.as_str();
        let embedding = match doc.get(field) {
            None => return Ok(doc),
            Some(FieldValue::TextList(encoded)) if !encoded.is_empty() => {
                debug!("[{field}] : {doc:?}");
                decode(&encoded[0])?
            }
            Some(_) => {
                warn!("{field} is not an array.");
                return Ok(doc);
            }
        };
        debug!("embedding:{embedding:?}");
        doc.insert(field.to_string(), FieldValue::Vector(embedding));
        Ok(doc)
    }
}
