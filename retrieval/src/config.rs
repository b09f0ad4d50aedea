//! Configuration for multimodal search.
//!
//! The active configuration is an immutable [`MultiModalConfig`] published
//! through a [`ConfigHandle`]. Reloading swaps the whole snapshot, so readers
//! never observe a half-applied update.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use multimodal_embeddings::client::DEFAULT_ENDPOINT;
use multimodal_embeddings::{CasClient, ImagePreprocessingSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, RetrievalError};

/// Default name of the document field holding the content vector.
pub const DEFAULT_VECTOR_FIELD: &str = "content_vector";

/// Default distance metric for the vector field mapping.
pub const DEFAULT_SPACE_TYPE: &str = "l2";

/// Settings consumed by the multimodal components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiModalConfig {
    /// Inference server base URL.
    pub endpoint: String,

    /// Image preprocessing settings.
    pub image: ImagePreprocessingSpec,

    /// Document field holding the content vector.
    pub vector_field: String,

    /// Vector dimension. Required for the index mapping.
    pub dimension: Option<usize>,

    /// KNN method name (e.g. `hnsw`). Required for the index mapping.
    pub method: Option<String>,

    /// KNN engine (e.g. `lucene`). Required for the index mapping.
    pub engine: Option<String>,

    /// Distance metric of the vector field.
    pub space_type: String,

    /// Minimum similarity score applied to vector search requests.
    pub min_score: Option<f32>,
}

impl Default for MultiModalConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            image: ImagePreprocessingSpec::default(),
            vector_field: DEFAULT_VECTOR_FIELD.to_string(),
            dimension: None,
            method: None,
            engine: None,
            space_type: DEFAULT_SPACE_TYPE.to_string(),
            min_score: None,
        }
    }
}

impl MultiModalConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RetrievalError::Config(e.to_string()))?;
        Ok(config.normalized())
    }

    /// Load a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_toml_str(&content)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    ///
    /// Unparsable numbers leave the current value in place, except the
    /// minimum score, which is cleared.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(endpoint) = non_blank(lookup("CLIP_SERVER_ENDPOINT")) {
            self.endpoint = endpoint;
        }
        override_number(&lookup, "CLIP_IMAGE_WIDTH", &mut self.image.width);
        override_number(&lookup, "CLIP_IMAGE_HEIGHT", &mut self.image.height);
        override_number(&lookup, "CLIP_IMAGE_MAX_WIDTH", &mut self.image.max_width);
        override_number(&lookup, "CLIP_IMAGE_MAX_HEIGHT", &mut self.image.max_height);
        if let Some(format) = non_blank(lookup("CLIP_IMAGE_FORMAT")) {
            self.image.format = format;
        }
        if let Some(field) = lookup("MULTIMODAL_CONTENT_FIELD") {
            self.vector_field = field;
        }
        if let Some(dimension) = non_blank(lookup("MULTIMODAL_CONTENT_DIMENSION")) {
            self.dimension = parse_logged("MULTIMODAL_CONTENT_DIMENSION", &dimension);
        }
        if let Some(method) = lookup("MULTIMODAL_CONTENT_METHOD") {
            self.method = Some(method);
        }
        if let Some(engine) = lookup("MULTIMODAL_CONTENT_ENGINE") {
            self.engine = Some(engine);
        }
        if let Some(space_type) = non_blank(lookup("MULTIMODAL_CONTENT_SPACE_TYPE")) {
            self.space_type = space_type;
        }
        if let Some(min_score) = lookup("MULTIMODAL_MIN_SCORE") {
            self.min_score = non_blank(Some(min_score))
                .and_then(|value| parse_logged("MULTIMODAL_MIN_SCORE", &value));
        }
        self.normalized()
    }

    fn normalized(mut self) -> Self {
        self.vector_field = self.vector_field.trim().to_string();
        self
    }

    /// One-line description of the search-facing settings.
    pub fn summary(&self) -> String {
        let min_score = self
            .min_score
            .map(|score| score.to_string())
            .unwrap_or_default();
        format!("vector_field={}, min_score={min_score}", self.vector_field)
    }

    /// Build an inference client for these settings.
    pub fn client(&self) -> CasClient {
        CasClient::new(&self.endpoint).with_image_spec(self.image.clone())
    }

    /// Mapping of the vector field, or `None` when any required setting is
    /// blank and the vector field should not be created.
    pub fn vector_mapping(&self) -> Option<serde_json::Value> {
        let dimension = self.dimension?;
        let method = non_blank(self.method.clone())?;
        let engine = non_blank(self.engine.clone())?;
        if self.vector_field.trim().is_empty() {
            return None;
        }
        Some(serde_json::json!({
            "type": "knn_vector",
            "dimension": dimension,
            "method": {
                "name": method,
                "engine": engine,
                "space_type": self.space_type,
            }
        }))
    }

    /// Add the vector field next to `content` in a document mapping.
    ///
    /// Returns the mapping unchanged when the vector field is disabled.
    pub fn rewrite_document_mapping(&self, mapping: &str) -> String {
        debug!(
            "field: {}, dimension: {:?}, method: {:?}, engine: {:?}, spaceType: {}",
            self.vector_field, self.dimension, self.method, self.engine, self.space_type
        );
        match self.vector_mapping() {
            Some(field_mapping) => mapping.replace(
                "\"content\":",
                &format!("\"{}\": {field_mapping},\n\"content\":", self.vector_field),
            ),
            None => mapping.to_string(),
        }
    }

    /// Enable KNN on the index settings.
    pub fn rewrite_document_settings(&self, settings: &str) -> String {
        settings.replace("\"codec\":", "\"knn\": true,\"codec\":")
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_logged<T: FromStr>(key: &str, value: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!("Failed to parse {key}={value}: {e}");
            None
        }
    }
}

fn override_number<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T)
where
    T::Err: std::fmt::Display,
{
    if let Some(parsed) = non_blank(lookup(key)).and_then(|value| parse_logged(key, &value)) {
        *target = parsed;
    }
}

/// Source of override values, keyed by environment variable name.
type OverrideLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Shared, atomically replaceable configuration snapshot.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<ArcSwap<MultiModalConfig>>,
    overrides: Option<OverrideLookup>,
}

impl ConfigHandle {
    /// Publish an initial configuration.
    pub fn new(config: MultiModalConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(config)),
            overrides: None,
        }
    }

    /// Apply overrides from `lookup` to the current snapshot and to every
    /// later reload.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        let lookup: OverrideLookup = Arc::new(lookup);
        let config = self.snapshot().as_ref().clone().with_overrides(lookup.as_ref());
        self.current.store(Arc::new(config));
        self.overrides = Some(lookup);
        self
    }

    /// Apply `CLIP_*` and `MULTIMODAL_*` environment variables now and on
    /// every reload.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<MultiModalConfig> {
        self.current.load_full()
    }

    /// Replace the configuration.
    pub fn store(&self, config: MultiModalConfig) {
        info!("Loaded multimodal config: {}", config.summary());
        self.current.store(Arc::new(config));
    }

    /// Reload from a TOML file, then re-apply the overrides. The current
    /// snapshot stays in place when the file cannot be read or parsed.
    pub async fn reload_from(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut config = MultiModalConfig::load(path).await?;
        if let Some(lookup) = &self.overrides {
            config = config.with_overrides(lookup.as_ref());
        }
        self.store(config);
        Ok(())
    }
}

impl std::fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("current", &self.snapshot())
            .field("overrides", &self.overrides.is_some())
            .finish()
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(MultiModalConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = MultiModalConfig::default();
        assert_eq!(config.endpoint, "http://localhost:51000");
        assert_eq!(config.image.width, 224);
        assert_eq!(config.image.height, 224);
        assert_eq!(config.image.max_width, 3000);
        assert_eq!(config.image.max_height, 2000);
        assert_eq!(config.image.format, "png");
        assert_eq!(config.vector_field, "content_vector");
        assert_eq!(config.space_type, "l2");
        assert_eq!(config.min_score, None);
        assert_eq!(config.summary(), "vector_field=content_vector, min_score=");
    }

    #[test]
    fn test_overrides() {
        let config = MultiModalConfig::default().with_overrides(lookup(&[
            ("CLIP_SERVER_ENDPOINT", "http://localhost:8080"),
            ("CLIP_IMAGE_WIDTH", "512"),
            ("CLIP_IMAGE_HEIGHT", "512"),
            ("CLIP_IMAGE_MAX_WIDTH", "5000"),
            ("CLIP_IMAGE_MAX_HEIGHT", "not-a-number"),
            ("CLIP_IMAGE_FORMAT", "jpg"),
            ("MULTIMODAL_CONTENT_FIELD", "  image_vector  "),
            ("MULTIMODAL_MIN_SCORE", "0.75"),
        ]));

        assert_eq!(config.endpoint, "http://localhost:8080");
        assert_eq!(config.image.width, 512);
        assert_eq!(config.image.height, 512);
        assert_eq!(config.image.max_width, 5000);
        assert_eq!(config.image.max_height, 2000);
        assert_eq!(config.image.format, "jpg");
        assert_eq!(config.vector_field, "image_vector");
        assert_eq!(config.min_score, Some(0.75));
    }

    #[test]
    fn test_invalid_or_blank_min_score_is_cleared() {
        let base = MultiModalConfig {
            min_score: Some(0.5),
            ..Default::default()
        };
        for value in ["invalid", "", "   "] {
            let config = base
                .clone()
                .with_overrides(lookup(&[("MULTIMODAL_MIN_SCORE", value)]));
            assert_eq!(config.min_score, None, "value {value:?}");
        }

        let config = base.with_overrides(lookup(&[("MULTIMODAL_MIN_SCORE", "-1.5")]));
        assert_eq!(config.min_score, Some(-1.5));
    }

    #[test]
    fn test_from_toml() {
        let config = MultiModalConfig::from_toml_str(
            r#"
            endpoint = "http://cas:51000"
            vector_field = " content_vector "
            dimension = 512
            method = "hnsw"
            engine = "lucene"
            min_score = 0.3

            [image]
            width = 336
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoint, "http://cas:51000");
        assert_eq!(config.vector_field, "content_vector");
        assert_eq!(config.dimension, Some(512));
        assert_eq!(config.image.width, 336);
        assert_eq!(config.image.height, 224);
        assert_eq!(config.min_score, Some(0.3));
        assert!(MultiModalConfig::from_toml_str("dimension = \"x\"").is_err());
    }

    #[test]
    fn test_mapping_rewrite() {
        let config = MultiModalConfig {
            dimension: Some(512),
            method: Some("hnsw".to_string()),
            engine: Some("lucene".to_string()),
            ..Default::default()
        };
        let mapping = r#"{"properties": {"content": {"type": "text"}}}"#;

        assert_eq!(
            config.rewrite_document_mapping(mapping),
            "{\"properties\": {\"content_vector\": {\"type\":\"knn_vector\",\"dimension\":512,\
             \"method\":{\"name\":\"hnsw\",\"engine\":\"lucene\",\"space_type\":\"l2\"}},\n\
             \"content\": {\"type\": \"text\"}}}"
        );
    }

    #[test]
    fn test_mapping_disabled_when_settings_blank() {
        let mapping = r#"{"content": {}}"#;
        let missing_dimension = MultiModalConfig {
            method: Some("hnsw".to_string()),
            engine: Some("lucene".to_string()),
            ..Default::default()
        };
        let blank_engine = MultiModalConfig {
            dimension: Some(512),
            method: Some("hnsw".to_string()),
            engine: Some(" ".to_string()),
            ..Default::default()
        };

        assert_eq!(missing_dimension.rewrite_document_mapping(mapping), mapping);
        assert_eq!(blank_engine.rewrite_document_mapping(mapping), mapping);
        assert!(blank_engine.vector_mapping().is_none());
    }

    #[test]
    fn test_settings_rewrite() {
        let config = MultiModalConfig::default();
        assert_eq!(
            config.rewrite_document_settings(r#"{"index": {"codec": "best_compression"}}"#),
            r#"{"index": {"knn": true,"codec": "best_compression"}}"#
        );
    }

    #[test]
    fn test_handle_swaps_whole_snapshot() {
        let handle = ConfigHandle::default();
        let before = handle.snapshot();

        handle.store(MultiModalConfig {
            vector_field: "v2".to_string(),
            min_score: Some(0.9),
            ..Default::default()
        });

        assert_eq!(before.vector_field, "content_vector");
        let after = handle.snapshot();
        assert_eq!(after.vector_field, "v2");
        assert_eq!(after.min_score, Some(0.9));
    }

    #[tokio::test]
    async fn test_reload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multimodal.toml");
        tokio::fs::write(&path, "min_score = 0.25\n").await.unwrap();

        let handle = ConfigHandle::default();
        handle.reload_from(&path).await.unwrap();
        assert_eq!(handle.snapshot().min_score, Some(0.25));

        tokio::fs::write(&path, "min_score = [").await.unwrap();
        assert!(handle.reload_from(&path).await.is_err());
        assert_eq!(handle.snapshot().min_score, Some(0.25));
    }

    #[tokio::test]
    async fn test_reload_keeps_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multimodal.toml");
        tokio::fs::write(&path, "vector_field = \"file_vector\"\nmin_score = 0.25\n")
            .await
            .unwrap();

        let env = HashMap::from([
            ("MULTIMODAL_MIN_SCORE".to_string(), "0.7".to_string()),
            ("MULTIMODAL_CONTENT_FIELD".to_string(), "image_vector".to_string()),
        ]);
        let handle = ConfigHandle::new(MultiModalConfig::load(&path).await.unwrap())
            .with_overrides(move |key| env.get(key).cloned());
        assert_eq!(handle.snapshot().min_score, Some(0.7));
        assert_eq!(handle.snapshot().vector_field, "image_vector");

        handle.reload_from(&path).await.unwrap();
        let reloaded = handle.snapshot();
        assert_eq!(reloaded.min_score, Some(0.7));
        assert_eq!(reloaded.vector_field, "image_vector");

        let clone = handle.clone();
        tokio::fs::write(&path, "min_score = 0.1\n").await.unwrap();
        clone.reload_from(&path).await.unwrap();
        assert_eq!(handle.snapshot().min_score, Some(0.7));
    }
}
