//! Client for CLIP-as-a-Service.
//!
//! Images and text are posted to the inference server, which answers with
//! one embedding per input document.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::preprocess::{self, ImagePreprocessingSpec};

/// Default inference server endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:51000";

/// Something that turns images and text into embeddings.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Get the name of this service.
    fn name(&self) -> &str;

    /// Generate an embedding for raw image bytes.
    async fn image_embedding(&self, image: &[u8]) -> Result<Embedding>;

    /// Generate an embedding for a text query.
    async fn text_embedding(&self, text: &str) -> Result<Embedding>;
}

/// Request body accepted by the inference server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingRequest {
    /// Documents to embed. This client always sends exactly one.
    pub data: Vec<EmbeddingInput>,

    /// Executor endpoint inside the flow; always `/`.
    #[serde(rename = "execEndpoint")]
    pub exec_endpoint: String,
}

impl EmbeddingRequest {
    fn single(input: EmbeddingInput) -> Self {
        Self {
            data: vec![input],
            exec_endpoint: "/".to_string(),
        }
    }

    /// Request for a base64-encoded image.
    pub fn blob(blob: impl Into<String>) -> Self {
        Self::single(EmbeddingInput::Blob { blob: blob.into() })
    }

    /// Request for a text query.
    pub fn text(text: impl Into<String>) -> Self {
        Self::single(EmbeddingInput::Text { text: text.into() })
    }
}

/// A single input document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum EmbeddingInput {
    /// Base64-encoded image.
    Blob { blob: String },
    /// Plain text.
    Text { text: String },
}

/// CLIP-as-a-Service client.
pub struct CasClient {
    /// Server base URL, without the `/post` suffix.
    endpoint: String,

    /// How images are prepared before sending.
    image: ImagePreprocessingSpec,

    /// HTTP client. Timeouts are configured by whoever builds it.
    client: reqwest::Client,
}

impl CasClient {
    /// Create a client for the given endpoint with default image settings.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            image: ImagePreprocessingSpec::default(),
            client: reqwest::Client::new(),
        }
    }

    /// Set the image preprocessing settings.
    pub fn with_image_spec(mut self, image: ImagePreprocessingSpec) -> Self {
        self.image = image;
        self
    }

    /// Use a preconfigured HTTP client.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// The server base URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The image preprocessing settings.
    pub fn image_spec(&self) -> &ImagePreprocessingSpec {
        &self.image
    }

    /// Prepare an image and return its base64 payload, without contacting
    /// the server.
    pub fn encode_image(&self, image: &[u8]) -> Result<String> {
        preprocess::encode_image(image, &self.image)
    }

    /// Send an already encoded image.
    pub async fn send_image(&self, encoded: impl Into<String>) -> Result<Embedding> {
        let encoded = encoded.into();
        debug!("request body: image blob of {} bytes", encoded.len());
        self.post(&EmbeddingRequest::blob(encoded)).await
    }

    async fn post(&self, request: &EmbeddingRequest) -> Result<Embedding> {
        let response = self
            .client
            .post(format!("{}/post", self.endpoint))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::service(format!(
                "clip server returned {status}: {error_text}"
            )));
        }

        let body = response.bytes().await?;
        let result: CasResponse = serde_json::from_slice(&body).map_err(|err| {
            EmbeddingError::service_with("clip server returned a malformed response", err)
        })?;

        let embedding = result
            .data
            .into_iter()
            .next()
            .and_then(|document| document.embedding)
            .ok_or_else(|| EmbeddingError::service("clip server cannot generate an embedding"))?;

        debug!("embedding: {} dimensions", embedding.len());
        Ok(embedding)
    }
}

impl Default for CasClient {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT)
    }
}

#[async_trait]
impl EmbeddingService for CasClient {
    fn name(&self) -> &str {
        "cas"
    }

    async fn image_embedding(&self, image: &[u8]) -> Result<Embedding> {
        let encoded = self.encode_image(image)?;
        self.send_image(encoded).await
    }

    async fn text_embedding(&self, text: &str) -> Result<Embedding> {
        debug!("request body: text {text:?}");
        self.post(&EmbeddingRequest::text(text)).await
    }
}

/// Inference server response format.
#[derive(Debug, Deserialize)]
struct CasResponse {
    #[serde(default)]
    data: Vec<CasDocument>,
}

#[derive(Debug, Deserialize)]
struct CasDocument {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
}
