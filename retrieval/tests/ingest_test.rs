//! Integration tests for the crawl-to-index embedding flow.
//!
//! An image goes through the embedding extractor, the extracted metadata is
//! mapped into a document, and the ingester turns it back into a vector.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use multimodal_retrieval::multimodal_embeddings::{Embedding, EmbeddingService};
use multimodal_retrieval::{
    Document, EMBEDDING_METADATA_KEY, ExtractData, Extractor, FieldValue, Ingester,
    MultiModalConfig, MultiModalSearch,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VECTOR: [f32; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];

/// Embedding service answering every image with [`VECTOR`].
struct FixedImageService;

#[async_trait]
impl EmbeddingService for FixedImageService {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn image_embedding(
        &self,
        _image: &[u8],
    ) -> multimodal_retrieval::multimodal_embeddings::Result<Embedding> {
        Ok(VECTOR.to_vec())
    }

    async fn text_embedding(
        &self,
        _text: &str,
    ) -> multimodal_retrieval::multimodal_embeddings::Result<Embedding> {
        Ok(Vec::new())
    }
}

/// Extractor producing only a title from the resource name.
struct NameExtractor;

#[async_trait]
impl Extractor for NameExtractor {
    async fn extract(
        &self,
        _input: &[u8],
        params: &HashMap<String, String>,
    ) -> multimodal_retrieval::Result<ExtractData> {
        let mut data = ExtractData::new("");
        if let Some(name) = params.get("resourceName") {
            data.put_value("title", name.as_str());
        }
        Ok(data)
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, 255]));
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn params() -> HashMap<String, String> {
    HashMap::from([("resourceName".to_string(), "car.png".to_string())])
}

fn index(search: &MultiModalSearch, data: &ExtractData) -> Document {
    let mut doc = Document::from([(
        "title".to_string(),
        FieldValue::TextList(data.values("title").unwrap_or_default().to_vec()),
    )]);
    search.ingester().metadata_mapping().apply(data, &mut doc);
    search.ingester().transform(doc).unwrap()
}

#[tokio::test]
async fn test_extract_then_ingest_restores_vector() -> anyhow::Result<()> {
    let search = MultiModalSearch::builder()
        .with_service(Arc::new(FixedImageService))
        .build()
        .await?;
    let extractor = search.extractor(NameExtractor);

    let data = extractor.extract(&png(4, 4), &params()).await?;
    let doc = index(&search, &data);

    assert_eq!(
        doc.get("content_vector"),
        Some(&FieldValue::Vector(VECTOR.to_vec()))
    );
    Ok(())
}

#[tokio::test]
async fn test_round_trip_through_clip_server() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/post"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"embedding": VECTOR}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let search = MultiModalSearch::builder()
        .with_config(MultiModalConfig {
            endpoint: server.uri(),
            vector_field: "image_vector".to_string(),
            ..Default::default()
        })
        .build()
        .await?;

    let data = search
        .extractor(NameExtractor)
        .extract(&png(40, 20), &params())
        .await?;
    assert_eq!(data.values(EMBEDDING_METADATA_KEY).map(<[String]>::len), Some(1));

    let doc = index(&search, &data);
    assert_eq!(
        doc.get("image_vector"),
        Some(&FieldValue::Vector(VECTOR.to_vec()))
    );
    assert_eq!(
        doc.get("title"),
        Some(&FieldValue::TextList(vec!["car.png".to_string()]))
    );
    Ok(())
}

#[tokio::test]
async fn test_oversized_image_skips_service_and_embedding() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = MultiModalConfig {
        endpoint: server.uri(),
        ..Default::default()
    };
    config.image.max_width = 16;
    let search = MultiModalSearch::builder()
        .with_config(config)
        .build()
        .await
        .unwrap();

    let data = search
        .extractor(NameExtractor)
        .extract(&png(32, 8), &params())
        .await
        .unwrap();
    assert!(data.values(EMBEDDING_METADATA_KEY).is_none());

    let doc = index(&search, &data);
    assert!(!doc.contains_key("content_vector"));
}
