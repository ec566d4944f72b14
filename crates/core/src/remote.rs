use crate::embeddings::Embedder;
use crate::error::CapabilityError;
use crate::llm::{GenerationRequest, LanguageModel};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use url::Url;

const EMBEDDING: &str = "embedding";
const LANGUAGE_MODEL: &str = "language-model";
const MAX_EMBED_INPUT_BYTES: usize = 12_000;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    client: Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, CapabilityError> {
        let base_url = Url::parse(base_url)?;
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| CapabilityError::BadResponse {
                capability: "http-client",
                details: error.to_string(),
            })?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        capability: &'static str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, CapabilityError> {
        let endpoint = self.base_url.join(path)?;
        let response = self
            .client
            .post(endpoint)
            .json(body)
            .send()
            .await
            .map_err(|error| CapabilityError::from_transport(capability, error))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CapabilityError::Unavailable {
                capability,
                details: status.to_string(),
            });
        }
        if !status.is_success() {
            return Err(CapabilityError::BadResponse {
                capability,
                details: status.to_string(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|error| CapabilityError::BadResponse {
                capability,
                details: error.to_string(),
            })
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client,
            model: model.into(),
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> String {
        format!("ollama:{}", self.model)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        let prompt = truncate_on_char_boundary(text, MAX_EMBED_INPUT_BYTES);
        let body = serde_json::to_value(EmbeddingsRequest {
            model: &self.model,
            prompt,
        })
        .map_err(|error| CapabilityError::BadResponse {
            capability: EMBEDDING,
            details: error.to_string(),
        })?;

        let parsed: EmbeddingsResponse = self
            .client
            .post_json(EMBEDDING, "api/embeddings", &body)
            .await?;
        if parsed.embedding.is_empty() {
            return Err(CapabilityError::BadResponse {
                capability: EMBEDDING,
                details: "embedding response was empty".to_string(),
            });
        }
        Ok(parsed.embedding)
    }
}

pub struct OllamaLanguageModel {
    client: OllamaClient,
    model: String,
}

impl OllamaLanguageModel {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaLanguageModel {
    fn model_id(&self) -> String {
        format!("ollama:{}", self.model)
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError> {
        let body = json!({
            "model": self.model,
            "prompt": request.render_prompt(),
            "stream": false,
            "options": { "temperature": 0 },
        });
        let parsed: GenerateResponse = self
            .client
            .post_json(LANGUAGE_MODEL, "api/generate", &body)
            .await?;
        Ok(parsed.response)
    }
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}
