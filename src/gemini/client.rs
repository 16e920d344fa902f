use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::{TextEmbedder, TextGenerator};
use crate::config::GeminiConfig;
use crate::error::{ServiceError, ServiceResult};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for the Gemini `embedContent` / `generateContent` REST calls.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("build gemini http client: {e}"))?;
        Ok(Self { http, config })
    }

    fn api_key(&self, purpose: &str) -> ServiceResult<&str> {
        self.config.api_key.as_deref().ok_or_else(|| {
            ServiceError::Configuration(format!("GEMINI_API_KEY must be set to {purpose}"))
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.config.base_url.trim_end_matches('/'),
            model,
            method
        )
    }

    async fn post(
        &self,
        url: String,
        key: &str,
        body: Value,
        timeout: std::time::Duration,
    ) -> ServiceResult<Value> {
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                // reqwest errors print the request url
                ServiceError::transient(format!("Gemini request failed: {}", e.without_url()))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = format!("Gemini API error: {status} - {text}");
            return Err(if is_retryable_status(status) {
                ServiceError::transient(message)
            } else {
                ServiceError::upstream(message)
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| {
                ServiceError::upstream(format!("Gemini response is not JSON: {}", e.without_url()))
            })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn received_keys(data: &Value) -> String {
    data.as_object()
        .map(|o| o.keys().cloned().collect::<Vec<_>>().join(","))
        .unwrap_or_default()
}

/// The API has used a few shapes for the same payload over time.
fn extract_vector(data: &Value) -> Option<Vec<f32>> {
    let candidates = [
        data.pointer("/embedding/values"),
        data.pointer("/embedding/value"),
        data.pointer("/embeddings/0/values"),
        data.pointer("/embeddings/0/value"),
    ];
    let values = candidates.into_iter().flatten().find_map(Value::as_array)?;
    values
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn extract_text(data: &Value) -> Option<String> {
    let parts = data.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[async_trait]
impl TextEmbedder for GeminiClient {
    fn dimensions(&self) -> usize {
        self.config.embedding_dims
    }

    #[instrument(skip(self, text), fields(model = %self.config.embedding_model))]
    async fn embed_text(&self, text: &str) -> ServiceResult<Vec<f32>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::Validation(
                "embed_text requires non-empty text".into(),
            ));
        }
        let key = self.api_key("compute embeddings")?;

        let url = self.model_url(&self.config.embedding_model, "embedContent");
        let body = json!({ "content": { "parts": [{ "text": trimmed }] } });
        let data = self.post(url, key, body, self.config.embed_timeout).await?;

        let Some(vector) = extract_vector(&data) else {
            warn!(received_keys = %received_keys(&data), "unexpected embeddings shape");
            return Err(ServiceError::upstream(
                "Unexpected Gemini embeddings response shape",
            ));
        };

        let expected = self.config.embedding_dims;
        if vector.len() != expected {
            return Err(ServiceError::upstream(format!(
                "Embedding dimension mismatch: expected {expected}, got {}",
                vector.len()
            )));
        }

        debug!(dims = vector.len(), "embedding computed");
        Ok(vector)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    #[instrument(skip(self, prompt), fields(model = %self.config.generation_model))]
    async fn generate_text(&self, prompt: &str) -> ServiceResult<String> {
        let trimmed = prompt.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::Validation(
                "generate_text requires non-empty prompt".into(),
            ));
        }
        let key = self.api_key("generate response")?;

        let url = self.model_url(&self.config.generation_model, "generateContent");
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": trimmed }] }],
            "generationConfig": { "temperature": self.config.temperature },
        });
        let data = self.post(url, key, body, self.config.generate_timeout).await?;

        extract_text(&data).ok_or_else(|| {
            warn!(received_keys = %received_keys(&data), "unexpected generateContent shape");
            ServiceError::upstream("Unexpected Gemini generateContent response shape")
        })
    }
}
