//! Ollama embedding adapter — proxies to the `/api/embed` endpoint.

use async_trait::async_trait;
use domekit_core::adapter::EmbeddingAdapter;
use domekit_core::error::AdapterError;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct ApiEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Async adapter for the Ollama `/api/embed` endpoint.
pub struct OllamaEmbedding {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaEmbedding {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
        }
    }
}

#[async_trait]
impl EmbeddingAdapter for OllamaEmbedding {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AdapterError> {
        let payload = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AdapterError::Network(format!("cannot reach ollama: {e}")))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::ApiError {
                status_code: status,
                message: format!("embed request failed: {body}"),
            });
        }

        let data: ApiEmbedResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::MalformedResponse(e.to_string()))?;
        Ok(data.embeddings)
    }
}
