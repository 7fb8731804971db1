//! HTTP-backed embedding provider.
//!
//! Speaks the OpenAI-compatible `POST /embeddings` shape used by OpenAI
//! itself and by most self-hosted embedding servers (vLLM, Ollama's OpenAI
//! shim, etc.) — `{"model": ..., "input": [...]}` in, `{"data": [{"embedding":
//! [...]}]}` out. Requires the `providers` feature (pulls in `ureq`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedding::{EmbeddingAction, EmbeddingService};
use crate::error::{ProviderError, Result};
use crate::types::Embedding;

/// HTTP embedding provider speaking an OpenAI-compatible embeddings API.
pub struct HttpEmbedding {
    agent: ureq::Agent,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: u16,
}

impl HttpEmbedding {
    /// Creates a new HTTP embedding provider.
    ///
    /// * `endpoint` - Base URL, e.g. `https://api.openai.com/v1`. The
    ///   provider posts to `{endpoint}/embeddings`.
    /// * `model` - Model name sent in the request body.
    /// * `api_key` - Bearer token, if the provider requires auth.
    /// * `dimension` - Expected output dimension, validated per response.
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimension: u16,
        timeout: Duration,
    ) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        Self {
            agent,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            dimension,
        }
    }

    fn request(&self, provider: &str, inputs: &[&str]) -> Result<Vec<Embedding>> {
        let url = format!("{}/embeddings", self.endpoint.trim_end_matches('/'));
        let body = EmbeddingsRequest {
            model: &self.model,
            input: inputs,
        };

        let mut req = self.agent.post(&url).header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", &format!("Bearer {key}"));
        }

        let response = req.send_json(&body).map_err(|e| ProviderError::RequestFailed {
            provider: provider.to_string(),
            reason: e.to_string(),
        })?;

        let parsed: EmbeddingsResponse =
            response
                .into_body()
                .read_json()
                .map_err(|e| ProviderError::RequestFailed {
                    provider: provider.to_string(),
                    reason: format!("invalid response body: {e}"),
                })?;

        parsed
            .data
            .into_iter()
            .map(|item| {
                if item.embedding.len() != self.dimension as usize {
                    Err(ProviderError::UnexpectedDimension {
                        provider: provider.to_string(),
                        expected: self.dimension as usize,
                        got: item.embedding.len(),
                    }
                    .into())
                } else {
                    Ok(item.embedding)
                }
            })
            .collect()
    }
}

impl EmbeddingService for HttpEmbedding {
    fn embed(&self, text: &str, _action: EmbeddingAction) -> Result<Embedding> {
        let mut result = self.request("http", &[text])?;
        result
            .pop()
            .ok_or_else(|| ProviderError::RequestFailed {
                provider: "http".to_string(),
                reason: "embeddings response contained no data".to_string(),
            }
            .into())
    }

    fn embed_batch(&self, texts: &[&str], _action: EmbeddingAction) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request("http", texts)
    }

    fn dimension(&self) -> u16 {
        self.dimension
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsResponseItem>,
}

#[derive(Deserialize)]
struct EmbeddingsResponseItem {
    embedding: Embedding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_embedding_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HttpEmbedding>();
    }

    #[test]
    fn test_http_embedding_dimension() {
        let service = HttpEmbedding::new(
            "https://api.openai.com/v1",
            "text-embedding-3-small",
            Some("sk-test".to_string()),
            1536,
            Duration::from_secs(30),
        );
        assert_eq!(service.dimension(), 1536);
    }

    #[test]
    fn test_http_embedding_empty_batch_short_circuits() {
        let service = HttpEmbedding::new(
            "https://api.openai.com/v1",
            "text-embedding-3-small",
            None,
            1536,
            Duration::from_secs(30),
        );
        let result = service.embed_batch(&[], EmbeddingAction::Add).unwrap();
        assert!(result.is_empty());
    }
}
