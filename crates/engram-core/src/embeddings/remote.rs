//! Remote embeddings over an OpenAI-compatible endpoint
//!
//! POSTs to `<base_url>/embeddings`. The API key comes from the environment
//! (`ENGRAM_API_KEY`, falling back to `OPENAI_API_KEY`); keys never appear in
//! config files.

use std::time::Duration;

use serde::Deserialize;

use super::{EmbeddingError, EmbeddingProvider, DEFAULT_DIMENSIONS};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Remote API embedding provider
pub struct RemoteEmbedder {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    name: String,
}

impl RemoteEmbedder {
    /// `endpoint` is `<base_url>` or `<base_url>#<model>`.
    pub fn new(endpoint: &str) -> Result<Self, EmbeddingError> {
        let (base_url, model) = match endpoint.split_once('#') {
            Some((url, model)) => (url, model.to_string()),
            None => (endpoint, "text-embedding-3-small".to_string()),
        };
        if base_url.is_empty() {
            return Err(EmbeddingError::ProviderInit("empty endpoint url".into()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::ProviderInit(e.to_string()))?;

        let api_key = std::env::var("ENGRAM_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok();

        Ok(Self {
            client,
            url: format!("{}/embeddings", base_url.trim_end_matches('/')),
            name: format!("remote/{}", model),
            model,
            api_key,
        })
    }
}

impl EmbeddingProvider for RemoteEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }

    fn get_embedding(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".into()));
        }

        let mut request = self.client.post(&self.url).json(&serde_json::json!({
            "model": self.model,
            "input": text,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(EmbeddingError::Failed(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .map_err(|e| EmbeddingError::Failed(e.to_string()))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Failed("response carried no embeddings".into()))
    }
}
