use super::EmbeddingProvider;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaEmbedding {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dimension: usize,
    max_tokens: usize,
}

impl OllamaEmbedding {
    pub fn new(base_url: Option<String>, model: Option<String>) -> Self {
        let model_name = model.unwrap_or_else(|| "nomic-embed-text".to_string());
        let base_url = base_url.unwrap_or_else(|| "http://127.0.0.1:11434".to_string());

        let max_tokens = Self::default_max_tokens_for_model(&model_name);

        Self {
            client: reqwest::Client::new(),
            base_url,
            model: model_name,
            dimension: 768,
            max_tokens,
        }
    }

    fn default_max_tokens_for_model(model: &str) -> usize {
        if model.contains("nomic-embed-text") || model.contains("snowflake-arctic-embed") {
            8192
        } else {
            2048
        }
    }

    pub async fn initialize(&mut self) -> Result<()> {
        let probe = vec!["test".to_string()];
        let result = self.embed_batch(&probe).await?;
        let first = result
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("Empty response".to_string()))?;
        self.dimension = first.len();
        Ok(())
    }

    fn preprocess_text(&self, text: &str) -> String {
        if text.is_empty() {
            return " ".to_string();
        }

        let max_chars = self.max_tokens * 4;
        if text.len() > max_chars {
            text.chars().take(max_chars).collect()
        } else {
            text.to_string()
        }
    }

    fn preprocess_texts(&self, texts: &[String]) -> Vec<String> {
        texts.iter().map(|t| self.preprocess_text(t)).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: self.model.clone(),
            input: self.preprocess_texts(texts),
        };

        let url = format!("{}/api/embed", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Ollama error: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited {
                retry_after: Duration::from_secs(1),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Embedding(format!("Ollama API error {status}: {body}")));
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Ollama JSON parse error: {e}")))?;

        Ok(embed_response.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "Ollama"
    }
}
