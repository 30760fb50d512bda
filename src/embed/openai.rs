//! OpenAI embedding provider

use super::EmbeddingProvider;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct OpenAIEmbedding {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    dimension: usize,
    max_tokens: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    encoding_format: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAIEmbedding {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        let model = model.unwrap_or_else(|| "text-embedding-3-small".to_string());
        let base_url = base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Self {
            client: Client::new(),
            api_key,
            model,
            base_url,
            dimension: 0,
            max_tokens: 8192,
        }
    }

    pub async fn detect_dimension(&mut self) -> Result<usize> {
        let probe = vec!["test".to_string()];
        let result = self.embed_batch(&probe).await?;

        if let Some(first) = result.first() {
            self.dimension = first.len();
            Ok(self.dimension)
        } else {
            Err(Error::Embedding("Failed to detect dimension".to_string()))
        }
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

/// Reads `Retry-After` (seconds) from a 429, defaulting to one second.
fn retry_after(response: &reqwest::Response) -> Duration {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(1))
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: self.preprocess_texts(texts),
            encoding_format: "float".to_string(),
        };

        let url = format!("{}/embeddings", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("OpenAI request error: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited {
                retry_after: retry_after(&response),
            });
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::Embedding(format!(
                "OpenAI API error ({status}): {error_text}"
            )));
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("OpenAI JSON parse error: {e}")))?;

        Ok(embedding_response
            .data
            .into_iter()
            .map(|d| d.embedding)
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "OpenAI"
    }
}
