pub mod ollama;
pub mod openai;

use crate::retry::RetryPolicy;
use crate::types::{Chunk, EmbeddedChunk};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of texts; output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    fn provider_name(&self) -> &str;
}

/// Batching front over an embedding provider.
///
/// Partitions chunks into fixed-size batches sized to the provider's request
/// limits, preserves input order, and retries a failed batch in isolation
/// with bounded backoff before re-raising. No chunk is ever silently dropped:
/// a batch either embeds fully or fails the whole call.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let total_batches = chunks.len().div_ceil(self.batch_size);
        let mut embedded = Vec::with_capacity(chunks.len());

        for (i, batch) in chunks.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            tracing::debug!(
                "[EMBEDDINGS] Processing batch {}/{} ({} chunks)",
                i + 1,
                total_batches,
                texts.len()
            );

            let vectors = self.retry.run(|| self.provider.embed_batch(&texts)).await?;
            if vectors.len() != texts.len() {
                return Err(Error::Embedding(format!(
                    "{} returned {} embeddings for {} inputs",
                    self.provider.provider_name(),
                    vectors.len(),
                    texts.len()
                )));
            }

            embedded.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding }),
            );
        }

        Ok(embedded)
    }
}

pub use ollama::OllamaEmbedding;
pub use openai::OpenAIEmbedding;
