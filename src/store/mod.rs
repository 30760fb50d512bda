pub mod sled_store;

use crate::types::EmbeddingRecord;
use crate::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// Records submitted per backing-store write, bounded to respect backend
/// statement-size limits.
pub const INSERT_BATCH_SIZE: usize = 50;

/// The persistent vector store, owner of all embedding records.
///
/// The orchestrator never mutates records directly; it only issues
/// delete-by-document-id and insert-many commands. Records are keyed by
/// `(document_id, chunk_index)`, so re-submitting an already-inserted record
/// overwrites identically and a document's record set is always a complete
/// replacement.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Removes every record belonging to each document id. Safe to call for
    /// ids with zero existing records; no-op on empty input.
    async fn delete_by_document_ids(&self, ids: &HashSet<String>) -> Result<()>;

    /// Persists one bounded batch of records. Callers go through
    /// `insert_many`, which enforces the batch limit.
    async fn insert_batch(&self, records: &[EmbeddingRecord]) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    /// Persists all records, partitioned into `INSERT_BATCH_SIZE`-record
    /// batches submitted sequentially and in order. No-op on empty input.
    /// A failure partway through leaves earlier batches persisted; the
    /// caller repairs that by re-running the sync, since re-inserts
    /// overwrite identically.
    async fn insert_many(&self, records: &[EmbeddingRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for (i, batch) in records.chunks(INSERT_BATCH_SIZE).enumerate() {
            tracing::debug!("[STORE] Inserting batch {} ({} records)", i + 1, batch.len());
            self.insert_batch(batch).await?;
        }
        Ok(())
    }
}

pub use sled_store::SledEmbeddingStore;
