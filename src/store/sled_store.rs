//! Embedding record storage using Sled
//!
//! Records live under the key `document_id \0 chunk_index`, so all of a
//! document's records share a prefix (scan-to-delete) and a full re-insert
//! for a document overwrites the previous records byte for byte.

use super::EmbeddingStore;
use crate::types::EmbeddingRecord;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;

pub struct SledEmbeddingStore {
    db: sled::Db,
}

impl SledEmbeddingStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = sled::open(path).map_err(store_error)?;
        Ok(Self { db })
    }

    fn record_key(document_id: &str, chunk_index: usize) -> Vec<u8> {
        let mut key = Self::document_prefix(document_id);
        // Zero-padded so lexicographic order matches chunk order.
        key.extend_from_slice(format!("{chunk_index:08}").as_bytes());
        key
    }

    fn document_prefix(document_id: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(document_id.len() + 1);
        prefix.extend_from_slice(document_id.as_bytes());
        prefix.push(0);
        prefix
    }

    /// All records for a document, in chunk order.
    pub fn records_for_document(&self, document_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let mut records = Vec::new();
        for entry in self.db.scan_prefix(Self::document_prefix(document_id)) {
            let (_key, value) = entry.map_err(store_error)?;
            records.push(decode_record(&value)?);
        }
        Ok(records)
    }
}

fn store_error(e: sled::Error) -> Error {
    Error::StoreUnavailable(format!("Sled error: {e}"))
}

fn decode_record(value: &[u8]) -> Result<EmbeddingRecord> {
    let (record, _len): (EmbeddingRecord, usize) =
        bincode::serde::decode_from_slice(value, bincode::config::standard())
            .map_err(|e| Error::ConstraintViolation(format!("corrupt embedding record: {e}")))?;
    Ok(record)
}

#[async_trait]
impl EmbeddingStore for SledEmbeddingStore {
    async fn delete_by_document_ids(&self, ids: &HashSet<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut batch = sled::Batch::default();
        for id in ids {
            for entry in self.db.scan_prefix(Self::document_prefix(id)) {
                let (key, _value) = entry.map_err(store_error)?;
                batch.remove(key);
            }
        }
        self.db.apply_batch(batch).map_err(store_error)
    }

    async fn insert_batch(&self, records: &[EmbeddingRecord]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for record in records {
            let value = bincode::serde::encode_to_vec(record, bincode::config::standard())
                .map_err(|e| {
                    Error::ConstraintViolation(format!("unencodable embedding record: {e}"))
                })?;
            batch.insert(Self::record_key(&record.document_id, record.chunk_index), value);
        }
        self.db.apply_batch(batch).map_err(store_error)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.db.len())
    }
}
