//! Source registry using Sled
//!
//! Tracks each registered content source and its sync checkpoint. Next to the
//! revision marker, each source keeps the document-id → content-hash snapshot
//! of the last committed sync; both are replaced together by `commit`, so a
//! failed sync attempt never advances the checkpoint and the next run diffs
//! against the last fully reconciled state.

use crate::types::Source;
use crate::{Error, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;

const SOURCE_PREFIX: &str = "source:";
const HASHES_PREFIX: &str = "hashes:";

pub struct SourceRegistry {
    db: sled::Db,
}

impl SourceRegistry {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = sled::open(path).map_err(registry_error)?;
        Ok(Self { db })
    }

    fn source_key(name: &str) -> String {
        format!("{SOURCE_PREFIX}{name}")
    }

    fn hashes_key(source_id: &str) -> String {
        format!("{HASHES_PREFIX}{source_id}")
    }

    /// All registered sources, in name order.
    pub fn get(&self) -> Result<Vec<Source>> {
        let mut sources = Vec::new();
        for entry in self.db.scan_prefix(SOURCE_PREFIX) {
            let (_key, value) = entry.map_err(registry_error)?;
            sources.push(decode::<Source>(&value)?);
        }
        Ok(sources)
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Source>> {
        match self.db.get(Self::source_key(name)).map_err(registry_error)? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Source>> {
        Ok(self.get()?.into_iter().find(|source| source.id == id))
    }

    /// Registers a new source. The name is the unique handle; re-registering
    /// an existing name fails rather than silently replacing its checkpoint.
    pub fn insert(&self, source: Source) -> Result<Source> {
        let key = Self::source_key(&source.name);
        if self.db.contains_key(&key).map_err(registry_error)? {
            return Err(Error::DuplicateSource(source.name));
        }

        self.db
            .insert(key, encode(&source)?)
            .map_err(registry_error)?;
        Ok(source)
    }

    /// Advances a source's checkpoint. The sole mutation of sync progress;
    /// called only after the store reconciliation has fully succeeded.
    pub fn commit(
        &self,
        id: &str,
        marker: &str,
        document_hashes: &HashMap<String, String>,
    ) -> Result<()> {
        let mut source = self
            .get_by_id(id)?
            .ok_or_else(|| Error::SourceNotFound(format!("no registered source with id {id}")))?;
        source.last_marker = Some(marker.to_string());
        source.last_synced_at = Some(Utc::now());

        // Hashes first: a crash in between leaves a stale marker with fresh
        // hashes, which the next run resolves as a cheap all-unchanged diff.
        self.db
            .insert(Self::hashes_key(id), encode(document_hashes)?)
            .map_err(registry_error)?;
        self.db
            .insert(Self::source_key(&source.name), encode(&source)?)
            .map_err(registry_error)?;
        Ok(())
    }

    /// The hash snapshot from the last committed sync; empty on cold sync.
    pub fn document_hashes(&self, source_id: &str) -> Result<HashMap<String, String>> {
        match self
            .db
            .get(Self::hashes_key(source_id))
            .map_err(registry_error)?
        {
            Some(value) => decode(&value),
            None => Ok(HashMap::new()),
        }
    }
}

fn registry_error(e: sled::Error) -> Error {
    Error::StoreUnavailable(format!("Sled error: {e}"))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| Error::ConstraintViolation(format!("unencodable registry entry: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(value: &[u8]) -> Result<T> {
    let (decoded, _len) = bincode::serde::decode_from_slice(value, bincode::config::standard())
        .map_err(|e| Error::ConstraintViolation(format!("corrupt registry entry: {e}")))?;
    Ok(decoded)
}
