use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Kind of external content origin; selects which fetcher handles the source.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Repository,
    TicketDataset,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Repository => "repository",
            SourceKind::TicketDataset => "ticket-dataset",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "repository" | "repo" => Ok(SourceKind::Repository),
            "ticket-dataset" | "dataset" | "tickets" => Ok(SourceKind::TicketDataset),
            other => Err(format!("unknown source kind '{other}'")),
        }
    }
}

/// A registered external content origin with its sync checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub owner: String,
    /// Branch or version this source is pinned to.
    pub reference: String,
    pub kind: SourceKind,
    /// Opaque token for the last fully committed sync (commit SHA or dataset
    /// version). Mutated only by the orchestrator after reconciliation.
    pub last_marker: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Source {
    pub fn new(
        kind: SourceKind,
        owner: impl Into<String>,
        name: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            owner: owner.into(),
            reference: reference.into(),
            kind,
            last_marker: None,
            last_synced_at: None,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// A raw document pulled from a source. Transient: recomputed each sync and
/// kept only long enough to diff, chunk and embed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable across syncs for the same logical document.
    pub id: String,
    pub source_id: String,
    pub path: String,
    pub content: String,
    pub content_hash: String,
    /// Source-specific metadata, passed through to chunks opaquely.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Document {
    pub fn new(source: &Source, path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        let content = content.into();
        let content_hash = content_digest(&content);
        Self {
            id: format!("{}/{}:{}", source.owner, source.name, path),
            source_id: source.id.clone(),
            path,
            content,
            content_hash,
            extra: serde_json::Map::new(),
        }
    }
}

/// Hex SHA-256 of a document's content; drives the unchanged-document skip.
pub fn content_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Provenance metadata carried by every chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub path: String,
    pub source: String,
    pub chunk_index: usize,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A bounded slice of a document's text, the unit of embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// A chunk paired with its vector.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Persisted pairing of chunk text and vector, keyed by owning document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRecord {
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Outcome of one committed sync attempt, reported to the trigger surface.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub source: String,
    pub new_marker: String,
    pub documents_seen: usize,
    pub changed: usize,
    pub removed: usize,
    pub skipped: usize,
    pub records_written: usize,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}
