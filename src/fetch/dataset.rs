//! Local ticket-dataset fetcher
//!
//! Reads an exported dataset from disk: `.jsonl` files expand to one document
//! per ticket record, everything else passes through as a whole document. The
//! revision marker is a digest over the full document set, so an unchanged
//! export diffs to a no-op.

use super::{FetchResponse, Fetcher};
use crate::types::{Document, Source, SourceKind};
use crate::{Error, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub struct DatasetFetcher {
    root: PathBuf,
}

impl DatasetFetcher {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn scan_export(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let walker = ignore::WalkBuilder::new(dir)
            .follow_links(false)
            .git_ignore(true)
            .hidden(true)
            .build();

        for entry in walker {
            let entry = entry.map_err(|e| {
                Error::SourceUnreachable(format!("cannot scan {}: {e}", dir.display()))
            })?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push(entry.into_path());
            }
        }

        // Walk order is platform-dependent; the marker digest is not.
        files.sort();
        Ok(files)
    }

    async fn read_documents(
        &self,
        source: &Source,
        dir: &Path,
        file: &Path,
    ) -> Result<Vec<Document>> {
        let relative = file
            .strip_prefix(dir)
            .unwrap_or(file)
            .to_string_lossy()
            .replace('\\', "/");

        let content = match tokio::fs::read_to_string(file).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!("[FETCH] skipping non-text file {relative}");
                return Ok(Vec::new());
            }
            Err(e) => return Err(Error::Io(e)),
        };

        if file.extension().is_some_and(|ext| ext == "jsonl") {
            let mut documents = Vec::new();
            let mut seen_paths = HashSet::new();
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let Some(mut document) = ticket_document(source, &relative, line_no, line) else {
                    tracing::warn!("[FETCH] skipping malformed ticket {relative}:{line_no}");
                    continue;
                };
                if !seen_paths.insert(document.path.clone()) {
                    // Colliding ticket ids would collapse into one record set;
                    // the line number keeps the later ticket distinct.
                    tracing::warn!(
                        "[FETCH] duplicate ticket id at {relative}:{line_no}, disambiguating"
                    );
                    let path = format!("{}#{}", document.path, line_no + 1);
                    let mut replacement =
                        Document::new(source, path, std::mem::take(&mut document.content));
                    replacement.extra = std::mem::take(&mut document.extra);
                    document = replacement;
                    seen_paths.insert(document.path.clone());
                }
                documents.push(document);
            }
            return Ok(documents);
        }

        Ok(vec![Document::new(source, relative, content)])
    }
}

/// Turns one JSONL ticket record into a document. Subject and body become the
/// embeddable text; the remaining scalar fields ride along as chunk metadata.
fn ticket_document(source: &Source, path: &str, line_no: usize, line: &str) -> Option<Document> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let record = value.as_object()?;

    let ticket_id = record
        .get("id")
        .map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| (line_no + 1).to_string());

    let subject = record
        .get("subject")
        .or_else(|| record.get("title"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let body = record
        .get("body")
        .or_else(|| record.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if subject.is_empty() && body.is_empty() {
        return None;
    }

    let text = match (subject.is_empty(), body.is_empty()) {
        (false, false) => format!("{subject}\n\n{body}"),
        (false, true) => subject.to_string(),
        _ => body.to_string(),
    };

    let mut document = Document::new(source, format!("{path}#{ticket_id}"), text);
    for (key, val) in record {
        if matches!(key.as_str(), "subject" | "title" | "body" | "content") {
            continue;
        }
        if !val.is_object() && !val.is_array() {
            document.extra.insert(key.clone(), val.clone());
        }
    }
    Some(document)
}

/// Dataset version: digest over the sorted (id, content-hash) pairs.
fn dataset_marker(documents: &[Document]) -> String {
    let mut hasher = Sha256::new();
    for doc in documents {
        hasher.update(doc.id.as_bytes());
        hasher.update(b":");
        hasher.update(doc.content_hash.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl Fetcher for DatasetFetcher {
    async fn fetch(&self, source: &Source, _since: Option<&str>) -> Result<FetchResponse> {
        let dir = self.root.join(&source.name);
        if !dir.is_dir() {
            return Err(Error::SourceNotFound(format!(
                "dataset export missing at {}",
                dir.display()
            )));
        }

        let mut documents = Vec::new();
        for file in self.scan_export(&dir)? {
            documents.extend(self.read_documents(source, &dir, &file).await?);
        }
        documents.sort_by(|a, b| a.path.cmp(&b.path));

        let new_marker = dataset_marker(&documents);
        tracing::info!(
            "[FETCH] dataset {}: {} documents, version {}",
            source.name,
            documents.len(),
            &new_marker[..12]
        );

        // Full set every time; the orchestrator diffs by content hash.
        Ok(FetchResponse {
            documents,
            removed: None,
            new_marker,
        })
    }

    fn kind(&self) -> SourceKind {
        SourceKind::TicketDataset
    }
}
