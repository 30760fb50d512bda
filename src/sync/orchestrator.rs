use super::diff::diff_documents;
use crate::chunker::Chunker;
use crate::embed::Embedder;
use crate::fetch::Fetcher;
use crate::registry::SourceRegistry;
use crate::retry::RetryPolicy;
use crate::store::EmbeddingStore;
use crate::types::{EmbeddingRecord, Source, SourceKind, SyncReport};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Phases of one sync attempt, in order. `Failed` is reachable from any
/// non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Fetching,
    Diffing,
    Embedding,
    Reconciling,
    Committed,
    Failed,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Diffing => "diffing",
            SyncPhase::Embedding => "embedding",
            SyncPhase::Reconciling => "reconciling",
            SyncPhase::Committed => "committed",
            SyncPhase::Failed => "failed",
        }
    }
}

/// Coordinates fetch → diff → chunk → embed → reconcile → commit per source.
///
/// Idempotent and resumable: a failed attempt leaves the source's marker and
/// hash snapshot untouched, so the next run retries the same changed set.
/// Within one attempt, deletes for a document always precede inserts for its
/// fresh records, so stale and fresh records never coexist.
pub struct SyncOrchestrator {
    registry: Arc<SourceRegistry>,
    fetchers: HashMap<SourceKind, Arc<dyn Fetcher>>,
    chunker: Chunker,
    embedder: Embedder,
    store: Arc<dyn EmbeddingStore>,
    retry: RetryPolicy,
    // Serializes concurrent syncs of the same source; different sources
    // share no mutable state and run freely.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SyncOrchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        chunker: Chunker,
        embedder: Embedder,
        store: Arc<dyn EmbeddingStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            fetchers: HashMap::new(),
            chunker,
            embedder,
            store,
            retry,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_fetcher(&mut self, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(fetcher.kind(), fetcher);
    }

    async fn source_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Syncs one source by registered name.
    pub async fn sync_source(&self, name: &str) -> Result<SyncReport> {
        let lock = self.source_lock(name).await;
        let _guard = lock.lock().await;

        let source = self
            .registry
            .get_by_name(name)?
            .ok_or_else(|| Error::SourceNotFound(format!("no registered source named '{name}'")))?;

        match self.run_sync(&source).await {
            Ok(report) => {
                info!(
                    source = name,
                    phase = SyncPhase::Committed.as_str(),
                    marker = %report.new_marker,
                    changed = report.changed,
                    removed = report.removed,
                    skipped = report.skipped,
                    "sync committed in {}ms",
                    report.duration_ms
                );
                Ok(report)
            }
            Err(err) => {
                warn!(
                    source = name,
                    phase = SyncPhase::Failed.as_str(),
                    "sync failed, marker untouched: {err}"
                );
                Err(err)
            }
        }
    }

    async fn run_sync(&self, source: &Source) -> Result<SyncReport> {
        let started = std::time::Instant::now();
        let fetcher = self.fetchers.get(&source.kind).ok_or_else(|| {
            Error::Config(format!(
                "no fetcher registered for {} sources",
                source.kind.as_str()
            ))
        })?;

        info!(
            source = %source.name,
            phase = SyncPhase::Fetching.as_str(),
            marker = ?source.last_marker,
            "fetching"
        );
        let since = source.last_marker.as_deref();
        let response = self.retry.run(|| fetcher.fetch(source, since)).await?;
        let documents_seen = response.documents.len();
        let from_full_set = response.removed.is_none();

        info!(source = %source.name, phase = SyncPhase::Diffing.as_str(), "diffing {documents_seen} documents");
        let prior = self.registry.document_hashes(&source.id)?;
        let fetched_hashes: HashMap<String, String> = response
            .documents
            .iter()
            .map(|d| (d.id.clone(), d.content_hash.clone()))
            .collect();
        let changes = diff_documents(&prior, response.documents, response.removed);

        // The snapshot to commit alongside the marker: the fresh full set for
        // case (b), or the prior state patched with this attempt's delta for
        // case (a) partial fetches.
        let snapshot = if from_full_set {
            fetched_hashes
        } else {
            let mut merged = prior;
            for id in &changes.removed {
                merged.remove(id);
            }
            merged.extend(fetched_hashes);
            merged
        };

        let changed_count = changes.changed.len();
        let removed_count = changes.removed.len();
        let skipped = changes.unchanged;

        if changes.is_empty() {
            // Nothing to reconcile; still advance the marker so the next
            // fetch can short-circuit.
            self.registry
                .commit(&source.id, &response.new_marker, &snapshot)?;
            return Ok(SyncReport {
                source: source.name.clone(),
                new_marker: response.new_marker,
                documents_seen,
                changed: 0,
                removed: 0,
                skipped,
                records_written: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                finished_at: Utc::now(),
            });
        }

        info!(
            source = %source.name,
            phase = SyncPhase::Embedding.as_str(),
            "embedding {changed_count} changed documents ({skipped} unchanged skipped)"
        );
        let label = source.qualified_name();
        let mut owners = Vec::new();
        let mut chunks = Vec::new();
        let mut touched: HashSet<String> = changes.removed.iter().cloned().collect();
        for document in &changes.changed {
            touched.insert(document.id.clone());
            for chunk in self.chunker.chunk(document, &label) {
                owners.push(document.id.clone());
                chunks.push(chunk);
            }
        }

        let embedded = self.embedder.embed_chunks(chunks).await?;
        let records: Vec<EmbeddingRecord> = owners
            .into_iter()
            .zip(embedded)
            .map(|(document_id, ec)| EmbeddingRecord {
                document_id,
                chunk_index: ec.chunk.metadata.chunk_index,
                content: ec.chunk.content,
                embedding: ec.embedding,
            })
            .collect();

        info!(
            source = %source.name,
            phase = SyncPhase::Reconciling.as_str(),
            "reconciling {} documents ({} records)",
            touched.len(),
            records.len()
        );
        // Delete-then-insert: a changed document may briefly have zero
        // records, but never stale-plus-fresh together.
        self.retry
            .run(|| self.store.delete_by_document_ids(&touched))
            .await?;
        self.retry.run(|| self.store.insert_many(&records)).await?;

        self.registry
            .commit(&source.id, &response.new_marker, &snapshot)?;

        Ok(SyncReport {
            source: source.name.clone(),
            new_marker: response.new_marker,
            documents_seen,
            changed: changed_count,
            removed: removed_count,
            skipped,
            records_written: records.len(),
            duration_ms: started.elapsed().as_millis() as u64,
            finished_at: Utc::now(),
        })
    }

    /// Syncs every registered source concurrently, one task per source. One
    /// source failing never aborts the others; each result is reported
    /// independently.
    pub async fn sync_all(self: &Arc<Self>) -> Result<Vec<(String, Result<SyncReport>)>> {
        let sources = self.registry.get()?;
        let mut tasks = Vec::with_capacity(sources.len());
        for source in sources {
            let orchestrator = Arc::clone(self);
            let name = source.name.clone();
            tasks.push((
                name.clone(),
                tokio::spawn(async move { orchestrator.sync_source(&name).await }),
            ));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (name, task) in tasks {
            results.push((name, task.await?));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::EmbeddingProvider;
    use crate::fetch::FetchResponse;
    use crate::types::{Document, SourceKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::tempdir;

    /// Replays a scripted sequence of fetch responses.
    struct ScriptedFetcher {
        responses: StdMutex<Vec<FetchResponse>>,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(responses: Vec<FetchResponse>) -> Self {
            Self {
                responses: StdMutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, source: &Source, _since: Option<&str>) -> Result<FetchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(Error::SourceUnreachable(format!(
                    "script exhausted for {}",
                    source.name
                )));
            }
            Ok(responses.remove(0))
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Repository
        }
    }

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 0.5]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn provider_name(&self) -> &str {
            "counting"
        }
    }

    /// In-memory store that counts delete and insert submissions.
    #[derive(Default)]
    struct MemoryStore {
        records: StdMutex<HashMap<(String, usize), EmbeddingRecord>>,
        delete_calls: AtomicUsize,
        insert_calls: AtomicUsize,
        deleted_ids: StdMutex<Vec<String>>,
    }

    impl MemoryStore {
        fn document_records(&self, document_id: &str) -> Vec<EmbeddingRecord> {
            let records = self.records.lock().unwrap();
            let mut matched: Vec<EmbeddingRecord> = records
                .values()
                .filter(|r| r.document_id == document_id)
                .cloned()
                .collect();
            matched.sort_by_key(|r| r.chunk_index);
            matched
        }
    }

    #[async_trait]
    impl EmbeddingStore for MemoryStore {
        async fn delete_by_document_ids(&self, ids: &HashSet<String>) -> Result<()> {
            if ids.is_empty() {
                return Ok(());
            }
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            let mut deleted = self.deleted_ids.lock().unwrap();
            deleted.extend(ids.iter().cloned());
            self.records
                .lock()
                .unwrap()
                .retain(|(doc_id, _), _| !ids.contains(doc_id));
            Ok(())
        }

        async fn insert_batch(&self, records: &[EmbeddingRecord]) -> Result<()> {
            self.insert_calls.fetch_add(1, Ordering::SeqCst);
            let mut stored = self.records.lock().unwrap();
            for record in records {
                stored.insert(
                    (record.document_id.clone(), record.chunk_index),
                    record.clone(),
                );
            }
            Ok(())
        }

        async fn count(&self) -> Result<usize> {
            Ok(self.records.lock().unwrap().len())
        }
    }

    struct Harness {
        orchestrator: SyncOrchestrator,
        store: Arc<MemoryStore>,
        provider: Arc<CountingProvider>,
        registry: Arc<SourceRegistry>,
        source: Source,
        _dir: tempfile::TempDir,
    }

    fn harness(responses: Vec<FetchResponse>, source: Source) -> Harness {
        let dir = tempdir().unwrap();
        let registry = Arc::new(SourceRegistry::open(&dir.path().join("registry")).unwrap());
        let source = registry.insert(source).unwrap();

        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let retry = RetryPolicy::new(1, Duration::from_millis(1));
        let embedder = Embedder::new(provider.clone(), 16, retry);

        let mut orchestrator = SyncOrchestrator::new(
            registry.clone(),
            Chunker::new(1000, 0),
            embedder,
            store.clone(),
            retry,
        );
        orchestrator.register_fetcher(Arc::new(ScriptedFetcher::new(responses)));

        Harness {
            orchestrator,
            store,
            provider,
            registry,
            source,
            _dir: dir,
        }
    }

    fn repo_source() -> Source {
        Source::new(SourceKind::Repository, "acme", "docs", "main")
    }

    fn full_set(source: &Source, marker: &str, docs: &[(&str, &str)]) -> FetchResponse {
        FetchResponse {
            documents: docs
                .iter()
                .map(|(path, content)| Document::new(source, *path, *content))
                .collect(),
            removed: None,
            new_marker: marker.to_string(),
        }
    }

    #[tokio::test]
    async fn cold_sync_embeds_everything_and_advances_the_marker() {
        let source = repo_source();
        let h = harness(
            vec![
                full_set(&source, "sha-1", &[("a.md", "hello world"), ("b.md", "goodbye")]),
                full_set(&source, "sha-1", &[("a.md", "hello world"), ("b.md", "goodbye")]),
            ],
            source.clone(),
        );

        let report = h.orchestrator.sync_source("docs").await.unwrap();
        assert_eq!(report.new_marker, "sha-1");
        assert_eq!(report.changed, 2);
        assert_eq!(report.removed, 0);
        assert_eq!(report.records_written, 2);
        assert_eq!(h.store.count().await.unwrap(), 2);

        let stored = h.registry.get_by_name("docs").unwrap().unwrap();
        assert_eq!(stored.last_marker.as_deref(), Some("sha-1"));

        // Second run with identical content: zero embed, delete and insert calls.
        let report = h.orchestrator.sync_source("docs").await.unwrap();
        assert_eq!(report.changed, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.records_written, 0);
        assert_eq!(h.store.delete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.insert_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn only_the_changed_document_is_reembedded() {
        let source = repo_source();
        let h = harness(
            vec![
                full_set(
                    &source,
                    "sha-1",
                    &[("a.md", "alpha"), ("b.md", "beta"), ("c.md", "gamma")],
                ),
                full_set(
                    &source,
                    "sha-2",
                    &[("a.md", "alpha"), ("b.md", "beta, edited"), ("c.md", "gamma")],
                ),
            ],
            source.clone(),
        );

        h.orchestrator.sync_source("docs").await.unwrap();
        let a_before = h.store.document_records("acme/docs:a.md");

        let report = h.orchestrator.sync_source("docs").await.unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(report.skipped, 2);

        // Only b.md was touched.
        let deleted = h.store.deleted_ids.lock().unwrap().clone();
        assert_eq!(deleted, vec!["acme/docs:b.md".to_string()]);
        assert_eq!(h.store.document_records("acme/docs:a.md"), a_before);
        assert_eq!(
            h.store.document_records("acme/docs:b.md")[0].content,
            "beta, edited"
        );
        assert_eq!(h.store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn removed_documents_lose_their_records() {
        let source = repo_source();
        let h = harness(
            vec![
                full_set(&source, "sha-1", &[("a.md", "alpha"), ("b.md", "beta")]),
                full_set(&source, "sha-2", &[("a.md", "alpha")]),
            ],
            source.clone(),
        );

        h.orchestrator.sync_source("docs").await.unwrap();
        assert_eq!(h.store.count().await.unwrap(), 2);

        let report = h.orchestrator.sync_source("docs").await.unwrap();
        assert_eq!(report.changed, 0);
        assert_eq!(report.removed, 1);
        assert_eq!(report.records_written, 0);
        assert!(h.store.document_records("acme/docs:b.md").is_empty());
        assert_eq!(h.store.count().await.unwrap(), 1);

        // The snapshot forgot b.md too: a re-appearance would re-embed it.
        let hashes = h.registry.document_hashes(&h.source.id).unwrap();
        assert!(!hashes.contains_key("acme/docs:b.md"));
    }

    #[tokio::test]
    async fn removal_hint_short_circuits_an_up_to_date_source() {
        let source = repo_source();
        let h = harness(
            vec![
                full_set(&source, "sha-1", &[("a.md", "alpha")]),
                // Case (a): head unchanged, fetcher reports nothing to do.
                FetchResponse {
                    documents: Vec::new(),
                    removed: Some(Vec::new()),
                    new_marker: "sha-1".to_string(),
                },
            ],
            source.clone(),
        );

        h.orchestrator.sync_source("docs").await.unwrap();
        let report = h.orchestrator.sync_source("docs").await.unwrap();

        assert_eq!(report.changed, 0);
        assert_eq!(report.records_written, 0);
        // The prior snapshot survives a partial (case a) response.
        let hashes = h.registry.document_hashes(&h.source.id).unwrap();
        assert!(hashes.contains_key("acme/docs:a.md"));
        assert_eq!(h.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_the_marker_untouched() {
        let source = repo_source();
        let h = harness(
            vec![full_set(&source, "sha-1", &[("a.md", "alpha")])],
            source.clone(),
        );

        h.orchestrator.sync_source("docs").await.unwrap();

        // Script exhausted: the fetch fails.
        let result = h.orchestrator.sync_source("docs").await;
        assert!(matches!(result, Err(Error::SourceUnreachable(_))));

        let stored = h.registry.get_by_name("docs").unwrap().unwrap();
        assert_eq!(stored.last_marker.as_deref(), Some("sha-1"));
        assert_eq!(h.store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn interrupted_reconciliation_is_repaired_by_the_next_run() {
        let source = repo_source();
        let h = harness(
            vec![
                full_set(&source, "sha-1", &[("a.md", "v1"), ("b.md", "beta")]),
                full_set(&source, "sha-2", &[("a.md", "v2"), ("b.md", "beta")]),
            ],
            source.clone(),
        );

        h.orchestrator.sync_source("docs").await.unwrap();

        // Simulate a crash mid-reconciliation of a failed second attempt:
        // a.md's records were deleted but the fresh ones never landed, and
        // the marker was not advanced.
        let ids: HashSet<String> = ["acme/docs:a.md".to_string()].into();
        h.store.delete_by_document_ids(&ids).await.unwrap();
        assert!(h.store.document_records("acme/docs:a.md").is_empty());

        // The re-run diffs against the last committed snapshot, so a.md is
        // still considered changed and gets re-embedded; b.md is skipped.
        let report = h.orchestrator.sync_source("docs").await.unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(report.skipped, 1);

        let a_records = h.store.document_records("acme/docs:a.md");
        assert_eq!(a_records.len(), 1);
        assert_eq!(a_records[0].content, "v2");
        assert_eq!(h.store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unregistered_source_fails_fast() {
        let h = harness(Vec::new(), repo_source());
        let result = h.orchestrator.sync_source("nope").await;
        assert!(matches!(result, Err(Error::SourceNotFound(_))));
    }

    #[tokio::test]
    async fn sources_without_a_fetcher_fail_with_a_config_error() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(SourceRegistry::open(&dir.path().join("registry")).unwrap());
        registry
            .insert(Source::new(SourceKind::TicketDataset, "local", "tickets", "v1"))
            .unwrap();

        let retry = RetryPolicy::new(1, Duration::from_millis(1));
        let embedder = Embedder::new(
            Arc::new(CountingProvider {
                calls: AtomicUsize::new(0),
            }),
            16,
            retry,
        );
        let orchestrator = SyncOrchestrator::new(
            registry,
            Chunker::new(1000, 0),
            embedder,
            Arc::new(MemoryStore::default()),
            retry,
        );

        let result = orchestrator.sync_source("tickets").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn sync_all_reports_each_source_independently() {
        let dir = tempdir().unwrap();
        let registry = Arc::new(SourceRegistry::open(&dir.path().join("registry")).unwrap());
        let good = registry
            .insert(Source::new(SourceKind::Repository, "acme", "docs", "main"))
            .unwrap();
        registry
            .insert(Source::new(SourceKind::Repository, "acme", "broken", "main"))
            .unwrap();

        let store = Arc::new(MemoryStore::default());
        let retry = RetryPolicy::new(1, Duration::from_millis(1));
        let embedder = Embedder::new(
            Arc::new(CountingProvider {
                calls: AtomicUsize::new(0),
            }),
            16,
            retry,
        );

        // One scripted response: "docs" wins it, "broken" hits script
        // exhaustion. Lock-step ordering does not matter for the assertion.
        let mut orchestrator = SyncOrchestrator::new(
            registry.clone(),
            Chunker::new(1000, 0),
            embedder,
            store.clone(),
            retry,
        );
        orchestrator.register_fetcher(Arc::new(ScriptedFetcher::new(vec![full_set(
            &good,
            "sha-1",
            &[("a.md", "alpha")],
        )])));
        let orchestrator = Arc::new(orchestrator);

        let results = orchestrator.sync_all().await.unwrap();
        assert_eq!(results.len(), 2);
        let ok_count = results.iter().filter(|(_, r)| r.is_ok()).count();
        let err_count = results.iter().filter(|(_, r)| r.is_err()).count();
        assert_eq!(ok_count, 1);
        assert_eq!(err_count, 1);
    }
}
