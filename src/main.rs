use kb_sync::chunker::Chunker;
use kb_sync::config::EmbeddingBackend;
use kb_sync::embed::{Embedder, EmbeddingProvider, OllamaEmbedding, OpenAIEmbedding};
use kb_sync::fetch::{DatasetFetcher, GithubFetcher};
use kb_sync::registry::SourceRegistry;
use kb_sync::retry::RetryPolicy;
use kb_sync::store::SledEmbeddingStore;
use kb_sync::sync::SyncOrchestrator;
use kb_sync::types::{Source, SourceKind};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = kb_sync::Config::from_env()?;
    let registry = Arc::new(SourceRegistry::open(&config.storage.registry_db)?);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("add") => {
            let [kind, owner, name, reference] = &args[1..] else {
                return Err(usage().into());
            };
            let kind: SourceKind = kind
                .parse()
                .map_err(kb_sync::Error::Config)?;
            let source = registry.insert(Source::new(kind, owner, name, reference))?;
            println!("{}", serde_json::to_string_pretty(&source)?);
        }
        Some("list") => {
            println!("{}", serde_json::to_string_pretty(&registry.get()?)?);
        }
        Some("sync") => {
            let Some(name) = args.get(1) else {
                return Err(usage().into());
            };
            let orchestrator = build_orchestrator(&config, registry).await?;
            let report = orchestrator.sync_source(name).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Some("sync-all") => {
            let orchestrator = Arc::new(build_orchestrator(&config, registry).await?);
            let mut failures = 0usize;
            for (name, result) in orchestrator.sync_all().await? {
                match result {
                    Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                    Err(e) => {
                        failures += 1;
                        tracing::error!("sync of '{name}' failed: {e}");
                    }
                }
            }
            if failures > 0 {
                return Err(format!("{failures} source(s) failed to sync").into());
            }
        }
        _ => return Err(usage().into()),
    }

    Ok(())
}

fn usage() -> String {
    "usage: kb-sync add <repository|ticket-dataset> <owner> <name> <reference> \
     | sync <name> | sync-all | list"
        .to_string()
}

async fn build_orchestrator(
    config: &kb_sync::Config,
    registry: Arc<SourceRegistry>,
) -> Result<SyncOrchestrator, Box<dyn std::error::Error>> {
    let embedding: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
        EmbeddingBackend::OpenAI => {
            let api_key = config
                .embedding
                .api_key
                .clone()
                .ok_or_else(|| kb_sync::Error::Config("Missing OPENAI_API_KEY".to_string()))?;
            let mut openai = OpenAIEmbedding::new(
                api_key,
                Some(config.embedding.model.clone()),
                config.embedding.base_url.clone(),
            );

            if let Err(e) = openai.detect_dimension().await {
                tracing::warn!("Failed to detect dimension: {}. Model may not be available.", e);
                return Err(kb_sync::Error::Config(format!(
                    "Failed to initialize OpenAI with model '{}'. Please ensure the API is accessible.",
                    config.embedding.model
                ))
                .into());
            }

            tracing::info!(
                "OpenAI initialized with model '{}' (dimension: {})",
                config.embedding.model,
                openai.dimension()
            );

            Arc::new(openai)
        }
        EmbeddingBackend::Ollama => {
            let mut ollama = OllamaEmbedding::new(
                Some(
                    config
                        .embedding
                        .base_url
                        .clone()
                        .unwrap_or_else(|| "http://localhost:11434".to_string()),
                ),
                Some(config.embedding.model.clone()),
            );

            if let Err(e) = ollama.initialize().await {
                tracing::warn!("Failed to initialize Ollama: {}. Model may not be available.", e);
                return Err(kb_sync::Error::Config(format!(
                    "Failed to initialize Ollama with model '{}'. Please ensure Ollama is running and the model is pulled.",
                    config.embedding.model
                ))
                .into());
            }

            tracing::info!("Ollama initialized with model '{}'", config.embedding.model);

            Arc::new(ollama)
        }
    };
    tracing::info!("Embedding provider initialized: {}", embedding.provider_name());

    let store = Arc::new(SledEmbeddingStore::open(&config.storage.store_db)?);
    let retry = RetryPolicy::new(
        config.sync.max_retries,
        Duration::from_millis(config.sync.initial_backoff_ms),
    );
    let embedder = Embedder::new(embedding, config.sync.embed_batch_size, retry);
    let chunker = Chunker::new(config.chunking.max_chars, config.chunking.overlap);

    let mut orchestrator = SyncOrchestrator::new(registry, chunker, embedder, store, retry);
    orchestrator.register_fetcher(Arc::new(GithubFetcher::new(
        Some(config.sources.github_api_base.clone()),
        config.sources.github_token.clone(),
    )));
    orchestrator.register_fetcher(Arc::new(DatasetFetcher::new(
        config.sources.dataset_root.clone(),
    )));

    Ok(orchestrator)
}
