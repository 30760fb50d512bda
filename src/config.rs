use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Storage paths
    pub storage: StorageConfig,

    /// Source access configuration
    pub sources: SourcesConfig,

    /// Chunking configuration
    pub chunking: ChunkingConfig,

    /// Sync batching and retry configuration
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAI,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub registry_db: PathBuf,
    pub store_db: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub github_api_base: String,
    pub github_token: Option<String>,
    /// Root directory holding local ticket-dataset exports, one subdirectory
    /// per registered dataset source.
    pub dataset_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub embed_batch_size: usize,
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig {
                provider: EmbeddingBackend::OpenAI,
                api_key: None,
                model: "text-embedding-3-small".to_string(),
                base_url: None,
            },
            storage: StorageConfig {
                data_dir: PathBuf::from("./data"),
                registry_db: PathBuf::from("./data/registry"),
                store_db: PathBuf::from("./data/embeddings"),
            },
            sources: SourcesConfig {
                github_api_base: "https://api.github.com".to_string(),
                github_token: None,
                dataset_root: PathBuf::from("./data/datasets"),
            },
            chunking: ChunkingConfig {
                max_chars: 1000,
                overlap: 200,
            },
            sync: SyncConfig {
                embed_batch_size: 16,
                max_retries: 5,
                initial_backoff_ms: 500,
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = Self::default();

        if let Ok(provider) = std::env::var("EMBEDDING_PROVIDER") {
            config.embedding.provider = match provider.to_lowercase().as_str() {
                "ollama" => EmbeddingBackend::Ollama,
                _ => EmbeddingBackend::OpenAI,
            };
        }

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            config.embedding.api_key = Some(api_key);
        }

        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }

        if let Ok(base_url) = std::env::var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = Some(base_url);
        }

        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            config.sources.github_token = Some(token);
        }

        if let Ok(api_base) = std::env::var("GITHUB_API_BASE") {
            config.sources.github_api_base = api_base;
        }

        // Storage configuration
        if let Ok(data_dir) = std::env::var("DATA_DIR") {
            let data_path = PathBuf::from(data_dir);
            config.storage.data_dir = data_path.clone();
            config.storage.registry_db = data_path.join("registry");
            config.storage.store_db = data_path.join("embeddings");
            config.sources.dataset_root = data_path.join("datasets");
        }

        if let Ok(size) = std::env::var("CHUNK_SIZE") {
            if let Ok(size) = size.parse() {
                config.chunking.max_chars = size;
            }
        }

        if let Ok(overlap) = std::env::var("CHUNK_OVERLAP") {
            if let Ok(overlap) = overlap.parse() {
                config.chunking.overlap = overlap;
            }
        }

        Ok(config)
    }
}
