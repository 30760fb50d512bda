use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source unreachable: {0}")]
    SourceUnreachable(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Duplicate source: {0}")]
    DuplicateSource(String),

    #[error("Embedding service error: {0}")]
    Embedding(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// Transient failures are retried with bounded backoff at the call site
    /// that produced them; everything else aborts the current sync attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::SourceUnreachable(_) | Error::RateLimited { .. } | Error::StoreUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
