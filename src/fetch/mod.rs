pub mod dataset;
pub mod github;

use crate::types::{Document, Source, SourceKind};
use crate::Result;
use async_trait::async_trait;

/// Result of pulling current content from a source.
///
/// `removed: Some(ids)` means the source diffed server-side: `documents`
/// holds only changed/added documents and `removed` lists the ids gone
/// upstream. `removed: None` means `documents` is the full current set and
/// change detection is left to the orchestrator's hash comparison.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub documents: Vec<Document>,
    pub removed: Option<Vec<String>>,
    pub new_marker: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieves current content for `source`, optionally diffed against a
    /// prior revision marker.
    async fn fetch(&self, source: &Source, since: Option<&str>) -> Result<FetchResponse>;

    fn kind(&self) -> SourceKind;
}

pub use dataset::DatasetFetcher;
pub use github::GithubFetcher;
