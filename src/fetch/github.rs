//! GitHub repository fetcher

use super::{FetchResponse, Fetcher};
use crate::types::{Document, Source, SourceKind};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

const DOC_EXTENSIONS: &[&str] = &[".md", ".markdown", ".mdx", ".rst", ".txt"];

pub struct GithubFetcher {
    client: Client,
    api_base: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GithubFetcher {
    pub fn new(api_base: Option<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.unwrap_or_else(|| "https://api.github.com".to_string()),
            token,
        }
    }

    async fn get(&self, source: &Source, url: &str, accept: &str) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .get(url)
            .header("User-Agent", "kb-sync")
            .header("Accept", accept);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::SourceUnreachable(format!("{}: {e}", source.qualified_name())))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::SourceNotFound(format!(
                "{}@{} not found on GitHub",
                source.qualified_name(),
                source.reference
            )));
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::SourceUnreachable(format!(
            "{}: GitHub API error {status}: {body}",
            source.qualified_name()
        )))
    }

    async fn head_sha(&self, source: &Source) -> Result<String> {
        let url = format!(
            "{}/repos/{}/{}/commits/{}",
            self.api_base, source.owner, source.name, source.reference
        );
        let response = self.get(source, &url, "application/vnd.github+json").await?;
        let commit: CommitResponse = response
            .json()
            .await
            .map_err(|e| Error::SourceUnreachable(format!("malformed commit response: {e}")))?;
        Ok(commit.sha)
    }

    async fn list_document_paths(&self, source: &Source, sha: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.api_base, source.owner, source.name, sha
        );
        let response = self.get(source, &url, "application/vnd.github+json").await?;
        let tree: TreeResponse = response
            .json()
            .await
            .map_err(|e| Error::SourceUnreachable(format!("malformed tree response: {e}")))?;
        document_paths(source, tree)
    }

    async fn fetch_document(&self, source: &Source, sha: &str, path: &str) -> Result<Document> {
        let url = format!(
            "{}/repos/{}/{}/contents/{}?ref={}",
            self.api_base, source.owner, source.name, path, sha
        );
        let response = self.get(source, &url, "application/vnd.github.raw").await?;
        let content = response
            .text()
            .await
            .map_err(|e| Error::SourceUnreachable(format!("failed to read {path}: {e}")))?;
        Ok(Document::new(source, path, content))
    }
}

fn is_documentation_path(path: &str) -> bool {
    DOC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// A truncated listing omits an unknown tail of the repository; syncing it as
/// the full set would mark every unlisted document as removed. Fail the
/// attempt instead and leave the marker and store untouched.
fn document_paths(source: &Source, tree: TreeResponse) -> Result<Vec<String>> {
    if tree.truncated {
        return Err(Error::SourceUnreachable(format!(
            "{}: GitHub truncated the tree listing, refusing to sync a partial set",
            source.qualified_name()
        )));
    }

    let mut paths: Vec<String> = tree
        .tree
        .into_iter()
        .filter(|entry| entry.kind == "blob" && is_documentation_path(&entry.path))
        .map(|entry| entry.path)
        .collect();
    paths.sort();
    Ok(paths)
}

#[async_trait]
impl Fetcher for GithubFetcher {
    async fn fetch(&self, source: &Source, since: Option<&str>) -> Result<FetchResponse> {
        let head = self.head_sha(source).await?;

        // Head unchanged since the last committed sync: nothing to diff.
        if since == Some(head.as_str()) {
            return Ok(FetchResponse {
                documents: Vec::new(),
                removed: Some(Vec::new()),
                new_marker: head,
            });
        }

        let paths = self.list_document_paths(source, &head).await?;
        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            documents.push(self.fetch_document(source, &head, &path).await?);
        }

        tracing::info!(
            "[FETCH] {}@{}: {} documents at {}",
            source.qualified_name(),
            source.reference,
            documents.len(),
            head
        );

        Ok(FetchResponse {
            documents,
            removed: None,
            new_marker: head,
        })
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Repository
    }
}
