use crate::types::Document;
use std::collections::{HashMap, HashSet};

/// Outcome of comparing a fetch against the last committed hash snapshot.
#[derive(Debug, Default)]
pub struct DocumentChanges {
    /// Added or modified documents, owned so the pipeline can consume them.
    pub changed: Vec<Document>,
    /// Ids previously known but gone upstream.
    pub removed: Vec<String>,
    pub unchanged: usize,
}

impl DocumentChanges {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Computes the changed and removed document sets for one sync attempt.
///
/// `removed_hint` is the fetcher's server-side removal list when the source
/// could diff for us; without it, every previously known document absent from
/// the fetched set counts as removed. A document whose content hash matches
/// the prior snapshot is skipped entirely.
pub fn diff_documents(
    prior: &HashMap<String, String>,
    fetched: Vec<Document>,
    removed_hint: Option<Vec<String>>,
) -> DocumentChanges {
    let mut changes = DocumentChanges::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(fetched.len());

    for document in fetched {
        if prior.get(&document.id) == Some(&document.content_hash) {
            changes.unchanged += 1;
            seen.insert(document.id);
        } else {
            seen.insert(document.id.clone());
            changes.changed.push(document);
        }
    }

    changes.removed = match removed_hint {
        Some(ids) => ids,
        None => prior
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect(),
    };
    changes.removed.sort();

    changes
}
