use crate::types::{Chunk, ChunkMetadata, Document};

/// Splits documents into bounded character windows with optional overlap.
///
/// Pure and deterministic: re-chunking identical content always yields the
/// same chunk list, which is what the unchanged-document skip relies on.
/// Window boundaries prefer newlines, then whitespace, in the back half of
/// the window, so chunks tend to end on line breaks.
pub struct Chunker {
    max_chars: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(max_chars: usize, overlap: usize) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            max_chars,
            // Overlap must leave room for forward progress.
            overlap: overlap.min(max_chars.saturating_sub(1)),
        }
    }

    /// Chunks a document, assigning `chunk_index` from 0 in document order.
    /// `source` is the provenance label stamped into each chunk's metadata;
    /// the document's extra metadata is passed through opaquely.
    pub fn chunk(&self, document: &Document, source: &str) -> Vec<Chunk> {
        self.split_windows(&document.content)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, content)| Chunk {
                content,
                metadata: ChunkMetadata {
                    path: document.path.clone(),
                    source: source.to_string(),
                    chunk_index,
                    extra: document.extra.clone(),
                },
            })
            .collect()
    }

    fn split_windows(&self, content: &str) -> Vec<String> {
        let chars: Vec<char> = content.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }
        if chars.len() <= self.max_chars {
            return vec![content.to_string()];
        }

        let mut windows = Vec::new();
        let mut start = 0usize;
        loop {
            let hard_end = (start + self.max_chars).min(chars.len());
            let end = if hard_end < chars.len() {
                self.cut_point(&chars, start, hard_end)
            } else {
                hard_end
            };
            windows.push(chars[start..end].iter().collect());
            if end >= chars.len() {
                break;
            }
            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }
        windows
    }

    /// Looks for a newline, then any whitespace, in the back half of the
    /// window; falls back to the hard limit when the text has no break.
    fn cut_point(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let floor = start + (hard_end - start) / 2;
        for i in (floor..hard_end).rev() {
            if chars[i] == '\n' {
                return i + 1;
            }
        }
        for i in (floor..hard_end).rev() {
            if chars[i].is_whitespace() {
                return i + 1;
            }
        }
        hard_end
    }
}
