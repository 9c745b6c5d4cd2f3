//! Seams to the external collaborators the core consumes but does not own.
//!
//! Real implementations (BM25 index, tree-sitter outlines) live in the host
//! tooling; the router only needs these two calls.

use std::path::Path;

use focal_state::FileId;

/// Full-text relevance query over the repository index.
pub trait Indexer {
    /// Files relevant to `prompt` with a relevance score.  Scores need not
    /// be normalized; the router normalizes against the best hit.
    fn query(&self, prompt: &str) -> Vec<(FileId, f64)>;
}

/// Structural outline provider (function/class signatures) for Warm files.
pub trait RepoMap {
    /// `None` (or `Some("")`) when no outline is available; the router then
    /// falls back to the head of the file.
    fn outline(&self, file: &Path) -> Option<String>;
}
