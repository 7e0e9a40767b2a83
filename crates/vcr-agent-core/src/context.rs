//! Context retrieval for the generator prompt.
//!
//! Context is optional. A missing store yields an empty bundle and a broken
//! one yields a single diagnostic placeholder; neither stops the pipeline.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use vcr_context::{open_context_store, ContextStore, DEFAULT_SAMPLE_LIMIT};

/// Ordered context snippets, in retrieval order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextBundle {
    pub snippets: Vec<String>,
    /// Set when the store could not be read; the placeholder is in `snippets`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl ContextBundle {
    pub fn empty() -> Self {
        Self::default()
    }

    fn degraded(reason: String) -> Self {
        Self {
            snippets: vec![format!("(context store read failed: {reason})")],
            diagnostic: Some(reason),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    /// Snippets joined for the prompt.
    pub fn render(&self) -> String {
        self.snippets.join("\n")
    }
}

enum Source {
    Absent,
    Open(Arc<dyn ContextStore>),
    Broken(String),
}

/// Fetches context bundles from an optional store.
pub struct ContextRetriever {
    source: Source,
    sample_limit: usize,
}

impl ContextRetriever {
    /// No store: every fetch returns an empty bundle.
    pub fn absent() -> Self {
        Self {
            source: Source::Absent,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }

    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self {
            source: Source::Open(store),
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }

    /// Open the store at `path` if one exists.
    ///
    /// A `brain.db` file is read as SQLite and a directory as an embedded
    /// SurrealDB store. A store that exists but cannot be opened degrades every fetch to a
    /// diagnostic placeholder.
    pub async fn open(path: &Path) -> Self {
        match open_context_store(path).await {
            Ok(Some(store)) => Self::new(store),
            Ok(None) => {
                debug!(path = %path.display(), "No context store; continuing without context");
                Self::absent()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Context store unreadable");
                Self {
                    source: Source::Broken(e.to_string()),
                    sample_limit: DEFAULT_SAMPLE_LIMIT,
                }
            }
        }
    }

    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit;
        self
    }

    pub fn has_store(&self) -> bool {
        !matches!(self.source, Source::Absent)
    }

    /// Fetch context for `keys`, or a bounded sample when no keys are given.
    ///
    /// An explicitly empty key list is treated like no keys.
    pub async fn fetch(&self, keys: Option<&[String]>) -> ContextBundle {
        let store = match &self.source {
            Source::Absent => return ContextBundle::empty(),
            Source::Broken(reason) => return ContextBundle::degraded(reason.clone()),
            Source::Open(store) => store,
        };

        let result = match keys {
            Some(keys) if !keys.is_empty() => store.lookup(keys).await,
            _ => store.sample(self.sample_limit).await,
        };
        match result {
            Ok(nodes) => ContextBundle {
                snippets: nodes.into_iter().map(|n| n.content).collect(),
                diagnostic: None,
            },
            Err(e) => {
                warn!(error = %e, "Context read failed; continuing without context");
                ContextBundle::degraded(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcr_context::fakes::MemoryContextStore;

    fn seeded() -> Arc<MemoryContextStore> {
        Arc::new(MemoryContextStore::with_nodes((0..30).map(|i| {
            (format!("node-{i:02}"), format!("snippet {i}"))
        })))
    }

    #[tokio::test]
    async fn test_absent_store_is_empty() {
        let bundle = ContextRetriever::absent().fetch(None).await;
        assert!(bundle.is_empty());
        assert!(bundle.diagnostic.is_none());
    }

    #[tokio::test]
    async fn test_missing_path_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let retriever = ContextRetriever::open(&dir.path().join("brain.db")).await;
        assert!(!retriever.has_store());
        assert!(retriever.fetch(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_brain_db_file_feeds_snippets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brain.db");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TABLE context_nodes (id TEXT PRIMARY KEY, content TEXT);
                 INSERT INTO context_nodes VALUES ('node_0', 'palette: gold on black');",
            )
            .unwrap();

        let retriever = ContextRetriever::open(&path).await;
        assert!(retriever.has_store());
        let bundle = retriever.fetch(None).await;
        assert_eq!(bundle.snippets, vec!["palette: gold on black"]);
        assert!(bundle.diagnostic.is_none());
    }

    #[tokio::test]
    async fn test_default_sample_is_bounded() {
        let retriever = ContextRetriever::new(seeded());
        let bundle = retriever.fetch(None).await;
        assert_eq!(bundle.len(), DEFAULT_SAMPLE_LIMIT);

        let empty_keys: Vec<String> = Vec::new();
        assert_eq!(retriever.fetch(Some(&empty_keys)).await, bundle);
    }

    #[tokio::test]
    async fn test_keyed_lookup_is_deterministic() {
        let retriever = ContextRetriever::new(seeded());
        let keys = vec!["node-07".to_string(), "node-03".to_string(), "nope".to_string()];
        let first = retriever.fetch(Some(&keys)).await;
        let second = retriever.fetch(Some(&keys)).await;
        assert_eq!(first.snippets, vec!["snippet 3", "snippet 7"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_read_failure_degrades_to_placeholder() {
        let store = Arc::new(MemoryContextStore::failing("no such table: context_nodes"));
        let bundle = ContextRetriever::new(store).fetch(None).await;
        assert_eq!(bundle.len(), 1);
        assert!(bundle.snippets[0].starts_with("(context store read failed:"));
        assert!(bundle.diagnostic.unwrap().contains("context_nodes"));
    }
}
