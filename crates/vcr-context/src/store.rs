//! Storage trait for the context store
//!
//! Implementations must be deterministic: the same lookup against an
//! unmodified store always yields the same nodes in the same order. Both
//! operations order their results by `node_id`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Upper bound on nodes returned when the caller does not name any keys.
pub const DEFAULT_SAMPLE_LIMIT: usize = 20;

/// A single context entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextNode {
    /// Stable lookup key.
    pub node_id: String,
    /// Free-form text handed to the generator.
    pub content: String,
    /// Application that produced the node (e.g. a palette tool).
    #[serde(default)]
    pub source_app: Option<String>,
    /// Node category (`palette`, `beat`, ...).
    #[serde(default)]
    pub node_type: Option<String>,
}

impl ContextNode {
    pub fn new(node_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            content: content.into(),
            source_app: None,
            node_type: None,
        }
    }

    pub fn with_source(mut self, source_app: impl Into<String>, node_type: impl Into<String>) -> Self {
        self.source_app = Some(source_app.into());
        self.node_type = Some(node_type.into());
        self
    }
}

/// Read-only key→text context store.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Fetch exactly the nodes whose ids are in `keys`, ordered by id.
    ///
    /// Unknown keys are skipped, not reported.
    async fn lookup(&self, keys: &[String]) -> StorageResult<Vec<ContextNode>>;

    /// Fetch at most `limit` nodes, ordered by id.
    async fn sample(&self, limit: usize) -> StorageResult<Vec<ContextNode>>;
}
