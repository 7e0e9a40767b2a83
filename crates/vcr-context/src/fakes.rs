//! In-memory fakes for the context store (testing only)
//!
//! `MemoryContextStore` satisfies the `ContextStore` contract without any
//! external dependencies. `MemoryContextStore::failing` simulates a corrupt
//! store so callers can exercise their degradation path.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::store::{ContextNode, ContextStore, StorageResult};

/// In-memory context store backed by a `BTreeMap<node_id, node>`.
#[derive(Debug, Default)]
pub struct MemoryContextStore {
    nodes: Mutex<BTreeMap<String, ContextNode>>,
    failure: Option<String>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every read fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            nodes: Mutex::default(),
            failure: Some(reason.into()),
        }
    }

    /// Build a store from `(id, content)` pairs.
    pub fn with_nodes<I, K, V>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let store = Self::new();
        for (id, content) in nodes {
            store.insert(ContextNode::new(id, content));
        }
        store
    }

    pub fn insert(&self, node: ContextNode) {
        let mut nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        nodes.insert(node.node_id.clone(), node);
    }

    fn check(&self) -> StorageResult<()> {
        match &self.failure {
            Some(reason) => Err(StorageError::Query(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn lookup(&self, keys: &[String]) -> StorageResult<Vec<ContextNode>> {
        self.check()?;
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        Ok(nodes
            .values()
            .filter(|n| keys.contains(&n.node_id))
            .cloned()
            .collect())
    }

    async fn sample(&self, limit: usize) -> StorageResult<Vec<ContextNode>> {
        self.check()?;
        let nodes = self.nodes.lock().unwrap_or_else(|e| e.into_inner());
        Ok(nodes.values().take(limit).cloned().collect())
    }
}
