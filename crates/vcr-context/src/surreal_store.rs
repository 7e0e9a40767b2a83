//! SurrealDB-backed context store
//!
//! Opens the embedded `surrealkv` engine at the configured location. The
//! store is schemaless and read-only from the agent's point of view; seeding
//! is done by other tools (or by `insert_node` in tests).

use std::path::Path;

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::store::{ContextNode, ContextStore, StorageResult};

const NAMESPACE: &str = "vcr";
const DATABASE: &str = "brain";

/// SurrealDB connection handle for the context store
#[derive(Clone)]
pub struct SurrealContextStore {
    db: Surreal<Any>,
}

impl SurrealContextStore {
    /// Open the store at `path` if something exists there.
    ///
    /// Returns `Ok(None)` when the path does not exist, so callers can treat
    /// an absent store as "no context" rather than an error.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn open_if_exists(path: &Path) -> StorageResult<Option<Self>> {
        if !path.exists() {
            debug!("No context store at path");
            return Ok(None);
        }
        let url = format!("surrealkv://{}", path.display());
        Self::connect(&url).await.map(Some)
    }

    /// Connect to an in-memory store (used by seeding tools and tests).
    #[instrument(skip_all)]
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    async fn connect(url: &str) -> StorageResult<Self> {
        info!("Connecting to context store at {}", url);

        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(SurrealContextStore { db })
    }

    /// Insert a node.
    #[instrument(skip(self, node), fields(node_id = %node.node_id))]
    pub async fn insert_node(&self, node: &ContextNode) -> StorageResult<()> {
        self.db
            .query("CREATE context_nodes CONTENT $node")
            .bind(("node", node.clone()))
            .await?
            .check()?;
        Ok(())
    }
}

#[async_trait]
impl ContextStore for SurrealContextStore {
    #[instrument(skip(self), fields(count = keys.len()))]
    async fn lookup(&self, keys: &[String]) -> StorageResult<Vec<ContextNode>> {
        let mut result = self
            .db
            .query(
                "SELECT node_id, content, source_app, node_type FROM context_nodes \
                 WHERE node_id IN $keys ORDER BY node_id ASC",
            )
            .bind(("keys", keys.to_vec()))
            .await?;

        let nodes: Vec<ContextNode> = result.take(0)?;
        debug!(found = nodes.len(), "Context lookup complete");
        Ok(nodes)
    }

    #[instrument(skip(self))]
    async fn sample(&self, limit: usize) -> StorageResult<Vec<ContextNode>> {
        let mut result = self
            .db
            .query(
                "SELECT node_id, content, source_app, node_type FROM context_nodes \
                 ORDER BY node_id ASC LIMIT $limit",
            )
            .bind(("limit", limit as i64))
            .await?;

        let nodes: Vec<ContextNode> = result.take(0)?;
        Ok(nodes)
    }
}
