//! SQLite-backed context store
//!
//! Reads the `brain.db` file other VCR tools write: a `context_nodes` table
//! with at least `id` and `content` columns. The file is opened read-only;
//! the agent never writes to it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::store::{ContextNode, ContextStore, StorageResult};

/// Read-only handle on a `brain.db` SQLite file
#[derive(Clone)]
pub struct SqliteContextStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteContextStore {
    /// Open the database file at `path` read-only.
    ///
    /// Opening is lazy in SQLite: a file that is not a database is only
    /// reported by the first query.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> StorageResult<Self> {
        info!("Opening SQLite context store");
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            StorageError::Connection(format!("Failed to open {}: {}", path.display(), e))
        })?;

        Ok(SqliteContextStore {
            path: path.to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `query` on the blocking pool with the connection locked.
    async fn with_conn<F>(&self, query: F) -> StorageResult<Vec<ContextNode>>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<Vec<ContextNode>> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            query(&conn)
        })
        .await
        .map_err(|e| StorageError::Query(format!("context read task failed: {e}")))?
        .map_err(StorageError::from)
    }
}

fn read_nodes(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<ContextNode>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok(ContextNode::new(
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
        ))
    })?;
    rows.collect()
}

#[async_trait]
impl ContextStore for SqliteContextStore {
    #[instrument(skip(self), fields(count = keys.len()))]
    async fn lookup(&self, keys: &[String]) -> StorageResult<Vec<ContextNode>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; keys.len()].join(",");
        let sql = format!(
            "SELECT id, content FROM context_nodes WHERE id IN ({placeholders}) ORDER BY id ASC"
        );
        let keys = keys.to_vec();

        let nodes = self
            .with_conn(move |conn| read_nodes(conn, &sql, params_from_iter(keys.iter())))
            .await?;
        debug!(found = nodes.len(), "Context lookup complete");
        Ok(nodes)
    }

    #[instrument(skip(self))]
    async fn sample(&self, limit: usize) -> StorageResult<Vec<ContextNode>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            read_nodes(
                conn,
                "SELECT id, content FROM context_nodes ORDER BY id ASC LIMIT ?1",
                [limit],
            )
        })
        .await
    }
}
