//! VCR Context: read-only creative context for the VCR agent
//!
//! The "Intelligence Tree" is a key→text store that other tools populate with
//! palettes, beats, moods and similar creative notes. The agent only ever reads
//! from it, and a missing or broken store must never stop a render pipeline.
//!
//! ## Layer 0 - Data
//!
//! ## Key Components
//!
//! - `ContextStore`: backend-agnostic lookup trait
//! - `SurrealContextStore`: embedded SurrealDB implementation (a directory)
//! - `SqliteContextStore`: the `brain.db` SQLite file other VCR tools write
//! - `fakes::MemoryContextStore`: in-memory implementation for tests

mod error;
pub mod fakes;
mod sqlite_store;
pub mod store;
mod surreal_store;

use std::path::Path;
use std::sync::Arc;

pub use error::StorageError;
pub use sqlite_store::SqliteContextStore;
pub use store::{ContextNode, ContextStore, StorageResult, DEFAULT_SAMPLE_LIMIT};
pub use surreal_store::SurrealContextStore;

/// Open whichever store lives at `path`.
///
/// A regular file is read as SQLite, a directory as an embedded SurrealDB
/// store. Returns `Ok(None)` when nothing exists at `path`.
pub async fn open_context_store(path: &Path) -> StorageResult<Option<Arc<dyn ContextStore>>> {
    if path.is_file() {
        let store = SqliteContextStore::open(path)?;
        return Ok(Some(Arc::new(store)));
    }
    let store = SurrealContextStore::open_if_exists(path).await?;
    Ok(store.map(|s| Arc::new(s) as Arc<dyn ContextStore>))
}
