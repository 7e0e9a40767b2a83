//! Contract tests for ContextStore.
//!
//! Every implementation must return nodes ordered by id, skip unknown keys,
//! and honor the sample limit.

use vcr_context::fakes::MemoryContextStore;
use std::path::Path;

use vcr_context::{
    open_context_store, ContextNode, ContextStore, StorageError, SqliteContextStore,
    SurrealContextStore,
};

fn keys(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

async fn seeded_surreal() -> SurrealContextStore {
    let store = SurrealContextStore::in_memory().await.expect("mem store");
    for (id, content) in [
        ("node_2", "beat: 128 bpm, dark"),
        ("node_0", "palette: Rick Rubin Gold"),
        ("node_1", "mood: editorial"),
    ] {
        store
            .insert_node(&ContextNode::new(id, content).with_source("seed", "note"))
            .await
            .expect("insert");
    }
    store
}

// ===========================================================================
// MemoryContextStore
// ===========================================================================

#[tokio::test]
async fn memory_lookup_orders_by_id_and_skips_unknown() {
    let store = MemoryContextStore::with_nodes([("b", "second"), ("a", "first")]);
    let nodes = store.lookup(&keys(&["b", "missing", "a"])).await.unwrap();

    let ids: Vec<_> = nodes.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn memory_sample_is_bounded() {
    let store = MemoryContextStore::with_nodes((0..50).map(|i| (format!("n{i:02}"), "x")));
    let nodes = store.sample(20).await.unwrap();

    assert_eq!(nodes.len(), 20);
    assert_eq!(nodes[0].node_id, "n00");
}

#[tokio::test]
async fn memory_failing_store_reports_query_error() {
    let store = MemoryContextStore::failing("no such table: context_nodes");
    let err = store.sample(20).await.unwrap_err();

    assert!(matches!(err, StorageError::Query(_)));
    assert!(err.to_string().contains("no such table"));
}

// ===========================================================================
// SurrealContextStore
// ===========================================================================

#[tokio::test]
async fn surreal_lookup_returns_requested_nodes_in_id_order() {
    let store = seeded_surreal().await;
    let nodes = store.lookup(&keys(&["node_2", "node_0"])).await.unwrap();

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].node_id, "node_0");
    assert_eq!(nodes[1].content, "beat: 128 bpm, dark");
    assert_eq!(nodes[1].source_app.as_deref(), Some("seed"));
}

#[tokio::test]
async fn surreal_lookup_is_deterministic() {
    let store = seeded_surreal().await;
    let first = store.lookup(&keys(&["node_1", "node_0"])).await.unwrap();
    let second = store.lookup(&keys(&["node_1", "node_0"])).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn surreal_sample_respects_limit() {
    let store = seeded_surreal().await;
    let nodes = store.sample(2).await.unwrap();

    let ids: Vec<_> = nodes.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(ids, vec!["node_0", "node_1"]);
}

#[tokio::test]
async fn surreal_empty_store_samples_nothing() {
    let store = SurrealContextStore::in_memory().await.unwrap();
    let nodes = store.sample(20).await.unwrap();

    assert!(nodes.is_empty());
}

#[tokio::test]
async fn open_if_exists_returns_none_for_missing_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("brain.db");

    let store = SurrealContextStore::open_if_exists(&missing).await.unwrap();
    assert!(store.is_none());
}

// ===========================================================================
// SqliteContextStore
// ===========================================================================

/// Seed a `brain.db` with the table layout other VCR tools create.
fn seeded_sqlite(path: &Path) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE context_nodes (
             id TEXT PRIMARY KEY,
             profile_id TEXT,
             source_app TEXT,
             node_type TEXT,
             content TEXT NOT NULL
         );
         INSERT INTO context_nodes (id, profile_id, source_app, node_type, content) VALUES
             ('node_1', 'default', 'smuit cairn', 'beat', '{\"bpm\": 128, \"mood\": \"dark\"}'),
             ('node_0', 'default', 'ColorWizard', 'palette', '{\"name\": \"Rick Rubin Gold\"}');",
    )
    .unwrap();
}

#[tokio::test]
async fn sqlite_file_is_opened_as_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brain.db");
    seeded_sqlite(&path);

    let store = open_context_store(&path).await.unwrap().expect("store");
    let nodes = store.sample(20).await.unwrap();

    let ids: Vec<_> = nodes.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(ids, vec!["node_0", "node_1"]);
    assert!(nodes[0].content.contains("Rick Rubin Gold"));
}

#[tokio::test]
async fn sqlite_lookup_returns_requested_nodes_in_id_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brain.db");
    seeded_sqlite(&path);

    let store = SqliteContextStore::open(&path).unwrap();
    let nodes = store
        .lookup(&keys(&["node_1", "missing", "node_0"]))
        .await
        .unwrap();

    let ids: Vec<_> = nodes.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(ids, vec!["node_0", "node_1"]);
    assert_eq!(store.lookup(&keys(&["node_1"])).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sqlite_minimal_layout_and_limit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brain.db");
    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE context_nodes (id TEXT, content TEXT);")
        .unwrap();
    for i in 0..30 {
        conn.execute(
            "INSERT INTO context_nodes (id, content) VALUES (?1, ?2)",
            (format!("n{i:02}"), format!("note {i}")),
        )
        .unwrap();
    }
    drop(conn);

    let store = open_context_store(&path).await.unwrap().expect("store");
    let nodes = store.sample(20).await.unwrap();
    assert_eq!(nodes.len(), 20);
    assert_eq!(nodes[19].node_id, "n19");
}

#[tokio::test]
async fn non_database_file_fails_on_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("brain.db");
    std::fs::write(&path, "this is not a database, just some text padding it out").unwrap();

    let store = open_context_store(&path).await.unwrap().expect("store");
    let err = store.sample(20).await.unwrap_err();
    assert!(matches!(err, StorageError::Query(_)));
}

#[tokio::test]
async fn open_context_store_returns_none_for_missing_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_context_store(&dir.path().join("brain.db")).await.unwrap();
    assert!(store.is_none());
}
