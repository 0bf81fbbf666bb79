//! Persistence across restarts and storage-failure reporting.

use std::sync::Arc;

use bytes::Bytes;
use stratus_meta::MetaStore;
use stratus_store::FileStore;
use tempfile::TempDir;

use super::helpers::{attrs, bucket, flaky_engine, scope};
use crate::engine::{BlobDraft, EngineConfig, StorageEngine};
use crate::error::EngineError;

fn open_engine(dir: &TempDir) -> StorageEngine {
    let meta = Arc::new(MetaStore::open(dir.path().join("meta")).unwrap());
    let blobs = Arc::new(FileStore::new(dir.path().join("blobs")).unwrap());
    StorageEngine::new(EngineConfig::default(), meta, blobs)
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let id = bucket("durable");
    {
        let engine = open_engine(&dir);
        engine
            .create(&id, &scope(), attrs(&[("k", "v")]), Vec::new())
            .await
            .unwrap();
        engine
            .put_blob(&id, BlobDraft::new("a.txt", "hello"))
            .await
            .unwrap();
        engine.flush().unwrap();
    }

    let engine = open_engine(&dir);
    assert_eq!(engine.recover().await.unwrap(), 0);
    let record = engine.get(&id).await.unwrap();
    assert_eq!(record.version, 2);
    assert_eq!(record.attr("k"), Some("v"));
    let (_, data) = engine.get_blob(&id, "a.txt").await.unwrap();
    assert_eq!(data, Bytes::from_static(b"hello"));
}

#[tokio::test]
async fn test_transient_read_failure_is_unavailable() {
    let (engine, slow) = flaky_engine();
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), vec![BlobDraft::new("k", "v")])
        .await
        .unwrap();

    slow.fail_next_reads(1);
    let err = engine.get_blob(&id, "k").await.unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    assert!(err.is_unavailable());

    let (_, data) = engine.get_blob(&id, "k").await.unwrap();
    assert_eq!(data, Bytes::from_static(b"v"));
}

#[tokio::test]
async fn test_create_with_initial_blobs_is_atomic() {
    let (engine, _slow) = flaky_engine();
    let id = bucket("seeded");
    let record = engine
        .create(
            &id,
            &scope(),
            attrs(&[]),
            vec![
                BlobDraft::new("one", "1"),
                BlobDraft::new("two", "2"),
                BlobDraft::new("dup", "1"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(record.version, 1);

    let page = engine.list_blobs(&id, "", None, 10).await.unwrap();
    let keys: Vec<_> = page.items.iter().map(|b| b.key.as_str()).collect();
    assert_eq!(keys, vec!["dup", "one", "two"]);
    assert_eq!(page.items[0].storage_location, page.items[1].storage_location);
    assert_eq!(
        engine
            .meta()
            .blob_refs(&page.items[0].storage_location)
            .unwrap(),
        2
    );
}
