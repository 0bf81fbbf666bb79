//! Blob put/get/delete/list tests, including dedup and corruption.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use stratus_store::{BlobStore, MemoryStore};

use super::helpers::{
    TEST_MAX_BYTES, attrs, bucket, engine_with, flaky_engine, memory_engine, scope, test_data,
};
use crate::engine::{BlobDraft, EngineConfig};
use crate::error::EngineError;

#[tokio::test]
async fn test_put_get_blob_roundtrip() {
    let engine = memory_engine();
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();

    let mut meta = BTreeMap::new();
    meta.insert("content-type".to_string(), "text/plain".to_string());
    let stored = engine
        .put_blob(&id, BlobDraft::new("a.txt", "hello").with_metadata(meta.clone()))
        .await
        .unwrap();
    assert_eq!(stored.size, 5);

    let (blob, data) = engine.get_blob(&id, "a.txt").await.unwrap();
    assert_eq!(data, Bytes::from_static(b"hello"));
    assert_eq!(blob.metadata, meta);
    assert_eq!(blob, stored);
}

#[tokio::test]
async fn test_put_blob_bumps_parent_version() {
    let engine = memory_engine();
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();

    engine
        .put_blob(&id, BlobDraft::new("k", "v1"))
        .await
        .unwrap();
    engine
        .put_blob(&id, BlobDraft::new("k", "v2"))
        .await
        .unwrap();
    assert_eq!(engine.get(&id).await.unwrap().version, 3);

    let (_, data) = engine.get_blob(&id, "k").await.unwrap();
    assert_eq!(data, Bytes::from_static(b"v2"));
}

#[tokio::test]
async fn test_put_blob_with_updates_attributes_atomically() {
    let engine = memory_engine();
    let id = bucket("q");
    engine
        .create(&id, &scope(), attrs(&[("next_seq", "0")]), Vec::new())
        .await
        .unwrap();

    let (record, blob) = engine
        .put_blob_with(&id, |a| {
            let seq: u64 = a["next_seq"].parse().unwrap();
            a.insert("next_seq".into(), (seq + 1).to_string());
            BlobDraft::new(format!("{seq:020}"), "msg")
        })
        .await
        .unwrap();
    assert_eq!(record.attr("next_seq"), Some("1"));
    assert_eq!(blob.key, format!("{:020}", 0));
}

#[tokio::test]
async fn test_put_blob_without_parent_is_not_found() {
    let engine = memory_engine();
    let err = engine
        .put_blob(&bucket("ghost"), BlobDraft::new("k", "v"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn test_get_missing_blob() {
    let engine = memory_engine();
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();
    let err = engine.get_blob(&id, "missing").await.unwrap_err();
    assert!(matches!(err, EngineError::BlobNotFound { .. }));
}

#[tokio::test]
async fn test_identical_payloads_share_storage() {
    let store = Arc::new(MemoryStore::new(TEST_MAX_BYTES));
    let engine = engine_with(EngineConfig::default(), store.clone());
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();

    let data = test_data(4096);
    let a = engine
        .put_blob(&id, BlobDraft::new("a", data.clone()))
        .await
        .unwrap();
    let b = engine
        .put_blob(&id, BlobDraft::new("b", data.clone()))
        .await
        .unwrap();
    assert_eq!(a.storage_location, b.storage_location);
    assert_eq!(store.used_bytes(), 4096);
    assert_eq!(engine.meta().blob_refs(&a.storage_location).unwrap(), 2);

    // Dropping one reference keeps the payload alive.
    assert!(engine.delete_blob(&id, "a").await.unwrap());
    let (_, got) = engine.get_blob(&id, "b").await.unwrap();
    assert_eq!(got.as_ref(), data.as_slice());

    // Dropping the last one frees it.
    assert!(engine.delete_blob(&id, "b").await.unwrap());
    assert_eq!(store.used_bytes(), 0);
    assert_eq!(engine.meta().blob_refs(&a.storage_location).unwrap(), 0);
}

#[tokio::test]
async fn test_overwrite_releases_old_payload() {
    let store = Arc::new(MemoryStore::new(TEST_MAX_BYTES));
    let engine = engine_with(EngineConfig::default(), store.clone());
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();

    let old = engine
        .put_blob(&id, BlobDraft::new("k", "first"))
        .await
        .unwrap();
    engine
        .put_blob(&id, BlobDraft::new("k", "second!"))
        .await
        .unwrap();

    assert!(!store.contains(old.storage_location).await.unwrap());
    assert_eq!(store.used_bytes(), 7);
}

#[tokio::test]
async fn test_rewrite_same_content_keeps_payload() {
    let store = Arc::new(MemoryStore::new(TEST_MAX_BYTES));
    let engine = engine_with(EngineConfig::default(), store.clone());
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();

    let first = engine
        .put_blob(&id, BlobDraft::new("k", "same"))
        .await
        .unwrap();
    engine
        .put_blob(&id, BlobDraft::new("k", "same"))
        .await
        .unwrap();
    assert!(store.contains(first.storage_location).await.unwrap());
    assert_eq!(engine.meta().blob_refs(&first.storage_location).unwrap(), 1);
}

#[tokio::test]
async fn test_delete_missing_blob_returns_false() {
    let engine = memory_engine();
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();
    assert!(!engine.delete_blob(&id, "nothing").await.unwrap());
    // No mutation, no version bump.
    assert_eq!(engine.get(&id).await.unwrap().version, 1);
}

#[tokio::test]
async fn test_list_blobs_pages_reassemble() {
    let engine = memory_engine();
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();

    let mut expected = Vec::new();
    for i in 0..23 {
        let key = format!("dir/file-{i:03}");
        engine
            .put_blob(&id, BlobDraft::new(key.clone(), format!("body {i}")))
            .await
            .unwrap();
        expected.push(key);
    }
    engine
        .put_blob(&id, BlobDraft::new("other", "x"))
        .await
        .unwrap();

    let mut keys = Vec::new();
    let mut after: Option<String> = None;
    let mut pages = 0;
    loop {
        let page = engine
            .list_blobs(&id, "dir/", after.as_deref(), 5)
            .await
            .unwrap();
        pages += 1;
        keys.extend(page.items.iter().map(|b| b.key.clone()));
        if !page.truncated {
            break;
        }
        after = page.items.last().map(|b| b.key.clone());
    }
    assert_eq!(pages, 5);
    assert_eq!(keys, expected);
}

#[tokio::test]
async fn test_corrupt_payload_detected_on_read() {
    let store = Arc::new(MemoryStore::new(TEST_MAX_BYTES));
    let engine = engine_with(EngineConfig::default(), store.clone());
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();
    let blob = engine
        .put_blob(&id, BlobDraft::new("k", "pristine"))
        .await
        .unwrap();

    store.delete(blob.storage_location).await.unwrap();
    store
        .put(blob.storage_location, Bytes::from_static(b"tampered"))
        .await
        .unwrap();

    let err = engine.get_blob(&id, "k").await.unwrap_err();
    assert!(matches!(err, EngineError::CorruptBlob { .. }));
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_missing_payload_is_unavailable() {
    let store = Arc::new(MemoryStore::new(TEST_MAX_BYTES));
    let engine = engine_with(EngineConfig::default(), store.clone());
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();
    let blob = engine
        .put_blob(&id, BlobDraft::new("k", "gone soon"))
        .await
        .unwrap();
    store.delete(blob.storage_location).await.unwrap();

    let err = engine.get_blob(&id, "k").await.unwrap_err();
    assert!(matches!(err, EngineError::MissingPayload { .. }));
    assert!(err.is_unavailable());
}

/// A deduplicated write restores a payload lost from the store instead of
/// pointing another key at nothing.
#[tokio::test]
async fn test_dedup_write_restores_lost_payload() {
    let store = Arc::new(MemoryStore::new(TEST_MAX_BYTES));
    let engine = engine_with(EngineConfig::default(), store.clone());
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();
    let first = engine
        .put_blob(&id, BlobDraft::new("a", "same bytes"))
        .await
        .unwrap();
    store.delete(first.storage_location).await.unwrap();

    let second = engine
        .put_blob(&id, BlobDraft::new("b", "same bytes"))
        .await
        .unwrap();
    assert_eq!(second.storage_location, first.storage_location);
    assert_eq!(engine.meta().blob_refs(&first.storage_location).unwrap(), 2);
    assert_eq!(engine.get_blob(&id, "a").await.unwrap().1, "same bytes");
    assert_eq!(engine.get_blob(&id, "b").await.unwrap().1, "same bytes");
}

#[tokio::test]
async fn test_store_capacity_failure_leaves_no_index_entry() {
    let store = Arc::new(MemoryStore::new(8));
    let engine = engine_with(EngineConfig::default(), store.clone());
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), Vec::new())
        .await
        .unwrap();

    let err = engine
        .put_blob(&id, BlobDraft::new("big", test_data(64)))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
    assert!(matches!(
        engine.head_blob(&id, "big").await.unwrap_err(),
        EngineError::BlobNotFound { .. }
    ));
    assert_eq!(engine.get(&id).await.unwrap().version, 1);
}

#[tokio::test]
async fn test_failed_overwrite_keeps_previous_version() {
    let (engine, slow) = flaky_engine();
    let id = bucket("b1");
    engine
        .create(&id, &scope(), attrs(&[]), vec![BlobDraft::new("k", "old")])
        .await
        .unwrap();

    slow.fail_next_writes(1);
    let err = engine
        .put_blob(&id, BlobDraft::new("k", "new"))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());

    assert_eq!(engine.get_blob(&id, "k").await.unwrap().1, "old");
    assert_eq!(engine.get(&id).await.unwrap().version, 1);
    assert_eq!(engine.blob_store().list().await.unwrap().len(), 1);
}
