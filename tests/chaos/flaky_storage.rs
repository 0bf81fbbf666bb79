//! Chaos test: slow and failing blob storage.
//!
//! Reads that hit a transient storage failure are retried a bounded number
//! of times; when storage stays down every dialect answers "unavailable"
//! and recovers once storage does.

use std::sync::Arc;

use axum::http::StatusCode;
use stratus_gateway::READ_ATTEMPTS;
use stratus_integration_tests::{Emulator, test_data_seeded};
use stratus_store::{MemoryStore, SlowStore};
use tokio::task::JoinSet;

fn slow_store(read_ms: (u64, u64), write_ms: (u64, u64)) -> Arc<SlowStore> {
    Arc::new(
        SlowStore::new(Arc::new(MemoryStore::new(u64::MAX)))
            .read_latency(read_ms.0, read_ms.1)
            .write_latency(write_ms.0, write_ms.1)
            .seed(42),
    )
}

#[tokio::test]
async fn test_concurrent_traffic_over_slow_storage() {
    let store = slow_store((1, 15), (1, 25));
    let emu = Emulator::with_blobs(store);
    let aws = emu.aws();
    aws.put("/slow", "").await;

    let mut writers = JoinSet::new();
    for i in 0..12u32 {
        let aws = aws.clone();
        writers.spawn(async move {
            let data = test_data_seeded(8 * 1024, i);
            let reply = aws.put(&format!("/slow/obj-{i}"), data).await;
            (i, reply.status)
        });
    }
    while let Some(result) = writers.join_next().await {
        let (i, status) = result.unwrap();
        assert_eq!(status, StatusCode::OK, "write {i} failed");
    }

    let mut readers = JoinSet::new();
    for round in 0..3u32 {
        for i in 0..12u32 {
            let aws = aws.clone();
            readers.spawn(async move {
                let reply = aws.get(&format!("/slow/obj-{i}")).await;
                assert_eq!(reply.status, StatusCode::OK, "round {round} read {i}");
                assert_eq!(reply.body, test_data_seeded(8 * 1024, i));
            });
        }
    }
    while let Some(result) = readers.join_next().await {
        result.unwrap();
    }
}

#[tokio::test]
async fn test_transient_read_failures_are_retried() {
    let store = slow_store((0, 0), (0, 0));
    let emu = Emulator::with_blobs(store.clone());
    emu.aws().put("/flaky", "").await;
    emu.aws().put("/flaky/k", "value").await;

    store.fail_next_reads(READ_ATTEMPTS - 1);
    let reply = emu.aws().get("/flaky/k").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "value");

    store.fail_next_reads(READ_ATTEMPTS - 1);
    let reply = emu.gcp().get("/storage/v1/b/flaky/o/k?alt=media").await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "value");
}

#[tokio::test]
async fn test_storage_outage_in_every_dialect() {
    let store = slow_store((0, 0), (0, 0));
    let emu = Emulator::with_blobs(store.clone());
    emu.aws().put("/down", "").await;
    emu.aws().put("/down/k", "value").await;

    store.fail_next_reads(u32::MAX);

    let s3 = emu.aws().get("/down/k").await;
    assert_eq!(s3.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(s3.xml("Code").as_deref(), Some("ServiceUnavailable"));

    let gcs = emu.gcp().get("/storage/v1/b/down/o/k?alt=media").await;
    assert_eq!(gcs.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(gcs.json()["error"]["status"], "UNAVAILABLE");

    let oci = emu.oracle().get("/n/default/b/down/o/k").await;
    assert_eq!(oci.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(oci.json()["code"], "ServiceUnavailable");

    // Metadata-only reads do not touch the blob store.
    assert_eq!(emu.aws().get("/down?list-type=2").await.status, StatusCode::OK);

    store.fail_next_reads(0);
    assert_eq!(emu.aws().get("/down/k").await.body, "value");
}

#[tokio::test]
async fn test_writes_proceed_while_reads_fail() {
    let store = slow_store((0, 0), (0, 5));
    let emu = Emulator::with_blobs(store.clone());
    emu.aws().put("/mixed", "").await;

    store.fail_next_reads(u32::MAX);
    let mut writers = JoinSet::new();
    for i in 0..8u32 {
        let aws = emu.aws();
        writers.spawn(async move {
            aws.put(&format!("/mixed/w{i}"), test_data_seeded(1024, i))
                .await
                .status
        });
    }
    while let Some(status) = writers.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }

    store.fail_next_reads(0);
    for i in 0..8u32 {
        let reply = emu.aws().get(&format!("/mixed/w{i}")).await;
        assert_eq!(reply.body, test_data_seeded(1024, i));
    }
}
