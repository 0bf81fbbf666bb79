//! Integration test: state survives a restart of the emulator.

use axum::http::StatusCode;
use serde_json::json;
use stratus_integration_tests::{Emulator, test_data_seeded};
use stratus_meta::{MetaBatch, MetaStore};
use stratus_store::BlobStore;
use stratus_types::{ResourceId, ResourceKind, now_millis};

#[tokio::test]
async fn test_objects_items_and_messages_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let emu = Emulator::on_disk(dir.path()).await;
    let data = test_data_seeded(200_000, 3);

    let aws = emu.aws();
    aws.put("/durable", "").await;
    aws.send(
        "PUT",
        "/durable/data.bin",
        &[("x-amz-meta-origin", "before-restart")],
        data.clone(),
    )
    .await;
    aws.target(
        "DynamoDB_20120810.CreateTable",
        json!({
            "TableName": "users",
            "KeySchema": [{ "AttributeName": "id", "KeyType": "HASH" }],
            "AttributeDefinitions": [{ "AttributeName": "id", "AttributeType": "S" }],
        }),
    )
    .await;
    aws.target(
        "DynamoDB_20120810.PutItem",
        json!({ "TableName": "users", "Item": { "id": { "S": "u1" }, "name": { "S": "Ada" } } }),
    )
    .await;
    let url = aws
        .target("AmazonSQS.CreateQueue", json!({ "QueueName": "jobs" }))
        .await
        .json()["QueueUrl"]
        .as_str()
        .unwrap()
        .to_string();
    aws.target(
        "AmazonSQS.SendMessage",
        json!({ "QueueUrl": url, "MessageBody": "persist me" }),
    )
    .await;

    let emu = emu.restart().await;
    let aws = emu.aws();

    let object = aws.get("/durable/data.bin").await;
    assert_eq!(object.status, StatusCode::OK);
    assert_eq!(object.body, data);
    assert_eq!(object.header("x-amz-meta-origin"), Some("before-restart"));

    let item = aws
        .target(
            "DynamoDB_20120810.GetItem",
            json!({ "TableName": "users", "Key": { "id": { "S": "u1" } } }),
        )
        .await;
    assert_eq!(item.json()["Item"]["name"]["S"], "Ada");

    let received = aws
        .target(
            "AmazonSQS.ReceiveMessage",
            json!({ "QueueUrl": url, "MaxNumberOfMessages": 10 }),
        )
        .await
        .json();
    assert_eq!(received["Messages"][0]["Body"], "persist me");
}

#[tokio::test]
async fn test_deleted_bucket_stays_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let emu = Emulator::on_disk(dir.path()).await;
    emu.aws().put("/gone", "").await;
    emu.aws().put("/gone/a", "payload").await;
    assert_eq!(emu.aws().delete("/gone").await.status, StatusCode::NO_CONTENT);

    let emu = emu.restart().await;
    let reply = emu.aws().get("/gone/a").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.xml("Code").as_deref(), Some("NoSuchBucket"));
    assert_eq!(emu.engine().meta().list_tombstones().unwrap().len(), 1);
}

/// A cascade delete cut short after its purge mark was committed is
/// finished by recovery on the next start.
#[tokio::test]
async fn test_interrupted_cascade_is_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let emu = Emulator::on_disk(dir.path()).await;
    let aws = emu.aws();
    aws.put("/half", "").await;
    for i in 0..10 {
        aws.put(&format!("/half/obj-{i}"), test_data_seeded(4096, i)).await;
    }
    aws.put("/kept", "").await;
    aws.put("/kept/obj", "still here").await;
    emu.engine().flush().unwrap();
    drop(aws);
    drop(emu);

    // Commit only the first phase of a delete, as a crash would leave it.
    {
        let meta = MetaStore::open(dir.path().join("meta")).unwrap();
        let mut batch = MetaBatch::new();
        batch.put_purge_mark(&ResourceId::new(ResourceKind::Bucket, "half"), now_millis());
        meta.commit(batch).unwrap();
        meta.persist().unwrap();
    }

    let emu = Emulator::on_disk(dir.path()).await;
    let meta = emu.engine().meta();
    assert!(meta.list_purge_marks().unwrap().is_empty());
    assert_eq!(meta.list_tombstones().unwrap().len(), 1);

    let reply = emu.aws().get("/half/obj-0").await;
    assert_eq!(reply.xml("Code").as_deref(), Some("NoSuchBucket"));
    assert_eq!(emu.aws().get("/kept/obj").await.body, "still here");

    // Only the surviving bucket's payload is left on disk.
    let payloads = emu.engine().blob_store().list().await.unwrap();
    assert_eq!(payloads.len(), 1);
}

#[tokio::test]
async fn test_workload_records_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let emu = Emulator::on_disk(dir.path()).await;
    let launched = emu
        .aws()
        .form("Action=RunInstances&ImageId=ami-9&MaxCount=1")
        .await;
    let id = launched.xml("instanceId").unwrap();

    let emu = emu.restart().await;
    let record = emu
        .engine()
        .get(&ResourceId::new(ResourceKind::Workload, &id))
        .await
        .unwrap();
    assert_eq!(record.attributes.get("image").map(String::as_str), Some("ami-9"));
}
