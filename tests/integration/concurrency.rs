//! Integration test: concurrent clients against one emulator.

use std::collections::HashSet;

use axum::http::StatusCode;
use serde_json::json;
use stratus_integration_tests::{Emulator, test_data_seeded};
use tokio::task::JoinSet;

#[tokio::test]
async fn test_concurrent_sends_are_all_delivered() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    let url = aws
        .target("AmazonSQS.CreateQueue", json!({ "QueueName": "fanin" }))
        .await
        .json()["QueueUrl"]
        .as_str()
        .unwrap()
        .to_string();

    let mut tasks = JoinSet::new();
    for i in 0..32 {
        let aws = aws.clone();
        let url = url.clone();
        tasks.spawn(async move {
            aws.target(
                "AmazonSQS.SendMessage",
                json!({ "QueueUrl": url, "MessageBody": format!("msg-{i}") }),
            )
            .await
            .status
        });
    }
    while let Some(status) = tasks.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }

    let mut bodies = HashSet::new();
    loop {
        let reply = aws
            .target(
                "AmazonSQS.ReceiveMessage",
                json!({ "QueueUrl": url, "MaxNumberOfMessages": 10 }),
            )
            .await
            .json();
        let Some(batch) = reply["Messages"].as_array().filter(|m| !m.is_empty()) else {
            break;
        };
        for message in batch {
            bodies.insert(message["Body"].as_str().unwrap().to_string());
        }
    }
    assert_eq!(bodies.len(), 32);
}

#[tokio::test]
async fn test_concurrent_item_writes() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    aws.target(
        "DynamoDB_20120810.CreateTable",
        json!({
            "TableName": "events",
            "KeySchema": [{ "AttributeName": "id", "KeyType": "HASH" }],
            "AttributeDefinitions": [{ "AttributeName": "id", "AttributeType": "S" }],
        }),
    )
    .await;

    let mut tasks = JoinSet::new();
    for i in 0..40 {
        let aws = aws.clone();
        tasks.spawn(async move {
            aws.target(
                "DynamoDB_20120810.PutItem",
                json!({
                    "TableName": "events",
                    "Item": { "id": { "S": format!("e{i}") }, "seq": { "N": i.to_string() } },
                }),
            )
            .await
            .status
        });
    }
    while let Some(status) = tasks.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }

    let scan = aws
        .target("DynamoDB_20120810.Scan", json!({ "TableName": "events" }))
        .await
        .json();
    assert_eq!(scan["Count"], 40);
}

/// Racing creates of one name: exactly one wins.
#[tokio::test]
async fn test_racing_bucket_creates() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();

    let mut tasks = JoinSet::new();
    for _ in 0..16 {
        let aws = aws.clone();
        tasks.spawn(async move { aws.put("/contended", "").await.status });
    }
    let mut created = 0;
    while let Some(status) = tasks.join_next().await {
        match status.unwrap() {
            StatusCode::OK => created += 1,
            StatusCode::CONFLICT => {}
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(created, 1);
}

/// Last writer wins; a reader never sees a mix of two writes.
#[tokio::test]
async fn test_concurrent_overwrites_of_one_key() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    aws.put("/hot", "").await;

    let payloads: Vec<Vec<u8>> = (0..8).map(|i| test_data_seeded(32 * 1024, i)).collect();
    let mut tasks = JoinSet::new();
    for payload in payloads.clone() {
        let aws = aws.clone();
        tasks.spawn(async move { aws.put("/hot/key", payload).await.status });
    }
    for _ in 0..8 {
        let aws = aws.clone();
        let payloads = payloads.clone();
        tasks.spawn(async move {
            let reply = aws.get("/hot/key").await;
            if reply.status == StatusCode::OK {
                assert!(payloads.iter().any(|p| reply.body == *p));
            }
            StatusCode::OK
        });
    }
    while let Some(status) = tasks.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }

    let last = aws.get("/hot/key").await;
    assert!(payloads.iter().any(|p| last.body == *p));
    let listing = aws.get("/hot?list-type=2").await;
    assert_eq!(listing.xml("KeyCount").as_deref(), Some("1"));
}

#[tokio::test]
async fn test_dialects_share_state_under_load() {
    let emu = Emulator::in_memory();
    emu.aws().put("/mixed", "").await;

    let mut tasks = JoinSet::new();
    for i in 0..10 {
        let aws = emu.aws();
        tasks.spawn(async move { aws.put(&format!("/mixed/aws-{i}"), "a").await.status });
        let oracle = emu.oracle();
        tasks.spawn(async move {
            oracle
                .put(&format!("/n/default/b/mixed/o/oci-{i}"), "o")
                .await
                .status
        });
    }
    while let Some(status) = tasks.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }

    let listing = emu.gcp().get("/storage/v1/b/mixed/o").await.json();
    assert_eq!(listing["items"].as_array().unwrap().len(), 20);
}
