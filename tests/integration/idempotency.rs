//! Integration test: client idempotency tokens in every dialect.
//!
//! Replaying a mutation with the same token returns the first reply byte
//! for byte and leaves exactly one resource behind.

use std::collections::HashSet;
use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;
use stratus_integration_tests::Emulator;
use stratus_store::{MemoryStore, SlowStore};
use tokio::task::JoinSet;

const COMPARTMENT: &str = "ocid1.compartment.oc1..demo";

#[tokio::test]
async fn test_ec2_client_token_replay() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    let body = "Action=RunInstances&ImageId=ami-1&MinCount=1&MaxCount=1&ClientToken=tok-1";

    let first = aws.form(body).await;
    assert_eq!(first.status, StatusCode::OK);
    for _ in 0..3 {
        let again = aws.form(body).await;
        assert_eq!(again.status, first.status);
        assert_eq!(again.body, first.body);
        assert_eq!(again.header("x-amz-request-id"), first.header("x-amz-request-id"));
    }

    let listing = aws.form("Action=DescribeInstances").await.text();
    assert_eq!(listing.matches("<instanceId>").count(), 1);

    // Without a token every call launches a new instance.
    aws.form("Action=RunInstances&ImageId=ami-1&MaxCount=1").await;
    let listing = aws.form("Action=DescribeInstances").await.text();
    assert_eq!(listing.matches("<instanceId>").count(), 2);
}

/// Retries racing each other with one token launch a single instance.
#[tokio::test]
async fn test_concurrent_retries_launch_once() {
    let blobs = SlowStore::new(Arc::new(MemoryStore::new(u64::MAX)))
        .write_latency(30, 40)
        .seed(11);
    let emu = Emulator::with_blobs(Arc::new(blobs));
    let aws = emu.aws();
    let body = "Action=RunInstances&ImageId=ami-1&MaxCount=1&ClientToken=race";

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let aws = aws.clone();
        tasks.spawn(async move { aws.form(body).await });
    }
    let mut bodies = HashSet::new();
    while let Some(reply) = tasks.join_next().await {
        let reply = reply.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        bodies.insert(reply.body);
    }
    assert_eq!(bodies.len(), 1);

    let listing = aws.form("Action=DescribeInstances").await.text();
    assert_eq!(listing.matches("<instanceId>").count(), 1);
}

#[tokio::test]
async fn test_concurrent_message_retries_send_once() {
    let emu = Emulator::in_memory();
    let oracle = emu.oracle();
    oracle
        .json(
            "POST",
            "/20210201/queues",
            json!({ "displayName": "burst", "compartmentId": COMPARTMENT }),
        )
        .await;

    let body = json!({ "messages": [{ "content": "exactly once" }] }).to_string();
    let mut tasks = JoinSet::new();
    for _ in 0..6 {
        let oracle = oracle.clone();
        let body = body.clone();
        tasks.spawn(async move {
            let headers = [
                ("content-type", "application/json"),
                ("opc-retry-token", "burst-1"),
            ];
            oracle
                .send("POST", "/20210201/queues/burst/messages", &headers, body)
                .await
                .status
        });
    }
    while let Some(status) = tasks.join_next().await {
        assert_eq!(status.unwrap(), StatusCode::OK);
    }

    let pulled = oracle.get("/20210201/queues/burst/messages?limit=10").await.json();
    assert_eq!(pulled["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_token_reused_for_another_action_conflicts() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    aws.form("Action=RunInstances&ImageId=ami-1&MaxCount=1&ClientToken=shared")
        .await;

    let reply = aws.form("Action=CreateVolume&Size=1&ClientToken=shared").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        reply.xml("Code").as_deref(),
        Some("IdempotentParameterMismatch")
    );
}

#[tokio::test]
async fn test_tokens_are_scoped_per_credential() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    let body = "Action=RunInstances&ImageId=ami-1&MaxCount=1&ClientToken=same";
    let form = [("content-type", "application/x-www-form-urlencoded")];

    let alice = stratus_integration_tests::sigv4("AKIDALICE");
    let bob = stratus_integration_tests::sigv4("AKIDBOB");
    let a = aws
        .send("POST", "/", &[form[0], ("authorization", alice.as_str())], body)
        .await;
    let b = aws
        .send("POST", "/", &[form[0], ("authorization", bob.as_str())], body)
        .await;
    assert_eq!(a.status, StatusCode::OK);
    assert_eq!(b.status, StatusCode::OK);
    assert_ne!(a.xml("instanceId"), b.xml("instanceId"));
}

#[tokio::test]
async fn test_oracle_retry_token_replay() {
    let emu = Emulator::in_memory();
    let oracle = emu.oracle();
    let headers = [
        ("content-type", "application/json"),
        ("opc-retry-token", "launch-7"),
    ];
    let body = json!({
        "compartmentId": COMPARTMENT,
        "availabilityDomain": "AD-1",
        "sourceDetails": { "sourceType": "image", "imageId": "ocid1.image.oc1..x" },
    })
    .to_string();

    let first = oracle
        .send("POST", "/20160918/instances", &headers, body.clone())
        .await;
    let second = oracle
        .send("POST", "/20160918/instances", &headers, body)
        .await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body, second.body);
    assert_eq!(first.header("opc-request-id"), second.header("opc-request-id"));

    let listing = oracle
        .get(&format!("/20160918/instances?compartmentId={COMPARTMENT}"))
        .await
        .json();
    assert_eq!(listing.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_oracle_message_send_replay() {
    let emu = Emulator::in_memory();
    let oracle = emu.oracle();
    oracle
        .json(
            "POST",
            "/20210201/queues",
            json!({ "displayName": "jobs", "compartmentId": COMPARTMENT }),
        )
        .await;

    let headers = [
        ("content-type", "application/json"),
        ("opc-retry-token", "msg-1"),
    ];
    let body = json!({ "messages": [{ "content": "once" }] }).to_string();
    for _ in 0..2 {
        let reply = oracle
            .send("POST", "/20210201/queues/jobs/messages", &headers, body.clone())
            .await;
        assert_eq!(reply.status, StatusCode::OK);
    }

    let pulled = oracle.get("/20210201/queues/jobs/messages?limit=10").await.json();
    let messages = pulled["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "once");
}

#[tokio::test]
async fn test_gcp_request_id_replay() {
    let emu = Emulator::in_memory();
    let gcp = emu.gcp();
    let uri = "/compute/v1/projects/demo/zones/us-central1-a/instances?requestId=req-1";
    let body = json!({ "name": "api-1", "sourceImage": "debian-12" });

    let first = gcp.json("POST", uri, body.clone()).await;
    let second = gcp.json("POST", uri, body.clone()).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body, second.body);

    // A fresh request id for the same name reaches the service and fails.
    let third = gcp
        .json(
            "POST",
            "/compute/v1/projects/demo/zones/us-central1-a/instances?requestId=req-2",
            body,
        )
        .await;
    assert_eq!(third.status, StatusCode::CONFLICT);
    assert_eq!(third.json()["error"]["status"], "ALREADY_EXISTS");

    let listing = gcp
        .get("/compute/v1/projects/demo/zones/us-central1-a/instances")
        .await
        .json();
    assert_eq!(listing["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_replay_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let emu = Emulator::on_disk(dir.path()).await;
    let body = "Action=CreateVolume&Size=2&AvailabilityZone=us-east-1a&ClientToken=vol-1";
    let first = emu.aws().form(body).await;
    assert_eq!(first.status, StatusCode::OK);

    let emu = emu.restart().await;
    let again = emu.aws().form(body).await;
    assert_eq!(again.body, first.body);
}
