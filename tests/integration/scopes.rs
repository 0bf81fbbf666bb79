//! Integration test: listings are filtered by the caller's scope.
//!
//! Resource names stay global, so a name taken in one scope is taken in
//! all of them.

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{Value, json};
use stratus_driver::FilesystemDriver;
use stratus_integration_tests::{Client, Emulator, Reply, sigv4};

async fn s3_as(aws: &Client, key: &str, method: &str, uri: &str) -> Reply {
    let auth = sigv4(key);
    aws.send(method, uri, &[("authorization", auth.as_str())], "")
        .await
}

async fn target_as(aws: &Client, key: &str, target: &str, body: Value) -> Reply {
    let auth = sigv4(key);
    aws.send(
        "POST",
        "/",
        &[
            ("x-amz-target", target),
            ("content-type", "application/x-amz-json-1.0"),
            ("authorization", auth.as_str()),
        ],
        body.to_string(),
    )
    .await
}

fn bucket_names(listing: &Reply) -> Vec<String> {
    let text = listing.text();
    text.split("<Name>")
        .skip(1)
        .filter_map(|rest| rest.split("</Name>").next())
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_s3_listing_per_access_key() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    s3_as(&aws, "AKIDALICE", "PUT", "/alice-data").await;
    s3_as(&aws, "AKIDALICE", "PUT", "/alice-logs").await;
    s3_as(&aws, "AKIDBOB", "PUT", "/bob-data").await;

    let alice = s3_as(&aws, "AKIDALICE", "GET", "/").await;
    assert_eq!(bucket_names(&alice), vec!["alice-data", "alice-logs"]);
    let bob = s3_as(&aws, "AKIDBOB", "GET", "/").await;
    assert_eq!(bucket_names(&bob), vec!["bob-data"]);
    let anonymous = aws.get("/").await;
    assert!(bucket_names(&anonymous).is_empty());

    // Names are global: Bob cannot take Alice's bucket name.
    let taken = s3_as(&aws, "AKIDBOB", "PUT", "/alice-data").await;
    assert_eq!(taken.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_dynamodb_and_sqs_listings_per_access_key() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    let table = |name: &str| {
        json!({
            "TableName": name,
            "KeySchema": [{ "AttributeName": "pk", "KeyType": "HASH" }],
            "AttributeDefinitions": [{ "AttributeName": "pk", "AttributeType": "S" }],
        })
    };
    target_as(&aws, "AKIDALICE", "DynamoDB_20120810.CreateTable", table("orders")).await;
    target_as(&aws, "AKIDBOB", "DynamoDB_20120810.CreateTable", table("users")).await;
    target_as(&aws, "AKIDBOB", "AmazonSQS.CreateQueue", json!({ "QueueName": "bob-q" })).await;

    let alice = target_as(&aws, "AKIDALICE", "DynamoDB_20120810.ListTables", json!({})).await;
    assert_eq!(alice.json()["TableNames"], json!(["orders"]));
    let bob = target_as(&aws, "AKIDBOB", "DynamoDB_20120810.ListTables", json!({})).await;
    assert_eq!(bob.json()["TableNames"], json!(["users"]));

    let alice_queues = target_as(&aws, "AKIDALICE", "AmazonSQS.ListQueues", json!({})).await;
    let urls = alice_queues.json()["QueueUrls"].clone();
    assert!(urls.is_null() || urls.as_array().is_some_and(Vec::is_empty));
    let bob_queues = target_as(&aws, "AKIDBOB", "AmazonSQS.ListQueues", json!({})).await;
    assert_eq!(bob_queues.json()["QueueUrls"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_gcp_project_is_the_scope() {
    let emu = Emulator::in_memory();
    let gcp = emu.gcp();
    gcp.json("POST", "/storage/v1/b?project=p1", json!({ "name": "p1-assets" }))
        .await;
    gcp.json("POST", "/storage/v1/b?project=p2", json!({ "name": "p2-assets" }))
        .await;

    let p1 = gcp.get("/storage/v1/b?project=p1").await.json();
    let names: Vec<&str> = p1["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|b| b["name"].as_str())
        .collect();
    assert_eq!(names, vec!["p1-assets"]);

    gcp.send(
        "PUT",
        "/v1/projects/p2/topics/events",
        &[("content-type", "application/json")],
        "{}",
    )
    .await;
    let p1_topics = gcp.get("/v1/projects/p1/topics").await.json();
    assert!(
        p1_topics["topics"]
            .as_array()
            .is_none_or(|topics| topics.is_empty())
    );
    let p2_topics = gcp.get("/v1/projects/p2/topics").await.json();
    assert_eq!(p2_topics["topics"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_oracle_namespace_is_the_scope() {
    let emu = Emulator::in_memory();
    let oracle = emu.oracle();
    oracle
        .json("POST", "/n/ns-one/b", json!({ "name": "one", "compartmentId": "c" }))
        .await;
    oracle
        .json("POST", "/n/ns-two/b", json!({ "name": "two", "compartmentId": "c" }))
        .await;

    let one = oracle.get("/n/ns-one/b").await.json();
    assert_eq!(one.as_array().unwrap().len(), 1);
    assert_eq!(one[0]["name"], "one");
    assert_eq!(one[0]["namespace"], "ns-one");
}

/// The same credential string names the same scope in every dialect.
#[tokio::test]
async fn test_scope_is_shared_across_dialects() {
    let emu = Emulator::in_memory();
    emu.gcp()
        .json("POST", "/storage/v1/b?project=acme", json!({ "name": "from-gcp" }))
        .await;
    emu.oracle()
        .json("POST", "/n/acme/b", json!({ "name": "from-oracle", "compartmentId": "acme" }))
        .await;
    s3_as(&emu.aws(), "acme", "PUT", "/from-aws").await;

    let listing = s3_as(&emu.aws(), "acme", "GET", "/").await;
    assert_eq!(
        bucket_names(&listing),
        vec!["from-aws", "from-gcp", "from-oracle"]
    );
}

/// With an identity backend, several access keys can share one scope.
#[tokio::test]
async fn test_identity_driver_maps_keys_to_a_shared_scope() {
    let dir = tempfile::tempdir().unwrap();
    let identity = dir.path().join("identity");
    std::fs::create_dir_all(&identity).unwrap();
    std::fs::write(identity.join("AKIDONE"), "team-a\n").unwrap();
    std::fs::write(identity.join("AKIDTWO"), "team-a\n").unwrap();

    let driver = Arc::new(FilesystemDriver::new(dir.path()).unwrap());
    let emu = Emulator::with_identity(driver.backend("fs"));
    let aws = emu.aws();
    s3_as(&aws, "AKIDONE", "PUT", "/team-bucket").await;
    s3_as(&aws, "AKIDSOLO", "PUT", "/solo-bucket").await;

    let two = s3_as(&aws, "AKIDTWO", "GET", "/").await;
    assert_eq!(bucket_names(&two), vec!["team-bucket"]);

    // Unknown keys fall back to a scope of their own.
    let solo = s3_as(&aws, "AKIDSOLO", "GET", "/").await;
    assert_eq!(bucket_names(&solo), vec!["solo-bucket"]);

    let services = emu.services();
    let team = services
        .objects()
        .list_buckets(&stratus_types::Scope::new("team-a"))
        .await
        .unwrap();
    assert_eq!(team.len(), 1);
}

#[tokio::test]
async fn test_foreign_bucket_is_denied() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    s3_as(&aws, "AKIDALICE", "PUT", "/alice-data").await;
    let alice = sigv4("AKIDALICE");
    aws.send(
        "PUT",
        "/alice-data/report.csv",
        &[("authorization", alice.as_str())],
        "a,b\n",
    )
    .await;

    let delete = s3_as(&aws, "AKIDBOB", "DELETE", "/alice-data").await;
    assert_eq!(delete.status, StatusCode::FORBIDDEN);
    assert_eq!(delete.xml("Code").as_deref(), Some("AccessDenied"));
    let read = s3_as(&aws, "AKIDBOB", "GET", "/alice-data/report.csv").await;
    assert_eq!(read.status, StatusCode::FORBIDDEN);
    let listing = s3_as(&aws, "AKIDBOB", "GET", "/alice-data?list-type=2").await;
    assert_eq!(listing.status, StatusCode::FORBIDDEN);

    let owned = s3_as(&aws, "AKIDALICE", "GET", "/").await;
    assert_eq!(bucket_names(&owned), vec!["alice-data"]);
    let own_read = s3_as(&aws, "AKIDALICE", "GET", "/alice-data/report.csv").await;
    assert_eq!(own_read.body, "a,b\n");
}

/// Oracle reports another namespace's bucket as missing.
#[tokio::test]
async fn test_oracle_hides_foreign_bucket() {
    let emu = Emulator::in_memory();
    let oracle = emu.oracle();
    oracle
        .json("POST", "/n/ns-one/b", json!({ "name": "one", "compartmentId": "c" }))
        .await;
    oracle.put("/n/ns-one/b/one/o/k", "v").await;

    let foreign = oracle.get("/n/ns-two/b/one/o/k").await;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);
    assert_eq!(foreign.json()["code"], "NotAuthorizedOrNotFound");
    assert_eq!(oracle.get("/n/ns-one/b/one/o/k").await.body, "v");
}
