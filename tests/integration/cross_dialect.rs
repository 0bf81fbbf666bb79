//! Integration test: the same scenarios through every provider family.
//!
//! All three listeners share one engine, so state written through one
//! dialect is visible through the others.

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;
use stratus_driver::ComputeDriver;
use stratus_integration_tests::{Client, Emulator, test_data_seeded};
use stratus_store::MemoryStore;
use stratus_types::Dialect;

/// Bucket `b1`, object `a.txt` = `hello`: get returns `hello` and the
/// listing includes `a.txt`, in each dialect.
#[tokio::test]
async fn test_bucket_object_scenario_in_every_dialect() {
    // AWS
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    assert_eq!(aws.put("/b1", "").await.status, StatusCode::OK);
    assert_eq!(aws.put("/b1/a.txt", "hello").await.status, StatusCode::OK);
    assert_eq!(aws.get("/b1/a.txt").await.body, "hello");
    assert_eq!(aws.get("/b1?list-type=2").await.xml("Key").as_deref(), Some("a.txt"));

    // GCP
    let emu = Emulator::in_memory();
    let gcp = emu.gcp();
    gcp.json("POST", "/storage/v1/b?project=demo", json!({ "name": "b1" }))
        .await;
    let reply = gcp
        .send(
            "POST",
            "/upload/storage/v1/b/b1/o?uploadType=media&name=a.txt",
            &[("content-type", "text/plain")],
            "hello",
        )
        .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(gcp.get("/storage/v1/b/b1/o/a.txt?alt=media").await.body, "hello");
    let listing = gcp.get("/storage/v1/b/b1/o").await.json();
    assert_eq!(listing["items"][0]["name"], "a.txt");

    // Oracle
    let emu = Emulator::in_memory();
    let oracle = emu.oracle();
    oracle
        .json(
            "POST",
            "/n/demo/b",
            json!({ "name": "b1", "compartmentId": "ocid1.compartment.oc1..demo" }),
        )
        .await;
    assert_eq!(
        oracle.put("/n/demo/b/b1/o/a.txt", "hello").await.status,
        StatusCode::OK
    );
    assert_eq!(oracle.get("/n/demo/b/b1/o/a.txt").await.body, "hello");
    let listing = oracle.get("/n/demo/b/b1/o").await.json();
    assert_eq!(listing["objects"][0]["name"], "a.txt");
}

#[tokio::test]
async fn test_object_written_through_s3_is_visible_everywhere() {
    let emu = Emulator::in_memory();
    let data = test_data_seeded(64 * 1024, 7);
    emu.aws().put("/shared", "").await;
    emu.aws().put("/shared/blob.bin", data.clone()).await;

    let via_gcp = emu.gcp().get("/storage/v1/b/shared/o/blob.bin?alt=media").await;
    assert_eq!(via_gcp.body, data);

    let via_oracle = emu.oracle().get("/n/default/b/shared/o/blob.bin").await;
    assert_eq!(via_oracle.body, data);
    assert_eq!(via_oracle.header("content-length"), Some("65536"));
}

#[tokio::test]
async fn test_bucket_delete_removes_blobs() {
    let store = Arc::new(MemoryStore::new(u64::MAX));
    let emu = Emulator::with_blobs(store.clone());
    let aws = emu.aws();
    aws.put("/doomed", "").await;
    for i in 0..5 {
        aws.put(&format!("/doomed/k{i}"), test_data_seeded(1000, i)).await;
    }
    assert!(store.used_bytes() > 0);

    assert_eq!(aws.delete("/doomed").await.status, StatusCode::NO_CONTENT);
    assert_eq!(store.used_bytes(), 0);

    let reply = aws.get("/doomed/k0").await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.xml("Code").as_deref(), Some("NoSuchBucket"));

    // The name is free again.
    assert_eq!(aws.put("/doomed", "").await.status, StatusCode::OK);
}

/// Known product code → one item with a non-negative price; unknown → not found.
#[tokio::test]
async fn test_price_lookup_in_every_dialect() {
    let emu = Emulator::in_memory();

    let aws = emu.aws();
    let lookup = |sku: &'static str| {
        let aws = aws.clone();
        async move {
            aws.send(
                "POST",
                "/",
                &[
                    ("x-amz-target", "AWSPriceListService.GetProducts"),
                    ("content-type", "application/x-amz-json-1.1"),
                ],
                json!({
                    "ServiceCode": "AmazonEC2",
                    "Filters": [{ "Type": "TERM_MATCH", "Field": "sku", "Value": sku }],
                })
                .to_string(),
            )
            .await
        }
    };
    let reply = lookup("ABC-123").await;
    assert_eq!(reply.status, StatusCode::OK);
    let prices = reply.json()["PriceList"].as_array().unwrap().clone();
    assert_eq!(prices.len(), 1);
    let reply = lookup("NOPE-000").await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.json()["__type"].as_str().unwrap().ends_with("NotFoundException"));

    let gcp = emu.gcp();
    let sku = gcp
        .get("/v1/services/6F81-5844-456A/skus/2E27-4F75-95CD")
        .await
        .json();
    assert_eq!(sku["skuId"], "2E27-4F75-95CD");
    let rate = &sku["pricingInfo"][0]["pricingExpression"]["tieredRates"][0]["unitPrice"];
    assert!(rate["nanos"].as_i64().unwrap() >= 0);
    let missing = gcp.get("/v1/services/6F81-5844-456A/skus/0000-0000-0000").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let oracle = emu.oracle();
    let reply = oracle.get("/metering/api/v1/prices?partNumber=B88298").await;
    let items = reply.json()["items"].as_array().unwrap().clone();
    assert_eq!(items.len(), 1);
    let value = items[0]["currencyCodeLocalizations"][0]["prices"][0]["value"]
        .as_f64()
        .unwrap();
    assert!(value >= 0.0);
    let missing = oracle.get("/metering/api/v1/prices?partNumber=X00000").await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    assert_eq!(missing.json()["code"], "NotAuthorizedOrNotFound");
}

/// An unregistered operation gets the dialect's "not implemented" shape.
#[tokio::test]
async fn test_unregistered_operation_in_every_dialect() {
    let emu = Emulator::in_memory();

    let s3 = emu.aws().send("POST", "/bucket/key?restore", &[], "").await;
    assert_eq!(s3.status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(s3.xml("Code").as_deref(), Some("NotImplemented"));

    let json = emu.aws().target("AmazonSQS.PurgeQueue", json!({})).await;
    assert_eq!(json.status, StatusCode::BAD_REQUEST);
    assert!(json.json()["__type"].as_str().unwrap().ends_with("UnknownOperationException"));

    let query = emu.aws().form("Action=DescribeVpcs").await;
    assert_eq!(query.status, StatusCode::BAD_REQUEST);
    assert_eq!(query.xml("Code").as_deref(), Some("InvalidAction"));

    let gcp = emu.gcp().get("/v1/projects/demo/secrets").await;
    assert_eq!(gcp.status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(gcp.json()["error"]["status"], "UNIMPLEMENTED");

    let oracle = emu.oracle().get("/20160918/vcns").await;
    assert_eq!(oracle.status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(oracle.json()["code"], "NotImplemented");
    assert!(oracle.header("opc-request-id").is_some());
}

#[tokio::test]
async fn test_health_reports_dialect() {
    let emu = Emulator::in_memory();
    for dialect in Dialect::ALL {
        let client = Client::new(emu.router(dialect));
        let reply = client.get("/_stratus/health").await;
        assert_eq!(reply.json()["dialect"], dialect.as_str());
    }
}

#[tokio::test]
async fn test_compute_through_every_dialect() {
    let emu = Emulator::in_memory();

    let ec2 = emu
        .aws()
        .form("Action=RunInstances&ImageId=ami-1&MinCount=1&MaxCount=1")
        .await;
    let ec2_id = ec2.xml("instanceId").unwrap();

    emu.gcp()
        .json(
            "POST",
            "/compute/v1/projects/demo/zones/us-central1-a/instances",
            json!({ "name": "vm-gcp", "sourceImage": "debian-12" }),
        )
        .await;

    let oci = emu
        .oracle()
        .json(
            "POST",
            "/20160918/instances",
            json!({
                "compartmentId": "ocid1.compartment.oc1..demo",
                "availabilityDomain": "AD-1",
                "shape": "VM.Standard.E4.Flex",
                "sourceDetails": { "sourceType": "image", "imageId": "ocid1.image.oc1..x" },
            }),
        )
        .await;
    assert_eq!(oci.status, StatusCode::OK);
    let oci_id = oci.json()["id"].as_str().unwrap().to_string();

    let workloads = emu.mock_driver().list_workloads().await.unwrap();
    for id in [ec2_id.as_str(), "vm-gcp", oci_id.as_str()] {
        assert!(workloads.iter().any(|w| w.id == id), "{id} not launched");
    }

    // Take the driver offline: compute calls surface as unavailable.
    emu.mock_driver().set_offline(true);
    let reply = emu.aws().form("Action=RunInstances&ImageId=ami-1&MaxCount=1").await;
    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.xml("Code").as_deref(), Some("Unavailable"));
}

#[tokio::test]
async fn test_oversized_payload_is_rejected_before_storage() {
    let emu = Emulator::with_limits(stratus_services::Limits {
        max_object_bytes: 1024,
    });
    emu.aws().put("/small", "").await;
    let reply = emu.aws().put("/small/big.bin", vec![0u8; 2048]).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.xml("Code").as_deref(), Some("InvalidArgument"));
    assert_eq!(emu.aws().get("/small/big.bin").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_s3_versioning_over_the_wire() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    aws.put("/docs", "").await;
    let enable = aws
        .put(
            "/docs?versioning",
            "<VersioningConfiguration><Status>Enabled</Status></VersioningConfiguration>",
        )
        .await;
    assert_eq!(enable.status, StatusCode::OK);
    assert_eq!(aws.get("/docs?versioning").await.xml("Status").as_deref(), Some("Enabled"));

    let first = aws.put("/docs/readme", "v1").await;
    let first_version = first.header("x-amz-version-id").unwrap().to_string();
    let second = aws.put("/docs/readme", "v2").await;
    assert_ne!(second.header("x-amz-version-id"), Some(first_version.as_str()));

    assert_eq!(aws.get("/docs/readme").await.body, "v2");
    let old = aws.get(&format!("/docs/readme?versionId={first_version}")).await;
    assert_eq!(old.body, "v1");
    assert_eq!(old.header("x-amz-version-id"), Some(first_version.as_str()));

    let removed = aws.delete("/docs/readme").await;
    assert_eq!(removed.status, StatusCode::NO_CONTENT);
    assert_eq!(removed.header("x-amz-delete-marker"), Some("true"));
    assert_eq!(aws.get("/docs/readme").await.status, StatusCode::NOT_FOUND);
    assert_eq!(aws.get(&format!("/docs/readme?versionId={first_version}")).await.body, "v1");

    // Archived versions never show up in listings.
    assert_eq!(aws.get("/docs?list-type=2").await.xml("KeyCount").as_deref(), Some("0"));

    let unknown = aws.get("/docs/readme?versionId=ffffffffffffffff").await;
    assert_eq!(unknown.xml("Code").as_deref(), Some("NoSuchVersion"));
    let malformed = aws.put("/docs?versioning", "<VersioningConfiguration/>").await;
    assert_eq!(malformed.xml("Code").as_deref(), Some("MalformedXML"));
}

#[tokio::test]
async fn test_s3_multipart_upload_over_the_wire() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    aws.put("/media", "").await;

    let started = aws.send("POST", "/media/video.bin?uploads", &[], "").await;
    assert_eq!(started.status, StatusCode::OK);
    assert_eq!(started.xml("Key").as_deref(), Some("video.bin"));
    let upload = started.xml("UploadId").unwrap();

    let first = test_data_seeded(32 * 1024, 1);
    let second = test_data_seeded(8 * 1024, 2);
    let mut etags = Vec::new();
    for (number, data) in [(1, &first), (2, &second)] {
        let part = aws
            .put(
                &format!("/media/video.bin?partNumber={number}&uploadId={upload}"),
                data.clone(),
            )
            .await;
        assert_eq!(part.status, StatusCode::OK);
        etags.push(part.header("etag").unwrap().to_string());
    }
    // Parts stay hidden until the upload completes.
    assert_eq!(aws.get("/media/video.bin").await.status, StatusCode::NOT_FOUND);

    let complete = format!(
        "<CompleteMultipartUpload>\
         <Part><PartNumber>1</PartNumber><ETag>{}</ETag></Part>\
         <Part><PartNumber>2</PartNumber><ETag>{}</ETag></Part>\
         </CompleteMultipartUpload>",
        etags[0], etags[1]
    );
    let done = aws
        .send("POST", &format!("/media/video.bin?uploadId={upload}"), &[], complete)
        .await;
    assert_eq!(done.status, StatusCode::OK);
    assert_eq!(done.xml("Key").as_deref(), Some("video.bin"));

    let mut joined = first;
    joined.extend_from_slice(&second);
    let object = aws.get("/media/video.bin").await;
    assert_eq!(object.body, joined);
    assert_eq!(object.header("content-length"), Some("40960"));
    let listing = aws.get("/media?list-type=2").await;
    assert_eq!(listing.xml("KeyCount").as_deref(), Some("1"));

    // The upload is gone once completed.
    let again = aws
        .put(&format!("/media/video.bin?partNumber=3&uploadId={upload}"), "x")
        .await;
    assert_eq!(again.xml("Code").as_deref(), Some("NoSuchUpload"));
}

#[tokio::test]
async fn test_s3_aborted_upload_leaves_nothing() {
    let emu = Emulator::in_memory();
    let aws = emu.aws();
    aws.put("/media", "").await;
    let upload = aws
        .send("POST", "/media/tmp.bin?uploads", &[], "")
        .await
        .xml("UploadId")
        .unwrap();
    aws.put(&format!("/media/tmp.bin?partNumber=1&uploadId={upload}"), "chunk")
        .await;

    let aborted = aws.delete(&format!("/media/tmp.bin?uploadId={upload}")).await;
    assert_eq!(aborted.status, StatusCode::NO_CONTENT);
    let parts = "<CompleteMultipartUpload>\
                 <Part><PartNumber>1</PartNumber><ETag>\"x\"</ETag></Part>\
                 </CompleteMultipartUpload>";
    let late = aws
        .send("POST", &format!("/media/tmp.bin?uploadId={upload}"), &[], parts)
        .await;
    assert_eq!(late.xml("Code").as_deref(), Some("NoSuchUpload"));
    let listing = aws.get("/media?list-type=2").await;
    assert_eq!(listing.xml("KeyCount").as_deref(), Some("0"));
}
