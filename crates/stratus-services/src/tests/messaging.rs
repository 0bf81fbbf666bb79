//! Messaging handler tests.

use std::collections::BTreeMap;

use super::helpers::{scope, services};
use crate::{Resource, ServiceError};

#[tokio::test]
async fn test_send_receive_delete() {
    let svc = services();
    let mq = svc.messaging();
    mq.create_queue("jobs", BTreeMap::new(), &scope())
        .await
        .unwrap();

    let first = mq
        .send_message("jobs", "one".into(), BTreeMap::new())
        .await
        .unwrap();
    let second = mq
        .send_message("jobs", "two".into(), BTreeMap::new())
        .await
        .unwrap();
    assert!(first.receipt < second.receipt);
    assert_ne!(first.message_id, second.message_id);

    let received = mq.receive_messages("jobs", 10).await.unwrap();
    let bodies: Vec<_> = received.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["one", "two"]);

    // At-least-once: receiving does not remove.
    assert_eq!(mq.receive_messages("jobs", 10).await.unwrap().len(), 2);

    assert!(mq.delete_message("jobs", &first.receipt).await.unwrap());
    let remaining = mq.receive_messages("jobs", 10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].body, "two");
    assert_eq!(mq.get_queue("jobs").await.unwrap().approximate_messages, 1);
}

#[tokio::test]
async fn test_identical_bodies_are_distinct_messages() {
    let svc = services();
    let mq = svc.messaging();
    mq.create_queue("q", BTreeMap::new(), &scope()).await.unwrap();
    let a = mq.send_message("q", "same".into(), BTreeMap::new()).await.unwrap();
    let b = mq.send_message("q", "same".into(), BTreeMap::new()).await.unwrap();
    mq.delete_message("q", &a.receipt).await.unwrap();

    let left = mq.receive_messages("q", 10).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].receipt, b.receipt);
    assert_eq!(left[0].body, "same");
}

#[tokio::test]
async fn test_receive_respects_max() {
    let svc = services();
    let mq = svc.messaging();
    mq.create_queue("q", BTreeMap::new(), &scope()).await.unwrap();
    for i in 0..5 {
        mq.send_message("q", format!("m{i}"), BTreeMap::new())
            .await
            .unwrap();
    }
    assert_eq!(mq.receive_messages("q", 2).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_create_queue_is_idempotent_for_same_attributes() {
    let svc = services();
    let mq = svc.messaging();
    let attrs = BTreeMap::from([("VisibilityTimeout".to_string(), "30".to_string())]);
    mq.create_queue("q", attrs.clone(), &scope()).await.unwrap();
    let again = mq.create_queue("q", attrs, &scope()).await.unwrap();
    assert_eq!(again.attributes.get("VisibilityTimeout").map(String::as_str), Some("30"));

    let different = BTreeMap::from([("VisibilityTimeout".to_string(), "60".to_string())]);
    let err = mq.create_queue("q", different, &scope()).await.unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyExists { resource: Resource::Queue, .. }));
}

#[tokio::test]
async fn test_invalid_inputs() {
    let svc = services();
    let mq = svc.messaging();
    mq.create_queue("q", BTreeMap::new(), &scope()).await.unwrap();
    assert!(matches!(
        mq.send_message("q", String::new(), BTreeMap::new()).await,
        Err(ServiceError::Validation(_))
    ));
    assert!(matches!(
        mq.delete_message("q", "bogus").await,
        Err(ServiceError::Validation(_))
    ));
    assert!(matches!(
        mq.send_message("missing", "x".into(), BTreeMap::new()).await,
        Err(ServiceError::NotFound { resource: Resource::Queue, .. })
    ));
}

#[tokio::test]
async fn test_concurrent_sends_get_unique_receipts() {
    let svc = std::sync::Arc::new(services());
    svc.messaging()
        .create_queue("q", BTreeMap::new(), &scope())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let svc = svc.clone();
        handles.push(tokio::spawn(async move {
            svc.messaging()
                .send_message("q", format!("m{i}"), BTreeMap::new())
                .await
                .unwrap()
                .receipt
        }));
    }
    let mut receipts = Vec::new();
    for h in handles {
        receipts.push(h.await.unwrap());
    }
    receipts.sort();
    receipts.dedup();
    assert_eq!(receipts.len(), 20);
}

#[tokio::test]
async fn test_list_queues_by_prefix() {
    let svc = services();
    let mq = svc.messaging();
    for name in ["orders-a", "orders-b", "billing"] {
        mq.create_queue(name, BTreeMap::new(), &scope()).await.unwrap();
    }
    let listing = mq
        .list_queues("orders", &scope(), &crate::PageRequest::first())
        .await
        .unwrap();
    let names: Vec<_> = listing.items.iter().map(|q| q.name.as_str()).collect();
    assert_eq!(names, vec!["orders-a", "orders-b"]);
}
