//! Queues and messages.
//!
//! A queue is a `queue/<name>` record. Each message is a blob keyed by a
//! zero-padded sequence number drawn from the queue's `next_seq` attribute,
//! so receive order is send order. The key doubles as the receipt handle.
//! Messages stay until deleted.

use std::collections::BTreeMap;
use std::sync::Arc;

use stratus_engine::{BlobDraft, DeleteOutcome, EngineError, StorageEngine};
use stratus_types::{
    Attributes, BlobObject, ResourceId, ResourceKind, ResourceRecord, Scope, now_millis,
};
use tracing::{debug, info};

use crate::cursor::{Listing, PageRequest};
use crate::error::{Resource, ServiceError};
use crate::limits::{self, MAX_PAGE_SIZE};
use crate::model::{MessageInfo, QueueInfo};
use crate::records;

const NEXT_SEQ: &str = "next_seq";
const USER_ATTR_PREFIX: &str = "attr:";
const MESSAGE_ID: &str = "message_id";
const SENT_AT: &str = "sent_at";

/// Largest message body, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Messaging handler.
pub struct Messaging {
    engine: Arc<StorageEngine>,
}

impl Messaging {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self { engine }
    }

    /// Create a queue. Re-creating with the same attributes returns the
    /// existing queue; different attributes are a conflict.
    pub async fn create_queue(
        &self,
        name: &str,
        attributes: BTreeMap<String, String>,
        scope: &Scope,
    ) -> Result<QueueInfo, ServiceError> {
        limits::validate_resource_name("queue", name)?;
        let mut attrs = Attributes::from([(NEXT_SEQ.to_string(), "1".to_string())]);
        attrs.extend(
            attributes
                .iter()
                .map(|(k, v)| (format!("{USER_ATTR_PREFIX}{k}"), v.clone())),
        );
        let (record, created) = self
            .engine
            .create_if_absent(&queue_id(name), scope, attrs, Vec::new())
            .await?;
        if created {
            info!(queue = %name, "queue_created");
        } else if !attributes.is_empty() && user_attributes(&record) != attributes {
            return Err(ServiceError::already_exists(Resource::Queue, name));
        }
        Ok(queue_info(&record, 0))
    }

    /// Returns whether the queue existed (false on a tombstone hit).
    pub async fn delete_queue(&self, name: &str) -> Result<bool, ServiceError> {
        match self.engine.delete(&queue_id(name)).await? {
            DeleteOutcome::Deleted { blobs_purged } => {
                info!(queue = %name, messages = blobs_purged, "queue_deleted");
                Ok(true)
            }
            DeleteOutcome::AlreadyDeleted => Ok(false),
        }
    }

    /// Queue description with its current message count.
    pub async fn get_queue(&self, name: &str) -> Result<QueueInfo, ServiceError> {
        let id = queue_id(name);
        let record = self.engine.get(&id).await?;
        let count = records::count_blobs(&self.engine, &id).await?;
        Ok(queue_info(&record, count))
    }

    pub async fn list_queues(
        &self,
        prefix: &str,
        scope: &Scope,
        page: &PageRequest,
    ) -> Result<Listing<QueueInfo>, ServiceError> {
        let listing =
            records::list_owned(&self.engine, ResourceKind::Queue, prefix, scope, page).await?;
        Ok(listing.map(|r| queue_info(&r, 0)))
    }

    pub async fn send_message(
        &self,
        queue: &str,
        body: String,
        attributes: BTreeMap<String, String>,
    ) -> Result<MessageInfo, ServiceError> {
        if body.is_empty() || body.len() > MAX_MESSAGE_BYTES {
            return Err(ServiceError::validation(format!(
                "message body must be 1-{MAX_MESSAGE_BYTES} bytes"
            )));
        }
        let id = queue_id(queue);
        let seed = id.to_string();
        let sent_at = now_millis();
        let payload = body.clone().into_bytes();
        let (_, blob) = self
            .engine
            .put_blob_with(&id, move |attrs| {
                let seq = attrs
                    .get(NEXT_SEQ)
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(1);
                attrs.insert(NEXT_SEQ.to_string(), (seq + 1).to_string());
                let key = format!("{seq:020}");

                let mut metadata: BTreeMap<String, String> = attributes
                    .into_iter()
                    .map(|(k, v)| (format!("{USER_ATTR_PREFIX}{k}"), v))
                    .collect();
                metadata.insert(
                    MESSAGE_ID.to_string(),
                    records::uuid_like(format!("{seed}/{key}/{sent_at}").as_bytes()),
                );
                metadata.insert(SENT_AT.to_string(), sent_at.to_string());
                BlobDraft::new(key, payload).with_metadata(metadata)
            })
            .await?;
        debug!(queue = %queue, receipt = %blob.key, "message sent");
        Ok(message_info(&blob, body))
    }

    /// Up to `max` of the oldest messages. Messages are not hidden after
    /// receipt; they stay until deleted.
    pub async fn receive_messages(
        &self,
        queue: &str,
        max: usize,
    ) -> Result<Vec<MessageInfo>, ServiceError> {
        let id = queue_id(queue);
        let page = self
            .engine
            .list_blobs(&id, "", None, max.clamp(1, MAX_PAGE_SIZE))
            .await?;
        let mut out = Vec::with_capacity(page.items.len());
        for blob in &page.items {
            let data = match self.engine.get_blob(&id, &blob.key).await {
                Ok((_, data)) => data,
                Err(EngineError::BlobNotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            let body = String::from_utf8_lossy(&data).into_owned();
            out.push(message_info(blob, body));
        }
        Ok(out)
    }

    /// Delete by receipt handle. Returns whether the message was still
    /// there; a malformed handle is a validation error.
    pub async fn delete_message(&self, queue: &str, receipt: &str) -> Result<bool, ServiceError> {
        if receipt.len() != 20 || !receipt.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ServiceError::validation(format!(
                "invalid receipt handle {receipt:?}"
            )));
        }
        let existed = self.engine.delete_blob(&queue_id(queue), receipt).await?;
        debug!(queue = %queue, receipt, existed, "message deleted");
        Ok(existed)
    }
}

fn queue_id(name: &str) -> ResourceId {
    ResourceId::new(ResourceKind::Queue, name)
}

fn user_attributes(record: &ResourceRecord) -> BTreeMap<String, String> {
    record
        .attributes
        .iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(USER_ATTR_PREFIX)
                .map(|name| (name.to_string(), v.clone()))
        })
        .collect()
}

fn queue_info(record: &ResourceRecord, approximate_messages: u64) -> QueueInfo {
    QueueInfo {
        name: record.id.name().to_string(),
        scope: record.owner_scope.to_string(),
        attributes: user_attributes(record),
        created_at: record.created_at,
        approximate_messages,
    }
}

fn message_info(blob: &BlobObject, body: String) -> MessageInfo {
    MessageInfo {
        message_id: blob.metadata.get(MESSAGE_ID).cloned().unwrap_or_default(),
        receipt: blob.key.clone(),
        body,
        attributes: blob
            .metadata
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(USER_ATTR_PREFIX)
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect(),
        sent_at: blob
            .metadata
            .get(SENT_AT)
            .and_then(|s| s.parse().ok())
            .unwrap_or(blob.created_at),
    }
}
