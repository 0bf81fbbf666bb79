//! Tables of JSON items.
//!
//! A table is a `table/<name>` record whose `key_attribute` attribute names
//! the item field used as primary key. Items are JSON blobs under the table,
//! keyed by that field's value.

use std::sync::Arc;

use serde_json::Value;
use stratus_engine::{BlobDraft, DeleteOutcome, EngineError, StorageEngine};
use stratus_types::{Attributes, ResourceId, ResourceKind, ResourceRecord, Scope};
use tracing::{debug, info};

use crate::cursor::{Listing, PageRequest};
use crate::error::ServiceError;
use crate::limits;
use crate::model::{ItemInfo, TableInfo};
use crate::records;

const KEY_ATTRIBUTE: &str = "key_attribute";

/// Key attribute of tables created implicitly on first write.
pub const DEFAULT_KEY_ATTRIBUTE: &str = "id";

/// Document store handler.
pub struct DocumentStore {
    engine: Arc<StorageEngine>,
}

impl DocumentStore {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self { engine }
    }

    pub async fn create_table(
        &self,
        name: &str,
        key_attribute: &str,
        scope: &Scope,
    ) -> Result<TableInfo, ServiceError> {
        limits::validate_resource_name("table", name)?;
        if key_attribute.is_empty() {
            return Err(ServiceError::validation("key attribute must not be empty"));
        }
        let record = self
            .engine
            .create(&table_id(name), scope, table_attrs(key_attribute), Vec::new())
            .await?;
        info!(table = %name, key_attribute, "table_created");
        Ok(table_info(&record, None))
    }

    /// Returns whether the table existed (false on a tombstone hit).
    pub async fn delete_table(&self, name: &str) -> Result<bool, ServiceError> {
        match self.engine.delete(&table_id(name)).await? {
            DeleteOutcome::Deleted { blobs_purged } => {
                info!(table = %name, items = blobs_purged, "table_deleted");
                Ok(true)
            }
            DeleteOutcome::AlreadyDeleted => Ok(false),
        }
    }

    /// Table description including its item count.
    pub async fn describe_table(&self, name: &str) -> Result<TableInfo, ServiceError> {
        let id = table_id(name);
        let record = self.engine.get(&id).await?;
        let count = records::count_blobs(&self.engine, &id).await?;
        Ok(table_info(&record, Some(count)))
    }

    pub async fn list_tables(
        &self,
        scope: &Scope,
        page: &PageRequest,
    ) -> Result<Listing<TableInfo>, ServiceError> {
        let listing =
            records::list_owned(&self.engine, ResourceKind::Table, "", scope, page).await?;
        Ok(listing.map(|r| table_info(&r, None)))
    }

    /// Store an item, replacing any item with the same key.
    ///
    /// The key is `key` when given, otherwise the value of the table's key
    /// attribute inside `item`. With `create_table`, a missing table is
    /// created with [`DEFAULT_KEY_ATTRIBUTE`].
    pub async fn put_item(
        &self,
        table: &str,
        key: Option<&str>,
        item: Value,
        create_table: bool,
        scope: &Scope,
    ) -> Result<ItemInfo, ServiceError> {
        limits::validate_resource_name("table", table)?;
        if !item.is_object() {
            return Err(ServiceError::validation("item must be a JSON object"));
        }
        let id = table_id(table);
        let record = if create_table {
            let (record, created) = self
                .engine
                .create_if_absent(&id, scope, table_attrs(DEFAULT_KEY_ATTRIBUTE), Vec::new())
                .await?;
            if created {
                info!(table = %table, "table_created");
            }
            record
        } else {
            self.engine.get(&id).await?
        };

        let key_attribute = record.attr(KEY_ATTRIBUTE).unwrap_or(DEFAULT_KEY_ATTRIBUTE);
        let key = match key {
            Some(k) => k.to_string(),
            None => key_of(&item, key_attribute).ok_or_else(|| {
                ServiceError::validation(format!("item is missing key attribute {key_attribute:?}"))
            })?,
        };
        limits::validate_key("item key", &key)?;

        let data = serde_json::to_vec(&item)?;
        let blob = self.engine.put_blob(&id, BlobDraft::new(&key, data)).await?;
        debug!(table = %table, key = %key, size = blob.size, "item stored");
        Ok(ItemInfo {
            table: table.to_string(),
            key,
            document: item,
            updated_at: blob.created_at,
        })
    }

    pub async fn get_item(&self, table: &str, key: &str) -> Result<ItemInfo, ServiceError> {
        limits::validate_key("item key", key)?;
        let (blob, data) = self.engine.get_blob(&table_id(table), key).await?;
        Ok(ItemInfo {
            table: table.to_string(),
            key: key.to_string(),
            document: serde_json::from_slice(&data)?,
            updated_at: blob.created_at,
        })
    }

    /// Returns whether the item existed. A missing table is an error.
    pub async fn delete_item(&self, table: &str, key: &str) -> Result<bool, ServiceError> {
        limits::validate_key("item key", key)?;
        Ok(self.engine.delete_blob(&table_id(table), key).await?)
    }

    /// One page of items in key order.
    pub async fn scan(&self, table: &str, page: &PageRequest) -> Result<Listing<ItemInfo>, ServiceError> {
        let id = table_id(table);
        let blobs = self
            .engine
            .list_blobs(&id, "", page.after.as_deref(), page.limit)
            .await?;
        let mut items = Vec::with_capacity(blobs.items.len());
        for blob in &blobs.items {
            // Deleted between the listing and the read.
            let data = match self.engine.get_blob(&id, &blob.key).await {
                Ok((_, data)) => data,
                Err(EngineError::BlobNotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            items.push(ItemInfo {
                table: table.to_string(),
                key: blob.key.clone(),
                document: serde_json::from_slice(&data)?,
                updated_at: blob.created_at,
            });
        }
        let last = blobs.items.last().map(|b| b.key.as_str());
        Ok(Listing::new(items, blobs.truncated, last))
    }
}

fn table_id(name: &str) -> ResourceId {
    ResourceId::new(ResourceKind::Table, name)
}

fn table_attrs(key_attribute: &str) -> Attributes {
    Attributes::from([(KEY_ATTRIBUTE.to_string(), key_attribute.to_string())])
}

fn table_info(record: &ResourceRecord, item_count: Option<u64>) -> TableInfo {
    TableInfo {
        name: record.id.name().to_string(),
        key_attribute: record
            .attr(KEY_ATTRIBUTE)
            .unwrap_or(DEFAULT_KEY_ATTRIBUTE)
            .to_string(),
        created_at: record.created_at,
        item_count,
    }
}

/// The scalar value of `attribute` in `item`, as a key string.
///
/// Accepts plain JSON scalars and typed wrappers such as `{"S": "x"}`,
/// `{"N": "1"}` or `{"stringValue": "x"}`.
pub fn key_of(item: &Value, attribute: &str) -> Option<String> {
    scalar(item.get(attribute)?)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) if map.len() == 1 => map.values().next().and_then(scalar),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_key_of_plain_and_typed() {
        assert_eq!(key_of(&json!({"id": "u1"}), "id").as_deref(), Some("u1"));
        assert_eq!(key_of(&json!({"id": 7}), "id").as_deref(), Some("7"));
        assert_eq!(key_of(&json!({"pk": {"S": "a"}}), "pk").as_deref(), Some("a"));
        assert_eq!(key_of(&json!({"pk": {"N": "42"}}), "pk").as_deref(), Some("42"));
        assert_eq!(
            key_of(&json!({"id": {"stringValue": "doc"}}), "id").as_deref(),
            Some("doc")
        );
        assert_eq!(key_of(&json!({"other": 1}), "id"), None);
        assert_eq!(key_of(&json!({"id": [1, 2]}), "id"), None);
    }
}
