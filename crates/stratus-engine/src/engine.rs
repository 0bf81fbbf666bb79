//! [`StorageEngine`] — atomic record and blob persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use stratus_meta::{MetaBatch, MetaStore};
use stratus_store::BlobStore;
use stratus_types::{
    Attributes, BlobAddress, BlobObject, ContentHash, ResourceId, ResourceKind, ResourceRecord,
    Scope, now_millis,
};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::locks::LockTable;

type Result<T> = std::result::Result<T, EngineError>;

/// Records or blobs scanned per metadata read while paging.
const SCAN_CHUNK: usize = 256;

/// Configuration for creating a [`StorageEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a deleted id answers "already deleted" before it is purged.
    pub tombstone_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tombstone_ttl: Duration::from_secs(300),
        }
    }
}

/// A blob to write as part of a mutation.
#[derive(Debug, Clone)]
pub struct BlobDraft {
    /// Key within the owning resource.
    pub key: String,
    /// Payload.
    pub data: Bytes,
    /// User metadata stored alongside the index entry.
    pub metadata: BTreeMap<String, String>,
}

impl BlobDraft {
    /// A draft without metadata.
    pub fn new(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach user metadata.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of [`StorageEngine::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The resource existed and is gone, along with its blobs.
    Deleted {
        /// Blob index entries removed by the cascade.
        blobs_purged: usize,
    },
    /// A recent delete already removed it (tombstone hit).
    AlreadyDeleted,
}

/// One page of an ordered listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    /// Items in key order.
    pub items: Vec<T>,
    /// Whether more items follow the last one.
    pub truncated: bool,
}

/// Pending reference-count changes for one mutation.
#[derive(Default)]
struct RefDelta(HashMap<BlobAddress, i64>);

impl RefDelta {
    fn add(&mut self, addr: BlobAddress, delta: i64) {
        *self.0.entry(addr).or_insert(0) += delta;
    }
}

/// The storage engine: the single entry point to records and blobs.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct StorageEngine {
    config: EngineConfig,
    meta: Arc<MetaStore>,
    blobs: Arc<dyn BlobStore>,
    locks: LockTable,
}

impl StorageEngine {
    /// Create an engine over an opened metadata store and blob store.
    ///
    /// Call [`recover`](Self::recover) before serving requests.
    pub fn new(config: EngineConfig, meta: Arc<MetaStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            config,
            meta,
            blobs,
            locks: LockTable::default(),
        }
    }

    /// Return a reference to the metadata store.
    pub fn meta(&self) -> &Arc<MetaStore> {
        &self.meta
    }

    /// Return a reference to the blob store.
    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Finish any cascade delete interrupted by a previous shutdown.
    ///
    /// Returns the number of resources whose purge was completed.
    pub async fn recover(&self) -> Result<usize> {
        let marks = self.meta.list_purge_marks()?;
        let mut resumed = 0;
        for (id, marked_at) in marks {
            let _guard = self.locks.lock(&id).await;
            // Re-check under the lock; a concurrent delete may have finished it.
            if self.meta.get_purge_mark(&id)?.is_none() {
                continue;
            }
            warn!(%id, marked_at, "resuming interrupted cascade delete");
            self.purge(&id, true).await?;
            resumed += 1;
        }
        if resumed > 0 {
            info!(resumed, "recovered interrupted deletes");
        }
        Ok(resumed)
    }

    /// Drop tombstones older than the configured TTL.
    ///
    /// Each id is re-read under its lock, so a tombstone refreshed by a
    /// delete after the scan is kept.
    pub async fn sweep_tombstones(&self) -> Result<usize> {
        let mut purged = 0;
        for (id, scanned_at) in self.meta.list_tombstones()? {
            if self.tombstone_fresh(scanned_at) {
                continue;
            }
            let _guard = self.locks.lock(&id).await;
            match self.meta.get_tombstone(&id)? {
                Some(deleted_at) if !self.tombstone_fresh(deleted_at) => {
                    let mut batch = MetaBatch::new();
                    batch.delete_tombstone(&id);
                    self.meta.commit(batch)?;
                    purged += 1;
                }
                _ => {}
            }
        }
        if purged > 0 {
            debug!(purged, "swept expired tombstones");
        }
        Ok(purged)
    }

    /// Flush metadata to durable storage.
    pub fn flush(&self) -> Result<()> {
        self.meta.persist()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Record reads
    // ------------------------------------------------------------------

    /// Read a record visible to callers (exists and not being purged).
    fn visible(&self, id: &ResourceId) -> Result<Option<ResourceRecord>> {
        if self.meta.get_purge_mark(id)?.is_some() {
            return Ok(None);
        }
        Ok(self.meta.get_record(id)?)
    }

    fn require(&self, id: &ResourceId) -> Result<ResourceRecord> {
        self.visible(id)?
            .ok_or_else(|| EngineError::NotFound { id: id.clone() })
    }

    /// Fetch a record.
    pub async fn get(&self, id: &ResourceId) -> Result<ResourceRecord> {
        self.require(id)
    }

    /// List records of one kind in name order, starting after `after`
    /// (a name, exclusive).
    pub async fn list(
        &self,
        kind: ResourceKind,
        name_prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<ResourceRecord>> {
        let prefix = format!("{}{name_prefix}", kind.prefix());
        let mut cursor = after.map(|name| ResourceId::new(kind, name));
        let mut items = Vec::new();
        loop {
            let chunk = self
                .meta
                .list_records(&prefix, cursor.as_ref(), SCAN_CHUNK)?;
            let exhausted = chunk.len() < SCAN_CHUNK;
            for record in chunk {
                cursor = Some(record.id.clone());
                if self.meta.get_purge_mark(&record.id)?.is_some() {
                    continue;
                }
                if items.len() == limit {
                    return Ok(Page {
                        items,
                        truncated: true,
                    });
                }
                items.push(record);
            }
            if exhausted {
                return Ok(Page {
                    items,
                    truncated: false,
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Record writes
    // ------------------------------------------------------------------

    /// Create a record, optionally with initial blobs, in one atomic step.
    ///
    /// Fails with [`EngineError::AlreadyExists`] if the id is taken.
    pub async fn create(
        &self,
        id: &ResourceId,
        scope: &Scope,
        attributes: Attributes,
        blobs: Vec<BlobDraft>,
    ) -> Result<ResourceRecord> {
        let _guard = self.locks.lock(id).await;
        if self.visible(id)?.is_some() {
            return Err(EngineError::AlreadyExists { id: id.clone() });
        }
        self.insert_new(id, scope, attributes, blobs).await
    }

    /// Create a record unless one already exists.
    ///
    /// Returns the stored record and whether this call created it.
    pub async fn create_if_absent(
        &self,
        id: &ResourceId,
        scope: &Scope,
        attributes: Attributes,
        blobs: Vec<BlobDraft>,
    ) -> Result<(ResourceRecord, bool)> {
        let _guard = self.locks.lock(id).await;
        if let Some(existing) = self.visible(id)? {
            return Ok((existing, false));
        }
        let record = self.insert_new(id, scope, attributes, blobs).await?;
        Ok((record, true))
    }

    /// Create or replace a record's attributes.
    ///
    /// With `expected_version`, the write only succeeds if the stored
    /// version matches (`0` means "must not exist").
    pub async fn put(
        &self,
        id: &ResourceId,
        scope: &Scope,
        attributes: Attributes,
        expected_version: Option<u64>,
    ) -> Result<ResourceRecord> {
        let _guard = self.locks.lock(id).await;
        match self.visible(id)? {
            Some(current) => {
                check_version(&current, expected_version)?;
                self.commit_update(current, |attrs| *attrs = attributes)
            }
            None => {
                if let Some(expected) = expected_version.filter(|v| *v != 0) {
                    return Err(EngineError::Conflict {
                        id: id.clone(),
                        expected,
                        actual: 0,
                    });
                }
                self.insert_new(id, scope, attributes, Vec::new()).await
            }
        }
    }

    /// Read-modify-write a record's attributes under its lock.
    pub async fn update<F>(
        &self,
        id: &ResourceId,
        expected_version: Option<u64>,
        mutate: F,
    ) -> Result<ResourceRecord>
    where
        F: FnOnce(&mut Attributes) + Send,
    {
        let _guard = self.locks.lock(id).await;
        let current = self.require(id)?;
        check_version(&current, expected_version)?;
        self.commit_update(current, mutate)
    }

    fn commit_update<F>(&self, mut record: ResourceRecord, mutate: F) -> Result<ResourceRecord>
    where
        F: FnOnce(&mut Attributes),
    {
        mutate(&mut record.attributes);
        bump(&mut record);
        let mut batch = MetaBatch::new();
        batch.put_record(&record)?;
        self.meta.commit(batch)?;
        debug!(id = %record.id, version = record.version, "record updated");
        Ok(record)
    }

    async fn insert_new(
        &self,
        id: &ResourceId,
        scope: &Scope,
        attributes: Attributes,
        blobs: Vec<BlobDraft>,
    ) -> Result<ResourceRecord> {
        let now = now_millis();
        let record = ResourceRecord {
            id: id.clone(),
            owner_scope: scope.clone(),
            attributes,
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let mut batch = MetaBatch::new();
        let mut refs = RefDelta::default();
        let mut written = Vec::new();
        for draft in blobs {
            let (blob, fresh) = self.stage_blob(id, draft, None, &mut batch, &mut refs).await?;
            if fresh {
                written.push(blob.storage_location);
            }
        }
        batch.put_record(&record)?;
        // Re-creating a recently deleted id clears its tombstone.
        batch.delete_tombstone(id);

        self.commit_with_refs(batch, refs, &written).await?;
        info!(%id, scope = %scope, "resource created");
        Ok(record)
    }

    /// Delete a record and cascade to all of its blobs.
    ///
    /// Phase one commits a purge mark, which hides the record and its blobs
    /// from readers at once. Phase two removes payloads, index entries and
    /// the record, and leaves a tombstone.
    pub async fn delete(&self, id: &ResourceId) -> Result<DeleteOutcome> {
        let _guard = self.locks.lock(id).await;

        let marked = self.meta.get_purge_mark(id)?.is_some();
        if !marked {
            if self.meta.get_record(id)?.is_none() {
                return match self.meta.get_tombstone(id)? {
                    Some(deleted_at) if self.tombstone_fresh(deleted_at) => {
                        debug!(%id, "delete hit tombstone");
                        Ok(DeleteOutcome::AlreadyDeleted)
                    }
                    _ => Err(EngineError::NotFound { id: id.clone() }),
                };
            }
            let mut batch = MetaBatch::new();
            batch.put_purge_mark(id, now_millis());
            self.meta.commit(batch)?;
        }

        let blobs_purged = self.purge(id, true).await?;
        info!(%id, blobs_purged, "resource deleted");
        Ok(DeleteOutcome::Deleted { blobs_purged })
    }

    /// Remove a record whose creating operation did not complete.
    ///
    /// Cascades like [`delete`](Self::delete) but leaves no tombstone, so
    /// the id reads as never having existed. A missing id is not an error.
    pub async fn discard(&self, id: &ResourceId) -> Result<()> {
        let _guard = self.locks.lock(id).await;
        if self.meta.get_record(id)?.is_none() {
            return Ok(());
        }
        let mut batch = MetaBatch::new();
        batch.put_purge_mark(id, now_millis());
        self.meta.commit(batch)?;
        let blobs_purged = self.purge(id, false).await?;
        debug!(%id, blobs_purged, "resource discarded");
        Ok(())
    }

    /// Phase two of a cascade delete. Caller holds the lock and a purge
    /// mark is committed for `id`.
    async fn purge(&self, id: &ResourceId, tombstone: bool) -> Result<usize> {
        let mut purged = 0;
        loop {
            let chunk = self.meta.list_blobs(id, "", None, SCAN_CHUNK)?;
            if chunk.is_empty() {
                break;
            }
            let mut batch = MetaBatch::new();
            let mut seen = HashMap::new();
            for blob in &chunk {
                batch.delete_blob(id, &blob.key);
                seen.entry(blob.storage_location).or_insert(());
            }
            for addr in seen.keys() {
                self.blobs.delete(*addr).await?;
                batch.set_blob_refs(addr, 0);
            }
            purged += chunk.len();
            self.meta.commit(batch)?;
        }

        let mut batch = MetaBatch::new();
        batch.delete_record(id).delete_purge_mark(id);
        if tombstone {
            batch.put_tombstone(id, now_millis());
        }
        self.meta.commit(batch)?;
        Ok(purged)
    }

    fn tombstone_fresh(&self, deleted_at: u64) -> bool {
        now_millis().saturating_sub(deleted_at) < self.config.tombstone_ttl.as_millis() as u64
    }

    // ------------------------------------------------------------------
    // Blobs
    // ------------------------------------------------------------------

    /// Write a blob under an existing resource, bumping its version.
    pub async fn put_blob(&self, id: &ResourceId, draft: BlobDraft) -> Result<BlobObject> {
        let (_, blob) = self.put_blob_with(id, |_| draft).await?;
        Ok(blob)
    }

    /// Write a blob whose draft depends on the resource's attributes.
    ///
    /// `make` runs under the resource lock and may modify the attributes;
    /// attribute changes and the blob commit together.
    pub async fn put_blob_with<F>(
        &self,
        id: &ResourceId,
        make: F,
    ) -> Result<(ResourceRecord, BlobObject)>
    where
        F: FnOnce(&mut Attributes) -> BlobDraft + Send,
    {
        let _guard = self.locks.lock(id).await;
        let mut record = self.require(id)?;
        let draft = make(&mut record.attributes);
        let previous = self.meta.get_blob(id, &draft.key)?;

        let mut batch = MetaBatch::new();
        let mut refs = RefDelta::default();
        let (blob, fresh) = self
            .stage_blob(id, draft, previous.as_ref(), &mut batch, &mut refs)
            .await?;
        bump(&mut record);
        batch.put_record(&record)?;

        let written = if fresh {
            vec![blob.storage_location]
        } else {
            Vec::new()
        };
        self.commit_with_refs(batch, refs, &written).await?;
        debug!(%id, key = %blob.key, size = blob.size, "blob stored");
        Ok((record, blob))
    }

    /// Fetch a blob's index entry and payload.
    ///
    /// Reads take no lock. If an overwrite commits and releases the payload
    /// between the index read and the fetch, the read follows the new entry;
    /// a missing payload under an unchanged entry is
    /// [`EngineError::MissingPayload`]. The payload is re-hashed on every
    /// read and a mismatch is reported as [`EngineError::CorruptBlob`].
    pub async fn get_blob(&self, id: &ResourceId, key: &str) -> Result<(BlobObject, Bytes)> {
        let mut blob = self.head_blob(id, key).await?;
        loop {
            let Some(data) = self.blobs.get(blob.storage_location).await? else {
                let current = self.head_blob(id, key).await?;
                if current.storage_location == blob.storage_location {
                    return Err(EngineError::MissingPayload {
                        id: id.clone(),
                        key: key.to_string(),
                    });
                }
                debug!(%id, key, "blob replaced during read");
                blob = current;
                continue;
            };
            let actual = ContentHash::from_data(&data);
            if actual != blob.content_hash {
                error!(%id, key, expected = %blob.content_hash, %actual, "blob corruption detected on read");
                return Err(EngineError::CorruptBlob {
                    id: id.clone(),
                    key: key.to_string(),
                    expected: blob.content_hash,
                    actual,
                });
            }
            return Ok((blob, data));
        }
    }

    /// Fetch a blob's index entry without its payload.
    pub async fn head_blob(&self, id: &ResourceId, key: &str) -> Result<BlobObject> {
        self.require(id)?;
        self.meta
            .get_blob(id, key)?
            .ok_or_else(|| EngineError::BlobNotFound {
                id: id.clone(),
                key: key.to_string(),
            })
    }

    /// Delete a blob. Returns whether it existed.
    ///
    /// A missing blob under an existing resource is not an error; a
    /// missing resource is.
    pub async fn delete_blob(&self, id: &ResourceId, key: &str) -> Result<bool> {
        let _guard = self.locks.lock(id).await;
        let mut record = self.require(id)?;
        let Some(blob) = self.meta.get_blob(id, key)? else {
            return Ok(false);
        };

        let remaining = self.meta.blob_refs(&blob.storage_location)?.saturating_sub(1);
        bump(&mut record);
        let mut batch = MetaBatch::new();
        batch
            .delete_blob(id, key)
            .set_blob_refs(&blob.storage_location, remaining)
            .put_record(&record)?;
        self.meta.commit(batch)?;

        if remaining == 0 {
            self.blobs.delete(blob.storage_location).await?;
        }
        debug!(%id, key, "blob deleted");
        Ok(true)
    }

    /// List blobs under `id` whose key starts with `prefix`, after `after`
    /// (exclusive), in key order.
    pub async fn list_blobs(
        &self,
        id: &ResourceId,
        prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Page<BlobObject>> {
        self.require(id)?;
        let mut items = self
            .meta
            .list_blobs(id, prefix, after, limit.saturating_add(1))?;
        let truncated = items.len() > limit;
        items.truncate(limit);
        Ok(Page { items, truncated })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Write `draft`'s payload (unless already present) and queue its index
    /// entry. Returns the entry and whether the payload was newly written.
    async fn stage_blob(
        &self,
        id: &ResourceId,
        draft: BlobDraft,
        previous: Option<&BlobObject>,
        batch: &mut MetaBatch,
        refs: &mut RefDelta,
    ) -> Result<(BlobObject, bool)> {
        let content_hash = ContentHash::from_data(&draft.data);
        let addr = BlobAddress::derive(id, &content_hash);
        let pending = refs.0.get(&addr).copied().unwrap_or(0);
        let fresh = self.meta.blob_refs(&addr)? as i64 + pending == 0;
        if fresh {
            self.blobs.put(addr, draft.data.clone()).await?;
        } else if !self.blobs.contains(addr).await? {
            warn!(%id, %addr, "referenced payload missing from store, rewriting");
            self.blobs.put(addr, draft.data.clone()).await?;
        }

        let blob = BlobObject {
            resource_id: id.clone(),
            key: draft.key,
            content_hash,
            size: draft.data.len() as u64,
            storage_location: addr,
            metadata: draft.metadata,
            created_at: now_millis(),
        };
        refs.add(addr, 1);
        if let Some(old) = previous {
            refs.add(old.storage_location, -1);
        }
        batch.put_blob(&blob)?;
        Ok((blob, fresh))
    }

    /// Fold reference-count changes into `batch`, commit it, then drop
    /// payloads nobody references any more.
    ///
    /// If the commit fails, payloads written by this mutation are removed
    /// again so nothing half-visible is left behind.
    async fn commit_with_refs(
        &self,
        mut batch: MetaBatch,
        refs: RefDelta,
        written: &[BlobAddress],
    ) -> Result<()> {
        let mut released = Vec::new();
        for (addr, delta) in refs.0 {
            if delta == 0 {
                continue;
            }
            let count = (self.meta.blob_refs(&addr)? as i64 + delta).max(0) as u64;
            batch.set_blob_refs(&addr, count);
            if count == 0 {
                released.push(addr);
            }
        }

        if let Err(e) = self.meta.commit(batch) {
            for addr in written {
                if let Err(cleanup) = self.blobs.delete(*addr).await {
                    warn!(%addr, error = %cleanup, "failed to remove orphaned payload");
                }
            }
            return Err(e.into());
        }

        for addr in released {
            self.blobs.delete(addr).await?;
        }
        Ok(())
    }
}

fn check_version(current: &ResourceRecord, expected: Option<u64>) -> Result<()> {
    match expected {
        Some(expected) if expected != current.version => Err(EngineError::Conflict {
            id: current.id.clone(),
            expected,
            actual: current.version,
        }),
        _ => Ok(()),
    }
}

fn bump(record: &mut ResourceRecord) {
    record.version += 1;
    record.updated_at = now_millis().max(record.updated_at);
}
