//! Buckets and objects.
//!
//! A bucket is a `bucket/<name>` record; each object is a blob under it,
//! keyed by the object key. Deleting a bucket cascades to its objects.
//!
//! Archived versions and multipart state are blobs under the same record
//! with keys starting with NUL, which object keys may not contain. They
//! never show up in listings and go away with the bucket.
//!
//! Callers with a credential only reach buckets their scope owns. Requests
//! without one act in the shared default scope and reach every bucket,
//! since some object paths carry no scope at all.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use stratus_engine::{BlobDraft, DeleteOutcome, EngineError, StorageEngine};
use stratus_types::{Attributes, BlobObject, ResourceId, ResourceKind, ResourceRecord, Scope};
use tracing::{debug, info};

use crate::cursor::{Listing, PageRequest};
use crate::error::{Resource, ServiceError};
use crate::limits::{self, Limits, MAX_PAGE_SIZE};
use crate::model::{
    BucketInfo, CompletedPart, MultipartUpload, ObjectInfo, ObjectListing, ObjectMeta,
    ObjectRemoval, PartInfo, VersioningStatus,
};
use crate::records;

const CONTENT_TYPE: &str = "content-type";
const USER_META_PREFIX: &str = "meta:";
const VERSION_ID: &str = "version-id";
const UPLOAD_KEY: &str = "upload-key";

/// Bucket attributes.
const VERSIONING: &str = "versioning";
const VERSION_SEQ: &str = "version-seq";

/// `\0ver\0<key>\0<version>` holds every version of a versioned object.
const VERSIONS: &str = "\0ver\0";
/// `\0mpu\0<upload>` marks an upload; its parts follow as `\0<part>`.
const UPLOADS: &str = "\0mpu\0";
/// Sorts after every internal key and before every object key.
const INTERNAL_END: &str = "\0\u{10FFFF}";

/// Sorts after every character a listed key can continue with.
const PAST_PREFIX: char = '\u{10FFFF}';

pub const MAX_PART_NUMBER: u32 = 10_000;

/// Object storage handler.
pub struct ObjectStorage {
    engine: Arc<StorageEngine>,
    limits: Limits,
}

impl ObjectStorage {
    pub fn new(engine: Arc<StorageEngine>, limits: Limits) -> Self {
        Self { engine, limits }
    }

    pub async fn create_bucket(&self, name: &str, scope: &Scope) -> Result<BucketInfo, ServiceError> {
        limits::validate_bucket_name(name)?;
        let record = self
            .engine
            .create(&bucket_id(name), scope, Attributes::new(), Vec::new())
            .await?;
        info!(bucket = %name, %scope, "bucket_created");
        Ok(bucket_info(&record))
    }

    /// Delete a bucket and every object in it. Returns whether it existed
    /// (false on a tombstone hit).
    pub async fn delete_bucket(&self, name: &str, scope: &Scope) -> Result<bool, ServiceError> {
        match self.owned_bucket(name, scope).await {
            // A tombstone answers below.
            Ok(_) | Err(ServiceError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        match self.engine.delete(&bucket_id(name)).await? {
            DeleteOutcome::Deleted { blobs_purged } => {
                info!(bucket = %name, objects = blobs_purged, "bucket_deleted");
                Ok(true)
            }
            DeleteOutcome::AlreadyDeleted => Ok(false),
        }
    }

    pub async fn head_bucket(&self, name: &str, scope: &Scope) -> Result<BucketInfo, ServiceError> {
        let record = self.owned_bucket(name, scope).await?;
        Ok(bucket_info(&record))
    }

    /// Every bucket owned by `scope`, in name order.
    pub async fn list_buckets(&self, scope: &Scope) -> Result<Vec<BucketInfo>, ServiceError> {
        let records = records::list_all_owned(&self.engine, ResourceKind::Bucket, scope).await?;
        Ok(records.iter().map(bucket_info).collect())
    }

    pub async fn get_bucket_versioning(
        &self,
        name: &str,
        scope: &Scope,
    ) -> Result<Option<VersioningStatus>, ServiceError> {
        let record = self.owned_bucket(name, scope).await?;
        Ok(versioning_of(&record.attributes))
    }

    /// Set a bucket's versioning state. Versions written while it was
    /// enabled stay readable after suspending.
    pub async fn put_bucket_versioning(
        &self,
        name: &str,
        status: VersioningStatus,
        scope: &Scope,
    ) -> Result<Option<VersioningStatus>, ServiceError> {
        self.owned_bucket(name, scope).await?;
        let record = self
            .engine
            .update(&bucket_id(name), None, |attrs| {
                attrs.insert(VERSIONING.to_string(), status.as_str().to_string());
            })
            .await?;
        info!(bucket = %name, status = status.as_str(), "bucket_versioning_set");
        Ok(versioning_of(&record.attributes))
    }

    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        meta: ObjectMeta,
        scope: &Scope,
    ) -> Result<ObjectInfo, ServiceError> {
        limits::validate_key("object key", key)?;
        self.check_size(data.len())?;
        self.owned_bucket(bucket, scope).await?;
        self.store(bucket, key, data, encode_meta(meta)).await
    }

    /// Read the current object, or one of its versions.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        scope: &Scope,
    ) -> Result<(ObjectInfo, Bytes), ServiceError> {
        limits::validate_key("object key", key)?;
        self.owned_bucket(bucket, scope).await?;
        let id = bucket_id(bucket);
        let (blob, data) = match version_id {
            None => self.engine.get_blob(&id, key).await?,
            Some(version) => self
                .engine
                .get_blob(&id, &version_key(key, checked_version(version)?))
                .await
                .map_err(missing_as(Resource::Version, version))?,
        };
        Ok((object_info(bucket, key, &blob), data))
    }

    pub async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        scope: &Scope,
    ) -> Result<ObjectInfo, ServiceError> {
        limits::validate_key("object key", key)?;
        self.owned_bucket(bucket, scope).await?;
        let id = bucket_id(bucket);
        let blob = match version_id {
            None => self.engine.head_blob(&id, key).await?,
            Some(version) => self
                .engine
                .head_blob(&id, &version_key(key, checked_version(version)?))
                .await
                .map_err(missing_as(Resource::Version, version))?,
        };
        Ok(object_info(bucket, key, &blob))
    }

    /// Delete an object. Deleting a missing key succeeds; a missing bucket
    /// does not.
    ///
    /// In a versioning-enabled bucket a plain delete hides the object
    /// behind a delete marker and keeps its versions. Deleting a version
    /// by id removes it for good; if it was the current one, the newest
    /// remaining version takes its place.
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        scope: &Scope,
    ) -> Result<ObjectRemoval, ServiceError> {
        limits::validate_key("object key", key)?;
        let record = self.owned_bucket(bucket, scope).await?;
        let id = bucket_id(bucket);

        if let Some(version) = version_id {
            let archived = self
                .engine
                .delete_blob(&id, &version_key(key, checked_version(version)?))
                .await?;
            let current = match self.engine.head_blob(&id, key).await {
                Ok(blob) => blob.metadata.get(VERSION_ID).cloned(),
                Err(EngineError::BlobNotFound { .. }) => None,
                Err(e) => return Err(e.into()),
            };
            let was_current = current.as_deref() == Some(version);
            if was_current {
                self.restore_latest(&id, key).await?;
            }
            if archived || was_current {
                info!(bucket = %bucket, key, version, "object_version_deleted");
            }
            return Ok(ObjectRemoval {
                existed: archived || was_current,
                version_id: Some(version.to_string()),
                delete_marker: false,
            });
        }

        let existed = self.engine.delete_blob(&id, key).await?;
        let mut marker = None;
        if versioning_of(&record.attributes) == Some(VersioningStatus::Enabled) {
            self.engine
                .update(&id, None, |attrs| marker = next_version(attrs))
                .await?;
        }
        if existed {
            info!(bucket = %bucket, key, marker = marker.as_deref(), "object_deleted");
        }
        Ok(ObjectRemoval {
            existed,
            delete_marker: marker.is_some(),
            version_id: marker,
        })
    }

    /// One page of objects under `prefix`.
    ///
    /// With a delimiter, keys sharing the segment up to the next delimiter
    /// collapse into one common prefix, which counts as one entry.
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        page: &PageRequest,
        scope: &Scope,
    ) -> Result<ObjectListing, ServiceError> {
        if prefix.contains('\0') {
            return Err(ServiceError::validation("prefix must not contain NUL"));
        }
        self.owned_bucket(bucket, scope).await?;
        let id = bucket_id(bucket);
        let delimiter = delimiter.filter(|d| !d.is_empty());
        let rollup = |key: &str| -> Option<String> {
            let d = delimiter?;
            let rest = key.strip_prefix(prefix)?;
            rest.find(d)
                .map(|pos| key[..prefix.len() + pos + d.len()].to_string())
        };

        // A resume point inside a rolled-up prefix skips the whole prefix.
        let resume = page.after.clone().map(|key| match rollup(&key) {
            Some(common) => format!("{common}{PAST_PREFIX}"),
            None => key,
        });
        // Internal keys only match the empty prefix; start past them.
        let mut after = match resume {
            Some(key) if !prefix.is_empty() || key.as_str() > INTERNAL_END => Some(key),
            _ if prefix.is_empty() => Some(INTERNAL_END.to_string()),
            other => other,
        };
        let mut objects = Vec::new();
        let mut common_prefixes: Vec<String> = Vec::new();
        let mut last_key: Option<String> = None;
        let mut truncated = false;

        'scan: loop {
            let chunk = self
                .engine
                .list_blobs(&id, prefix, after.as_deref(), page.limit)
                .await?;
            for blob in &chunk.items {
                if objects.len() + common_prefixes.len() == page.limit {
                    truncated = true;
                    break 'scan;
                }
                if let Some(common) = rollup(&blob.key) {
                    after = Some(format!("{common}{PAST_PREFIX}"));
                    last_key = Some(common.clone());
                    common_prefixes.push(common);
                    continue 'scan;
                }
                after = Some(blob.key.clone());
                last_key = Some(blob.key.clone());
                objects.push(object_info(bucket, &blob.key, blob));
            }
            if !chunk.truncated {
                break;
            }
        }

        Ok(ObjectListing {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            delimiter: delimiter.map(str::to_string),
            objects: Listing::new(objects, truncated, last_key.as_deref()),
            common_prefixes,
        })
    }

    // ------------------------------------------------------------------
    // Multipart uploads
    // ------------------------------------------------------------------

    /// Start an upload; the object's metadata is fixed here.
    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        meta: ObjectMeta,
        scope: &Scope,
    ) -> Result<MultipartUpload, ServiceError> {
        limits::validate_key("object key", key)?;
        self.owned_bucket(bucket, scope).await?;
        let upload_id = records::generate_id("", &format!("{bucket}/{key}"));
        let mut metadata = encode_meta(meta);
        metadata.insert(UPLOAD_KEY.to_string(), key.to_string());
        self.engine
            .put_blob(
                &bucket_id(bucket),
                BlobDraft::new(upload_key(&upload_id), Bytes::new()).with_metadata(metadata),
            )
            .await?;
        info!(bucket = %bucket, key, upload_id, "multipart_upload_started");
        Ok(MultipartUpload {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
        })
    }

    /// Store one part. Uploading the same part number again replaces it.
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
        scope: &Scope,
    ) -> Result<PartInfo, ServiceError> {
        limits::validate_key("object key", key)?;
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(ServiceError::validation(format!(
                "part number must be between 1 and {MAX_PART_NUMBER}"
            )));
        }
        self.check_size(data.len())?;
        self.owned_bucket(bucket, scope).await?;
        let id = bucket_id(bucket);
        self.open_upload(&id, key, upload_id).await?;

        let blob = self
            .engine
            .put_blob(&id, BlobDraft::new(part_key(upload_id, part_number), data))
            .await?;
        // An abort that ran meanwhile would leave this part behind.
        if let Err(e) = self.open_upload(&id, key, upload_id).await {
            self.engine.delete_blob(&id, &blob.key).await?;
            return Err(e);
        }
        debug!(bucket = %bucket, key, upload_id, part_number, size = blob.size, "part_stored");
        Ok(PartInfo {
            part_number,
            etag: etag_of(&blob),
            size: blob.size,
        })
    }

    /// Join the listed parts, in order, into the object.
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
        scope: &Scope,
    ) -> Result<ObjectInfo, ServiceError> {
        limits::validate_key("object key", key)?;
        if parts.is_empty() {
            return Err(ServiceError::validation("at least one part is required"));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(ServiceError::validation("parts must be listed in ascending order"));
        }
        self.owned_bucket(bucket, scope).await?;
        let id = bucket_id(bucket);
        let marker = self.open_upload(&id, key, upload_id).await?;

        let mut body = BytesMut::new();
        for part in parts {
            let missing = || {
                ServiceError::validation(format!(
                    "part {} was not uploaded or its etag does not match",
                    part.part_number
                ))
            };
            let (blob, data) = match self
                .engine
                .get_blob(&id, &part_key(upload_id, part.part_number))
                .await
            {
                Ok(found) => found,
                Err(EngineError::BlobNotFound { .. }) => return Err(missing()),
                Err(e) => return Err(e.into()),
            };
            if part.etag.trim_matches('"') != etag_of(&blob) {
                return Err(missing());
            }
            body.extend_from_slice(&data);
            self.check_size(body.len())?;
        }

        let mut metadata = marker.metadata;
        metadata.remove(UPLOAD_KEY);
        let info = self.store(bucket, key, body.freeze(), metadata).await?;
        self.discard_upload(&id, upload_id).await?;
        info!(bucket = %bucket, key, upload_id, parts = parts.len(), "multipart_upload_completed");
        Ok(info)
    }

    /// Drop an upload and its parts.
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        scope: &Scope,
    ) -> Result<bool, ServiceError> {
        limits::validate_key("object key", key)?;
        self.owned_bucket(bucket, scope).await?;
        let id = bucket_id(bucket);
        self.open_upload(&id, key, upload_id).await?;
        let parts = self.discard_upload(&id, upload_id).await?;
        info!(bucket = %bucket, key, upload_id, parts, "multipart_upload_aborted");
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// The bucket's record, if `scope` may use it.
    async fn owned_bucket(&self, name: &str, scope: &Scope) -> Result<ResourceRecord, ServiceError> {
        let record = self.engine.get(&bucket_id(name)).await?;
        if !scope.is_default() && record.owner_scope != *scope {
            debug!(bucket = %name, %scope, owner = %record.owner_scope, "bucket access denied");
            return Err(ServiceError::access_denied(Resource::Bucket, name));
        }
        Ok(record)
    }

    fn check_size(&self, size: usize) -> Result<(), ServiceError> {
        if size as u64 > self.limits.max_object_bytes {
            return Err(ServiceError::validation(format!(
                "object of {size} bytes exceeds the {} byte limit",
                self.limits.max_object_bytes
            )));
        }
        Ok(())
    }

    /// Write the current object, and its archived copy when the bucket
    /// hands out versions. Both share one payload.
    async fn store(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        mut metadata: BTreeMap<String, String>,
    ) -> Result<ObjectInfo, ServiceError> {
        let id = bucket_id(bucket);
        let archive = data.clone();
        let (_, blob) = self
            .engine
            .put_blob_with(&id, |attrs| {
                match next_version(attrs) {
                    Some(version) => metadata.insert(VERSION_ID.to_string(), version),
                    None => metadata.remove(VERSION_ID),
                };
                BlobDraft::new(key, data).with_metadata(metadata)
            })
            .await?;
        if let Some(version) = blob.metadata.get(VERSION_ID) {
            let draft =
                BlobDraft::new(version_key(key, version), archive).with_metadata(blob.metadata.clone());
            self.engine.put_blob(&id, draft).await?;
        }
        info!(
            bucket = %bucket,
            key,
            size = blob.size,
            version = blob.metadata.get(VERSION_ID).map(String::as_str),
            "object_stored"
        );
        Ok(object_info(bucket, key, &blob))
    }

    /// Make the newest archived version current, or remove the current
    /// object when none is left.
    async fn restore_latest(&self, id: &ResourceId, key: &str) -> Result<(), ServiceError> {
        let prefix = version_prefix(key);
        let mut after: Option<String> = None;
        loop {
            let page = self
                .engine
                .list_blobs(id, &prefix, after.as_deref(), MAX_PAGE_SIZE)
                .await?;
            if let Some(last) = page.items.last() {
                after = Some(last.key.clone());
            }
            if !page.truncated {
                break;
            }
        }
        match after {
            Some(latest) => {
                let (blob, data) = self.engine.get_blob(id, &latest).await?;
                self.engine
                    .put_blob(id, BlobDraft::new(key, data).with_metadata(blob.metadata))
                    .await?;
            }
            None => {
                self.engine.delete_blob(id, key).await?;
            }
        }
        Ok(())
    }

    /// The upload's marker, if it exists and belongs to `key`.
    async fn open_upload(
        &self,
        id: &ResourceId,
        key: &str,
        upload_id: &str,
    ) -> Result<BlobObject, ServiceError> {
        let missing = || ServiceError::not_found(Resource::Upload, upload_id);
        if upload_id.is_empty() || upload_id.contains('\0') {
            return Err(missing());
        }
        let marker = match self.engine.head_blob(id, &upload_key(upload_id)).await {
            Ok(marker) => marker,
            Err(EngineError::BlobNotFound { .. }) => return Err(missing()),
            Err(e) => return Err(e.into()),
        };
        if marker.metadata.get(UPLOAD_KEY).map(String::as_str) != Some(key) {
            return Err(missing());
        }
        Ok(marker)
    }

    /// Delete an upload's parts, then its marker. Returns the part count.
    async fn discard_upload(&self, id: &ResourceId, upload_id: &str) -> Result<usize, ServiceError> {
        let marker = upload_key(upload_id);
        let mut keys = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self
                .engine
                .list_blobs(id, &format!("{marker}\0"), after.as_deref(), MAX_PAGE_SIZE)
                .await?;
            after = page.items.last().map(|b| b.key.clone());
            keys.extend(page.items.into_iter().map(|b| b.key));
            if !page.truncated {
                break;
            }
        }
        for key in &keys {
            self.engine.delete_blob(id, key).await?;
        }
        self.engine.delete_blob(id, &marker).await?;
        Ok(keys.len())
    }
}

fn bucket_id(name: &str) -> ResourceId {
    ResourceId::new(ResourceKind::Bucket, name)
}

fn bucket_info(record: &ResourceRecord) -> BucketInfo {
    BucketInfo {
        name: record.id.name().to_string(),
        scope: record.owner_scope.to_string(),
        created_at: record.created_at,
    }
}

fn versioning_of(attrs: &Attributes) -> Option<VersioningStatus> {
    attrs.get(VERSIONING).and_then(|s| VersioningStatus::parse(s))
}

/// Allocate the next version id when versioning is enabled.
///
/// Ids are zero-padded so they sort in write order.
fn next_version(attrs: &mut Attributes) -> Option<String> {
    if versioning_of(attrs) != Some(VersioningStatus::Enabled) {
        return None;
    }
    let seq = attrs
        .get(VERSION_SEQ)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    attrs.insert(VERSION_SEQ.to_string(), seq.to_string());
    Some(format!("{seq:016x}"))
}

fn checked_version(version: &str) -> Result<&str, ServiceError> {
    if version.is_empty() || version.contains('\0') {
        return Err(ServiceError::not_found(Resource::Version, version));
    }
    Ok(version)
}

fn version_prefix(key: &str) -> String {
    format!("{VERSIONS}{key}\0")
}

fn version_key(key: &str, version: &str) -> String {
    format!("{}{version}", version_prefix(key))
}

fn upload_key(upload_id: &str) -> String {
    format!("{UPLOADS}{upload_id}")
}

fn part_key(upload_id: &str, part_number: u32) -> String {
    format!("{UPLOADS}{upload_id}\0{part_number:05}")
}

/// Report a missing blob as a missing `resource` instead of an object.
fn missing_as(resource: Resource, name: &str) -> impl FnOnce(EngineError) -> ServiceError + '_ {
    move |e| match e {
        EngineError::BlobNotFound { .. } => ServiceError::not_found(resource, name),
        e => e.into(),
    }
}

fn encode_meta(meta: ObjectMeta) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = meta
        .user
        .into_iter()
        .map(|(k, v)| (format!("{USER_META_PREFIX}{}", k.to_ascii_lowercase()), v))
        .collect();
    if let Some(ct) = meta.content_type {
        out.insert(CONTENT_TYPE.to_string(), ct);
    }
    out
}

fn decode_meta(stored: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        content_type: stored.get(CONTENT_TYPE).cloned(),
        user: stored
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(USER_META_PREFIX)
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect(),
    }
}

fn etag_of(blob: &BlobObject) -> String {
    blob.content_hash.to_string()[..32].to_string()
}

fn object_info(bucket: &str, key: &str, blob: &BlobObject) -> ObjectInfo {
    ObjectInfo {
        bucket: bucket.to_string(),
        key: key.to_string(),
        size: blob.size,
        etag: etag_of(blob),
        meta: decode_meta(&blob.metadata),
        last_modified: blob.created_at,
        version_id: blob.metadata.get(VERSION_ID).cloned(),
    }
}
