//! Typed requests and outcomes exchanged between codecs and handlers.

use std::collections::BTreeMap;

use bytes::Bytes;
use stratus_protocol::Action;
use stratus_types::{Dialect, Scope};

use crate::cursor::{Listing, PageRequest};

/// Per-request facts the dispatcher establishes before calling a handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub dialect: Dialect,
    /// Owner of everything created by this request.
    pub scope: Scope,
    pub request_id: String,
}

impl RequestContext {
    pub fn new(dialect: Dialect, scope: Scope, request_id: impl Into<String>) -> Self {
        Self {
            dialect,
            scope,
            request_id: request_id.into(),
        }
    }
}

/// Content type and user metadata carried with an object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMeta {
    pub content_type: Option<String>,
    /// User metadata with the provider prefix stripped (`x-amz-meta-owner`
    /// is stored as `owner`).
    pub user: BTreeMap<String, String>,
}

/// Parameters for launching a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRequest {
    /// Caller-chosen name; generated when absent.
    pub name: Option<String>,
    pub image: String,
    pub command: Vec<String>,
    pub cpus: u32,
    pub memory_mb: u32,
    /// Provider-side placement label (zone, availability domain).
    pub zone: Option<String>,
}

/// Bucket versioning state. A bucket that was never configured has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersioningStatus {
    /// Every write gets a version id and older versions stay readable.
    Enabled,
    /// New writes replace the current object; existing versions are kept.
    Suspended,
}

impl VersioningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "Enabled",
            Self::Suspended => "Suspended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Enabled" => Some(Self::Enabled),
            "Suspended" => Some(Self::Suspended),
            _ => None,
        }
    }
}

/// A part named in a multipart completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    /// ETag returned by the part upload, quoted or not.
    pub etag: String,
}

/// A `TERM_MATCH`-style equality filter on a price attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceFilter {
    pub field: String,
    pub value: String,
}

/// One canonical operation with typed arguments.
#[derive(Debug, Clone)]
pub enum ServiceRequest {
    CreateBucket { name: String },
    DeleteBucket { name: String },
    HeadBucket { name: String },
    ListBuckets,
    PutObject {
        bucket: String,
        key: String,
        data: Bytes,
        meta: ObjectMeta,
    },
    GetObject {
        bucket: String,
        key: String,
        version_id: Option<String>,
    },
    HeadObject {
        bucket: String,
        key: String,
        version_id: Option<String>,
    },
    DeleteObject {
        bucket: String,
        key: String,
        version_id: Option<String>,
    },
    ListObjects {
        bucket: String,
        prefix: String,
        delimiter: Option<String>,
        page: PageRequest,
    },
    GetBucketVersioning { bucket: String },
    PutBucketVersioning {
        bucket: String,
        status: VersioningStatus,
    },
    CreateMultipartUpload {
        bucket: String,
        key: String,
        meta: ObjectMeta,
    },
    UploadPart {
        bucket: String,
        key: String,
        upload_id: String,
        part_number: u32,
        data: Bytes,
    },
    CompleteMultipartUpload {
        bucket: String,
        key: String,
        upload_id: String,
        parts: Vec<CompletedPart>,
    },
    AbortMultipartUpload {
        bucket: String,
        key: String,
        upload_id: String,
    },

    CreateTable { name: String, key_attribute: String },
    DeleteTable { name: String },
    DescribeTable { name: String },
    ListTables { page: PageRequest },
    PutItem {
        table: String,
        /// Explicit key; otherwise read from the item's key attribute.
        key: Option<String>,
        item: serde_json::Value,
        /// Create the table on first write (Firestore collections).
        create_table: bool,
    },
    GetItem { table: String, key: String },
    DeleteItem { table: String, key: String },
    Scan { table: String, page: PageRequest },

    CreateQueue {
        name: String,
        attributes: BTreeMap<String, String>,
    },
    DeleteQueue { name: String },
    GetQueue { name: String },
    ListQueues { prefix: String, page: PageRequest },
    SendMessage {
        queue: String,
        body: String,
        attributes: BTreeMap<String, String>,
    },
    ReceiveMessages { queue: String, max: usize },
    DeleteMessage { queue: String, receipt: String },

    CreateWorkload(WorkloadRequest),
    GetWorkload { id: String },
    ListWorkloads,
    DeleteWorkload { id: String },
    CreateVolume { id: Option<String>, size_bytes: u64 },
    AttachVolume { workload: String, volume: String },

    GetPrice { product_code: String },
    ListPrices {
        service_code: Option<String>,
        filters: Vec<PriceFilter>,
        page: PageRequest,
    },
    ListPriceServices,
}

impl ServiceRequest {
    /// The canonical action this request performs.
    pub fn action(&self) -> Action {
        match self {
            Self::CreateBucket { .. } => Action::CreateBucket,
            Self::DeleteBucket { .. } => Action::DeleteBucket,
            Self::HeadBucket { .. } => Action::HeadBucket,
            Self::ListBuckets => Action::ListBuckets,
            Self::PutObject { .. } => Action::PutObject,
            Self::GetObject { .. } => Action::GetObject,
            Self::HeadObject { .. } => Action::HeadObject,
            Self::DeleteObject { .. } => Action::DeleteObject,
            Self::ListObjects { .. } => Action::ListObjects,
            Self::GetBucketVersioning { .. } => Action::GetBucketVersioning,
            Self::PutBucketVersioning { .. } => Action::PutBucketVersioning,
            Self::CreateMultipartUpload { .. } => Action::CreateMultipartUpload,
            Self::UploadPart { .. } => Action::UploadPart,
            Self::CompleteMultipartUpload { .. } => Action::CompleteMultipartUpload,
            Self::AbortMultipartUpload { .. } => Action::AbortMultipartUpload,
            Self::CreateTable { .. } => Action::CreateTable,
            Self::DeleteTable { .. } => Action::DeleteTable,
            Self::DescribeTable { .. } => Action::DescribeTable,
            Self::ListTables { .. } => Action::ListTables,
            Self::PutItem { .. } => Action::PutItem,
            Self::GetItem { .. } => Action::GetItem,
            Self::DeleteItem { .. } => Action::DeleteItem,
            Self::Scan { .. } => Action::Scan,
            Self::CreateQueue { .. } => Action::CreateQueue,
            Self::DeleteQueue { .. } => Action::DeleteQueue,
            Self::GetQueue { .. } => Action::GetQueue,
            Self::ListQueues { .. } => Action::ListQueues,
            Self::SendMessage { .. } => Action::SendMessage,
            Self::ReceiveMessages { .. } => Action::ReceiveMessages,
            Self::DeleteMessage { .. } => Action::DeleteMessage,
            Self::CreateWorkload(_) => Action::CreateWorkload,
            Self::GetWorkload { .. } => Action::GetWorkload,
            Self::ListWorkloads => Action::ListWorkloads,
            Self::DeleteWorkload { .. } => Action::DeleteWorkload,
            Self::CreateVolume { .. } => Action::CreateVolume,
            Self::AttachVolume { .. } => Action::AttachVolume,
            Self::GetPrice { .. } => Action::GetPrice,
            Self::ListPrices { .. } => Action::ListPrices,
            Self::ListPriceServices => Action::ListPriceServices,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub scope: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    /// Hex content hash, quoted by codecs that need an ETag.
    pub etag: String,
    pub meta: ObjectMeta,
    pub last_modified: u64,
    /// Set when the object was written to a versioning-enabled bucket.
    pub version_id: Option<String>,
}

/// Result of deleting an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRemoval {
    pub existed: bool,
    /// The version removed, or the delete marker's version.
    pub version_id: Option<String>,
    /// The delete only hid the object behind a new version.
    pub delete_marker: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartUpload {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    pub part_number: u32,
    pub etag: String,
    pub size: u64,
}

/// A page of objects; `common_prefixes` is filled when a delimiter was given.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectListing {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub objects: Listing<ObjectInfo>,
    pub common_prefixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub key_attribute: String,
    pub created_at: u64,
    /// Filled by `describe_table` only.
    pub item_count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemInfo {
    pub table: String,
    pub key: String,
    pub document: serde_json::Value,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub scope: String,
    pub attributes: BTreeMap<String, String>,
    pub created_at: u64,
    pub approximate_messages: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub message_id: String,
    /// Handle passed back to delete the message.
    pub receipt: String,
    pub body: String,
    pub attributes: BTreeMap<String, String>,
    pub sent_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadInfo {
    pub id: String,
    pub image: String,
    /// `pending`, `running`, `stopped` or `terminated`.
    pub state: String,
    pub ip_address: Option<String>,
    pub volumes: Vec<String>,
    pub zone: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub id: String,
    pub size_bytes: u64,
    pub created_at: u64,
}

/// A static catalog entry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceItem {
    /// Provider the entry belongs to.
    pub dialect: Dialect,
    pub service_code: String,
    /// SKU / part number, unique within a provider.
    pub product_code: String,
    pub description: String,
    pub region: String,
    pub unit: String,
    pub unit_price: f64,
    pub currency: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A successful handler result.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Bucket(BucketInfo),
    Buckets(Vec<BucketInfo>),
    Object(ObjectInfo),
    ObjectData { info: ObjectInfo, data: Bytes },
    Objects(ObjectListing),
    ObjectDeleted(ObjectRemoval),
    Versioning {
        bucket: String,
        status: Option<VersioningStatus>,
    },
    Upload(MultipartUpload),
    Part(PartInfo),
    Table(TableInfo),
    Tables(Listing<TableInfo>),
    Item(ItemInfo),
    Items(Listing<ItemInfo>),
    Queue(QueueInfo),
    Queues(Listing<QueueInfo>),
    MessageSent(MessageInfo),
    Messages(Vec<MessageInfo>),
    Workload(WorkloadInfo),
    Workloads(Vec<WorkloadInfo>),
    Volume(VolumeInfo),
    Attached { workload: String, volume: String },
    Price(PriceItem),
    Prices(Listing<PriceItem>),
    PriceServices(Vec<String>),
    /// A delete completed; `existed` is false for idempotent no-ops and
    /// tombstone hits.
    Deleted { existed: bool },
}
