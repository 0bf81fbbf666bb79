//! Error taxonomy shared by every handler.

use std::fmt;

use stratus_driver::DriverError;
use stratus_engine::EngineError;
use stratus_types::{ResourceId, ResourceKind};

/// The kind of thing a not-found or already-exists error refers to.
///
/// Codecs use it to pick provider error codes (`NoSuchBucket` versus
/// `NoSuchKey`, `ResourceNotFoundException`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Bucket,
    Object,
    Table,
    Item,
    Queue,
    Message,
    Workload,
    Volume,
    Network,
    Price,
    IdempotencyToken,
    Version,
    Upload,
}

impl Resource {
    /// Lower-case name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::Object => "object",
            Self::Table => "table",
            Self::Item => "item",
            Self::Queue => "queue",
            Self::Message => "message",
            Self::Workload => "workload",
            Self::Volume => "volume",
            Self::Network => "network",
            Self::Price => "price",
            Self::IdempotencyToken => "idempotency token",
            Self::Version => "object version",
            Self::Upload => "multipart upload",
        }
    }

    fn of_record(id: &ResourceId) -> Self {
        match id.kind() {
            Some(ResourceKind::Bucket) => Self::Bucket,
            Some(ResourceKind::Table) => Self::Table,
            Some(ResourceKind::Queue) => Self::Queue,
            Some(ResourceKind::Workload) => Self::Workload,
            Some(ResourceKind::Volume) => Self::Volume,
            Some(ResourceKind::Idempotency) | None => Self::IdempotencyToken,
        }
    }

    /// What a blob under a record of this kind represents.
    fn of_blob(id: &ResourceId) -> Self {
        match id.kind() {
            Some(ResourceKind::Bucket) => Self::Object,
            Some(ResourceKind::Table) => Self::Item,
            Some(ResourceKind::Queue) => Self::Message,
            _ => Self::of_record(id),
        }
    }

    fn of_driver(kind: &str) -> Self {
        match kind {
            "workload" => Self::Workload,
            "volume" => Self::Volume,
            _ => Self::Network,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by service handlers.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed or out-of-range input, rejected before any storage call.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{resource} not found: {name}")]
    NotFound { resource: Resource, name: String },

    #[error("{resource} already exists: {name}")]
    AlreadyExists { resource: Resource, name: String },

    /// The resource exists but is owned by another scope.
    #[error("access denied to {resource} {name}")]
    AccessDenied { resource: Resource, name: String },

    /// Optimistic concurrency or state conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation is recognised but this backend cannot perform it.
    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] EngineError),

    #[error("driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("driver timed out: {0}")]
    DriverTimeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn not_found(resource: Resource, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            name: name.into(),
        }
    }

    pub(crate) fn already_exists(resource: Resource, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource,
            name: name.into(),
        }
    }

    pub(crate) fn access_denied(resource: Resource, name: impl Into<String>) -> Self {
        Self::AccessDenied {
            resource,
            name: name.into(),
        }
    }

    /// Whether a read may be retried (`StorageUnavailable`).
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Stable name of the error kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::NotFound { .. } => "NotFound",
            Self::AlreadyExists { .. } => "AlreadyExists",
            Self::AccessDenied { .. } => "AccessDenied",
            Self::Conflict(_) => "Conflict",
            Self::Unsupported(_) => "Unsupported",
            Self::StorageUnavailable(_) => "StorageUnavailable",
            Self::DriverUnavailable(_) => "DriverUnavailable",
            Self::DriverTimeout(_) => "DriverTimeout",
            Self::Internal(_) => "Internal",
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotFound { id } => Self::not_found(Resource::of_record(&id), id.name()),
            EngineError::BlobNotFound { id, key } => Self::not_found(Resource::of_blob(&id), key),
            EngineError::AlreadyExists { id } => {
                Self::already_exists(Resource::of_record(&id), id.name())
            }
            EngineError::Conflict {
                id,
                expected,
                actual,
            } => Self::Conflict(format!(
                "{id} is at version {actual}, expected {expected}"
            )),
            other => Self::StorageUnavailable(other),
        }
    }
}

impl From<DriverError> for ServiceError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::NotFound { kind, id } => Self::not_found(Resource::of_driver(kind), id),
            DriverError::AlreadyExists { kind, id } => {
                Self::already_exists(Resource::of_driver(kind), id)
            }
            DriverError::InvalidArgument(message) => Self::Validation(message),
            DriverError::Unsupported { .. } => Self::Unsupported(e.to_string()),
            DriverError::Timeout { .. } => Self::DriverTimeout(e.to_string()),
            DriverError::Unavailable { .. }
            | DriverError::CapabilityUnavailable(_)
            | DriverError::Io(_) => Self::DriverUnavailable(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("json: {e}"))
    }
}
