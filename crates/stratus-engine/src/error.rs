//! Error types for the storage engine.

use stratus_types::{ContentHash, ResourceId};

/// Errors that can occur during engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Failed to access the metadata store.
    #[error("metadata error: {0}")]
    Meta(#[from] stratus_meta::MetaError),

    /// Failed to access the blob store.
    #[error("blob store error: {0}")]
    Store(#[from] stratus_store::StoreError),

    /// The resource does not exist (or is being deleted).
    #[error("resource not found: {id}")]
    NotFound {
        /// Resource id.
        id: ResourceId,
    },

    /// The blob does not exist under its resource.
    #[error("blob not found: {id} key={key}")]
    BlobNotFound {
        /// Owning resource id.
        id: ResourceId,
        /// Blob key.
        key: String,
    },

    /// A create hit an existing resource.
    #[error("resource already exists: {id}")]
    AlreadyExists {
        /// Resource id.
        id: ResourceId,
    },

    /// Optimistic version check failed.
    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        /// Resource id.
        id: ResourceId,
        /// Version the caller read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// Blob bytes on disk do not hash to the indexed content hash.
    #[error("blob corruption detected: {id} key={key}: expected {expected}, actual {actual}")]
    CorruptBlob {
        /// Owning resource id.
        id: ResourceId,
        /// Blob key.
        key: String,
        /// Hash recorded in the index.
        expected: ContentHash,
        /// Hash of the bytes actually read.
        actual: ContentHash,
    },

    /// The index references a payload the blob store does not have.
    #[error("blob payload missing: {id} key={key}")]
    MissingPayload {
        /// Owning resource id.
        id: ResourceId,
        /// Blob key.
        key: String,
    },
}

impl EngineError {
    /// Whether the failure is in the storage layer itself rather than in
    /// the request (`StorageUnavailable`).
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Meta(_) | Self::Store(_) | Self::CorruptBlob { .. } | Self::MissingPayload { .. }
        )
    }
}
