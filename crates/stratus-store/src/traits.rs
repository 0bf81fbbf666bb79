//! Core trait for blob storage.

use bytes::Bytes;
use stratus_types::BlobAddress;

use crate::error::StoreError;

/// Trait for storing and retrieving blob payloads.
///
/// Payloads are immutable once written: a given address always holds the
/// same bytes, so `put` on an existing address is a no-op in effect.
/// Visibility to readers is decided by the metadata index, not by the store.
///
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a payload at the given address.
    async fn put(&self, addr: BlobAddress, data: Bytes) -> Result<(), StoreError>;

    /// Retrieve a payload. Returns `None` if nothing is stored there.
    async fn get(&self, addr: BlobAddress) -> Result<Option<Bytes>, StoreError>;

    /// Delete a payload. Deleting a missing address succeeds.
    async fn delete(&self, addr: BlobAddress) -> Result<(), StoreError>;

    /// Check whether a payload exists.
    async fn contains(&self, addr: BlobAddress) -> Result<bool, StoreError>;

    /// List every stored address.
    async fn list(&self) -> Result<Vec<BlobAddress>, StoreError>;
}
