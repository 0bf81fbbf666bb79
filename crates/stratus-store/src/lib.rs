//! Blob storage trait and backend implementations.
//!
//! This crate defines the [`BlobStore`] trait for persisting payload bytes
//! at a [`BlobAddress`](stratus_types::BlobAddress), along with the concrete
//! backends:
//!
//! - [`MemoryStore`] — in-memory storage backed by a `RwLock<HashMap>`.
//! - [`FileStore`] — one file per blob with a 2-level fan-out directory layout.
//! - [`SlowStore`] — latency and fault injection for tests.

mod error;
mod file_store;
mod memory_store;
mod slow_store;
mod traits;

pub use error::StoreError;
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use slow_store::SlowStore;
pub use traits::BlobStore;
