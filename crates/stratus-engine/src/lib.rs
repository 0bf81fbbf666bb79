//! Storage engine tying the metadata store and the blob store together.
//!
//! The [`StorageEngine`] is the only path to persisted state. It exposes
//! record operations (`get`, `put`, `create`, `update`, `delete`, `list`)
//! and blob operations (`put_blob`, `get_blob`, `delete_blob`,
//! `list_blobs`), and guarantees:
//!
//! - every mutation commits its metadata in one atomic batch, after its
//!   payload bytes are safely in the blob store;
//! - mutations to the same resource id are serialized, different ids run
//!   concurrently;
//! - deletes cascade to blobs through a mark-then-purge sequence that
//!   [`StorageEngine::recover`] resumes after a crash.

pub mod engine;
pub mod error;
mod locks;

pub use engine::{BlobDraft, DeleteOutcome, EngineConfig, Page, StorageEngine};
pub use error::EngineError;
pub use locks::LockTable;

#[cfg(test)]
mod tests;
