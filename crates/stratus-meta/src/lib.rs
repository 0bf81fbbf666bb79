//! Metadata persistence layer wrapping Fjall.
//!
//! [`MetaStore`] provides typed accessors over five keyspaces:
//!
//! - `records` — [`ResourceId`](stratus_types::ResourceId) → serialized
//!   [`ResourceRecord`](stratus_types::ResourceRecord)
//! - `blob_index` — `resource_id \0 key` → serialized
//!   [`BlobObject`](stratus_types::BlobObject)
//! - `blob_refs` — [`BlobAddress`](stratus_types::BlobAddress) → reference count
//! - `tombstones` — resource id → deletion time (ms)
//! - `purge_marks` — resource id → mark time (ms), present while a cascade
//!   delete is in progress
//!
//! Writes go through [`MetaBatch`], which commits atomically on both the
//! Fjall backend and the in-memory backend.

mod batch;
mod error;
mod store;

pub use batch::MetaBatch;
pub use error::MetaError;
pub use store::MetaStore;
