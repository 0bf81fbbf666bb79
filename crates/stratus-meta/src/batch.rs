//! [`MetaBatch`] — an atomic group of metadata writes.

use stratus_types::{BlobAddress, BlobObject, ResourceId, ResourceRecord};

use crate::MetaError;

/// Keyspaces addressable from a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Space {
    Records,
    BlobIndex,
    BlobRefs,
    Tombstones,
    PurgeMarks,
}

impl Space {
    pub(crate) const ALL: [Space; 5] = [
        Space::Records,
        Space::BlobIndex,
        Space::BlobRefs,
        Space::Tombstones,
        Space::PurgeMarks,
    ];

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Records => "records",
            Self::BlobIndex => "blob_index",
            Self::BlobRefs => "blob_refs",
            Self::Tombstones => "tombstones",
            Self::PurgeMarks => "purge_marks",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Records => 0,
            Self::BlobIndex => 1,
            Self::BlobRefs => 2,
            Self::Tombstones => 3,
            Self::PurgeMarks => 4,
        }
    }
}

#[derive(Debug)]
pub(crate) enum BatchOp {
    Insert(Space, Vec<u8>, Vec<u8>),
    Remove(Space, Vec<u8>),
}

/// A set of metadata writes applied all-or-nothing by
/// [`MetaStore::commit`](crate::MetaStore::commit).
///
/// Operations apply in insertion order, so a later write to the same key
/// wins.
#[derive(Debug, Default)]
pub struct MetaBatch {
    pub(crate) ops: Vec<BatchOp>,
}

impl MetaBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Insert or replace a resource record.
    pub fn put_record(&mut self, record: &ResourceRecord) -> Result<&mut Self, MetaError> {
        let value = postcard::to_allocvec(record)?;
        self.ops.push(BatchOp::Insert(
            Space::Records,
            record.id.as_str().as_bytes().to_vec(),
            value,
        ));
        Ok(self)
    }

    /// Remove a resource record.
    pub fn delete_record(&mut self, id: &ResourceId) -> &mut Self {
        self.ops.push(BatchOp::Remove(
            Space::Records,
            id.as_str().as_bytes().to_vec(),
        ));
        self
    }

    /// Insert or replace a blob index entry.
    pub fn put_blob(&mut self, blob: &BlobObject) -> Result<&mut Self, MetaError> {
        let value = postcard::to_allocvec(blob)?;
        self.ops.push(BatchOp::Insert(
            Space::BlobIndex,
            blob_index_key(&blob.resource_id, &blob.key),
            value,
        ));
        Ok(self)
    }

    /// Remove a blob index entry.
    pub fn delete_blob(&mut self, id: &ResourceId, key: &str) -> &mut Self {
        self.ops
            .push(BatchOp::Remove(Space::BlobIndex, blob_index_key(id, key)));
        self
    }

    /// Set the reference count of a physical blob. Zero removes the entry.
    pub fn set_blob_refs(&mut self, addr: &BlobAddress, count: u64) -> &mut Self {
        let key = addr.as_bytes().to_vec();
        if count == 0 {
            self.ops.push(BatchOp::Remove(Space::BlobRefs, key));
        } else {
            self.ops.push(BatchOp::Insert(
                Space::BlobRefs,
                key,
                count.to_be_bytes().to_vec(),
            ));
        }
        self
    }

    /// Record that `id` was deleted at `deleted_at` (ms).
    pub fn put_tombstone(&mut self, id: &ResourceId, deleted_at: u64) -> &mut Self {
        self.ops.push(BatchOp::Insert(
            Space::Tombstones,
            id.as_str().as_bytes().to_vec(),
            deleted_at.to_be_bytes().to_vec(),
        ));
        self
    }

    /// Remove the tombstone of `id`.
    pub fn delete_tombstone(&mut self, id: &ResourceId) -> &mut Self {
        self.ops.push(BatchOp::Remove(
            Space::Tombstones,
            id.as_str().as_bytes().to_vec(),
        ));
        self
    }

    /// Mark `id` as being purged.
    pub fn put_purge_mark(&mut self, id: &ResourceId, marked_at: u64) -> &mut Self {
        self.ops.push(BatchOp::Insert(
            Space::PurgeMarks,
            id.as_str().as_bytes().to_vec(),
            marked_at.to_be_bytes().to_vec(),
        ));
        self
    }

    /// Clear the purge mark of `id`.
    pub fn delete_purge_mark(&mut self, id: &ResourceId) -> &mut Self {
        self.ops.push(BatchOp::Remove(
            Space::PurgeMarks,
            id.as_str().as_bytes().to_vec(),
        ));
        self
    }
}

/// Blob index key: `resource_id \0 key`.
///
/// The NUL separator keeps one resource's blobs contiguous and ordered by
/// key; keys themselves never contain NUL.
pub(crate) fn blob_index_key(id: &ResourceId, key: &str) -> Vec<u8> {
    let mut out = blob_index_prefix(id);
    out.extend_from_slice(key.as_bytes());
    out
}

/// Prefix shared by every blob index key of `id`.
pub(crate) fn blob_index_prefix(id: &ResourceId) -> Vec<u8> {
    let mut out = Vec::with_capacity(id.as_str().len() + 1);
    out.extend_from_slice(id.as_str().as_bytes());
    out.push(0);
    out
}
