//! [`MetaStore`] implementation: Fjall on disk or a pure in-memory map.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use fjall::{Database, Keyspace, KeyspaceCreateOptions, PersistMode};
use stratus_types::{BlobAddress, BlobObject, ResourceId, ResourceRecord};
use tracing::debug;

use crate::MetaError;
use crate::batch::{BatchOp, MetaBatch, Space, blob_index_key, blob_index_prefix};

type Result<T> = std::result::Result<T, MetaError>;

type RawEntry = (Vec<u8>, Vec<u8>);

/// Inner backend: either Fjall-backed (disk) or pure in-memory.
enum Backend {
    Fjall {
        db: Database,
        /// Indexed by [`Space::index`].
        keyspaces: [Keyspace; 5],
    },
    Memory(Box<MemoryBackend>),
}

/// Pure in-memory storage. One lock over every keyspace so a batch
/// applies atomically.
struct MemoryBackend {
    spaces: RwLock<[BTreeMap<Vec<u8>, Vec<u8>>; 5]>,
}

/// Metadata store for resource records, blob indexes and delete bookkeeping.
pub struct MetaStore {
    backend: Backend,
}

impl MetaStore {
    /// Open a persistent MetaStore at the given path.
    ///
    /// Opening an existing directory reopens its keyspaces unchanged.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_fjall(db)
    }

    /// Open a temporary Fjall-backed MetaStore that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir().map_err(std::io::Error::other)?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_fjall(db)
    }

    /// Create a pure in-memory store.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Box::new(MemoryBackend {
                spaces: RwLock::new(Default::default()),
            })),
        }
    }

    fn init_fjall(db: Database) -> Result<Self> {
        let records = db.keyspace(Space::Records.name(), KeyspaceCreateOptions::default)?;
        let blob_index = db.keyspace(Space::BlobIndex.name(), KeyspaceCreateOptions::default)?;
        let blob_refs = db.keyspace(Space::BlobRefs.name(), KeyspaceCreateOptions::default)?;
        let tombstones = db.keyspace(Space::Tombstones.name(), KeyspaceCreateOptions::default)?;
        let purge_marks = db.keyspace(Space::PurgeMarks.name(), KeyspaceCreateOptions::default)?;
        Ok(Self {
            backend: Backend::Fjall {
                db,
                keyspaces: [records, blob_index, blob_refs, tombstones, purge_marks],
            },
        })
    }

    /// Whether this store is the volatile in-memory backend.
    pub fn is_in_memory(&self) -> bool {
        matches!(self.backend, Backend::Memory(_))
    }

    // ----- Writes -----

    /// Apply every operation of `batch` atomically.
    pub fn commit(&self, batch: MetaBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let op_count = batch.len();
        match &self.backend {
            Backend::Fjall { db, keyspaces } => {
                let mut tx = db.batch();
                for op in batch.ops {
                    match op {
                        BatchOp::Insert(space, key, value) => {
                            tx.insert(&keyspaces[space.index()], key, value);
                        }
                        BatchOp::Remove(space, key) => {
                            tx.remove(&keyspaces[space.index()], key);
                        }
                    }
                }
                tx.commit()?;
            }
            Backend::Memory(m) => {
                let mut spaces = m.spaces.write().expect("lock poisoned");
                for op in batch.ops {
                    match op {
                        BatchOp::Insert(space, key, value) => {
                            spaces[space.index()].insert(key, value);
                        }
                        BatchOp::Remove(space, key) => {
                            spaces[space.index()].remove(&key);
                        }
                    }
                }
            }
        }
        debug!(op_count, "committed metadata batch");
        Ok(())
    }

    /// Flush the journal to disk. A no-op for the in-memory backend.
    pub fn persist(&self) -> Result<()> {
        if let Backend::Fjall { db, .. } = &self.backend {
            db.persist(PersistMode::SyncAll)?;
        }
        Ok(())
    }

    // ----- Raw access -----

    fn get_raw(&self, space: Space, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Fjall { keyspaces, .. } => Ok(keyspaces[space.index()]
                .get(key)?
                .map(|v| v.as_ref().to_vec())),
            Backend::Memory(m) => {
                let spaces = m.spaces.read().expect("lock poisoned");
                Ok(spaces[space.index()].get(key).cloned())
            }
        }
    }

    /// Scan entries under `prefix` in key order, skipping keys `<= after`,
    /// returning at most `limit` entries.
    fn scan_raw(
        &self,
        space: Space,
        prefix: &[u8],
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<RawEntry>> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        match &self.backend {
            Backend::Fjall { keyspaces, .. } => {
                for guard in keyspaces[space.index()].prefix(prefix) {
                    let (key, value) = guard.into_inner()?;
                    if after.is_some_and(|a| key.as_ref() <= a) {
                        continue;
                    }
                    out.push((key.as_ref().to_vec(), value.as_ref().to_vec()));
                    if out.len() >= limit {
                        break;
                    }
                }
            }
            Backend::Memory(m) => {
                let spaces = m.spaces.read().expect("lock poisoned");
                let entries = spaces[space.index()]
                    .range(prefix.to_vec()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .filter(|(k, _)| after.is_none_or(|a| k.as_slice() > a))
                    .take(limit);
                for (k, v) in entries {
                    out.push((k.clone(), v.clone()));
                }
            }
        }
        Ok(out)
    }

    // ----- Records -----

    /// Retrieve a resource record by id.
    pub fn get_record(&self, id: &ResourceId) -> Result<Option<ResourceRecord>> {
        match self.get_raw(Space::Records, id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List records whose id starts with `prefix`, in id order.
    ///
    /// `after` is an exclusive lower bound on the full id.
    pub fn list_records(
        &self,
        prefix: &str,
        after: Option<&ResourceId>,
        limit: usize,
    ) -> Result<Vec<ResourceRecord>> {
        let after = after.map(|a| a.as_str().as_bytes());
        self.scan_raw(Space::Records, prefix.as_bytes(), after, limit)?
            .into_iter()
            .map(|(_, v)| postcard::from_bytes(&v).map_err(MetaError::from))
            .collect()
    }

    // ----- Blob index -----

    /// Retrieve the index entry of blob `key` under `id`.
    pub fn get_blob(&self, id: &ResourceId, key: &str) -> Result<Option<BlobObject>> {
        match self.get_raw(Space::BlobIndex, &blob_index_key(id, key))? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List blobs under `id` whose key starts with `key_prefix`, in key order.
    ///
    /// `after` is an exclusive lower bound on the blob key.
    pub fn list_blobs(
        &self,
        id: &ResourceId,
        key_prefix: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<BlobObject>> {
        let mut scan_prefix = blob_index_prefix(id);
        scan_prefix.extend_from_slice(key_prefix.as_bytes());
        let after = after.map(|a| blob_index_key(id, a));
        self.scan_raw(Space::BlobIndex, &scan_prefix, after.as_deref(), limit)?
            .into_iter()
            .map(|(_, v)| postcard::from_bytes(&v).map_err(MetaError::from))
            .collect()
    }

    /// Current reference count of a physical blob.
    pub fn blob_refs(&self, addr: &BlobAddress) -> Result<u64> {
        match self.get_raw(Space::BlobRefs, addr.as_bytes())? {
            Some(bytes) => decode_u64(Space::BlobRefs, &bytes),
            None => Ok(0),
        }
    }

    // ----- Tombstones -----

    /// Deletion time (ms) of a tombstoned id.
    pub fn get_tombstone(&self, id: &ResourceId) -> Result<Option<u64>> {
        self.get_raw(Space::Tombstones, id.as_str().as_bytes())?
            .map(|bytes| decode_u64(Space::Tombstones, &bytes))
            .transpose()
    }

    /// Every tombstone with its deletion time.
    pub fn list_tombstones(&self) -> Result<Vec<(ResourceId, u64)>> {
        self.list_timestamps(Space::Tombstones)
    }

    // ----- Purge marks -----

    /// Mark time (ms) if `id` has a cascade delete in progress.
    pub fn get_purge_mark(&self, id: &ResourceId) -> Result<Option<u64>> {
        self.get_raw(Space::PurgeMarks, id.as_str().as_bytes())?
            .map(|bytes| decode_u64(Space::PurgeMarks, &bytes))
            .transpose()
    }

    /// Every id with a cascade delete in progress.
    pub fn list_purge_marks(&self) -> Result<Vec<(ResourceId, u64)>> {
        self.list_timestamps(Space::PurgeMarks)
    }

    fn list_timestamps(&self, space: Space) -> Result<Vec<(ResourceId, u64)>> {
        self.scan_raw(space, &[], None, usize::MAX)?
            .into_iter()
            .map(|(k, v)| {
                let id = String::from_utf8(k).map_err(|e| MetaError::Corrupt {
                    keyspace: space.name(),
                    detail: e.to_string(),
                })?;
                Ok((ResourceId::from(id), decode_u64(space, &v)?))
            })
            .collect()
    }
}

fn decode_u64(space: Space, bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| MetaError::Corrupt {
        keyspace: space.name(),
        detail: format!("expected 8 bytes, found {}", bytes.len()),
    })?;
    Ok(u64::from_be_bytes(arr))
}
