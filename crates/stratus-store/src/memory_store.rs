//! In-memory blob storage backend.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use stratus_types::BlobAddress;
use tracing::debug;

use crate::error::StoreError;
use crate::traits::BlobStore;

#[derive(Default)]
struct Payloads {
    by_addr: HashMap<BlobAddress, Bytes>,
    used: u64,
}

/// Blob store held entirely in process memory.
///
/// Used by `--memory` mode and by tests. A write that would take the total
/// past `max_bytes` fails with [`StoreError::CapacityExceeded`].
pub struct MemoryStore {
    payloads: RwLock<Payloads>,
    max_bytes: u64,
}

impl MemoryStore {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            payloads: RwLock::new(Payloads::default()),
            max_bytes,
        }
    }

    /// Total payload bytes currently held.
    pub fn used_bytes(&self) -> u64 {
        self.payloads.read().expect("lock poisoned").used
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, addr: BlobAddress, data: Bytes) -> Result<(), StoreError> {
        let mut payloads = self.payloads.write().expect("lock poisoned");
        // An address always names the same bytes; the first copy stays.
        if payloads.by_addr.contains_key(&addr) {
            return Ok(());
        }
        let size = data.len() as u64;
        let available = self.max_bytes.saturating_sub(payloads.used);
        if size > available {
            return Err(StoreError::CapacityExceeded {
                needed: size,
                available,
            });
        }
        debug!(%addr, size, "blob held in memory");
        payloads.used += size;
        payloads.by_addr.insert(addr, data);
        Ok(())
    }

    async fn get(&self, addr: BlobAddress) -> Result<Option<Bytes>, StoreError> {
        let payloads = self.payloads.read().expect("lock poisoned");
        Ok(payloads.by_addr.get(&addr).cloned())
    }

    async fn delete(&self, addr: BlobAddress) -> Result<(), StoreError> {
        let mut payloads = self.payloads.write().expect("lock poisoned");
        if let Some(data) = payloads.by_addr.remove(&addr) {
            payloads.used -= data.len() as u64;
            debug!(%addr, "blob released from memory");
        }
        Ok(())
    }

    async fn contains(&self, addr: BlobAddress) -> Result<bool, StoreError> {
        let payloads = self.payloads.read().expect("lock poisoned");
        Ok(payloads.by_addr.contains_key(&addr))
    }

    async fn list(&self) -> Result<Vec<BlobAddress>, StoreError> {
        let payloads = self.payloads.read().expect("lock poisoned");
        Ok(payloads.by_addr.keys().copied().collect())
    }
}
