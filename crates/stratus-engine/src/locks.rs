//! Keyed async lock table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stratus_types::ResourceId;
use tokio::sync::OwnedMutexGuard;

/// Slots are pruned once the table grows past this many entries.
const PRUNE_THRESHOLD: usize = 1024;

/// Hands out one async mutex per resource id.
///
/// The engine serializes its own mutations on one of these; callers that
/// need a wider critical section keep a separate table.
///
/// A slot is only removed while nobody holds or waits on it (its `Arc` is
/// referenced by the table alone), so two writers can never end up on
/// different mutexes for the same id.
#[derive(Default)]
pub struct LockTable {
    slots: Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockTable {
    /// Wait for exclusive access to `id`.
    pub async fn lock(&self, id: &ResourceId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().expect("lock poisoned");
            if slots.len() > PRUNE_THRESHOLD {
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            Arc::clone(slots.entry(id.clone()).or_default())
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().expect("lock poisoned").len()
    }
}
