//! Shared test utilities for stratus-engine tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use stratus_meta::MetaStore;
use stratus_store::{BlobStore, MemoryStore, SlowStore};
use stratus_types::{Attributes, ResourceId, ResourceKind, Scope};

use crate::engine::{EngineConfig, StorageEngine};

pub const TEST_MAX_BYTES: u64 = 1_000_000_000;

/// Generate deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// An engine over in-memory metadata and blobs.
pub fn memory_engine() -> StorageEngine {
    engine_with(
        EngineConfig::default(),
        Arc::new(MemoryStore::new(TEST_MAX_BYTES)),
    )
}

/// An engine over a temporary fjall database and the given blob store.
pub fn engine_with(config: EngineConfig, blobs: Arc<dyn BlobStore>) -> StorageEngine {
    let meta = Arc::new(MetaStore::open_temporary().unwrap());
    StorageEngine::new(config, meta, blobs)
}

/// An engine whose blob reads can be made to fail.
pub fn flaky_engine() -> (StorageEngine, Arc<SlowStore>) {
    let slow = Arc::new(SlowStore::new(Arc::new(MemoryStore::new(TEST_MAX_BYTES))));
    let engine = engine_with(EngineConfig::default(), slow.clone());
    (engine, slow)
}

pub fn bucket(name: &str) -> ResourceId {
    ResourceId::new(ResourceKind::Bucket, name)
}

pub fn scope() -> Scope {
    Scope::new("tenant-a")
}

pub fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>()
}
