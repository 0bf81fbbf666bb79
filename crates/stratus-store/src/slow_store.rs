//! A [`BlobStore`] wrapper for exercising slow and failing storage.
//!
//! Each read or write first sleeps for a duration drawn from its latency
//! range (seeded, so runs repeat). Separately, the next `n` reads or writes
//! can be made to fail with [`StoreError::Unavailable`].
//!
//! ```ignore
//! let slow = SlowStore::new(inner)
//!     .read_latency(5, 20)
//!     .write_latency(10, 30)
//!     .seed(42);
//! slow.fail_next_reads(2);
//! ```

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use stratus_types::BlobAddress;

use crate::error::StoreError;
use crate::traits::BlobStore;

/// Countdown of injected failures for one kind of operation.
#[derive(Default)]
struct Faults(AtomicU32);

impl Faults {
    fn arm(&self, count: u32) {
        self.0.store(count, Ordering::SeqCst);
    }

    /// Consume one pending failure, if any.
    fn trip(&self) -> bool {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Wraps a store with latency and failure injection.
pub struct SlowStore {
    inner: Arc<dyn BlobStore>,
    read_ms: RangeInclusive<u64>,
    write_ms: RangeInclusive<u64>,
    rng: Mutex<StdRng>,
    read_faults: Faults,
    write_faults: Faults,
}

impl SlowStore {
    /// Pass-through until configured.
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            read_ms: 0..=0,
            write_ms: 0..=0,
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            read_faults: Faults::default(),
            write_faults: Faults::default(),
        }
    }

    /// Delay every `get` and `contains` by `min..=max` milliseconds.
    pub fn read_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.read_ms = min_ms..=max_ms.max(min_ms);
        self
    }

    /// Delay every `put` and `delete` by `min..=max` milliseconds.
    pub fn write_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.write_ms = min_ms..=max_ms.max(min_ms);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Fail the next `count` `get` calls. `0` disarms.
    pub fn fail_next_reads(&self, count: u32) {
        self.read_faults.arm(count);
    }

    /// Fail the next `count` `put` calls. `0` disarms.
    pub fn fail_next_writes(&self, count: u32) {
        self.write_faults.arm(count);
    }

    async fn pause(&self, range: &RangeInclusive<u64>) {
        let ms = if range.start() == range.end() {
            *range.start()
        } else {
            self.rng
                .lock()
                .expect("lock poisoned")
                .random_range(range.clone())
        };
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait::async_trait]
impl BlobStore for SlowStore {
    async fn put(&self, addr: BlobAddress, data: Bytes) -> Result<(), StoreError> {
        self.pause(&self.write_ms).await;
        if self.write_faults.trip() {
            return Err(StoreError::Unavailable(addr));
        }
        self.inner.put(addr, data).await
    }

    async fn get(&self, addr: BlobAddress) -> Result<Option<Bytes>, StoreError> {
        self.pause(&self.read_ms).await;
        if self.read_faults.trip() {
            return Err(StoreError::Unavailable(addr));
        }
        self.inner.get(addr).await
    }

    async fn delete(&self, addr: BlobAddress) -> Result<(), StoreError> {
        self.pause(&self.write_ms).await;
        self.inner.delete(addr).await
    }

    async fn contains(&self, addr: BlobAddress) -> Result<bool, StoreError> {
        self.pause(&self.read_ms).await;
        self.inner.contains(addr).await
    }

    async fn list(&self) -> Result<Vec<BlobAddress>, StoreError> {
        self.inner.list().await
    }
}
