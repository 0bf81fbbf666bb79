//! Error types for blob storage operations.

use stratus_types::BlobAddress;

/// Errors that can occur during blob storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The store has reached its capacity limit.
    #[error("store capacity exceeded: need {needed} bytes, only {available} available")]
    CapacityExceeded {
        /// Bytes needed for the operation.
        needed: u64,
        /// Bytes currently available.
        available: u64,
    },

    /// Injected failure (test wrappers only).
    #[error("blob store unavailable at {0}")]
    Unavailable(BlobAddress),
}
