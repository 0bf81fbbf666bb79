//! Error types for drivers and the registry.

use std::time::Duration;

use stratus_types::Capability;

/// Result alias used by every driver operation.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors returned by driver operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The workload, volume or network does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Object family (`workload`, `volume`, `network`, `principal`).
        kind: &'static str,
        /// Identifier.
        id: String,
    },

    /// An object with this id already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Object family.
        kind: &'static str,
        /// Identifier.
        id: String,
    },

    /// Caller input the backend cannot act on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend does not support this operation.
    #[error("{backend} does not support {operation}")]
    Unsupported {
        /// Backend name.
        backend: String,
        /// Operation name.
        operation: &'static str,
    },

    /// The backend could not be reached or failed to run the operation.
    #[error("driver {backend} unavailable: {reason}")]
    Unavailable {
        /// Backend name.
        backend: String,
        /// Failure detail.
        reason: String,
    },

    /// The backend did not answer within its bounded wait.
    #[error("driver {backend} timed out after {after:?} in {operation}")]
    Timeout {
        /// Backend name.
        backend: String,
        /// Operation name.
        operation: &'static str,
        /// Configured bound.
        after: Duration,
    },

    /// No backend is bound for the capability.
    #[error("no driver bound for capability {0}")]
    CapabilityUnavailable(Capability),

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Whether the failure lies with the backend rather than the request.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Io(_) | Self::CapabilityUnavailable(_)
        )
    }

    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn already_exists(kind: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.into(),
        }
    }
}

/// Errors raised while assembling a [`DriverRegistry`](crate::DriverRegistry).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two backends were registered under the same name.
    #[error("backend registered twice: {0}")]
    DuplicateBackend(String),

    /// A binding names a backend that was never registered.
    #[error("unknown driver backend: {0}")]
    UnknownBackend(String),

    /// A binding names a backend whose descriptor lacks the capability.
    #[error("backend {backend} does not provide capability {capability}")]
    MissingCapability {
        /// Backend name.
        backend: String,
        /// Requested capability.
        capability: Capability,
    },
}
