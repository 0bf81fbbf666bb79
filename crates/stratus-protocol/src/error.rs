//! Error types for detection and route-table construction.

use crate::envelope::Method;

/// Why a request could not be resolved to an operation.
///
/// Every variant is rendered as the dialect's "not implemented" response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectionError {
    /// Nothing in the dialect's table matches the request.
    #[error("no operation matches {method} {path}")]
    UnknownOperation {
        /// Request method.
        method: Method,
        /// Request path.
        path: String,
    },

    /// The `x-amz-target` header names an operation that is not registered.
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    /// The body names an `Action` that is not registered.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// A template matches the path but not with this method.
    #[error("method {method} not supported on {path}")]
    UnsupportedMethod {
        /// Request method.
        method: Method,
        /// Request path.
        path: String,
    },
}

impl DetectionError {
    /// The operation name the caller asked for, when it named one.
    pub fn requested_operation(&self) -> Option<&str> {
        match self {
            Self::UnknownTarget(target) => Some(target.rsplit('.').next().unwrap_or(target)),
            Self::UnknownAction(action) => Some(action),
            Self::UnknownOperation { .. } | Self::UnsupportedMethod { .. } => None,
        }
    }
}

/// A route table failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    /// A template could not be parsed.
    #[error("invalid template {template:?}: {reason}")]
    InvalidTemplate {
        /// Template text.
        template: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Two routes with the same method can match the same request.
    #[error("ambiguous routes for {method}: {first} and {second}")]
    Ambiguous {
        /// Shared method.
        method: Method,
        /// Earlier template.
        first: String,
        /// Later template.
        second: String,
    },

    /// The same `x-amz-target` value was registered twice.
    #[error("duplicate target: {0}")]
    DuplicateTarget(String),

    /// The same body `Action` name was registered twice.
    #[error("duplicate body action: {0}")]
    DuplicateBodyAction(String),

    /// A strategy order is empty or repeats a strategy.
    #[error("invalid strategy order for {dialect}: {reason}")]
    InvalidOrder {
        /// Dialect whose order is wrong.
        dialect: String,
        /// What is wrong with it.
        reason: String,
    },
}
