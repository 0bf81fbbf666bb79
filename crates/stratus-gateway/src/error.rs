//! Gateway failures and their default HTTP status.

use axum::http::StatusCode;
use stratus_protocol::DetectionError;
use stratus_services::ServiceError;

/// Everything that can stop a request before a successful reply.
///
/// Codecs turn these into the dialect's error body; [`status_code`]
/// is the fallback status they start from.
///
/// [`status_code`]: GatewayError::status_code
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request matched no operation of its dialect.
    #[error(transparent)]
    Detection(#[from] DetectionError),

    /// Decoding or handling failed.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl GatewayError {
    /// Generic HTTP status for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Detection(_) => StatusCode::NOT_IMPLEMENTED,
            Self::Service(e) => match e {
                ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
                ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
                ServiceError::AccessDenied { .. } => StatusCode::FORBIDDEN,
                ServiceError::AlreadyExists { .. } | ServiceError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                ServiceError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
                ServiceError::StorageUnavailable(_)
                | ServiceError::DriverUnavailable(_)
                | ServiceError::DriverTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
                ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Whether the caller is at fault (4xx) rather than the emulator.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// The handler error, if this is not a detection failure.
    pub fn service(&self) -> Option<&ServiceError> {
        match self {
            Self::Service(e) => Some(e),
            Self::Detection(_) => None,
        }
    }
}
