//! Name and size limits checked before any storage call.

use crate::error::ServiceError;

/// Largest page any listing returns.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Longest object key, in bytes.
pub const MAX_KEY_BYTES: usize = 1024;

/// Default payload cap (5 GiB).
pub const DEFAULT_MAX_OBJECT_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Tunable limits.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Largest object payload accepted by `put_object`.
    pub max_object_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_object_bytes: DEFAULT_MAX_OBJECT_BYTES,
        }
    }
}

/// 3–63 chars of `[a-z0-9.-]`, starting and ending alphanumeric.
pub fn validate_bucket_name(name: &str) -> Result<(), ServiceError> {
    let bytes = name.as_bytes();
    let edges_ok = bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric);
    let chars_ok = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'-'));
    if (3..=63).contains(&bytes.len()) && edges_ok && chars_ok {
        Ok(())
    } else {
        Err(ServiceError::validation(format!(
            "invalid bucket name {name:?}: 3-63 characters of a-z, 0-9, '.', '-'"
        )))
    }
}

/// 1–255 chars of `[A-Za-z0-9_.-]`; used for tables and queues.
pub fn validate_resource_name(kind: &str, name: &str) -> Result<(), ServiceError> {
    let ok = (1..=255).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if ok {
        Ok(())
    } else {
        Err(ServiceError::validation(format!(
            "invalid {kind} name {name:?}: 1-255 characters of A-Z, a-z, 0-9, '_', '.', '-'"
        )))
    }
}

/// 1–1024 bytes, no NUL.
pub fn validate_key(kind: &str, key: &str) -> Result<(), ServiceError> {
    if key.is_empty() || key.len() > MAX_KEY_BYTES || key.contains('\0') {
        return Err(ServiceError::validation(format!(
            "invalid {kind}: must be 1-{MAX_KEY_BYTES} bytes without NUL"
        )));
    }
    Ok(())
}
