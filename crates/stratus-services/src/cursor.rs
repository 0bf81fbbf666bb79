//! Opaque continuation tokens.
//!
//! A token is base64 of a small JSON document holding the last key the
//! previous page returned. Anything that does not decode restarts the
//! listing from the beginning.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::limits::MAX_PAGE_SIZE;

#[derive(Serialize, Deserialize)]
struct Cursor {
    /// Last key returned.
    k: String,
}

/// Encode a continuation token positioned after `last_key`.
pub fn encode(last_key: &str) -> String {
    let json = serde_json::to_vec(&Cursor {
        k: last_key.to_string(),
    })
    .unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a token into the key to resume after.
pub fn decode(token: &str) -> Option<String> {
    let decoded = URL_SAFE_NO_PAD
        .decode(token.trim_end_matches('='))
        .ok()
        .and_then(|raw| serde_json::from_slice::<Cursor>(&raw).ok());
    if decoded.is_none() {
        warn!(token, "invalid continuation token, restarting listing");
    }
    decoded.map(|c| c.k)
}

/// A page request as decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Key to resume after, from a decoded token.
    pub after: Option<String>,
    /// Page size, clamped to `1..=MAX_PAGE_SIZE`.
    pub limit: usize,
}

impl PageRequest {
    /// Build from an optional raw token and an optional requested size.
    pub fn new(token: Option<&str>, limit: Option<usize>) -> Self {
        Self {
            after: token.filter(|t| !t.is_empty()).and_then(decode),
            limit: limit.unwrap_or(MAX_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// The first page, full size.
    pub fn first() -> Self {
        Self::new(None, None)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::first()
    }
}

/// One page of results with the token for the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing<T> {
    pub items: Vec<T>,
    /// Present when more items follow.
    pub next_token: Option<String>,
}

impl<T> Listing<T> {
    /// Wrap a page; `last_key` positions the next token when `truncated`.
    pub fn new(items: Vec<T>, truncated: bool, last_key: Option<&str>) -> Self {
        let next_token = if truncated { last_key.map(encode) } else { None };
        Self { items, next_token }
    }

    /// Convert the items, keeping the token.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Listing<U> {
        Listing {
            items: self.items.into_iter().map(f).collect(),
            next_token: self.next_token,
        }
    }
}
