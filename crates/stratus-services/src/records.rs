//! Helpers shared by handlers that page over records.

use std::sync::atomic::{AtomicU64, Ordering};

use stratus_engine::StorageEngine;
use stratus_types::{ResourceId, ResourceKind, ResourceRecord, Scope};

use crate::cursor::{Listing, PageRequest};
use crate::error::ServiceError;
use crate::limits::MAX_PAGE_SIZE;

/// One page of `kind` records owned by `scope`, in name order.
///
/// Records of other scopes are skipped without counting toward the limit.
pub(crate) async fn list_owned(
    engine: &StorageEngine,
    kind: ResourceKind,
    name_prefix: &str,
    scope: &Scope,
    page: &PageRequest,
) -> Result<Listing<ResourceRecord>, ServiceError> {
    let want = page.limit + 1;
    let mut after = page.after.clone();
    let mut items = Vec::new();
    loop {
        let chunk = engine
            .list(kind, name_prefix, after.as_deref(), want)
            .await?;
        let Some(last) = chunk.items.last() else {
            break;
        };
        after = Some(last.id.name().to_string());
        items.extend(
            chunk
                .items
                .into_iter()
                .filter(|r| &r.owner_scope == scope),
        );
        if items.len() >= want || !chunk.truncated {
            break;
        }
    }
    let truncated = items.len() > page.limit;
    items.truncate(page.limit);
    let last = items.last().map(|r| r.id.name().to_string());
    Ok(Listing::new(items, truncated, last.as_deref()))
}

/// Every `kind` record owned by `scope`.
pub(crate) async fn list_all_owned(
    engine: &StorageEngine,
    kind: ResourceKind,
    scope: &Scope,
) -> Result<Vec<ResourceRecord>, ServiceError> {
    let mut page = PageRequest::first();
    let mut out = Vec::new();
    loop {
        let listing = list_owned(engine, kind, "", scope, &page).await?;
        out.extend(listing.items);
        match listing.next_token {
            Some(token) => page = PageRequest::new(Some(&token), None),
            None => return Ok(out),
        }
    }
}

/// Number of blobs under `id`.
pub(crate) async fn count_blobs(
    engine: &StorageEngine,
    id: &ResourceId,
) -> Result<u64, ServiceError> {
    let mut count = 0u64;
    let mut after: Option<String> = None;
    loop {
        let page = engine
            .list_blobs(id, "", after.as_deref(), MAX_PAGE_SIZE)
            .await?;
        count += page.items.len() as u64;
        after = page.items.last().map(|b| b.key.clone());
        if !page.truncated {
            return Ok(count);
        }
    }
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh identifier: `prefix` followed by 17 hex digits.
///
/// Unique within the process; mixes in the time so restarts do not
/// collide with persisted ids.
pub(crate) fn generate_id(prefix: &str, salt: &str) -> String {
    let n = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(&n.to_le_bytes());
    hasher.update(&stratus_types::now_millis().to_le_bytes());
    let hex = hasher.finalize().to_hex();
    format!("{prefix}{}", &hex[..17])
}

/// A UUID-shaped identifier derived from `seed`.
pub(crate) fn uuid_like(seed: &[u8]) -> String {
    let hex = blake3::hash(seed).to_hex();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
