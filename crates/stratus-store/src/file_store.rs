//! File-based blob storage backend.
//!
//! One file per payload under a 2-level fan-out:
//! `{base_dir}/{hex[0..2]}/{hex[2..4]}/{hex}`. In-flight writes live next
//! to their target as `{hex}.partial-{n}` until renamed into place.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use stratus_types::BlobAddress;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::traits::BlobStore;

const PARTIAL_MARKER: &str = ".partial-";

/// A payload directory on local disk.
///
/// Payloads are written to a partial file and renamed, so a reader never
/// sees a torn payload. An address that already has a file is not written
/// again.
pub struct FileStore {
    base_dir: PathBuf,
    partial_seq: AtomicU64,
}

/// What the fan-out walk found in one leaf directory entry.
enum Entry {
    Payload(BlobAddress),
    Partial(PathBuf),
}

impl FileStore {
    /// Open (creating if needed) a payload directory.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            partial_seq: AtomicU64::new(0),
        })
    }

    fn payload_path(&self, addr: &BlobAddress) -> PathBuf {
        let hex = addr.to_string();
        self.base_dir.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
    }

    /// Delete partial files left by writes a crash cut short.
    ///
    /// Run once at startup, before any write; returns how many were removed.
    pub async fn remove_partial_writes(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in self.walk().await? {
            if let Entry::Partial(path) = entry {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        if removed > 0 {
            info!(removed, dir = %self.base_dir.display(), "removed partial payload writes");
        }
        Ok(removed)
    }

    /// Every payload and partial file under the fan-out. Anything else is
    /// skipped.
    async fn walk(&self) -> Result<Vec<Entry>, StoreError> {
        let mut found = Vec::new();
        let mut dirs = vec![(self.base_dir.clone(), 0u8)];
        while let Some((dir, depth)) = dirs.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let kind = entry.file_type().await?;
                if depth < 2 {
                    if kind.is_dir() {
                        dirs.push((entry.path(), depth + 1));
                    }
                    continue;
                }
                if !kind.is_file() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                if name.contains(PARTIAL_MARKER) {
                    found.push(Entry::Partial(entry.path()));
                } else if let Some(addr) = parse_address(&name) {
                    found.push(Entry::Payload(addr));
                }
            }
        }
        Ok(found)
    }
}

#[async_trait::async_trait]
impl BlobStore for FileStore {
    async fn put(&self, addr: BlobAddress, data: Bytes) -> Result<(), StoreError> {
        if self.contains(addr).await? {
            return Ok(());
        }
        let path = self.payload_path(&addr);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let seq = self.partial_seq.fetch_add(1, Ordering::Relaxed);
        let partial = path.with_file_name(format!("{addr}{PARTIAL_MARKER}{seq}"));
        tokio::fs::write(&partial, &data).await?;
        if let Err(e) = tokio::fs::rename(&partial, &path).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        debug!(%addr, size = data.len(), "payload written");
        Ok(())
    }

    async fn get(&self, addr: BlobAddress) -> Result<Option<Bytes>, StoreError> {
        match tokio::fs::read(self.payload_path(&addr)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, addr: BlobAddress) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.payload_path(&addr)).await {
            Ok(()) => {
                debug!(%addr, "payload removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, addr: BlobAddress) -> Result<bool, StoreError> {
        Ok(tokio::fs::try_exists(self.payload_path(&addr)).await?)
    }

    async fn list(&self) -> Result<Vec<BlobAddress>, StoreError> {
        Ok(self
            .walk()
            .await?
            .into_iter()
            .filter_map(|entry| match entry {
                Entry::Payload(addr) => Some(addr),
                Entry::Partial(_) => None,
            })
            .collect())
    }
}

/// A payload file name is the address as 64 lowercase hex digits.
fn parse_address(name: &str) -> Option<BlobAddress> {
    if name.len() != 64 {
        return None;
    }
    let mut bytes = [0u8; 32];
    for (byte, pair) in bytes.iter_mut().zip(name.as_bytes().chunks_exact(2)) {
        let pair = std::str::from_utf8(pair).ok()?;
        *byte = u8::from_str_radix(pair, 16).ok()?;
    }
    Some(BlobAddress::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        (store, dir)
    }

    fn leaf(dir: &Path, addr: &BlobAddress) -> PathBuf {
        let hex = addr.to_string();
        dir.join(&hex[0..2]).join(&hex[2..4])
    }

    #[tokio::test]
    async fn test_put_lands_in_fanout_and_reads_back() {
        let (store, dir) = make_store();
        let data = Bytes::from_static(b"fanout test data");
        let addr = BlobAddress::from_data(b"fanout");

        store.put(addr, data.clone()).await.unwrap();
        let path = leaf(dir.path(), &addr).join(addr.to_string());
        assert_eq!(std::fs::read(&path).unwrap(), data.as_ref());
        assert_eq!(store.get(addr).await.unwrap(), Some(data));

        // Only the payload itself is left in the leaf directory.
        let names: Vec<_> = std::fs::read_dir(leaf(dir.path(), &addr))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let (store, _dir) = make_store();
        let addr = BlobAddress::from_data(b"doomed");

        store.put(addr, Bytes::from_static(b"x")).await.unwrap();
        store.delete(addr).await.unwrap();
        assert_eq!(store.get(addr).await.unwrap(), None);
        assert!(!store.contains(addr).await.unwrap());
        store.delete(addr).await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_payload_is_not_rewritten() {
        let (store, dir) = make_store();
        let addr = BlobAddress::from_data(b"once");
        store.put(addr, Bytes::from_static(b"first")).await.unwrap();
        let path = leaf(dir.path(), &addr).join(addr.to_string());
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();

        store.put(addr, Bytes::from_static(b"first")).await.unwrap();
        let after = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_list_and_cleanup_skip_foreign_files() {
        let (store, dir) = make_store();
        let a = BlobAddress::from_data(b"a");
        let b = BlobAddress::from_data(b"b");
        store.put(a, Bytes::from_static(b"1")).await.unwrap();
        store.put(b, Bytes::from_static(b"2")).await.unwrap();

        let leaf_a = leaf(dir.path(), &a);
        std::fs::write(leaf_a.join("notes.txt"), b"junk").unwrap();
        std::fs::write(leaf_a.join(format!("{b}{PARTIAL_MARKER}7")), b"torn").unwrap();
        std::fs::write(dir.path().join("README"), b"top level").unwrap();

        let mut listed = store.list().await.unwrap();
        listed.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(listed, expected);

        assert_eq!(store.remove_partial_writes().await.unwrap(), 1);
        assert_eq!(store.remove_partial_writes().await.unwrap(), 0);
        assert!(leaf_a.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_reopen_sees_existing_payloads() {
        let dir = TempDir::new().unwrap();
        let addr = BlobAddress::from_data(b"durable");
        {
            let store = FileStore::new(dir.path()).unwrap();
            store
                .put(addr, Bytes::from_static(b"survives"))
                .await
                .unwrap();
        }
        let store = FileStore::new(dir.path()).unwrap();
        assert_eq!(store.list().await.unwrap(), vec![addr]);
        assert_eq!(
            store.get(addr).await.unwrap(),
            Some(Bytes::from_static(b"survives"))
        );
    }
}
