//! Local-execution driver: volumes are files, workloads are processes.
//!
//! Layout under the root directory:
//!
//! ```text
//! volumes/{id}/data.bin   fixed-size, block-addressed volume image
//! identity/{credential}   file whose content is the principal's scope
//! ```

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use stratus_types::Scope;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{DriverError, DriverResult};
use crate::mock::check_block;
use crate::registry::DriverBackend;
use crate::traits::{
    BLOCK_SIZE, ComputeDriver, IdentityDriver, Principal, StorageDriver, VolumeStatus,
    WorkloadSpec, WorkloadState, WorkloadStatus, round_to_blocks, to_block, validate_id,
};

const BACKEND: &str = "filesystem";
const VOLUME_FILE: &str = "data.bin";
/// How long a destroyed workload gets to exit after being killed.
const EXIT_WAIT: Duration = Duration::from_secs(5);

struct ProcessWorkload {
    child: Child,
    volumes: Vec<String>,
}

/// Driver backed by the local filesystem and child processes.
///
/// Provides compute, storage and identity.
pub struct FilesystemDriver {
    root: PathBuf,
    workloads: Mutex<BTreeMap<String, ProcessWorkload>>,
}

impl FilesystemDriver {
    /// Create a driver rooted at `root`, creating its directories.
    pub fn new(root: impl AsRef<Path>) -> DriverResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("volumes"))?;
        std::fs::create_dir_all(root.join("identity"))?;
        Ok(Self {
            root,
            workloads: Mutex::new(BTreeMap::new()),
        })
    }

    /// Wrap as a registry backend (compute, storage, identity).
    pub fn backend(self: Arc<Self>, name: impl Into<String>) -> DriverBackend {
        DriverBackend::new(name)
            .with_compute(self.clone())
            .with_storage(self.clone())
            .with_identity(self)
    }

    fn volume_dir(&self, id: &str) -> PathBuf {
        self.root.join("volumes").join(id)
    }

    fn volume_file(&self, id: &str) -> PathBuf {
        self.volume_dir(id).join(VOLUME_FILE)
    }

    async fn volume_size(&self, id: &str) -> DriverResult<u64> {
        validate_id("volume", id)?;
        match tokio::fs::metadata(self.volume_file(id)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DriverError::not_found("volume", id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn status_of(id: &str, workload: &mut ProcessWorkload) -> WorkloadStatus {
        let state = match workload.child.try_wait() {
            Ok(None) => WorkloadState::Running,
            Ok(Some(_)) => WorkloadState::Stopped,
            Err(e) => {
                warn!(workload = id, error = %e, "failed to poll workload process");
                WorkloadState::Stopped
            }
        };
        WorkloadStatus {
            id: id.to_string(),
            state,
            ip_address: Some("127.0.0.1".to_string()),
            volumes: workload.volumes.clone(),
        }
    }
}

#[async_trait::async_trait]
impl ComputeDriver for FilesystemDriver {
    async fn create_workload(&self, spec: &WorkloadSpec) -> DriverResult<WorkloadStatus> {
        validate_id("workload", &spec.id)?;
        if self
            .workloads
            .lock()
            .expect("lock poisoned")
            .contains_key(&spec.id)
        {
            return Err(DriverError::already_exists("workload", &spec.id));
        }

        let (program, args) = match spec.command.split_first() {
            Some((program, args)) => (program.as_str(), args),
            None => (spec.image.as_str(), &[][..]),
        };
        let child = Command::new(program)
            .args(args)
            .env("STRATUS_WORKLOAD_ID", &spec.id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DriverError::Unavailable {
                backend: BACKEND.to_string(),
                reason: format!("failed to spawn {program}: {e}"),
            })?;
        info!(workload = %spec.id, program, pid = child.id(), "workload process started");

        let mut workloads = self.workloads.lock().expect("lock poisoned");
        if workloads.contains_key(&spec.id) {
            // Lost a race with a concurrent create; the new child is
            // killed when dropped.
            return Err(DriverError::already_exists("workload", &spec.id));
        }
        let mut workload = ProcessWorkload {
            child,
            volumes: Vec::new(),
        };
        let status = Self::status_of(&spec.id, &mut workload);
        workloads.insert(spec.id.clone(), workload);
        Ok(status)
    }

    async fn destroy_workload(&self, id: &str) -> DriverResult<()> {
        let removed = self.workloads.lock().expect("lock poisoned").remove(id);
        let mut workload = removed.ok_or_else(|| DriverError::not_found("workload", id))?;
        if let Err(e) = workload.child.start_kill() {
            // Already exited.
            debug!(workload = id, error = %e, "kill skipped");
        }
        if tokio::time::timeout(EXIT_WAIT, workload.child.wait())
            .await
            .is_err()
        {
            warn!(workload = id, "workload process did not exit in time");
        }
        info!(workload = id, "workload destroyed");
        Ok(())
    }

    async fn workload_status(&self, id: &str) -> DriverResult<WorkloadStatus> {
        let mut workloads = self.workloads.lock().expect("lock poisoned");
        let workload = workloads
            .get_mut(id)
            .ok_or_else(|| DriverError::not_found("workload", id))?;
        Ok(Self::status_of(id, workload))
    }

    async fn list_workloads(&self) -> DriverResult<Vec<WorkloadStatus>> {
        let mut workloads = self.workloads.lock().expect("lock poisoned");
        Ok(workloads
            .iter_mut()
            .map(|(id, w)| Self::status_of(id, w))
            .collect())
    }

    async fn attach_volume(&self, workload: &str, volume: &str) -> DriverResult<()> {
        self.volume_size(volume).await?;
        let mut workloads = self.workloads.lock().expect("lock poisoned");
        let entry = workloads
            .get_mut(workload)
            .ok_or_else(|| DriverError::not_found("workload", workload))?;
        if !entry.volumes.iter().any(|v| v == volume) {
            entry.volumes.push(volume.to_string());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageDriver for FilesystemDriver {
    async fn create_volume(&self, id: &str, size_bytes: u64) -> DriverResult<VolumeStatus> {
        validate_id("volume", id)?;
        let dir = self.volume_dir(id);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(DriverError::already_exists("volume", id));
            }
            Err(e) => return Err(e.into()),
        }

        let size_bytes = round_to_blocks(size_bytes);
        let file = tokio::fs::File::create(dir.join(VOLUME_FILE)).await?;
        // Sparse: untouched blocks read back as zeros.
        file.set_len(size_bytes).await?;
        file.sync_all().await?;
        info!(volume = id, size_bytes, "volume created");
        Ok(VolumeStatus {
            id: id.to_string(),
            size_bytes,
        })
    }

    async fn delete_volume(&self, id: &str) -> DriverResult<()> {
        self.volume_size(id).await?;
        tokio::fs::remove_dir_all(self.volume_dir(id)).await?;
        for workload in self.workloads.lock().expect("lock poisoned").values_mut() {
            workload.volumes.retain(|v| v != id);
        }
        info!(volume = id, "volume deleted");
        Ok(())
    }

    async fn write_block(&self, id: &str, block: u64, data: Bytes) -> DriverResult<()> {
        let padded = to_block(&data)?;
        check_block(self.volume_size(id).await?, block)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(self.volume_file(id))
            .await?;
        file.seek(SeekFrom::Start(block * BLOCK_SIZE)).await?;
        file.write_all(&padded).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_block(&self, id: &str, block: u64) -> DriverResult<Bytes> {
        check_block(self.volume_size(id).await?, block)?;
        let mut file = tokio::fs::File::open(self.volume_file(id)).await?;
        file.seek(SeekFrom::Start(block * BLOCK_SIZE)).await?;
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn list_volumes(&self) -> DriverResult<Vec<VolumeStatus>> {
        let mut volumes = Vec::new();
        let mut entries = tokio::fs::read_dir(self.root.join("volumes")).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            match tokio::fs::metadata(entry.path().join(VOLUME_FILE)).await {
                Ok(meta) => volumes.push(VolumeStatus {
                    id,
                    size_bytes: meta.len(),
                }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        volumes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(volumes)
    }
}

#[async_trait::async_trait]
impl IdentityDriver for FilesystemDriver {
    async fn resolve_principal(&self, credential: &str) -> DriverResult<Principal> {
        if credential.is_empty() {
            return Ok(Principal {
                id: String::new(),
                scope: Scope::default(),
            });
        }
        validate_id("principal", credential)?;
        let path = self.root.join("identity").join(credential);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let scope = content.trim();
                Ok(Principal {
                    id: credential.to_string(),
                    scope: if scope.is_empty() {
                        Scope::default()
                    } else {
                        Scope::new(scope)
                    },
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DriverError::not_found("principal", credential))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_driver() -> (FilesystemDriver, TempDir) {
        let dir = TempDir::new().unwrap();
        let driver = FilesystemDriver::new(dir.path()).unwrap();
        (driver, dir)
    }

    #[tokio::test]
    async fn test_volume_file_layout_and_blocks() {
        let (driver, dir) = make_driver();
        let vol = driver.create_volume("vol-1", 2 * BLOCK_SIZE).await.unwrap();
        assert_eq!(vol.size_bytes, 2 * BLOCK_SIZE);

        let path = dir.path().join("volumes/vol-1/data.bin");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * BLOCK_SIZE);

        driver
            .write_block("vol-1", 1, Bytes::from_static(b"block one"))
            .await
            .unwrap();
        let block = driver.read_block("vol-1", 1).await.unwrap();
        assert_eq!(&block[..9], b"block one");
        assert!(block[9..].iter().all(|b| *b == 0));
        assert!(driver.read_block("vol-1", 2).await.is_err());

        assert!(matches!(
            driver.create_volume("vol-1", 1).await.unwrap_err(),
            DriverError::AlreadyExists { .. }
        ));
    }

    #[tokio::test]
    async fn test_volumes_survive_new_driver() {
        let (driver, dir) = make_driver();
        driver.create_volume("b", 1).await.unwrap();
        driver.create_volume("a", 1).await.unwrap();
        driver
            .write_block("a", 0, Bytes::from_static(b"kept"))
            .await
            .unwrap();
        drop(driver);

        let driver = FilesystemDriver::new(dir.path()).unwrap();
        let ids: Vec<_> = driver
            .list_volumes()
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(&driver.read_block("a", 0).await.unwrap()[..4], b"kept");

        driver.delete_volume("a").await.unwrap();
        assert!(matches!(
            driver.delete_volume("a").await.unwrap_err(),
            DriverError::NotFound { .. }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_workload_lifecycle() {
        let (driver, _dir) = make_driver();
        let mut spec = WorkloadSpec::new("sleeper", "sleep");
        spec.command = vec!["sleep".to_string(), "30".to_string()];

        let status = driver.create_workload(&spec).await.unwrap();
        assert_eq!(status.state, WorkloadState::Running);

        driver.create_volume("data", 1).await.unwrap();
        driver.attach_volume("sleeper", "data").await.unwrap();
        let status = driver.workload_status("sleeper").await.unwrap();
        assert_eq!(status.volumes, vec!["data".to_string()]);

        driver.destroy_workload("sleeper").await.unwrap();
        assert!(driver.list_workloads().await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_process_reports_stopped() {
        let (driver, _dir) = make_driver();
        let mut spec = WorkloadSpec::new("oneshot", "true");
        spec.command = vec!["true".to_string()];
        driver.create_workload(&spec).await.unwrap();

        let mut state = WorkloadState::Running;
        for _ in 0..50 {
            state = driver.workload_status("oneshot").await.unwrap().state;
            if state == WorkloadState::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state, WorkloadState::Stopped);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_unavailable() {
        let (driver, _dir) = make_driver();
        let spec = WorkloadSpec::new("ghost", "/definitely/not/a/program");
        let err = driver.create_workload(&spec).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_identity_reads_scope_file() {
        let (driver, dir) = make_driver();
        std::fs::write(dir.path().join("identity/AKIA1"), "team-a\n").unwrap();

        let p = driver.resolve_principal("AKIA1").await.unwrap();
        assert_eq!(p.scope, Scope::new("team-a"));
        assert!(matches!(
            driver.resolve_principal("AKIA2").await.unwrap_err(),
            DriverError::NotFound { .. }
        ));
    }
}
