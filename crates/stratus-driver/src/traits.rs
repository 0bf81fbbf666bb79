//! Capability interfaces implemented by driver backends.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use stratus_types::Scope;

use crate::error::DriverResult;

/// Size of one addressable volume block.
pub const BLOCK_SIZE: u64 = 4096;

/// What to run for a new workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Workload id, unique per backend.
    pub id: String,
    /// Image (container) or program (process) to run.
    pub image: String,
    /// Command and arguments. Empty means the image default.
    pub command: Vec<String>,
    /// CPU cores requested.
    pub cpus: u32,
    /// Memory requested, in MiB.
    pub memory_mb: u32,
}

impl WorkloadSpec {
    /// A spec with one CPU and 512 MiB.
    pub fn new(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            command: Vec::new(),
            cpus: 1,
            memory_mb: 512,
        }
    }
}

/// Lifecycle state of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadState {
    /// Accepted, not yet running.
    Pending,
    /// Running.
    Running,
    /// Exited on its own.
    Stopped,
}

impl WorkloadState {
    /// Lower-case name, as used in provider responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// Observed status of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    /// Workload id.
    pub id: String,
    /// Current state.
    pub state: WorkloadState,
    /// Primary address, when the backend knows one.
    pub ip_address: Option<String>,
    /// Attached volume ids, in attach order.
    pub volumes: Vec<String>,
}

/// Observed status of a block volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStatus {
    /// Volume id.
    pub id: String,
    /// Capacity in bytes.
    pub size_bytes: u64,
}

impl VolumeStatus {
    /// Number of [`BLOCK_SIZE`] blocks in the volume.
    pub fn blocks(&self) -> u64 {
        self.size_bytes / BLOCK_SIZE
    }
}

/// Observed status of a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStatus {
    /// Network id.
    pub id: String,
    /// Address range.
    pub cidr: String,
}

/// A caller identity resolved from a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Principal id (access key, service account, user OCID).
    pub id: String,
    /// Scope the principal acts in.
    pub scope: Scope,
}

/// Runs workloads.
#[async_trait::async_trait]
pub trait ComputeDriver: Send + Sync {
    /// Start a workload. Fails with `AlreadyExists` if the id is taken.
    async fn create_workload(&self, spec: &WorkloadSpec) -> DriverResult<WorkloadStatus>;

    /// Stop and forget a workload.
    async fn destroy_workload(&self, id: &str) -> DriverResult<()>;

    /// Current status of a workload.
    async fn workload_status(&self, id: &str) -> DriverResult<WorkloadStatus>;

    /// All workloads known to the backend, in id order.
    async fn list_workloads(&self) -> DriverResult<Vec<WorkloadStatus>>;

    /// Attach a volume to a workload.
    async fn attach_volume(&self, workload: &str, volume: &str) -> DriverResult<()>;
}

/// Provides fixed-block volumes.
#[async_trait::async_trait]
pub trait StorageDriver: Send + Sync {
    /// Create a zero-filled volume of `size_bytes` (rounded up to a block).
    async fn create_volume(&self, id: &str, size_bytes: u64) -> DriverResult<VolumeStatus>;

    /// Delete a volume and its contents.
    async fn delete_volume(&self, id: &str) -> DriverResult<()>;

    /// Write one block. `data` may be shorter than a block; the rest is zeroed.
    async fn write_block(&self, id: &str, block: u64, data: Bytes) -> DriverResult<()>;

    /// Read one full block.
    async fn read_block(&self, id: &str, block: u64) -> DriverResult<Bytes>;

    /// All volumes, in id order.
    async fn list_volumes(&self) -> DriverResult<Vec<VolumeStatus>>;
}

/// Provides virtual networks.
#[async_trait::async_trait]
pub trait NetworkDriver: Send + Sync {
    /// Create a network over `cidr`.
    async fn create_network(&self, id: &str, cidr: &str) -> DriverResult<NetworkStatus>;

    /// Delete a network.
    async fn delete_network(&self, id: &str) -> DriverResult<()>;

    /// Connect a workload and return the address it was given.
    async fn connect_workload(&self, network: &str, workload: &str) -> DriverResult<String>;

    /// All networks, in id order.
    async fn list_networks(&self) -> DriverResult<Vec<NetworkStatus>>;
}

/// Maps credentials to principals.
#[async_trait::async_trait]
pub trait IdentityDriver: Send + Sync {
    /// Resolve a credential (access key id, project, namespace).
    async fn resolve_principal(&self, credential: &str) -> DriverResult<Principal>;
}

/// Reject ids that are empty or could escape a directory.
pub(crate) fn validate_id(kind: &str, id: &str) -> DriverResult<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id != "."
        && id != ".."
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if ok {
        Ok(())
    } else {
        Err(crate::DriverError::InvalidArgument(format!(
            "invalid {kind} id: {id:?}"
        )))
    }
}

/// Pad `data` to one block, rejecting oversize writes.
pub(crate) fn to_block(data: &[u8]) -> DriverResult<Vec<u8>> {
    if data.len() as u64 > BLOCK_SIZE {
        return Err(crate::DriverError::InvalidArgument(format!(
            "block write of {} bytes exceeds block size {BLOCK_SIZE}",
            data.len()
        )));
    }
    let mut block = vec![0u8; BLOCK_SIZE as usize];
    block[..data.len()].copy_from_slice(data);
    Ok(block)
}

/// Round `size` up to a whole number of blocks (at least one).
pub(crate) fn round_to_blocks(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE).max(1) * BLOCK_SIZE
}
