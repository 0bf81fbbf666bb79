//! Deterministic in-memory driver providing every capability.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use stratus_types::Scope;

use crate::error::{DriverError, DriverResult};
use crate::registry::DriverBackend;
use crate::traits::{
    BLOCK_SIZE, ComputeDriver, IdentityDriver, NetworkDriver, NetworkStatus, Principal,
    StorageDriver, VolumeStatus, WorkloadSpec, WorkloadState, WorkloadStatus, round_to_blocks,
    to_block, validate_id,
};

struct MockVolume {
    size_bytes: u64,
    blocks: BTreeMap<u64, Vec<u8>>,
}

struct MockNetwork {
    cidr: String,
    /// workload id -> assigned address
    members: BTreeMap<String, String>,
}

#[derive(Default)]
struct MockState {
    workloads: BTreeMap<String, WorkloadStatus>,
    volumes: BTreeMap<String, MockVolume>,
    networks: BTreeMap<String, MockNetwork>,
}

/// In-memory driver. Every workload is immediately `Running` and addresses
/// are assigned in order, so the same call sequence always yields the same
/// results.
#[derive(Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
    offline: AtomicBool,
}

impl MockDriver {
    /// Create an empty mock driver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap as a registry backend providing all four capabilities.
    pub fn backend(self: Arc<Self>, name: impl Into<String>) -> DriverBackend {
        DriverBackend::new(name)
            .with_compute(self.clone())
            .with_storage(self.clone())
            .with_network(self.clone())
            .with_identity(self)
    }

    /// While offline, every call fails with [`DriverError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> DriverResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DriverError::Unavailable {
                backend: "mock".to_string(),
                reason: "backend offline".to_string(),
            });
        }
        Ok(())
    }

    fn state(&self) -> DriverResult<std::sync::MutexGuard<'_, MockState>> {
        self.check_online()?;
        Ok(self.state.lock().expect("lock poisoned"))
    }
}

#[async_trait::async_trait]
impl ComputeDriver for MockDriver {
    async fn create_workload(&self, spec: &WorkloadSpec) -> DriverResult<WorkloadStatus> {
        validate_id("workload", &spec.id)?;
        let mut state = self.state()?;
        if state.workloads.contains_key(&spec.id) {
            return Err(DriverError::already_exists("workload", &spec.id));
        }
        let status = WorkloadStatus {
            id: spec.id.clone(),
            state: WorkloadState::Running,
            ip_address: None,
            volumes: Vec::new(),
        };
        state.workloads.insert(spec.id.clone(), status.clone());
        Ok(status)
    }

    async fn destroy_workload(&self, id: &str) -> DriverResult<()> {
        let mut state = self.state()?;
        state
            .workloads
            .remove(id)
            .ok_or_else(|| DriverError::not_found("workload", id))?;
        for network in state.networks.values_mut() {
            network.members.remove(id);
        }
        Ok(())
    }

    async fn workload_status(&self, id: &str) -> DriverResult<WorkloadStatus> {
        self.state()?
            .workloads
            .get(id)
            .cloned()
            .ok_or_else(|| DriverError::not_found("workload", id))
    }

    async fn list_workloads(&self) -> DriverResult<Vec<WorkloadStatus>> {
        Ok(self.state()?.workloads.values().cloned().collect())
    }

    async fn attach_volume(&self, workload: &str, volume: &str) -> DriverResult<()> {
        let mut state = self.state()?;
        if !state.volumes.contains_key(volume) {
            return Err(DriverError::not_found("volume", volume));
        }
        let status = state
            .workloads
            .get_mut(workload)
            .ok_or_else(|| DriverError::not_found("workload", workload))?;
        if !status.volumes.iter().any(|v| v == volume) {
            status.volumes.push(volume.to_string());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageDriver for MockDriver {
    async fn create_volume(&self, id: &str, size_bytes: u64) -> DriverResult<VolumeStatus> {
        validate_id("volume", id)?;
        let mut state = self.state()?;
        if state.volumes.contains_key(id) {
            return Err(DriverError::already_exists("volume", id));
        }
        let size_bytes = round_to_blocks(size_bytes);
        state.volumes.insert(
            id.to_string(),
            MockVolume {
                size_bytes,
                blocks: BTreeMap::new(),
            },
        );
        Ok(VolumeStatus {
            id: id.to_string(),
            size_bytes,
        })
    }

    async fn delete_volume(&self, id: &str) -> DriverResult<()> {
        let mut state = self.state()?;
        state
            .volumes
            .remove(id)
            .ok_or_else(|| DriverError::not_found("volume", id))?;
        for workload in state.workloads.values_mut() {
            workload.volumes.retain(|v| v != id);
        }
        Ok(())
    }

    async fn write_block(&self, id: &str, block: u64, data: Bytes) -> DriverResult<()> {
        let padded = to_block(&data)?;
        let mut state = self.state()?;
        let volume = state
            .volumes
            .get_mut(id)
            .ok_or_else(|| DriverError::not_found("volume", id))?;
        check_block(volume.size_bytes, block)?;
        volume.blocks.insert(block, padded);
        Ok(())
    }

    async fn read_block(&self, id: &str, block: u64) -> DriverResult<Bytes> {
        let state = self.state()?;
        let volume = state
            .volumes
            .get(id)
            .ok_or_else(|| DriverError::not_found("volume", id))?;
        check_block(volume.size_bytes, block)?;
        Ok(match volume.blocks.get(&block) {
            Some(data) => Bytes::copy_from_slice(data),
            None => Bytes::from(vec![0u8; BLOCK_SIZE as usize]),
        })
    }

    async fn list_volumes(&self) -> DriverResult<Vec<VolumeStatus>> {
        Ok(self
            .state()?
            .volumes
            .iter()
            .map(|(id, v)| VolumeStatus {
                id: id.clone(),
                size_bytes: v.size_bytes,
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl NetworkDriver for MockDriver {
    async fn create_network(&self, id: &str, cidr: &str) -> DriverResult<NetworkStatus> {
        validate_id("network", id)?;
        network_prefix(cidr)?;
        let mut state = self.state()?;
        if state.networks.contains_key(id) {
            return Err(DriverError::already_exists("network", id));
        }
        state.networks.insert(
            id.to_string(),
            MockNetwork {
                cidr: cidr.to_string(),
                members: BTreeMap::new(),
            },
        );
        Ok(NetworkStatus {
            id: id.to_string(),
            cidr: cidr.to_string(),
        })
    }

    async fn delete_network(&self, id: &str) -> DriverResult<()> {
        self.state()?
            .networks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DriverError::not_found("network", id))
    }

    async fn connect_workload(&self, network: &str, workload: &str) -> DriverResult<String> {
        let mut state = self.state()?;
        if !state.workloads.contains_key(workload) {
            return Err(DriverError::not_found("workload", workload));
        }
        let net = state
            .networks
            .get_mut(network)
            .ok_or_else(|| DriverError::not_found("network", network))?;
        if let Some(ip) = net.members.get(workload) {
            return Ok(ip.clone());
        }
        // .0 is the network, .1 the gateway.
        let host = net.members.len() + 2;
        if host > 254 {
            return Err(DriverError::InvalidArgument(format!(
                "network {network} has no free addresses"
            )));
        }
        let ip = format!("{}.{host}", network_prefix(&net.cidr)?);
        net.members.insert(workload.to_string(), ip.clone());
        if let Some(status) = state.workloads.get_mut(workload)
            && status.ip_address.is_none()
        {
            status.ip_address = Some(ip.clone());
        }
        Ok(ip)
    }

    async fn list_networks(&self) -> DriverResult<Vec<NetworkStatus>> {
        Ok(self
            .state()?
            .networks
            .iter()
            .map(|(id, n)| NetworkStatus {
                id: id.clone(),
                cidr: n.cidr.clone(),
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl IdentityDriver for MockDriver {
    async fn resolve_principal(&self, credential: &str) -> DriverResult<Principal> {
        self.check_online()?;
        let scope = if credential.is_empty() {
            Scope::default()
        } else {
            Scope::new(credential)
        };
        Ok(Principal {
            id: credential.to_string(),
            scope,
        })
    }
}

pub(crate) fn check_block(size_bytes: u64, block: u64) -> DriverResult<()> {
    if block >= size_bytes / BLOCK_SIZE {
        return Err(DriverError::InvalidArgument(format!(
            "block {block} out of range for volume of {size_bytes} bytes"
        )));
    }
    Ok(())
}

/// First three octets of an IPv4 `/n` range, e.g. `10.0.1` for `10.0.1.0/24`.
fn network_prefix(cidr: &str) -> DriverResult<String> {
    let invalid = || DriverError::InvalidArgument(format!("invalid cidr: {cidr:?}"));
    let (addr, bits) = cidr.split_once('/').ok_or_else(invalid)?;
    let bits: u8 = bits.parse().map_err(|_| invalid())?;
    let octets: Vec<u8> = addr
        .split('.')
        .map(|o| o.parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    if octets.len() != 4 || !(8..=24).contains(&bits) {
        return Err(invalid());
    }
    Ok(format!("{}.{}.{}", octets[0], octets[1], octets[2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_workload_lifecycle() {
        let driver = MockDriver::new();
        let status = driver
            .create_workload(&WorkloadSpec::new("w1", "nginx"))
            .await
            .unwrap();
        assert_eq!(status.state, WorkloadState::Running);

        assert!(matches!(
            driver
                .create_workload(&WorkloadSpec::new("w1", "nginx"))
                .await
                .unwrap_err(),
            DriverError::AlreadyExists { .. }
        ));

        driver.destroy_workload("w1").await.unwrap();
        assert!(matches!(
            driver.workload_status("w1").await.unwrap_err(),
            DriverError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_volume_blocks_zero_filled() {
        let driver = MockDriver::new();
        let vol = driver.create_volume("v1", 10_000).await.unwrap();
        assert_eq!(vol.size_bytes, 3 * BLOCK_SIZE);
        assert_eq!(vol.blocks(), 3);

        driver
            .write_block("v1", 1, Bytes::from_static(b"abc"))
            .await
            .unwrap();
        let block = driver.read_block("v1", 1).await.unwrap();
        assert_eq!(block.len(), BLOCK_SIZE as usize);
        assert_eq!(&block[..3], b"abc");
        assert!(block[3..].iter().all(|b| *b == 0));

        let untouched = driver.read_block("v1", 0).await.unwrap();
        assert!(untouched.iter().all(|b| *b == 0));

        assert!(matches!(
            driver.read_block("v1", 3).await.unwrap_err(),
            DriverError::InvalidArgument(_)
        ));
    }

    #[tokio::test]
    async fn test_attach_and_connect() {
        let driver = MockDriver::new();
        driver
            .create_workload(&WorkloadSpec::new("w1", "img"))
            .await
            .unwrap();
        driver.create_volume("v1", BLOCK_SIZE).await.unwrap();
        driver.attach_volume("w1", "v1").await.unwrap();
        driver.attach_volume("w1", "v1").await.unwrap();

        driver.create_network("n1", "10.1.2.0/24").await.unwrap();
        let ip = driver.connect_workload("n1", "w1").await.unwrap();
        assert_eq!(ip, "10.1.2.2");
        assert_eq!(driver.connect_workload("n1", "w1").await.unwrap(), ip);

        let status = driver.workload_status("w1").await.unwrap();
        assert_eq!(status.volumes, vec!["v1".to_string()]);
        assert_eq!(status.ip_address.as_deref(), Some("10.1.2.2"));

        assert!(matches!(
            driver.attach_volume("w1", "missing").await.unwrap_err(),
            DriverError::NotFound { kind: "volume", .. }
        ));
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let driver = MockDriver::new();
        assert!(driver.create_network("n", "not-a-cidr").await.is_err());
        assert!(driver.create_volume("../escape", 1).await.is_err());
        driver.create_volume("v", 1).await.unwrap();
        let big = Bytes::from(vec![1u8; BLOCK_SIZE as usize + 1]);
        assert!(driver.write_block("v", 0, big).await.is_err());
    }

    #[tokio::test]
    async fn test_offline_is_unavailable() {
        let driver = MockDriver::new();
        driver.set_offline(true);
        let err = driver.list_workloads().await.unwrap_err();
        assert!(err.is_unavailable());
        driver.set_offline(false);
        assert!(driver.list_workloads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_identity_maps_credential_to_scope() {
        let driver = MockDriver::new();
        let p = driver.resolve_principal("AKIDEXAMPLE").await.unwrap();
        assert_eq!(p.scope, Scope::new("AKIDEXAMPLE"));
        let anon = driver.resolve_principal("").await.unwrap();
        assert_eq!(anon.scope, Scope::default());
    }
}
