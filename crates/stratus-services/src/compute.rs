//! Workloads and volumes backed by the bound drivers.
//!
//! The driver does the real work; a `workload/<id>` or `volume/<id>` record
//! tracks ownership and what the driver reported at launch.

use std::collections::HashMap;
use std::sync::Arc;

use stratus_driver::{DriverError, DriverRegistry, NetworkDriver, WorkloadSpec, WorkloadStatus};
use stratus_engine::{DeleteOutcome, EngineError, StorageEngine};
use stratus_types::{Attributes, Capability, ResourceId, ResourceKind, ResourceRecord, Scope};
use tracing::{info, warn};

use crate::error::ServiceError;
use crate::limits;
use crate::model::{VolumeInfo, WorkloadInfo, WorkloadRequest};
use crate::records;

/// Network every workload joins when a network driver is bound.
pub const DEFAULT_NETWORK: &str = "stratus-default";
/// Address range of [`DEFAULT_NETWORK`].
pub const DEFAULT_NETWORK_CIDR: &str = "10.89.0.0/24";

const IMAGE: &str = "image";
const STATE: &str = "state";
const IP: &str = "ip";
const ZONE: &str = "zone";
const VOLUMES: &str = "volumes";
const SIZE: &str = "size_bytes";

const TERMINATED: &str = "terminated";

/// Compute handler.
pub struct Compute {
    engine: Arc<StorageEngine>,
    drivers: Arc<DriverRegistry>,
}

impl Compute {
    pub fn new(engine: Arc<StorageEngine>, drivers: Arc<DriverRegistry>) -> Self {
        Self { engine, drivers }
    }

    /// Launch a workload through the compute driver.
    ///
    /// The record is claimed first, so two launches with the same name
    /// cannot both reach the driver; a failed launch releases it.
    pub async fn create_workload(
        &self,
        request: WorkloadRequest,
        scope: &Scope,
        request_id: &str,
    ) -> Result<WorkloadInfo, ServiceError> {
        if request.image.is_empty() {
            return Err(ServiceError::validation("image must not be empty"));
        }
        let id = match request.name {
            Some(name) => {
                limits::validate_resource_name("workload", &name)?;
                name
            }
            None => records::generate_id("i-", request_id),
        };
        // Fail on a missing binding before claiming the id.
        self.drivers.compute(scope)?;

        let mut attrs = Attributes::from([
            (IMAGE.to_string(), request.image.clone()),
            (STATE.to_string(), "pending".to_string()),
        ]);
        if let Some(zone) = &request.zone {
            attrs.insert(ZONE.to_string(), zone.clone());
        }
        let rid = workload_id(&id);
        self.engine.create(&rid, scope, attrs, Vec::new()).await?;

        let spec = WorkloadSpec {
            command: request.command,
            cpus: request.cpus.max(1),
            memory_mb: request.memory_mb.max(1),
            ..WorkloadSpec::new(&id, &request.image)
        };
        let launched = match self.launch(&spec, scope).await {
            Ok(launched) => launched,
            Err(e) => {
                warn!(workload = %id, error = %e, "workload launch failed, releasing record");
                if let Err(cleanup) = self.engine.discard(&rid).await {
                    warn!(workload = %id, error = %cleanup, "failed to release workload record");
                }
                return Err(e);
            }
        };

        let state = launched.state.as_str().to_string();
        let ip = launched.ip_address.clone();
        let record = self
            .engine
            .update(&rid, None, move |attrs| {
                attrs.insert(STATE.to_string(), state);
                if let Some(ip) = ip {
                    attrs.insert(IP.to_string(), ip);
                }
            })
            .await?;
        info!(workload = %id, image = %request.image, "workload_created");
        Ok(workload_info(&record, Some(&launched)))
    }

    /// Start the workload and connect it. A workload that cannot be
    /// connected is destroyed again before the error is returned.
    async fn launch(&self, spec: &WorkloadSpec, scope: &Scope) -> Result<WorkloadStatus, ServiceError> {
        let driver = self.drivers.compute(scope)?;
        let mut status = driver.create_workload(spec).await?;
        if !self.drivers.is_bound(scope, Capability::Network) {
            return Ok(status);
        }
        match self.connect(&spec.id, scope).await {
            Ok(ip) => {
                status.ip_address = Some(ip);
                Ok(status)
            }
            Err(e) => {
                if let Err(cleanup) = driver.destroy_workload(&spec.id).await {
                    warn!(workload = %spec.id, error = %cleanup, "failed to destroy unconnected workload");
                }
                Err(e)
            }
        }
    }

    async fn connect(&self, workload: &str, scope: &Scope) -> Result<String, ServiceError> {
        let network = self.drivers.network(scope)?;
        ensure_default_network(network.as_ref()).await?;
        Ok(network.connect_workload(DEFAULT_NETWORK, workload).await?)
    }

    /// The workload's record merged with its live driver status.
    pub async fn get_workload(&self, id: &str, scope: &Scope) -> Result<WorkloadInfo, ServiceError> {
        let record = self.engine.get(&workload_id(id)).await?;
        let driver = self.drivers.compute(scope)?;
        let live = match driver.workload_status(id).await {
            Ok(status) => Some(status),
            Err(DriverError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(workload_info(&record, live.as_ref()))
    }

    /// Every workload owned by `scope`.
    pub async fn list_workloads(&self, scope: &Scope) -> Result<Vec<WorkloadInfo>, ServiceError> {
        let records = records::list_all_owned(&self.engine, ResourceKind::Workload, scope).await?;
        let driver = self.drivers.compute(scope)?;
        let live: HashMap<String, WorkloadStatus> = driver
            .list_workloads()
            .await?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        Ok(records
            .iter()
            .map(|r| workload_info(r, live.get(r.id.name())))
            .collect())
    }

    /// Stop the workload and drop its record. Returns whether it existed
    /// (false on a tombstone hit).
    pub async fn delete_workload(&self, id: &str, scope: &Scope) -> Result<bool, ServiceError> {
        let rid = workload_id(id);
        match self.engine.get(&rid).await {
            Ok(_) => {}
            // Let the engine decide between a tombstone hit and NotFound.
            Err(EngineError::NotFound { .. }) => {
                return Ok(matches!(
                    self.engine.delete(&rid).await?,
                    DeleteOutcome::Deleted { .. }
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let driver = self.drivers.compute(scope)?;
        match driver.destroy_workload(id).await {
            Ok(()) | Err(DriverError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        let outcome = self.engine.delete(&rid).await?;
        info!(workload = %id, "workload_deleted");
        Ok(matches!(outcome, DeleteOutcome::Deleted { .. }))
    }

    /// Provision a block volume through the storage driver.
    pub async fn create_volume(
        &self,
        id: Option<String>,
        size_bytes: u64,
        scope: &Scope,
        request_id: &str,
    ) -> Result<VolumeInfo, ServiceError> {
        if size_bytes == 0 {
            return Err(ServiceError::validation("volume size must be positive"));
        }
        let id = match id {
            Some(id) => {
                limits::validate_resource_name("volume", &id)?;
                id
            }
            None => records::generate_id("vol-", request_id),
        };
        let driver = self.drivers.storage(scope)?;
        let status = driver.create_volume(&id, size_bytes).await?;

        let attrs = Attributes::from([(SIZE.to_string(), status.size_bytes.to_string())]);
        let record = match self
            .engine
            .create(&volume_id(&id), scope, attrs, Vec::new())
            .await
        {
            Ok(record) => record,
            Err(e) => {
                if let Err(cleanup) = driver.delete_volume(&id).await {
                    warn!(volume = %id, error = %cleanup, "failed to release volume");
                }
                return Err(e.into());
            }
        };
        info!(volume = %id, size_bytes = status.size_bytes, "volume_created");
        Ok(VolumeInfo {
            id,
            size_bytes: status.size_bytes,
            created_at: record.created_at,
        })
    }

    /// Attach `volume` to `workload`; both must exist.
    pub async fn attach_volume(
        &self,
        workload: &str,
        volume: &str,
        scope: &Scope,
    ) -> Result<(), ServiceError> {
        let rid = workload_id(workload);
        self.engine.get(&rid).await?;
        self.engine.get(&volume_id(volume)).await?;

        let driver = self.drivers.compute(scope)?;
        driver.attach_volume(workload, volume).await?;

        let volume_name = volume.to_string();
        self.engine
            .update(&rid, None, move |attrs| {
                let mut volumes = split_list(attrs.get(VOLUMES).map(String::as_str));
                if !volumes.contains(&volume_name) {
                    volumes.push(volume_name);
                }
                attrs.insert(VOLUMES.to_string(), volumes.join(","));
            })
            .await?;
        info!(workload, volume, "volume_attached");
        Ok(())
    }
}

async fn ensure_default_network(network: &dyn NetworkDriver) -> Result<(), ServiceError> {
    match network.create_network(DEFAULT_NETWORK, DEFAULT_NETWORK_CIDR).await {
        Ok(_) | Err(DriverError::AlreadyExists { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn workload_id(id: &str) -> ResourceId {
    ResourceId::new(ResourceKind::Workload, id)
}

fn volume_id(id: &str) -> ResourceId {
    ResourceId::new(ResourceKind::Volume, id)
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn workload_info(record: &ResourceRecord, live: Option<&WorkloadStatus>) -> WorkloadInfo {
    let mut volumes = split_list(record.attr(VOLUMES));
    if let Some(status) = live {
        for v in &status.volumes {
            if !volumes.contains(v) {
                volumes.push(v.clone());
            }
        }
    }
    WorkloadInfo {
        id: record.id.name().to_string(),
        image: record.attr(IMAGE).unwrap_or_default().to_string(),
        state: live.map_or(TERMINATED, |s| s.state.as_str()).to_string(),
        ip_address: live
            .and_then(|s| s.ip_address.clone())
            .or_else(|| record.attr(IP).map(str::to_string)),
        volumes,
        zone: record.attr(ZONE).map(str::to_string),
        created_at: record.created_at,
    }
}
