//! TOML configuration for the Stratus daemon.
//!
//! Every section is optional; a missing file or an empty one gives a
//! daemon that listens on the default ports and persists under
//! `~/.stratus`. The configuration is fixed for the life of the process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use stratus_engine::EngineConfig;
use stratus_protocol::DetectorConfig;
use stratus_services::limits::DEFAULT_MAX_OBJECT_BYTES;
use stratus_types::{Capability, Dialect};

/// Built-in driver backend names.
pub const MOCK: &str = "mock";
pub const FILESYSTEM: &str = "filesystem";
pub const VIRTUALIZATION: &str = "virtualization";

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StratusConfig {
    /// Listener addresses, one per provider family.
    pub server: ServerSection,
    /// Data directory and blob backend.
    pub storage: StorageSection,
    /// Storage engine tunables.
    pub engine: EngineSection,
    /// Driver backend bindings.
    pub drivers: DriversSection,
    /// Per-dialect detection strategy order.
    pub detector: DetectorConfig,
    /// Price catalog extras.
    pub pricing: PricingSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[server]` section.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub aws_listen_addr: String,
    pub gcp_listen_addr: String,
    pub oracle_listen_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            aws_listen_addr: "0.0.0.0:4566".to_string(),
            gcp_listen_addr: "0.0.0.0:4567".to_string(),
            oracle_listen_addr: "0.0.0.0:4568".to_string(),
        }
    }
}

impl ServerSection {
    /// Listen address for one provider family.
    pub fn listen_addr(&self, dialect: Dialect) -> &str {
        match dialect {
            Dialect::Aws => &self.aws_listen_addr,
            Dialect::Gcp => &self.gcp_listen_addr,
            Dialect::Oracle => &self.oracle_listen_addr,
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directory holding `meta/` and `blobs/`.
    pub data_dir: PathBuf,
    /// Backend type: `"file"` (default) or `"memory"`.
    pub backend: String,
    /// Largest accepted object payload.
    pub max_object_bytes: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".stratus"))
            .unwrap_or_else(|| PathBuf::from(".stratus"));
        Self {
            data_dir,
            backend: "file".to_string(),
            max_object_bytes: DEFAULT_MAX_OBJECT_BYTES,
        }
    }
}

/// `[engine]` section.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// How long a deleted id answers "already deleted".
    pub tombstone_ttl_secs: u64,
    /// Period of the tombstone sweeper.
    pub sweep_interval_secs: u64,
    /// Attempts a read-only request gets while storage is unavailable.
    pub read_retries: u32,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            tombstone_ttl_secs: 300,
            sweep_interval_secs: 60,
            read_retries: stratus_gateway::READ_ATTEMPTS,
        }
    }
}

/// `[drivers]` section.
///
/// ```toml
/// [drivers]
/// compute = "virtualization"
/// storage = "filesystem"
///
/// [drivers.scopes.AKIDTESTING]
/// compute = "mock"
/// ```
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DriversSection {
    pub compute: String,
    pub storage: String,
    pub network: String,
    pub identity: String,
    /// Per-scope overrides, keyed by scope id.
    pub scopes: BTreeMap<String, ScopeDrivers>,
    /// Root of the filesystem driver. Defaults to `<data_dir>/drivers`.
    pub filesystem_root: Option<PathBuf>,
    /// Container runtime used by the virtualization driver.
    pub runtime_binary: PathBuf,
    /// Bound on every external backend call.
    pub timeout_ms: u64,
}

impl Default for DriversSection {
    fn default() -> Self {
        Self {
            compute: MOCK.to_string(),
            storage: MOCK.to_string(),
            network: MOCK.to_string(),
            identity: MOCK.to_string(),
            scopes: BTreeMap::new(),
            filesystem_root: None,
            runtime_binary: PathBuf::from("docker"),
            timeout_ms: 30_000,
        }
    }
}

/// One `[drivers.scopes.<id>]` table.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeDrivers {
    pub compute: Option<String>,
    pub storage: Option<String>,
    pub network: Option<String>,
    pub identity: Option<String>,
}

impl ScopeDrivers {
    fn get(&self, capability: Capability) -> Option<&str> {
        match capability {
            Capability::Compute => self.compute.as_deref(),
            Capability::Storage => self.storage.as_deref(),
            Capability::Network => self.network.as_deref(),
            Capability::Identity => self.identity.as_deref(),
        }
    }
}

impl DriversSection {
    /// Default backend bound to `capability`.
    pub fn default_for(&self, capability: Capability) -> &str {
        match capability {
            Capability::Compute => &self.compute,
            Capability::Storage => &self.storage,
            Capability::Network => &self.network,
            Capability::Identity => &self.identity,
        }
    }

    /// `(scope, capability, backend)` for every per-scope override.
    pub fn overrides(&self) -> impl Iterator<Item = (&str, Capability, &str)> {
        self.scopes.iter().flat_map(|(scope, drivers)| {
            Capability::ALL
                .into_iter()
                .filter_map(move |c| Some((scope.as_str(), c, drivers.get(c)?)))
        })
    }

    /// Every backend name some binding refers to, deduplicated.
    pub fn referenced_backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Capability::ALL
            .into_iter()
            .map(|c| self.default_for(c))
            .chain(self.overrides().map(|(_, _, backend)| backend))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// `[pricing]` section.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingSection {
    /// JSON file of extra price entries merged over the built-in catalog.
    pub catalog: Option<PathBuf>,
}

/// `[log]` section.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"stratus_engine=debug"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl StratusConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("cannot read {}", p.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("cannot parse {}", p.display()))?
            }
            None => Self::default(),
        };
        Ok(config)
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Reject values no component would accept.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(self.storage.backend.as_str(), "file" | "memory") {
            bail!(
                "storage.backend must be \"file\" or \"memory\", got {:?}",
                self.storage.backend
            );
        }
        if self.storage.max_object_bytes == 0 {
            bail!("storage.max_object_bytes must be positive");
        }
        if self.drivers.timeout_ms == 0 {
            bail!("drivers.timeout_ms must be positive");
        }
        Ok(())
    }

    /// Effective configuration as TOML, for `stratusd config`.
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn is_memory(&self) -> bool {
        self.storage.backend == "memory"
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.storage.data_dir.join("meta")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.storage.data_dir.join("blobs")
    }

    pub fn filesystem_root(&self) -> PathBuf {
        self.drivers
            .filesystem_root
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("drivers"))
    }

    pub fn driver_timeout(&self) -> Duration {
        Duration::from_millis(self.drivers.timeout_ms)
    }

    /// Tombstone sweeper period; never zero.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.engine.sweep_interval_secs.max(1))
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            tombstone_ttl: Duration::from_secs(self.engine.tombstone_ttl_secs),
        }
    }
}
