//! Driver delegating to an external container runtime (`docker`, `podman`).
//!
//! Every runtime invocation is bounded by the configured timeout. Expiry is
//! reported as [`DriverError::Timeout`] and launch failures as
//! [`DriverError::Unavailable`]; nothing is retried here, since retrying a
//! workload creation could provision twice.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{DriverError, DriverResult};
use crate::registry::DriverBackend;
use crate::traits::{
    ComputeDriver, NetworkDriver, NetworkStatus, WorkloadSpec, WorkloadState, WorkloadStatus,
    validate_id,
};

/// Prefix of every container and network name the driver manages.
const NAME_PREFIX: &str = "stratus-";
const MANAGED_LABEL: &str = "stratus.managed=true";

/// Captured result of one runtime invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOutput {
    /// Whether the runtime exited successfully.
    pub success: bool,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

/// Executes container runtime commands.
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Run the runtime with `args` and capture its output.
    async fn exec(&self, args: Vec<String>) -> std::io::Result<RuntimeOutput>;
}

/// Runs a container runtime binary found on `PATH` or at a fixed path.
pub struct CliRuntime {
    binary: PathBuf,
}

impl CliRuntime {
    /// Use `binary` (e.g. `docker`, `podman`, `/usr/local/bin/docker`).
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for CliRuntime {
    async fn exec(&self, args: Vec<String>) -> std::io::Result<RuntimeOutput> {
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(RuntimeOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Compute and network driver over a [`ContainerRuntime`].
pub struct VirtualizationDriver {
    name: String,
    runtime: Arc<dyn ContainerRuntime>,
    timeout: Duration,
}

impl VirtualizationDriver {
    /// Create a driver that bounds every runtime call by `timeout`.
    pub fn new(
        name: impl Into<String>,
        runtime: Arc<dyn ContainerRuntime>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            runtime,
            timeout,
        }
    }

    /// Wrap as a registry backend (compute, network).
    pub fn backend(self: Arc<Self>) -> DriverBackend {
        DriverBackend::new(self.name.clone())
            .with_compute(self.clone())
            .with_network(self)
    }

    /// Run one runtime command and return its stdout.
    async fn run(&self, operation: &'static str, args: Vec<String>) -> DriverResult<String> {
        debug!(backend = %self.name, operation, ?args, "invoking container runtime");
        let output = match tokio::time::timeout(self.timeout, self.runtime.exec(args)).await {
            Err(_) => {
                warn!(backend = %self.name, operation, timeout = ?self.timeout, "container runtime timed out");
                return Err(DriverError::Timeout {
                    backend: self.name.clone(),
                    operation,
                    after: self.timeout,
                });
            }
            Ok(Err(e)) => {
                return Err(DriverError::Unavailable {
                    backend: self.name.clone(),
                    reason: format!("failed to launch runtime: {e}"),
                });
            }
            Ok(Ok(output)) => output,
        };
        if output.success {
            return Ok(output.stdout);
        }
        Err(self.classify_failure(operation, output.stderr.trim()))
    }

    fn classify_failure(&self, operation: &'static str, stderr: &str) -> DriverError {
        let lower = stderr.to_ascii_lowercase();
        let kind = if operation.contains("network") {
            "network"
        } else {
            "workload"
        };
        if lower.contains("no such") || lower.contains("not found") {
            DriverError::NotFound {
                kind,
                id: stderr.to_string(),
            }
        } else if lower.contains("already in use") || lower.contains("already exists") {
            DriverError::AlreadyExists {
                kind,
                id: stderr.to_string(),
            }
        } else {
            DriverError::Unavailable {
                backend: self.name.clone(),
                reason: format!("{operation} failed: {stderr}"),
            }
        }
    }
}

fn managed(id: &str) -> String {
    format!("{NAME_PREFIX}{id}")
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn parse_state(raw: &str) -> WorkloadState {
    match raw.trim() {
        "running" => WorkloadState::Running,
        "created" | "restarting" => WorkloadState::Pending,
        _ => WorkloadState::Stopped,
    }
}

#[async_trait::async_trait]
impl ComputeDriver for VirtualizationDriver {
    async fn create_workload(&self, spec: &WorkloadSpec) -> DriverResult<WorkloadStatus> {
        validate_id("workload", &spec.id)?;
        let name = managed(&spec.id);
        let mut cmd = args(["run", "-d", "--label", MANAGED_LABEL, "--name"]);
        cmd.push(name);
        cmd.push("--cpus".into());
        cmd.push(spec.cpus.max(1).to_string());
        cmd.push("--memory".into());
        cmd.push(format!("{}m", spec.memory_mb.max(6)));
        cmd.push(spec.image.clone());
        cmd.extend(spec.command.iter().cloned());

        self.run("create_workload", cmd).await?;
        info!(backend = %self.name, workload = %spec.id, image = %spec.image, "container started");
        self.workload_status(&spec.id).await
    }

    async fn destroy_workload(&self, id: &str) -> DriverResult<()> {
        validate_id("workload", id)?;
        let mut cmd = args(["rm", "-f"]);
        cmd.push(managed(id));
        self.run("destroy_workload", cmd).await?;
        info!(backend = %self.name, workload = id, "container removed");
        Ok(())
    }

    async fn workload_status(&self, id: &str) -> DriverResult<WorkloadStatus> {
        validate_id("workload", id)?;
        let mut cmd = args([
            "inspect",
            "--format",
            "{{.State.Status}}|{{range .NetworkSettings.Networks}}{{.IPAddress}} {{end}}",
        ]);
        cmd.push(managed(id));
        let out = self.run("workload_status", cmd).await?;
        let (state, ips) = out.trim().split_once('|').unwrap_or((out.trim(), ""));
        Ok(WorkloadStatus {
            id: id.to_string(),
            state: parse_state(state),
            ip_address: ips.split_whitespace().next().map(str::to_string),
            volumes: Vec::new(),
        })
    }

    async fn list_workloads(&self) -> DriverResult<Vec<WorkloadStatus>> {
        let cmd = args([
            "ps",
            "-a",
            "--filter",
            "label=stratus.managed=true",
            "--format",
            "{{.Names}}|{{.State}}",
        ]);
        let out = self.run("list_workloads", cmd).await?;
        let mut workloads: Vec<WorkloadStatus> = out
            .lines()
            .filter_map(|line| {
                let (name, state) = line.trim().split_once('|')?;
                Some(WorkloadStatus {
                    id: name.strip_prefix(NAME_PREFIX)?.to_string(),
                    state: parse_state(state),
                    ip_address: None,
                    volumes: Vec::new(),
                })
            })
            .collect();
        workloads.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workloads)
    }

    async fn attach_volume(&self, _workload: &str, _volume: &str) -> DriverResult<()> {
        Err(DriverError::Unsupported {
            backend: self.name.clone(),
            operation: "attach_volume",
        })
    }
}

#[async_trait::async_trait]
impl NetworkDriver for VirtualizationDriver {
    async fn create_network(&self, id: &str, cidr: &str) -> DriverResult<NetworkStatus> {
        validate_id("network", id)?;
        let mut cmd = args(["network", "create", "--label", MANAGED_LABEL, "--subnet"]);
        cmd.push(cidr.to_string());
        cmd.push(managed(id));
        self.run("create_network", cmd).await?;
        info!(backend = %self.name, network = id, cidr, "network created");
        Ok(NetworkStatus {
            id: id.to_string(),
            cidr: cidr.to_string(),
        })
    }

    async fn delete_network(&self, id: &str) -> DriverResult<()> {
        validate_id("network", id)?;
        let mut cmd = args(["network", "rm"]);
        cmd.push(managed(id));
        self.run("delete_network", cmd).await?;
        Ok(())
    }

    async fn connect_workload(&self, network: &str, workload: &str) -> DriverResult<String> {
        validate_id("network", network)?;
        validate_id("workload", workload)?;
        let mut cmd = args(["network", "connect"]);
        cmd.push(managed(network));
        cmd.push(managed(workload));
        self.run("connect_network", cmd).await?;

        let mut cmd = args(["inspect", "--format"]);
        cmd.push(format!(
            "{{{{(index .NetworkSettings.Networks \"{}\").IPAddress}}}}",
            managed(network)
        ));
        cmd.push(managed(workload));
        let ip = self.run("inspect_network", cmd).await?;
        Ok(ip.trim().to_string())
    }

    async fn list_networks(&self) -> DriverResult<Vec<NetworkStatus>> {
        let cmd = args([
            "network",
            "ls",
            "--filter",
            "label=stratus.managed=true",
            "--format",
            "{{.Name}}",
        ]);
        let names = self.run("list_networks", cmd).await?;
        let mut networks = Vec::new();
        for name in names.lines().map(str::trim) {
            let Some(id) = name.strip_prefix(NAME_PREFIX) else {
                continue;
            };
            let mut cmd = args([
                "network",
                "inspect",
                "--format",
                "{{range .IPAM.Config}}{{.Subnet}}{{end}}",
            ]);
            cmd.push(name.to_string());
            let cidr = self.run("inspect_network", cmd).await?;
            networks.push(NetworkStatus {
                id: id.to_string(),
                cidr: cidr.trim().to_string(),
            });
        }
        networks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(networks)
    }
}
