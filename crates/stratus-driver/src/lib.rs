//! Driver SPI: capability interfaces and their backends.
//!
//! A backend implements some of the four capability traits
//! ([`ComputeDriver`], [`StorageDriver`], [`NetworkDriver`],
//! [`IdentityDriver`]) and is registered as a [`DriverBackend`], whose
//! [`CapabilityDescriptor`](stratus_types::CapabilityDescriptor) lists exactly
//! the traits it supplies. The [`DriverRegistry`] binds every capability to
//! one backend at startup; callers resolve drivers through it and never see
//! which variant is active.
//!
//! Backends:
//!
//! - [`MockDriver`] — deterministic, in-memory, all four capabilities.
//! - [`FilesystemDriver`] — volumes as files, workloads as local processes.
//! - [`VirtualizationDriver`] — delegates to a container runtime CLI with a
//!   bounded wait on every call.

mod error;
mod filesystem;
mod mock;
mod registry;
mod traits;
mod virtualization;

pub use error::{DriverError, DriverResult, RegistryError};
pub use filesystem::FilesystemDriver;
pub use mock::MockDriver;
pub use registry::{DriverBackend, DriverRegistry, RegistryBuilder};
pub use traits::{
    BLOCK_SIZE, ComputeDriver, IdentityDriver, NetworkDriver, NetworkStatus, Principal,
    StorageDriver, VolumeStatus, WorkloadSpec, WorkloadState, WorkloadStatus,
};
pub use virtualization::{CliRuntime, ContainerRuntime, RuntimeOutput, VirtualizationDriver};
