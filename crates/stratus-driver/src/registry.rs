//! [`DriverRegistry`] — capability bindings fixed at startup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use stratus_types::{Capability, CapabilityDescriptor, Scope};
use tracing::info;

use crate::error::{DriverError, DriverResult, RegistryError};
use crate::traits::{ComputeDriver, IdentityDriver, NetworkDriver, StorageDriver};

/// A named backend and the capability interfaces it supplies.
///
/// The descriptor is derived from the interfaces attached, so a backend
/// can never advertise a capability it does not implement.
#[derive(Clone)]
pub struct DriverBackend {
    name: String,
    compute: Option<Arc<dyn ComputeDriver>>,
    storage: Option<Arc<dyn StorageDriver>>,
    network: Option<Arc<dyn NetworkDriver>>,
    identity: Option<Arc<dyn IdentityDriver>>,
}

impl DriverBackend {
    /// A backend with no capabilities yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compute: None,
            storage: None,
            network: None,
            identity: None,
        }
    }

    /// Supply the compute capability.
    pub fn with_compute(mut self, driver: Arc<dyn ComputeDriver>) -> Self {
        self.compute = Some(driver);
        self
    }

    /// Supply the storage capability.
    pub fn with_storage(mut self, driver: Arc<dyn StorageDriver>) -> Self {
        self.storage = Some(driver);
        self
    }

    /// Supply the network capability.
    pub fn with_network(mut self, driver: Arc<dyn NetworkDriver>) -> Self {
        self.network = Some(driver);
        self
    }

    /// Supply the identity capability.
    pub fn with_identity(mut self, driver: Arc<dyn IdentityDriver>) -> Self {
        self.identity = Some(driver);
        self
    }

    /// Backend name used in bindings.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capabilities this backend provides.
    pub fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            [
                self.compute.as_ref().map(|_| Capability::Compute),
                self.storage.as_ref().map(|_| Capability::Storage),
                self.network.as_ref().map(|_| Capability::Network),
                self.identity.as_ref().map(|_| Capability::Identity),
            ]
            .into_iter()
            .flatten(),
        )
    }
}

/// Drivers bound for one scope (or the default).
#[derive(Clone, Default)]
struct Bindings {
    compute: Option<(String, Arc<dyn ComputeDriver>)>,
    storage: Option<(String, Arc<dyn StorageDriver>)>,
    network: Option<(String, Arc<dyn NetworkDriver>)>,
    identity: Option<(String, Arc<dyn IdentityDriver>)>,
}

impl Bindings {
    fn bind(&mut self, capability: Capability, backend: &DriverBackend) -> Result<(), RegistryError> {
        let name = backend.name.clone();
        let missing = || RegistryError::MissingCapability {
            backend: backend.name.clone(),
            capability,
        };
        match capability {
            Capability::Compute => {
                self.compute = Some((name, backend.compute.clone().ok_or_else(missing)?))
            }
            Capability::Storage => {
                self.storage = Some((name, backend.storage.clone().ok_or_else(missing)?))
            }
            Capability::Network => {
                self.network = Some((name, backend.network.clone().ok_or_else(missing)?))
            }
            Capability::Identity => {
                self.identity = Some((name, backend.identity.clone().ok_or_else(missing)?))
            }
        }
        Ok(())
    }

    fn backend_name(&self, capability: Capability) -> Option<&str> {
        match capability {
            Capability::Compute => self.compute.as_ref().map(|(n, _)| n.as_str()),
            Capability::Storage => self.storage.as_ref().map(|(n, _)| n.as_str()),
            Capability::Network => self.network.as_ref().map(|(n, _)| n.as_str()),
            Capability::Identity => self.identity.as_ref().map(|(n, _)| n.as_str()),
        }
    }
}

/// Builder for a [`DriverRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    backends: BTreeMap<String, DriverBackend>,
    defaults: Vec<(Capability, String)>,
    scoped: Vec<(Scope, Capability, String)>,
}

impl RegistryBuilder {
    /// Register a backend under its name.
    pub fn register(mut self, backend: DriverBackend) -> Result<Self, RegistryError> {
        if self.backends.contains_key(backend.name()) {
            return Err(RegistryError::DuplicateBackend(backend.name));
        }
        self.backends.insert(backend.name.clone(), backend);
        Ok(self)
    }

    /// Bind `capability` to `backend` for every scope without an override.
    pub fn bind(mut self, capability: Capability, backend: impl Into<String>) -> Self {
        self.defaults.push((capability, backend.into()));
        self
    }

    /// Bind `capability` to `backend` for one scope only.
    pub fn bind_scoped(
        mut self,
        scope: Scope,
        capability: Capability,
        backend: impl Into<String>,
    ) -> Self {
        self.scoped.push((scope, capability, backend.into()));
        self
    }

    /// Resolve every binding. Fails if a binding names an unknown backend
    /// or one whose descriptor lacks the capability.
    pub fn build(self) -> Result<DriverRegistry, RegistryError> {
        let mut defaults = Bindings::default();
        for (capability, name) in &self.defaults {
            defaults.bind(*capability, self.backend(name)?)?;
        }

        let mut scoped: HashMap<Scope, Bindings> = HashMap::new();
        for (scope, capability, name) in &self.scoped {
            let backend = self.backend(name)?;
            scoped
                .entry(scope.clone())
                .or_default()
                .bind(*capability, backend)?;
        }

        for capability in Capability::ALL {
            if let Some(backend) = defaults.backend_name(capability) {
                info!(%capability, backend, "driver bound");
            }
        }

        Ok(DriverRegistry {
            descriptors: self
                .backends
                .iter()
                .map(|(name, b)| (name.clone(), b.descriptor()))
                .collect(),
            defaults,
            scoped,
        })
    }

    fn backend(&self, name: &str) -> Result<&DriverBackend, RegistryError> {
        self.backends
            .get(name)
            .ok_or_else(|| RegistryError::UnknownBackend(name.to_string()))
    }
}

/// Resolves capability drivers for a scope.
///
/// Bindings are immutable after [`RegistryBuilder::build`]; nothing is
/// re-resolved per request.
#[derive(Clone)]
pub struct DriverRegistry {
    descriptors: BTreeMap<String, CapabilityDescriptor>,
    defaults: Bindings,
    scoped: HashMap<Scope, Bindings>,
}

macro_rules! resolve {
    ($self:ident, $scope:ident, $field:ident, $cap:expr) => {
        $self
            .scoped
            .get($scope)
            .and_then(|b| b.$field.as_ref())
            .or($self.defaults.$field.as_ref())
            .map(|(_, d)| Arc::clone(d))
            .ok_or(DriverError::CapabilityUnavailable($cap))
    };
}

impl DriverRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// A registry with nothing bound.
    pub fn empty() -> Self {
        Self {
            descriptors: BTreeMap::new(),
            defaults: Bindings::default(),
            scoped: HashMap::new(),
        }
    }

    /// Compute driver for `scope`.
    pub fn compute(&self, scope: &Scope) -> DriverResult<Arc<dyn ComputeDriver>> {
        resolve!(self, scope, compute, Capability::Compute)
    }

    /// Storage driver for `scope`.
    pub fn storage(&self, scope: &Scope) -> DriverResult<Arc<dyn StorageDriver>> {
        resolve!(self, scope, storage, Capability::Storage)
    }

    /// Network driver for `scope`.
    pub fn network(&self, scope: &Scope) -> DriverResult<Arc<dyn NetworkDriver>> {
        resolve!(self, scope, network, Capability::Network)
    }

    /// Identity driver for `scope`.
    pub fn identity(&self, scope: &Scope) -> DriverResult<Arc<dyn IdentityDriver>> {
        resolve!(self, scope, identity, Capability::Identity)
    }

    /// Whether `capability` is bound for `scope`.
    pub fn is_bound(&self, scope: &Scope, capability: Capability) -> bool {
        self.bound_backend(scope, capability).is_some()
    }

    /// Name of the backend serving `capability` for `scope`.
    pub fn bound_backend(&self, scope: &Scope, capability: Capability) -> Option<&str> {
        self.scoped
            .get(scope)
            .and_then(|b| b.backend_name(capability))
            .or_else(|| self.defaults.backend_name(capability))
    }

    /// Descriptor of a registered backend.
    pub fn descriptor(&self, backend: &str) -> Option<&CapabilityDescriptor> {
        self.descriptors.get(backend)
    }
}
