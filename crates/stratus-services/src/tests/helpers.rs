//! Shared test utilities for stratus-services tests.

use std::sync::Arc;

use stratus_driver::{DriverRegistry, MockDriver};
use stratus_engine::{EngineConfig, StorageEngine};
use stratus_meta::MetaStore;
use stratus_store::MemoryStore;
use stratus_types::{Capability, Dialect, Scope};

use crate::{Limits, PriceCatalog, RequestContext, Services};

pub fn engine() -> Arc<StorageEngine> {
    Arc::new(StorageEngine::new(
        EngineConfig::default(),
        Arc::new(MetaStore::in_memory()),
        Arc::new(MemoryStore::new(u64::MAX)),
    ))
}

/// A registry binding every capability to one mock backend.
pub fn mock_registry() -> (Arc<DriverRegistry>, Arc<MockDriver>) {
    let mock = Arc::new(MockDriver::new());
    let mut builder = DriverRegistry::builder()
        .register(mock.clone().backend("mock"))
        .unwrap();
    for capability in Capability::ALL {
        builder = builder.bind(capability, "mock");
    }
    (Arc::new(builder.build().unwrap()), mock)
}

pub fn services() -> Services {
    let (registry, _) = mock_registry();
    services_with(registry, Limits::default())
}

pub fn services_with(registry: Arc<DriverRegistry>, limits: Limits) -> Services {
    Services::new(
        engine(),
        registry,
        Arc::new(PriceCatalog::builtin()),
        limits,
    )
}

pub fn scope() -> Scope {
    Scope::new("tenant-a")
}

pub fn ctx(dialect: Dialect) -> RequestContext {
    RequestContext::new(dialect, scope(), "req-1")
}
