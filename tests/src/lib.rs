//! Shared test harness for Stratus integration tests.
//!
//! Provides [`Emulator`]: the full stack (blob store, metadata store,
//! engine, mock drivers, services, dispatcher and the three listener
//! routers) assembled in-process, driven over HTTP with
//! `tower::ServiceExt::oneshot`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use stratus_driver::{DriverBackend, DriverRegistry, MockDriver};
use stratus_engine::{EngineConfig, StorageEngine};
use stratus_gateway::{Dispatcher, Gateway};
use stratus_meta::MetaStore;
use stratus_protocol::{Detector, DetectorConfig};
use stratus_services::{Limits, PriceCatalog, Services};
use stratus_store::{BlobStore, FileStore, MemoryStore};
use stratus_types::{Capability, Dialect};
use tower::ServiceExt;

/// Where an [`Emulator`] keeps its state.
enum Backing {
    Memory,
    Disk(PathBuf),
}

/// One in-process emulator.
pub struct Emulator {
    engine: Arc<StorageEngine>,
    gateway: Gateway,
    mock: Arc<MockDriver>,
    backing: Backing,
}

impl Emulator {
    /// Fully in-memory emulator.
    pub fn in_memory() -> Self {
        Self::assemble(
            Arc::new(MetaStore::in_memory()),
            Arc::new(MemoryStore::new(u64::MAX)),
            Backing::Memory,
            Limits::default(),
            None,
        )
    }

    /// In-memory metadata over a caller-supplied blob store.
    pub fn with_blobs(blobs: Arc<dyn BlobStore>) -> Self {
        Self::assemble(
            Arc::new(MetaStore::in_memory()),
            blobs,
            Backing::Memory,
            Limits::default(),
            None,
        )
    }

    /// In-memory emulator resolving credentials through `identity`
    /// instead of the mock.
    pub fn with_identity(identity: DriverBackend) -> Self {
        Self::assemble(
            Arc::new(MetaStore::in_memory()),
            Arc::new(MemoryStore::new(u64::MAX)),
            Backing::Memory,
            Limits::default(),
            Some(identity),
        )
    }

    /// In-memory emulator with a small object size limit.
    pub fn with_limits(limits: Limits) -> Self {
        Self::assemble(
            Arc::new(MetaStore::in_memory()),
            Arc::new(MemoryStore::new(u64::MAX)),
            Backing::Memory,
            limits,
            None,
        )
    }

    /// Emulator persisting under `data_dir` (`meta/` and `blobs/`).
    pub async fn on_disk(data_dir: &Path) -> Self {
        let meta = Arc::new(MetaStore::open(data_dir.join("meta")).unwrap());
        let blobs = Arc::new(FileStore::new(data_dir.join("blobs")).unwrap());
        blobs.remove_partial_writes().await.unwrap();
        let emulator = Self::assemble(
            meta,
            blobs,
            Backing::Disk(data_dir.to_path_buf()),
            Limits::default(),
            None,
        );
        emulator.engine.recover().await.unwrap();
        emulator
    }

    fn assemble(
        meta: Arc<MetaStore>,
        blobs: Arc<dyn BlobStore>,
        backing: Backing,
        limits: Limits,
        identity: Option<DriverBackend>,
    ) -> Self {
        let engine = Arc::new(StorageEngine::new(EngineConfig::default(), meta, blobs));
        let mock = Arc::new(MockDriver::new());
        let mut registry = DriverRegistry::builder()
            .register(mock.clone().backend("mock"))
            .unwrap();
        for capability in Capability::ALL {
            registry = registry.bind(capability, "mock");
        }
        if let Some(identity) = identity {
            let name = identity.name().to_string();
            registry = registry
                .register(identity)
                .unwrap()
                .bind(Capability::Identity, name);
        }
        let services = Arc::new(Services::new(
            engine.clone(),
            Arc::new(registry.build().unwrap()),
            Arc::new(PriceCatalog::builtin()),
            limits,
        ));
        let detector = Detector::new(&DetectorConfig::default()).unwrap();
        let gateway = Gateway::new(
            Arc::new(Dispatcher::new(detector, services)),
            limits.max_object_bytes,
        );
        Self {
            engine,
            gateway,
            mock,
            backing,
        }
    }

    /// Flush, drop everything and reopen from the same data directory.
    ///
    /// Panics for in-memory emulators.
    pub async fn restart(self) -> Self {
        let Backing::Disk(dir) = &self.backing else {
            panic!("restart needs an on-disk emulator");
        };
        let dir = dir.clone();
        self.engine.flush().unwrap();
        drop(self);
        Self::on_disk(&dir).await
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    pub fn services(&self) -> &Arc<Services> {
        self.gateway.dispatcher().services()
    }

    /// The shared mock driver (to take it offline, for instance).
    pub fn mock_driver(&self) -> &Arc<MockDriver> {
        &self.mock
    }

    pub fn router(&self, dialect: Dialect) -> Router {
        self.gateway.router(dialect)
    }

    pub fn aws(&self) -> Client {
        Client::new(self.router(Dialect::Aws))
    }

    pub fn gcp(&self) -> Client {
        Client::new(self.router(Dialect::Gcp))
    }

    pub fn oracle(&self) -> Client {
        Client::new(self.router(Dialect::Oracle))
    }
}

// =========================================================================
// HTTP client over a router
// =========================================================================

/// A finished HTTP exchange.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|e| panic!("body is not JSON ({e}): {}", self.text()))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Text of the first `<tag>…</tag>` element.
    pub fn xml(&self, tag: &str) -> Option<String> {
        let body = self.text();
        let open = format!("<{tag}>");
        let start = body.find(&open)? + open.len();
        let end = body[start..].find(&format!("</{tag}>"))? + start;
        Some(body[start..end].to_string())
    }
}

/// Sends requests to one listener's router.
#[derive(Clone)]
pub struct Client {
    router: Router,
}

impl Client {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: impl Into<Body>,
    ) -> Reply {
        let mut request = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = self
            .router
            .clone()
            .oneshot(request.body(body.into()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        Reply {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> Reply {
        self.send("GET", uri, &[], Body::empty()).await
    }

    pub async fn delete(&self, uri: &str) -> Reply {
        self.send("DELETE", uri, &[], Body::empty()).await
    }

    pub async fn put(&self, uri: &str, body: impl Into<Body>) -> Reply {
        self.send("PUT", uri, &[], body).await
    }

    /// A JSON body with `content-type: application/json`.
    pub async fn json(&self, method: &str, uri: &str, body: Value) -> Reply {
        self.send(
            method,
            uri,
            &[("content-type", "application/json")],
            body.to_string(),
        )
        .await
    }

    /// An AWS JSON-protocol call routed by `x-amz-target`.
    pub async fn target(&self, target: &str, body: Value) -> Reply {
        self.send(
            "POST",
            "/",
            &[
                ("x-amz-target", target),
                ("content-type", "application/x-amz-json-1.0"),
            ],
            body.to_string(),
        )
        .await
    }

    /// An AWS Query-protocol call.
    pub async fn form(&self, body: &str) -> Reply {
        self.send(
            "POST",
            "/",
            &[("content-type", "application/x-www-form-urlencoded")],
            body.to_string(),
        )
        .await
    }
}

/// An S3 SigV4 `Authorization` header naming `access_key`.
pub fn sigv4(access_key: &str) -> String {
    format!(
        "AWS4-HMAC-SHA256 Credential={access_key}/20240101/us-east-1/s3/aws4_request, \
         SignedHeaders=host, Signature=0"
    )
}

/// Deterministic, non-repeating test data with a specific seed.
pub fn test_data_seeded(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}
