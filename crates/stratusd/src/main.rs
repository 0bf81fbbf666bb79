//! `stratusd` — the Stratus daemon.
//!
//! Binary entrypoint that opens storage, binds the driver backends and
//! serves the AWS, GCP and Oracle listeners.
//!
//! # Usage
//!
//! ```text
//! stratusd start                               # start with defaults
//! stratusd start -c stratus.toml               # start with a config file
//! stratusd start --memory --aws-addr 127.0.0.1:14566
//! stratusd status                              # summarize persisted state
//! stratusd config                              # print effective configuration
//! ```

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use stratus_driver::{
    CliRuntime, DriverBackend, DriverRegistry, FilesystemDriver, MockDriver, VirtualizationDriver,
};
use stratus_engine::StorageEngine;
use stratus_gateway::{Dispatcher, Gateway};
use stratus_meta::MetaStore;
use stratus_protocol::Detector;
use stratus_services::{Limits, PriceCatalog, Services};
use stratus_store::{BlobStore, FileStore, MemoryStore};
use stratus_types::{Capability, Dialect, ResourceKind, Scope};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use config::{FILESYSTEM, MOCK, StratusConfig, VIRTUALIZATION};

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "stratusd", version, about = "Stratus multi-cloud API emulator")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "STRATUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the emulator.
    Start {
        /// Override data directory.
        #[arg(short, long, env = "STRATUS_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Run fully in-memory (no disk persistence).
        #[arg(short, long, env = "STRATUS_MEMORY")]
        memory: bool,

        /// Override the AWS listen address (e.g. "127.0.0.1:4566").
        #[arg(long, env = "STRATUS_AWS_ADDR")]
        aws_addr: Option<String>,

        /// Override the GCP listen address.
        #[arg(long, env = "STRATUS_GCP_ADDR")]
        gcp_addr: Option<String>,

        /// Override the Oracle listen address.
        #[arg(long, env = "STRATUS_ORACLE_ADDR")]
        oracle_addr: Option<String>,
    },

    /// Summarize persisted state from the local metadata store.
    Status,

    /// Print the effective configuration as TOML.
    Config,
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = StratusConfig::load(cli.config.as_deref()).context("failed to load config")?;

    telemetry::init(&config.log);

    match cli.command {
        Commands::Start {
            data_dir,
            memory,
            aws_addr,
            gcp_addr,
            oracle_addr,
        } => {
            // CLI args override config file values.
            if let Some(dir) = data_dir {
                config.storage.data_dir = dir;
            }
            if memory {
                config.storage.backend = "memory".to_string();
            }
            if let Some(addr) = aws_addr {
                config.server.aws_listen_addr = addr;
            }
            if let Some(addr) = gcp_addr {
                config.server.gcp_listen_addr = addr;
            }
            if let Some(addr) = oracle_addr {
                config.server.oracle_listen_addr = addr;
            }
            config.validate()?;
            cmd_start(config).await
        }
        Commands::Status => cmd_status(&config),
        Commands::Config => {
            config.validate()?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

// -----------------------------------------------------------------------
// Assembly
// -----------------------------------------------------------------------

/// Every long-lived component of a running emulator.
struct Node {
    engine: Arc<StorageEngine>,
    gateway: Arc<Gateway>,
}

async fn build_node(config: &StratusConfig) -> Result<Node> {
    let (meta, blobs) = open_storage(config).await?;
    let engine = Arc::new(StorageEngine::new(config.engine_config(), meta, blobs));

    let resumed = engine
        .recover()
        .await
        .context("failed to recover interrupted deletes")?;
    if resumed > 0 {
        info!(resumed, "startup recovery finished");
    }

    let drivers = Arc::new(build_drivers(config)?);
    let catalog = Arc::new(load_catalog(config)?);
    let services = Arc::new(Services::new(
        engine.clone(),
        drivers,
        catalog,
        Limits {
            max_object_bytes: config.storage.max_object_bytes,
        },
    ));

    let detector = Detector::new(&config.detector).context("invalid detector configuration")?;
    let dispatcher = Arc::new(
        Dispatcher::new(detector, services).with_read_attempts(config.engine.read_retries),
    );
    let gateway = Arc::new(Gateway::new(dispatcher, config.storage.max_object_bytes));

    Ok(Node { engine, gateway })
}

async fn open_storage(config: &StratusConfig) -> Result<(Arc<MetaStore>, Arc<dyn BlobStore>)> {
    if config.is_memory() {
        info!("using in-memory metadata and blob stores");
        return Ok((
            Arc::new(MetaStore::in_memory()),
            Arc::new(MemoryStore::new(u64::MAX)),
        ));
    }

    std::fs::create_dir_all(&config.storage.data_dir).context("failed to create data directory")?;
    let meta = MetaStore::open(config.meta_dir()).context("failed to open metadata store")?;
    let blob_dir = config.blob_dir();
    info!(path = %blob_dir.display(), "using file blob store");
    let blobs = FileStore::new(&blob_dir).context("failed to initialize blob store")?;
    blobs
        .remove_partial_writes()
        .await
        .context("failed to clean up partial payload writes")?;
    Ok((Arc::new(meta), Arc::new(blobs)))
}

/// Register every backend a binding names, then bind capabilities.
///
/// Fails when a binding names an unknown backend or one that does not
/// provide the capability.
fn build_drivers(config: &StratusConfig) -> Result<DriverRegistry> {
    let mut builder = DriverRegistry::builder();
    for name in config.drivers.referenced_backends() {
        builder = builder.register(driver_backend(config, name)?)?;
    }
    for capability in Capability::ALL {
        let backend = config.drivers.default_for(capability);
        debug!(%capability, backend, "binding driver");
        builder = builder.bind(capability, backend);
    }
    for (scope, capability, backend) in config.drivers.overrides() {
        debug!(scope, %capability, backend, "binding scoped driver");
        builder = builder.bind_scoped(Scope::new(scope), capability, backend);
    }
    builder.build().context("invalid driver bindings")
}

fn driver_backend(config: &StratusConfig, name: &str) -> Result<DriverBackend> {
    let backend = match name {
        MOCK => Arc::new(MockDriver::new()).backend(MOCK),
        FILESYSTEM => {
            let root = config.filesystem_root();
            info!(root = %root.display(), "starting filesystem driver");
            let driver = FilesystemDriver::new(&root).context("failed to initialize filesystem driver")?;
            Arc::new(driver).backend(FILESYSTEM)
        }
        VIRTUALIZATION => {
            let binary = &config.drivers.runtime_binary;
            info!(runtime = %binary.display(), "starting virtualization driver");
            Arc::new(VirtualizationDriver::new(
                VIRTUALIZATION,
                Arc::new(CliRuntime::new(binary)),
                config.driver_timeout(),
            ))
            .backend()
        }
        other => bail!(
            "unknown driver backend {other:?} (expected {MOCK}, {FILESYSTEM} or {VIRTUALIZATION})"
        ),
    };
    Ok(backend)
}

fn load_catalog(config: &StratusConfig) -> Result<PriceCatalog> {
    let mut catalog = PriceCatalog::builtin();
    if let Some(path) = &config.pricing.catalog {
        let added = catalog
            .load_file(path)
            .with_context(|| format!("failed to load price catalog {}", path.display()))?;
        info!(added, path = %path.display(), "loaded extra price entries");
    }
    Ok(catalog)
}

/// Drop expired tombstones every `every` until `shutdown` flips.
fn spawn_sweeper(
    engine: Arc<StorageEngine>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => match engine.sweep_tombstones().await {
                    Ok(0) => {}
                    Ok(swept) => debug!(swept, "tombstone sweep"),
                    Err(e) => warn!(error = %e, "tombstone sweep failed"),
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("tombstone sweeper stopped");
    })
}

// -----------------------------------------------------------------------
// stratusd start
// -----------------------------------------------------------------------

async fn cmd_start(config: StratusConfig) -> Result<()> {
    info!("starting stratusd");
    info!(
        data_dir = %config.storage.data_dir.display(),
        backend = %config.storage.backend,
        aws = %config.server.aws_listen_addr,
        gcp = %config.server.gcp_listen_addr,
        oracle = %config.server.oracle_listen_addr,
        "emulator configuration"
    );

    let node = build_node(&config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = spawn_sweeper(node.engine.clone(), config.sweep_interval(), shutdown_rx.clone());

    let mut listeners = JoinSet::new();
    for dialect in Dialect::ALL {
        let addr = config.server.listen_addr(dialect).to_string();
        let gateway = node.gateway.clone();
        let mut shutdown = shutdown_rx.clone();
        listeners.spawn(async move {
            let stop = async move {
                let _ = shutdown.wait_for(|stop| *stop).await;
            };
            gateway
                .serve_with_shutdown(dialect, &addr, stop)
                .await
                .with_context(|| format!("{dialect} listener on {addr} failed"))
        });
    }

    // Run until interrupted or until a listener dies.
    let mut failure = None;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "cannot listen for ctrl-c");
            }
            info!("shutdown requested");
        }
        Some(joined) = listeners.join_next() => {
            failure = Some(listener_result(joined).err().unwrap_or_else(|| {
                anyhow::anyhow!("a listener stopped unexpectedly")
            }));
        }
    }

    let _ = shutdown_tx.send(true);
    while let Some(joined) = listeners.join_next().await {
        if let Err(e) = listener_result(joined) {
            error!(error = %e, "listener failed during shutdown");
        }
    }
    if let Err(e) = sweeper.await {
        warn!(error = %e, "tombstone sweeper panicked");
    }

    node.engine.flush().context("failed to flush metadata")?;
    info!("stratusd stopped");
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn listener_result(joined: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.context("listener task panicked")?
}

// -----------------------------------------------------------------------
// stratusd status
// -----------------------------------------------------------------------

const STATUS_KINDS: [ResourceKind; 5] = [
    ResourceKind::Bucket,
    ResourceKind::Table,
    ResourceKind::Queue,
    ResourceKind::Workload,
    ResourceKind::Volume,
];

fn cmd_status(config: &StratusConfig) -> Result<()> {
    if config.is_memory() {
        println!("In-memory backend: nothing is persisted.");
        return Ok(());
    }
    let meta_path = config.meta_dir();
    let meta = MetaStore::open(&meta_path).map_err(|e| {
        error!(path = %meta_path.display(), %e, "failed to open metadata store");
        anyhow::anyhow!(
            "cannot open metadata at {}. Is stratusd running? ({e})",
            meta_path.display(),
        )
    })?;

    println!("Data directory: {}", config.storage.data_dir.display());
    for kind in STATUS_KINDS {
        println!("  {:<10} {}", kind.as_str(), count_records(&meta, kind)?);
    }
    println!("Tombstones:     {}", meta.list_tombstones()?.len());
    let pending = meta.list_purge_marks()?.len();
    println!("Pending purges: {pending}");
    if pending > 0 {
        println!("Interrupted deletes will be finished at the next start.");
    }
    Ok(())
}

fn count_records(meta: &MetaStore, kind: ResourceKind) -> Result<usize> {
    const CHUNK: usize = 1000;
    let prefix = kind.prefix();
    let mut total = 0;
    let mut after = None;
    loop {
        let page = meta.list_records(&prefix, after.as_ref(), CHUNK)?;
        total += page.len();
        match page.last() {
            Some(last) if page.len() == CHUNK => after = Some(last.id.clone()),
            _ => return Ok(total),
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
