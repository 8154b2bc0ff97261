//! wardend - The warden background service
//!
//! This is the main entry point for the wardend service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Driver registry and device directory
//! - Session manager
//! - Reconciliation scheduler

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use warden_config::{Policy, load_config};
use warden_core::{CoreEvent, DeviceDirectory, Reconciler, SessionManager};
use warden_driver_api::{DriverRegistry, PollDriver};
use warden_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use warden_util::{DATABASE_FILENAME, default_config_path};

/// How long shutdown waits for an in-progress sweep
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// wardend - Screen-time quota enforcement service
#[derive(Parser, Debug)]
#[command(name = "wardend")]
#[command(about = "Screen-time quota enforcement service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/warden/config.toml)
    #[arg(short, long, env = "WARDEN_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set WARDEN_DATA_DIR env var)
    #[arg(short, long, env = "WARDEN_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    manager: Arc<SessionManager>,
    store: Arc<dyn Store>,
    tick_interval: Duration,
}

impl Service {
    fn new(args: &Args) -> Result<Self> {
        // Load configuration
        let policy = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            children = policy.children.len(),
            devices = policy.devices.len(),
            timezone = %policy.service.timezone,
            "Configuration loaded"
        );

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        // Initialize store
        let db_path = data_dir.join(DATABASE_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        for child in &policy.children {
            store
                .upsert_child(child)
                .with_context(|| format!("Failed to store child {}", child.id))?;
        }

        let drivers = Arc::new(DriverRegistry::new());
        drivers.register(Arc::new(PollDriver::new()));

        let devices = Arc::new(DeviceDirectory::from_devices(policy.devices.clone()));
        warn_unbacked_devices(&policy, &drivers);

        let manager = Arc::new(SessionManager::new(&policy, store.clone(), drivers, devices));

        Ok(Self {
            manager,
            store,
            tick_interval: policy.service.tick_interval,
        })
    }

    async fn run(self) -> Result<()> {
        // Set up signal handlers
        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        let mut events = self.manager.subscribe();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reconciler = Reconciler::new(self.manager.clone());
        let mut reconciler_handle =
            tokio::spawn(reconciler.run(self.tick_interval, shutdown_rx));

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                result = &mut reconciler_handle => {
                    error!(result = ?result, "Reconciler exited unexpectedly");
                    Self::log_service_stopped(&self.store);
                    anyhow::bail!("Reconciler exited unexpectedly");
                }

                event = events.recv() => match event {
                    Ok(event) => log_core_event(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Event log fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => {}
                },
            }
        }

        info!("Shutting down wardend");

        // The reconciler only looks at the signal between sweeps
        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut reconciler_handle).await {
            Ok(Ok(())) => debug!("Reconciler stopped"),
            Ok(Err(e)) => warn!(error = %e, "Reconciler task failed"),
            Err(_) => {
                warn!("Reconciler did not stop in time, aborting");
                reconciler_handle.abort();
            }
        }

        Self::log_service_stopped(&self.store);

        info!("Shutdown complete");
        Ok(())
    }

    fn log_service_stopped(store: &Arc<dyn Store>) {
        if let Err(e) = store.append_audit(AuditEvent::new(AuditEventType::ServiceStopped)) {
            warn!(error = %e, "Failed to log service shutdown");
        }
    }
}

fn warn_unbacked_devices(policy: &Policy, drivers: &DriverRegistry) {
    for device in &policy.devices {
        if !drivers.contains(&device.driver) {
            warn!(
                device_id = %device.id,
                driver = %device.driver,
                available = ?drivers.names(),
                "Device uses an unregistered driver; sessions on it will be rejected"
            );
        }
    }
}

fn log_core_event(event: &CoreEvent) {
    debug!(session_id = %event.session_id(), event = ?event, "Core event");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "wardend starting"
    );

    let service = Service::new(&args)?;
    service.run().await
}
