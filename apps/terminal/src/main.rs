//! # Titan Terminal
//!
//! Headless terminal daemon: boots the kernel over the local database and
//! runs until Ctrl+C / SIGTERM.
//!
//! ## Startup
//! ```text
//! tracing → titan.db → kernel.toml + sync.toml → remote
//!         → register components → domain change consumer → kernel.boot()
//!         → wait for signal
//!         → kernel.shutdown() → remote.shutdown() → db.close()
//! ```
//!
//! ## Environment
//! - `TITAN_DB_PATH` - database file override
//! - `RUST_LOG` - log filter (default `info,titan=debug,sqlx=warn`)
//! - `TITAN_*` - kernel and sync config overrides, see their crates

use std::path::PathBuf;
use std::sync::Arc;

use directories::ProjectDirs;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use titan_db::{Database, DbConfig};
use titan_kernel::{
    BootOutcome, CatalogComponent, Connectivity, HeadlessHardware, Kernel, KernelConfig,
    KernelEvent, StoreComponent, SyncEngineComponent,
};
use titan_sync::{MemoryRemote, RemoteSystem, SyncConfig, WsRemote};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Titan terminal");

    let db_path = get_database_path()?;
    info!(?db_path, "Opening database");
    let db = Database::new(DbConfig::new(db_path.clone())).await?;

    let kernel_config = KernelConfig::load_or_default(None);
    let sync_config = SyncConfig::load_or_default(None);

    // Hub configured: talk to it over WebSocket and follow its connection.
    // Otherwise keep everything in-process.
    let (remote, ws, connectivity): (Arc<dyn RemoteSystem>, Option<Arc<WsRemote>>, Connectivity) =
        match sync_config.transport_config() {
            Some(transport) => {
                info!(hub = %transport.url, "Connecting to sync hub");
                let ws = Arc::new(WsRemote::connect(transport, sync_config.request_timeout()));
                let connectivity = Connectivity::Follow(ws.connection_state());
                (ws.clone() as Arc<dyn RemoteSystem>, Some(ws), connectivity)
            }
            None => {
                warn!("No hub configured, syncing to in-process remote");
                (
                    Arc::new(MemoryRemote::new()) as Arc<dyn RemoteSystem>,
                    None,
                    Connectivity::AlwaysOnline,
                )
            }
        };

    let kernel = Kernel::new(kernel_config);
    kernel.register(Arc::new(HeadlessHardware)).await?;
    kernel.register(Arc::new(StoreComponent::new(db.clone()))).await?;
    kernel.register(Arc::new(CatalogComponent::new(&db))).await?;
    let sync = Arc::new(SyncEngineComponent::new(
        db.clone(),
        remote,
        sync_config.engine_config(),
        connectivity,
    ));
    kernel.register(sync.clone()).await?;

    // Domain engines publish here. The writer keeps queueing in safe mode.
    let (domain_changes, change_rx) = tokio::sync::mpsc::channel(256);
    let writer = sync.writer();
    let consumer = tokio::spawn(async move { writer.consume(change_rx).await });

    tokio::spawn(log_kernel_events(kernel.subscribe()));

    match kernel.boot().await {
        Ok(BootOutcome::Ready) => info!("Terminal ready"),
        Ok(BootOutcome::SafeMode) => warn!("Terminal running in safe mode"),
        Err(e) => {
            error!(error = %e, "Terminal failed to boot");
            db.close().await;
            return Err(e.into());
        }
    }

    let status = kernel.get_status().await;
    info!(status = %serde_json::to_string(&status)?, "Kernel status");

    shutdown_signal().await;

    drop(domain_changes);
    if let Err(e) = consumer.await {
        error!(error = %e, "Domain change consumer panicked");
    }
    kernel.shutdown().await;
    if let Some(ws) = ws {
        ws.shutdown().await;
    }
    db.close().await;

    info!("Terminal shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,titan=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Database file location.
///
/// `TITAN_DB_PATH` wins; otherwise `titan.db` in the platform data directory.
fn get_database_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(path) = std::env::var("TITAN_DB_PATH") {
        return Ok(PathBuf::from(path));
    }

    let proj_dirs = ProjectDirs::from("com", "titan", "pos")
        .ok_or("Could not determine app data directory")?;
    let data_dir = proj_dirs.data_dir();
    std::fs::create_dir_all(data_dir)?;

    Ok(data_dir.join("titan.db"))
}

async fn log_kernel_events(mut events: tokio::sync::broadcast::Receiver<KernelEvent>) {
    use tokio::sync::broadcast::error::RecvError;

    loop {
        match events.recv().await {
            Ok(KernelEvent::IncidentLogged(incident)) => warn!(
                component = %incident.component,
                severity = ?incident.severity,
                "{}",
                incident.description
            ),
            Ok(event) => info!(?event, "Kernel event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Kernel event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
