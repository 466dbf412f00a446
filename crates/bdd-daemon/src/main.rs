use std::sync::Arc;

use bdd_daemon::archive::{ArchiveService, Archiver, BorgArchiver, BorgTargetResolver};
use bdd_daemon::bootstrap::install_self_copy;
use bdd_daemon::config::{Config, DeployEnv};
use bdd_daemon::lock::LockRegistry;
use bdd_daemon::metadata::MetadataSink;
use bdd_daemon::server::{Server, ServerState};
use bdd_daemon::storage::JsonStoreProvider;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // RUST_LOG wins over LOG_LEVEL
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Starting bdd {}", env!("CARGO_PKG_VERSION"));
    info!("  Environment: {}", config.env);
    info!("  Borg: {} (compression {})", config.borg_binary, config.borg_compression);
    if let Some(timeout) = config.stream_idle_timeout() {
        info!("  Stream idle timeout: {:?}", timeout);
    }

    // Fails before binding when the storage location is ambiguous
    let location = Arc::new(config.storage_location()?);
    info!("  Storage: {:?}", location);

    if config.env == DeployEnv::Production {
        let base = location.base_dir().await?;
        install_self_copy(&config.install_source, &base).await?;
    }

    let registry = Arc::new(LockRegistry::new());
    let archiver: Arc<dyn Archiver> = Arc::new(BorgArchiver::new(
        config.borg_binary.clone(),
        config.borg_compression.clone(),
    ));
    let resolver = Arc::new(BorgTargetResolver::new(Arc::clone(&location), Arc::clone(&archiver)));
    let archives = ArchiveService::new(Arc::clone(&registry), resolver, archiver)
        .with_idle_timeout(config.stream_idle_timeout());
    let metadata = MetadataSink::new(registry, Arc::new(JsonStoreProvider::new(location)));
    let state = Arc::new(ServerState::new(archives, metadata));

    let server = Server::bind(config.listen_addr().parse()?, state).await?;
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, initiating shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
        info!("Received SIGTERM, initiating shutdown");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
