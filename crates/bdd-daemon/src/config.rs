use std::path::PathBuf;
use std::time::Duration;

use bdd_core::IngestError;
use clap::Parser;

use crate::storage::StorageLocation;

/// Configuration for the bdd daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "bdd")]
#[command(about = "Backup ingestion daemon: pipes client backups into borg repositories")]
pub struct Config {
    /// TCP host to bind to
    #[arg(long, default_value = "0.0.0.0", env = "BDD_HOST")]
    pub host: String,

    /// TCP port to bind to
    #[arg(long, default_value = "8888", env = "BDD_PORT")]
    pub port: u16,

    /// Fixed base directory for backups (mutually exclusive with --removable-datastores)
    #[arg(long, env = "PXC_BACKUP_BASE_DIR")]
    pub backup_base_dir: Option<PathBuf>,

    /// Comma-separated removable datastore names; the first one that is
    /// currently known to the datastore manager receives the backups
    #[arg(long, env = "PXC_REMOVABLE_DATASTORES")]
    pub removable_datastores: Option<String>,

    /// Directory removable datastores are mounted under
    #[arg(long, default_value = "/mnt/datastore", env = "PXC_DATASTORE_MOUNT_ROOT")]
    pub datastore_mount_root: PathBuf,

    /// Datastore manager CLI used to list removable datastores
    #[arg(long, default_value = "proxmox-backup-manager", env = "PXC_DATASTORE_MANAGER")]
    pub datastore_manager: String,

    /// borg executable
    #[arg(long, default_value = "borg", env = "BORG_BINARY")]
    pub borg_binary: String,

    /// Compression spec passed to `borg create --compression`
    #[arg(long, default_value = "zstd,1", env = "BORG_COMPRESSION")]
    pub borg_compression: String,

    /// Abort an archive session when the client sends nothing for this many
    /// seconds. Unset means a stalled client may hold its lock indefinitely.
    #[arg(long, env = "BDD_STREAM_IDLE_TIMEOUT_SECS")]
    pub stream_idle_timeout_secs: Option<u64>,

    /// Deployment environment
    #[arg(long, default_value = "testing", env = "ENV", ignore_case = true)]
    pub env: DeployEnv,

    /// Directory copied onto the backup storage on production startup
    #[arg(long, default_value = "/opt/bdd", env = "BDD_INSTALL_SOURCE")]
    pub install_source: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,
}

impl Config {
    /// Address the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_secs.map(Duration::from_secs)
    }

    /// Determine where backups are stored.
    ///
    /// Exactly one of the base directory and the removable datastore list
    /// must be configured.
    pub fn storage_location(&self) -> Result<StorageLocation, IngestError> {
        let base_dir = self
            .backup_base_dir
            .clone()
            .filter(|p| !p.as_os_str().is_empty());
        let datastores: Option<Vec<String>> = self
            .removable_datastores
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|names| !names.is_empty());

        match (base_dir, datastores) {
            (Some(dir), None) => Ok(StorageLocation::BaseDir(dir)),
            (None, Some(names)) => Ok(StorageLocation::RemovableDatastores {
                names,
                manager: self.datastore_manager.clone(),
                mount_root: self.datastore_mount_root.clone(),
            }),
            (base_dir, datastores) => {
                let defined = usize::from(base_dir.is_some()) + usize::from(datastores.is_some());
                Err(IngestError::Configuration(format!(
                    "{} backup storage locations configured, exactly one of \
                     PXC_BACKUP_BASE_DIR and PXC_REMOVABLE_DATASTORES must be set",
                    defined
                )))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DeployEnv {
    Testing,
    Production,
}

impl std::fmt::Display for DeployEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployEnv::Testing => write!(f, "testing"),
            DeployEnv::Production => write!(f, "production"),
        }
    }
}
