use std::path::PathBuf;
use std::process::Stdio;

use bdd_core::IngestError;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Where backups and metadata stores live.
#[derive(Debug, Clone)]
pub enum StorageLocation {
    /// A fixed directory.
    BaseDir(PathBuf),
    /// The first of `names` the datastore manager currently lists, mounted at
    /// `{mount_root}/{name}/pxc`.
    RemovableDatastores {
        names: Vec<String>,
        manager: String,
        mount_root: PathBuf,
    },
}

/// One entry of `datastore list --output-format json`; other fields ignored.
#[derive(Debug, Deserialize)]
struct DatastoreEntry {
    name: String,
}

impl StorageLocation {
    /// Resolve the current base directory.
    ///
    /// Removable datastores are looked up on every call, so a medium swapped
    /// while the daemon runs is picked up by the next request.
    #[instrument(skip(self), level = "debug")]
    pub async fn base_dir(&self) -> Result<PathBuf, IngestError> {
        match self {
            StorageLocation::BaseDir(dir) => Ok(dir.clone()),
            StorageLocation::RemovableDatastores {
                names,
                manager,
                mount_root,
            } => {
                let datastores = list_datastores(manager).await?;
                let selected = datastores
                    .iter()
                    .find(|ds| names.contains(&ds.name))
                    .ok_or_else(|| {
                        IngestError::Storage(format!(
                            "none of the datastores {:?} is available",
                            names
                        ))
                    })?;
                debug!("Selected removable datastore {}", selected.name);
                Ok(mount_root.join(&selected.name).join("pxc"))
            }
        }
    }
}

async fn list_datastores(manager: &str) -> Result<Vec<DatastoreEntry>, IngestError> {
    let output = Command::new(manager)
        .args(["datastore", "list", "--output-format", "json"])
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .await
        .map_err(|e| IngestError::Storage(format!("Failed to run {}: {}", manager, e)))?;

    if !output.status.success() {
        return Err(IngestError::Storage(format!(
            "{} datastore list exited with {}",
            manager, output.status
        )));
    }

    serde_json::from_slice(&output.stdout).map_err(|e| {
        IngestError::Serialization(format!("Failed to parse datastore list: {}", e))
    })
}
