use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bdd_core::{BackupType, IngestError, TargetResolver};
use dashmap::DashSet;
use tokio::fs;
use tracing::{debug, instrument, warn};

use super::Archiver;
use crate::storage::StorageLocation;

/// Resolves backup types to borg repositories below the storage base dir.
///
/// ```text
/// {base}/
///   borg-postgres/
///   borg-git/
///   borg-k8s/
///     {namespace}/
/// ```
pub struct BorgTargetResolver {
    location: Arc<StorageLocation>,
    archiver: Arc<dyn Archiver>,
    /// Repositories prepared by this process
    prepared: DashSet<PathBuf>,
}

impl BorgTargetResolver {
    pub fn new(location: Arc<StorageLocation>, archiver: Arc<dyn Archiver>) -> Self {
        Self {
            location,
            archiver,
            prepared: DashSet::new(),
        }
    }
}

#[async_trait]
impl TargetResolver for BorgTargetResolver {
    #[instrument(skip(self), level = "debug")]
    async fn resolve(
        &self,
        backup_type: BackupType,
        namespace: Option<&str>,
    ) -> Result<PathBuf, IngestError> {
        let base = self.location.base_dir().await?;
        let mut repository = base.join(format!("borg-{}", backup_type));
        if backup_type.is_namespaced() {
            if let Some(ns) = namespace {
                repository.push(ns);
            }
        }

        if self.prepared.contains(&repository) {
            return Ok(repository);
        }

        fs::create_dir_all(&repository).await.map_err(|e| {
            IngestError::Io(format!(
                "Failed to create repository dir {}: {}",
                repository.display(),
                e
            ))
        })?;
        if self.archiver.init_repository(&repository).await? {
            self.prepared.insert(repository.clone());
            debug!("Prepared repository {}", repository.display());
        } else {
            warn!(
                "Repository {} is not initialized, retrying on next request",
                repository.display()
            );
        }
        Ok(repository)
    }
}
