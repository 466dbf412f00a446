use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::IngestError;
use crate::protocol::BackupType;

/// Maps a backup type to the repository directory archives are written to.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Resolve and prepare the target for `backup_type`.
    ///
    /// Must be deterministic for equal inputs and must leave the target ready
    /// to receive an archive. Calling it for an already prepared target is a
    /// no-op, never an error.
    async fn resolve(
        &self,
        backup_type: BackupType,
        namespace: Option<&str>,
    ) -> Result<PathBuf, IngestError>;
}
