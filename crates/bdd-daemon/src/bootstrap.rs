use std::path::Path;

use bdd_core::IngestError;
use tokio::fs;
use tracing::{debug, info, instrument};

/// Copy the daemon's installation onto the backup medium.
///
/// Every regular, non-hidden file directly inside `source` is copied into
/// `dest`, which is created if needed. Returns the number of files copied.
#[instrument(level = "debug")]
pub async fn install_self_copy(source: &Path, dest: &Path) -> Result<usize, IngestError> {
    fs::create_dir_all(dest).await.map_err(|e| {
        IngestError::Io(format!("Failed to create dir {}: {}", dest.display(), e))
    })?;

    let mut entries = fs::read_dir(source).await.map_err(|e| {
        IngestError::Io(format!("Failed to read dir {}: {}", source.display(), e))
    })?;

    let mut copied = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| IngestError::Io(format!("Failed to read dir {}: {}", source.display(), e)))?
    {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().await.map_err(|e| {
            IngestError::Io(format!("Failed to stat {}: {}", entry.path().display(), e))
        })?;
        if !file_type.is_file() {
            continue;
        }

        let target = dest.join(&name);
        fs::copy(entry.path(), &target).await.map_err(|e| {
            IngestError::Io(format!(
                "Failed to copy {} to {}: {}",
                entry.path().display(),
                target.display(),
                e
            ))
        })?;
        debug!("Copied {}", target.display());
        copied += 1;
    }

    info!("Installed {} files from {} to {}", copied, source.display(), dest.display());
    Ok(copied)
}
