use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use bdd_core::IngestError;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::{ArchiveTarget, Archiver};

/// Drives the `borg` CLI.
#[derive(Debug, Clone)]
pub struct BorgArchiver {
    binary: String,
    compression: String,
}

impl BorgArchiver {
    pub fn new(binary: impl Into<String>, compression: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            compression: compression.into(),
        }
    }
}

#[async_trait]
impl Archiver for BorgArchiver {
    #[instrument(skip(self), level = "debug")]
    async fn init_repository(&self, repository: &Path) -> Result<bool, IngestError> {
        // Every borg repository carries a top-level config file
        let config = repository.join("config");
        if config.is_file() {
            debug!("Repository {} already initialized", repository.display());
            return Ok(true);
        }

        let output = Command::new(&self.binary)
            .arg("init")
            .arg("--encryption=none")
            .arg(repository)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| IngestError::Subprocess(format!("Failed to run {}: {}", self.binary, e)))?;

        if output.status.success() {
            info!("Initialized borg repository {}", repository.display());
        } else {
            // Most commonly "repository already exists"; `create` reports real problems
            warn!(
                "borg init {} exited with {}: {}",
                repository.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(config.is_file())
    }

    fn create_command(&self, target: &ArchiveTarget, stdin_name: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("create")
            .arg("--compression")
            .arg(&self.compression)
            .arg("--stdin-name")
            .arg(stdin_name)
            .arg(target.location())
            .arg("-");
        cmd
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{fake_borg, write_script, FAKE_BORG_INIT_LOG};
    use tempfile::TempDir;

    #[test]
    fn test_create_command_arguments() {
        let borg = BorgArchiver::new("borg", "zstd,1");
        let target = ArchiveTarget::new("/srv/pxc/borg-postgres", "db1_2024-01-01T00:00");
        let cmd = borg.create_command(&target, "db1.sql");

        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "borg");
        let args: Vec<_> = std_cmd
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(
            args,
            [
                "create",
                "--compression",
                "zstd,1",
                "--stdin-name",
                "db1.sql",
                "/srv/pxc/borg-postgres::db1_2024-01-01T00:00",
                "-",
            ]
        );
    }

    #[tokio::test]
    async fn test_init_repository_runs_once() {
        let temp = TempDir::new().unwrap();
        let borg = BorgArchiver::new(fake_borg(temp.path()).display().to_string(), "zstd,1");
        let repo = temp.path().join("borg-git");
        std::fs::create_dir_all(&repo).unwrap();

        assert!(borg.init_repository(&repo).await.unwrap());
        assert!(borg.init_repository(&repo).await.unwrap());

        let log = std::fs::read_to_string(temp.path().join(FAKE_BORG_INIT_LOG)).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(repo.join("config").is_file());
    }

    #[tokio::test]
    async fn test_failed_init_reports_not_ready() {
        let temp = TempDir::new().unwrap();
        // Fails the first init, behaves like borg afterwards
        let script = write_script(
            temp.path(),
            "borg",
            r#"marker="$(dirname "$0")/failed-once"
if [ ! -e "$marker" ]; then
  touch "$marker"
  echo "Failed to create/acquire the lock" >&2
  exit 2
fi
mkdir -p "$3"
touch "$3/config""#,
        );
        let borg = BorgArchiver::new(script.display().to_string(), "zstd,1");
        let repo = temp.path().join("borg-postgres");
        std::fs::create_dir_all(&repo).unwrap();

        assert!(!borg.init_repository(&repo).await.unwrap());
        assert!(borg.init_repository(&repo).await.unwrap());
        assert!(repo.join("config").is_file());
    }

    #[tokio::test]
    async fn test_missing_binary_is_subprocess_error() {
        let borg = BorgArchiver::new("/nonexistent/borg", "zstd,1");
        let temp = TempDir::new().unwrap();
        let err = borg.init_repository(temp.path()).await.unwrap_err();
        assert!(matches!(err, IngestError::Subprocess(_)), "{err}");
    }
}
