//! Archive ingestion: borg adapter, target resolution and the streaming
//! session that pipes decompressed client data into `borg create`.

mod borg;
mod decompress;
mod resolver;
mod session;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bdd_core::IngestError;
use tokio::process::Command;

pub use borg::BorgArchiver;
pub use decompress::StreamDecompressor;
pub use resolver::BorgTargetResolver;
pub use session::{ArchiveService, SessionState, SessionSummary};

/// A named archive inside a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    pub repository: PathBuf,
    pub archive: String,
}

impl ArchiveTarget {
    pub fn new(repository: impl Into<PathBuf>, archive: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            archive: archive.into(),
        }
    }

    /// borg's `REPOSITORY::ARCHIVE` notation.
    pub fn location(&self) -> String {
        format!("{}::{}", self.repository.display(), self.archive)
    }
}

/// The external tool archives are stored with.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Make `repository` ready to receive archives. Idempotent.
    ///
    /// Returns whether the repository is ready afterwards; a tolerated
    /// initialization failure yields `false` so the caller retries later.
    async fn init_repository(&self, repository: &Path) -> Result<bool, IngestError>;

    /// Command that stores everything read from its stdin as `target`,
    /// recording `stdin_name` as the file name inside the archive.
    fn create_command(&self, target: &ArchiveTarget, stdin_name: &str) -> Command;
}
