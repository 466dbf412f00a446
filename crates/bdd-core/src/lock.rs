use std::fmt;

use crate::protocol::BackupType;

/// Identifies the serialization domain of a write.
///
/// Archive keys are the backup type (`"postgres"`), or `"k8s/<namespace>"`
/// for the namespaced type, so every request targeting the same borg
/// repository maps to the same key. Document-store keys carry a `store:`
/// prefix and can never collide with an archive key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Key for an archive write into the repository of `backup_type`.
    pub fn for_archive(backup_type: BackupType, namespace: Option<&str>) -> Self {
        match namespace {
            Some(ns) if backup_type.is_namespaced() => {
                Self(format!("{}/{}", backup_type.as_str(), ns))
            }
            _ => Self(backup_type.as_str().to_string()),
        }
    }

    /// Key for an append to the document store with the given identity.
    pub fn for_store(identity: &str) -> Self {
        Self(format!("store:{}", identity))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
