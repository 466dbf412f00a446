//! Decoded form of the bdd wire protocol.
//!
//! A connection starts with one command tag byte. Payload-bearing commands
//! follow it with a big-endian `u32` length and that many bytes of JSON
//! parameters. ARCHIVE additionally streams `(u32 length, zstd bytes)` chunks
//! after the server sent [`CONTINUE_SIGNAL`], terminated by a zero length.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::IngestError;
use crate::lock::LockKey;

/// Byte sent once the archive lock is held; the client may start streaming.
pub const CONTINUE_SIGNAL: u8 = 0x01;

/// Upper bound on the JSON parameter record of any command.
pub const MAX_PARAMS_LEN: u32 = 1024 * 1024;

/// Upper bound on a single compressed chunk of an archive stream.
pub const MAX_CHUNK_LEN: u32 = 64 * 1024 * 1024;

/// The closed set of commands a client can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Archive,
    ImageMeta,
    StackMeta,
}

impl Command {
    /// Decode a command tag byte.
    pub fn from_tag(tag: u8) -> Result<Self, IngestError> {
        match tag {
            1 => Ok(Command::Archive),
            2 => Ok(Command::ImageMeta),
            3 => Ok(Command::StackMeta),
            other => Err(IngestError::Protocol(format!("unknown command tag {}", other))),
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            Command::Archive => 1,
            Command::ImageMeta => 2,
            Command::StackMeta => 3,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Archive => write!(f, "ARCHIVE"),
            Command::ImageMeta => write!(f, "IMAGE_META"),
            Command::StackMeta => write!(f, "STACK_META"),
        }
    }
}

/// Kinds of backups the daemon keeps a borg repository for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupType {
    K8s,
    Nextcloud,
    Git,
    Postgres,
}

impl BackupType {
    pub const ALL: [BackupType; 4] = [
        BackupType::K8s,
        BackupType::Nextcloud,
        BackupType::Git,
        BackupType::Postgres,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackupType::K8s => "k8s",
            BackupType::Nextcloud => "nextcloud",
            BackupType::Git => "git",
            BackupType::Postgres => "postgres",
        }
    }

    /// Namespaced types keep one repository per namespace.
    pub fn is_namespaced(self) -> bool {
        matches!(self, BackupType::K8s)
    }
}

impl FromStr for BackupType {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackupType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| IngestError::Validation(format!("unknown backup type {:?}", s)))
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of an ARCHIVE command as they appear on the wire.
///
/// The snake_case aliases keep older clients working.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct WireArchiveRequest {
    #[serde(alias = "borg_archive_type")]
    backup_type: String,
    #[serde(alias = "archive_name")]
    archive_name: String,
    timestamp: String,
    #[serde(alias = "stdin_name")]
    stdin_name: String,
    #[serde(default)]
    namespace: Option<String>,
}

/// A validated ARCHIVE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRequest {
    pub backup_type: BackupType,
    pub archive_name: String,
    pub timestamp: String,
    pub stdin_name: String,
    /// Present if and only if `backup_type` is namespaced.
    pub namespace: Option<String>,
}

impl ArchiveRequest {
    /// Decode and validate the JSON parameter record of an ARCHIVE command.
    pub fn decode(payload: &[u8]) -> Result<Self, IngestError> {
        let wire: WireArchiveRequest = serde_json::from_slice(payload)
            .map_err(|e| IngestError::Validation(format!("invalid archive request: {}", e)))?;

        let backup_type: BackupType = wire.backup_type.parse()?;
        require_non_empty("archiveName", &wire.archive_name)?;
        require_non_empty("timestamp", &wire.timestamp)?;
        require_non_empty("stdinName", &wire.stdin_name)?;

        let namespace = match (backup_type.is_namespaced(), wire.namespace) {
            (true, Some(ns)) => {
                validate_namespace(&ns)?;
                Some(ns)
            }
            (true, None) => {
                return Err(IngestError::Validation(format!(
                    "backup type {} requires a namespace",
                    backup_type
                )));
            }
            (false, Some(_)) => {
                return Err(IngestError::Validation(format!(
                    "backup type {} does not take a namespace",
                    backup_type
                )));
            }
            (false, None) => None,
        };

        Ok(Self {
            backup_type,
            archive_name: wire.archive_name,
            timestamp: wire.timestamp,
            stdin_name: wire.stdin_name,
            namespace,
        })
    }

    /// The key serializing writes into this request's repository.
    pub fn lock_key(&self) -> LockKey {
        LockKey::for_archive(self.backup_type, self.namespace.as_deref())
    }

    /// Name of the archive inside the repository: `<archiveName>_<timestamp>`.
    pub fn archive_id(&self) -> String {
        format!("{}_{}", self.archive_name, self.timestamp)
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), IngestError> {
    if value.is_empty() {
        return Err(IngestError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// The namespace becomes a directory name below the repository root.
fn validate_namespace(ns: &str) -> Result<(), IngestError> {
    require_non_empty("namespace", ns)?;
    if ns == "." || ns == ".." || ns.contains('/') || ns.contains('\\') || ns.contains('\0') {
        return Err(IngestError::Validation(format!("invalid namespace {:?}", ns)));
    }
    Ok(())
}

/// An opaque metadata record, appended verbatim to a document store.
pub type MetadataRecord = Map<String, Value>;

/// Decode the JSON parameter record of a metadata command.
///
/// Only the shape is checked: the payload must be a JSON object.
pub fn decode_metadata(payload: &[u8]) -> Result<MetadataRecord, IngestError> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(other) => Err(IngestError::Validation(format!(
            "metadata record must be a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(IngestError::Validation(format!("invalid metadata record: {}", e))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
