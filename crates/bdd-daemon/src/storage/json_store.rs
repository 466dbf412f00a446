use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bdd_core::{DocumentStore, DocumentStoreProvider, IngestError, MetadataRecord};
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, instrument};

use super::location::StorageLocation;

/// Table records are appended to, as named by TinyDB.
const DEFAULT_TABLE: &str = "_default";

/// File-backed document store using TinyDB's JSON layout.
///
/// ```text
/// {"_default": {"1": {...}, "2": {...}}}
/// ```
///
/// Every append rewrites the file atomically via a temp file. Callers must
/// serialize appends to the same path.
#[derive(Debug, Clone)]
pub struct JsonDocumentStore {
    path: PathBuf,
    identity: String,
}

impl JsonDocumentStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let identity = path.display().to_string();
        Self { path, identity }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>, IngestError> {
        let json = match fs::read_to_string(&self.path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(IngestError::Io(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        // TinyDB leaves an empty file behind when created without inserts
        if json.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str(&json) {
            Ok(Value::Object(doc)) => Ok(doc),
            Ok(_) => Err(IngestError::Serialization(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(IngestError::Serialization(format!(
                "Failed to parse {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn save(&self, doc: &Map<String, Value>) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                IngestError::Io(format!("Failed to create dir {}: {}", parent.display(), e))
            })?;
        }

        let json = serde_json::to_string(doc).map_err(|e| {
            IngestError::Serialization(format!("Failed to serialize store: {}", e))
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &json).await.map_err(|e| {
            IngestError::Io(format!("Failed to write {}: {}", temp_path.display(), e))
        })?;
        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            IngestError::Io(format!("Failed to rename to {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for JsonDocumentStore {
    fn identity(&self) -> &str {
        &self.identity
    }

    #[instrument(skip(self, record), level = "debug", fields(keys = record.len()))]
    async fn append(&self, record: &MetadataRecord) -> Result<u64, IngestError> {
        let mut doc = self.load().await?;

        let table = doc
            .entry(DEFAULT_TABLE)
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .ok_or_else(|| {
                IngestError::Serialization(format!(
                    "table {} in {} is not a JSON object",
                    DEFAULT_TABLE,
                    self.path.display()
                ))
            })?;

        let next_id = table
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        table.insert(next_id.to_string(), Value::Object(record.clone()));

        self.save(&doc).await?;
        debug!("Appended document {} to {}", next_id, self.path.display());
        Ok(next_id)
    }
}

/// Opens [`JsonDocumentStore`]s by file name inside the storage base directory.
#[derive(Debug, Clone)]
pub struct JsonStoreProvider {
    location: Arc<StorageLocation>,
}

impl JsonStoreProvider {
    pub fn new(location: Arc<StorageLocation>) -> Self {
        Self { location }
    }
}

#[async_trait]
impl DocumentStoreProvider for JsonStoreProvider {
    async fn open(&self, name: &str) -> Result<Box<dyn DocumentStore>, IngestError> {
        let base = self.location.base_dir().await?;
        Ok(Box::new(JsonDocumentStore::new(base.join(name))))
    }
}
