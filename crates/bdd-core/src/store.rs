use async_trait::async_trait;

use crate::error::IngestError;
use crate::protocol::MetadataRecord;

/// An append-only collection of metadata records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stable identity of the underlying store (e.g. its file path).
    ///
    /// Two handles with the same identity write to the same records, so
    /// callers serialize appends on it.
    fn identity(&self) -> &str;

    /// Append a record verbatim and return the id assigned to it.
    async fn append(&self, record: &MetadataRecord) -> Result<u64, IngestError>;
}

/// Opens document stores by name.
#[async_trait]
pub trait DocumentStoreProvider: Send + Sync {
    async fn open(&self, name: &str) -> Result<Box<dyn DocumentStore>, IngestError>;
}
