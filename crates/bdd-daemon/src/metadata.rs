use std::sync::Arc;

use bdd_core::{DocumentStoreProvider, IngestError, LockKey, MetadataRecord};
use tracing::{info, instrument};

use crate::lock::LockRegistry;

/// Store receiving IMAGE_META records.
pub const IMAGE_META_STORE: &str = "image-meta-db.json";
/// Store receiving STACK_META records.
pub const STACK_META_STORE: &str = "stack-meta-db.json";

/// Appends metadata records to document stores, one writer per store.
pub struct MetadataSink {
    registry: Arc<LockRegistry>,
    stores: Arc<dyn DocumentStoreProvider>,
}

impl MetadataSink {
    pub fn new(registry: Arc<LockRegistry>, stores: Arc<dyn DocumentStoreProvider>) -> Self {
        Self { registry, stores }
    }

    /// Append `record` to the store named `store_name` and return its id.
    #[instrument(skip(self, record), level = "debug")]
    pub async fn append(
        &self,
        conn_id: u64,
        store_name: &str,
        record: &MetadataRecord,
    ) -> Result<u64, IngestError> {
        let store = self.stores.open(store_name).await?;
        let key = LockKey::for_store(store.identity());

        let id = {
            let _guard = self.registry.lock(&key).await;
            store.append(record).await?
        };

        info!(conn_id, "Appended document {} to {}", id, store.identity());
        Ok(id)
    }
}
