mod json_store;
mod location;

pub use json_store::{JsonDocumentStore, JsonStoreProvider};
pub use location::StorageLocation;
