//! Core types and traits for the bdd backup ingestion daemon.
//!
//! This crate defines what the daemon and its collaborators agree on:
//! - `Command`, `ArchiveRequest`, `MetadataRecord`: the decoded wire protocol
//! - `LockKey`: the serialization domain of an archive or document store write
//! - `TargetResolver`: maps a backup type to a prepared archive repository
//! - `DocumentStoreProvider` / `DocumentStore`: append-only metadata stores

mod error;
mod lock;
mod protocol;
mod resolver;
mod store;

pub use error::IngestError;
pub use lock::LockKey;
pub use protocol::{
    decode_metadata, ArchiveRequest, BackupType, Command, MetadataRecord, CONTINUE_SIGNAL,
    MAX_CHUNK_LEN, MAX_PARAMS_LEN,
};
pub use resolver::TargetResolver;
pub use store::{DocumentStore, DocumentStoreProvider};
