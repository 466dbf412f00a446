//! The bdd backup ingestion daemon.
//!
//! Clients connect over TCP and send one command each:
//! - ARCHIVE: a zstd stream that is decompressed into `borg create`, one
//!   writer per repository at a time
//! - IMAGE_META / STACK_META: a JSON record appended to a document store

pub mod archive;
pub mod bootstrap;
pub mod config;
pub mod lock;
pub mod metadata;
pub mod server;
pub mod storage;
pub mod wire;

#[cfg(all(test, unix))]
mod test_support;
