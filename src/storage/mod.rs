//! Storage commands and the client that executes them
//!
//! Callers build a [`StorageCommand`] (read, write, delete or check) for a
//! [`StorageConfig`](crate::protocol::s3::StorageConfig) and hand it to a
//! [`StorageClient`], which always answers with one
//! [`StorageCommandResult`]:
//!
//! | Command | Results |
//! |---------|---------|
//! | Read    | `ReadSuccess`, `ReadNotFound`, `UnreachableStorage` |
//! | Write   | `WriteSuccess`, `WriteFailure`, `UnreachableStorage` |
//! | Delete  | `DeleteSuccess`, `DeleteFailure`, `UnreachableStorage` |
//! | Check   | `CheckPresent`, `CheckAbsent`, `UnreachableStorage` |
//!
//! Writes of known size up to `max_bytes_per_part` use a single PUT; all
//! other writes stream through a multipart upload that is completed on
//! success and aborted on any failure.

mod client;
mod commands;

pub use client::StorageClient;
pub use commands::{
    Check, Checksum, CommandId, CommandKind, CommandRef, Delete, DeleteTarget, Read,
    StorageCommand, StorageCommandResult, StorageEntry, Write,
};
