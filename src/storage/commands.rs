//! Storage commands and their typed results

use crate::protocol::s3::{BodyStream, ReadHandle, S3Error, StorageConfig};
use bytes::Bytes;
use futures::stream;
use std::fmt;
use uuid::Uuid;

/// Correlation id of one command: the issuing owner plus a random UUID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandId {
    owner: String,
    id: Uuid,
}

impl CommandId {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            id: Uuid::new_v4(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.id)
    }
}

/// Integrity value attached to an entry, e.g. `MD5` with a hex digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub label: String,
    pub value: String,
}

impl Checksum {
    pub const MD5: &'static str = "MD5";

    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    /// MD5 checksum from its hex digest
    pub fn md5(hex_digest: impl Into<String>) -> Self {
        Self::new(Self::MD5, hex_digest)
    }

    /// Compare against a computed MD5 hex digest, ignoring case
    pub fn matches_md5(&self, hex_digest: &str) -> bool {
        self.label.eq_ignore_ascii_case(Self::MD5) && self.value.eq_ignore_ascii_case(hex_digest)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label, self.value)
    }
}

/// Data to be written under one key.
///
/// The data stream is consumed by the write that takes the entry.
pub struct StorageEntry {
    full_path: String,
    size: Option<u64>,
    checksum: Option<Checksum>,
    data: BodyStream,
}

impl StorageEntry {
    /// Entry of unknown size
    pub fn new(full_path: impl Into<String>, data: BodyStream) -> Self {
        Self {
            full_path: full_path.into(),
            size: None,
            checksum: None,
            data,
        }
    }

    /// Entry over an in-memory buffer; the size is known
    pub fn from_bytes(full_path: impl Into<String>, data: Bytes) -> Self {
        let size = data.len() as u64;
        Self::new(full_path, Box::pin(stream::iter(vec![Ok(data)]))).with_size(size)
    }

    /// Declare the size up front
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Expected checksum, verified before the write is committed
    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.checksum.as_ref()
    }

    pub fn into_data(self) -> BodyStream {
        self.data
    }
}

impl fmt::Debug for StorageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEntry")
            .field("full_path", &self.full_path)
            .field("size", &self.size)
            .field("checksum", &self.checksum)
            .finish_non_exhaustive()
    }
}

/// Read one entry
#[derive(Debug, Clone)]
pub struct Read {
    pub id: CommandId,
    pub config: StorageConfig,
    pub entry_key: String,
}

impl Read {
    pub fn new(id: CommandId, config: StorageConfig, entry_key: impl Into<String>) -> Self {
        Self {
            id,
            config,
            entry_key: entry_key.into(),
        }
    }
}

/// Write one entry
#[derive(Debug)]
pub struct Write {
    pub id: CommandId,
    pub config: StorageConfig,
    pub entry: StorageEntry,
}

impl Write {
    pub fn new(id: CommandId, config: StorageConfig, entry: StorageEntry) -> Self {
        Self { id, config, entry }
    }
}

/// What a [`Delete`] removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    /// Every entry whose key starts with the prefix
    Prefix(String),
    /// Exactly one entry
    Single(String),
}

impl DeleteTarget {
    pub fn key(&self) -> &str {
        match self {
            DeleteTarget::Prefix(key) | DeleteTarget::Single(key) => key,
        }
    }
}

/// Delete entries by prefix or by key
#[derive(Debug, Clone)]
pub struct Delete {
    pub id: CommandId,
    pub config: StorageConfig,
    pub target: DeleteTarget,
}

impl Delete {
    pub fn prefix(id: CommandId, config: StorageConfig, prefix: impl Into<String>) -> Self {
        Self {
            id,
            config,
            target: DeleteTarget::Prefix(prefix.into()),
        }
    }

    pub fn single(id: CommandId, config: StorageConfig, key: impl Into<String>) -> Self {
        Self {
            id,
            config,
            target: DeleteTarget::Single(key.into()),
        }
    }
}

/// Probe whether an entry exists
#[derive(Debug, Clone)]
pub struct Check {
    pub id: CommandId,
    pub config: StorageConfig,
    pub entry_key: String,
}

impl Check {
    pub fn new(id: CommandId, config: StorageConfig, entry_key: impl Into<String>) -> Self {
        Self {
            id,
            config,
            entry_key: entry_key.into(),
        }
    }
}

/// Kind of a storage command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Read,
    Write,
    Delete,
    Check,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Read => write!(f, "read"),
            CommandKind::Write => write!(f, "write"),
            CommandKind::Delete => write!(f, "delete"),
            CommandKind::Check => write!(f, "check"),
        }
    }
}

/// Identity of a command carried by its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRef {
    pub id: CommandId,
    pub kind: CommandKind,
    pub key: String,
}

impl fmt::Display for CommandRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.kind, self.key, self.id)
    }
}

/// A command for [`super::StorageClient`]
#[derive(Debug)]
pub enum StorageCommand {
    Read(Read),
    Write(Write),
    Delete(Delete),
    Check(Check),
}

impl StorageCommand {
    pub fn id(&self) -> &CommandId {
        match self {
            StorageCommand::Read(c) => &c.id,
            StorageCommand::Write(c) => &c.id,
            StorageCommand::Delete(c) => &c.id,
            StorageCommand::Check(c) => &c.id,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        match self {
            StorageCommand::Read(c) => &c.config,
            StorageCommand::Write(c) => &c.config,
            StorageCommand::Delete(c) => &c.config,
            StorageCommand::Check(c) => &c.config,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            StorageCommand::Read(_) => CommandKind::Read,
            StorageCommand::Write(_) => CommandKind::Write,
            StorageCommand::Delete(_) => CommandKind::Delete,
            StorageCommand::Check(_) => CommandKind::Check,
        }
    }

    /// Key (or prefix) the command addresses
    pub fn key(&self) -> &str {
        match self {
            StorageCommand::Read(c) => &c.entry_key,
            StorageCommand::Write(c) => c.entry.full_path(),
            StorageCommand::Delete(c) => c.target.key(),
            StorageCommand::Check(c) => &c.entry_key,
        }
    }

    pub fn to_ref(&self) -> CommandRef {
        CommandRef {
            id: self.id().clone(),
            kind: self.kind(),
            key: self.key().to_string(),
        }
    }
}

impl From<Read> for StorageCommand {
    fn from(c: Read) -> Self {
        StorageCommand::Read(c)
    }
}

impl From<Write> for StorageCommand {
    fn from(c: Write) -> Self {
        StorageCommand::Write(c)
    }
}

impl From<Delete> for StorageCommand {
    fn from(c: Delete) -> Self {
        StorageCommand::Delete(c)
    }
}

impl From<Check> for StorageCommand {
    fn from(c: Check) -> Self {
        StorageCommand::Check(c)
    }
}

/// Outcome of one storage command; exactly one is produced per command
#[derive(Debug)]
pub enum StorageCommandResult {
    ReadSuccess {
        command: CommandRef,
        handle: ReadHandle,
    },
    ReadNotFound {
        command: CommandRef,
    },
    WriteSuccess {
        command: CommandRef,
        written_size: u64,
        checksum: Checksum,
    },
    WriteFailure {
        command: CommandRef,
        cause: S3Error,
    },
    DeleteSuccess {
        command: CommandRef,
    },
    DeleteFailure {
        command: CommandRef,
        cause: S3Error,
    },
    CheckPresent {
        command: CommandRef,
    },
    CheckAbsent {
        command: CommandRef,
    },
    UnreachableStorage {
        command: CommandRef,
        cause: S3Error,
    },
}

impl StorageCommandResult {
    pub fn command(&self) -> &CommandRef {
        match self {
            StorageCommandResult::ReadSuccess { command, .. }
            | StorageCommandResult::ReadNotFound { command }
            | StorageCommandResult::WriteSuccess { command, .. }
            | StorageCommandResult::WriteFailure { command, .. }
            | StorageCommandResult::DeleteSuccess { command }
            | StorageCommandResult::DeleteFailure { command, .. }
            | StorageCommandResult::CheckPresent { command }
            | StorageCommandResult::CheckAbsent { command }
            | StorageCommandResult::UnreachableStorage { command, .. } => command,
        }
    }

    /// Whether the command did what it was asked to.
    ///
    /// `ReadNotFound` and `CheckAbsent` are answers, not successes.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StorageCommandResult::ReadSuccess { .. }
                | StorageCommandResult::WriteSuccess { .. }
                | StorageCommandResult::DeleteSuccess { .. }
                | StorageCommandResult::CheckPresent { .. }
        )
    }

    /// Error behind a failed or unreachable result
    pub fn cause(&self) -> Option<&S3Error> {
        match self {
            StorageCommandResult::WriteFailure { cause, .. }
            | StorageCommandResult::DeleteFailure { cause, .. }
            | StorageCommandResult::UnreachableStorage { cause, .. } => Some(cause),
            _ => None,
        }
    }

    pub(crate) fn unreachable(command: CommandRef, cause: S3Error) -> Self {
        StorageCommandResult::UnreachableStorage { command, cause }
    }
}
