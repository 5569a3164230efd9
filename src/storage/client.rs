//! Command executor over the S3 adapter layer
//!
//! Every command runs as a task on the client's runtime and resolves to
//! exactly one [`StorageCommandResult`]; errors and panics are reported as
//! data. Dropping the future returned by a command aborts its task, and an
//! unfinished multipart upload is then aborted on S3 as well.

use super::commands::{
    Check, Checksum, CommandKind, CommandRef, Delete, DeleteTarget, Read, StorageCommand,
    StorageCommandResult, StorageEntry, Write,
};
use crate::config::StorageClientSettings;
use crate::error::{OrbitError, Result};
use crate::protocol::s3::recovery::with_retry;
use crate::protocol::s3::{
    rechunk, AwsConnector, BodyStream, FileAvailability, MultipartReport, MultipartSession,
    S3Adapter, S3AdapterCache, S3Connector, S3Error, S3Result, StorageConfig,
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Join handle that aborts its task when dropped
struct TaskGuard<T>(JoinHandle<T>);

impl<T> Future for TaskGuard<T> {
    type Output = std::result::Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for TaskGuard<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// How a write failed
enum WriteError {
    /// The backend could not be reached before any upload started
    Unreachable(S3Error),
    /// The upload started and failed
    Failed(S3Error),
}

struct WriteOutcome {
    written_size: u64,
    checksum: Checksum,
}

struct ClientInner {
    settings: StorageClientSettings,
    adapters: S3AdapterCache,
}

/// Executes [`StorageCommand`]s against S3
#[derive(Clone)]
pub struct StorageClient {
    inner: Arc<ClientInner>,
    runtime: Handle,
}

impl StorageClient {
    /// Client backed by the AWS SDK, running on the current tokio runtime
    pub fn new(settings: StorageClientSettings) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            OrbitError::Config(format!("StorageClient needs a tokio runtime: {}", e))
        })?;
        let connector = Arc::new(AwsConnector::new(settings.operation_timeout()));
        Self::with_connector(settings, connector, runtime)
    }

    /// Client over any [`S3Connector`], running commands on `runtime`
    pub fn with_connector(
        settings: StorageClientSettings,
        connector: Arc<dyn S3Connector>,
        runtime: Handle,
    ) -> Result<Self> {
        settings.validate()?;

        let adapters = S3AdapterCache::new(connector, settings.client_idle_timeout())
            .with_health_config(settings.health_config())
            .with_read_retry(settings.read_retry.to_policy());

        info!(
            max_bytes_per_part = settings.max_bytes_per_part,
            reactor_prefetch = settings.reactor_prefetch,
            "Storage client ready"
        );

        Ok(Self {
            inner: Arc::new(ClientInner { settings, adapters }),
            runtime,
        })
    }

    pub fn settings(&self) -> &StorageClientSettings {
        &self.inner.settings
    }

    /// Execute any command
    pub async fn execute(&self, command: StorageCommand) -> StorageCommandResult {
        match command {
            StorageCommand::Read(c) => self.read(c).await,
            StorageCommand::Write(c) => self.write(c).await,
            StorageCommand::Delete(c) => self.delete(c).await,
            StorageCommand::Check(c) => self.check(c).await,
        }
    }

    pub async fn read(&self, command: Read) -> StorageCommandResult {
        let command_ref = StorageCommand::from(command.clone()).to_ref();
        let inner = Arc::clone(&self.inner);
        self.spawn(command_ref.clone(), async move {
            inner.read(command_ref, command).await
        })
        .await
    }

    pub async fn write(&self, command: Write) -> StorageCommandResult {
        let command_ref = CommandRef {
            id: command.id.clone(),
            kind: CommandKind::Write,
            key: command.entry.full_path().to_string(),
        };
        let inner = Arc::clone(&self.inner);
        self.spawn(command_ref.clone(), async move {
            inner.write(command_ref, command).await
        })
        .await
    }

    pub async fn delete(&self, command: Delete) -> StorageCommandResult {
        let command_ref = StorageCommand::from(command.clone()).to_ref();
        let inner = Arc::clone(&self.inner);
        self.spawn(command_ref.clone(), async move {
            inner.delete(command_ref, command).await
        })
        .await
    }

    pub async fn check(&self, command: Check) -> StorageCommandResult {
        let command_ref = StorageCommand::from(command.clone()).to_ref();
        let inner = Arc::clone(&self.inner);
        self.spawn(command_ref.clone(), async move {
            inner.check(command_ref, command).await
        })
        .await
    }

    /// ETag of the checked entry, `None` if it does not exist
    pub async fn e_tag(&self, command: &Check) -> S3Result<Option<String>> {
        let adapter = self.inner.adapters.get_or_create(&command.config).await?;
        adapter
            .e_tag(&command.config.entry_key(&command.entry_key))
            .await
    }

    /// Size of the checked entry, `None` if it does not exist
    pub async fn content_length(&self, command: &Check) -> S3Result<Option<u64>> {
        let adapter = self.inner.adapters.get_or_create(&command.config).await?;
        adapter
            .content_length(&command.config.entry_key(&command.entry_key))
            .await
    }

    /// Request a restored copy of an archived entry, kept for `days` days
    pub async fn restore(
        &self,
        config: &StorageConfig,
        entry_key: &str,
        days: i32,
    ) -> S3Result<()> {
        let adapter = self.inner.adapters.get_or_create(config).await?;
        adapter.restore(&config.entry_key(entry_key), days).await
    }

    /// Whether the checked entry can be downloaded now.
    ///
    /// `standard_storage_class` names the class readable without a restore
    /// (STANDARD when `None`). A missing entry is an error.
    pub async fn availability(
        &self,
        command: &Check,
        standard_storage_class: Option<&str>,
    ) -> S3Result<FileAvailability> {
        let adapter = self.inner.adapters.get_or_create(&command.config).await?;
        adapter
            .availability(
                &command.config.entry_key(&command.entry_key),
                standard_storage_class,
            )
            .await
    }

    /// Whether the checked entry is in the standard storage class
    pub async fn is_standard_storage_class(
        &self,
        command: &Check,
        standard_storage_class: Option<&str>,
    ) -> S3Result<bool> {
        let adapter = self.inner.adapters.get_or_create(&command.config).await?;
        adapter
            .is_standard_storage_class(
                &command.config.entry_key(&command.entry_key),
                standard_storage_class,
            )
            .await
    }

    /// Evict and close idle adapters; returns how many
    pub async fn evict_idle_clients(&self) -> usize {
        self.inner.adapters.evict_idle().await
    }

    /// Number of cached adapters
    pub async fn cached_clients(&self) -> usize {
        self.inner.adapters.len().await
    }

    /// Close every cached adapter
    pub async fn shutdown(&self) {
        self.inner.adapters.clear().await;
    }

    async fn spawn<F>(&self, command: CommandRef, task: F) -> StorageCommandResult
    where
        F: Future<Output = StorageCommandResult> + Send + 'static,
    {
        match TaskGuard(self.runtime.spawn(task)).await {
            Ok(result) => result,
            Err(e) => {
                error!(command = %command, error = %e, "Storage task did not complete");
                StorageCommandResult::unreachable(command, S3Error::TaskFailed(e.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    async fn adapter(
        &self,
        command: &CommandRef,
        config: &StorageConfig,
    ) -> S3Result<Arc<S3Adapter>> {
        self.adapters.get_or_create(config).await.map_err(|e| {
            warn!(command = %command, error = %e, "No adapter for storage configuration");
            e
        })
    }

    async fn read(&self, command: CommandRef, read: Read) -> StorageCommandResult {
        let adapter = match self.adapter(&command, &read.config).await {
            Ok(adapter) => adapter,
            Err(e) => return StorageCommandResult::unreachable(command, e),
        };

        let key = read.config.entry_key(&read.entry_key);
        match adapter.read(&key).await {
            Ok(handle) => StorageCommandResult::ReadSuccess { command, handle },
            Err(e) if e.is_not_found() => {
                debug!(command = %command, "Entry not found");
                StorageCommandResult::ReadNotFound { command }
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Read failed");
                StorageCommandResult::unreachable(command, e)
            }
        }
    }

    async fn check(&self, command: CommandRef, check: Check) -> StorageCommandResult {
        let adapter = match self.adapter(&command, &check.config).await {
            Ok(adapter) => adapter,
            Err(e) => return StorageCommandResult::unreachable(command, e),
        };

        match adapter.exists(&check.config.entry_key(&check.entry_key)).await {
            Ok(true) => StorageCommandResult::CheckPresent { command },
            Ok(false) => StorageCommandResult::CheckAbsent { command },
            Err(e) => {
                warn!(command = %command, error = %e, "Check failed");
                StorageCommandResult::unreachable(command, e)
            }
        }
    }

    async fn delete(&self, command: CommandRef, delete: Delete) -> StorageCommandResult {
        // Checked before joining with the root path, which would turn an
        // empty name into the whole root
        let (DeleteTarget::Prefix(name) | DeleteTarget::Single(name)) = &delete.target;
        if name.trim_matches('/').is_empty() {
            let cause = S3Error::InvalidKey(format!(
                "Delete target must not be empty, got {:?}",
                name
            ));
            warn!(command = %command, error = %cause, "Delete rejected");
            return StorageCommandResult::unreachable(command, cause);
        }

        let adapter = match self.adapter(&command, &delete.config).await {
            Ok(adapter) => adapter,
            Err(e) => return StorageCommandResult::unreachable(command, e),
        };

        let policy = self.settings.delete_retry.to_policy();
        let outcome = match &delete.target {
            DeleteTarget::Prefix(prefix) => {
                let prefix = delete.config.entry_key(prefix);
                with_retry(&policy, "delete_by_prefix", || adapter.delete_by_prefix(&prefix))
                    .await
                    .map(|count| debug!(command = %command, count, "Deleted entries"))
            }
            DeleteTarget::Single(key) => {
                let key = delete.config.entry_key(key);
                with_retry(&policy, "delete", || adapter.delete(&key)).await
            }
        };

        match outcome {
            Ok(()) => StorageCommandResult::DeleteSuccess { command },
            Err(e) if e.is_transport() => {
                error!(command = %command, error = %e, "Delete failed after retries");
                StorageCommandResult::DeleteFailure { command, cause: e }
            }
            Err(e) => {
                warn!(command = %command, error = %e, "Delete not attempted");
                StorageCommandResult::unreachable(command, e)
            }
        }
    }

    async fn write(&self, command: CommandRef, write: Write) -> StorageCommandResult {
        let adapter = match self.adapter(&command, &write.config).await {
            Ok(adapter) => adapter,
            Err(e) => return StorageCommandResult::unreachable(command, e),
        };

        let key = write.config.entry_key(write.entry.full_path());
        let part_size = self.settings.max_bytes_per_part;
        let outcome = match write.entry.size() {
            Some(size) if size <= part_size as u64 => {
                write_single(&adapter, &key, write.entry).await
            }
            _ => self.write_multipart(&adapter, &key, write.entry).await,
        };

        match outcome {
            Ok(WriteOutcome {
                written_size,
                checksum,
            }) => {
                info!(command = %command, written_size, checksum = %checksum, "Write complete");
                StorageCommandResult::WriteSuccess {
                    command,
                    written_size,
                    checksum,
                }
            }
            Err(WriteError::Unreachable(cause)) => {
                error!(command = %command, error = %cause, "Storage unreachable for write");
                StorageCommandResult::unreachable(command, cause)
            }
            Err(WriteError::Failed(cause)) => {
                error!(command = %command, error = %cause, "Write failed");
                StorageCommandResult::WriteFailure { command, cause }
            }
        }
    }

    /// Initiate, stream parts with bounded concurrency, then complete;
    /// every failure after initiation aborts the upload first.
    async fn write_multipart(
        &self,
        adapter: &Arc<S3Adapter>,
        key: &str,
        entry: StorageEntry,
    ) -> std::result::Result<WriteOutcome, WriteError> {
        let expected = entry.checksum().cloned();
        let session = adapter
            .begin_multipart(key)
            .await
            .map_err(before_upload)?;
        debug!(key, upload_id = %session.upload_id(), "Streaming multipart upload");

        let mut digest = md5::Context::new();
        let report = upload_parts(
            &session,
            entry.into_data(),
            self.settings.max_bytes_per_part,
            self.settings.reactor_prefetch,
            &mut digest,
        )
        .await;

        let report = match report {
            Ok(report) => report,
            Err(e) => return Err(abort_after(session, e).await),
        };
        let actual = hex::encode(digest.compute().0);

        if let Some(expected) = &expected {
            if !expected.matches_md5(&actual) {
                let mismatch = S3Error::ChecksumMismatch {
                    key: key.to_string(),
                    expected: expected.value.clone(),
                    actual,
                };
                return Err(abort_after(session, mismatch).await);
            }
        }

        if report.is_empty() {
            // S3 rejects completion without parts
            if let Err(e) = session.abort().await {
                warn!(key, error = %e, "Failed to abort empty multipart upload");
            }
            adapter
                .put(key, Bytes::new())
                .await
                .map_err(WriteError::Failed)?;
            return Ok(WriteOutcome {
                written_size: 0,
                checksum: Checksum::md5(actual),
            });
        }

        session
            .complete(&report)
            .await
            .map_err(WriteError::Failed)?;

        Ok(WriteOutcome {
            written_size: report.accumulated_size(),
            checksum: Checksum::md5(actual),
        })
    }
}

/// Collect the entry, verify its checksum and upload it in one request
async fn write_single(
    adapter: &S3Adapter,
    key: &str,
    entry: StorageEntry,
) -> std::result::Result<WriteOutcome, WriteError> {
    let expected = entry.checksum().cloned();
    let data = entry
        .into_data()
        .try_fold(BytesMut::new(), |mut buf, chunk| async move {
            buf.extend_from_slice(&chunk);
            Ok(buf)
        })
        .await
        .map_err(|e| WriteError::Failed(S3Error::from(e)))?
        .freeze();

    let actual = hex::encode(md5::compute(&data).0);
    if let Some(expected) = &expected {
        if !expected.matches_md5(&actual) {
            return Err(WriteError::Failed(S3Error::ChecksumMismatch {
                key: key.to_string(),
                expected: expected.value.clone(),
                actual,
            }));
        }
    }

    let written_size = data.len() as u64;
    adapter.put(key, data).await.map_err(before_upload)?;

    Ok(WriteOutcome {
        written_size,
        checksum: Checksum::md5(actual),
    })
}

/// Re-chunk `data` into parts, number them in emission order and upload up
/// to `prefetch` at a time, folding each finished part into the report.
async fn upload_parts(
    session: &MultipartSession,
    data: BodyStream,
    part_size: usize,
    prefetch: usize,
    digest: &mut md5::Context,
) -> S3Result<MultipartReport> {
    Box::pin(rechunk(data, part_size))
        .enumerate()
        .map(|(index, part)| {
            let part = part?;
            digest.consume(&part);
            let part_number = i32::try_from(index + 1).unwrap_or(i32::MAX);
            Ok::<_, S3Error>((part_number, part))
        })
        .map_ok(|(part_number, part)| session.upload_part(part_number, part))
        .try_buffer_unordered(prefetch.max(1))
        .try_fold(MultipartReport::new(), |report, part| async move {
            Ok(report.accumulate(part))
        })
        .await
}

/// Abort the upload, whatever the abort outcome, then report `cause`
async fn abort_after(session: MultipartSession, cause: S3Error) -> WriteError {
    let key = session.key().to_string();
    let upload_id = session.upload_id().to_string();
    warn!(key = %key, upload_id = %upload_id, error = %cause, "Aborting multipart upload");

    if let Err(e) = session.abort().await {
        warn!(key = %key, upload_id = %upload_id, error = %e, "Failed to abort multipart upload");
    }
    WriteError::Failed(cause)
}

/// Failure of the first request of a write
fn before_upload(e: S3Error) -> WriteError {
    match e.root() {
        S3Error::ChecksumMismatch { .. } | S3Error::MultipartUpload(_) => WriteError::Failed(e),
        _ => WriteError::Unreachable(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CommandId;
    use crate::protocol::s3::RestorationStatus;
    use crate::testing::{InMemoryConnector, InMemoryObjectStore, Op};
    use futures::stream;

    fn config() -> StorageConfig {
        StorageConfig::builder("test-bucket")
            .credentials("key", "secret")
            .build()
            .unwrap()
    }

    fn settings(part_size: usize, prefetch: usize) -> StorageClientSettings {
        StorageClientSettings {
            max_bytes_per_part: part_size,
            allow_small_parts: true,
            reactor_prefetch: prefetch,
            ..Default::default()
        }
    }

    fn client(store: &InMemoryObjectStore, part_size: usize) -> StorageClient {
        crate::logging::init_test_logging();
        StorageClient::with_connector(
            settings(part_size, 2),
            Arc::new(InMemoryConnector::new(store.clone())),
            Handle::current(),
        )
        .unwrap()
    }

    fn chunked(chunks: &[&'static [u8]]) -> BodyStream {
        let items: Vec<std::io::Result<Bytes>> =
            chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        Box::pin(stream::iter(items))
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        assert!(matches!(
            StorageClient::new(StorageClientSettings::default()),
            Err(OrbitError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let store = InMemoryObjectStore::new();
        let result = StorageClient::with_connector(
            StorageClientSettings {
                reactor_prefetch: 0,
                ..Default::default()
            },
            Arc::new(InMemoryConnector::new(store)),
            Handle::current(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_single_put_with_checksum() {
        let store = InMemoryObjectStore::new();
        let client = client(&store, 16);
        let md5 = hex::encode(md5::compute(b"small").0);

        let entry = StorageEntry::from_bytes("obj", Bytes::from_static(b"small"))
            .with_checksum(Checksum::md5(md5.to_uppercase()));
        let result = client
            .write(Write::new(CommandId::new("test"), config(), entry))
            .await;

        match result {
            StorageCommandResult::WriteSuccess {
                written_size,
                checksum,
                ..
            } => {
                assert_eq!(written_size, 5);
                assert_eq!(checksum, Checksum::md5(md5));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(store.count(Op::Put), 1);
        assert_eq!(store.count(Op::CreateMultipart), 0);
    }

    #[tokio::test]
    async fn test_single_put_checksum_mismatch() {
        let store = InMemoryObjectStore::new();
        let client = client(&store, 16);

        let entry = StorageEntry::from_bytes("obj", Bytes::from_static(b"small"))
            .with_checksum(Checksum::md5("00000000000000000000000000000000"));
        let result = client
            .write(Write::new(CommandId::new("test"), config(), entry))
            .await;

        assert!(matches!(
            result,
            StorageCommandResult::WriteFailure {
                cause: S3Error::ChecksumMismatch { .. },
                ..
            }
        ));
        assert_eq!(store.count(Op::Put), 0);
    }

    #[tokio::test]
    async fn test_multipart_checksum_mismatch_aborts() {
        let store = InMemoryObjectStore::new();
        let client = client(&store, 4);

        let entry = StorageEntry::new("big", chunked(&[b"0123456789"]))
            .with_checksum(Checksum::md5("ffffffffffffffffffffffffffffffff"));
        let result = client
            .write(Write::new(CommandId::new("test"), config(), entry))
            .await;

        assert!(matches!(result, StorageCommandResult::WriteFailure { .. }));
        assert_eq!(store.count(Op::Complete), 0);
        assert_eq!(store.count(Op::Abort), 1);
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_multipart_source_error_aborts() {
        let store = InMemoryObjectStore::new();
        let client = client(&store, 4);

        let items: Vec<std::io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"01234567")),
            Err(std::io::Error::other("producer failed")),
        ];
        let entry = StorageEntry::new("big", Box::pin(stream::iter(items)));
        let result = client
            .write(Write::new(CommandId::new("test"), config(), entry))
            .await;

        assert!(matches!(
            result,
            StorageCommandResult::WriteFailure {
                cause: S3Error::Io(_),
                ..
            }
        ));
        assert_eq!(store.count(Op::Abort), 1);
        assert_eq!(store.count(Op::Complete), 0);
    }

    #[tokio::test]
    async fn test_empty_unknown_size_stream() {
        let store = InMemoryObjectStore::new();
        let client = client(&store, 4);

        let entry = StorageEntry::new("empty", chunked(&[]));
        let result = client
            .write(Write::new(CommandId::new("test"), config(), entry))
            .await;

        assert!(matches!(
            result,
            StorageCommandResult::WriteSuccess { written_size: 0, .. }
        ));
        assert_eq!(store.count(Op::CreateMultipart), 1);
        assert_eq!(store.count(Op::Abort), 1);
        assert_eq!(store.count(Op::Complete), 0);
        assert_eq!(store.object("test-bucket", "empty"), Some(Bytes::new()));
    }

    #[tokio::test]
    async fn test_initiate_failure_is_unreachable() {
        let store = InMemoryObjectStore::new();
        store.fail_always(Op::CreateMultipart, S3Error::Network("refused".to_string()));
        let client = client(&store, 4);

        let entry = StorageEntry::new("big", chunked(&[b"0123456789"]));
        let result = client
            .write(Write::new(CommandId::new("test"), config(), entry))
            .await;

        assert!(matches!(
            result,
            StorageCommandResult::UnreachableStorage { .. }
        ));
        assert_eq!(store.count(Op::Abort), 0);
    }

    #[tokio::test]
    async fn test_root_path_applied() {
        let store = InMemoryObjectStore::new();
        let client = client(&store, 16);
        let config = StorageConfig::builder("test-bucket")
            .credentials("key", "secret")
            .root_path("tenant")
            .build()
            .unwrap();

        let entry = StorageEntry::from_bytes("file.bin", Bytes::from_static(b"x"));
        let result = client
            .write(Write::new(CommandId::new("test"), config.clone(), entry))
            .await;
        assert!(result.is_success());
        assert_eq!(store.keys("test-bucket"), vec!["tenant/file.bin".to_string()]);

        let check = Check::new(CommandId::new("test"), config, "file.bin");
        assert_eq!(client.content_length(&check).await.unwrap(), Some(1));
        assert!(client.e_tag(&check).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let store = InMemoryObjectStore::new();
        let client = client(&store, 16);

        let result = client
            .read(Read::new(CommandId::new("test"), config(), "missing"))
            .await;
        assert!(matches!(result, StorageCommandResult::ReadNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_single() {
        let store = InMemoryObjectStore::new();
        store.insert("test-bucket", "a", Bytes::from_static(b"x"));
        store.insert("test-bucket", "ab", Bytes::from_static(b"x"));
        let client = client(&store, 16);

        let result = client
            .delete(Delete::single(CommandId::new("test"), config(), "a"))
            .await;
        assert!(matches!(result, StorageCommandResult::DeleteSuccess { .. }));
        assert_eq!(store.keys("test-bucket"), vec!["ab".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_empty_prefix_unreachable() {
        let store = InMemoryObjectStore::new();
        store.insert("test-bucket", "keep", Bytes::from_static(b"x"));
        let client = client(&store, 16);

        let result = client
            .delete(Delete::prefix(CommandId::new("test"), config(), ""))
            .await;
        assert!(matches!(
            result,
            StorageCommandResult::UnreachableStorage {
                cause: S3Error::InvalidKey(_),
                ..
            }
        ));
        assert_eq!(store.keys("test-bucket").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_empty_prefix_under_root_path_rejected() {
        let store = InMemoryObjectStore::new();
        store.insert("test-bucket", "tenant/a", Bytes::from_static(b"x"));
        store.insert("test-bucket", "tenant/b", Bytes::from_static(b"x"));
        let client = client(&store, 16);
        let rooted = StorageConfig::builder("test-bucket")
            .credentials("key", "secret")
            .root_path("tenant")
            .build()
            .unwrap();

        for target in ["", "/"] {
            let result = client
                .delete(Delete::prefix(CommandId::new("test"), rooted.clone(), target))
                .await;
            assert!(matches!(
                result,
                StorageCommandResult::UnreachableStorage {
                    cause: S3Error::InvalidKey(_),
                    ..
                }
            ));
        }
        let result = client
            .delete(Delete::single(CommandId::new("test"), rooted.clone(), ""))
            .await;
        assert!(matches!(
            result,
            StorageCommandResult::UnreachableStorage { .. }
        ));

        assert_eq!(store.keys("test-bucket").len(), 2);
        assert_eq!(store.count(Op::List), 0);
        assert_eq!(store.count(Op::Delete), 0);
    }

    #[tokio::test]
    async fn test_restore_archived_entry() {
        let store = InMemoryObjectStore::new();
        store.insert("test-bucket", "vault/scan.tif", Bytes::from_static(b"pixels"));
        store.set_storage_class("test-bucket", "vault/scan.tif", "DEEP_ARCHIVE");
        let client = client(&store, 16);
        let rooted = StorageConfig::builder("test-bucket")
            .credentials("key", "secret")
            .root_path("vault")
            .build()
            .unwrap();
        let check = Check::new(CommandId::new("test"), rooted.clone(), "scan.tif");

        assert!(!client.is_standard_storage_class(&check, None).await.unwrap());
        assert!(client
            .is_standard_storage_class(&check, Some("DEEP_ARCHIVE"))
            .await
            .unwrap());
        assert_eq!(
            client.availability(&check, None).await.unwrap().status,
            RestorationStatus::NotAvailable
        );

        client.restore(&rooted, "scan.tif", 2).await.unwrap();
        let availability = client.availability(&check, None).await.unwrap();
        assert_eq!(availability.status, RestorationStatus::RestorePending);
        assert_eq!(availability.content_length, Some(6));
        assert_eq!(store.count(Op::Restore), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_unreachable() {
        let store = InMemoryObjectStore::new();
        let connector = Arc::new(InMemoryConnector::new(store.clone()));
        connector.set_refuse_configs(true);
        let client =
            StorageClient::with_connector(settings(16, 2), connector, Handle::current()).unwrap();

        let result = client
            .check(Check::new(CommandId::new("test"), config(), "k"))
            .await;
        assert!(matches!(
            result,
            StorageCommandResult::UnreachableStorage { .. }
        ));
        assert_eq!(client.cached_clients().await, 0);
    }

    #[tokio::test]
    async fn test_execute_dispatches() {
        let store = InMemoryObjectStore::new();
        store.insert("test-bucket", "present", Bytes::from_static(b"x"));
        let client = client(&store, 16);

        let result = client
            .execute(Check::new(CommandId::new("test"), config(), "present").into())
            .await;
        assert!(matches!(result, StorageCommandResult::CheckPresent { .. }));
        assert_eq!(result.command().key, "present");
        assert_eq!(client.cached_clients().await, 1);

        client.shutdown().await;
        assert_eq!(client.cached_clients().await, 0);
    }
}
