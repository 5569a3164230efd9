//! In-memory S3 stand-ins for tests
//!
//! [`InMemoryObjectStore`] implements [`ObjectStoreApi`] over shared
//! in-process state. It records every call, can be told to fail chosen
//! operations or parts, and can delay individual part uploads to force
//! out-of-order completion. It validates what a real S3 endpoint checks:
//! `Content-MD5` digests, upload ids, and ascending part order on completion.
//!
//! [`InMemoryClientFactory`] hands out clients over one store and counts
//! creations and closes; [`InMemoryConnector`] plugs it into the storage
//! client.
//!
//! Compiled for this crate's own tests and behind the `testing` feature.

use crate::protocol::s3::{
    ObjectBody, ObjectHead, ObjectPage, ObjectStoreApi, S3Connector, S3Error, S3Result,
    StorageConfig, UploadedPart,
};
use async_trait::async_trait;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use futures::stream;
use orbit_core_resilience::{ClientFactory, ResilienceError};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Operation kinds, used to target failure injection and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Head,
    Get,
    Put,
    CreateMultipart,
    UploadPart,
    Complete,
    Abort,
    Delete,
    List,
    Restore,
}

/// A recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Head { key: String },
    Get { key: String },
    Put { key: String, size: usize },
    CreateMultipart { key: String },
    UploadPart { key: String, part_number: i32, size: usize },
    Complete { key: String, part_numbers: Vec<i32> },
    Abort { key: String },
    Delete { key: String },
    List { prefix: String },
    Restore { key: String, days: i32 },
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::Head { .. } => Op::Head,
            Call::Get { .. } => Op::Get,
            Call::Put { .. } => Op::Put,
            Call::CreateMultipart { .. } => Op::CreateMultipart,
            Call::UploadPart { .. } => Op::UploadPart,
            Call::Complete { .. } => Op::Complete,
            Call::Abort { .. } => Op::Abort,
            Call::Delete { .. } => Op::Delete,
            Call::List { .. } => Op::List,
            Call::Restore { .. } => Op::Restore,
        }
    }
}

struct FailurePlan {
    error: S3Error,
    remaining: Option<usize>,
}

struct PendingUpload {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, (String, Bytes)>,
}

/// Archive metadata reported by HEAD
#[derive(Default, Clone)]
struct ArchiveState {
    storage_class: Option<String>,
    restore: Option<String>,
}

#[derive(Default)]
struct StoreState {
    objects: BTreeMap<(String, String), Bytes>,
    archive: HashMap<(String, String), ArchiveState>,
    uploads: HashMap<String, PendingUpload>,
    next_upload: u64,
    calls: Vec<Call>,
    failures: HashMap<Op, FailurePlan>,
    part_failures: HashMap<i32, S3Error>,
    part_delays: HashMap<i32, Duration>,
    op_delays: HashMap<Op, Duration>,
}

/// Shared in-memory object store; clones see the same data
#[derive(Clone)]
pub struct InMemoryObjectStore {
    state: Arc<Mutex<StoreState>>,
    page_size: usize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

fn service(code: &str, message: impl Into<String>) -> S3Error {
    S3Error::Service {
        code: code.to_string(),
        message: message.into(),
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            page_size: 1000,
        }
    }

    /// Limit listing pages to `page_size` keys
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an object directly, in the standard storage class
    pub fn insert(&self, bucket: &str, key: &str, data: Bytes) {
        let id = (bucket.to_string(), key.to_string());
        let mut state = self.lock();
        state.archive.remove(&id);
        state.objects.insert(id, data);
    }

    /// Move an object to another storage class
    pub fn set_storage_class(&self, bucket: &str, key: &str, storage_class: &str) {
        self.lock()
            .archive
            .entry((bucket.to_string(), key.to_string()))
            .or_default()
            .storage_class = Some(storage_class.to_string());
    }

    /// Set the `x-amz-restore` header reported for an object
    pub fn set_restore_header(&self, bucket: &str, key: &str, header: &str) {
        self.lock()
            .archive
            .entry((bucket.to_string(), key.to_string()))
            .or_default()
            .restore = Some(header.to_string());
    }

    /// Content of an object
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Sorted keys stored in `bucket`
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Every call received so far, in arrival order
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of calls of one kind
    pub fn count(&self, op: Op) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    /// Multipart uploads initiated but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.lock().uploads.len()
    }

    /// Fail the next `times` calls of `op` with `error`
    pub fn fail_times(&self, op: Op, error: S3Error, times: usize) {
        self.lock().failures.insert(
            op,
            FailurePlan {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Fail every call of `op` with `error`
    pub fn fail_always(&self, op: Op, error: S3Error) {
        self.lock().failures.insert(
            op,
            FailurePlan {
                error,
                remaining: None,
            },
        );
    }

    /// Fail uploads of one part number
    pub fn fail_part(&self, part_number: i32, error: S3Error) {
        self.lock().part_failures.insert(part_number, error);
    }

    /// Delay uploads of one part number
    pub fn delay_part(&self, part_number: i32, delay: Duration) {
        self.lock().part_delays.insert(part_number, delay);
    }

    /// Delay every call of `op` after it is recorded
    pub fn delay_op(&self, op: Op, delay: Duration) {
        self.lock().op_delays.insert(op, delay);
    }

    /// Remove every injected failure
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.failures.clear();
        state.part_failures.clear();
    }

    /// Record `call` and return the injected failure for it, if any
    fn begin(&self, call: Call) -> S3Result<()> {
        let mut state = self.lock();
        let op = call.op();
        let part_number = match &call {
            Call::UploadPart { part_number, .. } => Some(*part_number),
            _ => None,
        };
        state.calls.push(call);

        if let Some(error) = part_number.and_then(|n| state.part_failures.get(&n).cloned()) {
            return Err(error);
        }

        let (error, exhausted) = match state.failures.get_mut(&op) {
            None => return Ok(()),
            Some(plan) => match plan.remaining.as_mut() {
                None => (plan.error.clone(), false),
                Some(0) => return Ok(()),
                Some(n) => {
                    *n -= 1;
                    (plan.error.clone(), *n == 0)
                }
            },
        };
        if exhausted {
            state.failures.remove(&op);
        }
        Err(error)
    }

    /// [`begin`](Self::begin), then wait out any delay set for the call's kind
    async fn enter(&self, call: Call) -> S3Result<()> {
        let op = call.op();
        self.begin(call)?;
        let delay = self.lock().op_delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

fn check_md5(body: &[u8], content_md5: &str) -> S3Result<()> {
    let expected = base64::engine::general_purpose::STANDARD.encode(md5::compute(body).0);
    if expected == content_md5 {
        Ok(())
    } else {
        Err(service(
            "BadDigest",
            "The Content-MD5 you specified did not match what was received",
        ))
    }
}

#[async_trait]
impl ObjectStoreApi for InMemoryObjectStore {
    async fn head_object(&self, bucket: &str, key: &str) -> S3Result<ObjectHead> {
        self.enter(Call::Head {
            key: key.to_string(),
        })
        .await?;
        let data = self.object(bucket, key).ok_or_else(|| S3Error::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;
        let archive = self
            .lock()
            .archive
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default();

        Ok(ObjectHead {
            content_length: Some(data.len() as u64),
            e_tag: Some(md5_hex(&data)),
            storage_class: archive.storage_class,
            restore: archive.restore,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> S3Result<ObjectBody> {
        self.enter(Call::Get {
            key: key.to_string(),
        })
        .await?;
        let data = self.object(bucket, key).ok_or_else(|| S3Error::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;

        Ok(ObjectBody {
            content_length: Some(data.len() as u64),
            e_tag: Some(md5_hex(&data)),
            body: Box::pin(stream::iter(vec![Ok(data)])),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_md5: &str,
    ) -> S3Result<Option<String>> {
        self.enter(Call::Put {
            key: key.to_string(),
            size: body.len(),
        })
        .await?;
        check_md5(&body, content_md5)?;

        let e_tag = md5_hex(&body);
        self.insert(bucket, key, body);
        Ok(Some(e_tag))
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> S3Result<String> {
        self.enter(Call::CreateMultipart {
            key: key.to_string(),
        })
        .await?;

        let mut state = self.lock();
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        content_md5: &str,
    ) -> S3Result<String> {
        self.enter(Call::UploadPart {
            key: key.to_string(),
            part_number,
            size: body.len(),
        })
        .await?;

        let delay = self.lock().part_delays.get(&part_number).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        check_md5(&body, content_md5)?;
        let e_tag = md5_hex(&body);

        let mut state = self.lock();
        let upload = state
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| service("NoSuchUpload", upload_id))?;
        upload.parts.insert(part_number, (e_tag.clone(), body));
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> S3Result<Option<String>> {
        self.enter(Call::Complete {
            key: key.to_string(),
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
        })
        .await?;

        if parts.is_empty() {
            return Err(service("MalformedXML", "no parts"));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(service(
                "InvalidPartOrder",
                "The list of parts was not in ascending order",
            ));
        }

        let mut state = self.lock();
        let upload = state
            .uploads
            .get(upload_id)
            .ok_or_else(|| service("NoSuchUpload", upload_id))?;

        let mut data = BytesMut::new();
        let mut digests = Vec::with_capacity(parts.len() * 16);
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((e_tag, body)) if *e_tag == part.e_tag => {
                    data.extend_from_slice(body);
                    digests.extend_from_slice(&md5::compute(body).0);
                }
                _ => {
                    return Err(service(
                        "InvalidPart",
                        format!("part {} not uploaded", part.part_number),
                    ))
                }
            }
        }

        let id = (upload.bucket.clone(), upload.key.clone());
        state.uploads.remove(upload_id);
        state.archive.remove(&id);
        state.objects.insert(id, data.freeze());
        Ok(Some(format!("{}-{}", md5_hex(&digests), parts.len())))
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> S3Result<()> {
        self.enter(Call::Abort {
            key: key.to_string(),
        })
        .await?;
        self.lock()
            .uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| service("NoSuchUpload", upload_id))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> S3Result<()> {
        self.enter(Call::Delete {
            key: key.to_string(),
        })
        .await?;
        let id = (bucket.to_string(), key.to_string());
        let mut state = self.lock();
        state.archive.remove(&id);
        state.objects.remove(&id);
        Ok(())
    }

    async fn restore_object(&self, bucket: &str, key: &str, days: i32) -> S3Result<()> {
        self.enter(Call::Restore {
            key: key.to_string(),
            days,
        })
        .await?;

        let id = (bucket.to_string(), key.to_string());
        let mut state = self.lock();
        if !state.objects.contains_key(&id) {
            return Err(S3Error::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        let archive = state.archive.entry(id).or_default();
        match archive.storage_class.as_deref() {
            None | Some("STANDARD") => Err(service(
                "InvalidObjectState",
                "Restore is not allowed for the object's current storage class",
            )),
            Some(_) => {
                archive.restore = Some("ongoing-request=\"true\"".to_string());
                Ok(())
            }
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> S3Result<ObjectPage> {
        self.enter(Call::List {
            prefix: prefix.to_string(),
        })
        .await?;

        let start = match continuation_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| service("InvalidArgument", "bad continuation token"))?,
            None => 0,
        };

        let matching: Vec<String> = self
            .keys(bucket)
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        let end = (start + self.page_size).min(matching.len());
        let keys = matching.get(start..end).map(<[String]>::to_vec).unwrap_or_default();
        let next_token = (end < matching.len()).then(|| end.to_string());

        Ok(ObjectPage { keys, next_token })
    }
}

/// Client factory over one [`InMemoryObjectStore`]
pub struct InMemoryClientFactory {
    store: InMemoryObjectStore,
    created: AtomicUsize,
    closed: AtomicUsize,
    fail_creation: AtomicBool,
}

impl InMemoryClientFactory {
    pub fn new(store: InMemoryObjectStore) -> Self {
        Self {
            store,
            created: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            fail_creation: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &InMemoryObjectStore {
        &self.store
    }

    /// Clients built so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Clients released so far
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make client creation fail until reset
    pub fn set_fail_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClientFactory<dyn ObjectStoreApi> for InMemoryClientFactory {
    async fn create(&self) -> Result<Arc<dyn ObjectStoreApi>, ResilienceError> {
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(ResilienceError::ClientCreation(
                "in-memory client creation disabled".to_string(),
            ));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let client: Arc<dyn ObjectStoreApi> = Arc::new(self.store.clone());
        Ok(client)
    }

    async fn close(&self, client: Arc<dyn ObjectStoreApi>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        drop(client);
    }
}

/// Connector handing every config the same [`InMemoryClientFactory`]
pub struct InMemoryConnector {
    factory: Arc<InMemoryClientFactory>,
    factories_built: AtomicUsize,
    refuse_configs: AtomicBool,
}

impl InMemoryConnector {
    pub fn new(store: InMemoryObjectStore) -> Self {
        Self {
            factory: Arc::new(InMemoryClientFactory::new(store)),
            factories_built: AtomicUsize::new(0),
            refuse_configs: AtomicBool::new(false),
        }
    }

    pub fn factory(&self) -> &Arc<InMemoryClientFactory> {
        &self.factory
    }

    pub fn store(&self) -> &InMemoryObjectStore {
        self.factory.store()
    }

    /// Number of `client_factory` calls that succeeded
    pub fn factories_built(&self) -> usize {
        self.factories_built.load(Ordering::SeqCst)
    }

    pub fn clients_created(&self) -> usize {
        self.factory.created()
    }

    pub fn clients_closed(&self) -> usize {
        self.factory.closed()
    }

    /// Make `client_factory` fail until reset
    pub fn set_refuse_configs(&self, refuse: bool) {
        self.refuse_configs.store(refuse, Ordering::SeqCst);
    }
}

impl S3Connector for InMemoryConnector {
    fn client_factory(
        &self,
        config: &StorageConfig,
    ) -> S3Result<Arc<dyn ClientFactory<dyn ObjectStoreApi>>> {
        config.validate()?;
        if self.refuse_configs.load(Ordering::SeqCst) {
            return Err(S3Error::InvalidConfig(format!(
                "connector refused bucket {}",
                config.bucket()
            )));
        }
        self.factories_built.fetch_add(1, Ordering::SeqCst);
        let factory: Arc<dyn ClientFactory<dyn ObjectStoreApi>> = self.factory.clone();
        Ok(factory)
    }
}
