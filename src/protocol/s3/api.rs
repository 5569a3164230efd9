//! Narrow async seam over the S3 API
//!
//! [`ObjectStoreApi`] lists the calls the adapter needs. The production
//! implementation wraps `aws_sdk_s3::Client` (see [`super::sdk`]); tests use
//! the in-memory store from `crate::testing` (feature `testing`).

use super::config::StorageConfig;
use super::error::S3Result;
use super::types::{ObjectBody, ObjectHead, ObjectPage, UploadedPart};
use async_trait::async_trait;
use bytes::Bytes;
use orbit_core_resilience::ClientFactory;
use std::sync::Arc;

/// Object store calls used by [`super::S3Adapter`]
#[async_trait]
pub trait ObjectStoreApi: Send + Sync {
    /// HEAD an object; a missing key yields [`super::S3Error::NotFound`]
    async fn head_object(&self, bucket: &str, key: &str) -> S3Result<ObjectHead>;

    /// GET an object; a missing key yields [`super::S3Error::NotFound`]
    async fn get_object(&self, bucket: &str, key: &str) -> S3Result<ObjectBody>;

    /// Upload an object in one request; returns the ETag
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_md5: &str,
    ) -> S3Result<Option<String>>;

    /// Start a multipart upload; returns the upload id
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> S3Result<String>;

    /// Upload one part; returns the part ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        content_md5: &str,
    ) -> S3Result<String>;

    /// Complete a multipart upload with parts already sorted by number;
    /// returns the object ETag
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> S3Result<Option<String>>;

    /// Abort a multipart upload, discarding uploaded parts
    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str)
        -> S3Result<()>;

    /// Ask S3 to restore an archived object for `days` days
    async fn restore_object(&self, bucket: &str, key: &str, days: i32) -> S3Result<()>;

    /// Delete one object (deleting a missing key succeeds)
    async fn delete_object(&self, bucket: &str, key: &str) -> S3Result<()>;

    /// List one page of keys under `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> S3Result<ObjectPage>;
}

/// Builds client factories for storage locations
pub trait S3Connector: Send + Sync {
    /// Factory producing clients bound to `config`
    fn client_factory(
        &self,
        config: &StorageConfig,
    ) -> S3Result<Arc<dyn ClientFactory<dyn ObjectStoreApi>>>;
}
