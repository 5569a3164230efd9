//! `aws-sdk-s3` implementation of [`ObjectStoreApi`]

use super::api::{ObjectStoreApi, S3Connector};
use super::config::StorageConfig;
use super::error::{S3Error, S3Result};
use super::types::{strip_e_tag, ObjectBody, ObjectHead, ObjectPage, UploadedPart};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, RestoreRequest};
use aws_sdk_s3::Client as AwsS3Client;
use bytes::Bytes;
use futures::stream;
use orbit_core_resilience::{ClientFactory, ResilienceError};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// [`ObjectStoreApi`] backed by an AWS SDK client
#[derive(Debug, Clone)]
pub struct AwsObjectStore {
    client: AwsS3Client,
}

impl AwsObjectStore {
    pub fn new(client: AwsS3Client) -> Self {
        Self { client }
    }

    /// Get a reference to the underlying AWS S3 client
    pub fn aws_client(&self) -> &AwsS3Client {
        &self.client
    }
}

fn non_negative(value: Option<i64>) -> Option<u64> {
    value.and_then(|v| u64::try_from(v).ok())
}

/// SDK retry policy for one storage location
pub(crate) fn sdk_retry_config(config: &StorageConfig) -> RetryConfig {
    RetryConfig::standard()
        .with_max_attempts(config.max_retries().saturating_add(1))
        .with_initial_backoff(config.retry_backoff_base())
        .with_max_backoff(config.retry_backoff_max())
}

#[async_trait]
impl ObjectStoreApi for AwsObjectStore {
    async fn head_object(&self, bucket: &str, key: &str) -> S3Result<ObjectHead> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    S3Error::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    S3Error::from(e)
                }
            })?;

        Ok(ObjectHead {
            content_length: non_negative(output.content_length()),
            e_tag: output.e_tag().map(strip_e_tag),
            storage_class: output.storage_class().map(|class| class.as_str().to_string()),
            restore: output.restore().map(str::to_string),
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> S3Result<ObjectBody> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    S3Error::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    S3Error::from(e)
                }
            })?;

        let content_length = non_negative(output.content_length());
        let e_tag = output.e_tag().map(strip_e_tag);
        let body = stream::try_unfold(output.body, |mut body: ByteStream| async move {
            let chunk = body.try_next().await.map_err(io::Error::other)?;
            Ok::<_, io::Error>(chunk.map(|bytes| (bytes, body)))
        });

        Ok(ObjectBody {
            content_length,
            e_tag,
            body: Box::pin(body),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_md5: &str,
    ) -> S3Result<Option<String>> {
        let content_length = body.len() as i64;
        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_md5(content_md5)
            .content_length(content_length)
            .body(ByteStream::from(body))
            .send()
            .await?;

        Ok(output.e_tag().map(strip_e_tag))
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> S3Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| S3Error::MultipartUpload("No upload ID returned".to_string()))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        content_md5: &str,
    ) -> S3Result<String> {
        let content_length = body.len() as i64;
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .content_md5(content_md5)
            .content_length(content_length)
            .body(ByteStream::from(body))
            .send()
            .await?;

        output.e_tag().map(strip_e_tag).ok_or_else(|| {
            S3Error::MultipartUpload(format!("No ETag returned for part {}", part_number))
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> S3Result<Option<String>> {
        let completed_parts: Vec<CompletedPart> = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.e_tag)
                    .build()
            })
            .collect();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await?;

        Ok(output.e_tag().map(strip_e_tag))
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> S3Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await?;
        Ok(())
    }

    async fn restore_object(&self, bucket: &str, key: &str, days: i32) -> S3Result<()> {
        self.client
            .restore_object()
            .bucket(bucket)
            .key(key)
            .restore_request(RestoreRequest::builder().days(days).build())
            .send()
            .await?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> S3Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> S3Result<ObjectPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation_token)
            .send()
            .await?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ObjectPage { keys, next_token })
    }
}

/// Builds AWS SDK clients for one storage location
#[derive(Debug, Clone)]
pub struct AwsClientFactory {
    config: StorageConfig,
    operation_timeout: Duration,
}

impl AwsClientFactory {
    pub fn new(config: StorageConfig, operation_timeout: Duration) -> Self {
        Self {
            config,
            operation_timeout,
        }
    }

    async fn build_aws_client(&self) -> AwsS3Client {
        let config = &self.config;

        let region_provider =
            RegionProviderChain::first_try(Region::new(config.region().to_string()));
        let credentials = Credentials::new(
            config.access_key(),
            config.secret_key(),
            None,
            None,
            "orbit-storage",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);

        // Set custom endpoint if provided
        if let Some(endpoint) = config.endpoint() {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        // Force path-style addressing if configured (required for MinIO, LocalStack)
        if config.force_path_style() {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let timeout_config = aws_sdk_s3::config::timeout::TimeoutConfig::builder()
            .operation_timeout(self.operation_timeout)
            .build();
        s3_config_builder = s3_config_builder.timeout_config(timeout_config);
        s3_config_builder = s3_config_builder.retry_config(sdk_retry_config(config));

        AwsS3Client::from_conf(s3_config_builder.build())
    }
}

#[async_trait]
impl ClientFactory<dyn ObjectStoreApi> for AwsClientFactory {
    async fn create(&self) -> Result<Arc<dyn ObjectStoreApi>, ResilienceError> {
        self.config
            .validate()
            .map_err(|e| ResilienceError::ClientCreation(e.to_string()))?;

        debug!(
            bucket = %self.config.bucket(),
            region = %self.config.region(),
            endpoint = ?self.config.endpoint(),
            "Building S3 client"
        );
        let client: Arc<dyn ObjectStoreApi> =
            Arc::new(AwsObjectStore::new(self.build_aws_client().await));
        Ok(client)
    }
}

/// [`S3Connector`] producing AWS SDK client factories
#[derive(Debug, Clone)]
pub struct AwsConnector {
    operation_timeout: Duration,
}

impl AwsConnector {
    pub fn new(operation_timeout: Duration) -> Self {
        Self { operation_timeout }
    }
}

impl S3Connector for AwsConnector {
    fn client_factory(
        &self,
        config: &StorageConfig,
    ) -> S3Result<Arc<dyn ClientFactory<dyn ObjectStoreApi>>> {
        config.validate()?;
        let factory: Arc<dyn ClientFactory<dyn ObjectStoreApi>> =
            Arc::new(AwsClientFactory::new(config.clone(), self.operation_timeout));
        Ok(factory)
    }
}
