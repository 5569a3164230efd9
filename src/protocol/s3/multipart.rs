//! Multipart upload protocol: initiate, upload parts, complete or abort
//!
//! [`MultipartSession`] wraps an initiated upload and guarantees it ends in
//! exactly one of complete or abort:
//! - [`MultipartSession::complete`] aborts when completion is rejected
//! - [`MultipartSession::abort`] aborts explicitly
//! - dropping an unfinished session (cancellation) spawns an abort on the
//!   current tokio runtime

use super::client::S3Adapter;
use super::error::{S3Error, S3Result};
use super::operations::content_md5;
use super::types::{MultipartReport, UploadedPart};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

/// Highest part number S3 accepts
pub const MAX_PART_NUMBER: i32 = 10_000;

impl S3Adapter {
    /// Initiate a multipart upload; returns the upload id
    pub async fn initiate_multipart(&self, key: &str) -> S3Result<String> {
        let bucket = self.bucket();
        let upload_id = self
            .call(move |client| async move { client.create_multipart_upload(bucket, key).await })
            .await?;

        debug!(bucket, key, upload_id = %upload_id, "Initiated multipart upload");
        Ok(upload_id)
    }

    /// Upload a single part with its `Content-MD5`
    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> S3Result<UploadedPart> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(S3Error::MultipartUpload(format!(
                "Part number {} outside 1..={}",
                part_number, MAX_PART_NUMBER
            )));
        }

        let bucket = self.bucket();
        let size = data.len() as u64;
        let md5 = content_md5(&data);

        debug!(bucket, key, upload_id, part_number, size, "Uploading part");
        let e_tag = self
            .call(move |client| async move {
                client
                    .upload_part(bucket, key, upload_id, part_number, data, &md5)
                    .await
            })
            .await?;

        Ok(UploadedPart {
            part_number,
            e_tag,
            size,
        })
    }

    /// Complete a multipart upload; parts are sorted by number before sending
    pub async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> S3Result<Option<String>> {
        let mut sorted = parts.to_vec();
        sorted.sort_by_key(|p| p.part_number);

        let bucket = self.bucket();
        let part_count = sorted.len();
        let e_tag = self
            .call(move |client| async move {
                client
                    .complete_multipart_upload(bucket, key, upload_id, &sorted)
                    .await
            })
            .await?;

        debug!(bucket, key, upload_id, part_count, "Completed multipart upload");
        Ok(e_tag)
    }

    /// Abort a multipart upload
    pub async fn abort_multipart(&self, key: &str, upload_id: &str) -> S3Result<()> {
        let bucket = self.bucket();
        self.call(move |client| async move {
            client.abort_multipart_upload(bucket, key, upload_id).await
        })
        .await?;

        debug!(bucket, key, upload_id, "Aborted multipart upload");
        Ok(())
    }

    /// Initiate a multipart upload and return a session guarding it
    pub async fn begin_multipart(self: &Arc<Self>, key: &str) -> S3Result<MultipartSession> {
        let upload_id = self.initiate_multipart(key).await?;
        Ok(MultipartSession {
            adapter: Arc::clone(self),
            key: key.to_string(),
            upload_id,
            armed: true,
        })
    }
}

/// An initiated multipart upload that must end in complete or abort
#[derive(Debug)]
pub struct MultipartSession {
    adapter: Arc<S3Adapter>,
    key: String,
    upload_id: String,
    armed: bool,
}

impl MultipartSession {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Upload one part of this session
    pub async fn upload_part(&self, part_number: i32, data: Bytes) -> S3Result<UploadedPart> {
        self.adapter
            .upload_part(&self.key, &self.upload_id, part_number, data)
            .await
    }

    /// Complete with the parts in `report`; aborts if completion fails.
    ///
    /// The session stays armed until completion or the follow-up abort has
    /// returned, so dropping this future midway still aborts the upload.
    pub async fn complete(mut self, report: &MultipartReport) -> S3Result<Option<String>> {
        let result = self
            .adapter
            .complete_multipart(&self.key, &self.upload_id, &report.completed())
            .await;

        if let Err(e) = &result {
            warn!(
                key = %self.key,
                upload_id = %self.upload_id,
                error = %e,
                "Completion rejected, aborting multipart upload"
            );
            self.abort_quietly().await;
        }
        self.armed = false;
        result
    }

    /// Abort the upload
    pub async fn abort(mut self) -> S3Result<()> {
        let result = self.adapter.abort_multipart(&self.key, &self.upload_id).await;
        self.armed = false;
        result
    }

    async fn abort_quietly(&self) {
        if let Err(e) = self.adapter.abort_multipart(&self.key, &self.upload_id).await {
            warn!(
                key = %self.key,
                upload_id = %self.upload_id,
                error = %e,
                "Failed to abort multipart upload"
            );
        }
    }
}

impl Drop for MultipartSession {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let adapter = Arc::clone(&self.adapter);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(key = %key, upload_id = %upload_id, "Aborting abandoned multipart upload");
                handle.spawn(async move {
                    if let Err(e) = adapter.abort_multipart(&key, &upload_id).await {
                        warn!(
                            key = %key,
                            upload_id = %upload_id,
                            error = %e,
                            "Failed to abort abandoned multipart upload"
                        );
                    }
                });
            }
            Err(_) => warn!(
                key = %key,
                upload_id = %upload_id,
                "No runtime to abort abandoned multipart upload"
            ),
        }
    }
}
