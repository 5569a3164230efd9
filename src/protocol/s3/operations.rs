//! Single-shot uploads, listings and deletes

use super::client::S3Adapter;
use super::error::{S3Error, S3Result};
use base64::Engine;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

/// Deletes issued concurrently by [`S3Adapter::delete_by_prefix`]
const DELETE_CONCURRENCY: usize = 8;

/// Base64 of the MD5 digest, as the `Content-MD5` header expects
pub fn content_md5(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(md5::compute(data).0)
}

impl S3Adapter {
    /// Upload an object in a single request; returns the ETag
    pub async fn put(&self, key: &str, data: Bytes) -> S3Result<Option<String>> {
        let bucket = self.bucket();
        let md5 = content_md5(&data);
        let size = data.len();

        let e_tag = self
            .call(move |client| async move { client.put_object(bucket, key, data, &md5).await })
            .await?;

        debug!(bucket, key, size, "Uploaded object");
        Ok(e_tag)
    }

    /// List every key under `prefix`, following continuation tokens
    pub async fn list(&self, prefix: &str) -> S3Result<Vec<String>> {
        let bucket = self.bucket();
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let token = continuation_token.take();
            let page = self
                .call(move |client| async move { client.list_objects(bucket, prefix, token).await })
                .await?;

            keys.extend(page.keys);
            match page.next_token {
                Some(next) => continuation_token = Some(next),
                None => break,
            }
        }

        Ok(keys)
    }

    /// Delete one object
    pub async fn delete(&self, key: &str) -> S3Result<()> {
        let bucket = self.bucket();
        self.call(move |client| async move { client.delete_object(bucket, key).await })
            .await?;
        debug!(bucket, key, "Deleted object");
        Ok(())
    }

    /// Delete every object under `prefix`; returns how many were deleted.
    ///
    /// An empty prefix would address the whole bucket and is rejected.
    pub async fn delete_by_prefix(&self, prefix: &str) -> S3Result<usize> {
        if prefix.is_empty() {
            return Err(S3Error::InvalidKey(
                "Refusing to delete with an empty prefix".to_string(),
            ));
        }

        let keys = self.list(prefix).await?;
        let count = keys.len();

        let deletes: Vec<_> = keys.iter().map(|key| self.delete(key)).collect();
        stream::iter(deletes)
            .buffer_unordered(DELETE_CONCURRENCY)
            .try_collect::<Vec<()>>()
            .await?;

        debug!(bucket = %self.bucket(), prefix, count, "Deleted objects by prefix");
        Ok(count)
    }
}
