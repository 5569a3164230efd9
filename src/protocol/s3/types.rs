//! Type definitions for S3 operations

use super::error::{S3Error, S3Result};
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::fmt;
use std::io;

/// Lazy stream of object bytes
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// Object metadata returned by a HEAD request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectHead {
    /// Object size in bytes
    pub content_length: Option<u64>,

    /// ETag with surrounding quotes removed
    pub e_tag: Option<String>,

    /// Storage class; `None` means STANDARD
    pub storage_class: Option<String>,

    /// Raw `x-amz-restore` header of an archived object
    pub restore: Option<String>,
}

/// Object metadata plus a lazy body, returned by a GET request
pub struct ObjectBody {
    /// Object size in bytes
    pub content_length: Option<u64>,

    /// ETag with surrounding quotes removed
    pub e_tag: Option<String>,

    /// Object content
    pub body: BodyStream,
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_length", &self.content_length)
            .field("e_tag", &self.e_tag)
            .finish_non_exhaustive()
    }
}

/// One page of a key listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Keys on this page
    pub keys: Vec<String>,

    /// Token for the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// A part accepted by S3 during a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// Part number (1-based, in upload order)
    pub part_number: i32,

    /// ETag returned by S3 for this part
    pub e_tag: String,

    /// Part size in bytes
    pub size: u64,
}

/// Running tally of the parts of one multipart upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartReport {
    parts: Vec<UploadedPart>,
    accumulated_size: u64,
}

impl MultipartReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one uploaded part into the report
    pub fn accumulate(mut self, part: UploadedPart) -> Self {
        self.accumulated_size += part.size;
        self.parts.push(part);
        self
    }

    /// Parts sorted ascending by part number, as `CompleteMultipartUpload` requires
    pub fn completed(&self) -> Vec<UploadedPart> {
        let mut parts = self.parts.clone();
        parts.sort_by_key(|p| p.part_number);
        parts
    }

    /// Total bytes across all folded parts
    pub fn accumulated_size(&self) -> u64 {
        self.accumulated_size
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Result of a successful read: object metadata and a lazy body
pub struct ReadHandle {
    key: String,
    content_length: Option<u64>,
    e_tag: Option<String>,
    body: BodyStream,
}

impl ReadHandle {
    pub fn new(key: impl Into<String>, object: ObjectBody) -> Self {
        Self {
            key: key.into(),
            content_length: object.content_length,
            e_tag: object.e_tag,
            body: object.body,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn e_tag(&self) -> Option<&str> {
        self.e_tag.as_deref()
    }

    /// Take the body stream
    pub fn into_body(self) -> BodyStream {
        self.body
    }

    /// Read the whole body into memory
    pub async fn collect(self) -> S3Result<Bytes> {
        let key = self.key;
        let buf = self
            .body
            .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                buf.extend_from_slice(&chunk);
                Ok(buf)
            })
            .await
            .map_err(|e| S3Error::from(e).context(format!("Failed to read body of {}", key)))?;
        Ok(buf.freeze())
    }
}

impl fmt::Debug for ReadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadHandle")
            .field("key", &self.key)
            .field("content_length", &self.content_length)
            .field("e_tag", &self.e_tag)
            .finish_non_exhaustive()
    }
}

/// Strip the quotes S3 wraps around ETag values
pub fn strip_e_tag(e_tag: &str) -> String {
    e_tag.trim_matches('"').to_string()
}
