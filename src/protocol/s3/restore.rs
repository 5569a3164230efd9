//! Archived objects: restore requests and availability checks
//!
//! Objects outside the standard storage class (GLACIER, DEEP_ARCHIVE...) must
//! be restored before they can be read. S3 reports restore progress in the
//! `x-amz-restore` HEAD header, for example
//! `ongoing-request="false", expiry-date="Fri, 21 Dec 2012 00:00:00 GMT"`.

use super::client::S3Adapter;
use super::error::{S3Error, S3Result};
use super::types::ObjectHead;
use chrono::{DateTime, Utc};
use tracing::{debug, error};

/// Storage class whose objects are readable without a restore
pub const DEFAULT_STANDARD_STORAGE_CLASS: &str = "STANDARD";

/// Whether an object can be downloaded now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorationStatus {
    /// Standard storage, or restored and not yet expired
    Available,
    /// A restore request is still running
    RestorePending,
    /// The restored copy has expired
    Expired,
    /// Archived with no usable restore request
    NotAvailable,
}

/// Availability of one object, as derived from its HEAD response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAvailability {
    pub status: RestorationStatus,
    pub content_length: Option<u64>,
    /// Expiry of the restored copy, when S3 reported one
    pub expiry: Option<DateTime<Utc>>,
}

/// Whether `head` describes an object in the standard storage class.
///
/// A missing storage class means STANDARD. `standard_storage_class`
/// overrides the class name treated as standard.
pub fn is_standard_storage_class(head: &ObjectHead, standard_storage_class: Option<&str>) -> bool {
    let standard = standard_storage_class.unwrap_or(DEFAULT_STANDARD_STORAGE_CLASS);
    head.storage_class
        .as_deref()
        .is_none_or(|class| class == standard)
}

/// Derive the availability of an object from its HEAD response at `now`
pub fn restore_state(
    head: &ObjectHead,
    standard_storage_class: Option<&str>,
    now: DateTime<Utc>,
) -> FileAvailability {
    let mut availability = FileAvailability {
        status: RestorationStatus::NotAvailable,
        content_length: head.content_length,
        expiry: None,
    };

    if is_standard_storage_class(head, standard_storage_class) {
        availability.status = RestorationStatus::Available;
        return availability;
    }

    let Some(header) = head.restore.as_deref() else {
        return availability;
    };

    let expiry = match expiry_date(header) {
        Ok(expiry) => expiry,
        Err(e) => {
            error!(header, error = %e, "Malformed expiry-date in restore header");
            return availability;
        }
    };
    availability.expiry = expiry;

    let expired = expiry.is_some_and(|date| date < now);
    availability.status = match ongoing_request(header) {
        Some(false) if !expired => RestorationStatus::Available,
        Some(false) => RestorationStatus::Expired,
        Some(true) => RestorationStatus::RestorePending,
        None => RestorationStatus::NotAvailable,
    };
    availability
}

/// Quoted value of `name="..."` in a restore header
fn header_field<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    let marker = format!("{}=\"", name);
    let start = header.rfind(&marker)? + marker.len();
    let len = header[start..].find('"')?;
    Some(&header[start..start + len])
}

fn ongoing_request(header: &str) -> Option<bool> {
    let header = header.to_ascii_lowercase();
    header_field(&header, "ongoing-request").map(|value| value == "true")
}

fn expiry_date(header: &str) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    header_field(header, "expiry-date")
        .map(|value| DateTime::parse_from_rfc2822(value).map(|date| date.with_timezone(&Utc)))
        .transpose()
}

impl S3Adapter {
    /// Request a temporary restored copy of an archived object
    pub async fn restore(&self, key: &str, days: i32) -> S3Result<()> {
        if days < 1 {
            return Err(S3Error::InvalidConfig(format!(
                "Restore duration must be at least one day, got {}",
                days
            )));
        }

        let bucket = self.bucket();
        self.call(move |client| async move { client.restore_object(bucket, key, days).await })
            .await?;

        debug!(bucket, key, days, "Requested object restore");
        Ok(())
    }

    /// Whether an object can be read now; a missing object is an error
    pub async fn availability(
        &self,
        key: &str,
        standard_storage_class: Option<&str>,
    ) -> S3Result<FileAvailability> {
        let head = self.head(key).await?;
        let availability = restore_state(&head, standard_storage_class, Utc::now());

        debug!(
            bucket = %self.bucket(),
            key,
            status = ?availability.status,
            expiry = ?availability.expiry,
            "Checked object availability"
        );
        Ok(availability)
    }

    /// Whether an object is stored in the standard storage class
    pub async fn is_standard_storage_class(
        &self,
        key: &str,
        standard_storage_class: Option<&str>,
    ) -> S3Result<bool> {
        let head = self.head(key).await?;
        Ok(is_standard_storage_class(&head, standard_storage_class))
    }
}
