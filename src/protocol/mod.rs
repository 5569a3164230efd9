/*!
 * Protocol layer for orbit-storage
 *
 * Only S3 and S3-compatible object stores are supported.
 */

pub mod s3;
