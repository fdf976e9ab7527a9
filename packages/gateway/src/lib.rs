#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Storage gateway used by the relocation orchestrator.
//!
//! The [`StorageGateway`] trait is the only way the orchestrator touches
//! buckets and objects. Two implementations are provided:
//!
//! * [`s3::S3Gateway`], backed by `aws-sdk-s3`, for any S3-compatible
//!   service.
//! * [`memory::MemoryGateway`], an in-process backend with call recording
//!   and fault injection, used by the test suites.
//!
//! Every failure is a [`GatewayError`] carrying a [`GatewayErrorKind`], so
//! callers branch on the kind rather than on error text.

pub mod memory;
pub mod progress;
pub mod s3;

use async_trait::async_trait;
use bucket_relocate_models::{
    AclDocument, CopyReport, CopyRequest, CorsRule, LoggingConfig, ObjectDescriptor,
    RelocationTarget, Versioning, WebsiteConfig,
};
use strum_macros::{AsRefStr, Display};

use crate::progress::ProgressCallback;

/// Classification of a gateway failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum GatewayErrorKind {
    /// The bucket, object, or version does not exist.
    NotFound,
    /// The bucket name is taken by someone else.
    AlreadyExists,
    /// The bucket already exists and belongs to the caller.
    AlreadyOwned,
    /// The bucket still contains objects (possibly only as far as an
    /// eventually-consistent listing is concerned).
    NotEmpty,
    /// The caller lacks permission.
    AccessDenied,
    /// Anything else.
    Other,
}

/// A failed storage operation.
#[derive(Debug, thiserror::Error)]
#[error("{operation} on {target} failed ({kind}): {source}")]
pub struct GatewayError {
    /// Failure class.
    pub kind: GatewayErrorKind,
    /// Operation name (e.g. `DeleteBucket`).
    pub operation: &'static str,
    /// `bucket` or `bucket/key` the operation addressed.
    pub target: String,
    /// Underlying backend error.
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl GatewayError {
    /// Creates a new gateway error.
    pub fn new(
        kind: GatewayErrorKind,
        operation: &'static str,
        target: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            operation,
            target: target.into(),
            source: source.into(),
        }
    }

    /// Returns `true` for [`GatewayErrorKind::NotEmpty`].
    #[must_use]
    pub fn is_not_empty(&self) -> bool {
        self.kind == GatewayErrorKind::NotEmpty
    }

    /// Returns `true` for [`GatewayErrorKind::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == GatewayErrorKind::NotFound
    }

    /// Returns `true` for [`GatewayErrorKind::AccessDenied`].
    #[must_use]
    pub fn is_access_denied(&self) -> bool {
        self.kind == GatewayErrorKind::AccessDenied
    }

    /// Returns `true` for [`GatewayErrorKind::AlreadyExists`].
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        self.kind == GatewayErrorKind::AlreadyExists
    }

    /// Returns `true` for [`GatewayErrorKind::AlreadyOwned`].
    #[must_use]
    pub fn is_already_owned(&self) -> bool {
        self.kind == GatewayErrorKind::AlreadyOwned
    }
}

/// Bucket and object operations consumed by the orchestrator.
///
/// Implementations must not retry on their own beyond what the underlying
/// client does for a single request; retry decisions belong to the caller.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Returns whether `bucket` exists and is visible to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] for anything other than "not found".
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, GatewayError>;

    /// Lists the current (non-deleted) objects of a bucket.
    ///
    /// The listing may lag behind recent writes and deletes.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the listing fails.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectDescriptor>, GatewayError>;

    /// Fetches an object's metadata, proving the caller may read it.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] with [`GatewayErrorKind::AccessDenied`]
    /// for unreadable objects.
    async fn head_object(&self, bucket: &str, key: &str) -> Result<(), GatewayError>;

    /// Returns the versioning state of a bucket.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on backend failure.
    async fn versioning(&self, bucket: &str) -> Result<Versioning, GatewayError>;

    /// Sets the versioning state of a bucket.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on backend failure.
    async fn set_versioning(&self, bucket: &str, state: Versioning) -> Result<(), GatewayError>;

    /// Creates a bucket at the requested location and storage class.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] with [`GatewayErrorKind::AlreadyOwned`] if
    /// the caller already has a bucket of that name, or
    /// [`GatewayErrorKind::AlreadyExists`] if someone else does.
    async fn create_bucket(
        &self,
        bucket: &str,
        target: &RelocationTarget,
    ) -> Result<(), GatewayError>;

    /// Deletes an empty bucket.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] with [`GatewayErrorKind::NotEmpty`] if the
    /// backend still sees objects in the bucket.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), GatewayError>;

    /// Server-side copies objects between buckets.
    ///
    /// Objects the destination already holds (same size and entity tag, or
    /// for ordered copies, versions already replayed) are skipped, which
    /// makes an interrupted copy cheap to re-run.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on the first failed transfer.
    async fn copy_objects(
        &self,
        request: &CopyRequest,
        progress: &dyn ProgressCallback,
    ) -> Result<CopyReport, GatewayError>;

    /// Deletes objects, optionally restricted to a key prefix, optionally
    /// including every noncurrent version and delete marker. Returns the
    /// number of objects (versions) deleted.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if any deletion fails.
    async fn delete_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        all_versions: bool,
    ) -> Result<u64, GatewayError>;

    /// Returns the bucket ACL.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on backend failure.
    async fn bucket_acl(&self, bucket: &str) -> Result<AclDocument, GatewayError>;

    /// Replaces the bucket ACL.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on backend failure.
    async fn set_bucket_acl(&self, bucket: &str, acl: &AclDocument) -> Result<(), GatewayError>;

    /// Returns the website configuration (empty if none).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on backend failure.
    async fn website(&self, bucket: &str) -> Result<WebsiteConfig, GatewayError>;

    /// Replaces the website configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on backend failure.
    async fn set_website(&self, bucket: &str, config: &WebsiteConfig)
    -> Result<(), GatewayError>;

    /// Returns the access logging configuration (empty if none).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on backend failure.
    async fn logging(&self, bucket: &str) -> Result<LoggingConfig, GatewayError>;

    /// Replaces the access logging configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on backend failure.
    async fn set_logging(&self, bucket: &str, config: &LoggingConfig)
    -> Result<(), GatewayError>;

    /// Returns the CORS rules (empty if none).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on backend failure.
    async fn cors(&self, bucket: &str) -> Result<Vec<CorsRule>, GatewayError>;

    /// Replaces the CORS rules; an empty slice removes the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on backend failure.
    async fn set_cors(&self, bucket: &str, rules: &[CorsRule]) -> Result<(), GatewayError>;

    /// Writes a small object. Used for the write-permission probe.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on backend failure.
    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
    ) -> Result<(), GatewayError>;
}
