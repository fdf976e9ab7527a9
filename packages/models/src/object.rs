//! Object listings and bulk copy requests/results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Object key.
    pub key: String,
    /// Backend version id, if the listing included versions.
    pub version_id: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Entity tag, usually the MD5 hex digest for single-part uploads.
    pub etag: Option<String>,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Parameters of a server-side bulk copy between two buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRequest {
    /// Bucket to copy from.
    pub source_bucket: String,
    /// Bucket to copy into.
    pub dest_bucket: String,
    /// Keep content type, custom metadata and object ACLs.
    pub preserve_metadata: bool,
    /// Copy every version of every object, oldest first, one at a time.
    ///
    /// Required whenever the source has versioning enabled so the
    /// destination's version history keeps the same relative order.
    pub ordered: bool,
    /// Storage class to assign to the copies, or the backend default.
    pub storage_class: Option<String>,
    /// Maximum number of concurrent transfers when `ordered` is `false`.
    pub concurrency: usize,
}

/// A single object (version) written to the destination by a bulk copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopiedObject {
    /// Object key.
    pub key: String,
    /// Version id in the source bucket, for ordered copies.
    pub source_version: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// `true` if this entry replayed a delete marker rather than data.
    #[serde(default)]
    pub delete_marker: bool,
}

/// Outcome of a bulk copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyReport {
    /// Objects actually written, in the order they were written for
    /// ordered copies.
    pub copied: Vec<CopiedObject>,
    /// Objects skipped because the destination already held them.
    pub skipped: u64,
}

impl CopyReport {
    /// Total bytes written.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.copied.iter().map(|o| o.size).sum()
    }
}

impl std::fmt::Display for CopyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[allow(clippy::cast_precision_loss)] // display-only MB value
        let mb = self.bytes() as f64 / 1_048_576.0;
        write!(
            f,
            "{} copied ({mb:.1} MB), {} skipped (unchanged)",
            self.copied.len(),
            self.skipped
        )
    }
}
