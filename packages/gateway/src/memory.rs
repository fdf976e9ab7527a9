//! In-process [`StorageGateway`].
//!
//! Models buckets, versioned objects, delete markers and bucket-level
//! configuration closely enough to run full relocations in tests. Every
//! call is recorded as a [`GatewayCall`], and faults can be injected per
//! bucket (transient `BucketNotEmpty`, denied reads/writes/deletes, failing
//! copies).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bucket_relocate_models::{
    AclDocument, CopiedObject, CopyReport, CopyRequest, CorsRule, LoggingConfig, ObjectDescriptor,
    RelocationTarget, Versioning, WebsiteConfig,
};

use crate::progress::ProgressCallback;
use crate::{GatewayError, GatewayErrorKind, StorageGateway};

/// Bucket-level configuration document addressed by a metadata call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataDocument {
    /// Bucket ACL.
    Acl,
    /// Website configuration.
    Website,
    /// Logging configuration.
    Logging,
    /// CORS rules.
    Cors,
}

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    /// [`StorageGateway::bucket_exists`].
    BucketExists { bucket: String },
    /// [`StorageGateway::list_objects`].
    ListObjects { bucket: String },
    /// [`StorageGateway::head_object`].
    HeadObject { bucket: String, key: String },
    /// [`StorageGateway::versioning`].
    GetVersioning { bucket: String },
    /// [`StorageGateway::set_versioning`].
    SetVersioning { bucket: String, state: Versioning },
    /// [`StorageGateway::create_bucket`].
    CreateBucket {
        bucket: String,
        target: RelocationTarget,
    },
    /// [`StorageGateway::delete_bucket`].
    DeleteBucket { bucket: String },
    /// [`StorageGateway::copy_objects`].
    CopyObjects {
        source: String,
        dest: String,
        ordered: bool,
    },
    /// [`StorageGateway::delete_objects`].
    DeleteObjects {
        bucket: String,
        prefix: Option<String>,
        all_versions: bool,
    },
    /// A metadata getter.
    GetMetadata {
        bucket: String,
        document: MetadataDocument,
    },
    /// A metadata setter.
    SetMetadata {
        bucket: String,
        document: MetadataDocument,
    },
    /// [`StorageGateway::write_object`].
    WriteObject { bucket: String, key: String },
}

impl GatewayCall {
    /// Returns `true` for calls that change backend state.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::SetVersioning { .. }
                | Self::CreateBucket { .. }
                | Self::DeleteBucket { .. }
                | Self::CopyObjects { .. }
                | Self::DeleteObjects { .. }
                | Self::SetMetadata { .. }
                | Self::WriteObject { .. }
        )
    }
}

/// One stored version of an object, or a delete marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVersion {
    /// Backend-assigned version id (unique across the gateway).
    pub version_id: String,
    /// Object data; empty for delete markers.
    pub content: Vec<u8>,
    /// Content type.
    pub content_type: Option<String>,
    /// Custom metadata.
    pub metadata: BTreeMap<String, String>,
    /// Canned object ACL.
    pub acl: Option<String>,
    /// Storage class the version was written with.
    pub storage_class: Option<String>,
    /// `true` for delete markers.
    pub delete_marker: bool,
}

impl StoredVersion {
    /// MD5 hex digest of the content, as an S3-style entity tag.
    #[must_use]
    pub fn etag(&self) -> String {
        format!("{:x}", md5::compute(&self.content))
    }
}

/// Data for a new object written through [`MemoryGateway::put`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectData {
    /// Object data.
    pub content: Vec<u8>,
    /// Content type.
    pub content_type: Option<String>,
    /// Custom metadata.
    pub metadata: BTreeMap<String, String>,
    /// Canned object ACL.
    pub acl: Option<String>,
}

impl ObjectData {
    /// Object with the given content and no metadata.
    #[must_use]
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Sets the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// Adds a custom metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Sets the canned ACL.
    #[must_use]
    pub fn with_acl(mut self, acl: &str) -> Self {
        self.acl = Some(acl.to_string());
        self
    }
}

/// A bucket and everything in it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryBucket {
    /// Location the bucket was created at.
    pub location: Option<String>,
    /// Default storage class.
    pub storage_class: Option<String>,
    /// Versioning state.
    pub versioning: Versioning,
    /// Bucket ACL.
    pub acl: AclDocument,
    /// Website configuration.
    pub website: WebsiteConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// CORS rules.
    pub cors: Vec<CorsRule>,
    /// Object history per key, oldest first.
    pub objects: BTreeMap<String, Vec<StoredVersion>>,
}

impl MemoryBucket {
    /// Current (latest, non-deleted) version of `key`.
    #[must_use]
    pub fn current(&self, key: &str) -> Option<&StoredVersion> {
        self.objects
            .get(key)
            .and_then(|versions| versions.last())
            .filter(|v| !v.delete_marker)
    }

    /// Keys with a current version.
    #[must_use]
    pub fn current_keys(&self) -> Vec<String> {
        self.objects
            .keys()
            .filter(|key| self.current(key).is_some())
            .cloned()
            .collect()
    }

    /// `true` if no key has any version or delete marker.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.values().all(Vec::is_empty)
    }
}

#[derive(Default)]
struct Faults {
    not_empty: HashMap<String, u32>,
    denied_reads: BTreeSet<(String, String)>,
    denied_writes: BTreeSet<String>,
    denied_deletes: BTreeSet<String>,
    failing_copies: BTreeSet<String>,
    foreign_names: BTreeSet<String>,
}

#[derive(Default)]
struct MemoryState {
    buckets: BTreeMap<String, MemoryBucket>,
    calls: Vec<GatewayCall>,
    faults: Faults,
    next_version: u64,
}

impl MemoryState {
    fn bucket(&self, operation: &'static str, name: &str) -> Result<&MemoryBucket, GatewayError> {
        self.buckets.get(name).ok_or_else(|| no_such_bucket(operation, name))
    }

    fn bucket_mut(
        &mut self,
        operation: &'static str,
        name: &str,
    ) -> Result<&mut MemoryBucket, GatewayError> {
        self.buckets
            .get_mut(name)
            .ok_or_else(|| no_such_bucket(operation, name))
    }

    fn version_id(&mut self) -> String {
        self.next_version += 1;
        format!("v{:06}", self.next_version)
    }

    /// Writes a new version, replacing history on unversioned buckets.
    fn write(&mut self, bucket: &str, key: &str, mut version: StoredVersion) {
        version.version_id = self.version_id();
        if let Some(b) = self.buckets.get_mut(bucket) {
            let history = b.objects.entry(key.to_string()).or_default();
            if b.versioning.is_enabled() {
                history.push(version);
            } else {
                *history = vec![version];
            }
        }
    }

    /// Deletes the current version: a delete marker on versioned buckets,
    /// outright removal otherwise.
    fn delete_current(&mut self, bucket: &str, key: &str) {
        let marker_id = self.version_id();
        if let Some(b) = self.buckets.get_mut(bucket) {
            if b.versioning.is_enabled() {
                if b.current(key).is_some() {
                    b.objects.entry(key.to_string()).or_default().push(StoredVersion {
                        version_id: marker_id,
                        content: Vec::new(),
                        content_type: None,
                        metadata: BTreeMap::new(),
                        acl: None,
                        storage_class: None,
                        delete_marker: true,
                    });
                }
            } else {
                b.objects.remove(key);
            }
        }
    }
}

/// In-memory storage backend with call recording and fault injection.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: GatewayCall) -> MutexGuard<'_, MemoryState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }

    // ── Setup ───────────────────────────────────────────────────────

    /// Creates a bucket directly (not recorded as a call).
    pub fn insert_bucket(&self, name: &str, versioning: Versioning) {
        self.lock().buckets.insert(
            name.to_string(),
            MemoryBucket {
                versioning,
                ..MemoryBucket::default()
            },
        );
    }

    /// Applies `update` to a bucket's configuration (not recorded).
    pub fn update_bucket(&self, name: &str, update: impl FnOnce(&mut MemoryBucket)) {
        if let Some(bucket) = self.lock().buckets.get_mut(name) {
            update(bucket);
        }
    }

    /// Writes an object directly (not recorded). Returns the version id.
    pub fn put(&self, bucket: &str, key: &str, data: ObjectData) -> Option<String> {
        let mut state = self.lock();
        let storage_class = state.buckets.get(bucket)?.storage_class.clone();
        state.write(
            bucket,
            key,
            StoredVersion {
                version_id: String::new(),
                content: data.content,
                content_type: data.content_type,
                metadata: data.metadata,
                acl: data.acl,
                storage_class,
                delete_marker: false,
            },
        );
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .and_then(|history| history.last())
            .map(|v| v.version_id.clone())
    }

    /// Deletes the current version of an object directly (not recorded).
    pub fn remove(&self, bucket: &str, key: &str) {
        self.lock().delete_current(bucket, key);
    }

    // ── Fault injection ─────────────────────────────────────────────

    /// The next `times` `DeleteBucket` calls on `bucket` fail with
    /// [`GatewayErrorKind::NotEmpty`] regardless of content.
    pub fn fail_delete_not_empty(&self, bucket: &str, times: u32) {
        self.lock()
            .faults
            .not_empty
            .insert(bucket.to_string(), times);
    }

    /// `HeadObject` on `bucket/key` is denied.
    pub fn deny_read(&self, bucket: &str, key: &str) {
        self.lock()
            .faults
            .denied_reads
            .insert((bucket.to_string(), key.to_string()));
    }

    /// Object writes into `bucket` are denied.
    pub fn deny_writes(&self, bucket: &str) {
        self.lock().faults.denied_writes.insert(bucket.to_string());
    }

    /// Object deletes in `bucket` are denied.
    pub fn deny_deletes(&self, bucket: &str) {
        self.lock().faults.denied_deletes.insert(bucket.to_string());
    }

    /// Copies into `dest` fail until [`Self::clear_faults`] is called.
    pub fn fail_copies_into(&self, dest: &str) {
        self.lock().faults.failing_copies.insert(dest.to_string());
    }

    /// Another account holds the name `bucket`, so creating it fails with
    /// [`GatewayErrorKind::AlreadyExists`].
    pub fn claim_name_elsewhere(&self, bucket: &str) {
        self.lock().faults.foreign_names.insert(bucket.to_string());
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.lock().faults = Faults::default();
    }

    // ── Inspection ──────────────────────────────────────────────────

    /// Snapshot of a bucket, if it exists.
    #[must_use]
    pub fn bucket(&self, name: &str) -> Option<MemoryBucket> {
        self.lock().buckets.get(name).cloned()
    }

    /// Returns `true` if the bucket exists.
    #[must_use]
    pub fn has_bucket(&self, name: &str) -> bool {
        self.lock().buckets.contains_key(name)
    }

    /// Every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }
}

#[async_trait]
impl StorageGateway for MemoryGateway {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, GatewayError> {
        let state = self.record(GatewayCall::BucketExists {
            bucket: bucket.to_string(),
        });
        Ok(state.buckets.contains_key(bucket))
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectDescriptor>, GatewayError> {
        let state = self.record(GatewayCall::ListObjects {
            bucket: bucket.to_string(),
        });
        let b = state.bucket("ListObjects", bucket)?;
        Ok(b.objects
            .iter()
            .filter_map(|(key, _)| {
                b.current(key).map(|v| ObjectDescriptor {
                    key: key.clone(),
                    version_id: Some(v.version_id.clone()),
                    size: v.content.len() as u64,
                    etag: Some(v.etag()),
                    last_modified: None,
                })
            })
            .collect())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<(), GatewayError> {
        let state = self.record(GatewayCall::HeadObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        let target = format!("{bucket}/{key}");
        if state
            .faults
            .denied_reads
            .contains(&(bucket.to_string(), key.to_string()))
        {
            return Err(denied("HeadObject", target));
        }
        let b = state.bucket("HeadObject", bucket)?;
        if b.current(key).is_none() {
            return Err(GatewayError::new(
                GatewayErrorKind::NotFound,
                "HeadObject",
                target,
                "no such key",
            ));
        }
        Ok(())
    }

    async fn versioning(&self, bucket: &str) -> Result<Versioning, GatewayError> {
        let state = self.record(GatewayCall::GetVersioning {
            bucket: bucket.to_string(),
        });
        Ok(state.bucket("GetBucketVersioning", bucket)?.versioning)
    }

    async fn set_versioning(&self, bucket: &str, versioning: Versioning) -> Result<(), GatewayError> {
        let mut state = self.record(GatewayCall::SetVersioning {
            bucket: bucket.to_string(),
            state: versioning,
        });
        state.bucket_mut("PutBucketVersioning", bucket)?.versioning = versioning;
        Ok(())
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        target: &RelocationTarget,
    ) -> Result<(), GatewayError> {
        let mut state = self.record(GatewayCall::CreateBucket {
            bucket: bucket.to_string(),
            target: target.clone(),
        });
        if state.faults.foreign_names.contains(bucket) {
            return Err(GatewayError::new(
                GatewayErrorKind::AlreadyExists,
                "CreateBucket",
                bucket,
                "bucket name is owned by another account",
            ));
        }
        if state.buckets.contains_key(bucket) {
            return Err(GatewayError::new(
                GatewayErrorKind::AlreadyOwned,
                "CreateBucket",
                bucket,
                "bucket already exists and is owned by you",
            ));
        }
        state.buckets.insert(
            bucket.to_string(),
            MemoryBucket {
                location: target.location.clone(),
                storage_class: target.storage_class.clone(),
                ..MemoryBucket::default()
            },
        );
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), GatewayError> {
        let mut state = self.record(GatewayCall::DeleteBucket {
            bucket: bucket.to_string(),
        });

        if let Some(remaining) = state.faults.not_empty.get_mut(bucket)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(not_empty(bucket));
        }

        if !state.bucket("DeleteBucket", bucket)?.is_empty() {
            return Err(not_empty(bucket));
        }
        state.buckets.remove(bucket);
        Ok(())
    }

    async fn copy_objects(
        &self,
        request: &CopyRequest,
        progress: &dyn ProgressCallback,
    ) -> Result<CopyReport, GatewayError> {
        let mut state = self.record(GatewayCall::CopyObjects {
            source: request.source_bucket.clone(),
            dest: request.dest_bucket.clone(),
            ordered: request.ordered,
        });

        if state.faults.failing_copies.contains(&request.dest_bucket) {
            return Err(GatewayError::new(
                GatewayErrorKind::Other,
                "CopyObject",
                request.dest_bucket.clone(),
                "injected copy failure",
            ));
        }
        if state.faults.denied_writes.contains(&request.dest_bucket) {
            return Err(denied("CopyObject", request.dest_bucket.clone()));
        }

        let source = state.bucket("CopyObject", &request.source_bucket)?.clone();
        let dest = state.bucket("CopyObject", &request.dest_bucket)?.clone();
        let storage_class = request
            .storage_class
            .clone()
            .or_else(|| dest.storage_class.clone());

        let mut report = CopyReport::default();
        let mut pending: Vec<(String, StoredVersion)> = Vec::new();

        for (key, history) in &source.objects {
            if request.ordered {
                let already = dest.objects.get(key).map_or(0, Vec::len);
                report.skipped += already.min(history.len()) as u64;
                pending.extend(history.iter().skip(already).map(|v| (key.clone(), v.clone())));
            } else if let Some(current) = source.current(key) {
                let unchanged = dest.current(key).is_some_and(|existing| {
                    existing.content.len() == current.content.len()
                        && existing.etag() == current.etag()
                });
                if unchanged {
                    report.skipped += 1;
                } else {
                    pending.push((key.clone(), current.clone()));
                }
            }
        }

        progress.set_total(pending.len() as u64);

        for (key, version) in pending {
            if version.delete_marker {
                state.delete_current(&request.dest_bucket, &key);
            } else {
                let copy = if request.preserve_metadata {
                    StoredVersion {
                        storage_class: storage_class.clone(),
                        ..version.clone()
                    }
                } else {
                    StoredVersion {
                        content_type: None,
                        metadata: BTreeMap::new(),
                        acl: None,
                        storage_class: storage_class.clone(),
                        ..version.clone()
                    }
                };
                state.write(&request.dest_bucket, &key, copy);
            }
            report.copied.push(CopiedObject {
                key,
                source_version: Some(version.version_id),
                size: version.content.len() as u64,
                delete_marker: version.delete_marker,
            });
            progress.inc(1);
        }

        Ok(report)
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        all_versions: bool,
    ) -> Result<u64, GatewayError> {
        let mut state = self.record(GatewayCall::DeleteObjects {
            bucket: bucket.to_string(),
            prefix: prefix.map(str::to_string),
            all_versions,
        });

        if state.faults.denied_deletes.contains(bucket) {
            return Err(denied("DeleteObjects", bucket.to_string()));
        }

        let keys: Vec<String> = state
            .bucket("DeleteObjects", bucket)?
            .objects
            .keys()
            .filter(|key| prefix.is_none_or(|p| key.starts_with(p)))
            .cloned()
            .collect();

        let mut deleted = 0u64;
        for key in keys {
            if all_versions {
                if let Some(history) = state.bucket_mut("DeleteObjects", bucket)?.objects.remove(&key) {
                    deleted += history.len() as u64;
                }
            } else if state.bucket("DeleteObjects", bucket)?.current(&key).is_some() {
                state.delete_current(bucket, &key);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn bucket_acl(&self, bucket: &str) -> Result<AclDocument, GatewayError> {
        let state = self.record(get_metadata(bucket, MetadataDocument::Acl));
        Ok(state.bucket("GetBucketAcl", bucket)?.acl.clone())
    }

    async fn set_bucket_acl(&self, bucket: &str, acl: &AclDocument) -> Result<(), GatewayError> {
        let mut state = self.record(set_metadata(bucket, MetadataDocument::Acl));
        state.bucket_mut("PutBucketAcl", bucket)?.acl = acl.clone();
        Ok(())
    }

    async fn website(&self, bucket: &str) -> Result<WebsiteConfig, GatewayError> {
        let state = self.record(get_metadata(bucket, MetadataDocument::Website));
        Ok(state.bucket("GetBucketWebsite", bucket)?.website.clone())
    }

    async fn set_website(
        &self,
        bucket: &str,
        config: &WebsiteConfig,
    ) -> Result<(), GatewayError> {
        let mut state = self.record(set_metadata(bucket, MetadataDocument::Website));
        state.bucket_mut("PutBucketWebsite", bucket)?.website = config.clone();
        Ok(())
    }

    async fn logging(&self, bucket: &str) -> Result<LoggingConfig, GatewayError> {
        let state = self.record(get_metadata(bucket, MetadataDocument::Logging));
        Ok(state.bucket("GetBucketLogging", bucket)?.logging.clone())
    }

    async fn set_logging(
        &self,
        bucket: &str,
        config: &LoggingConfig,
    ) -> Result<(), GatewayError> {
        let mut state = self.record(set_metadata(bucket, MetadataDocument::Logging));
        state.bucket_mut("PutBucketLogging", bucket)?.logging = config.clone();
        Ok(())
    }

    async fn cors(&self, bucket: &str) -> Result<Vec<CorsRule>, GatewayError> {
        let state = self.record(get_metadata(bucket, MetadataDocument::Cors));
        Ok(state.bucket("GetBucketCors", bucket)?.cors.clone())
    }

    async fn set_cors(&self, bucket: &str, rules: &[CorsRule]) -> Result<(), GatewayError> {
        let mut state = self.record(set_metadata(bucket, MetadataDocument::Cors));
        state.bucket_mut("PutBucketCors", bucket)?.cors = rules.to_vec();
        Ok(())
    }

    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
    ) -> Result<(), GatewayError> {
        let mut state = self.record(GatewayCall::WriteObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if state.faults.denied_writes.contains(bucket) {
            return Err(denied("PutObject", format!("{bucket}/{key}")));
        }
        let storage_class = state.bucket("PutObject", bucket)?.storage_class.clone();
        state.write(
            bucket,
            key,
            StoredVersion {
                version_id: String::new(),
                content,
                content_type: Some("text/plain".to_string()),
                metadata: BTreeMap::new(),
                acl: None,
                storage_class,
                delete_marker: false,
            },
        );
        Ok(())
    }
}

fn get_metadata(bucket: &str, document: MetadataDocument) -> GatewayCall {
    GatewayCall::GetMetadata {
        bucket: bucket.to_string(),
        document,
    }
}

fn set_metadata(bucket: &str, document: MetadataDocument) -> GatewayCall {
    GatewayCall::SetMetadata {
        bucket: bucket.to_string(),
        document,
    }
}

fn no_such_bucket(operation: &'static str, bucket: &str) -> GatewayError {
    GatewayError::new(GatewayErrorKind::NotFound, operation, bucket, "no such bucket")
}

fn not_empty(bucket: &str) -> GatewayError {
    GatewayError::new(
        GatewayErrorKind::NotEmpty,
        "DeleteBucket",
        bucket,
        "the bucket you tried to delete is not empty",
    )
}

fn denied(operation: &'static str, target: String) -> GatewayError {
    GatewayError::new(GatewayErrorKind::AccessDenied, operation, target, "access denied")
}
