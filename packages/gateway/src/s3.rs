//! [`StorageGateway`] backed by `aws-sdk-s3`.
//!
//! Works against AWS S3 and S3-compatible services (`MinIO`, Ceph RGW,
//! Cloudflare R2). Credentials come from the standard AWS provider chain
//! (`AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`, profiles, instance
//! metadata); endpoint, region and path-style addressing can be overridden
//! through [`S3Settings`].
//!
//! ## Error classification
//!
//! S3 error codes are mapped onto [`GatewayErrorKind`] in one place
//! ([`classify`]). In particular `BucketNotEmpty` becomes
//! [`GatewayErrorKind::NotEmpty`], which is what the caller's delete retry
//! policy keys on.
//!
//! ## Storage class
//!
//! S3 has no bucket-level storage class. The requested class is applied to
//! every object copy instead (`x-amz-storage-class`).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::StalledStreamProtectionConfig;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    AccessControlPolicy, BucketLocationConstraint, BucketLoggingStatus, BucketVersioningStatus,
    CorsConfiguration, CreateBucketConfiguration, Delete, ErrorDocument, IndexDocument,
    LoggingEnabled, MetadataDirective, ObjectIdentifier, Owner, Permission, StorageClass, Type,
    VersioningConfiguration, WebsiteConfiguration,
};
use bucket_relocate_models::{
    AclDocument, CopiedObject, CopyReport, CopyRequest, CorsRule, Grant, Grantee, LoggingConfig,
    ObjectDescriptor, RelocationTarget, Versioning, WebsiteConfig,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::progress::ProgressCallback;
use crate::{GatewayError, GatewayErrorKind, StorageGateway};

/// Maximum number of keys accepted by a single `DeleteObjects` request.
const DELETE_BATCH_SIZE: usize = 1000;

/// Region that must not be sent as an explicit location constraint.
const DEFAULT_REGION: &str = "us-east-1";

/// Connection overrides for the S3 client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Settings {
    /// Custom endpoint (e.g. `http://localhost:9000` for `MinIO`).
    pub endpoint_url: Option<String>,
    /// Region used for signing; falls back to the provider chain.
    pub region: Option<String>,
    /// Use path-style addressing (`endpoint/bucket/key`).
    pub force_path_style: bool,
}

/// One version (or delete marker) of an object, in replay order.
#[derive(Debug, Clone)]
struct VersionEntry {
    key: String,
    version_id: Option<String>,
    size: u64,
    last_modified: Option<DateTime<Utc>>,
    delete_marker: bool,
    /// Whether the backend reports this entry as the current one.
    is_latest: bool,
    /// Position within its own listing (versions or delete markers), which
    /// is newest-first per key.
    rank: usize,
}

/// S3-backed storage gateway.
pub struct S3Gateway {
    client: aws_sdk_s3::Client,
    /// Set once the backend reports that object ACLs are disabled, so
    /// later copies stop trying to mirror them.
    object_acls_disabled: AtomicBool,
}

impl S3Gateway {
    /// Builds a client from the AWS provider chain plus `settings`.
    pub async fn connect(settings: &S3Settings) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.force_path_style)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled());
        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        log::debug!(
            "S3 client: endpoint={:?} region={:?} path_style={}",
            settings.endpoint_url,
            sdk_config.region(),
            settings.force_path_style
        );

        Self::from_client(aws_sdk_s3::Client::from_conf(builder.build()))
    }

    /// Wraps an already-configured client.
    #[must_use]
    pub const fn from_client(client: aws_sdk_s3::Client) -> Self {
        Self {
            client,
            object_acls_disabled: AtomicBool::new(false),
        }
    }

    // ── Listing ─────────────────────────────────────────────────────

    /// Lists current objects, following continuation tokens.
    async fn list_current(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectDescriptor>, GatewayError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_prefix(prefix.map(String::from))
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| sdk_error("ListObjectsV2", bucket, e))?;

            for obj in output.contents() {
                if let Some(key) = obj.key() {
                    objects.push(ObjectDescriptor {
                        key: key.to_string(),
                        version_id: None,
                        size: content_length(obj.size()),
                        etag: obj.e_tag().map(str::to_string),
                        last_modified: obj.last_modified().and_then(to_chrono),
                    });
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        log::debug!("  s3://{bucket}: {} current objects", objects.len());
        Ok(objects)
    }

    /// Lists every version and delete marker, grouped by key, each group
    /// sorted oldest first.
    async fn list_versions(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<BTreeMap<String, Vec<VersionEntry>>, GatewayError> {
        let mut by_key: BTreeMap<String, Vec<VersionEntry>> = BTreeMap::new();
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;
        let mut version_rank = 0usize;
        let mut marker_rank = 0usize;

        loop {
            let output = self
                .client
                .list_object_versions()
                .bucket(bucket)
                .set_prefix(prefix.map(String::from))
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
                .map_err(|e| sdk_error("ListObjectVersions", bucket, e))?;

            for version in output.versions() {
                if let Some(key) = version.key() {
                    by_key.entry(key.to_string()).or_default().push(VersionEntry {
                        key: key.to_string(),
                        version_id: version.version_id().map(str::to_string),
                        size: content_length(version.size()),
                        last_modified: version.last_modified().and_then(to_chrono),
                        delete_marker: false,
                        is_latest: version.is_latest() == Some(true),
                        rank: version_rank,
                    });
                    version_rank += 1;
                }
            }

            for marker in output.delete_markers() {
                if let Some(key) = marker.key() {
                    by_key.entry(key.to_string()).or_default().push(VersionEntry {
                        key: key.to_string(),
                        version_id: marker.version_id().map(str::to_string),
                        size: 0,
                        last_modified: marker.last_modified().and_then(to_chrono),
                        delete_marker: true,
                        is_latest: marker.is_latest() == Some(true),
                        rank: marker_rank,
                    });
                    marker_rank += 1;
                }
            }

            if output.is_truncated() == Some(true) {
                key_marker = output.next_key_marker().map(String::from);
                version_marker = output.next_version_id_marker().map(String::from);
            } else {
                break;
            }
        }

        for entries in by_key.values_mut() {
            sort_oldest_first(entries);
        }

        Ok(by_key)
    }

    // ── Copy ────────────────────────────────────────────────────────

    /// Replays every version of every source object, oldest first, one
    /// request at a time.
    ///
    /// Versions already present in the destination (counted per key) are
    /// assumed to be the oldest ones of the source and are skipped.
    async fn copy_ordered(
        &self,
        request: &CopyRequest,
        progress: &dyn ProgressCallback,
    ) -> Result<CopyReport, GatewayError> {
        let source = self.list_versions(&request.source_bucket, None).await?;
        let existing: HashMap<String, usize> = self
            .list_versions(&request.dest_bucket, None)
            .await?
            .into_iter()
            .map(|(key, versions)| (key, versions.len()))
            .collect();

        let mut report = CopyReport::default();
        let mut pending = Vec::new();
        for (key, versions) in source {
            let already = existing.get(&key).copied().unwrap_or(0);
            report.skipped += already.min(versions.len()) as u64;
            pending.extend(versions.into_iter().skip(already));
        }

        progress.set_total(pending.len() as u64);

        for entry in pending {
            if entry.delete_marker {
                self.client
                    .delete_object()
                    .bucket(&request.dest_bucket)
                    .key(&entry.key)
                    .send()
                    .await
                    .map_err(|e| {
                        sdk_error(
                            "DeleteObject",
                            format!("{}/{}", request.dest_bucket, entry.key),
                            e,
                        )
                    })?;
                report.copied.push(CopiedObject {
                    key: entry.key,
                    source_version: entry.version_id,
                    size: 0,
                    delete_marker: true,
                });
            } else {
                report.copied.push(
                    self.copy_one(request, &entry.key, entry.version_id.as_deref(), entry.size)
                        .await?,
                );
            }
            progress.inc(1);
        }

        Ok(report)
    }

    /// Copies the current version of every object whose size or entity tag
    /// differs from the destination, with up to `request.concurrency`
    /// transfers in flight.
    async fn copy_unordered(
        &self,
        request: &CopyRequest,
        progress: &dyn ProgressCallback,
    ) -> Result<CopyReport, GatewayError> {
        let source = self.list_current(&request.source_bucket, None).await?;
        let existing: HashMap<String, (u64, Option<String>)> = self
            .list_current(&request.dest_bucket, None)
            .await?
            .into_iter()
            .map(|o| (o.key, (o.size, o.etag)))
            .collect();

        let mut report = CopyReport::default();
        let pending: Vec<ObjectDescriptor> = source
            .into_iter()
            .filter(|obj| {
                let unchanged = existing
                    .get(&obj.key)
                    .is_some_and(|(size, etag)| *size == obj.size && *etag == obj.etag);
                if unchanged {
                    report.skipped += 1;
                }
                !unchanged
            })
            .collect();

        progress.set_total(pending.len() as u64);

        let mut transfers = futures::stream::iter(pending)
            .map(|obj| async move { self.copy_one(request, &obj.key, None, obj.size).await })
            .buffer_unordered(request.concurrency.max(1));

        while let Some(result) = transfers.next().await {
            report.copied.push(result?);
            progress.inc(1);
        }

        Ok(report)
    }

    /// Server-side copy of a single object (version).
    // TODO: objects over 5 GiB need a multipart UploadPartCopy instead of
    // CopyObject.
    async fn copy_one(
        &self,
        request: &CopyRequest,
        key: &str,
        version_id: Option<&str>,
        size: u64,
    ) -> Result<CopiedObject, GatewayError> {
        let target = format!("{}/{key}", request.dest_bucket);
        let mut copy_source = format!("{}/{}", request.source_bucket, urlencoding::encode(key));
        if let Some(version) = version_id {
            copy_source.push_str("?versionId=");
            copy_source.push_str(&urlencoding::encode(version));
        }

        let mut copy = self
            .client
            .copy_object()
            .bucket(&request.dest_bucket)
            .key(key)
            .copy_source(copy_source);
        if let Some(class) = &request.storage_class {
            copy = copy.storage_class(StorageClass::from(class.as_str()));
        }
        if !request.preserve_metadata {
            copy = copy.metadata_directive(MetadataDirective::Replace);
        }
        copy.send()
            .await
            .map_err(|e| sdk_error("CopyObject", &target, e))?;

        if request.preserve_metadata {
            self.copy_object_acl(request, key, version_id).await?;
        }

        log::debug!("  copied s3://{}/{key} -> s3://{target}", request.source_bucket);

        Ok(CopiedObject {
            key: key.to_string(),
            source_version: version_id.map(str::to_string),
            size,
            delete_marker: false,
        })
    }

    /// Mirrors an object ACL onto the freshly written copy.
    ///
    /// Buckets with object ownership enforced reject ACL calls with
    /// `AccessControlListNotSupported`; ACLs are then skipped for the rest
    /// of the run.
    async fn copy_object_acl(
        &self,
        request: &CopyRequest,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<(), GatewayError> {
        if self.object_acls_disabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let source_target = format!("{}/{key}", request.source_bucket);
        let acl = match self
            .client
            .get_object_acl()
            .bucket(&request.source_bucket)
            .key(key)
            .set_version_id(version_id.map(str::to_string))
            .send()
            .await
        {
            Ok(output) => AclDocument {
                owner: output.owner().map(owner_to_grantee),
                grants: output.grants().iter().filter_map(grant_from_sdk).collect(),
            },
            Err(e) if is_acl_not_supported(&e) => {
                self.disable_object_acls();
                return Ok(());
            }
            Err(e) => return Err(sdk_error("GetObjectAcl", source_target, e)),
        };

        let dest_target = format!("{}/{key}", request.dest_bucket);
        let policy = acl_to_sdk(&acl, &dest_target)?;
        match self
            .client
            .put_object_acl()
            .bucket(&request.dest_bucket)
            .key(key)
            .access_control_policy(policy)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_acl_not_supported(&e) => {
                self.disable_object_acls();
                Ok(())
            }
            Err(e) => Err(sdk_error("PutObjectAcl", dest_target, e)),
        }
    }

    fn disable_object_acls(&self) {
        if !self.object_acls_disabled.swap(true, Ordering::Relaxed) {
            log::warn!("Object ACLs are disabled on this backend, skipping ACL preservation");
        }
    }

    /// Deletes objects in batches of [`DELETE_BATCH_SIZE`].
    async fn delete_batch(
        &self,
        bucket: &str,
        identifiers: Vec<ObjectIdentifier>,
    ) -> Result<u64, GatewayError> {
        let mut deleted = 0u64;
        let mut remaining = identifiers;

        while !remaining.is_empty() {
            let rest = remaining.split_off(remaining.len().min(DELETE_BATCH_SIZE));
            let batch = std::mem::replace(&mut remaining, rest);
            let count = batch.len() as u64;

            let delete = Delete::builder()
                .set_objects(Some(batch))
                .quiet(true)
                .build()
                .map_err(|e| GatewayError::new(GatewayErrorKind::Other, "DeleteObjects", bucket, e))?;

            let output = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| sdk_error("DeleteObjects", bucket, e))?;

            if let Some(failure) = output.errors().first() {
                let kind = failure.code().map_or(GatewayErrorKind::Other, classify_code);
                return Err(GatewayError::new(
                    kind,
                    "DeleteObjects",
                    format!("{bucket}/{}", failure.key().unwrap_or_default()),
                    format!(
                        "{} of {count} deletions failed, first: {} {}",
                        output.errors().len(),
                        failure.code().unwrap_or("unknown"),
                        failure.message().unwrap_or_default()
                    ),
                ));
            }

            deleted += count;
            log::debug!("  deleted {deleted} objects from s3://{bucket}");
        }

        Ok(deleted)
    }
}

#[async_trait]
impl StorageGateway for S3Gateway {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, GatewayError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = sdk_error("HeadBucket", bucket, e);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn list_objects(&self, bucket: &str) -> Result<Vec<ObjectDescriptor>, GatewayError> {
        self.list_current(bucket, None).await
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<(), GatewayError> {
        self.client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error("HeadObject", format!("{bucket}/{key}"), e))?;
        Ok(())
    }

    async fn versioning(&self, bucket: &str) -> Result<Versioning, GatewayError> {
        let output = self
            .client
            .get_bucket_versioning()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| sdk_error("GetBucketVersioning", bucket, e))?;

        Ok(match output.status() {
            Some(BucketVersioningStatus::Enabled) => Versioning::Enabled,
            _ => Versioning::Disabled,
        })
    }

    async fn set_versioning(&self, bucket: &str, state: Versioning) -> Result<(), GatewayError> {
        let status = if state.is_enabled() {
            BucketVersioningStatus::Enabled
        } else {
            BucketVersioningStatus::Suspended
        };

        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(VersioningConfiguration::builder().status(status).build())
            .send()
            .await
            .map_err(|e| sdk_error("PutBucketVersioning", bucket, e))?;
        Ok(())
    }

    async fn create_bucket(
        &self,
        bucket: &str,
        target: &RelocationTarget,
    ) -> Result<(), GatewayError> {
        let mut create = self.client.create_bucket().bucket(bucket);

        if let Some(location) = target
            .location
            .as_deref()
            .filter(|location| *location != DEFAULT_REGION)
        {
            create = create.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(location))
                    .build(),
            );
        }

        create
            .send()
            .await
            .map_err(|e| sdk_error("CreateBucket", bucket, e))?;

        if let Some(class) = &target.storage_class {
            log::debug!("  s3://{bucket}: storage class {class} is applied per object on copy");
        }
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), GatewayError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| sdk_error("DeleteBucket", bucket, e))?;
        Ok(())
    }

    async fn copy_objects(
        &self,
        request: &CopyRequest,
        progress: &dyn ProgressCallback,
    ) -> Result<CopyReport, GatewayError> {
        log::info!(
            "Copying s3://{} -> s3://{} ({})",
            request.source_bucket,
            request.dest_bucket,
            if request.ordered {
                "all versions, sequential".to_string()
            } else {
                format!("{} concurrent transfers", request.concurrency.max(1))
            }
        );

        if request.ordered {
            self.copy_ordered(request, progress).await
        } else {
            self.copy_unordered(request, progress).await
        }
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        all_versions: bool,
    ) -> Result<u64, GatewayError> {
        let identifiers = if all_versions {
            self.list_versions(bucket, prefix)
                .await?
                .into_values()
                .flatten()
                .map(|entry| {
                    ObjectIdentifier::builder()
                        .key(entry.key)
                        .set_version_id(entry.version_id)
                        .build()
                })
                .collect::<Result<Vec<_>, _>>()
        } else {
            self.list_current(bucket, prefix)
                .await?
                .into_iter()
                .map(|obj| ObjectIdentifier::builder().key(obj.key).build())
                .collect::<Result<Vec<_>, _>>()
        }
        .map_err(|e| GatewayError::new(GatewayErrorKind::Other, "DeleteObjects", bucket, e))?;

        log::info!(
            "Deleting {} object(s) from s3://{bucket}{}",
            identifiers.len(),
            if all_versions { " (all versions)" } else { "" }
        );

        self.delete_batch(bucket, identifiers).await
    }

    async fn bucket_acl(&self, bucket: &str) -> Result<AclDocument, GatewayError> {
        let output = self
            .client
            .get_bucket_acl()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| sdk_error("GetBucketAcl", bucket, e))?;

        Ok(AclDocument {
            owner: output.owner().map(owner_to_grantee),
            grants: output.grants().iter().filter_map(grant_from_sdk).collect(),
        })
    }

    async fn set_bucket_acl(&self, bucket: &str, acl: &AclDocument) -> Result<(), GatewayError> {
        let policy = acl_to_sdk(acl, bucket)?;
        match self
            .client
            .put_bucket_acl()
            .bucket(bucket)
            .access_control_policy(policy)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_acl_not_supported(&e) => {
                log::warn!("  s3://{bucket}: bucket ACLs are disabled, leaving ACL unchanged");
                Ok(())
            }
            Err(e) => Err(sdk_error("PutBucketAcl", bucket, e)),
        }
    }

    async fn website(&self, bucket: &str) -> Result<WebsiteConfig, GatewayError> {
        match self.client.get_bucket_website().bucket(bucket).send().await {
            Ok(output) => Ok(WebsiteConfig {
                main_page_suffix: output.index_document().map(|d| d.suffix().to_string()),
                not_found_page: output.error_document().map(|d| d.key().to_string()),
            }),
            Err(e) if e.code() == Some("NoSuchWebsiteConfiguration") => {
                Ok(WebsiteConfig::default())
            }
            Err(e) => Err(sdk_error("GetBucketWebsite", bucket, e)),
        }
    }

    async fn set_website(
        &self,
        bucket: &str,
        config: &WebsiteConfig,
    ) -> Result<(), GatewayError> {
        let build_error =
            |e| GatewayError::new(GatewayErrorKind::Other, "PutBucketWebsite", bucket, e);

        let index = config
            .main_page_suffix
            .as_ref()
            .map(|suffix| IndexDocument::builder().suffix(suffix).build())
            .transpose()
            .map_err(build_error)?;
        let error = config
            .not_found_page
            .as_ref()
            .map(|key| ErrorDocument::builder().key(key).build())
            .transpose()
            .map_err(build_error)?;

        self.client
            .put_bucket_website()
            .bucket(bucket)
            .website_configuration(
                WebsiteConfiguration::builder()
                    .set_index_document(index)
                    .set_error_document(error)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("PutBucketWebsite", bucket, e))?;
        Ok(())
    }

    async fn logging(&self, bucket: &str) -> Result<LoggingConfig, GatewayError> {
        let output = self
            .client
            .get_bucket_logging()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| sdk_error("GetBucketLogging", bucket, e))?;

        Ok(output
            .logging_enabled()
            .map_or_else(LoggingConfig::default, |enabled| LoggingConfig {
                log_bucket: Some(enabled.target_bucket().to_string()),
                log_object_prefix: Some(enabled.target_prefix().to_string()),
            }))
    }

    async fn set_logging(
        &self,
        bucket: &str,
        config: &LoggingConfig,
    ) -> Result<(), GatewayError> {
        let enabled = match (&config.log_bucket, &config.log_object_prefix) {
            (Some(log_bucket), Some(prefix)) => Some(
                LoggingEnabled::builder()
                    .target_bucket(log_bucket)
                    .target_prefix(prefix)
                    .build()
                    .map_err(|e| {
                        GatewayError::new(GatewayErrorKind::Other, "PutBucketLogging", bucket, e)
                    })?,
            ),
            _ => None,
        };

        self.client
            .put_bucket_logging()
            .bucket(bucket)
            .bucket_logging_status(
                BucketLoggingStatus::builder()
                    .set_logging_enabled(enabled)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| sdk_error("PutBucketLogging", bucket, e))?;
        Ok(())
    }

    async fn cors(&self, bucket: &str) -> Result<Vec<CorsRule>, GatewayError> {
        match self.client.get_bucket_cors().bucket(bucket).send().await {
            Ok(output) => Ok(output
                .cors_rules()
                .iter()
                .map(|rule| CorsRule {
                    allowed_origins: rule.allowed_origins().to_vec(),
                    allowed_methods: rule.allowed_methods().to_vec(),
                    allowed_headers: rule.allowed_headers().to_vec(),
                    expose_headers: rule.expose_headers().to_vec(),
                    max_age_seconds: rule.max_age_seconds(),
                })
                .collect()),
            Err(e) if e.code() == Some("NoSuchCORSConfiguration") => Ok(Vec::new()),
            Err(e) => Err(sdk_error("GetBucketCors", bucket, e)),
        }
    }

    async fn set_cors(&self, bucket: &str, rules: &[CorsRule]) -> Result<(), GatewayError> {
        if rules.is_empty() {
            self.client
                .delete_bucket_cors()
                .bucket(bucket)
                .send()
                .await
                .map_err(|e| sdk_error("DeleteBucketCors", bucket, e))?;
            return Ok(());
        }

        let build_error =
            |e| GatewayError::new(GatewayErrorKind::Other, "PutBucketCors", bucket, e);

        let sdk_rules = rules
            .iter()
            .map(|rule| {
                aws_sdk_s3::types::CorsRule::builder()
                    .set_allowed_origins(Some(rule.allowed_origins.clone()))
                    .set_allowed_methods(Some(rule.allowed_methods.clone()))
                    .set_allowed_headers(Some(rule.allowed_headers.clone()))
                    .set_expose_headers(Some(rule.expose_headers.clone()))
                    .set_max_age_seconds(rule.max_age_seconds)
                    .build()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(build_error)?;

        let configuration = CorsConfiguration::builder()
            .set_cors_rules(Some(sdk_rules))
            .build()
            .map_err(build_error)?;

        self.client
            .put_bucket_cors()
            .bucket(bucket)
            .cors_configuration(configuration)
            .send()
            .await
            .map_err(|e| sdk_error("PutBucketCors", bucket, e))?;
        Ok(())
    }

    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        content: Vec<u8>,
    ) -> Result<(), GatewayError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(content))
            .content_type("text/plain")
            .send()
            .await
            .map_err(|e| sdk_error("PutObject", format!("{bucket}/{key}"), e))?;
        Ok(())
    }
}

/// Orders one key's history for replay.
///
/// The SDK hands versions and delete markers over as two separate lists,
/// and `LastModified` only has second resolution, so timestamps alone can
/// tie. The current entry always goes last. Among tied non-current
/// entries a version precedes a delete marker, and entries of the same
/// kind keep their reversed listing order.
fn sort_oldest_first(entries: &mut [VersionEntry]) {
    entries.sort_by(|a, b| {
        a.is_latest
            .cmp(&b.is_latest)
            .then(a.last_modified.cmp(&b.last_modified))
            .then(a.delete_marker.cmp(&b.delete_marker))
            .then(b.rank.cmp(&a.rank))
    });
}

/// Maps an S3 error code onto a [`GatewayErrorKind`].
fn classify_code(code: &str) -> GatewayErrorKind {
    match code {
        "NoSuchBucket" | "NoSuchKey" | "NoSuchVersion" | "NotFound" => GatewayErrorKind::NotFound,
        "BucketAlreadyExists" => GatewayErrorKind::AlreadyExists,
        "BucketAlreadyOwnedByYou" => GatewayErrorKind::AlreadyOwned,
        "BucketNotEmpty" => GatewayErrorKind::NotEmpty,
        "AccessDenied" | "AllAccessDisabled" | "Forbidden" => GatewayErrorKind::AccessDenied,
        _ => GatewayErrorKind::Other,
    }
}

/// Classifies an SDK error by error code, falling back to the HTTP status
/// for responses without a body (e.g. `HEAD` requests).
fn classify<E>(err: &SdkError<E, HttpResponse>) -> GatewayErrorKind
where
    E: ProvideErrorMetadata,
{
    if let Some(code) = err.code() {
        let kind = classify_code(code);
        if kind != GatewayErrorKind::Other {
            return kind;
        }
    }

    match err.raw_response().map(|r| r.status().as_u16()) {
        Some(403) => GatewayErrorKind::AccessDenied,
        Some(404) => GatewayErrorKind::NotFound,
        _ => GatewayErrorKind::Other,
    }
}

/// Wraps an SDK error into a classified [`GatewayError`].
fn sdk_error<E>(
    operation: &'static str,
    target: impl Into<String>,
    err: SdkError<E, HttpResponse>,
) -> GatewayError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    GatewayError::new(classify(&err), operation, target, err)
}

fn is_acl_not_supported<E>(err: &SdkError<E, HttpResponse>) -> bool
where
    E: ProvideErrorMetadata,
{
    err.code() == Some("AccessControlListNotSupported")
}

#[allow(clippy::cast_sign_loss)] // S3 content-length is non-negative
const fn content_length(size: Option<i64>) -> u64 {
    match size {
        Some(size) if size > 0 => size as u64,
        _ => 0,
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn owner_to_grantee(owner: &Owner) -> Grantee {
    Grantee {
        kind: Type::CanonicalUser.as_str().to_string(),
        id: owner.id().map(str::to_string),
        display_name: owner.display_name().map(str::to_string),
        uri: None,
        email: None,
    }
}

fn grant_from_sdk(grant: &aws_sdk_s3::types::Grant) -> Option<Grant> {
    let grantee = grant.grantee()?;
    Some(Grant {
        grantee: Grantee {
            kind: grantee.r#type().as_str().to_string(),
            id: grantee.id().map(str::to_string),
            display_name: grantee.display_name().map(str::to_string),
            uri: grantee.uri().map(str::to_string),
            email: grantee.email_address().map(str::to_string),
        },
        permission: grant.permission()?.as_str().to_string(),
    })
}

fn acl_to_sdk(acl: &AclDocument, target: &str) -> Result<AccessControlPolicy, GatewayError> {
    let grants = acl
        .grants
        .iter()
        .map(|grant| {
            let grantee = aws_sdk_s3::types::Grantee::builder()
                .r#type(Type::from(grant.grantee.kind.as_str()))
                .set_id(grant.grantee.id.clone())
                .set_display_name(grant.grantee.display_name.clone())
                .set_uri(grant.grantee.uri.clone())
                .set_email_address(grant.grantee.email.clone())
                .build()?;
            Ok(aws_sdk_s3::types::Grant::builder()
                .grantee(grantee)
                .permission(Permission::from(grant.permission.as_str()))
                .build())
        })
        .collect::<Result<Vec<_>, aws_sdk_s3::error::BuildError>>()
        .map_err(|e| GatewayError::new(GatewayErrorKind::Other, "PutAcl", target, e))?;

    let owner = acl.owner.as_ref().map(|owner| {
        Owner::builder()
            .set_id(owner.id.clone())
            .set_display_name(owner.display_name.clone())
            .build()
    });

    Ok(AccessControlPolicy::builder()
        .set_owner(owner)
        .set_grants(Some(grants))
        .build())
}
