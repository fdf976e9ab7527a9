//! Bucket-level configuration documents.
//!
//! Each document is a structured value with optional fields. Adapters
//! translate the storage backend's wire representation into these types;
//! nothing downstream inspects raw markup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RelocationTarget, Versioning};

/// Identity an ACL grant applies to.
///
/// Exactly which fields are populated depends on the grantee type: a
/// canonical user carries `id`, a group carries `uri`, an email grantee
/// carries `email`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grantee {
    /// Grantee type as reported by the backend (e.g. `CanonicalUser`).
    pub kind: String,
    /// Canonical id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Group URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A single permission granted to a grantee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// Who receives the permission.
    pub grantee: Grantee,
    /// Permission name (e.g. `READ`, `FULL_CONTROL`).
    pub permission: String,
}

/// Bucket access control list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclDocument {
    /// Bucket owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Grantee>,
    /// Granted permissions.
    #[serde(default)]
    pub grants: Vec<Grant>,
}

/// Static website hosting configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteConfig {
    /// Index document suffix (e.g. `index.html`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_page_suffix: Option<String>,
    /// Error document key (e.g. `404.html`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_found_page: Option<String>,
}

impl WebsiteConfig {
    /// A website configuration is worth restoring only if it names a page.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.main_page_suffix.is_some() || self.not_found_page.is_some()
    }
}

/// Access logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Bucket receiving the access logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_bucket: Option<String>,
    /// Key prefix of the log objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_object_prefix: Option<String>,
}

impl LoggingConfig {
    /// Logging is restored only when both the target bucket and prefix are
    /// known.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.log_bucket.is_some() && self.log_object_prefix.is_some()
    }
}

/// A single CORS rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsRule {
    /// Allowed origins.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    /// Allowed HTTP methods.
    #[serde(default)]
    pub allowed_methods: Vec<String>,
    /// Allowed request headers.
    #[serde(default)]
    pub allowed_headers: Vec<String>,
    /// Headers exposed to the browser.
    #[serde(default)]
    pub expose_headers: Vec<String>,
    /// Preflight cache lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_seconds: Option<i32>,
}

/// Bucket-level configuration captured at the end of the seed stage and
/// restored onto the recreated bucket during cutover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataSnapshot {
    /// Bucket the snapshot was taken from.
    pub bucket: String,
    /// When the snapshot was taken.
    pub captured_at: DateTime<Utc>,
    /// Location/class the seed stage created the temporary bucket with.
    #[serde(default)]
    pub target: RelocationTarget,
    /// Bucket ACL.
    #[serde(default)]
    pub acl: AclDocument,
    /// Website configuration.
    #[serde(default)]
    pub website: WebsiteConfig,
    /// Access logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// CORS rules; empty when no CORS configuration exists.
    #[serde(default)]
    pub cors: Vec<CorsRule>,
    /// Versioning state of the source bucket.
    #[serde(default)]
    pub versioning: Versioning,
}
