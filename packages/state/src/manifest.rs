//! Append-only audit log of object copies.
//!
//! One JSON line per object (version) written by a bulk copy. The
//! orchestrator never reads it back.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use bucket_relocate_models::CopyReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StateError;

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// When the copy step finished.
    pub recorded_at: DateTime<Utc>,
    /// Bucket copied from.
    pub source_bucket: String,
    /// Bucket copied into.
    pub dest_bucket: String,
    /// Object key.
    pub key: String,
    /// Source version id, for ordered copies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// `copied` or `delete_marker`.
    pub outcome: String,
}

/// The copy manifest file.
#[derive(Debug, Clone)]
pub struct ManifestLog {
    path: PathBuf,
}

impl ManifestLog {
    /// Manifest at `path`; the file is created on first append.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the manifest file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line per copied object in `report`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the manifest cannot be written.
    pub fn append(
        &self,
        source_bucket: &str,
        dest_bucket: &str,
        report: &CopyReport,
    ) -> Result<(), StateError> {
        if report.copied.is_empty() {
            return Ok(());
        }

        let recorded_at = Utc::now();
        let mut buf = String::new();
        for object in &report.copied {
            let entry = ManifestEntry {
                recorded_at,
                source_bucket: source_bucket.to_string(),
                dest_bucket: dest_bucket.to_string(),
                key: object.key.clone(),
                source_version: object.source_version.clone(),
                size: object.size,
                outcome: if object.delete_marker {
                    "delete_marker"
                } else {
                    "copied"
                }
                .to_string(),
            };
            buf.push_str(
                &serde_json::to_string(&entry).map_err(|e| StateError::json(&self.path, e))?,
            );
            buf.push('\n');
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StateError::io(&self.path, e))?;
        file.write_all(buf.as_bytes())
            .map_err(|e| StateError::io(&self.path, e))?;

        log::debug!(
            "Manifest: {} entries for {source_bucket} -> {dest_bucket}",
            report.copied.len()
        );
        Ok(())
    }
}
