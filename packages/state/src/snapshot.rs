//! Per-bucket metadata snapshot files.
//!
//! Seed and cutover may run days apart in different processes, so the
//! snapshot taken at the end of the seed stage is persisted as
//! `<bucket>.metadata.json` and read back by the cutover.

use bucket_relocate_models::MetadataSnapshot;

use crate::StateError;
use crate::archive::with_suffix;
use crate::paths::StatePaths;

/// Reads and writes metadata snapshots in the state directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    paths: StatePaths,
}

impl SnapshotStore {
    /// Store backed by `paths`.
    #[must_use]
    pub const fn new(paths: StatePaths) -> Self {
        Self { paths }
    }

    /// Persists `snapshot`, replacing any previous snapshot for the bucket.
    ///
    /// The file is written next to its final location and renamed into
    /// place, so a crash never leaves a half-written snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if serialization or any file operation fails.
    pub fn save(&self, snapshot: &MetadataSnapshot) -> Result<(), StateError> {
        let path = self.paths.snapshot(&snapshot.bucket);
        let tmp = with_suffix(&path, ".tmp");

        let json =
            serde_json::to_string_pretty(snapshot).map_err(|e| StateError::json(&path, e))?;
        std::fs::write(&tmp, json).map_err(|e| StateError::io(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| StateError::io(&path, e))?;

        log::debug!("Saved metadata snapshot {}", path.display());
        Ok(())
    }

    /// Loads the snapshot for `bucket`, or `None` if none was saved.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load(&self, bucket: &str) -> Result<Option<MetadataSnapshot>, StateError> {
        let path = self.paths.snapshot(bucket);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(&path, e)),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StateError::json(&path, e))
    }
}
