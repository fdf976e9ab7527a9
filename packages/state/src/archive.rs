//! Completion archival.
//!
//! Once every requested bucket has finished, the ledger, manifest, debug log
//! and the finished buckets' metadata snapshots are renamed with a
//! `.completed-<UTC timestamp>` suffix. They are never deleted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::StateError;
use crate::ledger::StepLedger;
use crate::paths::StatePaths;

/// Suffix appended to archived state files.
#[must_use]
pub fn completion_suffix(at: DateTime<Utc>) -> String {
    format!(".completed-{}", at.format("%Y%m%dT%H%M%S%.3fZ"))
}

/// [`completion_suffix`] for `at`, with a `-<n>` counter appended when an
/// earlier archival already used that name for any of `files`.
fn unused_suffix(files: &[PathBuf], at: DateTime<Utc>) -> String {
    let base = completion_suffix(at);
    let mut suffix = base.clone();
    let mut counter = 1u32;
    while files.iter().any(|file| with_suffix(file, &suffix).exists()) {
        suffix = format!("{base}-{counter}");
        counter += 1;
    }
    suffix
}

/// Returns `path` with `suffix` appended to its file name.
#[must_use]
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Renames `path` to `path + suffix` if it exists.
///
/// # Errors
///
/// Returns [`StateError::Io`] if the rename fails.
pub fn rename_with_suffix(path: &Path, suffix: &str) -> Result<Option<PathBuf>, StateError> {
    if !path.exists() {
        return Ok(None);
    }
    let target = with_suffix(path, suffix);
    std::fs::rename(path, &target).map_err(|e| StateError::io(path, e))?;
    log::info!("Archived {} -> {}", path.display(), target.display());
    Ok(Some(target))
}

/// Archives all state belonging to `completed` buckets. Returns the paths
/// that were created.
///
/// # Errors
///
/// Returns [`StateError`] if any rename fails.
pub fn archive_completed(
    paths: &StatePaths,
    ledger: &mut StepLedger,
    completed: &[String],
    at: DateTime<Utc>,
) -> Result<Vec<PathBuf>, StateError> {
    let others: Vec<PathBuf> = [paths.manifest(), paths.debug_log()]
        .into_iter()
        .chain(completed.iter().map(|bucket| paths.snapshot(bucket)))
        .collect();
    let mut files = vec![ledger.path().to_path_buf()];
    files.extend(others.iter().cloned());
    let suffix = unused_suffix(&files, at);

    let mut archived = Vec::new();
    archived.extend(ledger.archive(completed, &suffix)?);
    for file in &others {
        archived.extend(rename_with_suffix(file, &suffix)?);
    }

    Ok(archived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn suffix_is_sortable_utc_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 9, 5, 3).unwrap()
            + chrono::Duration::milliseconds(42);
        assert_eq!(completion_suffix(at), ".completed-20261016T090503.042Z");
    }

    #[test]
    fn archives_every_state_file_of_completed_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StatePaths::new(dir.path());
        std::fs::write(paths.manifest(), "{}\n").unwrap();
        std::fs::write(paths.debug_log(), "log\n").unwrap();
        std::fs::write(paths.snapshot("demo"), "{}").unwrap();
        std::fs::write(paths.snapshot("other"), "{}").unwrap();

        let mut ledger = StepLedger::open(paths.ledger()).unwrap();
        ledger.record_step_complete(15, "demo").unwrap();

        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let archived = archive_completed(&paths, &mut ledger, &["demo".to_string()], at).unwrap();

        assert_eq!(archived.len(), 4);
        assert!(!paths.ledger().exists());
        assert!(!paths.manifest().exists());
        assert!(!paths.debug_log().exists());
        assert!(!paths.snapshot("demo").exists());
        assert!(paths.snapshot("other").exists());
        assert!(
            with_suffix(&paths.ledger(), &completion_suffix(at)).exists(),
            "ledger is renamed, not deleted"
        );
    }

    #[test]
    fn same_instant_archivals_do_not_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StatePaths::new(dir.path());
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut ledger = StepLedger::open(paths.ledger()).unwrap();

        ledger.record_step_complete(15, "demo").unwrap();
        std::fs::write(paths.manifest(), "first\n").unwrap();
        let first = archive_completed(&paths, &mut ledger, &["demo".to_string()], at).unwrap();

        ledger.record_step_complete(15, "demo").unwrap();
        std::fs::write(paths.manifest(), "second\n").unwrap();
        let second = archive_completed(&paths, &mut ledger, &["demo".to_string()], at).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert!(first.iter().all(|path| !second.contains(path)));
        assert_eq!(std::fs::read_to_string(&first[1]).unwrap(), "first\n");
        assert_eq!(std::fs::read_to_string(&second[1]).unwrap(), "second\n");
        assert!(second[1].to_string_lossy().ends_with(".completed-20260101T000000.000Z-1"));
    }
}
