//! Append-only step ledger.
//!
//! Each completed step is appended as one JSON line:
//!
//! ```text
//! {"step":4,"bucket":"demo","completed_at":"2026-10-16T09:12:44Z"}
//! ```
//!
//! The whole file is replayed at startup into a map from bucket to the
//! highest completed step. That map is only a cache of the file; the file
//! is the single source of truth for where each bucket resumes.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StateError;
use crate::archive;

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Global step number.
    pub step: u32,
    /// Source bucket the step was completed for.
    pub bucket: String,
    /// When the step completed.
    pub completed_at: DateTime<Utc>,
}

/// Durable record of completed steps per bucket.
#[derive(Debug)]
pub struct StepLedger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
    last_steps: BTreeMap<String, u32>,
}

impl StepLedger {
    /// Opens the ledger at `path`, replaying any existing entries.
    ///
    /// A missing file is an empty ledger. A final line without a trailing
    /// newline that does not parse is the remnant of an interrupted append;
    /// it is dropped (and truncated away) with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::CorruptLedger`] for an unreadable line anywhere
    /// else, or [`StateError::Io`] if the file cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let mut ledger = Self {
            path,
            entries: Vec::new(),
            last_steps: BTreeMap::new(),
        };

        let text = match std::fs::read_to_string(&ledger.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ledger),
            Err(e) => return Err(StateError::io(&ledger.path, e)),
        };

        let mut valid_len = 0usize;
        let line_count = text.lines().count();
        for (index, line) in text.split_inclusive('\n').enumerate() {
            let complete = line.ends_with('\n');
            let trimmed = line.trim();
            if trimmed.is_empty() {
                valid_len += line.len();
                continue;
            }

            match serde_json::from_str::<LedgerEntry>(trimmed) {
                Ok(entry) if complete => {
                    valid_len += line.len();
                    ledger.apply(entry);
                }
                Ok(entry) => {
                    // Parsed but never newline-terminated: keep it and
                    // terminate it so the next append starts a new line.
                    ledger.apply(entry);
                    ledger.truncate_to(valid_len)?;
                    ledger.append_line(trimmed)?;
                    return Ok(ledger);
                }
                Err(e) if !complete && index + 1 == line_count => {
                    log::warn!(
                        "Ignoring truncated final line of step ledger {}: {e}",
                        ledger.path.display()
                    );
                    ledger.truncate_to(valid_len)?;
                    return Ok(ledger);
                }
                Err(e) => {
                    return Err(StateError::CorruptLedger {
                        path: ledger.path.clone(),
                        line: index + 1,
                        message: e.to_string(),
                    });
                }
            }
        }

        log::debug!(
            "Replayed {} ledger entries for {} bucket(s) from {}",
            ledger.entries.len(),
            ledger.last_steps.len(),
            ledger.path.display()
        );
        Ok(ledger)
    }

    /// Path of the ledger file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest completed step for `bucket`, or 0 if nothing is recorded.
    #[must_use]
    pub fn last_completed_step(&self, bucket: &str) -> u32 {
        self.last_steps.get(bucket).copied().unwrap_or(0)
    }

    /// Highest completed step for every bucket in the ledger.
    #[must_use]
    pub const fn last_steps(&self) -> &BTreeMap<String, u32> {
        &self.last_steps
    }

    /// Durably records that `step` completed for `bucket`.
    ///
    /// Recording a step at or below the current last step is a no-op, so
    /// the per-bucket last step never decreases.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the entry cannot be written and synced.
    pub fn record_step_complete(&mut self, step: u32, bucket: &str) -> Result<(), StateError> {
        if step <= self.last_completed_step(bucket) {
            log::debug!("Ledger already has step {step} for {bucket}, not re-recording");
            return Ok(());
        }

        let entry = LedgerEntry {
            step,
            bucket: bucket.to_string(),
            completed_at: Utc::now(),
        };
        let line = serde_json::to_string(&entry).map_err(|e| StateError::json(&self.path, e))?;
        self.append_line(&line)?;
        self.apply(entry);
        Ok(())
    }

    /// Archives the ledger once `completed` buckets have finished.
    ///
    /// The current file moves to its `suffix` name. Entries for buckets not
    /// in `completed` go to a fresh ledger at the original path so their
    /// progress survives. The fresh ledger is staged and synced next to the
    /// old one and swapped in with a single rename; until that rename the
    /// old ledger stays in place. Returns the archived path, or `None` if
    /// the ledger file did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if staging, archiving or the swap fails. The
    /// in-memory ledger is left unchanged in that case.
    pub fn archive(
        &mut self,
        completed: &[String],
        suffix: &str,
    ) -> Result<Option<PathBuf>, StateError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let carried: Vec<LedgerEntry> = self
            .entries
            .iter()
            .filter(|e| !completed.contains(&e.bucket))
            .cloned()
            .collect();
        let archived = archive::with_suffix(&self.path, suffix);

        if carried.is_empty() {
            std::fs::rename(&self.path, &archived).map_err(|e| StateError::io(&self.path, e))?;
        } else {
            let staged = archive::with_suffix(&self.path, ".tmp");
            if let Err(e) = write_entries(&staged, &carried) {
                std::fs::remove_file(&staged).ok();
                return Err(e);
            }
            link_or_copy(&self.path, &archived)?;
            std::fs::rename(&staged, &self.path).map_err(|e| StateError::io(&staged, e))?;
        }
        log::info!("Archived {} -> {}", self.path.display(), archived.display());

        self.entries.clear();
        self.last_steps.clear();
        for entry in carried {
            self.apply(entry);
        }

        if !self.entries.is_empty() {
            log::info!(
                "Carried {} ledger entries for unfinished bucket(s) into a fresh ledger",
                self.entries.len()
            );
        }
        Ok(Some(archived))
    }

    fn apply(&mut self, entry: LedgerEntry) {
        let last = self.last_steps.entry(entry.bucket.clone()).or_insert(0);
        *last = (*last).max(entry.step);
        self.entries.push(entry);
    }

    fn append_line(&self, line: &str) -> Result<(), StateError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StateError::io(&self.path, e))?;
        file.write_all(format!("{line}\n").as_bytes())
            .and_then(|()| file.sync_data())
            .map_err(|e| StateError::io(&self.path, e))
    }

    fn truncate_to(&self, len: usize) -> Result<(), StateError> {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| StateError::io(&self.path, e))?;
        file.set_len(len as u64)
            .and_then(|()| file.sync_data())
            .map_err(|e| StateError::io(&self.path, e))
    }
}

/// Writes `entries` to a new file at `path` and syncs it.
fn write_entries(path: &Path, entries: &[LedgerEntry]) -> Result<(), StateError> {
    let mut text = String::new();
    for entry in entries {
        text.push_str(&serde_json::to_string(entry).map_err(|e| StateError::json(path, e))?);
        text.push('\n');
    }
    let mut file = std::fs::File::create(path).map_err(|e| StateError::io(path, e))?;
    file.write_all(text.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| StateError::io(path, e))
}

/// Puts a copy of `from` at `to` without touching `from`.
fn link_or_copy(from: &Path, to: &Path) -> Result<(), StateError> {
    if let Err(e) = std::fs::hard_link(from, to) {
        log::debug!("Cannot hard link {} ({e}), copying instead", to.display());
        std::fs::copy(from, to).map_err(|e| StateError::io(to, e))?;
    }
    Ok(())
}
